use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use render_shared::clients::enhancer::{EnhanceParams, EnhancementReport};
use render_shared::clients::storage::StoredFile;
use render_shared::errors::{on_unique_violation, AppError, AppResult, ErrorCode};

use crate::domain::ImageStatus;
use crate::models::{EnhancementResult, Image, NewEnhancementResult, NewImage};
use crate::schema::{enhancement_results, images};

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub id: Uuid,
    pub url: String,
    pub model: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<EnhancementResult> for ResultView {
    fn from(r: EnhancementResult) -> Self {
        Self {
            id: r.id,
            url: r.result_path,
            model: r.model,
            metadata: r.metadata,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImageView {
    pub id: Uuid,
    pub file_name: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub source_image_id: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result: Option<ResultView>,
}

impl ImageView {
    pub fn new(image: Image, result: Option<EnhancementResult>) -> Self {
        Self {
            id: image.id,
            file_name: image.file_name,
            url: image.original_path,
            content_type: image.content_type,
            size_bytes: image.size_bytes,
            status: image.status,
            metadata: image.metadata,
            source_image_id: image.source_image_id,
            uploaded_at: image.uploaded_at,
            processed_at: image.processed_at,
            result: result.map(ResultView::from),
        }
    }
}

/// What an enhancement request operates on.
#[derive(Debug)]
pub enum EnhancementSource {
    /// A pending or failed image, enhanced in place.
    Direct(Image),
    /// A processed image. Its result becomes the original of a new, chained image.
    Chain { parent: Image, result_path: String },
}

pub fn create_image(
    conn: &mut PgConnection,
    owner: Uuid,
    file_name: &str,
    content_type: &str,
    stored: &StoredFile,
    source_image_id: Option<Uuid>,
) -> AppResult<Image> {
    let image: Image = diesel::insert_into(images::table)
        .values(&NewImage {
            owner_id: owner,
            file_name: file_name.to_string(),
            original_path: stored.public_url.clone(),
            content_type: content_type.to_string(),
            size_bytes: stored.size_bytes,
            source_image_id,
        })
        .returning(Image::as_returning())
        .get_result(conn)?;

    tracing::info!(image_id = %image.id, owner = %owner, size = stored.size_bytes, "image stored");
    Ok(image)
}

/// Loads an image owned by `owner`. Someone else's image is reported as
/// missing so its existence is not disclosed.
pub fn find_owned(conn: &mut PgConnection, image_id: Uuid, owner: Uuid) -> AppResult<Image> {
    images::table
        .find(image_id)
        .filter(images::owner_id.eq(owner))
        .select(Image::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ImageNotFound, "image not found"))
}

fn result_for(conn: &mut PgConnection, image: &Image) -> AppResult<Option<EnhancementResult>> {
    let Some(result_id) = image.result_id else {
        return Ok(None);
    };
    let result = enhancement_results::table
        .find(result_id)
        .select(EnhancementResult::as_select())
        .first(conn)
        .optional()?;
    Ok(result)
}

pub fn list_images(conn: &mut PgConnection, owner: Uuid) -> AppResult<Vec<ImageView>> {
    let owned = images::table
        .filter(images::owner_id.eq(owner))
        .order((images::uploaded_at.desc(), images::id.desc()))
        .select(Image::as_select())
        .load(conn)?;

    let ids: Vec<Uuid> = owned.iter().map(|i| i.id).collect();
    let mut results: HashMap<Uuid, EnhancementResult> = enhancement_results::table
        .filter(enhancement_results::image_id.eq_any(&ids))
        .select(EnhancementResult::as_select())
        .load(conn)?
        .into_iter()
        .map(|r| (r.image_id, r))
        .collect();

    Ok(owned
        .into_iter()
        .map(|image| {
            let result = results.remove(&image.id);
            ImageView::new(image, result)
        })
        .collect())
}

pub fn get_result(conn: &mut PgConnection, image_id: Uuid, owner: Uuid) -> AppResult<ImageView> {
    let image = find_owned(conn, image_id, owner)?;
    let result = result_for(conn, &image)?;
    Ok(ImageView::new(image, result))
}

/// Removes the image and its result rows. Returns the file paths the caller
/// should remove from storage afterwards.
pub fn delete_image(conn: &mut PgConnection, image_id: Uuid, owner: Uuid) -> AppResult<Vec<String>> {
    let paths = conn.transaction(|conn| {
        let image = find_owned(conn, image_id, owner)?;
        let result_paths: Vec<String> = enhancement_results::table
            .filter(enhancement_results::image_id.eq(image.id))
            .select(enhancement_results::result_path)
            .load(conn)?;

        diesel::update(images::table.find(image.id))
            .set(images::result_id.eq(None::<Uuid>))
            .execute(conn)?;
        diesel::delete(enhancement_results::table.filter(enhancement_results::image_id.eq(image.id)))
            .execute(conn)?;
        diesel::delete(images::table.find(image.id)).execute(conn)?;

        let mut paths = vec![image.original_path];
        paths.extend(result_paths);
        Ok::<_, AppError>(paths)
    })?;

    tracing::info!(image_id = %image_id, owner = %owner, "image deleted");
    Ok(paths)
}

pub fn prepare_enhancement(conn: &mut PgConnection, image_id: Uuid, owner: Uuid) -> AppResult<EnhancementSource> {
    let image = find_owned(conn, image_id, owner)?;
    if !image.status()?.is_terminal() {
        return Ok(EnhancementSource::Direct(image));
    }

    let result = result_for(conn, &image)?.ok_or_else(|| {
        AppError::internal(format!("processed image {} has no enhancement result", image.id))
    })?;
    Ok(EnhancementSource::Chain { parent: image, result_path: result.result_path })
}

/// Registers the copy of a processed image's result as a new pending image.
pub fn create_chained_image(conn: &mut PgConnection, parent: &Image, stored: &StoredFile) -> AppResult<Image> {
    let file_name = format!("enhanced_{}", parent.file_name);
    create_image(conn, parent.owner_id, &file_name, &parent.content_type, stored, Some(parent.id))
}

pub fn result_metadata(
    params: &EnhanceParams,
    report: &EnhancementReport,
    input_bytes: i64,
    output_bytes: i64,
) -> serde_json::Value {
    let mut meta = serde_json::json!({
        "params": params,
        "input_bytes": input_bytes,
        "output_bytes": output_bytes,
    });
    if let (Some(obj), Ok(serde_json::Value::Object(extra))) = (meta.as_object_mut(), serde_json::to_value(report)) {
        obj.extend(extra);
    }
    meta
}

/// Stores a successful enhancement and moves the image to `processed`.
pub fn record_success(
    conn: &mut PgConnection,
    image_id: Uuid,
    stored: &StoredFile,
    params: &EnhanceParams,
    report: &EnhancementReport,
) -> AppResult<ImageView> {
    conn.transaction(|conn| {
        let image = images::table
            .find(image_id)
            .select(Image::as_select())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::new(ErrorCode::ImageNotFound, "image not found"))?;

        if !image.status()?.can_transition_to(ImageStatus::Processed) {
            return Err(AppError::new(ErrorCode::ImageAlreadyProcessed, "image was already processed"));
        }

        let metadata = result_metadata(params, report, image.size_bytes, stored.size_bytes);
        let model = report.model_used.clone().unwrap_or_else(|| params.model_name.clone());

        let result: EnhancementResult = diesel::insert_into(enhancement_results::table)
            .values(&NewEnhancementResult {
                image_id,
                result_path: stored.public_url.clone(),
                model,
                metadata: metadata.clone(),
            })
            .returning(EnhancementResult::as_returning())
            .get_result(conn)
            .map_err(|e| on_unique_violation(e, ErrorCode::ImageAlreadyProcessed, "image was already processed"))?;

        let image: Image = diesel::update(images::table.find(image_id))
            .set((
                images::status.eq(ImageStatus::Processed.as_str()),
                images::result_id.eq(result.id),
                images::processed_at.eq(Utc::now()),
                images::metadata.eq(metadata),
            ))
            .returning(Image::as_returning())
            .get_result(conn)?;

        tracing::info!(image_id = %image_id, result_id = %result.id, "image processed");
        Ok(ImageView::new(image, Some(result)))
    })
}

/// Moves the image to `error`, keeping the uploaded file so it can be retried.
pub fn record_failure(conn: &mut PgConnection, image_id: Uuid, params: &EnhanceParams, error: &AppError) -> AppResult<()> {
    conn.transaction(|conn| {
        let status: Option<String> = images::table
            .find(image_id)
            .select(images::status)
            .for_update()
            .first(conn)
            .optional()?;

        let Some(status) = status else {
            return Ok(());
        };
        let status: ImageStatus = status.parse()?;
        if !status.can_transition_to(ImageStatus::Error) {
            tracing::warn!(image_id = %image_id, %status, "enhancement failed after image left the retryable state");
            return Ok(());
        }

        diesel::update(images::table.find(image_id))
            .set((
                images::status.eq(ImageStatus::Error.as_str()),
                images::metadata.eq(serde_json::json!({
                    "params": params,
                    "error": error.to_string(),
                    "error_code": error.code().code(),
                    "failed_at": Utc::now(),
                })),
            ))
            .execute(conn)?;

        tracing::warn!(image_id = %image_id, error = %error, "image enhancement failed");
        Ok(())
    })
}
