use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use render_shared::clients::db::checkout;
use render_shared::clients::enhancer::{EnhanceMode, EnhanceParams, DEFAULT_MODEL};
use render_shared::clients::storage::StorageCategory;
use render_shared::errors::AppResult;
use render_shared::types::auth::AuthUser;
use render_shared::types::ApiResponse;

use crate::models::Image;
use crate::services::image_service::{self, EnhancementSource, ImageView};
use crate::services::upload::read_file_field;
use crate::AppState;

// --- POST /images/upload ---

pub async fn upload_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<ImageView>>)> {
    let file = read_file_field(&mut multipart, "image", &state.image_policy()).await?;
    let stored = state
        .storage
        .save(StorageCategory::Images, &file.extension, &file.bytes)
        .await?;

    let mut conn = checkout(&state.db)?;
    let image = match image_service::create_image(
        &mut conn,
        user.id,
        &file.file_name,
        &file.content_type,
        &stored,
        None,
    ) {
        Ok(image) => image,
        Err(e) => {
            drop(conn);
            state.storage.delete_best_effort(&stored.public_url).await;
            return Err(e);
        }
    };

    counter!("render_images_uploaded_total").increment(1);
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(ImageView::new(image, None), "image uploaded")),
    ))
}

// --- GET /images ---

pub async fn list_images(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ImageView>>>> {
    let mut conn = checkout(&state.db)?;
    let images = image_service::list_images(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(images)))
}

// --- GET /images/models ---

pub async fn list_models(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let models = state.enhancer.models().await?;
    Ok(Json(ApiResponse::ok(models)))
}

// --- GET /images/:id/results ---

pub async fn get_results(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ImageView>>> {
    let mut conn = checkout(&state.db)?;
    let view = image_service::get_result(&mut conn, image_id, user.id)?;
    Ok(Json(ApiResponse::ok(view)))
}

// --- DELETE /images/:id ---

#[derive(Debug, Serialize)]
pub struct DeletedImage {
    pub id: Uuid,
}

pub async fn delete_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<DeletedImage>>> {
    let paths = {
        let mut conn = checkout(&state.db)?;
        image_service::delete_image(&mut conn, image_id, user.id)?
    };

    for path in &paths {
        state.storage.delete_best_effort(path).await;
    }

    Ok(Json(ApiResponse::ok_with_message(DeletedImage { id: image_id }, "image deleted")))
}

// --- POST /images/:id/enhance ---

#[derive(Debug, Default, Deserialize)]
pub struct EnhanceRequest {
    #[serde(alias = "model")]
    pub model_name: Option<String>,
    #[serde(default)]
    pub tta_mode: bool,
    #[serde(default)]
    pub tilesize: u32,
}

impl EnhanceRequest {
    pub fn into_params(self) -> EnhanceParams {
        EnhanceParams {
            model_name: model_or_default(self.model_name),
            mode: EnhanceMode::SuperResolution { tta_mode: self.tta_mode, tilesize: self.tilesize },
        }
    }
}

pub async fn enhance_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<Uuid>,
    body: Option<Json<EnhanceRequest>>,
) -> AppResult<Json<ApiResponse<ImageView>>> {
    let params = body.map(|Json(b)| b).unwrap_or_default().into_params();
    let view = run_enhancement(&state, user.id, image_id, params).await?;
    Ok(Json(ApiResponse::ok_with_message(view, "image enhanced")))
}

// --- POST /images/:id/enhance-combined ---

#[derive(Debug, Default, Deserialize)]
pub struct CombinedEnhanceRequest {
    #[serde(alias = "model")]
    pub model_name: Option<String>,
    #[serde(default = "default_low_light")]
    pub enhance_low_light: bool,
}

fn default_low_light() -> bool {
    true
}

impl CombinedEnhanceRequest {
    pub fn into_params(self) -> EnhanceParams {
        EnhanceParams {
            model_name: model_or_default(self.model_name),
            mode: EnhanceMode::Combined { enhance_low_light: self.enhance_low_light },
        }
    }
}

pub async fn enhance_image_combined(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(image_id): Path<Uuid>,
    body: Option<Json<CombinedEnhanceRequest>>,
) -> AppResult<Json<ApiResponse<ImageView>>> {
    let params = body
        .map(|Json(b)| b)
        .unwrap_or(CombinedEnhanceRequest { model_name: None, enhance_low_light: true })
        .into_params();
    let view = run_enhancement(&state, user.id, image_id, params).await?;
    Ok(Json(ApiResponse::ok_with_message(view, "image enhanced")))
}

fn model_or_default(model: Option<String>) -> String {
    model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Extension for the enhanced file: what the enhancer says it returned,
/// falling back to the source file's own extension.
fn output_extension(content_type: Option<&str>, source_path: &str) -> String {
    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("image/png") => "png".to_string(),
        Some("image/jpeg") | Some("image/jpg") => "jpg".to_string(),
        _ => std::path::Path::new(source_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "png".to_string()),
    }
}

/// Resolves which image gets enhanced. A processed image is never
/// overwritten: its result is copied into a new image chained to it.
async fn enhancement_target(state: &AppState, owner: Uuid, image_id: Uuid) -> AppResult<Image> {
    let source = {
        let mut conn = checkout(&state.db)?;
        image_service::prepare_enhancement(&mut conn, image_id, owner)?
    };

    match source {
        EnhancementSource::Direct(image) => Ok(image),
        EnhancementSource::Chain { parent, result_path } => {
            let copied = state.storage.copy(&result_path, StorageCategory::Images).await?;
            let created = {
                let mut conn = checkout(&state.db)?;
                image_service::create_chained_image(&mut conn, &parent, &copied)
            };
            match created {
                Ok(image) => {
                    tracing::info!(parent = %parent.id, image_id = %image.id, "chained image created for re-enhancement");
                    Ok(image)
                }
                Err(e) => {
                    state.storage.delete_best_effort(&copied.public_url).await;
                    Err(e)
                }
            }
        }
    }
}

/// Any failure after the target is resolved leaves the image in `error`
/// so it can be retried.
async fn run_enhancement(
    state: &AppState,
    owner: Uuid,
    image_id: Uuid,
    params: EnhanceParams,
) -> AppResult<ImageView> {
    let target = enhancement_target(state, owner, image_id).await?;

    match enhance_target(state, &target, &params).await {
        Ok(view) => {
            counter!("render_enhancements_total", "outcome" => "success").increment(1);
            Ok(view)
        }
        Err(err) => {
            counter!("render_enhancements_total", "outcome" => "failure").increment(1);
            let recorded = checkout(&state.db)
                .and_then(|mut conn| image_service::record_failure(&mut conn, target.id, &params, &err));
            if let Err(record_err) = recorded {
                tracing::error!(image_id = %target.id, error = %record_err, "failed to record enhancement failure");
            }
            Err(err)
        }
    }
}

/// The database connection is released while the enhancer runs so a slow
/// enhancement does not pin a pool slot.
async fn enhance_target(state: &AppState, target: &Image, params: &EnhanceParams) -> AppResult<ImageView> {
    let bytes = state.storage.read(&target.original_path).await?;
    let enhanced = state
        .enhancer
        .enhance(&target.file_name, &target.content_type, bytes, params)
        .await?;

    let extension = output_extension(enhanced.content_type.as_deref(), &target.original_path);
    let stored = state
        .storage
        .save(StorageCategory::Enhanced, &extension, &enhanced.bytes)
        .await?;

    let recorded = checkout(&state.db)
        .and_then(|mut conn| image_service::record_success(&mut conn, target.id, &stored, params, &enhanced.report));
    if recorded.is_err() {
        state.storage.delete_best_effort(&stored.public_url).await;
    }
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhance_request_defaults() {
        let params = EnhanceRequest::default().into_params();
        assert_eq!(params, EnhanceParams::default());
    }

    #[test]
    fn enhance_request_reads_client_fields() {
        let req: EnhanceRequest =
            serde_json::from_value(serde_json::json!({ "model": "realesrgan-x4plus-anime", "tta_mode": true, "tilesize": 256 }))
                .unwrap();
        let params = req.into_params();
        assert_eq!(params.model_name, "realesrgan-x4plus-anime");
        assert_eq!(params.mode, EnhanceMode::SuperResolution { tta_mode: true, tilesize: 256 });
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        assert_eq!(model_or_default(Some("  ".into())), DEFAULT_MODEL);
        assert_eq!(model_or_default(None), DEFAULT_MODEL);
    }

    #[test]
    fn combined_request_enables_low_light_by_default() {
        let req: CombinedEnhanceRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(req.into_params().mode, EnhanceMode::Combined { enhance_low_light: true });
    }

    #[test]
    fn output_extension_follows_content_type() {
        assert_eq!(output_extension(Some("image/png"), "/uploads/images/a.jpg"), "png");
        assert_eq!(output_extension(Some("image/jpeg; charset=binary"), "/uploads/images/a.png"), "jpg");
        assert_eq!(output_extension(None, "/uploads/images/a.JPEG"), "jpeg");
        assert_eq!(output_extension(Some("application/octet-stream"), "noext"), "png");
    }
}
