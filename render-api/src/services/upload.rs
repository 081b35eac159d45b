use axum::extract::Multipart;
use axum::http::StatusCode;
use std::path::Path;

use render_shared::errors::{AppError, AppResult, ErrorCode};

/// Accepted file kinds and size limit for one upload surface.
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    /// (MIME type, extensions that may carry it)
    pub allowed: &'static [(&'static str, &'static [&'static str])],
    pub max_bytes: usize,
}

pub const PHOTO_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/jpg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
];

pub const CHAT_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/jpg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("image/gif", &["gif"]),
];

impl UploadPolicy {
    pub fn photos(max_bytes: usize) -> Self {
        Self { allowed: PHOTO_TYPES, max_bytes }
    }

    pub fn chat(max_bytes: usize) -> Self {
        Self { allowed: CHAT_TYPES, max_bytes }
    }

    /// Checks type and size and returns the extension to store the file under.
    pub fn validate(&self, file_name: &str, content_type: &str, len: usize) -> AppResult<String> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let content_type = content_type.to_lowercase();

        let accepted = self
            .allowed
            .iter()
            .any(|(mime, exts)| *mime == content_type && exts.contains(&extension.as_str()));

        if !accepted {
            let names: Vec<&str> = self
                .allowed
                .iter()
                .flat_map(|(_, exts)| exts.iter().copied())
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            return Err(AppError::new(
                ErrorCode::UnsupportedImageType,
                format!("unsupported image format, accepted: {}", names.join(", ")),
            ));
        }

        if len == 0 {
            return Err(AppError::new(ErrorCode::ValidationError, "uploaded file is empty"));
        }
        if len > self.max_bytes {
            return Err(too_large(self.max_bytes));
        }

        Ok(extension)
    }

    /// Request body limit for routes under this policy: the file plus room
    /// for multipart framing.
    pub fn body_limit(&self) -> usize {
        self.max_bytes + 64 * 1024
    }
}

fn too_large(max_bytes: usize) -> AppError {
    AppError::new(
        ErrorCode::ImageTooLarge,
        format!("file exceeds the {} MB limit", max_bytes / (1024 * 1024)),
    )
}

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Reads the multipart field named `field_name` and validates it against
/// `policy`. Other fields are skipped.
pub async fn read_file_field(
    multipart: &mut Multipart,
    field_name: &str,
    policy: &UploadPolicy,
) -> AppResult<UploadedFile> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, policy))?
            .ok_or_else(|| AppError::new(ErrorCode::ValidationError, format!("missing file field '{field_name}'")))?;

        if field.name() != Some(field_name) {
            continue;
        }

        let file_name = sanitize_file_name(field.file_name().unwrap_or("upload"));
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = field.bytes().await.map_err(|e| multipart_error(e, policy))?;
        let extension = policy.validate(&file_name, &content_type, bytes.len())?;

        return Ok(UploadedFile {
            file_name,
            content_type,
            extension,
            bytes: bytes.to_vec(),
        });
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError, policy: &UploadPolicy) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return too_large(policy.max_bytes);
    }
    AppError::new(ErrorCode::ValidationError, format!("failed to read multipart body: {}", err.body_text()))
}

/// Keeps only the final path segment and replaces characters that are
/// awkward in file names.
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(120)
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
