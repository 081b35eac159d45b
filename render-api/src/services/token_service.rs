use jsonwebtoken::{encode, EncodingKey, Header};

use render_shared::errors::AppError;
use render_shared::types::auth::{AuthToken, Claims};

use crate::models::User;

pub fn create_access_token(user: &User, secret: &str, ttl_secs: i64) -> Result<String, AppError> {
    let claims = Claims::new(user.id, user.email.clone(), user.role(), ttl_secs);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(format!("JWT encoding failed: {e}")))
}

pub fn issue_token(user: &User, secret: &str, ttl_secs: i64) -> Result<AuthToken, AppError> {
    let access_token = create_access_token(user, secret, ttl_secs)?;
    Ok(AuthToken::bearer(access_token, ttl_secs))
}
