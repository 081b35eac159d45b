use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use render_shared::errors::{on_unique_violation, AppError, AppResult, ErrorCode};
use render_shared::types::auth::UserRole;

use crate::models::{NewLoginEvent, NewUser, User};
use crate::schema::{login_events, users};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::internal(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::new(
            ErrorCode::PasswordTooWeak,
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must contain at least one number"));
    }
    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err(AppError::new(ErrorCode::PasswordTooWeak, "password must contain at least one letter"));
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Creates an account with the `user` role. The password must already have
/// passed [`validate_password`].
pub fn register_user(conn: &mut PgConnection, name: &str, email: &str, password: &str) -> AppResult<User> {
    let email = normalize_email(email);

    let exists: bool = diesel::select(diesel::dsl::exists(
        users::table.filter(users::email.eq(&email)),
    ))
    .get_result(conn)?;

    if exists {
        return Err(AppError::new(ErrorCode::EmailAlreadyExists, "email already registered"));
    }

    let new_user = NewUser {
        name: name.trim().to_string(),
        email,
        password_hash: hash_password(password)?,
        role: UserRole::User.as_str().to_string(),
    };

    // A concurrent registration with the same email loses on the unique index.
    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| on_unique_violation(e, ErrorCode::EmailAlreadyExists, "email already registered"))?;

    tracing::info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Checks credentials. Unknown email and wrong password are
/// indistinguishable to the caller.
pub fn authenticate(conn: &mut PgConnection, email: &str, password: &str) -> AppResult<User> {
    let user: Option<User> = users::table
        .filter(users::email.eq(normalize_email(email)))
        .select(User::as_select())
        .first(conn)
        .optional()?;

    let user = user.ok_or_else(|| AppError::new(ErrorCode::InvalidCredentials, "invalid email or password"))?;

    if !verify_password(password, &user.password_hash)? {
        tracing::info!(user_id = %user.id, "login rejected: wrong password");
        return Err(AppError::new(ErrorCode::InvalidCredentials, "invalid email or password"));
    }

    Ok(user)
}

pub fn record_login(conn: &mut PgConnection, user_id: Uuid, user_agent: Option<String>) -> AppResult<()> {
    diesel::insert_into(login_events::table)
        .values(&NewLoginEvent { user_id, user_agent })
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original() {
        let hash = hash_password("secret1").unwrap();
        assert_ne!(hash, "secret1");
        assert!(verify_password("secret1", &hash).unwrap());
        assert!(!verify_password("secret2", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash_password("secret1").unwrap(), hash_password("secret1").unwrap());
    }

    #[test]
    fn garbage_hash_is_an_internal_error() {
        let err = verify_password("secret1", "not-a-phc-string").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn password_policy() {
        assert!(validate_password("secret1").is_ok());
        assert!(validate_password("contraseña9").is_ok());
        assert_eq!(validate_password("ab1").unwrap_err().code(), ErrorCode::PasswordTooWeak);
        assert_eq!(validate_password("secretos").unwrap_err().code(), ErrorCode::PasswordTooWeak);
        assert_eq!(validate_password("12345678").unwrap_err().code(), ErrorCode::PasswordTooWeak);
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
