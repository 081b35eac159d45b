use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, ErrorCode};

/// Roles in ascending order of privilege. `Ord` follows declaration order,
/// so `role >= UserRole::Admin` reads as "at least admin".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
    Superadmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
            UserRole::Superadmin => "superadmin",
        }
    }

    pub fn is_admin(&self) -> bool {
        *self >= UserRole::Admin
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            "superadmin" => Ok(UserRole::Superadmin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// JWT payload. The role is informational: authorization always uses the
/// role read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(user_id: Uuid, email: impl Into<String>, role: UserRole, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            email: email.into(),
            role,
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// Identity of the caller as currently stored, not as stated in the token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub token_id: Uuid,
}

impl AuthUser {
    pub fn require_role(&self, min: UserRole) -> Result<(), AppError> {
        if self.role < min {
            return Err(AppError::new(
                ErrorCode::Forbidden,
                format!("{min} access required"),
            ));
        }
        Ok(())
    }
}

/// Stored identity as returned by an [`AuthState`](crate::middleware::AuthState) lookup.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl AuthToken {
    pub fn bearer(access_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(role: UserRole) -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            name: "alice".into(),
            email: "alice@example.com".into(),
            role,
            token_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn roles_are_ordered_by_privilege() {
        assert!(UserRole::User < UserRole::Admin);
        assert!(UserRole::Admin < UserRole::Superadmin);
        assert!(UserRole::Superadmin.is_admin());
        assert!(!UserRole::User.is_admin());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [UserRole::User, UserRole::Admin, UserRole::Superadmin] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("moderator".parse::<UserRole>().is_err());
        assert_eq!("ADMIN".parse::<UserRole>().unwrap(), UserRole::Admin);
    }

    #[test]
    fn require_role_rejects_lower_roles() {
        assert!(user_with(UserRole::User).require_role(UserRole::Admin).is_err());
        assert!(user_with(UserRole::Admin).require_role(UserRole::Admin).is_ok());
        assert!(user_with(UserRole::Superadmin).require_role(UserRole::Admin).is_ok());
        assert!(user_with(UserRole::Admin).require_role(UserRole::Superadmin).is_err());
    }

    #[test]
    fn claims_expire_after_duration() {
        let fresh = Claims::new(Uuid::new_v4(), "a@b.c", UserRole::User, 3600);
        assert!(!fresh.is_expired());
        assert_eq!(fresh.exp - fresh.iat, 3600);
        let stale = Claims::new(Uuid::new_v4(), "a@b.c", UserRole::User, -10);
        assert!(stale.is_expired());
    }
}
