use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::QuizError;
use crate::services::AppState;

/// Claims issued by the user directory. The service only validates them.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,
    pub username: String,
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Lecturer,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Lecturer => "lecturer",
            Role::Student => "student",
        }
    }
}

impl JwtClaims {
    pub fn new(user_id: &str, username: &str, role: Role, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            username: username.to_string(),
            role: role.as_str().to_string(),
            exp: (now + ttl_seconds) as usize,
            iat: now as usize,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role.as_str()
    }
}

/// Guard clause for handlers: passes if the caller holds one of `allowed`.
pub fn require_role(claims: &JwtClaims, allowed: &[Role]) -> Result<(), QuizError> {
    if allowed.iter().any(|role| claims.has_role(*role)) {
        return Ok(());
    }

    tracing::warn!(
        user_id = %claims.sub,
        role = %claims.role,
        "Access denied"
    );
    Err(QuizError::Forbidden {
        required: allowed
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
    })
}

#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
    ExpiredToken,
    MissingToken,
    InvalidSignature,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken => write!(f, "Invalid token"),
            AuthError::ExpiredToken => write!(f, "Token expired"),
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
        }
    }
}

impl std::error::Error for AuthError {}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Validates the bearer token and stores its claims in the request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            tracing::debug!("{}", AuthError::MissingToken);
            StatusCode::UNAUTHORIZED
        })?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!("Authenticated user: {} (role: {})", claims.sub, claims.role);

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_generation_and_validation() {
        let service = JwtService::new("test-secret");
        let claims = JwtClaims::new("user123", "alice", Role::Student, 3600);

        let token = service.generate_token(claims.clone()).unwrap();
        let validated = service.validate_token(&token).unwrap();

        assert_eq!(validated.sub, claims.sub);
        assert_eq!(validated.username, "alice");
        assert!(validated.has_role(Role::Student));
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let token = JwtService::new("one")
            .generate_token(JwtClaims::new("u", "u", Role::Lecturer, 3600))
            .unwrap();
        assert!(matches!(
            JwtService::new("two").validate_token(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let service = JwtService::new("secret");
        let token = service
            .generate_token(JwtClaims::new("u", "u", Role::Student, -3600))
            .unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn role_guard() {
        let student = JwtClaims::new("s", "s", Role::Student, 60);
        assert!(require_role(&student, &[Role::Student]).is_ok());
        let err = require_role(&student, &[Role::Lecturer]).unwrap_err();
        assert!(matches!(err, QuizError::Forbidden { .. }));
        assert!(err.to_string().contains("lecturer"));
    }
}
