use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const PRIVILEGED_ROLES: [&str; 2] = ["admin", "teacher"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    /// Subject as a user id. Tokens issued for non-uuid subjects cannot act on attempts.
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| Error::Unauthorized("Token subject is not a user id".to_string()))
    }

    pub fn is_privileged(&self) -> bool {
        let role = self.role.as_deref().unwrap_or_default();
        PRIVILEGED_ROLES.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

fn reject(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}

fn verify(req: &Request) -> std::result::Result<Claims, Response> {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Err(reject(StatusCode::UNAUTHORIZED, "missing_authorization"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(reject(StatusCode::UNAUTHORIZED, "bad_authorization"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(reject(StatusCode::UNAUTHORIZED, "unsupported_scheme"));
    };

    let config = crate::config::get_config();
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid_token"))
}

pub async fn require_bearer_auth(mut req: Request, next: Next) -> Response {
    match verify(&req) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(rejection) => rejection,
    }
}

pub async fn require_privileged(mut req: Request, next: Next) -> Response {
    match verify(&req) {
        Ok(claims) if claims.is_privileged() => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Ok(_) => reject(StatusCode::FORBIDDEN, "forbidden"),
        Err(rejection) => rejection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: Option<&str>) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: 0,
            role: role.map(str::to_string),
        }
    }

    #[test]
    fn roles_are_matched_case_insensitively() {
        assert!(claims("x", Some("Teacher")).is_privileged());
        assert!(claims("x", Some("admin")).is_privileged());
        assert!(!claims("x", Some("student")).is_privileged());
        assert!(!claims("x", None).is_privileged());
    }

    #[test]
    fn subject_must_be_a_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(claims(&id.to_string(), None).user_id().unwrap(), id);
        assert!(matches!(
            claims("alice", None).user_id(),
            Err(Error::Unauthorized(_))
        ));
    }
}
