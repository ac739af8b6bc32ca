//! HTTP basic authentication for status views and operator actions.

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sitehook_config::BasicAuth;

use crate::error::ApiError;

/// Check the `Authorization` header against the configured credentials.
/// Passes when no credentials are configured.
pub fn require_basic_auth(headers: &HeaderMap, expected: Option<&BasicAuth>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let Some((user, password)) = credentials(headers) else {
        return Err(ApiError::Unauthorized);
    };

    if constant_time_eq(&user, &expected.user) & constant_time_eq(&password, &expected.password) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Decode `Authorization: Basic <base64(user:password)>`.
fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Compare two strings without leaking where they differ. Both sides are
/// reduced to fixed-size MACs first, so lengths do not leak either.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let key = b"sitehook-basic-auth";
    let (Ok(mut left), Ok(mut right)) = (
        Hmac::<Sha256>::new_from_slice(key),
        Hmac::<Sha256>::new_from_slice(key),
    ) else {
        return false;
    };
    left.update(a.as_bytes());
    right.update(b.as_bytes());
    left.verify_slice(&right.finalize().into_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth() -> BasicAuth {
        BasicAuth {
            user: "admin".to_string(),
            password: "s3cret".to_string(),
        }
    }

    fn headers(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = STANDARD.encode(format!("{}:{}", user, password));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_no_credentials_configured() {
        assert!(require_basic_auth(&HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn test_valid_credentials() {
        assert!(require_basic_auth(&headers("admin", "s3cret"), Some(&auth())).is_ok());
    }

    #[test]
    fn test_password_may_contain_colon() {
        let auth = BasicAuth {
            user: "admin".to_string(),
            password: "a:b".to_string(),
        };
        assert!(require_basic_auth(&headers("admin", "a:b"), Some(&auth)).is_ok());
    }

    #[test]
    fn test_rejected_credentials() {
        assert!(matches!(
            require_basic_auth(&headers("admin", "wrong"), Some(&auth())),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            require_basic_auth(&HeaderMap::new(), Some(&auth())),
            Err(ApiError::Unauthorized)
        ));

        let mut garbage = HeaderMap::new();
        garbage.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(require_basic_auth(&garbage, Some(&auth())).is_err());
    }
}
