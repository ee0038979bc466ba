use super::rest::ApiError;
use super::ApiState;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::debug;

/// Proof that the request carried the configured bearer secret
pub struct Authorized;

#[axum::async_trait]
impl FromRequestParts<ApiState> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match extract_bearer_token(header_value) {
            Some(token) if token == &*state.secret => Ok(Authorized),
            Some(_) => {
                debug!(path = %parts.uri.path(), "Rejected request with wrong bearer token");
                Err(ApiError::Unauthorized)
            }
            None => {
                debug!(path = %parts.uri.path(), "Rejected request without bearer token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header.and_then(|header| header.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer_token(Some("Bearer ")), Some(""));
        assert_eq!(extract_bearer_token(Some("Basic abc")), None);
        assert_eq!(extract_bearer_token(Some("bearer abc")), None);
        assert_eq!(extract_bearer_token(None), None);
    }
}
