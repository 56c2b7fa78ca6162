//! Request authorization. Token issuance lives elsewhere; this only checks
//! a presented bearer token.

use axum::http::{header, HeaderMap};

pub trait Authorizer: Send + Sync {
    fn authorize(&self, headers: &HeaderMap, query_token: Option<&str>) -> bool;
}

/// Accepts requests carrying the configured token as `Authorization:
/// Bearer <token>` or an `access_token` parameter. With no token configured
/// every request is allowed.
pub struct TokenAuthorizer {
    token: Option<String>,
}

impl TokenAuthorizer {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(&self, headers: &HeaderMap, query_token: Option<&str>) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };

        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .or(query_token);

        presented.is_some_and(|t| t.trim() == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_open_when_no_token() {
        let auth = TokenAuthorizer::new(None);
        assert!(auth.authorize(&HeaderMap::new(), None));
    }

    #[test]
    fn test_bearer_and_query_token() {
        let auth = TokenAuthorizer::new(Some("t0ken".into()));

        let mut headers = HeaderMap::new();
        assert!(!auth.authorize(&headers, None));
        assert!(auth.authorize(&headers, Some("t0ken")));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t0ken"));
        assert!(auth.authorize(&headers, None));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(!auth.authorize(&headers, None));
    }
}
