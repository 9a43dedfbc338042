//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Missing and malformed Authorization headers
//! - Valid, expired and foreign tokens
//! - AuthUser propagation to handlers

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Request, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::super::jwt::test_tokens::{token_for, token_with, TEST_SECRET};
    use super::super::jwt::{JwtManager, SUPABASE_AUDIENCE};
    use super::super::middleware::*;

    async fn whoami(Extension(user): Extension<AuthUser>) -> String {
        user.user_id.to_string()
    }

    fn app() -> Router {
        let auth_state = AuthState {
            jwt_manager: JwtManager::new(TEST_SECRET),
        };
        Router::new()
            .route("/me", get(whoami))
            .layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    async fn call(authorization: Option<String>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/me");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let (status, body) = call(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("\"error\""));
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_unauthorized() {
        let token = token_for(Uuid::new_v4());
        let (status, _) = call(Some(format!("Basic {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_foreign_token_is_unauthorized() {
        let token = token_with("someone-elses-secret", Uuid::new_v4(), SUPABASE_AUDIENCE, 3600);
        let (status, _) = call(Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let token = token_with(TEST_SECRET, Uuid::new_v4(), SUPABASE_AUDIENCE, -120);
        let (status, _) = call(Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler_with_user() {
        let user_id = Uuid::new_v4();
        let (status, body) = call(Some(format!("Bearer {}", token_for(user_id)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, user_id.to_string());
    }
}
