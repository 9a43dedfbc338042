//! API error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ndislink_billing::BillingError;
use serde_json::json;

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Billing(e) => match e {
                BillingError::NoCustomer
                | BillingError::LeadAlreadyProcessed
                | BillingError::LeadCheckoutOpen
                | BillingError::SubscriptionExists
                | BillingError::InvalidInput(_)
                | BillingError::WebhookSignatureInvalid
                | BillingError::WebhookPayloadInvalid(_) => StatusCode::BAD_REQUEST,
                BillingError::LeadNotFound | BillingError::ProviderNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                BillingError::StripeApi(_)
                | BillingError::Database(_)
                | BillingError::Config(_)
                | BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = ?self, "Internal API error");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_billing_error_status_mapping() {
        let cases = [
            (BillingError::NoCustomer, StatusCode::BAD_REQUEST),
            (BillingError::LeadAlreadyProcessed, StatusCode::BAD_REQUEST),
            (BillingError::LeadCheckoutOpen, StatusCode::BAD_REQUEST),
            (BillingError::SubscriptionExists, StatusCode::BAD_REQUEST),
            (BillingError::WebhookSignatureInvalid, StatusCode::BAD_REQUEST),
            (BillingError::LeadNotFound, StatusCode::NOT_FOUND),
            (BillingError::ProviderNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (BillingError::StripeApi("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (BillingError::Database("gone".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_billing_message_passes_through() {
        let err = ApiError::from(BillingError::NoCustomer);
        assert_eq!(
            err.to_string(),
            "No billing account found for this provider. Subscribe to a plan first."
        );
    }
}
