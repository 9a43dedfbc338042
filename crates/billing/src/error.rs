//! Billing errors

use uuid::Uuid;

/// Errors raised by the billing core.
///
/// Validation variants carry user-facing messages; the HTTP layer maps them to
/// 4xx responses. Downstream variants (Stripe, database) map to 500 and keep
/// the raw message for operators.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Billing configuration error: {0}")]
    Config(String),

    #[error("Provider {0} not found")]
    ProviderNotFound(Uuid),

    #[error("No billing account found for this provider. Subscribe to a plan first.")]
    NoCustomer,

    #[error("Lead not found")]
    LeadNotFound,

    #[error("Lead has already been processed")]
    LeadAlreadyProcessed,

    #[error("A checkout for this lead is already open. Complete it or try again once it expires.")]
    LeadCheckoutOpen,

    #[error("This provider already has a subscription. Change plans from the billing portal.")]
    SubscriptionExists,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Internal billing error: {0}")]
    Internal(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}
