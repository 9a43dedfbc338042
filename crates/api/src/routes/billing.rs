//! Billing routes: subscription checkout, billing portal, lead unlocks and the Stripe webhook

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Extension, Json,
};
use ndislink_billing::{
    BillingInterval, HostedSession, LeadUnlock, ProviderRecord, SubscriptionCheckout,
    WebhookOutcome,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub provider_id: Uuid,
    pub price_id: String,
    pub plan_name: String,
    /// "monthly" or "annual"; monthly when omitted
    #[serde(default)]
    pub billing_cycle: Option<String>,
    pub return_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePortalRequest {
    pub provider_id: Uuid,
    pub return_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockLeadRequest {
    pub provider_id: Uuid,
    pub lead_id: Uuid,
    pub return_url: String,
}

/// Hosted Stripe page the browser should be sent to
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub url: String,
}

impl From<HostedSession> for SessionResponse {
    fn from(session: HostedSession) -> Self {
        Self { url: session.url }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Load the provider and make sure the caller owns it.
async fn authorize_provider(
    state: &AppState,
    user: &AuthUser,
    provider_id: Uuid,
) -> ApiResult<ProviderRecord> {
    let provider = state
        .billing
        .store
        .get_provider(provider_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Provider not found".to_string()))?;

    if provider.owner_user_id != user.user_id {
        tracing::warn!(
            provider_id = %provider_id,
            user_id = %user.user_id,
            "User attempted billing action on a provider they do not own"
        );
        return Err(ApiError::Forbidden(
            "You do not have access to this provider".to_string(),
        ));
    }

    Ok(provider)
}

/// POST /create-checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<CreateCheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let req = json_body(body)?;
    authorize_provider(&state, &user, req.provider_id).await?;

    let billing_interval = match req.billing_cycle.as_deref() {
        None => BillingInterval::Monthly,
        Some(cycle) => BillingInterval::from_str(cycle).ok_or_else(|| {
            ApiError::BadRequest(format!("Invalid billing cycle: {}", cycle))
        })?,
    };

    let session = state
        .billing
        .checkout
        .create_subscription_checkout(SubscriptionCheckout {
            provider_id: req.provider_id,
            user_id: user.user_id,
            price_id: req.price_id,
            plan_name: req.plan_name,
            billing_interval,
            return_url: req.return_url,
        })
        .await?;

    Ok(Json(session.into()))
}

/// POST /create-portal
pub async fn create_portal(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<CreatePortalRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let req = json_body(body)?;
    authorize_provider(&state, &user, req.provider_id).await?;

    let session = state
        .billing
        .portal
        .create_portal_session(req.provider_id, &req.return_url)
        .await?;

    Ok(Json(session.into()))
}

/// POST /unlock-lead
pub async fn unlock_lead(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<UnlockLeadRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let req = json_body(body)?;
    authorize_provider(&state, &user, req.provider_id).await?;

    let session = state
        .billing
        .leads
        .create_unlock_session(LeadUnlock {
            provider_id: req.provider_id,
            lead_id: req.lead_id,
            user_id: user.user_id,
            return_url: req.return_url,
        })
        .await?;

    Ok(Json(session.into()))
}

/// POST /webhook
///
/// Takes the raw body: the signature covers the exact bytes Stripe sent.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing stripe-signature header".to_string()))?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;
    let event_id = event.id.clone();

    match state.billing.webhooks.handle_event(event).await {
        Ok(outcome) => {
            if outcome != WebhookOutcome::Processed {
                tracing::debug!(event_id = %event_id, outcome = ?outcome, "Webhook event skipped");
            }
            Ok(Json(WebhookAck { received: true }))
        }
        Err(e) => {
            tracing::error!(event_id = %event_id, error = %e, "Webhook processing failed");
            Err(ApiError::Internal(format!("Webhook processing failed: {}", e)))
        }
    }
}
