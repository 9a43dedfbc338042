//! Stripe Checkout sessions for provider subscriptions

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::PriceCatalog;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutKind, CheckoutRequest, HostedSession, PaymentGateway};
use crate::metadata;
use crate::redirect::{with_markers, ReturnUrlPolicy};
use crate::store::BillingStore;

/// Billing interval for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Annual,
}

impl BillingInterval {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Some(Self::Monthly),
            "annual" | "annually" | "yearly" | "year" => Some(Self::Annual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }
}

/// A tier change requested from the pricing page.
#[derive(Debug, Clone)]
pub struct SubscriptionCheckout {
    pub provider_id: Uuid,
    /// Authenticated user starting the checkout
    pub user_id: Uuid,
    /// Stripe price, already resolved by the caller from tier + cycle
    pub price_id: String,
    /// Free-text plan label; mapped to a tier when the webhook arrives
    pub plan_name: String,
    pub billing_interval: BillingInterval,
    pub return_url: String,
}

/// Checkout service for creating Stripe checkout sessions
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn BillingStore>,
    customers: CustomerService,
    gateway: Arc<dyn PaymentGateway>,
    prices: PriceCatalog,
    return_urls: ReturnUrlPolicy,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        customers: CustomerService,
        gateway: Arc<dyn PaymentGateway>,
        prices: PriceCatalog,
        return_urls: ReturnUrlPolicy,
    ) -> Self {
        Self {
            store,
            customers,
            gateway,
            prices,
            return_urls,
        }
    }

    /// Create a subscription-mode checkout session and return it.
    ///
    /// Nothing local changes here beyond the customer binding: the provider's
    /// tier is only written once Stripe confirms the purchase by webhook.
    /// Providers that already hold a subscription are refused with
    /// [`BillingError::SubscriptionExists`]; plan changes go through the portal.
    pub async fn create_subscription_checkout(
        &self,
        checkout: SubscriptionCheckout,
    ) -> BillingResult<HostedSession> {
        let price_id = checkout.price_id.trim();
        if price_id.is_empty() {
            return Err(BillingError::InvalidInput("priceId is required".to_string()));
        }
        if !self.prices.accepts(price_id) {
            return Err(BillingError::InvalidInput(format!(
                "Unknown price: {}",
                price_id
            )));
        }
        let return_url = self.return_urls.validate(&checkout.return_url)?;

        let current_subscription = self
            .store
            .get_billing(checkout.provider_id)
            .await?
            .and_then(|b| b.stripe_subscription_id);
        if let Some(subscription_id) = current_subscription {
            tracing::info!(
                provider_id = %checkout.provider_id,
                subscription_id = %subscription_id,
                "Provider already subscribed; refusing a second checkout"
            );
            return Err(BillingError::SubscriptionExists);
        }

        let customer_id = self
            .customers
            .bind_customer(checkout.provider_id, checkout.user_id)
            .await?;

        let success_url = with_markers(
            &return_url,
            &[("checkout", "success"), ("plan", checkout.plan_name.as_str())],
        );
        let cancel_url = with_markers(&return_url, &[("checkout", "cancelled")]);

        let mut meta = HashMap::new();
        meta.insert(
            metadata::PROVIDER_ID.to_string(),
            checkout.provider_id.to_string(),
        );
        meta.insert(metadata::PLAN_NAME.to_string(), checkout.plan_name.clone());
        meta.insert(
            metadata::BILLING_CYCLE.to_string(),
            checkout.billing_interval.as_str().to_string(),
        );

        let session = self
            .gateway
            .create_checkout_session(CheckoutRequest {
                customer_id,
                kind: CheckoutKind::Subscription {
                    price_id: price_id.to_string(),
                },
                success_url,
                cancel_url,
                metadata: meta,
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    provider_id = %checkout.provider_id,
                    error = %e,
                    "Stripe checkout session creation failed"
                );
            })?;

        tracing::info!(
            provider_id = %checkout.provider_id,
            session_id = %session.id,
            plan_name = %checkout.plan_name,
            billing_interval = ?checkout.billing_interval,
            "Created checkout session"
        );

        Ok(session)
    }
}
