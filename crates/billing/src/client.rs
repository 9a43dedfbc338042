//! Stripe client configuration

use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Default unlock fee for leads without an explicit `unlock_price`, in cents.
pub const DEFAULT_LEAD_UNLOCK_PRICE_CENTS: i64 = 2500;

/// Default webhook timestamp tolerance, matching Stripe's own client libraries.
pub const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Maximum age of a webhook signature timestamp, in seconds (0 disables the check)
    pub webhook_tolerance_secs: u64,
    /// Known subscription prices; empty means any price id is accepted
    pub price_catalog: PriceCatalog,
    /// Fallback unlock fee for leads without an explicit price
    pub lead_unlock_default_cents: i64,
    /// ISO currency code used for one-off lead unlock payments
    pub currency: String,
}

/// Stripe price IDs for the paid provider tiers.
/// Tier hierarchy: Starter (no price) → Professional → Premium
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    pub professional: Option<String>,
    pub professional_annual: Option<String>,
    pub premium: Option<String>,
    pub premium_annual: Option<String>,
}

impl PriceCatalog {
    fn entries(&self) -> impl Iterator<Item = &str> {
        [
            &self.professional,
            &self.professional_annual,
            &self.premium,
            &self.premium_annual,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Whether a caller-supplied price id may be used for a subscription checkout.
    pub fn accepts(&self, price_id: &str) -> bool {
        self.is_empty() || self.entries().any(|p| p == price_id)
    }
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let webhook_tolerance_secs = match std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS") {
            Ok(raw) => raw.parse().map_err(|_| {
                BillingError::Config(format!("STRIPE_WEBHOOK_TOLERANCE_SECS is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_WEBHOOK_TOLERANCE_SECS,
        };

        let lead_unlock_default_cents = match std::env::var("LEAD_UNLOCK_DEFAULT_PRICE_CENTS") {
            Ok(raw) => raw.parse().map_err(|_| {
                BillingError::Config(format!(
                    "LEAD_UNLOCK_DEFAULT_PRICE_CENTS is not a number: {raw}"
                ))
            })?,
            Err(_) => DEFAULT_LEAD_UNLOCK_PRICE_CENTS,
        };

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            webhook_tolerance_secs,
            price_catalog: PriceCatalog {
                professional: std::env::var("STRIPE_PRICE_PROFESSIONAL").ok(),
                professional_annual: std::env::var("STRIPE_PRICE_PROFESSIONAL_ANNUAL").ok(),
                premium: std::env::var("STRIPE_PRICE_PREMIUM").ok(),
                premium_annual: std::env::var("STRIPE_PRICE_PREMIUM_ANNUAL").ok(),
            },
            lead_unlock_default_cents,
            currency: std::env::var("BILLING_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "aud".to_string()),
        })
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(&config.secret_key),
        }
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}
