// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! NDISLink Billing Module
//!
//! Stripe integration for the provider marketplace.
//!
//! ## Features
//!
//! - **Tiers**: Starter, Professional and Premium provider plans; Premium carries the verified badge
//! - **Customers**: One Stripe customer per provider, created on first purchase
//! - **Checkout**: Subscription checkout sessions and the Stripe billing portal
//! - **Lead Unlocks**: One-off payments for individual leads, with a reservation while checkout is open
//! - **Webhooks**: Signature verification, dedup ledger and tier/lead synchronisation
//! - **Invariants**: Read-only consistency checks for operators

pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod gateway;
pub mod invariants;
pub mod lead_unlock;
pub mod metadata;
pub mod portal;
pub mod redirect;
pub mod signature;
pub mod store;
pub mod tier;
pub mod webhook_event;
pub mod webhooks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;


use std::sync::Arc;

use sqlx::PgPool;

// Checkout
pub use checkout::{BillingInterval, CheckoutService, SubscriptionCheckout};

// Client
pub use client::{PriceCatalog, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{HostedSession, PaymentGateway};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Lead unlocks
pub use lead_unlock::{LeadUnlock, LeadUnlockService, ReservationSweeper};

// Portal
pub use portal::PortalService;

// Redirects
pub use redirect::ReturnUrlPolicy;

// Store
pub use store::{BillingStore, LeadStatus, PgBillingStore, ProviderRecord};

// Tier mapping
pub use tier::tier_from_plan_label;

// Webhooks
pub use signature::verify_signature;
pub use webhook_event::{WebhookEvent, WebhookEventKind};
pub use webhooks::{WebhookHandler, WebhookOutcome};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub store: Arc<dyn BillingStore>,
    pub customers: CustomerService,
    pub checkout: CheckoutService,
    pub portal: PortalService,
    pub leads: LeadUnlockService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a Postgres and Stripe backed billing service from environment variables
    pub fn from_env(pool: PgPool, return_urls: ReturnUrlPolicy) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        let store = Arc::new(PgBillingStore::new(pool));
        let gateway = Arc::new(StripeClient::new(&config));

        Ok(Self::new(store, gateway, &config, return_urls))
    }

    /// Create a billing service over explicit store and gateway implementations
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: &StripeConfig,
        return_urls: ReturnUrlPolicy,
    ) -> Self {
        let customers = CustomerService::new(store.clone(), gateway.clone());

        Self {
            checkout: CheckoutService::new(
                store.clone(),
                customers.clone(),
                gateway.clone(),
                config.price_catalog.clone(),
                return_urls.clone(),
            ),
            portal: PortalService::new(customers.clone(), gateway.clone(), return_urls.clone()),
            leads: LeadUnlockService::new(
                store.clone(),
                customers.clone(),
                gateway,
                return_urls,
                config.lead_unlock_default_cents,
                config.currency.clone(),
            ),
            webhooks: WebhookHandler::new(
                store.clone(),
                config.webhook_secret.clone(),
                config.webhook_tolerance_secs,
            ),
            customers,
            store,
        }
    }
}
