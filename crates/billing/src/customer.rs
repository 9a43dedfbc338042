//! Provider to Stripe customer binding

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{NewCustomer, PaymentGateway};
use crate::metadata;
use crate::store::BillingStore;

/// How many times a caller that lost the billing-row claim re-reads the row
/// while the winner creates the customer.
const CLAIM_WAIT_ATTEMPTS: usize = 6;
const CLAIM_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Keeps exactly one Stripe customer mapped to each provider.
#[derive(Clone)]
pub struct CustomerService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CustomerService {
    pub fn new(store: Arc<dyn BillingStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Stored customer id for a provider, if any.
    pub async fn customer_id(&self, provider_id: Uuid) -> BillingResult<Option<String>> {
        Ok(self
            .store
            .get_billing(provider_id)
            .await?
            .and_then(|b| b.stripe_customer_id))
    }

    /// Return the provider's Stripe customer id, creating the customer on first use.
    ///
    /// The billing row is claimed before the customer is created so that
    /// concurrent first calls agree on one creator. Callers that lose the
    /// claim wait for the winner's id. If it never shows up they create a
    /// customer themselves; the stored id is first-write-wins, so every
    /// caller still returns the same id and any extra customer is orphaned.
    pub async fn bind_customer(&self, provider_id: Uuid, user_id: Uuid) -> BillingResult<String> {
        if let Some(customer_id) = self.customer_id(provider_id).await? {
            return Ok(customer_id);
        }

        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or(BillingError::ProviderNotFound(provider_id))?;

        if self.store.claim_billing_row(provider_id, user_id).await? {
            let created = self
                .create_customer(&provider.display_name, &provider.contact_email, provider_id, user_id)
                .await?;
            return self.store_customer(provider_id, user_id, &created).await;
        }

        match self.wait_for_claim_winner(provider_id).await {
            Ok(customer_id) => Ok(customer_id),
            Err(BillingError::NoCustomer) => {
                tracing::warn!(
                    provider_id = %provider_id,
                    "Billing row claimed but no customer appeared; creating one (may orphan a duplicate)"
                );
                let created = self
                    .create_customer(
                        &provider.display_name,
                        &provider.contact_email,
                        provider_id,
                        user_id,
                    )
                    .await?;
                self.store_customer(provider_id, user_id, &created).await
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for_claim_winner(&self, provider_id: Uuid) -> BillingResult<String> {
        let strategy = FixedInterval::new(CLAIM_WAIT_INTERVAL).take(CLAIM_WAIT_ATTEMPTS);

        Retry::start(strategy, || {
            let store = Arc::clone(&self.store);
            async move {
                store
                    .get_billing(provider_id)
                    .await?
                    .and_then(|b| b.stripe_customer_id)
                    .ok_or(BillingError::NoCustomer)
            }
        })
        .await
    }

    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        provider_id: Uuid,
        user_id: Uuid,
    ) -> BillingResult<String> {
        let mut meta = HashMap::new();
        meta.insert(metadata::PROVIDER_ID.to_string(), provider_id.to_string());
        meta.insert(metadata::USER_ID.to_string(), user_id.to_string());

        self.gateway
            .create_customer(NewCustomer {
                email: email.to_string(),
                name: name.to_string(),
                metadata: meta,
            })
            .await
    }

    async fn store_customer(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        created: &str,
    ) -> BillingResult<String> {
        let stored = self
            .store
            .set_customer_id_if_absent(provider_id, user_id, created)
            .await?;

        if stored != created {
            tracing::warn!(
                provider_id = %provider_id,
                orphaned_customer_id = %created,
                customer_id = %stored,
                "Provider already bound to another Stripe customer; new customer is orphaned"
            );
        } else {
            tracing::info!(
                provider_id = %provider_id,
                customer_id = %stored,
                "Created Stripe customer for provider"
            );
        }

        Ok(stored)
    }
}
