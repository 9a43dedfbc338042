//! Stripe Billing Portal

use std::sync::Arc;

use uuid::Uuid;

use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{HostedSession, PaymentGateway};
use crate::redirect::ReturnUrlPolicy;

/// Portal service for Stripe billing portal sessions
#[derive(Clone)]
pub struct PortalService {
    customers: CustomerService,
    gateway: Arc<dyn PaymentGateway>,
    return_urls: ReturnUrlPolicy,
}

impl PortalService {
    pub fn new(
        customers: CustomerService,
        gateway: Arc<dyn PaymentGateway>,
        return_urls: ReturnUrlPolicy,
    ) -> Self {
        Self {
            customers,
            gateway,
            return_urls,
        }
    }

    /// Create a billing portal session for a provider that already has a customer.
    ///
    /// Never creates a customer: providers that have not subscribed yet get
    /// [`BillingError::NoCustomer`].
    pub async fn create_portal_session(
        &self,
        provider_id: Uuid,
        return_url: &str,
    ) -> BillingResult<HostedSession> {
        let return_url = self.return_urls.validate(return_url)?;

        let customer_id = self
            .customers
            .customer_id(provider_id)
            .await?
            .ok_or(BillingError::NoCustomer)?;

        let session = self
            .gateway
            .create_portal_session(&customer_id, return_url.as_str())
            .await?;

        tracing::info!(
            provider_id = %provider_id,
            customer_id = %customer_id,
            "Created billing portal session"
        );

        Ok(session)
    }
}
