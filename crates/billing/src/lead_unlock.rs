//! Pay-per-lead unlock checkout and reservation handling

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutKind, CheckoutRequest, HostedSession, PaymentGateway};
use crate::metadata;
use crate::redirect::{with_markers, ReturnUrlPolicy};
use crate::store::{BillingStore, LeadRecord, LeadStatus};

/// How long an unlock checkout holds the lead in `pending`.
///
/// The reservation end is also the Stripe session expiry. Stripe rejects
/// expiries less than 30 minutes after the session is created, and the
/// deadline is computed before the request is sent, hence the extra minute.
pub const RESERVATION_WINDOW: time::Duration = time::Duration::minutes(31);

/// A provider asking to pay for one lead.
#[derive(Debug, Clone)]
pub struct LeadUnlock {
    pub provider_id: Uuid,
    pub lead_id: Uuid,
    pub user_id: Uuid,
    pub return_url: String,
}

#[derive(Clone)]
pub struct LeadUnlockService {
    store: Arc<dyn BillingStore>,
    customers: CustomerService,
    gateway: Arc<dyn PaymentGateway>,
    return_urls: ReturnUrlPolicy,
    default_price_cents: i64,
    currency: String,
}

impl LeadUnlockService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        customers: CustomerService,
        gateway: Arc<dyn PaymentGateway>,
        return_urls: ReturnUrlPolicy,
        default_price_cents: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            customers,
            gateway,
            return_urls,
            default_price_cents,
            currency: currency.into(),
        }
    }

    /// Reserve the lead and open a one-off payment checkout for it.
    ///
    /// The lead moves `new -> pending` before any Stripe call, so two
    /// concurrent requests cannot both get a session. If the customer or
    /// session cannot be created the reservation is released again. The lead
    /// only becomes `unlocked` when the payment webhook arrives.
    pub async fn create_unlock_session(&self, unlock: LeadUnlock) -> BillingResult<HostedSession> {
        let return_url = self.return_urls.validate(&unlock.return_url)?;

        let lead = self
            .store
            .get_lead(unlock.lead_id, unlock.provider_id)
            .await?
            .ok_or(BillingError::LeadNotFound)?;

        match lead.status {
            LeadStatus::New => {}
            LeadStatus::Pending => {
                tracing::debug!(
                    lead_id = %lead.id,
                    reserved_until = ?lead.reserved_until,
                    "Unlock requested while a checkout for the lead is open"
                );
                return Err(BillingError::LeadCheckoutOpen);
            }
            _ => {
                tracing::debug!(
                    lead_id = %lead.id,
                    status = %lead.status,
                    "Unlock requested for lead that is not new"
                );
                return Err(BillingError::LeadAlreadyProcessed);
            }
        }

        let reserved_until = OffsetDateTime::now_utc() + RESERVATION_WINDOW;
        if !self
            .store
            .reserve_lead(lead.id, unlock.provider_id, reserved_until)
            .await?
        {
            tracing::info!(lead_id = %lead.id, "Lost lead reservation race");
            return Err(BillingError::LeadCheckoutOpen);
        }

        let amount_cents = lead.unlock_price.unwrap_or(self.default_price_cents);
        let result = self
            .open_checkout(&unlock, &lead, &return_url, amount_cents, reserved_until)
            .await;

        match result {
            Ok(session) => {
                tracing::info!(
                    provider_id = %unlock.provider_id,
                    lead_id = %lead.id,
                    session_id = %session.id,
                    amount_cents,
                    "Created lead unlock checkout session"
                );
                Ok(session)
            }
            Err(e) => {
                tracing::error!(
                    provider_id = %unlock.provider_id,
                    lead_id = %lead.id,
                    error = %e,
                    "Lead unlock checkout failed; releasing reservation"
                );
                if let Err(release_err) = self.store.release_lead(lead.id, unlock.provider_id).await {
                    tracing::error!(
                        lead_id = %lead.id,
                        error = %release_err,
                        "Failed to release lead reservation; sweeper will reclaim it"
                    );
                }
                Err(e)
            }
        }
    }

    async fn open_checkout(
        &self,
        unlock: &LeadUnlock,
        lead: &LeadRecord,
        return_url: &Url,
        amount_cents: i64,
        reserved_until: OffsetDateTime,
    ) -> BillingResult<HostedSession> {
        let customer_id = self
            .customers
            .bind_customer(unlock.provider_id, unlock.user_id)
            .await?;

        let lead_id = lead.id.to_string();
        let mut meta = HashMap::new();
        meta.insert(metadata::LEAD_ID.to_string(), lead_id.clone());
        meta.insert(
            metadata::PROVIDER_ID.to_string(),
            unlock.provider_id.to_string(),
        );
        meta.insert(
            metadata::CHECKOUT_TYPE.to_string(),
            metadata::LEAD_UNLOCK.to_string(),
        );

        self.gateway
            .create_checkout_session(CheckoutRequest {
                customer_id,
                kind: CheckoutKind::Payment {
                    amount_cents,
                    currency: self.currency.clone(),
                    product_name: format!("Lead unlock: {}", lead.category),
                    expires_at: Some(reserved_until.unix_timestamp()),
                },
                success_url: with_markers(
                    return_url,
                    &[("checkout", "success"), ("lead", lead_id.as_str())],
                ),
                cancel_url: with_markers(return_url, &[("checkout", "cancelled")]),
                metadata: meta,
            })
            .await
    }
}

/// Releases reservations whose checkout closed without an expiry webhook.
#[derive(Clone)]
pub struct ReservationSweeper {
    store: Arc<dyn BillingStore>,
}

impl ReservationSweeper {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Return every reservation whose checkout window ended before `now` to `new`.
    pub async fn release_expired(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let released = self.store.release_expired_reservations(now).await?;
        if released > 0 {
            tracing::info!(released, "Released expired lead reservations");
        } else {
            tracing::debug!("No expired lead reservations");
        }
        Ok(released)
    }
}
