//! In-memory implementations of the billing seams.
//!
//! Compiled for this crate's tests and for downstream crates through the
//! `test-utils` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ndislink_shared::ProviderTier;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutRequest, HostedSession, NewCustomer, PaymentGateway};
use crate::store::{
    BillingStore, EventClaim, LeadRecord, LeadStatus, ProviderBillingRecord, ProviderRecord,
};

#[derive(Default)]
struct StoreState {
    providers: HashMap<Uuid, ProviderRecord>,
    billing: HashMap<Uuid, ProviderBillingRecord>,
    leads: HashMap<Uuid, LeadRecord>,
    /// event id -> (processing_result, error_message)
    webhook_events: HashMap<String, (String, Option<String>)>,
}

// ============================================================================
// InMemoryBillingStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryBillingStore {
    state: Mutex<StoreState>,
    fail_tier_writes: AtomicBool,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> BillingResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| BillingError::Internal("in-memory store poisoned".to_string()))
    }

    /// Make subsequent tier writes fail with a database error.
    pub fn fail_tier_writes(&self, fail: bool) {
        self.fail_tier_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a starter-tier provider and return its id.
    pub fn add_provider(&self, owner_user_id: Uuid, display_name: &str, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.insert_provider(ProviderRecord {
            id,
            owner_user_id,
            display_name: display_name.to_string(),
            contact_email: email.to_string(),
            tier: ProviderTier::Starter,
            verified: false,
        });
        id
    }

    pub fn insert_provider(&self, provider: ProviderRecord) {
        if let Ok(mut state) = self.state() {
            state.providers.insert(provider.id, provider);
        }
    }

    pub fn insert_billing(&self, billing: ProviderBillingRecord) {
        if let Ok(mut state) = self.state() {
            state.billing.insert(billing.provider_id, billing);
        }
    }

    /// Seed a lead with the given status and return its id.
    pub fn add_lead(
        &self,
        provider_id: Uuid,
        category: &str,
        unlock_price: Option<i64>,
        status: LeadStatus,
    ) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut state) = self.state() {
            state.leads.insert(
                id,
                LeadRecord {
                    id,
                    provider_id,
                    category: category.to_string(),
                    unlock_price,
                    status,
                    reserved_until: None,
                    unlocked_at: None,
                },
            );
        }
        id
    }

    pub fn provider(&self, provider_id: Uuid) -> Option<ProviderRecord> {
        self.state().ok()?.providers.get(&provider_id).cloned()
    }

    pub fn billing(&self, provider_id: Uuid) -> Option<ProviderBillingRecord> {
        self.state().ok()?.billing.get(&provider_id).cloned()
    }

    pub fn lead(&self, lead_id: Uuid) -> Option<LeadRecord> {
        self.state().ok()?.leads.get(&lead_id).cloned()
    }

    pub fn all_providers(&self) -> Vec<ProviderRecord> {
        self.state()
            .map(|s| s.providers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn webhook_event_result(&self, event_id: &str) -> Option<(String, Option<String>)> {
        self.state().ok()?.webhook_events.get(event_id).cloned()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn get_provider(&self, provider_id: Uuid) -> BillingResult<Option<ProviderRecord>> {
        Ok(self.state()?.providers.get(&provider_id).cloned())
    }

    async fn get_billing(
        &self,
        provider_id: Uuid,
    ) -> BillingResult<Option<ProviderBillingRecord>> {
        Ok(self.state()?.billing.get(&provider_id).cloned())
    }

    async fn claim_billing_row(&self, provider_id: Uuid, user_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state()?;
        if state.billing.contains_key(&provider_id) {
            return Ok(false);
        }
        state.billing.insert(
            provider_id,
            ProviderBillingRecord {
                provider_id,
                user_id,
                stripe_customer_id: None,
                stripe_subscription_id: None,
            },
        );
        Ok(true)
    }

    async fn set_customer_id_if_absent(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<String> {
        let mut state = self.state()?;
        let row = state
            .billing
            .entry(provider_id)
            .or_insert_with(|| ProviderBillingRecord {
                provider_id,
                user_id,
                stripe_customer_id: None,
                stripe_subscription_id: None,
            });
        let stored = row
            .stripe_customer_id
            .get_or_insert_with(|| customer_id.to_string());
        Ok(stored.clone())
    }

    async fn apply_tier(&self, provider_id: Uuid, tier: ProviderTier) -> BillingResult<()> {
        if self.fail_tier_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("connection reset (test)".to_string()));
        }
        let mut state = self.state()?;
        let provider = state
            .providers
            .get_mut(&provider_id)
            .ok_or(BillingError::ProviderNotFound(provider_id))?;
        provider.tier = tier;
        provider.verified = tier.grants_verified();
        Ok(())
    }

    async fn record_subscription(
        &self,
        provider_id: Uuid,
        subscription_id: &str,
        customer_id: Option<&str>,
    ) -> BillingResult<()> {
        let mut state = self.state()?;
        let owner = state
            .providers
            .get(&provider_id)
            .map(|p| p.owner_user_id)
            .ok_or(BillingError::ProviderNotFound(provider_id))?;
        let row = state
            .billing
            .entry(provider_id)
            .or_insert_with(|| ProviderBillingRecord {
                provider_id,
                user_id: owner,
                stripe_customer_id: None,
                stripe_subscription_id: None,
            });
        row.stripe_subscription_id = Some(subscription_id.to_string());
        if row.stripe_customer_id.is_none() {
            row.stripe_customer_id = customer_id.map(str::to_string);
        }
        Ok(())
    }

    async fn clear_subscription(&self, provider_id: Uuid) -> BillingResult<()> {
        if let Some(row) = self.state()?.billing.get_mut(&provider_id) {
            row.stripe_subscription_id = None;
        }
        Ok(())
    }

    async fn get_lead(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
    ) -> BillingResult<Option<LeadRecord>> {
        Ok(self
            .state()?
            .leads
            .get(&lead_id)
            .filter(|l| l.provider_id == provider_id)
            .cloned())
    }

    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
        reserved_until: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state()?;
        match state.leads.get_mut(&lead_id) {
            Some(lead) if lead.provider_id == provider_id && lead.status == LeadStatus::New => {
                lead.status = LeadStatus::Pending;
                lead.reserved_until = Some(reserved_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lead(&self, lead_id: Uuid, provider_id: Uuid) -> BillingResult<bool> {
        let mut state = self.state()?;
        match state.leads.get_mut(&lead_id) {
            Some(lead) if lead.provider_id == provider_id && lead.status == LeadStatus::Pending => {
                lead.status = LeadStatus::New;
                lead.reserved_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_lead_unlocked(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
        unlocked_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state()?;
        match state.leads.get_mut(&lead_id) {
            Some(lead)
                if lead.provider_id == provider_id
                    && matches!(lead.status, LeadStatus::New | LeadStatus::Pending) =>
            {
                lead.status = LeadStatus::Unlocked;
                lead.unlocked_at = Some(unlocked_at);
                lead.reserved_until = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_expired_reservations(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let mut state = self.state()?;
        let mut released = 0;
        for lead in state.leads.values_mut() {
            let expired = lead.reserved_until.is_some_and(|until| until < now);
            if lead.status == LeadStatus::Pending && expired {
                lead.status = LeadStatus::New;
                lead.reserved_until = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        _event_type: &str,
    ) -> BillingResult<EventClaim> {
        let mut state = self.state()?;
        let claim = match state.webhook_events.get(event_id) {
            None => EventClaim::Claimed,
            Some((result, _)) if result == "error" => EventClaim::Claimed,
            Some((result, _)) if result == "success" => EventClaim::AlreadyProcessed,
            Some(_) => EventClaim::InProgress,
        };
        if claim == EventClaim::Claimed {
            state
                .webhook_events
                .insert(event_id.to_string(), ("processing".to_string(), None));
        }
        Ok(claim)
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        let result = if error_message.is_some() {
            "error"
        } else {
            "success"
        };
        self.state()?.webhook_events.insert(
            event_id.to_string(),
            (result.to_string(), error_message.map(str::to_string)),
        );
        Ok(())
    }
}

// ============================================================================
// RecordingGateway
// ============================================================================

/// Payment gateway double that records every call and hands out fake ids.
#[derive(Default)]
pub struct RecordingGateway {
    customers: Mutex<Vec<NewCustomer>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
    portals: Mutex<Vec<(String, String)>>,
    counter: AtomicUsize,
    fail_checkout: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering every call, widening race windows in tests.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make subsequent checkout session calls fail with a Stripe error.
    pub fn fail_checkouts(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    pub fn customers(&self) -> Vec<NewCustomer> {
        self.customers.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn portals(&self) -> Vec<(String, String)> {
        self.portals.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record<T>(list: &Mutex<Vec<T>>, item: T) -> BillingResult<()> {
        list.lock()
            .map_err(|_| BillingError::Internal("recording gateway poisoned".to_string()))?
            .push(item);
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_customer(&self, customer: NewCustomer) -> BillingResult<String> {
        self.pause().await;
        let id = format!("cus_test_{}", self.next_id());
        Self::record(&self.customers, customer)?;
        Ok(id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<HostedSession> {
        self.pause().await;
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("card_declined (test)".to_string()));
        }
        let id = format!("cs_test_{}", self.next_id());
        Self::record(&self.checkouts, request)?;
        Ok(HostedSession {
            url: format!("https://checkout.stripe.test/c/pay/{}", id),
            id,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<HostedSession> {
        self.pause().await;
        let id = format!("bps_test_{}", self.next_id());
        Self::record(
            &self.portals,
            (customer_id.to_string(), return_url.to_string()),
        )?;
        Ok(HostedSession {
            url: format!("https://billing.stripe.test/p/session/{}", id),
            id,
        })
    }
}
