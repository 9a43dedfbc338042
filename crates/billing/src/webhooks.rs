//! Stripe webhook handling
//!
//! Applies checkout, subscription and lead-unlock outcomes to local state.
//! Every write is absolute, so a redelivered event converges on the same
//! state. Ids read from metadata are re-checked against the store before use.

use std::collections::HashMap;
use std::sync::Arc;

use ndislink_shared::ProviderTier;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::metadata;
use crate::signature::{verify_signature, SignatureHeader};
use crate::store::{BillingStore, EventClaim};
use crate::tier::tier_from_plan_label;
use crate::webhook_event::{
    CheckoutSessionObject, Expandable, InvoiceObject, SubscriptionObject, WebhookEvent,
    WebhookEventKind,
};

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Handled (including events that needed no change).
    Processed,
    /// Already processed successfully earlier; skipped.
    Duplicate,
    /// Another delivery of the same event is being processed right now.
    InProgress,
}

/// Webhook handler for Stripe events
#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn BillingStore>,
    webhook_secret: String,
    tolerance_secs: u64,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        webhook_secret: impl Into<String>,
        tolerance_secs: u64,
    ) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.into(),
            tolerance_secs,
        }
    }

    /// Verify the signature over the raw body, then parse the event.
    pub fn verify_event(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookEvent> {
        self.verify_event_at(payload, signature, OffsetDateTime::now_utc().unix_timestamp())
    }

    pub(crate) fn verify_event_at(
        &self,
        payload: &[u8],
        signature: &str,
        now: i64,
    ) -> BillingResult<WebhookEvent> {
        if !verify_signature(payload, signature, &self.webhook_secret) {
            tracing::warn!(
                payload_len = payload.len(),
                "Webhook signature verification failed"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        // verify_signature already required a parseable header
        let header = SignatureHeader::parse(signature).ok_or(BillingError::WebhookSignatureInvalid)?;
        if !header.is_fresh(now, self.tolerance_secs) {
            tracing::warn!(
                timestamp = header.timestamp,
                now,
                tolerance_secs = self.tolerance_secs,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event = WebhookEvent::parse(payload).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to parse webhook event");
        })?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.kind.event_type(),
            "Verified webhook event"
        );
        Ok(event)
    }

    /// Handle a verified event exactly once.
    ///
    /// The event id is claimed in the webhook ledger first. A failed run is
    /// recorded as `error` and the error returned, so Stripe redelivers and
    /// the next delivery can claim it again.
    pub async fn handle_event(&self, event: WebhookEvent) -> BillingResult<WebhookOutcome> {
        let event_type = event.kind.event_type().to_string();

        match self.store.claim_webhook_event(&event.id, &event_type).await? {
            EventClaim::Claimed => {}
            EventClaim::AlreadyProcessed => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Duplicate webhook event already processed; skipping"
                );
                return Ok(WebhookOutcome::Duplicate);
            }
            EventClaim::InProgress => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Webhook event is being processed by another delivery"
                );
                return Ok(WebhookOutcome::InProgress);
            }
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event_type,
            "Processing Stripe webhook event"
        );

        let result = self.process_event(&event).await;

        let error_message = result.as_ref().err().map(|e| e.to_string());
        if let Err(e) = self
            .store
            .finish_webhook_event(&event.id, error_message.as_deref())
            .await
        {
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        result.map(|()| WebhookOutcome::Processed)
    }

    async fn process_event(&self, event: &WebhookEvent) -> BillingResult<()> {
        match &event.kind {
            WebhookEventKind::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(session).await
            }
            WebhookEventKind::CheckoutSessionExpired(session) => {
                self.handle_checkout_expired(session).await
            }
            WebhookEventKind::CheckoutSessionAsyncPaymentSucceeded(session) => {
                self.handle_checkout_completed(session).await
            }
            WebhookEventKind::CheckoutSessionAsyncPaymentFailed(session) => {
                self.handle_async_payment_failed(session).await
            }
            WebhookEventKind::SubscriptionUpdated(subscription) => {
                self.handle_subscription_updated(subscription).await
            }
            WebhookEventKind::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(subscription).await
            }
            WebhookEventKind::InvoicePaymentFailed(invoice) => {
                self.handle_invoice_payment_failed(invoice);
                Ok(())
            }
            WebhookEventKind::Unknown(event_type) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    "Received unhandled Stripe event type"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, session: &CheckoutSessionObject) -> BillingResult<()> {
        if session.is_lead_unlock() {
            if !session.is_payment() {
                tracing::warn!(
                    session_id = %session.id,
                    mode = ?session.mode,
                    "Lead unlock session completed outside payment mode; ignoring"
                );
                return Ok(());
            }
            if !session.is_paid() {
                tracing::info!(
                    session_id = %session.id,
                    payment_status = ?session.payment_status,
                    "Lead unlock checkout completed before payment settled; waiting"
                );
                return Ok(());
            }
            return self.handle_lead_unlock_paid(session).await;
        }

        if !session.is_subscription() {
            tracing::info!(
                session_id = %session.id,
                mode = ?session.mode,
                "Checkout completed for unhandled mode"
            );
            return Ok(());
        }

        // an unpaid subscription stays incomplete; the tier follows once it turns active
        if !session.is_paid() {
            tracing::info!(
                session_id = %session.id,
                payment_status = ?session.payment_status,
                "Subscription checkout completed before payment settled; waiting"
            );
            return Ok(());
        }

        let Some(subscription_id) = session.subscription.as_ref().map(Expandable::id) else {
            tracing::warn!(session_id = %session.id, "Subscription checkout completed without subscription");
            return Ok(());
        };
        let Some(provider_id) = self.known_provider(&session.metadata, &session.id).await? else {
            return Ok(());
        };

        let plan_name = session.metadata.get(metadata::PLAN_NAME).map(String::as_str);
        let tier = tier_from_plan_label(plan_name);
        let customer_id = session.customer.as_ref().map(Expandable::id);

        self.store.apply_tier(provider_id, tier).await?;
        self.store
            .record_subscription(provider_id, subscription_id, customer_id)
            .await?;

        tracing::info!(
            provider_id = %provider_id,
            subscription_id = %subscription_id,
            plan_name = ?plan_name,
            tier = %tier,
            "Applied tier from completed checkout"
        );
        Ok(())
    }

    async fn handle_lead_unlock_paid(&self, session: &CheckoutSessionObject) -> BillingResult<()> {
        let Some((lead_id, provider_id)) = self.known_lead(session).await? else {
            return Ok(());
        };

        let unlocked = self
            .store
            .mark_lead_unlocked(lead_id, provider_id, OffsetDateTime::now_utc())
            .await?;

        if unlocked {
            tracing::info!(
                lead_id = %lead_id,
                provider_id = %provider_id,
                session_id = %session.id,
                "Lead unlocked"
            );
        } else {
            tracing::info!(
                lead_id = %lead_id,
                provider_id = %provider_id,
                "Lead was not new or pending; unlock already applied or lead closed"
            );
        }
        Ok(())
    }

    async fn handle_checkout_expired(&self, session: &CheckoutSessionObject) -> BillingResult<()> {
        if !session.is_lead_unlock() {
            tracing::debug!(session_id = %session.id, "Non lead-unlock checkout expired");
            return Ok(());
        }
        let Some((lead_id, provider_id)) = self.known_lead(session).await? else {
            return Ok(());
        };

        let released = self.store.release_lead(lead_id, provider_id).await?;
        tracing::info!(
            lead_id = %lead_id,
            provider_id = %provider_id,
            released,
            "Lead unlock checkout expired"
        );
        Ok(())
    }

    async fn handle_async_payment_failed(&self, session: &CheckoutSessionObject) -> BillingResult<()> {
        if !session.is_lead_unlock() {
            tracing::warn!(
                session_id = %session.id,
                customer_id = ?session.customer.as_ref().map(Expandable::id),
                "Delayed checkout payment failed"
            );
            return Ok(());
        }
        let Some((lead_id, provider_id)) = self.known_lead(session).await? else {
            return Ok(());
        };

        let released = self.store.release_lead(lead_id, provider_id).await?;
        tracing::warn!(
            lead_id = %lead_id,
            provider_id = %provider_id,
            released,
            "Lead unlock payment failed"
        );
        Ok(())
    }

    async fn handle_subscription_updated(&self, subscription: &SubscriptionObject) -> BillingResult<()> {
        if subscription.status != "active" {
            tracing::info!(
                subscription_id = %subscription.id,
                status = %subscription.status,
                "Subscription updated to non-active status; tier unchanged"
            );
            return Ok(());
        }
        let Some(provider_id) = self
            .known_provider(&subscription.metadata, &subscription.id)
            .await?
        else {
            return Ok(());
        };

        let plan_name = subscription
            .metadata
            .get(metadata::PLAN_NAME)
            .map(String::as_str)
            .or_else(|| subscription.first_price_nickname());
        let tier = tier_from_plan_label(plan_name);
        let customer_id = subscription.customer.as_ref().map(Expandable::id);

        self.store.apply_tier(provider_id, tier).await?;
        self.store
            .record_subscription(provider_id, &subscription.id, customer_id)
            .await?;

        tracing::info!(
            provider_id = %provider_id,
            subscription_id = %subscription.id,
            plan_name = ?plan_name,
            tier = %tier,
            "Synced tier from subscription update"
        );
        Ok(())
    }

    async fn handle_subscription_deleted(&self, subscription: &SubscriptionObject) -> BillingResult<()> {
        let Some(provider_id) = self
            .known_provider(&subscription.metadata, &subscription.id)
            .await?
        else {
            return Ok(());
        };

        // a provider can hold a newer subscription than the one being deleted
        let current = self
            .store
            .get_billing(provider_id)
            .await?
            .and_then(|b| b.stripe_subscription_id);
        if let Some(current) = current.filter(|current| *current != subscription.id) {
            tracing::warn!(
                provider_id = %provider_id,
                subscription_id = %subscription.id,
                current_subscription_id = %current,
                "Deleted subscription is not the provider's current one; tier unchanged"
            );
            return Ok(());
        }

        self.store.apply_tier(provider_id, ProviderTier::Starter).await?;
        self.store.clear_subscription(provider_id).await?;

        tracing::info!(
            provider_id = %provider_id,
            subscription_id = %subscription.id,
            "Subscription deleted; provider reset to starter"
        );
        Ok(())
    }

    fn handle_invoice_payment_failed(&self, invoice: &InvoiceObject) {
        let provider_id = invoice
            .subscription_metadata()
            .and_then(|m| metadata::uuid_value(m, metadata::PROVIDER_ID));

        tracing::warn!(
            invoice_id = %invoice.id,
            provider_id = ?provider_id,
            customer_id = ?invoice.customer.as_ref().map(Expandable::id),
            subscription_id = ?invoice.subscription.as_ref().map(Expandable::id),
            attempt_count = ?invoice.attempt_count,
            amount_due = ?invoice.amount_due,
            "Invoice payment failed"
        );
    }

    /// Provider id from metadata, if it parses and the provider exists.
    async fn known_provider(
        &self,
        meta: &HashMap<String, String>,
        object_id: &str,
    ) -> BillingResult<Option<Uuid>> {
        let Some(provider_id) = metadata::uuid_value(meta, metadata::PROVIDER_ID) else {
            tracing::warn!(
                object_id = %object_id,
                raw = ?meta.get(metadata::PROVIDER_ID),
                "Webhook object has no valid providerId in metadata; ignoring"
            );
            return Ok(None);
        };

        if self.store.get_provider(provider_id).await?.is_none() {
            tracing::warn!(
                object_id = %object_id,
                provider_id = %provider_id,
                "Webhook references unknown provider; ignoring"
            );
            return Ok(None);
        }
        Ok(Some(provider_id))
    }

    /// Lead and provider ids from metadata, if they parse and the lead belongs to the provider.
    async fn known_lead(&self, session: &CheckoutSessionObject) -> BillingResult<Option<(Uuid, Uuid)>> {
        let lead_id = metadata::uuid_value(&session.metadata, metadata::LEAD_ID);
        let provider_id = metadata::uuid_value(&session.metadata, metadata::PROVIDER_ID);
        let (Some(lead_id), Some(provider_id)) = (lead_id, provider_id) else {
            tracing::warn!(
                session_id = %session.id,
                "Lead unlock session without valid leadId/providerId; ignoring"
            );
            return Ok(None);
        };

        if self.store.get_lead(lead_id, provider_id).await?.is_none() {
            tracing::warn!(
                session_id = %session.id,
                lead_id = %lead_id,
                provider_id = %provider_id,
                "Lead unlock references unknown lead for provider; ignoring"
            );
            return Ok(None);
        }
        Ok(Some((lead_id, provider_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::compute_signature;
    use crate::store::LeadStatus;
    use crate::testing::InMemoryBillingStore;
    use serde_json::json;

    const SECRET: &str = "whsec_unit";

    fn handler(store: &Arc<InMemoryBillingStore>) -> WebhookHandler {
        WebhookHandler::new(store.clone(), SECRET, 300)
    }

    fn signed(body: &[u8], ts: i64) -> String {
        format!("t={},v1={}", ts, compute_signature(body, ts, SECRET).unwrap())
    }

    fn event_body(id: &str, event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "type": event_type,
            "created": 1_700_000_000,
            "data": { "object": object },
        }))
        .unwrap()
    }

    #[test]
    fn test_verify_event_rejects_bad_signature_and_stale_timestamp() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = handler(&store);
        let body = event_body("evt_1", "ping", json!({}));
        let now = 1_700_000_000;

        assert!(handler.verify_event_at(&body, &signed(&body, now), now).is_ok());
        assert!(matches!(
            handler.verify_event_at(&body, "t=1,v1=00", now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
        assert!(matches!(
            handler.verify_event_at(&body, &signed(&body, now - 301), now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_zero_tolerance_accepts_old_signature() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = WebhookHandler::new(store.clone(), SECRET, 0);
        let body = event_body("evt_1", "ping", json!({}));

        assert!(handler.verify_event_at(&body, &signed(&body, 1), 1_700_000_000).is_ok());
    }

    #[test]
    fn test_signed_garbage_is_payload_error() {
        let store = Arc::new(InMemoryBillingStore::new());
        let handler = handler(&store);
        let body = b"{\"not\":\"an event\"}";

        assert!(matches!(
            handler.verify_event_at(body, &signed(body, 10), 10),
            Err(BillingError::WebhookPayloadInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_update_uses_nickname_when_plan_missing() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let body = event_body(
            "evt_upd",
            "customer.subscription.updated",
            json!({
                "id": "sub_9",
                "status": "active",
                "customer": "cus_9",
                "metadata": { "providerId": provider_id.to_string() },
                "items": { "data": [ { "price": { "id": "price_x", "nickname": "Professional" } } ] },
            }),
        );
        let event = WebhookEvent::parse(&body).unwrap();

        handler(&store).handle_event(event).await.unwrap();

        let provider = store.provider(provider_id).unwrap();
        assert_eq!(provider.tier, ProviderTier::Professional);
        assert!(!provider.verified);
        let billing = store.billing(provider_id).unwrap();
        assert_eq!(billing.stripe_subscription_id.as_deref(), Some("sub_9"));
        assert_eq!(billing.stripe_customer_id.as_deref(), Some("cus_9"));
    }

    #[tokio::test]
    async fn test_non_active_subscription_update_is_not_applied() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let body = event_body(
            "evt_pd",
            "customer.subscription.updated",
            json!({
                "id": "sub_9",
                "status": "past_due",
                "metadata": { "providerId": provider_id.to_string(), "planName": "Premium" },
            }),
        );

        let outcome = handler(&store)
            .handle_event(WebhookEvent::parse(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Processed);
        assert_eq!(store.provider(provider_id).unwrap().tier, ProviderTier::Starter);
        assert!(store.billing(provider_id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_is_acknowledged() {
        let store = Arc::new(InMemoryBillingStore::new());
        let body = event_body(
            "evt_ghost",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "payment_status": "paid",
                "subscription": "sub_1",
                "metadata": { "providerId": Uuid::new_v4().to_string(), "planName": "Premium" },
            }),
        );

        let outcome = handler(&store)
            .handle_event(WebhookEvent::parse(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome, WebhookOutcome::Processed);
        assert_eq!(
            store.webhook_event_result("evt_ghost"),
            Some(("success".to_string(), None))
        );
    }

    #[tokio::test]
    async fn test_lead_unlock_paid_and_expired() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let paid_lead = store.add_lead(provider_id, "Therapy", None, LeadStatus::Pending);
        let expired_lead = store.add_lead(provider_id, "Therapy", None, LeadStatus::Pending);
        let session = |lead_id: Uuid| {
            json!({
                "id": "cs_lead",
                "mode": "payment",
                "payment_status": "paid",
                "metadata": {
                    "leadId": lead_id.to_string(),
                    "providerId": provider_id.to_string(),
                    "type": "lead_unlock",
                },
            })
        };
        let handler = handler(&store);

        let paid = event_body("evt_paid", "checkout.session.completed", session(paid_lead));
        handler.handle_event(WebhookEvent::parse(&paid).unwrap()).await.unwrap();
        let expired = event_body("evt_exp", "checkout.session.expired", session(expired_lead));
        handler.handle_event(WebhookEvent::parse(&expired).unwrap()).await.unwrap();

        let lead = store.lead(paid_lead).unwrap();
        assert_eq!(lead.status, LeadStatus::Unlocked);
        assert!(lead.unlocked_at.is_some());
        assert_eq!(store.lead(expired_lead).unwrap().status, LeadStatus::New);

        // an expiry arriving after payment leaves the lead unlocked
        let late = event_body("evt_late", "checkout.session.expired", session(paid_lead));
        handler.handle_event(WebhookEvent::parse(&late).unwrap()).await.unwrap();
        assert_eq!(store.lead(paid_lead).unwrap().status, LeadStatus::Unlocked);
    }

    #[tokio::test]
    async fn test_lead_unlock_for_other_provider_is_ignored() {
        let store = Arc::new(InMemoryBillingStore::new());
        let owner = store.add_provider(Uuid::new_v4(), "Owner", "o@o.example");
        let intruder = store.add_provider(Uuid::new_v4(), "Intruder", "i@i.example");
        let lead_id = store.add_lead(owner, "Therapy", None, LeadStatus::New);
        let body = event_body(
            "evt_x",
            "checkout.session.completed",
            json!({
                "id": "cs_x",
                "mode": "payment",
                "payment_status": "paid",
                "metadata": {
                    "leadId": lead_id.to_string(),
                    "providerId": intruder.to_string(),
                    "type": "lead_unlock",
                },
            }),
        );

        handler(&store)
            .handle_event(WebhookEvent::parse(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(store.lead(lead_id).unwrap().status, LeadStatus::New);
    }

    #[tokio::test]
    async fn test_invoice_payment_failed_changes_nothing() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let before = store.provider(provider_id);
        let body = event_body(
            "evt_inv",
            "invoice.payment_failed",
            json!({
                "id": "in_1",
                "customer": "cus_1",
                "attempt_count": 2,
                "subscription_details": { "metadata": { "providerId": provider_id.to_string() } },
            }),
        );

        handler(&store)
            .handle_event(WebhookEvent::parse(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(store.provider(provider_id), before);
        assert!(store.billing(provider_id).is_none());
    }

    fn lead_session(lead_id: Uuid, provider_id: Uuid, payment_status: &str) -> serde_json::Value {
        json!({
            "id": "cs_lead",
            "mode": "payment",
            "payment_status": payment_status,
            "metadata": {
                "leadId": lead_id.to_string(),
                "providerId": provider_id.to_string(),
                "type": "lead_unlock",
            },
        })
    }

    #[tokio::test]
    async fn test_unpaid_lead_unlock_waits_for_async_payment() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let lead_id = store.add_lead(provider_id, "Therapy", None, LeadStatus::Pending);
        let handler = handler(&store);

        let completed = event_body(
            "evt_unpaid",
            "checkout.session.completed",
            lead_session(lead_id, provider_id, "unpaid"),
        );
        handler.handle_event(WebhookEvent::parse(&completed).unwrap()).await.unwrap();
        assert_eq!(store.lead(lead_id).unwrap().status, LeadStatus::Pending);

        let settled = event_body(
            "evt_settled",
            "checkout.session.async_payment_succeeded",
            lead_session(lead_id, provider_id, "paid"),
        );
        handler.handle_event(WebhookEvent::parse(&settled).unwrap()).await.unwrap();
        assert_eq!(store.lead(lead_id).unwrap().status, LeadStatus::Unlocked);
    }

    #[tokio::test]
    async fn test_async_payment_failure_releases_lead() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let lead_id = store.add_lead(provider_id, "Therapy", None, LeadStatus::Pending);
        let body = event_body(
            "evt_debit_failed",
            "checkout.session.async_payment_failed",
            lead_session(lead_id, provider_id, "unpaid"),
        );

        handler(&store)
            .handle_event(WebhookEvent::parse(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(store.lead(lead_id).unwrap().status, LeadStatus::New);
    }

    #[tokio::test]
    async fn test_unpaid_subscription_checkout_leaves_tier() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let body = event_body(
            "evt_sub_unpaid",
            "checkout.session.completed",
            json!({
                "id": "cs_sub",
                "mode": "subscription",
                "payment_status": "unpaid",
                "subscription": "sub_1",
                "metadata": { "providerId": provider_id.to_string(), "planName": "Premium" },
            }),
        );

        handler(&store)
            .handle_event(WebhookEvent::parse(&body).unwrap())
            .await
            .unwrap();

        let provider = store.provider(provider_id).unwrap();
        assert_eq!(provider.tier, ProviderTier::Starter);
        assert!(!provider.verified);
    }

    #[tokio::test]
    async fn test_deleting_superseded_subscription_keeps_current_one() {
        let store = Arc::new(InMemoryBillingStore::new());
        let provider_id = store.add_provider(Uuid::new_v4(), "Kin Care", "k@kin.example");
        let handler = handler(&store);
        let completed = event_body(
            "evt_sub_b",
            "checkout.session.completed",
            json!({
                "id": "cs_b",
                "mode": "subscription",
                "payment_status": "paid",
                "customer": "cus_kin",
                "subscription": "sub_B",
                "metadata": { "providerId": provider_id.to_string(), "planName": "Premium" },
            }),
        );
        handler.handle_event(WebhookEvent::parse(&completed).unwrap()).await.unwrap();

        let deleted = |id: &str, sub: &str| {
            event_body(
                id,
                "customer.subscription.deleted",
                json!({
                    "id": sub,
                    "status": "canceled",
                    "metadata": { "providerId": provider_id.to_string() },
                }),
            )
        };

        handler
            .handle_event(WebhookEvent::parse(&deleted("evt_del_a", "sub_A")).unwrap())
            .await
            .unwrap();
        let provider = store.provider(provider_id).unwrap();
        assert_eq!(provider.tier, ProviderTier::Premium);
        assert!(provider.verified);
        assert_eq!(
            store.billing(provider_id).unwrap().stripe_subscription_id.as_deref(),
            Some("sub_B")
        );

        handler
            .handle_event(WebhookEvent::parse(&deleted("evt_del_b", "sub_B")).unwrap())
            .await
            .unwrap();
        let provider = store.provider(provider_id).unwrap();
        assert_eq!(provider.tier, ProviderTier::Starter);
        assert!(!provider.verified);
        assert!(store.billing(provider_id).unwrap().stripe_subscription_id.is_none());
    }
}
