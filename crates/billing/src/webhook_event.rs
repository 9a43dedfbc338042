//! Typed view of the Stripe events the billing core acts on
//!
//! Only the fields the handlers read are modelled. Event types without a
//! handler parse to [`WebhookEventKind::Unknown`] and keep their type name.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::error::{BillingError, BillingResult};
use crate::metadata;

/// A verified webhook event
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    /// Unix timestamp of event creation
    pub created: i64,
    pub kind: WebhookEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEventKind {
    CheckoutSessionCompleted(CheckoutSessionObject),
    CheckoutSessionExpired(CheckoutSessionObject),
    /// Delayed payment method (e.g. BECS direct debit) settled after checkout completed
    CheckoutSessionAsyncPaymentSucceeded(CheckoutSessionObject),
    CheckoutSessionAsyncPaymentFailed(CheckoutSessionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    InvoicePaymentFailed(InvoiceObject),
    Unknown(String),
}

impl WebhookEventKind {
    pub fn event_type(&self) -> &str {
        match self {
            Self::CheckoutSessionCompleted(_) => "checkout.session.completed",
            Self::CheckoutSessionExpired(_) => "checkout.session.expired",
            Self::CheckoutSessionAsyncPaymentSucceeded(_) => {
                "checkout.session.async_payment_succeeded"
            }
            Self::CheckoutSessionAsyncPaymentFailed(_) => "checkout.session.async_payment_failed",
            Self::SubscriptionUpdated(_) => "customer.subscription.updated",
            Self::SubscriptionDeleted(_) => "customer.subscription.deleted",
            Self::InvoicePaymentFailed(_) => "invoice.payment_failed",
            Self::Unknown(event_type) => event_type,
        }
    }
}

/// A reference Stripe sends either as a bare id or as the expanded object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default, deserialize_with = "nullable_map")]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    pub fn is_subscription(&self) -> bool {
        self.mode.as_deref() == Some("subscription")
    }

    pub fn is_payment(&self) -> bool {
        self.mode.as_deref() == Some("payment")
    }

    /// Whether the money has arrived. A completed session paid with a delayed
    /// method reports `unpaid` until `async_payment_succeeded`.
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    }

    pub fn is_lead_unlock(&self) -> bool {
        self.metadata.get(metadata::CHECKOUT_TYPE).map(String::as_str) == Some(metadata::LEAD_UNLOCK)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default, deserialize_with = "nullable_map")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: Option<SubscriptionItems>,
}

impl SubscriptionObject {
    /// Nickname of the first item's price, if Stripe sent one.
    pub fn first_price_nickname(&self) -> Option<&str> {
        self.items
            .as_ref()?
            .data
            .first()?
            .price
            .as_ref()?
            .nickname
            .as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub price: Option<PriceObject>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceObject {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default)]
    pub attempt_count: Option<i64>,
    #[serde(default)]
    pub amount_due: Option<i64>,
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
}

impl InvoiceObject {
    /// Metadata copied from the invoice's subscription, when Stripe includes it.
    pub fn subscription_metadata(&self) -> Option<&HashMap<String, String>> {
        self.subscription_details.as_ref().map(|d| &d.metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionDetails {
    #[serde(default, deserialize_with = "nullable_map")]
    pub metadata: HashMap<String, String>,
}

fn nullable_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

fn object<T: serde::de::DeserializeOwned>(event_type: &str, value: serde_json::Value) -> BillingResult<T> {
    serde_json::from_value(value)
        .map_err(|e| BillingError::WebhookPayloadInvalid(format!("{}: {}", event_type, e)))
}

impl WebhookEvent {
    /// Parse a raw event body. Handled types must carry a well-formed object.
    pub fn parse(payload: &[u8]) -> BillingResult<Self> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

        let value = raw.data.object;
        let kind = match raw.event_type.as_str() {
            "checkout.session.completed" => {
                WebhookEventKind::CheckoutSessionCompleted(object(&raw.event_type, value)?)
            }
            "checkout.session.expired" => {
                WebhookEventKind::CheckoutSessionExpired(object(&raw.event_type, value)?)
            }
            "checkout.session.async_payment_succeeded" => {
                WebhookEventKind::CheckoutSessionAsyncPaymentSucceeded(object(&raw.event_type, value)?)
            }
            "checkout.session.async_payment_failed" => {
                WebhookEventKind::CheckoutSessionAsyncPaymentFailed(object(&raw.event_type, value)?)
            }
            "customer.subscription.updated" => {
                WebhookEventKind::SubscriptionUpdated(object(&raw.event_type, value)?)
            }
            "customer.subscription.deleted" => {
                WebhookEventKind::SubscriptionDeleted(object(&raw.event_type, value)?)
            }
            "invoice.payment_failed" => {
                WebhookEventKind::InvoicePaymentFailed(object(&raw.event_type, value)?)
            }
            _ => WebhookEventKind::Unknown(raw.event_type),
        };

        Ok(Self {
            id: raw.id,
            created: raw.created,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_123",
            "object": "event",
            "type": event_type,
            "created": 1_700_000_000,
            "data": { "object": object },
        }))
        .unwrap()
    }

    #[test]
    fn test_checkout_completed_with_string_and_expanded_refs() {
        let event = WebhookEvent::parse(&payload(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "mode": "subscription",
                "payment_status": "paid",
                "customer": "cus_1",
                "subscription": { "id": "sub_1", "object": "subscription" },
                "metadata": { "providerId": "p", "planName": "Premium" },
            }),
        ))
        .unwrap();

        assert_eq!(event.id, "evt_123");
        assert_eq!(event.created, 1_700_000_000);
        let WebhookEventKind::CheckoutSessionCompleted(session) = event.kind else {
            panic!("wrong kind");
        };
        assert!(session.is_subscription());
        assert!(session.is_paid());
        assert!(!session.is_lead_unlock());
        assert_eq!(session.customer.as_ref().map(Expandable::id), Some("cus_1"));
        assert_eq!(session.subscription.as_ref().map(Expandable::id), Some("sub_1"));
        assert_eq!(session.metadata.get("planName").map(String::as_str), Some("Premium"));
    }

    #[test]
    fn test_null_metadata_and_subscription() {
        let event = WebhookEvent::parse(&payload(
            "checkout.session.expired",
            json!({ "id": "cs_2", "mode": "payment", "subscription": null, "metadata": null }),
        ))
        .unwrap();

        let WebhookEventKind::CheckoutSessionExpired(session) = event.kind else {
            panic!("wrong kind");
        };
        assert!(session.subscription.is_none());
        assert!(session.metadata.is_empty());
        assert!(!session.is_paid());
    }

    #[test]
    fn test_async_payment_events_are_typed() {
        let body = json!({ "id": "cs_3", "mode": "payment", "payment_status": "paid" });
        let event = WebhookEvent::parse(&payload(
            "checkout.session.async_payment_succeeded",
            body.clone(),
        ))
        .unwrap();
        let WebhookEventKind::CheckoutSessionAsyncPaymentSucceeded(session) = &event.kind else {
            panic!("wrong kind");
        };
        assert!(session.is_paid());
        assert_eq!(event.kind.event_type(), "checkout.session.async_payment_succeeded");

        let event =
            WebhookEvent::parse(&payload("checkout.session.async_payment_failed", body)).unwrap();
        assert!(matches!(
            event.kind,
            WebhookEventKind::CheckoutSessionAsyncPaymentFailed(_)
        ));
    }

    #[test]
    fn test_subscription_nickname_fallback_source() {
        let event = WebhookEvent::parse(&payload(
            "customer.subscription.updated",
            json!({
                "id": "sub_1",
                "status": "active",
                "customer": "cus_1",
                "metadata": {},
                "items": { "object": "list", "data": [
                    { "id": "si_1", "price": { "id": "price_1", "nickname": "Professional Monthly" } }
                ]},
            }),
        ))
        .unwrap();

        let WebhookEventKind::SubscriptionUpdated(sub) = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(sub.first_price_nickname(), Some("Professional Monthly"));
    }

    #[test]
    fn test_unknown_type_keeps_name() {
        let event = WebhookEvent::parse(&payload("charge.refunded", json!({ "id": "ch_1" }))).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Unknown("charge.refunded".to_string()));
        assert_eq!(event.kind.event_type(), "charge.refunded");
    }

    #[test]
    fn test_malformed_known_object_is_rejected() {
        let err = WebhookEvent::parse(&payload(
            "customer.subscription.deleted",
            json!({ "id": "sub_1" }),
        ))
        .unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayloadInvalid(_)));

        let err = WebhookEvent::parse(b"not json").unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayloadInvalid(_)));
    }
}
