//! Payment processor seam
//!
//! Every outbound call to the payment processor goes through [`PaymentGateway`].
//! [`StripeClient`] is the production implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, CreateCheckoutSessionPaymentIntentData,
    CreateCheckoutSessionPaymentMethodTypes,
    CreateCheckoutSessionSubscriptionData, CreateCustomer, Currency, Customer, CustomerId,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Parameters for a new processor-side customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub email: String,
    pub name: String,
    pub metadata: HashMap<String, String>,
}

/// What a checkout session charges for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutKind {
    /// Recurring subscription for an existing price.
    Subscription { price_id: String },
    /// One-off payment for an inline amount.
    Payment {
        amount_cents: i64,
        currency: String,
        product_name: String,
        /// Unix timestamp after which the session can no longer be paid.
        expires_at: Option<i64>,
    },
}

/// A checkout session to be created for an existing customer.
///
/// `metadata` is attached to the session itself and copied onto the
/// subscription or payment intent the session produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub kind: CheckoutKind,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// A processor-hosted page the browser should be redirected to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer and return its processor id.
    async fn create_customer(&self, customer: NewCustomer) -> BillingResult<String>;

    async fn create_checkout_session(&self, request: CheckoutRequest)
        -> BillingResult<HostedSession>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<HostedSession>;
}

fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
    customer_id
        .parse::<CustomerId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_customer(&self, customer: NewCustomer) -> BillingResult<String> {
        let params = CreateCustomer {
            email: Some(&customer.email),
            name: Some(&customer.name),
            metadata: Some(customer.metadata),
            ..Default::default()
        };

        let created = Customer::create(self.inner(), params).await?;
        Ok(created.id.to_string())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<HostedSession> {
        let customer_id = parse_customer_id(&request.customer_id)?;

        let mut params = CreateCheckoutSession {
            customer: Some(customer_id),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            metadata: Some(request.metadata.clone()),
            ..Default::default()
        };

        match request.kind {
            CheckoutKind::Subscription { price_id } => {
                params.mode = Some(CheckoutSessionMode::Subscription);
                params.line_items = Some(vec![CreateCheckoutSessionLineItems {
                    price: Some(price_id),
                    quantity: Some(1),
                    ..Default::default()
                }]);
                params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                    metadata: Some(request.metadata),
                    ..Default::default()
                });
                params.allow_promotion_codes = Some(true);
            }
            CheckoutKind::Payment {
                amount_cents,
                currency,
                product_name,
                expires_at,
            } => {
                let currency = currency.parse::<Currency>().map_err(|_| {
                    BillingError::Config(format!("Unsupported currency: {}", currency))
                })?;

                params.mode = Some(CheckoutSessionMode::Payment);
                params.line_items = Some(vec![CreateCheckoutSessionLineItems {
                    price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                        currency,
                        unit_amount: Some(amount_cents),
                        product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                            name: product_name,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    quantity: Some(1),
                    ..Default::default()
                }]);
                // card only: payment must settle inside the reservation window
                params.payment_method_types = Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]);
                params.payment_intent_data = Some(CreateCheckoutSessionPaymentIntentData {
                    metadata: Some(request.metadata),
                    ..Default::default()
                });
                params.expires_at = expires_at;
            }
        }

        let session = CheckoutSession::create(self.inner(), params).await?;
        let url = session.url.ok_or_else(|| {
            BillingError::StripeApi(format!("Checkout session {} has no URL", session.id))
        })?;

        Ok(HostedSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> BillingResult<HostedSession> {
        let customer_id = parse_customer_id(customer_id)?;

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = BillingPortalSession::create(self.inner(), params).await?;

        Ok(HostedSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }
}
