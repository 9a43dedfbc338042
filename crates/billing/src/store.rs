//! Billing persistence
//!
//! [`BillingStore`] is the only way the billing core reads or writes
//! providers, billing rows, leads and the webhook ledger. Every write is a
//! single-row statement scoped by an explicit id; conditional writes
//! (claims, lead reservations) rely on the row-level atomicity of the
//! backing store rather than any in-process lock.

use std::fmt;

use async_trait::async_trait;
use ndislink_shared::ProviderTier;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Webhook events stuck in `processing` longer than this can be reclaimed.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub display_name: String,
    pub contact_email: String,
    pub tier: ProviderTier,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderBillingRecord {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadStatus {
    New,
    /// An unlock checkout is open for this lead.
    Pending,
    Unlocked,
    /// Statuses owned by lead workflows outside billing (closed, expired, ...).
    Other(String),
}

impl LeadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Pending => "pending",
            LeadStatus::Unlocked => "unlocked",
            LeadStatus::Other(s) => s,
        }
    }
}

impl From<&str> for LeadStatus {
    fn from(s: &str) -> Self {
        match s {
            "new" => LeadStatus::New,
            "pending" => LeadStatus::Pending,
            "unlocked" => LeadStatus::Unlocked,
            other => LeadStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadRecord {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub category: String,
    /// Unlock fee in cents; `None` means the configured default applies.
    pub unlock_price: Option<i64>,
    pub status: LeadStatus,
    pub reserved_until: Option<OffsetDateTime>,
    pub unlocked_at: Option<OffsetDateTime>,
}

/// Outcome of trying to claim a webhook event for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClaim {
    Claimed,
    AlreadyProcessed,
    InProgress,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn get_provider(&self, provider_id: Uuid) -> BillingResult<Option<ProviderRecord>>;

    async fn get_billing(&self, provider_id: Uuid)
        -> BillingResult<Option<ProviderBillingRecord>>;

    /// Insert an empty billing row for the provider if none exists.
    /// Returns `true` only for the caller whose insert created the row.
    async fn claim_billing_row(&self, provider_id: Uuid, user_id: Uuid) -> BillingResult<bool>;

    /// Store the customer id unless the row already holds one, creating the
    /// row if needed. Returns the customer id the row holds afterwards.
    async fn set_customer_id_if_absent(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<String>;

    /// Set tier and the matching verified flag in one write.
    async fn apply_tier(&self, provider_id: Uuid, tier: ProviderTier) -> BillingResult<()>;

    /// Record the active subscription, filling the customer id if the row lacks one.
    async fn record_subscription(
        &self,
        provider_id: Uuid,
        subscription_id: &str,
        customer_id: Option<&str>,
    ) -> BillingResult<()>;

    /// Clear the subscription id; the customer id is kept for reuse.
    async fn clear_subscription(&self, provider_id: Uuid) -> BillingResult<()>;

    async fn get_lead(&self, lead_id: Uuid, provider_id: Uuid)
        -> BillingResult<Option<LeadRecord>>;

    /// Compare-and-swap `new -> pending`. Returns `false` if the lead was not `new`.
    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
        reserved_until: OffsetDateTime,
    ) -> BillingResult<bool>;

    /// Compare-and-swap `pending -> new`. Returns `false` if the lead was not `pending`.
    async fn release_lead(&self, lead_id: Uuid, provider_id: Uuid) -> BillingResult<bool>;

    /// Compare-and-swap `new | pending -> unlocked`.
    async fn mark_lead_unlocked(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
        unlocked_at: OffsetDateTime,
    ) -> BillingResult<bool>;

    /// Release every reservation whose window ended before `now`.
    async fn release_expired_reservations(&self, now: OffsetDateTime) -> BillingResult<u64>;

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str)
        -> BillingResult<EventClaim>;

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()>;
}

#[derive(Debug, FromRow)]
struct ProviderRow {
    id: Uuid,
    owner_user_id: Uuid,
    display_name: String,
    contact_email: String,
    tier: String,
    verified: bool,
}

impl TryFrom<ProviderRow> for ProviderRecord {
    type Error = BillingError;

    fn try_from(row: ProviderRow) -> Result<Self, Self::Error> {
        let tier = row
            .tier
            .parse::<ProviderTier>()
            .map_err(|e| BillingError::Database(e.to_string()))?;
        Ok(ProviderRecord {
            id: row.id,
            owner_user_id: row.owner_user_id,
            display_name: row.display_name,
            contact_email: row.contact_email,
            tier,
            verified: row.verified,
        })
    }
}

#[derive(Debug, FromRow)]
struct BillingRow {
    provider_id: Uuid,
    user_id: Uuid,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
}

#[derive(Debug, FromRow)]
struct LeadRow {
    id: Uuid,
    provider_id: Uuid,
    category: String,
    unlock_price: Option<i64>,
    status: String,
    reserved_until: Option<OffsetDateTime>,
    unlocked_at: Option<OffsetDateTime>,
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn get_provider(&self, provider_id: Uuid) -> BillingResult<Option<ProviderRecord>> {
        let row: Option<ProviderRow> = sqlx::query_as(
            r#"
            SELECT id, owner_user_id, display_name, contact_email, tier, verified
            FROM providers
            WHERE id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProviderRecord::try_from).transpose()
    }

    async fn get_billing(
        &self,
        provider_id: Uuid,
    ) -> BillingResult<Option<ProviderBillingRecord>> {
        let row: Option<BillingRow> = sqlx::query_as(
            r#"
            SELECT provider_id, user_id, stripe_customer_id, stripe_subscription_id
            FROM provider_billing
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ProviderBillingRecord {
            provider_id: r.provider_id,
            user_id: r.user_id,
            stripe_customer_id: r.stripe_customer_id,
            stripe_subscription_id: r.stripe_subscription_id,
        }))
    }

    async fn claim_billing_row(&self, provider_id: Uuid, user_id: Uuid) -> BillingResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO provider_billing (provider_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (provider_id) DO NOTHING
            RETURNING provider_id
            "#,
        )
        .bind(provider_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn set_customer_id_if_absent(
        &self,
        provider_id: Uuid,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<String> {
        let (stored,): (Option<String>,) = sqlx::query_as(
            r#"
            INSERT INTO provider_billing (provider_id, user_id, stripe_customer_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider_id) DO UPDATE SET
                stripe_customer_id = COALESCE(provider_billing.stripe_customer_id, EXCLUDED.stripe_customer_id),
                updated_at = NOW()
            RETURNING stripe_customer_id
            "#,
        )
        .bind(provider_id)
        .bind(user_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        stored.ok_or_else(|| {
            BillingError::Internal(format!(
                "customer id missing after upsert for provider {}",
                provider_id
            ))
        })
    }

    async fn apply_tier(&self, provider_id: Uuid, tier: ProviderTier) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE providers SET tier = $1, verified = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(tier.as_str())
        .bind(tier.grants_verified())
        .bind(provider_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::ProviderNotFound(provider_id));
        }
        Ok(())
    }

    async fn record_subscription(
        &self,
        provider_id: Uuid,
        subscription_id: &str,
        customer_id: Option<&str>,
    ) -> BillingResult<()> {
        // The billing row normally exists from checkout; fall back to the
        // provider's owner when it does not.
        let result = sqlx::query(
            r#"
            INSERT INTO provider_billing (provider_id, user_id, stripe_customer_id, stripe_subscription_id)
            SELECT id, owner_user_id, $3, $2 FROM providers WHERE id = $1
            ON CONFLICT (provider_id) DO UPDATE SET
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_customer_id = COALESCE(provider_billing.stripe_customer_id, EXCLUDED.stripe_customer_id),
                updated_at = NOW()
            "#,
        )
        .bind(provider_id)
        .bind(subscription_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::ProviderNotFound(provider_id));
        }
        Ok(())
    }

    async fn clear_subscription(&self, provider_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE provider_billing
            SET stripe_subscription_id = NULL, updated_at = NOW()
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_lead(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
    ) -> BillingResult<Option<LeadRecord>> {
        let row: Option<LeadRow> = sqlx::query_as(
            r#"
            SELECT id, provider_id, category, unlock_price, status, reserved_until, unlocked_at
            FROM leads
            WHERE id = $1 AND provider_id = $2
            "#,
        )
        .bind(lead_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| LeadRecord {
            id: r.id,
            provider_id: r.provider_id,
            category: r.category,
            unlock_price: r.unlock_price,
            status: LeadStatus::from(r.status.as_str()),
            reserved_until: r.reserved_until,
            unlocked_at: r.unlocked_at,
        }))
    }

    async fn reserve_lead(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
        reserved_until: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'pending', reserved_until = $3, updated_at = NOW()
            WHERE id = $1 AND provider_id = $2 AND status = 'new'
            "#,
        )
        .bind(lead_id)
        .bind(provider_id)
        .bind(reserved_until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lead(&self, lead_id: Uuid, provider_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'new', reserved_until = NULL, updated_at = NOW()
            WHERE id = $1 AND provider_id = $2 AND status = 'pending'
            "#,
        )
        .bind(lead_id)
        .bind(provider_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_lead_unlocked(
        &self,
        lead_id: Uuid,
        provider_id: Uuid,
        unlocked_at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'unlocked', unlocked_at = $3, reserved_until = NULL, updated_at = NOW()
            WHERE id = $1 AND provider_id = $2 AND status IN ('new', 'pending')
            "#,
        )
        .bind(lead_id)
        .bind(provider_id)
        .bind(unlocked_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_expired_reservations(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'new', reserved_until = NULL, updated_at = NOW()
            WHERE status = 'pending' AND reserved_until < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> BillingResult<EventClaim> {
        // INSERT...ON CONFLICT...RETURNING gives exactly one concurrent caller
        // the claim. Failed events and events stuck in processing past the
        // timeout can be claimed again on redelivery.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at < NOW() - make_interval(mins => $3))
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(EventClaim::Claimed);
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT processing_result FROM stripe_webhook_events WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match existing {
            Some((status,)) if status == "success" => EventClaim::AlreadyProcessed,
            _ => EventClaim::InProgress,
        })
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        let processing_result = if error_message.is_some() {
            "error"
        } else {
            "success"
        };

        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(error_message)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
