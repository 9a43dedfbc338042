//! Billing Invariants Module
//!
//! Runnable consistency checks over providers, billing rows and leads.
//! Checks only read; they are safe to run against production at any time,
//! including right after a webhook replay.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Provider(s) affected
    pub provider_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - entitlements visible to families are wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - self-healing, but investigate if persistent
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    fn from_violations(checked_at: OffsetDateTime, violations: Vec<InvariantViolation>) -> Self {
        let checks_run = InvariantChecker::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VerifiedMismatchRow {
    provider_id: Uuid,
    display_name: String,
    tier: String,
    verified: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidWithoutSubscriptionRow {
    provider_id: Uuid,
    display_name: String,
    tier: String,
    stripe_customer_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleReservationRow {
    lead_id: Uuid,
    provider_id: Uuid,
    reserved_until: OffsetDateTime,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_verified_matches_tier().await?);
        violations.extend(self.check_paid_tier_has_subscription().await?);
        violations.extend(self.check_stale_lead_reservations().await?);

        Ok(InvariantCheckSummary::from_violations(now, violations))
    }

    /// Invariant 1: verified is true exactly for premium providers
    async fn check_verified_matches_tier(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<VerifiedMismatchRow> = sqlx::query_as(
            r#"
            SELECT id AS provider_id, display_name, tier, verified
            FROM providers
            WHERE verified <> (tier = 'premium')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "verified_matches_tier".to_string(),
                provider_ids: vec![row.provider_id],
                description: format!(
                    "Provider '{}' has tier '{}' but verified = {}",
                    row.display_name, row.tier, row.verified
                ),
                context: serde_json::json!({
                    "display_name": row.display_name,
                    "tier": row.tier,
                    "verified": row.verified,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: paid tiers are backed by a recorded subscription
    ///
    /// A paid tier without a subscription id means a deletion webhook was
    /// lost or the tier was edited by hand.
    async fn check_paid_tier_has_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidWithoutSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT
                p.id AS provider_id,
                p.display_name,
                p.tier,
                b.stripe_customer_id
            FROM providers p
            LEFT JOIN provider_billing b ON b.provider_id = p.id
            WHERE p.tier <> 'starter'
              AND b.stripe_subscription_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_tier_without_subscription".to_string(),
                provider_ids: vec![row.provider_id],
                description: format!(
                    "Provider '{}' is on '{}' with no active subscription recorded",
                    row.display_name, row.tier
                ),
                context: serde_json::json!({
                    "display_name": row.display_name,
                    "tier": row.tier,
                    "stripe_customer_id": row.stripe_customer_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: no lead is held in `pending` past its reservation
    async fn check_stale_lead_reservations(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleReservationRow> = sqlx::query_as(
            r#"
            SELECT id AS lead_id, provider_id, reserved_until
            FROM leads
            WHERE status = 'pending'
              AND reserved_until IS NOT NULL
              AND reserved_until < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "stale_lead_reservation".to_string(),
                provider_ids: vec![row.provider_id],
                description: format!(
                    "Lead {} is still pending after its reservation ended at {}",
                    row.lead_id, row.reserved_until
                ),
                context: serde_json::json!({
                    "lead_id": row.lead_id,
                    "reserved_until": row.reserved_until.unix_timestamp(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "verified_matches_tier",
            "paid_tier_without_subscription",
            "stale_lead_reservation",
        ]
    }
}
