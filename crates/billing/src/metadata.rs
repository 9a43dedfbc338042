//! Metadata keys shared between session creation and webhook handling.
//!
//! Values written here come back, untrusted, on webhook events.

use std::collections::HashMap;

use uuid::Uuid;

pub const PROVIDER_ID: &str = "providerId";
pub const USER_ID: &str = "userId";
pub const PLAN_NAME: &str = "planName";
pub const BILLING_CYCLE: &str = "billingCycle";
pub const LEAD_ID: &str = "leadId";
pub const CHECKOUT_TYPE: &str = "type";

/// Value of [`CHECKOUT_TYPE`] on lead unlock sessions.
pub const LEAD_UNLOCK: &str = "lead_unlock";

/// Read a UUID-valued key. Missing or malformed values yield `None`.
pub fn uuid_value(metadata: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    metadata
        .get(key)
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}
