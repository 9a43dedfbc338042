//! Return URL validation and redirect markers

use url::Url;

use crate::error::{BillingError, BillingResult};

/// Which return URLs the session creators accept.
///
/// An empty allowlist accepts any absolute http(s) URL.
#[derive(Debug, Clone, Default)]
pub struct ReturnUrlPolicy {
    allowed_origins: Vec<String>,
}

impl ReturnUrlPolicy {
    pub fn new<I, S>(allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_origins: allowed_origins
                .into_iter()
                .map(|o| o.as_ref().trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    pub fn validate(&self, return_url: &str) -> BillingResult<Url> {
        let url = Url::parse(return_url.trim())
            .map_err(|e| BillingError::InvalidInput(format!("returnUrl is not a valid URL: {}", e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(BillingError::InvalidInput(
                "returnUrl must use http or https".to_string(),
            ));
        }

        if !self.allowed_origins.is_empty() {
            let origin = url.origin().ascii_serialization();
            if !self.allowed_origins.iter().any(|o| *o == origin) {
                return Err(BillingError::InvalidInput(format!(
                    "returnUrl origin {} is not allowed",
                    origin
                )));
            }
        }

        Ok(url)
    }
}

/// Append query markers to a validated return URL, keeping any existing query.
pub fn with_markers(base: &Url, markers: &[(&str, &str)]) -> String {
    let mut url = base.clone();
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in markers {
            pairs.append_pair(key, value);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_are_appended() {
        let base = Url::parse("https://app.example.com/dashboard/billing").unwrap();
        let url = with_markers(&base, &[("checkout", "success"), ("plan", "Premium Annual")]);
        assert_eq!(
            url,
            "https://app.example.com/dashboard/billing?checkout=success&plan=Premium+Annual"
        );
    }

    #[test]
    fn test_markers_keep_existing_query() {
        let base = Url::parse("https://app.example.com/billing?tab=plans").unwrap();
        let url = with_markers(&base, &[("checkout", "cancelled")]);
        assert_eq!(url, "https://app.example.com/billing?tab=plans&checkout=cancelled");
    }

    #[test]
    fn test_policy_rejects_non_http() {
        let policy = ReturnUrlPolicy::default();
        assert!(policy.validate("javascript:alert(1)").is_err());
        assert!(policy.validate("not a url").is_err());
        assert!(policy.validate("https://anywhere.example/x").is_ok());
    }

    #[test]
    fn test_policy_enforces_allowlist() {
        let policy = ReturnUrlPolicy::new(["https://app.example.com/", "http://localhost:3000"]);
        assert!(policy.validate("https://app.example.com/billing").is_ok());
        assert!(policy.validate("http://localhost:3000/x?y=1").is_ok());
        assert!(matches!(
            policy.validate("https://evil.example/billing"),
            Err(BillingError::InvalidInput(_))
        ));
    }
}
