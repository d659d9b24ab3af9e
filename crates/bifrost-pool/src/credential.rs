//! Credential records and quota accounting.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use bifrost_core::config::{AuthKind, AuthTokenEntry};

/// The resource type requests are billed against. Other breakdowns in
/// a quota snapshot don't gate usability.
pub const BILLABLE_RESOURCE: &str = "VIBE";

/// Tokens within this window of expiry are refreshed preemptively.
pub const REFRESH_SKEW_SECS: i64 = 60;

/// One upstream credential with its mutable auth/quota state. Lives
/// inside the pool behind a per-slot mutex; nothing outside the pool
/// holds one of these across an await.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub kind: AuthKind,
    pub refresh_secret: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: String,
    /// `None` until the first successful refresh; treated as expired.
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub error_count: u32,
    pub last_used: Option<DateTime<Utc>>,
    pub owner_email: String,
    pub last_quota_poll: Option<DateTime<Utc>>,
    pub last_poll_error: bool,
    pub quota: Option<UsageLimits>,
    pub description: String,
}

impl Credential {
    pub fn from_entry(entry: &AuthTokenEntry) -> Self {
        Self {
            id: entry.id.clone(),
            kind: entry.auth,
            refresh_secret: entry.refresh_token.clone(),
            client_id: entry.client_id.clone(),
            client_secret: entry.client_secret.clone(),
            access_token: String::new(),
            expires_at: None,
            enabled: entry.enabled,
            error_count: 0,
            last_used: None,
            owner_email: String::new(),
            last_quota_poll: None,
            last_poll_error: false,
            quota: None,
            description: entry.description.clone(),
        }
    }

    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now >= expiry,
            None => true,
        }
    }

    /// Expired, or close enough that a request could outlive the token.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now + Duration::seconds(REFRESH_SKEW_SECS) >= expiry,
            None => true,
        }
    }

    /// Usable: enabled, live token, and billable quota remaining.
    /// An unpolled quota counts as usable — the first poll settles it.
    pub fn usable(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || self.access_token.is_empty() || self.token_expired(now) {
            return false;
        }
        match &self.quota {
            Some(limits) => limits.available(BILLABLE_RESOURCE) > 0,
            None => true,
        }
    }

    pub fn quota_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        if self.last_poll_error {
            return true;
        }
        match self.last_quota_poll {
            Some(at) => now - at > max_age,
            None => true,
        }
    }

    /// Log-safe rendering of the access token.
    pub fn token_preview(&self) -> String {
        let suffix: String = self
            .access_token
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("***{suffix}")
    }
}

/// Quota snapshot from the upstream usage endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimits {
    #[serde(default)]
    pub breakdowns: Vec<UsageBreakdown>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBreakdown {
    pub resource_type: String,
    #[serde(default)]
    pub usage_limit: i64,
    #[serde(default)]
    pub current_usage: i64,
    #[serde(default)]
    pub overage_cap: i64,
    #[serde(default)]
    pub current_overages: i64,
    #[serde(default)]
    pub free_trial: Option<FreeTrial>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeTrial {
    pub status: String,
    #[serde(default)]
    pub usage_limit: i64,
    #[serde(default)]
    pub current_usage: i64,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl UsageLimits {
    /// Remaining callable units for a resource type: base allowance
    /// plus any active free-trial allowance.
    pub fn available(&self, resource_type: &str) -> i64 {
        self.breakdowns
            .iter()
            .filter(|b| b.resource_type == resource_type)
            .map(|b| {
                let mut avail = b.usage_limit - b.current_usage;
                if let Some(trial) = &b.free_trial {
                    if trial.status == "ACTIVE" {
                        avail += trial.usage_limit - trial.current_usage;
                    }
                }
                avail
            })
            .sum()
    }

    /// Convenience constructor used by tests and the mock backend.
    pub fn with_available(resource_type: &str, limit: i64, used: i64) -> Self {
        Self {
            breakdowns: vec![UsageBreakdown {
                resource_type: resource_type.to_string(),
                usage_limit: limit,
                current_usage: used,
                overage_cap: 0,
                current_overages: 0,
                free_trial: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> AuthTokenEntry {
        AuthTokenEntry {
            id: id.into(),
            auth: AuthKind::Social,
            refresh_token: "rt".into(),
            client_id: None,
            client_secret: None,
            enabled: true,
            description: String::new(),
        }
    }

    #[test]
    fn fresh_credential_needs_refresh() {
        let cred = Credential::from_entry(&entry("a"));
        let now = Utc::now();
        assert!(cred.token_expired(now));
        assert!(cred.needs_refresh(now));
        assert!(!cred.usable(now));
    }

    #[test]
    fn refresh_skew_window() {
        let now = Utc::now();
        let mut cred = Credential::from_entry(&entry("a"));
        cred.access_token = "tok".into();

        cred.expires_at = Some(now + Duration::seconds(30));
        assert!(!cred.token_expired(now));
        assert!(cred.needs_refresh(now));

        cred.expires_at = Some(now + Duration::seconds(3600));
        assert!(!cred.needs_refresh(now));
        assert!(cred.usable(now));
    }

    #[test]
    fn free_trial_extends_availability() {
        let mut limits = UsageLimits::with_available(BILLABLE_RESOURCE, 50, 50);
        assert_eq!(limits.available(BILLABLE_RESOURCE), 0);

        limits.breakdowns[0].free_trial = Some(FreeTrial {
            status: "ACTIVE".into(),
            usage_limit: 10,
            current_usage: 3,
            expiry: None,
        });
        assert_eq!(limits.available(BILLABLE_RESOURCE), 7);

        limits.breakdowns[0].free_trial.as_mut().unwrap().status = "EXPIRED".into();
        assert_eq!(limits.available(BILLABLE_RESOURCE), 0);
    }

    #[test]
    fn exhausted_quota_blocks_usability() {
        let now = Utc::now();
        let mut cred = Credential::from_entry(&entry("a"));
        cred.access_token = "tok".into();
        cred.expires_at = Some(now + Duration::seconds(3600));
        cred.quota = Some(UsageLimits::with_available(BILLABLE_RESOURCE, 5, 5));
        assert!(!cred.usable(now));

        cred.quota = Some(UsageLimits::with_available(BILLABLE_RESOURCE, 5, 4));
        assert!(cred.usable(now));
    }

    #[test]
    fn token_preview_masks_all_but_suffix() {
        let mut cred = Credential::from_entry(&entry("a"));
        cred.access_token = "secret-token-abcd".into();
        assert_eq!(cred.token_preview(), "***abcd");
        cred.access_token = "ab".into();
        assert_eq!(cred.token_preview(), "***ab");
    }

    #[test]
    fn quota_snapshot_deserializes_from_wire_shape() {
        let json = r#"{
            "breakdowns": [{
                "resourceType": "VIBE",
                "usageLimit": 100,
                "currentUsage": 20,
                "overageCap": 0,
                "currentOverages": 0,
                "freeTrial": {"status": "ACTIVE", "usageLimit": 50, "currentUsage": 10}
            }]
        }"#;
        let limits: UsageLimits = serde_json::from_str(json).unwrap();
        assert_eq!(limits.available(BILLABLE_RESOURCE), 120);
    }
}
