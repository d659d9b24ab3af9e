pub mod credential;
pub mod pool;

pub use credential::{Credential, FreeTrial, UsageBreakdown, UsageLimits, BILLABLE_RESOURCE};
pub use pool::{AuthBackend, CredentialPool, Lease, QuotaSnapshot, RefreshedToken};
