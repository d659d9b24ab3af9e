pub mod api;
pub mod profiles;

pub use api::{UpstreamClient, UpstreamEndpoints};
pub use profiles::{ClientProfiles, ProfileKind, ProfileMetrics, ProfileStats};
