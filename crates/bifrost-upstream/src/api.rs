//! The upstream service API: token refresh, quota polling, and the
//! generate call whose response body is the binary event stream the
//! codec decodes. This crate owns every HTTP round-trip to the
//! upstream; the pool and gateway stay I/O-free.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use bifrost_core::config::AuthKind;
use bifrost_core::error::{BifrostError, Result};
use bifrost_core::types::MessagesRequest;
use bifrost_pool::credential::Credential;
use bifrost_pool::pool::{AuthBackend, QuotaSnapshot, RefreshedToken};

use crate::profiles::{ClientProfiles, ProfileKind};

/// Upstream endpoint set. Defaults point at the production service;
/// tests and self-hosted deployments override.
#[derive(Debug, Clone)]
pub struct UpstreamEndpoints {
    /// Social-auth refresh endpoint (refresh secret in, token out).
    pub refresh_url: String,
    /// OAuth token endpoint for IdC client-credentials.
    pub idc_token_url: String,
    /// Usage/quota endpoint.
    pub usage_url: String,
    /// Assistant-response generation endpoint (binary event stream).
    pub generate_url: String,
    /// Profile ARN stamped into every generate payload.
    pub profile_arn: String,
}

impl Default for UpstreamEndpoints {
    fn default() -> Self {
        Self {
            refresh_url: "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken".to_string(),
            idc_token_url: "https://oidc.us-east-1.amazonaws.com/token".to_string(),
            usage_url: "https://codewhisperer.us-east-1.amazonaws.com/getUsageLimits".to_string(),
            generate_url: "https://codewhisperer.us-east-1.amazonaws.com/generateAssistantResponse"
                .to_string(),
            profile_arn: "arn:aws:codewhisperer:us-east-1:699475941385:profile/EHGA3GRVQMUK"
                .to_string(),
        }
    }
}

pub struct UpstreamClient {
    profiles: ClientProfiles,
    endpoints: UpstreamEndpoints,
}

impl UpstreamClient {
    pub fn new(profiles: ClientProfiles, endpoints: UpstreamEndpoints) -> Self {
        Self { profiles, endpoints }
    }

    pub fn endpoints(&self) -> &UpstreamEndpoints {
        &self.endpoints
    }

    pub fn metrics(&self) -> &crate::profiles::ProfileMetrics {
        &self.profiles.metrics
    }

    /// Send a generate request. The returned response body is the
    /// binary event stream for both streaming and buffered callers;
    /// the profile (and so the timeouts) differ.
    pub async fn generate(
        &self,
        req: &MessagesRequest,
        payload: &Value,
        access_token: &str,
    ) -> Result<reqwest::Response> {
        let (client, kind) = self.profiles.select(req);
        debug!(profile = kind.name(), model = %req.model, "sending upstream generate request");

        let started = Instant::now();
        let result = client
            .post(&self.endpoints.generate_url)
            .bearer_auth(access_token)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await;
        let latency = started.elapsed();

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.profiles.metrics.record(kind, false, latency);
                return Err(map_transport_error(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.profiles.metrics.record(kind, false, latency);
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "upstream generate error");
            return Err(BifrostError::UpstreamError {
                status: status.as_u16(),
                message: body,
            });
        }

        self.profiles.metrics.record(kind, true, latency);
        Ok(response)
    }

    async fn refresh_social(&self, credential: &Credential) -> Result<RefreshedToken> {
        let resp = self
            .profiles
            .simple()
            .post(&self.endpoints.refresh_url)
            .header("content-type", "application/json")
            .json(&serde_json::json!({ "refreshToken": credential.refresh_secret }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BifrostError::UpstreamError {
                status: status.as_u16(),
                message: format!("social refresh rejected: {body}"),
            });
        }

        let body: SocialRefreshResponse = resp
            .json()
            .await
            .map_err(|e| BifrostError::Internal(format!("refresh response parse: {e}")))?;
        Ok(RefreshedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        })
    }

    async fn refresh_idc(&self, credential: &Credential) -> Result<RefreshedToken> {
        let (Some(client_id), Some(client_secret)) =
            (&credential.client_id, &credential.client_secret)
        else {
            return Err(BifrostError::Config(format!(
                "IdC credential '{}' lost its client id/secret pair",
                credential.id
            )));
        };

        let form = format!(
            "grant_type=client_credentials&client_id={}&client_secret={}",
            urlencoding::encode(client_id),
            urlencoding::encode(client_secret),
        );
        let resp = self
            .profiles
            .simple()
            .post(&self.endpoints.idc_token_url)
            .header("content-type", "application/x-www-form-urlencoded")
            .header("accept", "application/json")
            .body(form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BifrostError::UpstreamError {
                status: status.as_u16(),
                message: format!("IdC token grant rejected: {body}"),
            });
        }

        let body: IdcTokenResponse = resp
            .json()
            .await
            .map_err(|e| BifrostError::Internal(format!("IdC token response parse: {e}")))?;
        Ok(RefreshedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        })
    }
}

#[async_trait]
impl AuthBackend for UpstreamClient {
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedToken> {
        match credential.kind {
            AuthKind::Social => self.refresh_social(credential).await,
            AuthKind::IdC => self.refresh_idc(credential).await,
        }
    }

    async fn poll_quota(&self, access_token: &str) -> Result<QuotaSnapshot> {
        let resp = self
            .profiles
            .simple()
            .get(&self.endpoints.usage_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BifrostError::UpstreamError {
                status: status.as_u16(),
                message: format!("usage poll rejected: {body}"),
            });
        }

        let body: UsageResponse = resp
            .json()
            .await
            .map_err(|e| BifrostError::Internal(format!("usage response parse: {e}")))?;
        Ok(QuotaSnapshot {
            limits: body.limits,
            owner_email: body.user_email,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> BifrostError {
    if e.is_timeout() || e.is_connect() {
        BifrostError::UpstreamUnavailable(e.to_string())
    } else {
        BifrostError::Internal(format!("upstream transport: {e}"))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialRefreshResponse {
    access_token: String,
    #[serde(default = "default_expiry_secs")]
    expires_in: i64,
}

#[derive(Deserialize)]
struct IdcTokenResponse {
    access_token: String,
    #[serde(default = "default_expiry_secs")]
    expires_in: i64,
}

fn default_expiry_secs() -> i64 {
    3600
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageResponse {
    #[serde(flatten)]
    limits: bifrost_pool::UsageLimits,
    #[serde(default)]
    user_email: Option<String>,
}
