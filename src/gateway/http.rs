//! Shared HTTP transport for the gateway adapters.
//!
//! Handles credentials, base URLs and status mapping. Retries are not done
//! here; the sync orchestrator owns the retry loop so one policy covers
//! every gateway.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

use super::{GatewayError, GatewayId};

/// How a gateway expects the API key to be presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// Key in a custom header (Asaas uses `access_token`).
    Header(&'static str),
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// HTTP Basic with the key as username and an empty password.
    BasicKeyAsUser,
}

/// Thin wrapper around `reqwest::Client` for one gateway.
#[derive(Clone)]
pub struct GatewayHttp {
    gateway: GatewayId,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    auth: AuthScheme,
}

impl GatewayHttp {
    pub fn new(
        gateway: GatewayId,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        auth: AuthScheme,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gatesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::unavailable(gateway, format!("http client: {}", e)))?;

        Ok(Self {
            gateway,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.expose_secret().trim().is_empty()),
            auth,
        })
    }

    pub fn gateway(&self) -> GatewayId {
        self.gateway
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// GET `path` with `query` and decode the body as JSON.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, GatewayError> {
        let Some(api_key) = &self.api_key else {
            return Err(GatewayError::NotConfigured {
                gateway: self.gateway,
            });
        };

        let url = format!("{}{}", self.base_url, path);
        let request = self.client.get(&url).query(query);
        let request = match self.auth {
            AuthScheme::Header(name) => request.header(name, api_key.expose_secret()),
            AuthScheme::Bearer => request.bearer_auth(api_key.expose_secret()),
            AuthScheme::BasicKeyAsUser => request.basic_auth(api_key.expose_secret(), Some("")),
        };

        tracing::debug!(
            target: "gatesync::gateway",
            gateway = %self.gateway,
            path = path,
            "Fetching gateway page"
        );

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(self.gateway, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(map_status(self.gateway, status, retry_after));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::invalid_response(self.gateway, e.to_string()))
    }
}

impl std::fmt::Debug for GatewayHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHttp")
            .field("gateway", &self.gateway)
            .field("base_url", &self.base_url)
            .field("has_credentials", &self.has_credentials())
            .finish_non_exhaustive()
    }
}

/// Map a non-success status to the gateway error taxonomy.
pub(crate) fn map_status(
    gateway: GatewayId,
    status: StatusCode,
    retry_after: Option<Duration>,
) -> GatewayError {
    match status.as_u16() {
        401 | 403 => GatewayError::Auth {
            gateway,
            http_status: status.as_u16(),
        },
        429 => GatewayError::RateLimited {
            gateway,
            retry_after,
        },
        408 | 500..=599 => GatewayError::unavailable(gateway, format!("HTTP {}", status.as_u16())),
        code => GatewayError::invalid_response(gateway, format!("unexpected HTTP {}", code)),
    }
}

fn map_transport_error(gateway: GatewayId, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::unavailable(gateway, "request timed out")
    } else if err.is_connect() {
        GatewayError::unavailable(gateway, "connection failed")
    } else if let Some(status) = err.status() {
        map_status(gateway, status, None)
    } else {
        GatewayError::unavailable(gateway, err.to_string())
    }
}
