use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::{
    AsaasClient, GatewayClient, GatewayError, GatewayId, MercadoPagoClient, PagBankClient,
    PagarmeClient,
};
use crate::config::Config;

/// The set of gateway clients a process can sync from.
///
/// A gateway can be registered but disabled; disabled gateways stay visible
/// so a sync request for them reports "not configured" instead of "unknown".
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    clients: HashMap<GatewayId, Arc<dyn GatewayClient>>,
    enabled: HashSet<GatewayId>,
}

impl GatewayRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one client per gateway from configuration.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.sync.timeout_seconds);
        let page_size = config.sync.page_size;
        let mut registry = Self::new();

        for gateway in GatewayId::ALL {
            let settings = config.gateways.get(gateway);
            let api_key = settings.api_key.clone();
            let base_url = settings.base_url.clone();
            let client: Arc<dyn GatewayClient> = match gateway {
                GatewayId::Asaas => Arc::new(AsaasClient::new(
                    api_key,
                    base_url,
                    settings.sandbox,
                    page_size,
                    timeout,
                )?),
                GatewayId::PagBank => Arc::new(PagBankClient::new(
                    api_key,
                    base_url,
                    settings.sandbox,
                    page_size,
                    timeout,
                )?),
                GatewayId::MercadoPago => {
                    Arc::new(MercadoPagoClient::new(api_key, base_url, page_size, timeout)?)
                }
                GatewayId::Pagarme => {
                    Arc::new(PagarmeClient::new(api_key, base_url, page_size, timeout)?)
                }
            };
            registry.register(client, settings.enabled);
        }

        tracing::info!(
            target: "gatesync::gateway",
            enabled = ?registry.enabled_gateways(),
            "Gateway registry ready"
        );
        Ok(registry)
    }

    /// Add or replace the client for its gateway.
    pub fn register(&mut self, client: Arc<dyn GatewayClient>, enabled: bool) {
        let gateway = client.gateway();
        self.clients.insert(gateway, client);
        if enabled {
            self.enabled.insert(gateway);
        } else {
            self.enabled.remove(&gateway);
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn GatewayClient>, enabled: bool) -> Self {
        self.register(client, enabled);
        self
    }

    pub fn get(&self, gateway: GatewayId) -> Option<Arc<dyn GatewayClient>> {
        self.clients.get(&gateway).cloned()
    }

    pub fn is_enabled(&self, gateway: GatewayId) -> bool {
        self.enabled.contains(&gateway)
    }

    pub fn enabled_gateways(&self) -> Vec<GatewayId> {
        let mut gateways: Vec<_> = self.enabled.iter().copied().collect();
        gateways.sort();
        gateways
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self.clients.keys().copied().collect();
        registered.sort();
        f.debug_struct("GatewayRegistry")
            .field("registered", &registered)
            .field("enabled", &self.enabled_gateways())
            .finish()
    }
}
