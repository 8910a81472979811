use crate::payments::error::PaymentResult;
use crate::payments::provider::PspProvider;
use crate::payments::providers::{DemoProvider, MtnProvider, OgateProvider};
use crate::payments::types::{NetworkCode, ProviderName};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PspRegistryConfig {
    pub default_provider: ProviderName,
    pub demo_enabled: bool,
}

impl Default for PspRegistryConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderName::Ogate,
            demo_enabled: true,
        }
    }
}

impl PspRegistryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_provider = std::env::var("DEFAULT_PSP").unwrap_or_else(|_| "ogate".to_string());
        let default_provider = ProviderName::from_str(&default_provider)?;
        let demo_enabled = std::env::var("DEMO_PSP_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);
        Ok(Self {
            default_provider,
            demo_enabled,
        })
    }
}

/// Table of configured providers, built once at startup and shared by `Arc`.
/// Registration order is preserved and defines "first available".
pub struct PspRegistry {
    providers: Vec<(ProviderName, Arc<dyn PspProvider>)>,
    default_provider: ProviderName,
    fallback: Arc<dyn PspProvider>,
}

impl PspRegistry {
    pub fn new(default_provider: ProviderName) -> Self {
        Self {
            providers: Vec::new(),
            default_provider,
            fallback: Arc::new(DemoProvider::default()),
        }
    }

    /// Registers every provider whose credentials are present in the environment.
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self::with_config(PspRegistryConfig::from_env()?))
    }

    pub fn with_config(config: PspRegistryConfig) -> Self {
        let mut registry = Self::new(config.default_provider);

        match OgateProvider::from_env() {
            Ok(provider) => registry.register(Arc::new(provider)),
            Err(e) => info!(reason = %e, "ogate provider not registered"),
        }
        match MtnProvider::from_env() {
            Ok(provider) => registry.register(Arc::new(provider)),
            Err(e) => info!(reason = %e, "mtn provider not registered"),
        }
        if config.demo_enabled {
            registry.register(Arc::new(DemoProvider::from_env()));
        }

        info!(
            providers = ?registry.available(),
            default_provider = %registry.default_provider,
            "psp registry initialised"
        );
        registry
    }

    /// Adds a provider, replacing any earlier registration under the same name.
    pub fn register(&mut self, provider: Arc<dyn PspProvider>) {
        let name = provider.name();
        if let Some(slot) = self.providers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = provider;
        } else {
            self.providers.push((name, provider));
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn PspProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &ProviderName) -> Option<Arc<dyn PspProvider>> {
        self.providers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| Arc::clone(p))
    }

    /// Registered provider, or the built-in no-op demo when `name` is absent.
    pub fn resolve(&self, name: &ProviderName) -> Arc<dyn PspProvider> {
        self.get(name).unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Provider able to answer for a collection taken under `name`. The
    /// built-in demo answers for itself; any other unregistered name has no
    /// provider, so nothing can vouch for its collections.
    pub fn lookup(&self, name: &ProviderName) -> Option<Arc<dyn PspProvider>> {
        self.get(name).or_else(|| {
            (*name == ProviderName::Demo).then(|| Arc::clone(&self.fallback))
        })
    }

    pub fn contains(&self, name: &ProviderName) -> bool {
        self.providers.iter().any(|(n, _)| n == name)
    }

    pub fn available(&self) -> Vec<ProviderName> {
        self.providers.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn default_provider(&self) -> &ProviderName {
        &self.default_provider
    }

    pub fn select_for_network(&self, network: &NetworkCode) -> ProviderName {
        select_provider(&self.available(), network)
    }
}

/// Picks a provider for a payer network from the registered set:
/// the network's direct integration, then the aggregator, then the first
/// registered provider, then demo.
pub fn select_provider(available: &[ProviderName], network: &NetworkCode) -> ProviderName {
    let preferred: &[ProviderName] = match network {
        NetworkCode::Mtn => &[ProviderName::Mtn, ProviderName::Ogate],
        NetworkCode::Vodafone => &[ProviderName::Vodafone, ProviderName::Ogate],
        NetworkCode::AirtelTigo => &[ProviderName::Ogate],
        NetworkCode::Other(_) => &[],
    };

    preferred
        .iter()
        .find(|candidate| available.contains(*candidate))
        .or_else(|| available.first())
        .cloned()
        .unwrap_or(ProviderName::Demo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::mtn::MtnConfig;

    fn subsets(all: &[ProviderName]) -> Vec<Vec<ProviderName>> {
        (0..(1u32 << all.len()))
            .map(|mask| {
                all.iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1u32 << *i) != 0)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .collect()
    }

    fn expected(available: &[ProviderName], network: &NetworkCode) -> ProviderName {
        let has = |p: ProviderName| available.contains(&p);
        let first = || available.first().cloned().unwrap_or(ProviderName::Demo);
        match network {
            NetworkCode::Mtn if has(ProviderName::Mtn) => ProviderName::Mtn,
            NetworkCode::Mtn if has(ProviderName::Ogate) => ProviderName::Ogate,
            NetworkCode::Vodafone if has(ProviderName::Vodafone) => ProviderName::Vodafone,
            NetworkCode::Vodafone if has(ProviderName::Ogate) => ProviderName::Ogate,
            NetworkCode::AirtelTigo if has(ProviderName::Ogate) => ProviderName::Ogate,
            _ => first(),
        }
    }

    #[test]
    fn selection_is_deterministic_for_every_registration_subset() {
        let all = [
            ProviderName::Ogate,
            ProviderName::Mtn,
            ProviderName::Vodafone,
            ProviderName::Demo,
        ];
        let networks = [
            NetworkCode::Mtn,
            NetworkCode::Vodafone,
            NetworkCode::AirtelTigo,
            NetworkCode::Other("MPESA".to_string()),
        ];

        for available in subsets(&all) {
            for network in &networks {
                let first = select_provider(&available, network);
                let second = select_provider(&available, network);
                assert_eq!(first, second);
                assert_eq!(
                    first,
                    expected(&available, network),
                    "network={} available={:?}",
                    network,
                    available
                );
            }
        }
    }

    #[test]
    fn empty_registry_falls_back_to_demo() {
        assert_eq!(select_provider(&[], &NetworkCode::Mtn), ProviderName::Demo);
        assert_eq!(
            select_provider(&[], &NetworkCode::Other("X".to_string())),
            ProviderName::Demo
        );
    }

    #[test]
    fn airteltigo_skips_direct_providers() {
        let available = [ProviderName::Mtn, ProviderName::Vodafone];
        assert_eq!(
            select_provider(&available, &NetworkCode::AirtelTigo),
            ProviderName::Mtn
        );
    }

    #[test]
    fn register_replaces_same_name_and_keeps_order() {
        let registry = PspRegistry::new(ProviderName::Ogate)
            .with_provider(Arc::new(DemoProvider::new("a")))
            .with_provider(Arc::new(DemoProvider::new("b")));
        assert_eq!(registry.available(), vec![ProviderName::Demo]);
        assert!(registry.contains(&ProviderName::Demo));
        assert!(registry.get(&ProviderName::Ogate).is_none());
    }

    #[test]
    fn resolve_falls_back_to_demo_when_unregistered() {
        let registry = PspRegistry::new(ProviderName::Ogate);
        assert_eq!(registry.resolve(&ProviderName::Ogate).name(), ProviderName::Demo);
        let selected = registry.select_for_network(&NetworkCode::Mtn);
        assert_eq!(selected, ProviderName::Demo);
        assert_eq!(registry.resolve(&selected).name(), ProviderName::Demo);
    }

    #[test]
    fn lookup_never_substitutes_for_a_real_provider() {
        let registry = PspRegistry::new(ProviderName::Ogate)
            .with_provider(Arc::new(MtnProvider::new(MtnConfig {
                api_key: "key".to_string(),
                user_id: "user".to_string(),
                subscription_key: None,
                base_url: "http://localhost".to_string(),
            })));
        assert!(registry.lookup(&ProviderName::Ogate).is_none());
        assert!(registry.lookup(&ProviderName::Vodafone).is_none());
        assert_eq!(
            registry.lookup(&ProviderName::Mtn).map(|p| p.name()),
            Some(ProviderName::Mtn)
        );
        assert_eq!(
            registry.lookup(&ProviderName::Demo).map(|p| p.name()),
            Some(ProviderName::Demo)
        );
    }
}
