use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;

use super::{
    Metadata, Notifier, NotifierConfig, NotifierDeps, ReceiverConfig, TypedIntegration, Vendor,
};
use crate::config::{ApiReceiver, IntegrationConfig};
use crate::error::{ConfigError, IntegrationValidationError};
use crate::secrets::{DecodeSecretsFn, Decrypter, GetDecryptedValueFn};

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::builtin()));

/// Parsed vendor settings with their concrete type erased.
pub trait TypedSettings: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    /// Canonical JSON form of the validated settings.
    fn to_json(&self) -> serde_json::Value;
}

impl<T> TypedSettings for T
where
    T: Any + Debug + Serialize + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Object safe view of one registered vendor: parse + construct.
pub trait IntegrationPlugin: Send + Sync {
    fn integration_type(&self) -> &'static str;

    fn secret_keys(&self) -> &'static [&'static str];

    fn parse(
        &self,
        settings: &serde_json::Value,
        decrypter: &Decrypter<'_>,
    ) -> Result<Arc<dyn TypedSettings>, ConfigError>;

    fn build(
        &self,
        meta: &Metadata,
        settings: &dyn TypedSettings,
        deps: &NotifierDeps,
    ) -> Result<Arc<dyn Notifier>, String>;
}

struct VendorPlugin<V>(PhantomData<fn() -> V>);

impl<V: Vendor> IntegrationPlugin for VendorPlugin<V> {
    fn integration_type(&self) -> &'static str {
        V::TYPE
    }

    fn secret_keys(&self) -> &'static [&'static str] {
        V::SECRET_KEYS
    }

    fn parse(
        &self,
        settings: &serde_json::Value,
        decrypter: &Decrypter<'_>,
    ) -> Result<Arc<dyn TypedSettings>, ConfigError> {
        let config = V::parse(settings, decrypter)?;
        Ok(Arc::new(config))
    }

    fn build(
        &self,
        meta: &Metadata,
        settings: &dyn TypedSettings,
        deps: &NotifierDeps,
    ) -> Result<Arc<dyn Notifier>, String> {
        let config = settings
            .as_any()
            .downcast_ref::<V::Config>()
            .ok_or_else(|| format!("settings are not a {} configuration", V::TYPE))?;
        V::build(meta, config, deps)
    }
}

/// Integration types known to this process, in declaration order.
pub struct Registry {
    plugins: Vec<Box<dyn IntegrationPlugin>>,
    by_type: HashMap<&'static str, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Registry holding every built-in vendor.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<super::alertmanager::Alertmanager>();
        registry.register::<super::discord::Discord>();
        registry.register::<super::email::Email>();
        registry.register::<super::googlechat::GoogleChat>();
        registry.register::<super::kafka::Kafka>();
        registry.register::<super::opsgenie::Opsgenie>();
        registry.register::<super::pagerduty::Pagerduty>();
        registry.register::<super::slack::Slack>();
        registry.register::<super::teams::Teams>();
        registry.register::<super::telegram::Telegram>();
        registry.register::<super::webhook::Webhook>();
        registry
    }

    /// Process-wide registry of the built-in vendors.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&DEFAULT_REGISTRY)
    }

    pub fn register<V: Vendor>(&mut self) {
        self.register_plugin(Box::new(VendorPlugin::<V>(PhantomData)));
    }

    /// Registering a type twice replaces the earlier plugin in place.
    pub fn register_plugin(&mut self, plugin: Box<dyn IntegrationPlugin>) {
        let ty = plugin.integration_type();
        match self.by_type.get(ty) {
            Some(&idx) => self.plugins[idx] = plugin,
            None => {
                self.by_type.insert(ty, self.plugins.len());
                self.plugins.push(plugin);
            }
        }
    }

    pub fn get(&self, integration_type: &str) -> Option<&dyn IntegrationPlugin> {
        self.by_type
            .get(integration_type.to_lowercase().as_str())
            .map(|&idx| self.plugins[idx].as_ref())
    }

    /// Registered types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|p| p.integration_type())
    }

    pub fn plugins(&self) -> impl Iterator<Item = &dyn IntegrationPlugin> {
        self.plugins.iter().map(|p| p.as_ref())
    }

    /// Validates `settings` for the given type, resolving secrets.
    pub fn parse(
        &self,
        integration_type: &str,
        settings: &serde_json::Value,
        secure_settings: &HashMap<String, String>,
        decode: DecodeSecretsFn,
        decrypt: &GetDecryptedValueFn,
    ) -> Result<Arc<dyn TypedSettings>, ConfigError> {
        let plugin = self
            .get(integration_type)
            .ok_or_else(|| ConfigError::Unsupported(integration_type.to_string()))?;
        let secure = decode(secure_settings)?;
        let decrypter = Decrypter::new(&secure, decrypt);
        plugin.parse(settings, &decrypter)
    }

    pub fn parse_integration(
        &self,
        config: &IntegrationConfig,
        decode: DecodeSecretsFn,
        decrypt: &GetDecryptedValueFn,
    ) -> Result<TypedIntegration, IntegrationValidationError> {
        let settings = self
            .parse(
                &config.integration_type,
                &config.settings,
                &config.secure_settings,
                decode,
                decrypt,
            )
            .map_err(|e| IntegrationValidationError::new(config, e))?;
        let canonical = self
            .get(&config.integration_type)
            .map(|p| p.integration_type())
            .unwrap_or_default();

        Ok(TypedIntegration {
            metadata: Metadata {
                uid: config.uid.clone(),
                name: config.name.clone(),
                integration_type: canonical.to_string(),
                disable_resolve_message: config.disable_resolve_message,
            },
            settings,
        })
    }

    /// Parses every integration of `receiver`. One invalid integration fails the receiver.
    pub fn build_receiver_configuration(
        &self,
        receiver: &ApiReceiver,
        decode: DecodeSecretsFn,
        decrypt: &GetDecryptedValueFn,
    ) -> Result<ReceiverConfig, IntegrationValidationError> {
        let mut integrations = Vec::with_capacity(receiver.integrations.len());
        for config in &receiver.integrations {
            integrations.push(self.parse_integration(config, decode, decrypt)?);
        }
        Ok(ReceiverConfig {
            name: receiver.name.clone(),
            integrations,
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ReceiverConfig {
    /// All configurations of vendor `V`, in declaration order.
    pub fn typed<V: Vendor>(&self) -> Vec<NotifierConfig<V::Config>> {
        self.integrations
            .iter()
            .filter(|i| i.metadata.integration_type == V::TYPE)
            .filter_map(|i| {
                i.settings
                    .as_any()
                    .downcast_ref::<V::Config>()
                    .map(|settings| NotifierConfig {
                        metadata: i.metadata.clone(),
                        settings: settings.clone(),
                    })
            })
            .collect()
    }
}
