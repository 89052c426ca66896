use std::sync::Arc;

use super::ratelimit::{LimitsSource, wrap_with_source};
use super::status::{Integration, NotificationHistorian, Receiver};
use crate::config::{ApiReceiver, IntegrationConfig};
use crate::error::{BuildError, BuildErrors, IntegrationValidationError};
use crate::integrations::{Metadata, Notifier, NotifierDeps, ReceiverConfig, Registry, TypedIntegration};
use crate::secrets::{DecodeSecretsFn, GetDecryptedValueFn, decode_secrets_from_base64, plaintext_decrypt};

/// Turns validated receiver configurations into live integrations.
pub struct IntegrationFactory {
    registry: Arc<Registry>,
    deps: NotifierDeps,
    limits: Option<Arc<dyn LimitsSource>>,
    historian: Option<Arc<dyn NotificationHistorian>>,
    decode: DecodeSecretsFn,
    decrypt: Arc<GetDecryptedValueFn>,
}

impl IntegrationFactory {
    pub fn new(registry: Arc<Registry>, deps: NotifierDeps) -> Self {
        Self {
            registry,
            deps,
            limits: None,
            historian: None,
            decode: decode_secrets_from_base64,
            decrypt: Arc::new(plaintext_decrypt),
        }
    }

    pub fn with_rate_limits(mut self, limits: Arc<dyn LimitsSource>) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_historian(mut self, historian: Arc<dyn NotificationHistorian>) -> Self {
        self.historian = Some(historian);
        self
    }

    /// Secret handling used when the factory parses raw configurations itself.
    pub fn with_secrets(mut self, decode: DecodeSecretsFn, decrypt: Arc<GetDecryptedValueFn>) -> Self {
        self.decode = decode;
        self.decrypt = decrypt;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parses one raw integration configuration.
    pub fn parse(&self, config: &IntegrationConfig) -> Result<TypedIntegration, IntegrationValidationError> {
        self.registry.parse_integration(config, self.decode, self.decrypt.as_ref())
    }

    /// Parses every integration of a receiver; the first invalid one fails it.
    pub fn parse_receiver(&self, receiver: &ApiReceiver) -> Result<ReceiverConfig, IntegrationValidationError> {
        self.registry
            .build_receiver_configuration(receiver, self.decode, self.decrypt.as_ref())
    }

    /// Builds the bare vendor notifier, without rate limiting or status tracking.
    pub fn build_notifier(&self, integration: &TypedIntegration) -> Result<Arc<dyn Notifier>, BuildError> {
        let meta = &integration.metadata;
        let plugin = self
            .registry
            .get(&meta.integration_type)
            .ok_or_else(|| build_error(meta, format!("notifier {} is not supported", meta.integration_type)))?;
        plugin
            .build(meta, integration.settings.as_ref(), &self.deps)
            .map_err(|reason| build_error(meta, reason))
    }

    /// Builds one fully wrapped integration. `name` overrides the default
    /// name, the vendor type.
    pub fn build_integration(
        &self,
        integration: &TypedIntegration,
        index: usize,
        name: Option<&str>,
    ) -> Result<Arc<Integration>, BuildError> {
        let meta = &integration.metadata;
        let mut notifier = self.build_notifier(integration)?;
        if let Some(limits) = &self.limits {
            notifier = wrap_with_source(notifier, meta, Arc::clone(limits));
        }

        let name = name.unwrap_or(meta.integration_type.as_str());
        let mut built = Integration::new(notifier, meta.clone(), name, index);
        if let Some(historian) = &self.historian {
            built = built.with_historian(Arc::clone(historian));
        }
        Ok(Arc::new(built))
    }

    /// Builds what it can and reports every failure.
    ///
    /// Types are visited in registry order and indices count per type, so
    /// the n-th integration of a type always gets index n.
    pub fn build_receiver_integrations_partial(
        &self,
        config: &ReceiverConfig,
    ) -> (Vec<Arc<Integration>>, Option<BuildErrors>) {
        let mut built = Vec::with_capacity(config.integrations.len());
        let mut errors = Vec::new();
        let mut visited = vec![false; config.integrations.len()];

        for ty in self.registry.types() {
            let of_type = config
                .integrations
                .iter()
                .enumerate()
                .filter(|(_, i)| i.metadata.integration_type.eq_ignore_ascii_case(ty));
            for (index, (pos, integration)) in of_type.enumerate() {
                visited[pos] = true;
                match self.build_integration(integration, index, None) {
                    Ok(i) => built.push(i),
                    Err(e) => {
                        tracing::warn!(receiver = %config.name, error = %e, "failed to build integration");
                        errors.push(e);
                    }
                }
            }
        }

        // Types the registry does not know are never matched above.
        for (integration, _) in config.integrations.iter().zip(&visited).filter(|(_, seen)| !**seen) {
            let meta = &integration.metadata;
            let e = build_error(meta, format!("notifier {} is not supported", meta.integration_type));
            tracing::warn!(receiver = %config.name, error = %e, "failed to build integration");
            errors.push(e);
        }

        let errors = (!errors.is_empty()).then_some(BuildErrors(errors));
        (built, errors)
    }

    /// Builds every integration of `config`; any failure fails the receiver.
    pub fn build_receiver_integrations(
        &self,
        config: &ReceiverConfig,
    ) -> Result<Vec<Arc<Integration>>, BuildErrors> {
        match self.build_receiver_integrations_partial(config) {
            (built, None) => Ok(built),
            (_, Some(errors)) => Err(errors),
        }
    }

    pub fn build_receiver(&self, config: &ReceiverConfig) -> Result<Receiver, BuildErrors> {
        let integrations = self.build_receiver_integrations(config)?;
        Ok(Receiver::new(config.name.clone(), integrations))
    }
}

fn build_error(meta: &Metadata, reason: String) -> BuildError {
    BuildError {
        uid: meta.uid.clone(),
        name: meta.name.clone(),
        integration_type: meta.integration_type.clone(),
        reason,
    }
}
