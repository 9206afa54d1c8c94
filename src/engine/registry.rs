//! Engine registry: a static id → executor table.
//!
//! The registry is assembled once through [`RegistryBuilder`] and handed out
//! as an `Arc<EngineRegistry>`; nothing can be registered afterwards.
//!
//! ```
//! use fcip::engine::{EngineId, EngineRegistry};
//!
//! let registry = EngineRegistry::builder().with_builtins().build();
//! assert!(registry.get(EngineId::Omission).is_some());
//! assert!(registry.resolve("astrology").is_err());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::builtin;
use super::process::ProcessEngine;
use super::{AnalysisEngine, EngineId, InputRequirements};
use crate::errors::EngineError;
use crate::fcip_config::FcipToml;

/// Where an engine implementation comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineSource {
    Builtin,
    Process { command: String },
    Custom,
}

/// A registered engine. Immutable after registration.
#[derive(Clone)]
pub struct RegisteredEngine {
    pub id: EngineId,
    pub executor: Arc<dyn AnalysisEngine>,
    pub requirements: InputRequirements,
    pub source: EngineSource,
}

impl std::fmt::Debug for RegisteredEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEngine")
            .field("id", &self.id)
            .field("requirements", &self.requirements)
            .field("source", &self.source)
            .finish()
    }
}

/// Read-only engine table.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<EngineId, RegisteredEngine>,
}

impl EngineRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, id: EngineId) -> Option<&RegisteredEngine> {
        self.engines.get(&id)
    }

    /// Resolve a wire engine id. Unknown or unregistered ids are errors.
    pub fn resolve(&self, raw: &str) -> Result<&RegisteredEngine, EngineError> {
        let id: EngineId = raw.parse()?;
        self.get(id).ok_or_else(|| EngineError::UnknownEngine {
            engine_id: raw.to_string(),
        })
    }

    /// Registered engines in id order.
    pub fn engines(&self) -> impl Iterator<Item = &RegisteredEngine> {
        self.engines.values()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Collects registrations before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    engines: BTreeMap<EngineId, RegisteredEngine>,
}

impl RegistryBuilder {
    /// Register (or replace) the executor for `id`.
    pub fn register(self, id: EngineId, executor: Arc<dyn AnalysisEngine>) -> Self {
        self.register_with_source(id, executor, EngineSource::Custom)
    }

    fn register_with_source(
        mut self,
        id: EngineId,
        executor: Arc<dyn AnalysisEngine>,
        source: EngineSource,
    ) -> Self {
        let requirements = executor.requirements();
        self.engines.insert(
            id,
            RegisteredEngine {
                id,
                executor,
                requirements,
                source,
            },
        );
        self
    }

    /// Register every built-in reference engine.
    pub fn with_builtins(self) -> Self {
        self.with_builtins_configured(builtin::BuiltinSettings::default())
    }

    /// Register built-ins with explicit settings.
    pub fn with_builtins_configured(mut self, settings: builtin::BuiltinSettings) -> Self {
        for id in EngineId::ALL {
            self = self.register_with_source(id, builtin::engine_for(id, &settings), EngineSource::Builtin);
        }
        self
    }

    /// Bind `id` to an external process, replacing any earlier registration.
    pub fn with_process(self, id: EngineId, engine: ProcessEngine) -> Self {
        let command = engine.command_line();
        self.register_with_source(id, Arc::new(engine), EngineSource::Process { command })
    }

    /// Drop a registration (used for engines disabled in configuration).
    pub fn without(mut self, id: EngineId) -> Self {
        self.engines.remove(&id);
        self
    }

    /// Built-ins plus the `[engines.<id>]` overrides of a configuration:
    /// disabled engines are left out and engines with a `command` run as
    /// external processes.
    pub fn from_config(toml: &FcipToml) -> Self {
        let settings = toml.builtin_settings();
        let mut builder = Self::default().with_builtins_configured(settings);
        for id in EngineId::ALL {
            let section = toml.engine(id);
            if !section.enabled {
                builder = builder.without(id);
                continue;
            }
            if let Some(command) = &section.command {
                let min_documents = section.min_documents.unwrap_or_else(|| {
                    builtin::engine_for(id, &settings).requirements().min_documents
                });
                let mut engine = ProcessEngine::new(command)
                    .with_args(section.args.clone())
                    .with_min_documents(min_documents);
                if let Some(dir) = &section.working_dir {
                    engine = engine.with_working_dir(dir.clone());
                }
                builder = builder.with_process(id, engine);
            }
        }
        builder
    }

    pub fn build(self) -> Arc<EngineRegistry> {
        Arc::new(EngineRegistry {
            engines: self.engines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineContext;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl AnalysisEngine for Fixed {
        fn requirements(&self) -> InputRequirements {
            InputRequirements::min_documents(3)
        }

        async fn analyze(&self, _ctx: &EngineContext) -> Result<serde_json::Value, EngineError> {
            Ok(serde_json::json!([]))
        }
    }

    #[test]
    fn builtins_cover_every_engine_id() {
        let registry = EngineRegistry::builder().with_builtins().build();
        assert_eq!(registry.len(), EngineId::ALL.len());
        assert!(
            registry
                .engines()
                .all(|e| e.source == EngineSource::Builtin)
        );
    }

    #[test]
    fn custom_registration_replaces_builtin_and_captures_requirements() {
        let registry = EngineRegistry::builder()
            .with_builtins()
            .register(EngineId::Anchor, Arc::new(Fixed))
            .build();
        let anchor = registry.get(EngineId::Anchor).unwrap();
        assert_eq!(anchor.source, EngineSource::Custom);
        assert_eq!(anchor.requirements.min_documents, 3);
    }

    #[test]
    fn unregistered_engine_resolves_as_unknown() {
        let registry = EngineRegistry::builder()
            .register(EngineId::Bias, Arc::new(Fixed))
            .build();
        let err = registry.resolve("omission").unwrap_err();
        assert_eq!(err.to_string(), "Unknown engine: omission");
        assert!(registry.resolve("bias").is_ok());
    }

    #[test]
    fn without_removes_a_registration() {
        let registry = EngineRegistry::builder()
            .with_builtins()
            .without(EngineId::Temporal)
            .build();
        assert!(registry.get(EngineId::Temporal).is_none());
    }

    #[test]
    fn config_disables_and_rebinds_engines() {
        let toml = FcipToml::parse(
            r#"
            [engines.temporal]
            enabled = false

            [engines.omission]
            command = "/usr/local/bin/omission-engine"
            args = ["--strict"]
            "#,
        )
        .unwrap();
        let registry = RegistryBuilder::from_config(&toml).build();
        assert!(registry.get(EngineId::Temporal).is_none());

        let omission = registry.get(EngineId::Omission).unwrap();
        assert_eq!(
            omission.source,
            EngineSource::Process {
                command: "/usr/local/bin/omission-engine --strict".to_string()
            }
        );
        assert_eq!(omission.requirements.min_documents, 2);
        assert_eq!(registry.get(EngineId::Bias).unwrap().source, EngineSource::Builtin);
    }
}
