//! Configuration for fcip, read from `fcip.toml`.
//!
//! Layering is file → environment → CLI. Every section has defaults, so the
//! file is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [storage]
//! backend = "sqlite"          # or "memory"
//! path = ".fcip/fcip.db"
//! seed_fixtures = true
//!
//! [dispatcher]
//! timeout_secs = 300
//! max_concurrent_engines = 4
//!
//! [engines.omission]
//! timeout_secs = 60
//!
//! [engines.bias]
//! command = "python3"
//! args = ["engines/bias.py"]
//!
//! [engines.temporal]
//! enabled = false
//!
//! [[phases.compound.engines]]
//! id = "compound"
//! required = true
//!
//! [audit]
//! max_quote_chars = 500
//!
//! [compound]
//! laundering_threshold = 0.6
//!
//! [logging]
//! level = "info"
//! format = "pretty"           # or "json"
//! file = ".fcip/logs/fcip.log"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::EngineId;
use crate::engine::builtin::{BuiltinSettings, DEFAULT_LAUNDERING_THRESHOLD};
use crate::engine::dispatcher::DispatcherConfig;
use crate::sam::SamPhase;
use crate::storage::StorageBackend;

/// File name looked up in the working directory and the user config dir.
pub const CONFIG_FILE: &str = "fcip.toml";

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file for the sqlite backend.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Load the development fixture case on startup.
    #[serde(default = "default_true")]
    pub seed_fixtures: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".fcip/fcip.db")
}

fn default_true() -> bool {
    true
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            seed_fixtures: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSection {
    /// Default per-engine timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Engines of one phase allowed to run at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_engines: usize,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_concurrent_engines: default_max_concurrent(),
        }
    }
}

/// Per-engine settings under `[engines.<id>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Run the engine as an external process instead of the built-in.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Minimum document count declared for a process engine.
    #[serde(default)]
    pub min_documents: Option<usize>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            command: None,
            args: Vec::new(),
            working_dir: None,
            min_documents: None,
            enabled: true,
        }
    }
}

/// One engine scheduled in a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEngine {
    pub id: String,
    /// A failure of a required engine fails the run.
    #[serde(default)]
    pub required: bool,
}

impl PhaseEngine {
    fn new(id: EngineId, required: bool) -> Self {
        Self {
            id: id.as_str().to_string(),
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSection {
    pub engines: Vec<PhaseEngine>,
}

fn default_anchor() -> PhaseSection {
    PhaseSection {
        engines: vec![
            PhaseEngine::new(EngineId::Anchor, true),
            PhaseEngine::new(EngineId::Contradiction, false),
        ],
    }
}

fn default_inherit() -> PhaseSection {
    PhaseSection {
        engines: vec![
            PhaseEngine::new(EngineId::Inherit, true),
            PhaseEngine::new(EngineId::Omission, false),
            PhaseEngine::new(EngineId::Coordination, false),
        ],
    }
}

fn default_compound() -> PhaseSection {
    PhaseSection {
        engines: vec![
            PhaseEngine::new(EngineId::Compound, true),
            PhaseEngine::new(EngineId::Bias, false),
        ],
    }
}

fn default_arrive() -> PhaseSection {
    PhaseSection {
        engines: vec![
            PhaseEngine::new(EngineId::Arrive, true),
            PhaseEngine::new(EngineId::Temporal, false),
        ],
    }
}

/// Engines run in each S.A.M. phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasesSection {
    #[serde(default = "default_anchor")]
    pub anchor: PhaseSection,
    #[serde(default = "default_inherit")]
    pub inherit: PhaseSection,
    #[serde(default = "default_compound")]
    pub compound: PhaseSection,
    #[serde(default = "default_arrive")]
    pub arrive: PhaseSection,
}

impl Default for PhasesSection {
    fn default() -> Self {
        Self {
            anchor: default_anchor(),
            inherit: default_inherit(),
            compound: default_compound(),
            arrive: default_arrive(),
        }
    }
}

impl PhasesSection {
    pub fn get(&self, phase: SamPhase) -> &PhaseSection {
        match phase {
            SamPhase::Anchor => &self.anchor,
            SamPhase::Inherit => &self.inherit,
            SamPhase::Compound => &self.compound,
            SamPhase::Arrive => &self.arrive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    /// Longest quote kept in an audit trail step.
    #[serde(default = "default_max_quote_chars")]
    pub max_quote_chars: usize,
}

fn default_max_quote_chars() -> usize {
    500
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            max_quote_chars: default_max_quote_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundSection {
    #[serde(default = "default_laundering_threshold")]
    pub laundering_threshold: f64,
}

fn default_laundering_threshold() -> f64 {
    DEFAULT_LAUNDERING_THRESHOLD
}

impl Default for CompoundSection {
    fn default() -> Self {
        Self {
            laundering_threshold: default_laundering_threshold(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when neither `FCIP_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write logs to this file, rotated daily.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Parsed `fcip.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FcipToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub engines: BTreeMap<String, EngineSection>,
    #[serde(default)]
    pub phases: PhasesSection,
    #[serde(default)]
    pub audit: AuditSection,
    #[serde(default)]
    pub compound: CompoundSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl FcipToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse fcip.toml")
    }

    /// Load `path` if it exists, else defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize fcip.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Settings for one engine, defaulted when absent.
    pub fn engine(&self, id: EngineId) -> EngineSection {
        self.engines.get(id.as_str()).cloned().unwrap_or_default()
    }

    /// Timeout for an engine: its own override, else the dispatcher default.
    pub fn engine_timeout(&self, id: EngineId) -> Duration {
        Duration::from_secs(
            self.engine(id)
                .timeout_secs
                .unwrap_or(self.dispatcher.timeout_secs),
        )
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let mut config =
            DispatcherConfig::default().with_timeout(Duration::from_secs(self.dispatcher.timeout_secs));
        for id in EngineId::ALL {
            if let Some(secs) = self.engine(id).timeout_secs {
                config = config.with_engine_timeout(id, Duration::from_secs(secs));
            }
        }
        config
    }

    pub fn builtin_settings(&self) -> BuiltinSettings {
        BuiltinSettings {
            laundering_threshold: self.compound.laundering_threshold,
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for name in self.engines.keys() {
            if name.parse::<EngineId>().is_err() {
                warnings.push(format!("Unknown engine '{}' in [engines]", name));
            }
        }
        for (name, section) in &self.engines {
            if let Some(cmd) = &section.command
                && cmd.trim().is_empty()
            {
                warnings.push(format!("Empty command for engine '{}'", name));
            }
            if section.timeout_secs == Some(0) {
                warnings.push(format!("timeout_secs for engine '{}' must be positive", name));
            }
        }
        if self.dispatcher.timeout_secs == 0 {
            warnings.push("dispatcher.timeout_secs must be positive".to_string());
        }
        if self.dispatcher.max_concurrent_engines == 0 {
            warnings.push("dispatcher.max_concurrent_engines must be at least 1".to_string());
        }

        for phase in SamPhase::ALL {
            let section = self.phases.get(phase);
            if !section.engines.iter().any(|e| e.required) {
                warnings.push(format!("Phase '{}' has no required engine", phase));
            }
            for entry in &section.engines {
                match entry.id.parse::<EngineId>() {
                    Err(_) => warnings.push(format!(
                        "Unknown engine '{}' in phase '{}'",
                        entry.id, phase
                    )),
                    Ok(id) if !self.engine(id).enabled => warnings.push(format!(
                        "Engine '{}' is scheduled in phase '{}' but disabled",
                        entry.id, phase
                    )),
                    Ok(_) => {}
                }
            }
        }

        if !(0.0..=1.0).contains(&self.compound.laundering_threshold) {
            warnings.push(format!(
                "compound.laundering_threshold {} is outside 0.0..=1.0",
                self.compound.laundering_threshold
            ));
        }
        if self.audit.max_quote_chars < 20 {
            warnings.push(format!(
                "audit.max_quote_chars {} is too small to hold a citation",
                self.audit.max_quote_chars
            ));
        }
        warnings
    }
}

/// CLI flags that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub storage: Option<StorageBackend>,
    pub db_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub log_format: Option<LogFormat>,
    pub verbose: bool,
}

/// Resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct FcipConfig {
    /// File the settings were read from, if any.
    pub source: Option<PathBuf>,
    pub toml: FcipToml,
    pub verbose: bool,
}

impl FcipConfig {
    /// Locate and read the configuration file.
    ///
    /// An explicit path must exist. Otherwise `./fcip.toml` is tried, then
    /// `<config dir>/fcip/fcip.toml`, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self {
                source: Some(path.to_path_buf()),
                toml: FcipToml::load(path)?,
                verbose: false,
            });
        }
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("fcip").join(CONFIG_FILE)),
        ];
        for path in candidates.into_iter().flatten() {
            if path.exists() {
                return Ok(Self {
                    toml: FcipToml::load(&path)?,
                    source: Some(path),
                    verbose: false,
                });
            }
        }
        Ok(Self::default())
    }

    /// Full layering: file, then `FCIP_*` variables, then CLI flags.
    pub fn load(explicit: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let mut config = Self::discover(explicit)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Apply environment overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = var("FCIP_STORAGE") {
            self.toml.storage.backend = backend.parse()?;
        }
        if let Some(path) = var("FCIP_DB_PATH") {
            self.toml.storage.path = PathBuf::from(path);
        }
        if let Some(seed) = var("FCIP_SEED_FIXTURES") {
            self.toml.storage.seed_fixtures = seed != "false" && seed != "0";
        }
        if let Some(secs) = var("FCIP_TIMEOUT_SECS") {
            self.toml.dispatcher.timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid FCIP_TIMEOUT_SECS '{}'", secs))?;
        }
        if let Some(n) = var("FCIP_MAX_CONCURRENT") {
            self.toml.dispatcher.max_concurrent_engines = n
                .parse()
                .with_context(|| format!("Invalid FCIP_MAX_CONCURRENT '{}'", n))?;
        }
        if let Some(format) = var("FCIP_LOG_FORMAT") {
            self.toml.logging.format = format.parse()?;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(backend) = cli.storage {
            self.toml.storage.backend = backend;
        }
        if let Some(path) = &cli.db_path {
            self.toml.storage.path = path.clone();
        }
        if let Some(secs) = cli.timeout_secs {
            self.toml.dispatcher.timeout_secs = secs;
        }
        if let Some(format) = cli.log_format {
            self.toml.logging.format = format;
        }
        self.verbose = cli.verbose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    // =========================================
    // parsing
    // =========================================

    #[test]
    fn empty_file_gives_defaults() {
        let toml = FcipToml::parse("").unwrap();
        assert_eq!(toml.storage.backend, StorageBackend::Memory);
        assert_eq!(toml.dispatcher.timeout_secs, 300);
        assert_eq!(toml.audit.max_quote_chars, 500);
        assert_eq!(toml.compound.laundering_threshold, 0.6);
        assert_eq!(toml.phases, PhasesSection::default());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn engine_sections_and_phase_lists_parse() {
        let toml = FcipToml::parse(
            r#"
            [storage]
            backend = "sqlite"
            path = "/tmp/x.db"

            [engines.omission]
            timeout_secs = 5

            [engines.bias]
            command = "python3"
            args = ["bias.py"]

            [[phases.arrive.engines]]
            id = "arrive"
            required = true
            "#,
        )
        .unwrap();
        assert_eq!(toml.storage.backend, StorageBackend::Sqlite);
        assert_eq!(toml.engine_timeout(EngineId::Omission), Duration::from_secs(5));
        assert_eq!(toml.engine_timeout(EngineId::Bias), Duration::from_secs(300));
        assert_eq!(toml.engine(EngineId::Bias).command.as_deref(), Some("python3"));
        assert_eq!(toml.phases.arrive.engines.len(), 1);
        assert_eq!(toml.phases.anchor, default_anchor());
    }

    #[test]
    fn invalid_backend_is_a_parse_error() {
        assert!(FcipToml::parse("[storage]\nbackend = \"postgres\"").is_err());
    }

    // =========================================
    // validation
    // =========================================

    #[test]
    fn validate_flags_unknown_and_disabled_engines() {
        let toml = FcipToml::parse(
            r#"
            [engines.astrology]
            timeout_secs = 1

            [engines.contradiction]
            enabled = false

            [[phases.compound.engines]]
            id = "bias"
            "#,
        )
        .unwrap();
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("astrology")));
        assert!(warnings.iter().any(|w| w.contains("disabled")));
        assert!(warnings.iter().any(|w| w.contains("no required engine")));
    }

    // =========================================
    // layering
    // =========================================

    #[test]
    fn env_then_cli_override_file() {
        let mut config = FcipConfig::default();
        let env: HashMap<&str, &str> = [
            ("FCIP_STORAGE", "sqlite"),
            ("FCIP_TIMEOUT_SECS", "30"),
            ("FCIP_SEED_FIXTURES", "false"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.toml.storage.backend, StorageBackend::Sqlite);
        assert!(!config.toml.storage.seed_fixtures);

        config.apply_cli(&CliOverrides {
            timeout_secs: Some(7),
            storage: Some(StorageBackend::Memory),
            ..Default::default()
        });
        assert_eq!(config.toml.dispatcher.timeout_secs, 7);
        assert_eq!(config.toml.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = FcipConfig::default();
        let result = config.apply_env(|k| (k == "FCIP_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("fcip.toml");
        let mut toml = FcipToml::default();
        toml.compound.laundering_threshold = 0.75;
        toml.save(&path).unwrap();

        let loaded = FcipToml::load_or_default(&path).unwrap();
        assert_eq!(loaded.compound.laundering_threshold, 0.75);

        let missing = FcipToml::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(missing.compound.laundering_threshold, 0.6);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(FcipConfig::discover(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
