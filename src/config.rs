/*
    User configuration.
    A single TOML file in the platform config directory. Every section has
    defaults, so a partial file (or none at all) is fine.
*/

use crate::engine::catalog::ConflictPolicy;
use crate::engine::groups::DisabledGroups;
use crate::engine::keys::KeySet;
use crate::engine::output::apply::{EngineConfig, RuleSync};
use crate::engine::output::{default_launchers, Compiler, Launcher, RULE_PREFIX};
use crate::engine::store::write_atomic;
use crate::engine::Sensitivity;
use crate::error::{ConfigError, PersistenceError};
use crate::impulse::SessionOptions;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.toml";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "chordkit")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

pub fn logs_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_local_dir().join("logs"))
}

fn data_file(name: &str) -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(name))
        .unwrap_or_else(|| PathBuf::from("~/.config/chordkit").join(name))
}

/// Expand a leading `~` against the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(base) => base.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub chord_file: PathBuf,
    pub disabled_groups_file: PathBuf,
    pub pending_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            chord_file: data_file("chords.yaml"),
            disabled_groups_file: data_file("disabled_groups.yaml"),
            pending_file: data_file("pending.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub config_path: PathBuf,
    pub profile_name: String,
    pub rule_prefix: String,
    pub backup_count: usize,
    /// Global simultaneous threshold written into the profile.
    pub chord_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            config_path: PathBuf::from("~/.config/karabiner/karabiner.json"),
            profile_name: "Chordkit".to_string(),
            rule_prefix: RULE_PREFIX.to_string(),
            backup_count: 5,
            chord_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpulseConfig {
    pub enabled: bool,
    pub trigger_key: String,
    pub chord_timeout_ms: u64,
    pub min_chord_size: usize,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        ImpulseConfig {
            enabled: true,
            trigger_key: "cmd+shift+i".to_string(),
            chord_timeout_ms: 100,
            min_chord_size: 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub engine: EngineSettings,
    pub impulse: ImpulseConfig,
    pub sensitivity: Sensitivity,
    pub catalog: CatalogConfig,
    pub launchers: Vec<Launcher>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            engine: EngineSettings::default(),
            impulse: ImpulseConfig::default(),
            sensitivity: Sensitivity::default(),
            catalog: CatalogConfig::default(),
            launchers: default_launchers(),
        }
    }
}

impl Config {
    /// Load the file at `path`, writing the defaults there first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!(path = %path.display(), "created default config");
            return Ok(config);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<(Config, PathBuf), ConfigError> {
        let path = default_config_path().ok_or(ConfigError::NoHome)?;
        Ok((Config::load_or_create(&path)?, path))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trigger()?;
        if self.impulse.chord_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "impulse.chord_timeout_ms must be positive".to_string(),
            ));
        }
        if self.impulse.min_chord_size < 2 {
            return Err(ConfigError::Invalid(
                "impulse.min_chord_size must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trigger(&self) -> Result<KeySet, ConfigError> {
        KeySet::parse(&self.impulse.trigger_key)
            .map_err(|e| ConfigError::Invalid(format!("impulse.trigger_key: {e}")))
    }

    /// Returns a warning for values that make chords hard to hit or typing sluggish.
    pub fn set_chord_timeout(&mut self, ms: u64) -> Result<Option<&'static str>, ConfigError> {
        if ms == 0 {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        self.impulse.chord_timeout_ms = ms;
        self.engine.chord_timeout_ms = ms;
        Ok(if ms < 50 {
            Some("very low timeouts make chords hard to detect")
        } else if ms > 500 {
            Some("high timeouts make typing feel sluggish")
        } else {
            None
        })
    }

    pub fn chord_file(&self) -> PathBuf {
        expand_home(&self.storage.chord_file)
    }

    pub fn disabled_groups_file(&self) -> PathBuf {
        expand_home(&self.storage.disabled_groups_file)
    }

    pub fn pending_file(&self) -> PathBuf {
        expand_home(&self.storage.pending_file)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            path: expand_home(&self.engine.config_path),
            profile_name: self.engine.profile_name.clone(),
            backup_count: self.engine.backup_count,
            global_threshold_ms: self.engine.chord_timeout_ms,
        }
    }

    pub fn compiler(&self) -> Compiler {
        Compiler::new(self.sensitivity)
            .with_prefix(&self.engine.rule_prefix)
            .with_launchers(self.launchers.clone())
    }

    pub fn rule_sync(&self) -> Result<RuleSync, PersistenceError> {
        Ok(RuleSync {
            compiler: self.compiler(),
            engine: self.engine_config(),
            disabled: DisabledGroups::load(self.disabled_groups_file())?,
        })
    }

    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        if !self.impulse.enabled {
            warn!("impulse mode is disabled in the config");
        }
        Ok(SessionOptions {
            timeout: Duration::from_millis(self.impulse.chord_timeout_ms),
            min_chord_size: self.impulse.min_chord_size,
            trigger: self.trigger()?,
            ..SessionOptions::default()
        })
    }
}
