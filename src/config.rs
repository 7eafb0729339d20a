//! Engine configuration.
//!
//! Sources, highest priority last:
//! 1. Built-in defaults
//! 2. `<workspace>/marksheetd.toml`
//! 3. Environment variables prefixed `MARKSHEETD_`, with `__` between
//!    section and key (`MARKSHEETD_GRADING__POLICY=legacy`).
//!
//! A grading table saved through `grading.update` lives in the workspace
//! database and overrides whatever the configuration resolves to.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::grade::{GradeBand, GradeError, GradingPolicy, GradingTable};

pub const CONFIG_FILE_NAME: &str = "marksheetd.toml";
pub const ENV_PREFIX: &str = "MARKSHEETD_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GradingConfig {
    #[serde(default)]
    pub policy: GradingPolicy,

    /// Custom bands, highest threshold first. Replaces the policy's bands.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bands: Vec<GradeBand>,

    /// Grade below the lowest band. Defaults to the policy's floor.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub floor: String,
}

impl GradingConfig {
    pub fn table(&self) -> Result<GradingTable, GradeError> {
        let base = self.policy.table();
        if self.bands.is_empty() && self.floor.is_empty() {
            return Ok(base);
        }
        let bands = if self.bands.is_empty() {
            base.bands
        } else {
            self.bands.clone()
        };
        let floor = if self.floor.is_empty() {
            base.floor
        } else {
            self.floor.clone()
        };
        GradingTable::new(bands, floor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Drop verification whenever a verified marksheet is edited.
    #[serde(default)]
    pub reverify_on_edit: bool,
}

const fn default_page_size() -> u32 {
    5
}

fn default_documents_dir() -> String {
    "documents".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DocumentsConfig {
    /// Output directory for generated documents; relative paths resolve
    /// against the workspace.
    #[serde(default = "default_documents_dir")]
    pub dir: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl EngineConfig {
    pub fn figment(workspace: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let file = workspace.join(CONFIG_FILE_NAME);
        if file.exists() {
            figment = figment.merge(Toml::file(file));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates the configuration for `workspace`.
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(workspace).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grading
            .table()
            .map_err(|e| ConfigError::InvalidValue {
                field: "grading".into(),
                reason: e.to_string(),
            })?;
        if self.listing.page_size == 0 || self.listing.page_size > 500 {
            return Err(ConfigError::InvalidValue {
                field: "listing.page_size".into(),
                reason: "must be within 1..=500".into(),
            });
        }
        if self.documents.dir.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "documents.dir".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn documents_dir(&self, workspace: &Path) -> PathBuf {
        let dir = PathBuf::from(self.documents.dir.trim());
        if dir.is_absolute() {
            dir
        } else {
            workspace.join(dir)
        }
    }
}
