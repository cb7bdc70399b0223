//! Configuration loading functionality.
//!
//! This module provides the [`ConfigLoader`] type for loading payroll
//! settings and tax policy tables from YAML files.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::TaxYear;

use super::types::{PayrollConfig, PayrollSettings, TaxPolicy};

/// Loads and provides access to payroll configuration.
///
/// The `ConfigLoader` reads YAML configuration files from a directory.
/// Tax tables are policy data: adding a new tax year means dropping a new
/// file into `tax_tables/`, never changing code.
///
/// # Directory Structure
///
/// ```text
/// config/za/
/// ├── payroll.yaml           # Tenant payroll settings
/// └── tax_tables/
///     ├── 2024-2025.yaml     # PAYE brackets, rebates, UIF and SDL for one tax year
///     └── 2025-2026.yaml
/// ```
///
/// # Example
///
/// ```no_run
/// use payrun_engine::config::ConfigLoader;
/// use payrun_engine::models::TaxYear;
///
/// let loader = ConfigLoader::load("./config/za").unwrap();
/// let policy = loader.tax_policy(TaxYear::new(2025)).unwrap();
/// println!("UIF ceiling: {}", policy.uif.monthly_ceiling);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: Arc<PayrollConfig>,
}

impl ConfigLoader {
    /// Loads configuration from the specified directory.
    ///
    /// # Returns
    ///
    /// Returns a `ConfigLoader` instance on success, or an error if:
    /// - `payroll.yaml` or the `tax_tables` directory is missing
    /// - Any file contains invalid YAML
    /// - Any table fails validation
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();

        let settings = Self::load_yaml::<PayrollSettings>(&path.join("payroll.yaml"))?;
        let tables = Self::load_tax_tables(&path.join("tax_tables"))?;

        let config = PayrollConfig::new(settings, tables)?;
        tracing::debug!(
            path = %path.display(),
            tax_years = config.tax_years().count(),
            "Loaded payroll configuration"
        );

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Wraps an already-built configuration.
    pub fn from_config(config: PayrollConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Loads and parses a YAML file.
    fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let path_str = path.display().to_string();

        let content = fs::read_to_string(path).map_err(|_| EngineError::ConfigNotFound {
            path: path_str.clone(),
        })?;

        serde_yaml::from_str(&content).map_err(|e| EngineError::ConfigParseError {
            path: path_str,
            message: e.to_string(),
        })
    }

    /// Loads every tax table in the directory.
    fn load_tax_tables(dir: &Path) -> EngineResult<Vec<TaxPolicy>> {
        let dir_str = dir.display().to_string();

        let entries = fs::read_dir(dir).map_err(|_| EngineError::ConfigNotFound {
            path: dir_str.clone(),
        })?;

        let mut tables = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|_| EngineError::ConfigNotFound {
                path: dir_str.clone(),
            })?;

            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                tables.push(Self::load_yaml::<TaxPolicy>(&path)?);
            }
        }

        if tables.is_empty() {
            return Err(EngineError::ConfigNotFound {
                path: format!("{} (no tax tables found)", dir_str),
            });
        }

        Ok(tables)
    }

    /// Returns a shared handle to the configuration.
    pub fn config(&self) -> Arc<PayrollConfig> {
        Arc::clone(&self.config)
    }

    /// Returns the payroll settings.
    pub fn settings(&self) -> &PayrollSettings {
        self.config.settings()
    }

    /// Returns the tax policy for a tax year.
    pub fn tax_policy(&self, tax_year: TaxYear) -> EngineResult<&TaxPolicy> {
        self.config.tax_policy(tax_year)
    }
}
