//! Configuration loading and root folder resolution
//!
//! Resolution priority for both the config file and the data folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: guildlog starts with defaults and
//! logs a warning. A config file that exists but cannot be parsed is.

use crate::normalize::{AliasConfig, AliasRules};
use crate::refinery::{ConversionRecipe, RecipeBook};
use crate::tax::TaxConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "GUILDLOG_CONFIG";
/// Environment variable naming the data folder
pub const ROOT_ENV_VAR: &str = "GUILDLOG_ROOT";
/// Database file name inside the data folder
pub const DATABASE_FILE: &str = "guildlog.db";

/// Settings loaded from `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Data folder holding the database; `None` uses the platform default
    pub root_folder: Option<PathBuf>,
    /// Explicit database path, overriding `root_folder`
    pub database_path: Option<PathBuf>,
    pub tax: TaxConfig,
    /// Use the discounted refinery ratio unless a command says otherwise
    pub refinery_discount: bool,
    /// Extra alias rules, checked before the built-in table
    pub aliases: Vec<AliasConfig>,
    /// Extra or replacement recipes
    pub recipes: Vec<ConversionRecipe>,
}

impl TallyConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Load a specific file; missing file → defaults with a warning
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {} not found - using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load following CLI → environment → user config file → defaults
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load_from(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }
        match default_config_file() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                info!("No config file found - using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Alias table with configured rules ahead of the built-in ones
    pub fn alias_rules(&self) -> Result<AliasRules> {
        AliasRules::with_overrides(&self.aliases)
    }

    /// Built-in recipes with configured overrides
    pub fn recipe_book(&self) -> RecipeBook {
        RecipeBook::with_overrides(self.recipes.clone())
    }

    /// Database path: explicit path, else `<root>/guildlog.db`
    pub fn database_path(&self, cli_root: Option<&Path>) -> PathBuf {
        if let Some(path) = &self.database_path {
            return path.clone();
        }
        resolve_root_folder(cli_root, self.root_folder.as_deref()).join(DATABASE_FILE)
    }
}

/// Root folder resolution: CLI → `GUILDLOG_ROOT` → config value → platform default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(path) = config_value {
        return path.to_path_buf();
    }
    default_root_folder()
}

/// Per-user config file location, e.g. `~/.config/guildlog/config.toml`
pub fn default_config_file() -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        let user_config = dirs::config_dir().map(|d| d.join("guildlog").join("config.toml"));
        match user_config {
            Some(path) if path.exists() => Some(path),
            _ => Some(PathBuf::from("/etc/guildlog/config.toml")),
        }
    } else {
        dirs::config_dir().map(|d| d.join("guildlog").join("config.toml"))
    }
}

/// OS-dependent default data folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("guildlog"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/guildlog"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("guildlog"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/guildlog"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("guildlog"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\guildlog"))
    } else {
        PathBuf::from("./guildlog_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TallyConfig::default();
        assert!(!config.tax.enabled);
        assert!(!config.refinery_discount);
        assert!(config.aliases.is_empty());
        assert_eq!(config.recipe_book().recipes().len(), 2);
    }

    #[test]
    fn test_parse_full_document() {
        let config = TallyConfig::from_toml_str(
            r#"
            database_path = "/srv/guild/guildlog.db"
            refinery_discount = true

            [tax]
            enabled = true
            guild_default_rate = 0.15

            [[aliases]]
            pattern = "^sugar$"
            canonical = "spice"

            [[recipes]]
            name = "water purification"
            output = "water"
            output_per_unit = 10

            [[recipes.inputs]]
            resource = "corpse"
            per_unit = 1
            "#,
        )
        .unwrap();

        assert!(config.refinery_discount);
        assert!(config.tax.enabled);
        assert_eq!(config.tax.guild_default_rate, 0.15);
        assert_eq!(config.alias_rules().unwrap().canonicalize("sugar"), "spice");
        assert!(config.recipe_book().find("water purification").is_some());
        assert_eq!(
            config.database_path(None),
            PathBuf::from("/srv/guild/guildlog.db")
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TallyConfig::from_toml_str("tax = 12").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_cli_root_wins() {
        let root = resolve_root_folder(Some(Path::new("/tmp/cli-root")), Some(Path::new("/tmp/cfg")));
        assert_eq!(root, PathBuf::from("/tmp/cli-root"));
    }
}
