//! Standard ticker → exchange-native product lookup.
//!
//! Charting alerts carry tickers like `SOLUSDC`; the exchange wants the
//! perpetual product id `SOL-PERP-INTX`. The table is data, loaded from
//! configuration and optional table files, never derived by string surgery
//! at lookup time.

use config::{Config, ConfigError, File};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SymbolsConfig;

pub const DEFAULT_PERPETUAL_SUFFIX: &str = "-PERP-INTX";

/// Quote currencies a perpetual base is listed against on the charting side.
pub const PERPETUAL_QUOTES: [&str; 3] = ["USDC", "USDT", "USD"];

#[derive(Error, Debug)]
pub enum SymbolMapError {
    #[error("Symbol table error: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid symbol table entry '{standard}' -> '{native}'")]
    InvalidEntry { standard: String, native: String },
}

#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    entries: HashMap<String, String>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, SymbolMapError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Self::new();
        for (k, v) in entries {
            map.insert(k, v)?;
        }
        Ok(map)
    }

    /// Build the table described by the `[symbols]` configuration section.
    /// Explicit table entries win over generated perpetual entries.
    pub fn from_config(cfg: &SymbolsConfig) -> Result<Self, SymbolMapError> {
        let mut map = Self::new();
        let suffix = cfg.perpetual_suffix.as_deref().unwrap_or(DEFAULT_PERPETUAL_SUFFIX);

        for base in &cfg.perpetual_bases {
            map.add_perpetual(base, suffix)?;
        }

        if let Some(path) = &cfg.table_path {
            let loaded = Self::load(path)?;
            map.entries.extend(loaded.entries);
        }

        for (standard, native) in &cfg.table {
            map.insert(standard.as_str(), native.as_str())?;
        }

        info!(entries = map.len(), "🗺️ Symbol table loaded");
        Ok(map)
    }

    /// Load a flat `STANDARD = "NATIVE"` table from a TOML or JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SymbolMapError> {
        let path = path.as_ref();
        let raw: HashMap<String, String> = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;
        debug!(path = %path.display(), entries = raw.len(), "Symbol table file read");
        Self::from_entries(raw)
    }

    pub fn insert(
        &mut self,
        standard: impl Into<String>,
        native: impl Into<String>,
    ) -> Result<(), SymbolMapError> {
        let standard = standard.into().trim().to_ascii_uppercase();
        let native = native.into().trim().to_string();
        if standard.is_empty() || standard.contains('-') || native.is_empty() {
            return Err(SymbolMapError::InvalidEntry { standard, native });
        }
        self.entries.insert(standard, native);
        Ok(())
    }

    /// Register `<BASE><QUOTE>` → `<BASE><suffix>` for every known quote currency.
    pub fn add_perpetual(&mut self, base: &str, suffix: &str) -> Result<(), SymbolMapError> {
        let base = base.trim().to_ascii_uppercase();
        let native = format!("{}{}", base, suffix);
        for quote in PERPETUAL_QUOTES {
            self.insert(format!("{}{}", base, quote), native.clone())?;
        }
        Ok(())
    }

    /// Exchange-native product for a standard ticker.
    pub fn lookup(&self, standard: &str) -> Option<&str> {
        self.entries
            .get(&standard.trim().to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn perpetual_bases_expand_to_every_quote() {
        let cfg = SymbolsConfig {
            perpetual_bases: vec!["sol".into()],
            ..Default::default()
        };
        let map = SymbolMap::from_config(&cfg).unwrap();

        assert_eq!(map.lookup("SOLUSDC"), Some("SOL-PERP-INTX"));
        assert_eq!(map.lookup("SOLUSDT"), Some("SOL-PERP-INTX"));
        assert_eq!(map.lookup("solusd"), Some("SOL-PERP-INTX"));
        assert_eq!(map.lookup("BTCUSDC"), None);
    }

    #[test]
    fn explicit_entries_override_generated_ones() {
        let mut table = HashMap::new();
        table.insert("SOLUSDC".to_string(), "SOL-USDC".to_string());
        let cfg = SymbolsConfig {
            perpetual_bases: vec!["SOL".into()],
            table,
            ..Default::default()
        };
        let map = SymbolMap::from_config(&cfg).unwrap();

        assert_eq!(map.lookup("SOLUSDC"), Some("SOL-USDC"));
        assert_eq!(map.lookup("SOLUSDT"), Some("SOL-PERP-INTX"));
    }

    #[test]
    fn rejects_hyphenated_standard_keys() {
        let mut map = SymbolMap::new();
        assert!(map.insert("SOL-PERP", "SOL-PERP-INTX").is_err());
        assert!(map.insert("SOLUSDC", "  ").is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn loads_table_file() {
        let path = std::env::temp_dir().join(format!("symbols_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "MKRUSDT = \"MKR-PERP-INTX\"\nGIGAUSDT = \"GIGA-PERP-INTX\"\n").unwrap();

        let map = SymbolMap::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(map.len(), 2);
        assert_eq!(map.lookup("MKRUSDT"), Some("MKR-PERP-INTX"));
    }
}
