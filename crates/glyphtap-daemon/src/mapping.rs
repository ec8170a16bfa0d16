//! Mapping table and where it comes from

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use glyphtap_config::{default_mappings, keys, Config, ConfigError, MappingEntry};

/// Immutable keycode → (normal, shift) table.
///
/// Shared as `Arc<MappingTable>` and replaced wholesale on reload; lookups
/// never observe a partially loaded table.
#[derive(Debug, Default)]
pub struct MappingTable {
    entries: HashMap<u16, (String, String)>,
}

impl MappingTable {
    pub fn from_entries(entries: Vec<MappingEntry>) -> Self {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if map.contains_key(&entry.keycode) {
                tracing::warn!(
                    "Ignoring duplicate mapping for {}",
                    keys::display_key(entry.keycode)
                );
                continue;
            }
            map.insert(entry.keycode, (entry.normal, entry.shift));
        }
        Self { entries: map }
    }

    /// Symbol for a key with the trigger held. Empty strings are valid mappings.
    pub fn lookup(&self, keycode: u16, shift: bool) -> Option<&str> {
        self.entries
            .get(&keycode)
            .map(|(normal, shifted)| if shift { shifted.as_str() } else { normal.as_str() })
    }

    pub fn contains(&self, keycode: u16) -> bool {
        self.entries.contains_key(&keycode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<MappingEntry>> for MappingTable {
    fn from(entries: Vec<MappingEntry>) -> Self {
        Self::from_entries(entries)
    }
}

/// Mapping source backed by the KDL config file.
///
/// A missing file is created with the built-in table. A file that fails to
/// parse is left alone and the built-in table is used instead.
#[derive(Debug, Clone)]
pub struct ConfigMappingSource {
    path: PathBuf,
}

impl ConfigMappingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the whole config with the fallbacks described above.
    pub fn load_config(&self) -> Config {
        match glyphtap_config::parse_config(&self.path) {
            Ok(config) => {
                tracing::info!(
                    "Loaded {} mapping(s) from {}",
                    config.mappings.len(),
                    self.path.display()
                );
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    "No config at {}, writing the default one",
                    self.path.display()
                );
                match glyphtap_config::write_default_config(&self.path) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Failed to write default config: {}", e);
                        Self::fallback()
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load {}: {}; using the built-in table",
                    self.path.display(),
                    e
                );
                Self::fallback()
            }
        }
    }

    fn fallback() -> Config {
        Config {
            mappings: default_mappings(),
            ..Default::default()
        }
    }
}
