//! Tuning knobs for `ArchetypeStorage`.

use serde::{Deserialize, Serialize};

/// Settings for an `ArchetypeStorage`.
///
/// Deserializable so that a scene can carry its own storage settings in
/// whatever config format the surrounding game loads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of rows each new table reserves up front.
    pub initial_table_capacity: usize,
    /// Keep tables around after their last entity leaves.
    pub retain_empty_tables: bool,
}

impl StorageConfig {
    /// Set the number of rows each new table reserves.
    pub fn with_initial_table_capacity(mut self, capacity: usize) -> Self {
        self.initial_table_capacity = capacity;
        self
    }

    /// Set whether empty tables are kept.
    pub fn with_retain_empty_tables(mut self, retain: bool) -> Self {
        self.retain_empty_tables = retain;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            initial_table_capacity: 16,
            retain_empty_tables: true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: StorageConfig = serde_json::from_str(r#"{ "retain_empty_tables": false }"#).unwrap();
        assert_eq!(config, StorageConfig::default().with_retain_empty_tables(false));

        let config: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.initial_table_capacity, 16);
    }
}
