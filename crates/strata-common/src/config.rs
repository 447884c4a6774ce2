//! Configuration structures for StrataDB.

use serde::{Deserialize, Serialize};

/// Arena configuration for the storage core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Initial slab capacity in bytes.
    pub initial_capacity: usize,
    /// Growth factor applied when the slab is exhausted (numerator over 2,
    /// i.e. 3 means grow by 1.5x).
    pub growth_numerator: usize,
    /// Maximum slab capacity in bytes (0 = unbounded).
    pub max_capacity: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1024 * 1024,
            growth_numerator: 4,
            max_capacity: 0,
        }
    }
}

/// Search index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Reject duplicate values on insert/set.
    pub enforce_unique: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enforce_unique: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub arena: ArenaConfig,
    pub index: IndexConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.arena.initial_capacity, 1024 * 1024);
        assert_eq!(config.arena.growth_numerator, 4);
        assert_eq!(config.arena.max_capacity, 0);
        assert!(!config.index.enforce_unique);
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = EngineConfig {
            arena: ArenaConfig {
                initial_capacity: 4096,
                growth_numerator: 3,
                max_capacity: 1 << 30,
            },
            index: IndexConfig {
                enforce_unique: true,
            },
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.arena.initial_capacity, 4096);
        assert_eq!(parsed.arena.growth_numerator, 3);
        assert_eq!(parsed.arena.max_capacity, 1 << 30);
        assert!(parsed.index.enforce_unique);
    }
}
