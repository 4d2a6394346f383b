//! Endpoint pickers
//!
//! A picker maps a membership snapshot and a request hash to the address
//! that owns the hash. Every node runs the same picker over its own view of
//! membership, so the result must depend only on the *set* of candidates and
//! never on their order.
//!
//! # Algorithms
//!
//! - **Rendezvous**: highest-random-weight hashing, O(N) per pick, no state
//! - **Hash ring**: consistent hashing over virtual points, memoized per
//!   membership list
//!
//! # Example
//!
//! ```
//! use hashroute::picker::{PickerConfig, Picker};
//!
//! let picker = PickerConfig::default().create_picker();
//! let nodes = vec!["10.0.0.1:9090".to_string(), "10.0.0.2:9090".to_string()];
//! let owner = picker.pick(&nodes, 555);
//! assert!(owner.is_some());
//! ```

mod rendezvous;
mod ring;

pub use rendezvous::RendezvousPicker;
pub use ring::HashRing;

use crate::error::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chooses the owner of a hash from a membership snapshot
pub trait Picker: Send + Sync {
    /// Pick the owning address, or `None` when there are no candidates
    fn pick(&self, candidates: &[String], hash: u64) -> Option<String>;

    /// Get the algorithm name
    fn name(&self) -> &'static str;
}

/// Picker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum PickerConfig {
    /// Highest-random-weight hashing
    Rendezvous,

    /// Consistent hash ring
    HashRing {
        /// Virtual points per candidate
        #[serde(default = "default_ring_factor")]
        factor: usize,
    },
}

fn default_ring_factor() -> usize {
    ring::DEFAULT_FACTOR
}

impl Default for PickerConfig {
    fn default() -> Self {
        PickerConfig::Rendezvous
    }
}

impl PickerConfig {
    /// Reject settings the pickers cannot honor
    pub fn validate(&self) -> Result<()> {
        match self {
            PickerConfig::Rendezvous => Ok(()),
            PickerConfig::HashRing { factor } if (1..=ring::MAX_FACTOR).contains(factor) => Ok(()),
            PickerConfig::HashRing { factor } => Err(RouterError::Config(format!(
                "Ring factor must be between 1 and {}, got {}",
                ring::MAX_FACTOR,
                factor
            ))),
        }
    }

    /// Create the configured picker
    pub fn create_picker(&self) -> Arc<dyn Picker> {
        match self {
            PickerConfig::Rendezvous => Arc::new(RendezvousPicker::new()),
            PickerConfig::HashRing { factor } => Arc::new(HashRing::with_factor(*factor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_rendezvous() {
        assert_eq!(PickerConfig::default().create_picker().name(), "rendezvous");
    }

    #[test]
    fn test_config_serde() {
        let config: PickerConfig =
            serde_json::from_str(r#"{"algorithm":"hash_ring"}"#).unwrap();
        assert_eq!(config, PickerConfig::HashRing { factor: 1000 });

        let json = serde_json::to_string(&PickerConfig::Rendezvous).unwrap();
        assert!(json.contains("rendezvous"));
    }

    #[test]
    fn test_create_ring() {
        let picker = PickerConfig::HashRing { factor: 10 }.create_picker();
        assert_eq!(picker.name(), "hash_ring");
    }

    #[test]
    fn test_ring_factor_bounds() {
        assert!(PickerConfig::Rendezvous.validate().is_ok());
        assert!(PickerConfig::HashRing { factor: 1 }.validate().is_ok());
        assert!(PickerConfig::HashRing { factor: 1 << 16 }.validate().is_ok());

        for factor in [0, (1 << 16) + 1, usize::MAX] {
            let err = PickerConfig::HashRing { factor }.validate().unwrap_err();
            assert_eq!(err.error_type(), "config");
        }
    }
}
