//! Picks the consensus engine a node runs with.

use crate::engine::PowEngine;
use crate::fake::{Faker, Tester};
use crate::hashimoto::{Hashimoto, PowConfig, SharedEngine};
use std::sync::Arc;
use tracing::{info, warn};

/// The engine-related subset of the node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub pow_fake: bool,
    pub pow_test: bool,
    pub pow_shared: bool,
    pub pow: PowConfig,
}

/// Which engine a configuration selects. Earlier flags win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Fake,
    Test,
    Shared,
    Full,
}

impl EngineKind {
    pub fn from_config(config: &EngineConfig) -> Self {
        if config.pow_fake {
            EngineKind::Fake
        } else if config.pow_test {
            EngineKind::Test
        } else if config.pow_shared {
            EngineKind::Shared
        } else {
            EngineKind::Full
        }
    }
}

/// Build the engine selected by `config`.
///
/// `shared` is only used in shared mode; callers pass the same handle to
/// every node that should share one engine.
pub fn create_consensus_engine(config: &EngineConfig, shared: &SharedEngine) -> Arc<dyn PowEngine> {
    match EngineKind::from_config(config) {
        EngineKind::Fake => {
            warn!("Ethash used in fake mode");
            Arc::new(Faker::new())
        }
        EngineKind::Test => {
            warn!("Ethash used in test mode");
            Arc::new(Tester::new())
        }
        EngineKind::Shared => {
            warn!("Ethash used in shared mode");
            Arc::new(shared.clone())
        }
        EngineKind::Full => {
            let engine = Hashimoto::new(config.pow.clone());
            engine.set_search_enabled(false);
            info!(
                caches_in_mem = config.pow.caches_in_mem,
                caches_on_disk = config.pow.caches_on_disk,
                "Hashimoto engine ready"
            );
            Arc::new(engine)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_precedence() {
        let mut config = EngineConfig {
            pow_fake: true,
            pow_test: true,
            pow_shared: true,
            ..Default::default()
        };
        assert_eq!(EngineKind::from_config(&config), EngineKind::Fake);
        config.pow_fake = false;
        assert_eq!(EngineKind::from_config(&config), EngineKind::Test);
        config.pow_test = false;
        assert_eq!(EngineKind::from_config(&config), EngineKind::Shared);
        config.pow_shared = false;
        assert_eq!(EngineKind::from_config(&config), EngineKind::Full);
    }

    #[test]
    fn test_engine_names() {
        let shared = SharedEngine::new();
        let make = |fake, test, shared_mode| {
            let config = EngineConfig {
                pow_fake: fake,
                pow_test: test,
                pow_shared: shared_mode,
                ..Default::default()
            };
            create_consensus_engine(&config, &shared).name()
        };
        assert_eq!(make(true, false, false), "fake");
        assert_eq!(make(false, true, false), "test");
        assert_eq!(make(false, false, true), "shared");
        assert_eq!(make(false, false, false), "hashimoto");
    }

    #[test]
    fn test_shared_mode_reuses_handle() {
        let shared = SharedEngine::new();
        let config = EngineConfig {
            pow_shared: true,
            ..Default::default()
        };
        let engine = create_consensus_engine(&config, &shared);
        engine.set_search_enabled(true);
        assert!(shared.search_enabled());
    }

    #[test]
    fn test_full_engine_starts_without_local_search() {
        let engine = create_consensus_engine(&EngineConfig::default(), &SharedEngine::new());
        assert!(!engine.search_enabled());
    }
}
