//! Static environment registry
//!
//! Environments register a factory under their env_id at startup; the
//! evolver resolves the configured `common.env_id` through this table.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::environment::Environment;

/// Factory function type for creating environment instances
pub type EnvironmentFactory = fn() -> Arc<dyn Environment>;

/// Thread-safe registry mapping env_id to environment factory functions
static REGISTRY: Lazy<Mutex<HashMap<String, EnvironmentFactory>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<String, EnvironmentFactory>> {
    // A panic while holding the lock cannot leave the map half-updated.
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Register an environment with the global registry
///
/// Re-registering an env_id replaces the previous factory.
pub fn register_environment(env_id: impl Into<String>, factory: EnvironmentFactory) {
    let env_id = env_id.into();
    let mut registry = registry();
    if registry.contains_key(&env_id) {
        warn!(env_id = %env_id, "Overriding existing environment registration");
    }
    registry.insert(env_id, factory);
}

/// Create a new environment instance by env_id
///
/// Returns `None` if nothing is registered under `env_id`.
pub fn create_environment(env_id: &str) -> Option<Arc<dyn Environment>> {
    let factory = registry().get(env_id).copied();
    match factory {
        Some(factory) => Some(factory()),
        None => {
            warn!(env_id = %env_id, "Attempted to create unregistered environment");
            None
        }
    }
}

/// Get list of all registered environment IDs, sorted
pub fn list_registered_environments() -> Vec<String> {
    let mut ids: Vec<String> = registry().keys().cloned().collect();
    ids.sort();
    ids
}

/// Check if an environment is registered
pub fn is_registered(env_id: &str) -> bool {
    registry().contains_key(env_id)
}

/// Clear all registered environments (mainly for testing)
pub fn clear_registry() {
    registry().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvError;
    use crate::test_utils::REGISTRY_TEST_MUTEX;
    use once_cell::sync::Lazy;

    static LABELS: Lazy<Vec<String>> = Lazy::new(|| vec!["inc".to_string()]);

    /// Counter game: the state is a number, "inc" adds one until 3.
    #[derive(Debug)]
    struct Counter;

    impl Environment for Counter {
        fn env_id(&self) -> &str {
            "counter"
        }

        fn initial_state(&self) -> String {
            "0".to_string()
        }

        fn action_labels(&self) -> &[String] {
            &LABELS
        }

        fn step(&self, state: &str, action: &str) -> Result<String, EnvError> {
            let n: u32 = state
                .parse()
                .map_err(|_| EnvError::InvalidState(state.to_string()))?;
            if action != "inc" {
                return Err(EnvError::UnknownAction(action.to_string()));
            }
            Ok((n + 1).to_string())
        }

        fn encode(&self, state: &str) -> Result<Vec<f32>, EnvError> {
            let n: u32 = state
                .parse()
                .map_err(|_| EnvError::InvalidState(state.to_string()))?;
            Ok(vec![n as f32])
        }

        fn observation_size(&self) -> usize {
            1
        }

        fn legal_actions(&self, state: &str) -> Result<Vec<String>, EnvError> {
            let n: u32 = state
                .parse()
                .map_err(|_| EnvError::InvalidState(state.to_string()))?;
            Ok(if n < 3 { LABELS.clone() } else { Vec::new() })
        }
    }

    fn counter_factory() -> Arc<dyn Environment> {
        Arc::new(Counter)
    }

    #[test]
    fn test_register_and_create() {
        let _guard = REGISTRY_TEST_MUTEX.lock().unwrap();
        clear_registry();

        register_environment("counter", counter_factory);
        assert!(is_registered("counter"));

        let env = create_environment("counter").expect("registered");
        assert_eq!(env.env_id(), "counter");
        assert_eq!(env.step("0", "inc").unwrap(), "1");
        assert_eq!(env.action_index("inc"), Some(0));
        assert_eq!(env.action_index("dec"), None);
    }

    #[test]
    fn test_unregistered_returns_none() {
        let _guard = REGISTRY_TEST_MUTEX.lock().unwrap();
        clear_registry();

        assert!(create_environment("missing").is_none());
        assert!(!is_registered("missing"));
    }

    #[test]
    fn test_list_is_sorted() {
        let _guard = REGISTRY_TEST_MUTEX.lock().unwrap();
        clear_registry();

        register_environment("zeta", counter_factory);
        register_environment("alpha", counter_factory);
        assert_eq!(list_registered_environments(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_override_registration() {
        let _guard = REGISTRY_TEST_MUTEX.lock().unwrap();
        clear_registry();

        register_environment("counter", counter_factory);
        register_environment("counter", counter_factory);
        assert_eq!(list_registered_environments().len(), 1);
    }
}
