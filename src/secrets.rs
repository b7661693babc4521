// Secret store capability.
//
// Keys are read once at pipeline start; the engine treats values as opaque
// and never persists them.

use crate::error::EngineError;

pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<String, EngineError>;
}

/// Secrets from process environment variables.
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, key: &str) -> Result<String, EngineError> {
        std::env::var(key).map_err(|_| EngineError::SecretMissing(key.to_string()))
    }
}

/// Fixed secrets for tests.
#[derive(Default)]
pub struct StaticSecretStore {
    entries: std::collections::HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, key: &str) -> Result<String, EngineError> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::SecretMissing(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_store_lookup() {
        let store = StaticSecretStore::default().with("API_KEY", "abc123");
        assert_eq!(store.get("API_KEY").unwrap(), "abc123");
        assert!(matches!(
            store.get("MISSING"),
            Err(EngineError::SecretMissing(_))
        ));
    }
}
