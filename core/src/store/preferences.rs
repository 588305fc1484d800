use super::backend::{StorageBackend, StoreError};
use std::sync::Arc;

const SERVICE_ENABLED_KEY: &[u8] = b"wave_service_enabled";

/// Persisted user preferences for Wave.
///
/// The "service enabled" flag records whether the user wants Wave running; it
/// is what `recover_state` consults after a cold start or an OS relaunch.
#[derive(Clone)]
pub struct WavePreferences {
    storage: Arc<dyn StorageBackend>,
}

impl WavePreferences {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Whether the user enabled Wave. Defaults to enabled when never written.
    pub fn service_enabled(&self) -> Result<bool, StoreError> {
        match self.storage.get(SERVICE_ENABLED_KEY)? {
            None => Ok(true),
            Some(value) => match value.as_slice() {
                [0] => Ok(false),
                [1] => Ok(true),
                _ => Err(StoreError::CorruptValue(
                    String::from_utf8_lossy(SERVICE_ENABLED_KEY).into_owned(),
                )),
            },
        }
    }

    pub fn set_service_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.storage.put(SERVICE_ENABLED_KEY, &[enabled as u8])?;
        self.storage.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;

    #[test]
    fn test_defaults_to_enabled() {
        let prefs = WavePreferences::new(Arc::new(MemoryStorage::new()));
        assert!(prefs.service_enabled().unwrap());
    }

    #[test]
    fn test_set_and_read_flag() {
        let prefs = WavePreferences::new(Arc::new(MemoryStorage::new()));
        prefs.set_service_enabled(false).unwrap();
        assert!(!prefs.service_enabled().unwrap());
        prefs.set_service_enabled(true).unwrap();
        assert!(prefs.service_enabled().unwrap());
    }

    #[test]
    fn test_corrupt_flag() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put(SERVICE_ENABLED_KEY, b"yes").unwrap();
        let prefs = WavePreferences::new(storage);
        assert!(matches!(
            prefs.service_enabled(),
            Err(StoreError::CorruptValue(_))
        ));
    }
}
