// Store module: persisted preferences

pub mod backend;
pub mod preferences;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StoreError};
pub use preferences::WavePreferences;
