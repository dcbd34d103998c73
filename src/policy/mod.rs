//! Per-application allow/block policy.
//!
//! - `identity`: case-insensitive executable path keys
//! - `settings`: typed, validated user settings
//! - `registry`: persisted whitelist, blacklist and settings
//! - `lock`: single-writer ownership of the persisted store
//! - `engine`: the decision state machine tying registry and rule store together

pub mod engine;
pub mod error;
pub mod identity;
pub mod lock;
pub mod registry;
pub mod settings;

pub use engine::{AppState, PolicyEngine, ResetReport};
pub use error::{EngineError, RegistryError};
pub use identity::{AppIdentity, EmptyPath, basename, canonical_key};
pub use lock::{StoreGuard, StoreLock};
pub use registry::{Membership, PolicyRegistry};
pub use settings::{SettingKey, SettingValue, Settings, SettingsError};
