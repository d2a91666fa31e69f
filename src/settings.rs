//! Resolved stack settings.
//!
//! Every configurable value of the stack is resolved exactly once, from the
//! `mongodb` config scope and the environment, into [`Settings`]. Nothing
//! downstream reads the environment or the config file again.
//!
//! Values are copied literally. They are not validated here; a malformed
//! quantity is reported by the cluster when the resource is applied.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::config::ConfigScope;

/// Name of the config scope the stack reads
pub const SCOPE: &str = "mongodb";

/// Placeholder shown instead of secret values
pub const REDACTED: &str = "********";

/// Config keys and their defaults
pub mod keys {
    pub const NAMESPACE: (&str, &str) = ("namespace", "mongodb");
    pub const STORAGE_CLASS: (&str, &str) = ("storageClass", "truenas-hdd-mirror-nfs");
    pub const DATA_SIZE: (&str, &str) = ("dataSize", "20Gi");
    pub const CPU: (&str, &str) = ("cpu", "500m");
    pub const MEMORY: (&str, &str) = ("memory", "1Gi");
    pub const CPU_LIMIT: (&str, &str) = ("cpuLimit", "2");
    pub const MEMORY_LIMIT: (&str, &str) = ("memoryLimit", "2Gi");
    pub const BASIC_AUTH_ENABLED: (&str, &str) = ("basicAuthEnabled", "true");
}

/// Environment variables and their defaults
pub mod vars {
    pub const MONGODB_ROOT_USERNAME: (&str, &str) = ("MONGODB_ROOT_USERNAME", "admin");
    pub const MONGODB_ROOT_PASSWORD: (&str, &str) = ("MONGODB_ROOT_PASSWORD", "changeme");
    pub const MONGODB_IMAGE: (&str, &str) = ("MONGODB_IMAGE", "mongo:7.0");
    pub const MONGO_EXPRESS_USERNAME: (&str, &str) = ("MONGO_EXPRESS_USERNAME", "admin");
    pub const MONGO_EXPRESS_PASSWORD: (&str, &str) = ("MONGO_EXPRESS_PASSWORD", "changeme");
    pub const MONGO_EXPRESS_IMAGE: (&str, &str) = ("MONGO_EXPRESS_IMAGE", "mongo-express:1.0.2");
}

// ============================================================================
// Environment access
// ============================================================================

/// Source of environment variables
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;

    /// The variable's value, or `default` when it is unset or empty
    fn var_or(&self, (key, default): (&str, &str)) -> String {
        self.var(key)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

/// The real process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Every configurable value of the MongoDB stack
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub namespace: String,
    pub storage_class: String,
    pub data_size: String,
    pub cpu: String,
    pub memory: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub basic_auth_enabled: String,

    pub mongodb_root_username: String,
    #[serde(skip)]
    pub mongodb_root_password: String,
    pub mongodb_image: String,
    pub mongo_express_username: String,
    #[serde(skip)]
    pub mongo_express_password: String,
    pub mongo_express_image: String,
}

impl Settings {
    /// Resolve settings from a config scope and an environment
    pub fn resolve(config: &ConfigScope<'_>, env: &dyn EnvSource) -> Self {
        let cfg = |(key, default): (&str, &str)| config.get(key, default);

        let settings = Self {
            namespace: cfg(keys::NAMESPACE),
            storage_class: cfg(keys::STORAGE_CLASS),
            data_size: cfg(keys::DATA_SIZE),
            cpu: cfg(keys::CPU),
            memory: cfg(keys::MEMORY),
            cpu_limit: cfg(keys::CPU_LIMIT),
            memory_limit: cfg(keys::MEMORY_LIMIT),
            basic_auth_enabled: cfg(keys::BASIC_AUTH_ENABLED),

            mongodb_root_username: env.var_or(vars::MONGODB_ROOT_USERNAME),
            mongodb_root_password: env.var_or(vars::MONGODB_ROOT_PASSWORD),
            mongodb_image: env.var_or(vars::MONGODB_IMAGE),
            mongo_express_username: env.var_or(vars::MONGO_EXPRESS_USERNAME),
            mongo_express_password: env.var_or(vars::MONGO_EXPRESS_PASSWORD),
            mongo_express_image: env.var_or(vars::MONGO_EXPRESS_IMAGE),
        };
        log::debug!("Resolved settings: {settings:?}");
        settings
    }

    /// Labelled values for display, passwords redacted
    pub fn rows(&self) -> Vec<(&'static str, &str)> {
        vec![
            (keys::NAMESPACE.0, self.namespace.as_str()),
            (keys::STORAGE_CLASS.0, self.storage_class.as_str()),
            (keys::DATA_SIZE.0, self.data_size.as_str()),
            (keys::CPU.0, self.cpu.as_str()),
            (keys::MEMORY.0, self.memory.as_str()),
            (keys::CPU_LIMIT.0, self.cpu_limit.as_str()),
            (keys::MEMORY_LIMIT.0, self.memory_limit.as_str()),
            (keys::BASIC_AUTH_ENABLED.0, self.basic_auth_enabled.as_str()),
            (vars::MONGODB_ROOT_USERNAME.0, self.mongodb_root_username.as_str()),
            (vars::MONGODB_ROOT_PASSWORD.0, REDACTED),
            (vars::MONGODB_IMAGE.0, self.mongodb_image.as_str()),
            (vars::MONGO_EXPRESS_USERNAME.0, self.mongo_express_username.as_str()),
            (vars::MONGO_EXPRESS_PASSWORD.0, REDACTED),
            (vars::MONGO_EXPRESS_IMAGE.0, self.mongo_express_image.as_str()),
        ]
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Settings");
        for (label, value) in self.rows() {
            s.field(label, &value);
        }
        s.finish()
    }
}
