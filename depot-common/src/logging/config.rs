use std::collections::HashMap;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use super::Component;

/// Log level for a component or for the whole process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

/// Owned, serializable counterpart of [`Component`] used as a config key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKey {
    Depot,
    Database,
    Keys,
    Authority,
    Certificates,
    Challenges,
    Custom(String),
}

impl ComponentKey {
    pub fn target(&self) -> &str {
        match self {
            ComponentKey::Depot => Component::Depot.target(),
            ComponentKey::Database => Component::Database.target(),
            ComponentKey::Keys => Component::Keys.target(),
            ComponentKey::Authority => Component::Authority.target(),
            ComponentKey::Certificates => Component::Certificates.target(),
            ComponentKey::Challenges => Component::Challenges.target(),
            ComponentKey::Custom(name) => name,
        }
    }
}

impl From<Component> for ComponentKey {
    fn from(component: Component) -> Self {
        match component {
            Component::Depot => ComponentKey::Depot,
            Component::Database => ComponentKey::Database,
            Component::Keys => ComponentKey::Keys,
            Component::Authority => ComponentKey::Authority,
            Component::Certificates => ComponentKey::Certificates,
            Component::Challenges => ComponentKey::Challenges,
            Component::Custom(name) => ComponentKey::Custom(name.to_string()),
        }
    }
}

/// Process-wide logging configuration.
///
/// `apply` installs an `env_logger` backend. Per-component levels become
/// per-target filters; `RUST_LOG` directives are parsed last and win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub default_level: LogLevel,
    #[serde(default)]
    pub component_levels: HashMap<ComponentKey, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::default_info()
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default_info()
    }

    pub fn default_info() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_component_level(mut self, component: impl Into<ComponentKey>, level: LogLevel) -> Self {
        self.component_levels.insert(component.into(), level);
        self
    }

    /// Effective level for a component
    pub fn level_for(&self, component: &ComponentKey) -> LogLevel {
        self.component_levels
            .get(component)
            .copied()
            .unwrap_or(self.default_level)
    }

    pub fn builder(&self) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.default_level.to_level_filter());
        for (component, level) in &self.component_levels {
            builder.filter_module(component.target(), level.to_level_filter());
        }
        builder.parse_default_env();
        builder
    }

    /// Install the logger. A logger installed earlier stays in place.
    pub fn apply(&self) {
        let _ = self.builder().try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_levels_override_default() {
        let config = LoggingConfig::new()
            .with_default_level(LogLevel::Warn)
            .with_component_level(Component::Challenges, LogLevel::Debug);

        assert_eq!(config.level_for(&ComponentKey::Challenges), LogLevel::Debug);
        assert_eq!(config.level_for(&ComponentKey::Database), LogLevel::Warn);
    }

    #[test]
    fn test_apply_twice_is_harmless() {
        let config = LoggingConfig::default_info();
        config.apply();
        config.apply();
    }
}
