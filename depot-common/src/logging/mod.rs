// Logging utilities for the certificate depot
//
// This module provides:
// - Component-based structured logging routed to per-component `log` targets
// - Store ID tracking through logger inheritance
// - Operation path tracing for store calls
// - `LoggingConfig` for installing the `env_logger` backend

mod config;

pub use config::{ComponentKey, LogLevel, LoggingConfig};

use log::{debug, error, info, warn};
use std::fmt::{self, Arguments, Display, Formatter};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Depot,
    Database,
    Keys,
    Authority,
    Certificates,
    Challenges,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Depot => "Depot",
            Component::Database => "DB",
            Component::Keys => "Keys",
            Component::Authority => "Authority",
            Component::Certificates => "Certificates",
            Component::Challenges => "Challenges",
            Component::Custom(name) => name,
        }
    }

    /// The `log` target records of this component are emitted under
    pub fn target(&self) -> &'static str {
        match self {
            Component::Depot => "depot",
            Component::Database => "depot::db",
            Component::Keys => "depot::keys",
            Component::Authority => "depot::authority",
            Component::Certificates => "depot::certificates",
            Component::Challenges => "depot::challenges",
            Component::Custom(name) => name,
        }
    }
}

// Lightweight Display helpers to avoid prefix String allocations
struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Depot => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybeOperationDisplay<'a>(Option<&'a str>);

impl Display for MaybeOperationDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(op) = self.0 {
            write!(f, "|op={op}")
        } else {
            Ok(())
        }
    }
}

/// A helper for creating component-specific loggers with store ID tracking
#[derive(Debug, Clone)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Identifier of the store instance, usually derived from its path
    store_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Operation currently being traced
    operation: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and store ID
    pub fn new_root(component: Component, store_id: &str) -> Self {
        Self {
            component,
            store_id: store_id.to_string(),
            parent_component: None,
            operation: None,
        }
    }

    /// Create a child logger with the same store ID but different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            store_id: self.store_id.clone(),
            parent_component: Some(self.component),
            operation: self.operation.clone(),
        }
    }

    /// Create a logger tagged with an operation name
    pub fn with_operation(&self, operation: impl Into<String>) -> Self {
        Self {
            component: self.component,
            store_id: self.store_id.clone(),
            parent_component: self.parent_component,
            operation: Some(operation.into()),
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Full prefix including component and operation, e.g. `Depot.DB|op=put`
    pub fn prefix(&self) -> String {
        format!(
            "{}{}",
            ComponentPrefixDisplay {
                parent: self.parent_component,
                component: self.component,
            },
            MaybeOperationDisplay(self.operation()),
        )
    }

    fn is_root(&self) -> bool {
        self.component == Component::Depot && self.parent_component.is_none()
    }

    /// Log a debug message
    pub fn debug(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.component.target(), log::Level::Debug) {
            self.debug_args(format_args!("{}", message.into()));
        }
    }

    /// Log a debug message using fmt::Arguments (avoids allocating message String)
    pub fn debug_args(&self, args: Arguments) {
        let target = self.component.target();
        if self.is_root() {
            debug!(target: target, "[{}] {}", self.store_id, args);
        } else {
            debug!(
                target: target,
                "[{}][{}{}] {}",
                self.store_id,
                ComponentPrefixDisplay {
                    parent: self.parent_component,
                    component: self.component
                },
                MaybeOperationDisplay(self.operation()),
                args
            );
        }
    }

    /// Log an info message
    pub fn info(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.component.target(), log::Level::Info) {
            self.info_args(format_args!("{}", message.into()));
        }
    }

    pub fn info_args(&self, args: Arguments) {
        let target = self.component.target();
        if self.is_root() {
            info!(target: target, "[{}] {}", self.store_id, args);
        } else {
            info!(
                target: target,
                "[{}][{}{}] {}",
                self.store_id,
                ComponentPrefixDisplay {
                    parent: self.parent_component,
                    component: self.component
                },
                MaybeOperationDisplay(self.operation()),
                args
            );
        }
    }

    /// Log a warning message
    pub fn warn(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.component.target(), log::Level::Warn) {
            self.warn_args(format_args!("{}", message.into()));
        }
    }

    pub fn warn_args(&self, args: Arguments) {
        let target = self.component.target();
        if self.is_root() {
            warn!(target: target, "[{}] {}", self.store_id, args);
        } else {
            warn!(
                target: target,
                "[{}][{}{}] {}",
                self.store_id,
                ComponentPrefixDisplay {
                    parent: self.parent_component,
                    component: self.component
                },
                MaybeOperationDisplay(self.operation()),
                args
            );
        }
    }

    /// Log an error message
    pub fn error(&self, message: impl Into<String>) {
        if log::log_enabled!(target: self.component.target(), log::Level::Error) {
            self.error_args(format_args!("{}", message.into()));
        }
    }

    pub fn error_args(&self, args: Arguments) {
        let target = self.component.target();
        if self.is_root() {
            error!(target: target, "[{}] {}", self.store_id, args);
        } else {
            error!(
                target: target,
                "[{}][{}{}] {}",
                self.store_id,
                ComponentPrefixDisplay {
                    parent: self.parent_component,
                    component: self.component
                },
                MaybeOperationDisplay(self.operation()),
                args
            );
        }
    }
}
