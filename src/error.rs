//! Unified error handling for the geobridge crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`BridgeErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! The command line maps the category of a failure to its exit status with
//! [`ErrorCategory::of`] and [`ErrorCategory::exit_code`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use geobridge::error::{BridgeErrorTrait, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::export::ExportError;
pub use crate::layers::LayerError;
pub use crate::publish::task::TaskError;
pub use crate::report::ReportError;
pub use crate::servers::{AdapterError, ImportError, RegistryError};
pub use crate::settings::SettingsError;
pub use crate::style::StyleError;

/// Common trait for all geobridge error types
pub trait BridgeErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Catalog server communication (HTTP, timeout, unexpected status)
    Network,
    /// Invalid documents, definitions and layer data
    Validation,
    /// Settings, database and file errors
    Storage,
    /// Configuration errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Other => "other",
        }
    }

    /// Process exit status, following the BSD `sysexits` codes
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Network => 69,    // EX_UNAVAILABLE
            Self::Validation => 65, // EX_DATAERR
            Self::Storage => 74,    // EX_IOERR
            Self::Config => 78,     // EX_CONFIG
            Self::Other => 1,
        }
    }

    /// Category of the first geobridge error found in a source chain
    pub fn of(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(e) = e.downcast_ref::<Error>() {
                return e.category();
            }
            if let Some(e) = e.downcast_ref::<AdapterError>() {
                return e.category();
            }
            if let Some(e) = e.downcast_ref::<RegistryError>() {
                return e.category();
            }
            if let Some(e) = e.downcast_ref::<TaskError>() {
                return Error::category_of_task(e);
            }
            if e.is::<SettingsError>()
                || e.is::<ImportError>()
                || e.is::<ExportError>()
                || e.is::<ReportError>()
                || e.is::<io::Error>()
            {
                return Self::Storage;
            }
            if e.is::<LayerError>() || e.is::<StyleError>() || e.is::<serde_json::Error>() {
                return Self::Validation;
            }
            current = e.source();
        }
        Self::Other
    }
}

/// Unified error type for the geobridge crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Style error: {0}")]
    Style(#[from] StyleError),

    #[error("Layer error: {0}")]
    Layer(#[from] LayerError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Publish error: {0}")]
    Task(#[from] TaskError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BridgeErrorTrait for AdapterError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Http { .. } | Self::Status { .. } => ErrorCategory::Network,
            Self::InvalidUrl(_) | Self::MissingDatabase(_) => ErrorCategory::Config,
            Self::Import(_) | Self::Io { .. } | Self::Export(_) => ErrorCategory::Storage,
            Self::Style(_)
            | Self::TemplateSetup(_)
            | Self::Template(_)
            | Self::Publish(_)
            | Self::LayerNotFound(_) => ErrorCategory::Validation,
            Self::Logged { error, .. } => error.category(),
        }
    }
}

impl BridgeErrorTrait for RegistryError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Settings(_) | Self::Serialization(_) => ErrorCategory::Storage,
            Self::Adapter(e) => e.category(),
            Self::NotFound(_)
            | Self::UnknownServerType(_)
            | Self::WrongKind(..)
            | Self::InvalidDefinition { .. } => ErrorCategory::Config,
        }
    }
}

impl BridgeErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Adapter(e) => e.is_recoverable(),
            Self::Registry(e) => e.is_recoverable(),
            Self::Task(TaskError::Prepare { source, .. })
            | Self::Task(TaskError::Groups { source, .. })
            | Self::Task(TaskError::Close { source, .. }) => source.is_recoverable(),
            Self::Io(_) => true, // I/O errors are often transient
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Adapter(e) => e.category(),
            Self::Registry(e) => e.category(),
            Self::Task(e) => Self::category_of_task(e),
            Self::Settings(_)
            | Self::Import(_)
            | Self::Export(_)
            | Self::Report(_)
            | Self::Io(_) => ErrorCategory::Storage,
            Self::Style(_) | Self::Layer(_) | Self::Json(_) => ErrorCategory::Validation,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    fn category_of_task(err: &TaskError) -> ErrorCategory {
        match err {
            TaskError::Prepare { source, .. }
            | TaskError::Groups { source, .. }
            | TaskError::Close { source, .. } => source.category(),
            _ => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
