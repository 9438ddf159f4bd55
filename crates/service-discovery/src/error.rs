//! Error types for the service discovery registry

use thiserror::Error;

/// Service discovery error type
#[derive(Error, Debug)]
pub enum Error {
    /// Record already carries a registration id
    #[error("Record already registered: {0}")]
    AlreadyRegistered(String),

    /// No record stored under the given registration id
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A lookup that requires a result matched nothing
    #[error("No matching record for filter: {0}")]
    NoMatchingRecord(String),

    /// No service type is registered for a record type
    #[error("Unsupported service type: {0}")]
    UnsupportedType(String),

    /// Operation needs a published record but the registration is missing
    #[error("Record '{0}' has no registration")]
    MissingRegistration(String),

    /// Reference was used after it was released
    #[error("Service reference {0} has been released")]
    ReferenceReleased(String),

    /// Service type factory could not build a service object
    #[error("Failed to create service object for type '{service_type}': {reason}")]
    ServiceObjectCreation {
        /// Record type the factory was resolved for
        service_type: String,
        /// Why creation failed
        reason: String,
    },

    /// Backend transport or storage failure
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// External source could not be listed or watched
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Invalid options or collaborator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::BackendUnavailable(e.to_string())
    }
}

impl Error {
    /// Whether this error means "absent" rather than an infrastructure failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::NoMatchingRecord(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
