//! Error types for deepsql operations.

use std::fmt;

/// The primary error type for all deepsql operations.
#[derive(Debug)]
pub enum Error {
    /// Statement execution errors reported by the executor
    Query(QueryError),
    /// Schema model errors (unknown targets, invalid definitions)
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// Deep write/delete planning errors
    Deep(DeepError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity not found
    EntityNotFound,
    /// Element not found on an entity
    ElementNotFound,
    /// Entity defined twice
    DuplicateEntity,
    /// Invalid definition
    Invalid,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Error raised while planning a deep write or deep delete.
///
/// All of these are raised before any statement is executed.
#[derive(Debug, Clone)]
pub struct DeepError {
    pub kind: DeepErrorKind,
    pub entity: String,
    pub message: String,
    /// Visitation chain for circular compositions, root first.
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepErrorKind {
    /// Composition graph re-enters an entity through a distinct relationship
    CircularComposition,
    /// A view-backed target cannot be mapped onto its persisted source
    MissingKeyMapping,
    /// Payload shape does not match the entity definition
    InvalidPayload,
}

impl DeepError {
    /// Create a circular composition error for the given visitation chain.
    pub fn circular(chain: Vec<String>) -> Self {
        let entity = chain.first().cloned().unwrap_or_default();
        Self {
            kind: DeepErrorKind::CircularComposition,
            message: format!(
                "transitive circular composition is not supported: {}",
                chain.join(" -> ")
            ),
            entity,
            chain,
        }
    }

    /// Create a missing key mapping error for a view-backed target.
    pub fn missing_mapping(view: &str, source: &str, element: &str) -> Self {
        Self {
            kind: DeepErrorKind::MissingKeyMapping,
            entity: view.to_string(),
            message: format!(
                "element '{}' of '{}' has no mapping onto persisted entity '{}'",
                element, view, source
            ),
            chain: Vec::new(),
        }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DeepErrorKind::InvalidPayload,
            entity: entity.into(),
            message: message.into(),
            chain: Vec::new(),
        }
    }

    pub fn is_circular(&self) -> bool {
        self.kind == DeepErrorKind::CircularComposition
    }
}

impl SchemaError {
    pub fn entity_not_found(name: &str) -> Self {
        Self {
            kind: SchemaErrorKind::EntityNotFound,
            message: format!("entity '{}' is not defined", name),
        }
    }

    pub fn element_not_found(entity: &str, element: &str) -> Self {
        Self {
            kind: SchemaErrorKind::ElementNotFound,
            message: format!("entity '{}' has no element '{}'", entity, element),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: SchemaErrorKind::Invalid,
            message: message.into(),
        }
    }
}

impl Error {
    /// Is this a planning error for a circular composition?
    pub fn is_circular_composition(&self) -> bool {
        matches!(self, Error::Deep(e) if e.is_circular())
    }

    /// Is this a configuration-level error?
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::Deep(e) => e.kind == DeepErrorKind::MissingKeyMapping,
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Deep(e) => write!(f, "Deep operation error on '{}': {}", e.entity, e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DeepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<DeepError> for Error {
    fn from(err: DeepError) -> Self {
        Error::Deep(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for deepsql operations.
pub type Result<T> = std::result::Result<T, Error>;
