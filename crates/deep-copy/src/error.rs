//! Error types for the copy engine.

use std::fmt;

use thiserror::Error;

/// Where inside a step a failure happened.
///
/// `Querying` and `Looping` abort the step they occur in; `Creating` and
/// `Inserting` are isolated to the one source row that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLocation {
    /// The source query itself failed.
    Querying,
    /// Iterating the source rows failed outside any single row's handling.
    Looping,
    /// Transforming a source row into a destination row failed.
    Creating,
    /// Writing the new row to the destination failed.
    Inserting,
}

impl fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorLocation::Querying => "querying",
            ErrorLocation::Looping => "looping",
            ErrorLocation::Creating => "creating",
            ErrorLocation::Inserting => "inserting",
        };
        f.write_str(s)
    }
}

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A durable collaborator (key map, bridge store, metrics sink) failed
    #[error("Store error: {0}")]
    Store(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// PostgreSQL connection or query error
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A mapping already exists for this (step, source key) pair
    #[error("Key map already contains step {step}, source key {key}")]
    DuplicateKey { step: String, key: String },

    /// No mapping exists for this (step, source key) pair
    #[error("Key map has no entry for step {step}, source key {key}")]
    KeyNotFound { step: String, key: String },

    /// A classified failure inside a step
    #[error("Step {step} failed while {location}{}: {source}", key_suffix(.key))]
    Step {
        step: String,
        location: ErrorLocation,
        key: Option<String>,
        #[source]
        source: Box<CopyError>,
    },

    /// Data problem raised by step code
    #[error("Row error: {0}")]
    Row(String),

    /// Error raised by a store driver used inside step code
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was cancelled before it could finish
    #[error("Copy cancelled")]
    Cancelled,
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" (source key {})", k),
        None => String::new(),
    }
}

impl CopyError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl fmt::Display, context: impl Into<String>) -> Self {
        CopyError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Store error
    pub fn store(message: impl fmt::Display) -> Self {
        CopyError::Store(message.to_string())
    }

    /// Create a Row error
    pub fn row(message: impl Into<String>) -> Self {
        CopyError::Row(message.into())
    }

    /// Wrap any driver error raised from step code
    pub fn external(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        CopyError::External(Box::new(err))
    }

    /// Classify an error as having happened at `location` inside `step`.
    pub fn in_step(
        self,
        step: impl Into<String>,
        location: ErrorLocation,
        key: Option<String>,
    ) -> Self {
        CopyError::Step {
            step: step.into(),
            location,
            key,
            source: Box::new(self),
        }
    }

    /// The step-level location, if this error was classified.
    pub fn location(&self) -> Option<ErrorLocation> {
        match self {
            CopyError::Step { location, .. } => Some(*location),
            _ => None,
        }
    }

    /// The innermost error, skipping step classification wrappers.
    pub fn root_cause(&self) -> &CopyError {
        match self {
            CopyError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self.root_cause() {
            CopyError::Config(_) | CopyError::Yaml(_) => 2,
            CopyError::DuplicateKey { .. } | CopyError::KeyNotFound { .. } => 3,
            CopyError::Store(_) | CopyError::Pool { .. } | CopyError::Postgres(_) => 4,
            CopyError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;
