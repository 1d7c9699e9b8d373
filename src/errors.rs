//! Error handling for the Assure risk engine
//!
//! One error enum covers every fallible path in the engine. Evaluation
//! itself is total: predictor and ledger failures are absorbed by the
//! engine and only surface here when a caller asks for them directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Main error type for the risk engine
#[derive(Error, Debug)]
pub enum AssureError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Dependency graph error: {message}")]
    Graph { message: String },

    #[error("Predictor '{model_id}' failed: {message}")]
    Predictor { model_id: String, message: String },

    #[error("Predictor '{model_id}' timed out after {millis} ms")]
    PredictorTimeout { model_id: String, millis: u64 },

    #[error("Persistence operation failed: {operation}")]
    Persistence {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Audit ledger operation failed: {operation}")]
    Ledger {
        operation: String,
        #[source]
        source: sled::Error,
    },

    #[error("Audit chain broken at record {id}")]
    ChainBroken { id: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Lock poisoned: {resource}")]
    MutexPoisoned { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result alias used throughout the crate
pub type AssureResult<T> = Result<T, AssureError>;

impl AssureError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
        }
    }

    pub fn predictor(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Predictor {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    pub fn persistence(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Persistence {
            operation: operation.into(),
            source,
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn ledger(operation: impl Into<String>, source: sled::Error) -> Self {
        Self::Ledger {
            operation: operation.into(),
            source,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AssureError::Validation { .. } | AssureError::Serialization { .. } => {
                StatusCode::BAD_REQUEST
            }
            AssureError::Predictor { .. } => StatusCode::BAD_GATEWAY,
            AssureError::PredictorTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AssureError::Config { .. }
            | AssureError::Graph { .. }
            | AssureError::Persistence { .. }
            | AssureError::Ledger { .. }
            | AssureError::ChainBroken { .. }
            | AssureError::MutexPoisoned { .. }
            | AssureError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for AssureError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Lock a mutex, mapping poison to an `AssureError`
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self) -> AssureResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self) -> AssureResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| AssureError::MutexPoisoned {
            resource: "mutex".to_string(),
        })
    }
}

/// Acquire a read guard, mapping poison to an `AssureError`
pub trait SafeReadLock<T: ?Sized> {
    fn safe_read(&self) -> AssureResult<std::sync::RwLockReadGuard<'_, T>>;
}

impl<T: ?Sized> SafeReadLock<T> for std::sync::RwLock<T> {
    fn safe_read(&self) -> AssureResult<std::sync::RwLockReadGuard<'_, T>> {
        self.read().map_err(|_| AssureError::MutexPoisoned {
            resource: "rwlock_read".to_string(),
        })
    }
}

/// Acquire a write guard, mapping poison to an `AssureError`
pub trait SafeWriteLock<T: ?Sized> {
    fn safe_write(&self) -> AssureResult<std::sync::RwLockWriteGuard<'_, T>>;
}

impl<T: ?Sized> SafeWriteLock<T> for std::sync::RwLock<T> {
    fn safe_write(&self) -> AssureResult<std::sync::RwLockWriteGuard<'_, T>> {
        self.write().map_err(|_| AssureError::MutexPoisoned {
            resource: "rwlock_write".to_string(),
        })
    }
}

impl From<serde_json::Error> for AssureError {
    fn from(err: serde_json::Error) -> Self {
        AssureError::serialization("json_operation", err)
    }
}

impl From<sled::Error> for AssureError {
    fn from(err: sled::Error) -> Self {
        AssureError::ledger("sled_operation", err)
    }
}

impl From<figment::Error> for AssureError {
    fn from(err: figment::Error) -> Self {
        AssureError::config(err.to_string())
    }
}
