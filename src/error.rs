//! Top-level error type
//!
//! Each component has its own error enum; [`HostError`] wraps them for the
//! orchestration path and maps every failure to one [`ErrorKind`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::invoke::InvokeError;
use crate::paths::PathError;
use crate::runtime::RuntimeError;

/// Failure categories of a host run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ConfigError,
    RuntimeInitError,
    InvalidState,
    ModuleNotFound,
    ModuleLoadError,
    SymbolNotFound,
    NotCallable,
    ArgumentConversionError,
    InvocationError,
    ResultConversionError,
}

/// Any failure of [`crate::run`]
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

fn runtime_kind(err: &RuntimeError) -> ErrorKind {
    match err {
        RuntimeError::Init(_) => ErrorKind::RuntimeInitError,
        RuntimeError::InvalidState(_) => ErrorKind::InvalidState,
    }
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Path(_) => ErrorKind::NotFound,
            HostError::Config(_) => ErrorKind::ConfigError,
            HostError::Runtime(err) => runtime_kind(err),
            HostError::Invoke(err) => match err {
                InvokeError::Runtime(err) => runtime_kind(err),
                InvokeError::ModuleNotFound { .. } => ErrorKind::ModuleNotFound,
                InvokeError::ModuleLoad { .. } => ErrorKind::ModuleLoadError,
                InvokeError::SymbolNotFound { .. } => ErrorKind::SymbolNotFound,
                InvokeError::NotCallable { .. } => ErrorKind::NotCallable,
                InvokeError::ArgumentConversion { .. } => ErrorKind::ArgumentConversionError,
                InvokeError::Invocation { .. } => ErrorKind::InvocationError,
                InvokeError::ResultConversion { .. } => ErrorKind::ResultConversionError,
            },
        }
    }
}
