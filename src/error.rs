use crate::{exceptions::ExceptionRef, native::NativeKind, pinvoke::PInvokeError};
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblyLoadError {
    #[error("Could not find assembly: {0}")]
    FileNotFound(String),
    #[error("Invalid assembly image: {0}")]
    InvalidFormat(String),
    #[error("I/O error while reading assembly: {0}")]
    Io(String),
    #[error("Circular assembly dependency while loading {0}")]
    CircularDependency(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
    #[error(transparent)]
    AssemblyLoad(#[from] AssemblyLoadError),
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("Type not found: {0}")]
    TypeLoad(String),
    /// A handle this runtime did not issue.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("No {kind} implementation registered for {name}")]
    NativeBindingNotFound { kind: NativeKind, name: String },
    #[error("The type initializer for '{type_name}' threw an exception")]
    StaticInitializer {
        type_name: String,
        source: Box<RuntimeError>,
    },
    #[error("Invocation failed: {0}")]
    Invocation(String),
    #[error("Stack buffer overrun: needed {needed} slots, buffer holds {available}")]
    BufferOverrun { needed: usize, available: usize },
    #[error(transparent)]
    Interop(#[from] PInvokeError),
    /// A managed exception raised by executing code, propagated unchanged.
    #[error("{0}")]
    Thrown(ExceptionRef),
}

impl RuntimeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMetadata(message.into())
    }

    pub fn invalid_handle(handle: impl std::fmt::Display) -> Self {
        Self::InvalidHandle(handle.to_string())
    }

    pub fn binding_not_found(kind: NativeKind, name: impl Into<String>) -> Self {
        Self::NativeBindingNotFound {
            kind,
            name: name.into(),
        }
    }
}
