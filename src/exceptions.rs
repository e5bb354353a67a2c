//! Conversion of internal failures into exception objects the host and managed code understand.
//!
//! Every fallible host entry point funnels its [`RuntimeError`] through
//! [`Runtime::raise_error_as_exception`](crate::Runtime::raise_error_as_exception), which asks the
//! configured [`ExceptionFactory`] for an [`ExceptionRef`]. Nothing here panics or unwinds into
//! the host.
use crate::{
    error::{AssemblyLoadError, RuntimeError},
    native::NativeKind,
    pinvoke::PInvokeError,
};
use std::{fmt, sync::Arc};

pub type ExceptionRef = Arc<RuntimeException>;

/// A runtime exception object: the corlib type it instantiates, its message and an optional
/// inner exception.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeException {
    type_name: String,
    message: String,
    inner: Option<ExceptionRef>,
}

impl RuntimeException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            inner: None,
        }
    }

    pub fn with_inner(mut self, inner: ExceptionRef) -> Self {
        self.inner = Some(inner);
        self
    }

    /// Fully qualified name of the exception type, e.g. `System.TypeLoadException`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn inner(&self) -> Option<&ExceptionRef> {
        self.inner.as_ref()
    }

    pub fn is(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }
}

impl fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(inner) = &self.inner {
            write!(f, " ---> {inner}")?;
        }
        Ok(())
    }
}

/// Builds exception objects from runtime errors.
pub trait ExceptionFactory: Send + Sync {
    fn create(
        &self,
        error: &RuntimeError,
        message: Option<&str>,
        inner: Option<ExceptionRef>,
    ) -> ExceptionRef;
}

/// Maps each error kind onto the corresponding corlib exception type.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorlibExceptionFactory;

impl ExceptionFactory for CorlibExceptionFactory {
    fn create(
        &self,
        error: &RuntimeError,
        message: Option<&str>,
        inner: Option<ExceptionRef>,
    ) -> ExceptionRef {
        if let RuntimeError::Thrown(exception) = error {
            return exception.clone();
        }

        let inner = match (inner, error) {
            (Some(inner), _) => Some(inner),
            (None, RuntimeError::StaticInitializer { source, .. }) => {
                Some(self.create(source, None, None))
            }
            (None, _) => None,
        };

        let message = message.map_or_else(|| error.to_string(), str::to_string);
        let exception = RuntimeException::new(exception_type_name(error), message);
        Arc::new(match inner {
            Some(inner) => exception.with_inner(inner),
            None => exception,
        })
    }
}

pub fn exception_type_name(error: &RuntimeError) -> &'static str {
    match error {
        RuntimeError::Initialization(_) => "System.ExecutionEngineException",
        RuntimeError::AssemblyLoad(e) => match e {
            AssemblyLoadError::FileNotFound(_) => "System.IO.FileNotFoundException",
            AssemblyLoadError::InvalidFormat(_) => "System.BadImageFormatException",
            AssemblyLoadError::Io(_) => "System.IO.IOException",
            AssemblyLoadError::CircularDependency(_) => "System.IO.FileLoadException",
        },
        RuntimeError::MalformedMetadata(_) => "System.BadImageFormatException",
        RuntimeError::TypeLoad(_) => "System.TypeLoadException",
        RuntimeError::InvalidHandle(_) => "System.ArgumentException",
        RuntimeError::NativeBindingNotFound { kind, .. } => match kind {
            NativeKind::PInvoke => "System.EntryPointNotFoundException",
            NativeKind::InternalCall | NativeKind::Intrinsic => "System.MissingMethodException",
        },
        RuntimeError::StaticInitializer { .. } => "System.TypeInitializationException",
        RuntimeError::Invocation(_) => "System.InvalidOperationException",
        RuntimeError::BufferOverrun { .. } => "System.IndexOutOfRangeException",
        RuntimeError::Interop(e) => match e {
            PInvokeError::LibraryNotFound(_) | PInvokeError::LoadError(..) => {
                "System.DllNotFoundException"
            }
            PInvokeError::SymbolNotFound(..) => "System.EntryPointNotFoundException",
            PInvokeError::Unsupported(_) => "System.Runtime.InteropServices.MarshalDirectiveException",
        },
        RuntimeError::Thrown(_) => "System.Exception",
    }
}
