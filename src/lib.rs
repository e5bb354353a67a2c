//! An embeddable host API for the .NET runtime.
//!
//! A [`Runtime`] owns everything a host talks to:
//!
//! - **Reflection**: assemblies are loaded by name through an [`AssemblyResolver`]; their
//!   classes are published eagerly, but each class's members are materialized on first request
//!   and cached (see [`reflection`]).
//! - **Invocation**: methods are called with arguments packed into a buffer of 8-byte
//!   [`StackObject`] slots (see [`stack`]). [`Runtime::invoke_with_buffer`] runs the declaring
//!   type's static initializer once and dispatches to the interpreter, a P/Invoke target, an
//!   internal call or an intrinsic.
//! - **Native registration**: hosts supply native implementations by name through the
//!   `register_*_func` family.
//!
//! Fallible host-facing calls return `Result<_, ExceptionRef>`; the exception is built by the
//! runtime's [`ExceptionFactory`] from the underlying [`RuntimeError`].
//!
//! ```no_run
//! use dotnet_embed::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::builder()
//!     .config(RuntimeConfig::from_env())
//!     .initialize()
//!     .expect("runtime");
//! let core = runtime.load_assembly("Core").expect("Core.dll");
//! let module = runtime.get_module_for_assembly(core).expect("module");
//! for class in runtime.get_classes(module, true) {
//!     println!("{}", runtime.class(class).expect("class").full_name());
//! }
//! runtime.shutdown();
//! ```
pub mod config;
pub mod error;
pub mod exceptions;
pub mod intrinsics;
pub mod invoke;
pub mod metadata;
pub mod native;
pub mod pinvoke;
pub mod reflection;
pub mod runtime;
pub mod stack;
pub mod statics;

pub use config::RuntimeConfig;
pub use error::{AssemblyLoadError, RuntimeError, RuntimeResult};
pub use exceptions::{CorlibExceptionFactory, ExceptionFactory, ExceptionRef, RuntimeException};
pub use invoke::{Interpreter, MethodImpl, NoInterpreter};
pub use metadata::{
    AssemblyHandle, AssemblyResolver, ClassHandle, MethodInfo, ModuleHandle, ModuleMetadata,
    TypeSig,
};
pub use native::{MethodPointer, NativeInvoker, NativeKind};
pub use runtime::{Ancestors, Runtime, RuntimeBuilder};
pub use stack::StackObject;
