//! The managed/native invocation bridge.
//!
//! Every call, whether from the host or the interpreter, enters through
//! [`Runtime::invoke_with_buffer`] with its arguments already packed into a stack-object buffer.
//! The bridge then:
//!
//! 1. checks that the method belongs to this runtime and that the buffers match its precomputed
//!    sizes,
//! 2. runs the declaring class's type initializer if it has not run yet,
//! 3. consults the intrinsic table, which intercepts any method by qualified name,
//! 4. and otherwise dispatches on the method's [`MethodImpl`].
//!
//! Panics raised by native code or the interpreter are caught at this boundary and surface as
//! [`RuntimeError::Invocation`].
use crate::{
    error::{RuntimeError, RuntimeResult},
    exceptions::ExceptionRef,
    metadata::{ClassHandle, MethodInfo},
    native::NativeKind,
    stack::StackObject,
    statics::StaticInitResult,
    Runtime,
};
use enum_dispatch::enum_dispatch;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, trace, warn};

/// Executes managed method bodies on behalf of the bridge.
pub trait Interpreter: Send + Sync {
    fn execute(
        &self,
        runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()>;
}

/// Used when the host attaches no interpreter; every managed body fails to execute.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterpreter;

impl Interpreter for NoInterpreter {
    fn execute(
        &self,
        _runtime: &Runtime,
        method: &MethodInfo,
        _args: &[StackObject],
        _ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        Err(RuntimeError::Invocation(format!(
            "no interpreter is attached to execute {}",
            method.qualified_name()
        )))
    }
}

#[enum_dispatch]
pub trait Invoke {
    fn invoke(
        &self,
        runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interpreted;

impl Invoke for Interpreted {
    fn invoke(
        &self,
        runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        runtime.interpreter().execute(runtime, method, args, ret)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PInvoke {
    pub module: String,
    pub entry: String,
}

impl Invoke for PInvoke {
    fn invoke(
        &self,
        runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        trace!(module = %self.module, entry = %self.entry, "P/Invoke");
        runtime
            .native_table(NativeKind::PInvoke)
            .resolve(&self.entry, method)?
            .call(method, args, ret)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InternalCall;

impl Invoke for InternalCall {
    fn invoke(
        &self,
        runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        runtime
            .native_table(NativeKind::InternalCall)
            .resolve(method.qualified_name(), method)?
            .call(method, args, ret)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intrinsic;

impl Invoke for Intrinsic {
    fn invoke(
        &self,
        runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        runtime
            .native_table(NativeKind::Intrinsic)
            .resolve(method.qualified_name(), method)?
            .call(method, args, ret)
    }
}

/// Abstract, interface and runtime-provided methods: nothing to call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoBody;

impl Invoke for NoBody {
    fn invoke(
        &self,
        _runtime: &Runtime,
        method: &MethodInfo,
        _args: &[StackObject],
        _ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        Err(RuntimeError::Invocation(format!(
            "{} has no implementation",
            method.qualified_name()
        )))
    }
}

#[enum_dispatch(Invoke)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MethodImpl {
    Interpreted,
    PInvoke,
    InternalCall,
    Intrinsic,
    NoBody,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "native code panicked".to_string()
    }
}

impl Runtime {
    /// Invoke `method` with a prepared argument buffer, converting any failure into an exception
    /// object. `args` must hold at least `total_arg_stack_object_size` slots and `ret` at least
    /// `return_value_stack_object_size`.
    pub fn invoke_with_buffer(
        &self,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> Result<(), ExceptionRef> {
        self.invoke_stack_objects(method, args, ret)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    /// [`Runtime::invoke_with_buffer`] for callers inside the runtime that propagate errors.
    pub fn invoke_stack_objects(
        &self,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        // Methods of another runtime carry that runtime's handles.
        self.class(method.declaring_class())?;

        let arg_size = method.total_arg_stack_object_size();
        let ret_size = method.return_value_stack_object_size();
        if args.len() < arg_size {
            return Err(RuntimeError::BufferOverrun {
                needed: arg_size,
                available: args.len(),
            });
        }
        if ret.len() < ret_size {
            return Err(RuntimeError::BufferOverrun {
                needed: ret_size,
                available: ret.len(),
            });
        }

        if !method.is_type_initializer() {
            self.run_class_constructor(method.declaring_class())?;
        }

        self.dispatch(method, &args[..arg_size], &mut ret[..ret_size])
    }

    fn dispatch(
        &self,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        trace!(method = %method.qualified_name(), "invoking");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if !matches!(method.implementation(), MethodImpl::Intrinsic(_)) {
                if let Some(entry) = self
                    .native_table(NativeKind::Intrinsic)
                    .find(method.qualified_name(), method)
                {
                    return entry.call(method, args, ret);
                }
            }
            method.implementation().invoke(self, method, args, ret)
        }));

        outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload);
            warn!(method = %method.qualified_name(), %message, "invocation panicked");
            Err(RuntimeError::Invocation(format!(
                "{} panicked: {message}",
                method.qualified_name()
            )))
        })
    }

    /// Run `class`'s type initializer if it has not run yet. Waits if another thread is running
    /// it; returns immediately on re-entry from the initializing thread.
    pub fn run_class_constructor(&self, class: ClassHandle) -> RuntimeResult<()> {
        let record = self.class(class)?;
        loop {
            match record.statics.begin() {
                StaticInitResult::Initialized | StaticInitResult::Recursive => return Ok(()),
                StaticInitResult::Waiting => record.statics.wait(),
                StaticInitResult::Failed(source) => {
                    return Err(RuntimeError::StaticInitializer {
                        type_name: record.full_name().to_string(),
                        source: Box::new(source),
                    })
                }
                StaticInitResult::Execute => {
                    let result = self
                        .find_type_initializer(class)
                        .and_then(|cctor| self.execute_type_initializer(cctor));
                    return match result {
                        Ok(()) => {
                            record.statics.mark_initialized();
                            Ok(())
                        }
                        Err(source) => {
                            debug!(class = %record.full_name(), error = %source, "type initializer failed");
                            record.statics.mark_failed(source.clone());
                            Err(RuntimeError::StaticInitializer {
                                type_name: record.full_name().to_string(),
                                source: Box::new(source),
                            })
                        }
                    };
                }
            }
        }
    }

    fn execute_type_initializer(&self, cctor: Option<Arc<MethodInfo>>) -> RuntimeResult<()> {
        match cctor {
            Some(cctor) => {
                debug!(class = %cctor.qualified_name(), "running type initializer");
                self.dispatch(&cctor, &[], &mut [])
            }
            None => Ok(()),
        }
    }
}
