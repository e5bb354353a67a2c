//! Binding P/Invoke methods to symbols in shared libraries.
//!
//! [`NativeLibraries`] loads libraries lazily from a root directory and resolves entry points.
//! [`ffi_invoker`] is a generic [`NativeInvoker`](crate::native::NativeInvoker) that unpacks a
//! stack-object buffer according to the method's signature and calls through libffi, so any
//! C-ABI function with primitive parameters can be registered without a hand-written invoker.
use crate::{
    error::{RuntimeError, RuntimeResult},
    invoke::MethodImpl,
    metadata::{MethodInfo, TypeSig},
    native::{MethodPointer, NativeKind},
    stack::{write_return, ArgReader, StackObject},
    Runtime,
};
use dashmap::DashMap;
use libffi::middle::{Arg, Cif, CodePtr, Type};
use libloading::{Library, Symbol};
use std::{
    ffi::c_void,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PInvokeError {
    #[error("Unable to load DLL '{0}'")]
    LibraryNotFound(String),
    #[error("Unable to find an entry point named '{1}' in DLL '{0}'")]
    SymbolNotFound(String, String),
    #[error("Failed to load DLL '{0}': {1}")]
    LoadError(String, String),
    #[error("Cannot marshal {0}")]
    Unsupported(String),
}

pub struct NativeLibraries {
    root: PathBuf,
    libraries: DashMap<String, Library>,
}

impl NativeLibraries {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            libraries: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find_library_path(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() && direct.exists() {
            return Some(direct.to_path_buf());
        }

        let extension = if cfg!(target_os = "windows") {
            "dll"
        } else if cfg!(target_os = "macos") {
            "dylib"
        } else {
            "so"
        };
        let bare = name.strip_suffix(&format!(".{extension}")).unwrap_or(name);
        let candidates = [
            name.to_string(),
            format!("{bare}.{extension}"),
            format!("lib{bare}.{extension}"),
        ];
        for candidate in &candidates {
            let path = self.root.join(candidate);
            if path.exists() {
                return Some(path);
            }
        }

        // Versioned sonames such as libfoo.so.1
        let prefix = format!("lib{bare}.{extension}.");
        self.root.read_dir().ok()?.flatten().find_map(|entry| {
            let file_name = entry.file_name();
            file_name
                .to_str()
                .is_some_and(|n| n.starts_with(&prefix))
                .then(|| entry.path())
        })
    }

    fn ensure_loaded(&self, name: &str) -> Result<(), PInvokeError> {
        if self.libraries.contains_key(name) {
            return Ok(());
        }
        let path = self
            .find_library_path(name)
            .ok_or_else(|| PInvokeError::LibraryNotFound(name.to_string()))?;
        // SAFETY: loading a library runs its initializers; the host chose to trust this root.
        let library = unsafe { Library::new(&path) }
            .map_err(|e| PInvokeError::LoadError(name.to_string(), e.to_string()))?;
        info!(library = name, path = %path.display(), "loaded native library");
        self.libraries.entry(name.to_string()).or_insert(library);
        Ok(())
    }

    /// Resolve `symbol` in `library`, loading the library on first use. The returned pointer
    /// stays valid for as long as this `NativeLibraries` is alive.
    pub fn get_function(&self, library: &str, symbol: &str) -> Result<MethodPointer, PInvokeError> {
        self.ensure_loaded(library)?;
        let lib = self
            .libraries
            .get(library)
            .ok_or_else(|| PInvokeError::LibraryNotFound(library.to_string()))?;
        // SAFETY: the symbol is only ever called through a Cif built from the method signature.
        let sym: Symbol<unsafe extern "C" fn()> = unsafe { lib.get(symbol.as_bytes()) }
            .map_err(|_| PInvokeError::SymbolNotFound(library.to_string(), symbol.to_string()))?;
        Ok(MethodPointer::new(*sym as *const c_void))
    }
}

impl Runtime {
    /// Register `symbol` from `library` under the P/Invoke entry name `name`, marshalled with
    /// [`ffi_invoker`].
    pub fn bind_pinvoke(&self, name: &str, library: &str, symbol: &str) -> RuntimeResult<()> {
        let func = self.native_libraries().get_function(library, symbol)?;
        debug!(name, library, symbol, "bound P/Invoke entry point");
        self.native_table(NativeKind::PInvoke)
            .register(name, func, ffi_invoker);
        Ok(())
    }

    /// Bind a P/Invoke method to the entry point its metadata names.
    pub fn bind_pinvoke_method(&self, method: &MethodInfo) -> RuntimeResult<()> {
        match method.implementation() {
            MethodImpl::PInvoke(p) => self.bind_pinvoke(&p.entry, &p.module, &p.entry),
            _ => Err(RuntimeError::Invocation(format!(
                "{} is not a P/Invoke method",
                method.qualified_name()
            ))),
        }
    }
}

fn ffi_type(sig: &TypeSig) -> Result<Type, PInvokeError> {
    Ok(match sig {
        TypeSig::Void => Type::void(),
        TypeSig::Boolean | TypeSig::U1 => Type::u8(),
        TypeSig::I1 => Type::i8(),
        TypeSig::Char | TypeSig::U2 => Type::u16(),
        TypeSig::I2 => Type::i16(),
        TypeSig::I4 => Type::i32(),
        TypeSig::U4 => Type::u32(),
        TypeSig::I8 => Type::i64(),
        TypeSig::U8 => Type::u64(),
        TypeSig::R4 => Type::f32(),
        TypeSig::R8 => Type::f64(),
        TypeSig::IntPtr => Type::isize(),
        TypeSig::UIntPtr => Type::usize(),
        TypeSig::Pointer
        | TypeSig::ByRef(_)
        | TypeSig::Object
        | TypeSig::String
        | TypeSig::Array
        | TypeSig::Class(_) => Type::pointer(),
        rest => return Err(PInvokeError::Unsupported(rest.to_string())),
    })
}

/// Calls a C-ABI function through libffi, reading each parameter from its stack-object slots.
pub fn ffi_invoker(
    func: Option<MethodPointer>,
    method: &MethodInfo,
    args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()> {
    let func = func.ok_or_else(|| {
        RuntimeError::Invocation(format!("{} has no native entry point", method.qualified_name()))
    })?;

    let mut reader = ArgReader::new(args);
    let mut types = Vec::with_capacity(method.param_count() + 1);
    let mut values: Vec<u64> = Vec::with_capacity(method.param_count() + 1);
    if method.is_instance() {
        types.push(Type::pointer());
        values.push(reader.read::<u64>()?);
    }
    for param in method.params() {
        types.push(ffi_type(param.sig())?);
        let size = param.sig().fixed_size().unwrap_or(8).min(8);
        let mut raw = [0u8; 8];
        reader.read_bytes(&mut raw[..size])?;
        values.push(u64::from_ne_bytes(raw));
    }

    let return_sig = method.return_type();
    let cif = Cif::new(types, ffi_type(return_sig)?);
    let arg_values: Vec<Arg> = values.iter().map(Arg::new).collect();
    let code = CodePtr::from_ptr(func.as_ptr());

    macro_rules! call_into {
        ($t:ty) => {{
            // SAFETY: the Cif was built from the same signature the function was bound for.
            let value: $t = unsafe { cif.call(code, &arg_values) };
            write_return(ret, value)
        }};
    }

    match return_sig {
        TypeSig::Void => {
            // SAFETY: as above.
            unsafe { cif.call::<()>(code, &arg_values) };
            Ok(())
        }
        TypeSig::Boolean | TypeSig::U1 => call_into!(u8),
        TypeSig::I1 => call_into!(i8),
        TypeSig::Char | TypeSig::U2 => call_into!(u16),
        TypeSig::I2 => call_into!(i16),
        TypeSig::I4 => call_into!(i32),
        TypeSig::U4 => call_into!(u32),
        TypeSig::I8 => call_into!(i64),
        TypeSig::U8 => call_into!(u64),
        TypeSig::R4 => call_into!(f32),
        TypeSig::R8 => call_into!(f64),
        TypeSig::IntPtr => call_into!(isize),
        TypeSig::UIntPtr => call_into!(usize),
        _ => call_into!(usize),
    }
}
