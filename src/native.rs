//! Tables binding method names to host-supplied native implementations.
//!
//! There are three tables, one per [`NativeKind`]. Each maps a name to a [`NativeEntry`]: the
//! function pointer to call and the invoker that knows how to unpack a stack-object argument
//! buffer for it. Each table also keeps a separate map of `newobj` entries used when the method
//! being bound is an instance constructor.
//!
//! Names are `Namespace.Type::Method` for internal calls and intrinsics, and the import entry
//! point for P/Invoke. Registering a name twice replaces the earlier entry.
use crate::{
    error::{RuntimeError, RuntimeResult},
    metadata::MethodInfo,
    stack::StackObject,
};
use dashmap::DashMap;
use std::{ffi::c_void, fmt};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    PInvoke,
    InternalCall,
    Intrinsic,
}

impl fmt::Display for NativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PInvoke => "P/Invoke",
            Self::InternalCall => "internal call",
            Self::Intrinsic => "intrinsic",
        })
    }
}

/// An untyped native code address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodPointer(*const c_void);

// SAFETY: a MethodPointer is only a code address; it is never dereferenced as data.
unsafe impl Send for MethodPointer {}
unsafe impl Sync for MethodPointer {}

impl MethodPointer {
    pub fn new(ptr: *const c_void) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *const c_void {
        self.0
    }
}

/// Unpacks `args` for `func`, calls it, and writes the result into `ret`.
pub type NativeInvoker = fn(
    func: Option<MethodPointer>,
    method: &MethodInfo,
    args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()>;

#[derive(Clone, Copy)]
pub struct NativeEntry {
    pub func: Option<MethodPointer>,
    pub invoker: NativeInvoker,
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry")
            .field("func", &self.func.map(MethodPointer::as_ptr))
            .field("invoker", &(self.invoker as *const ()))
            .finish()
    }
}

impl NativeEntry {
    pub fn call(
        &self,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        (self.invoker)(self.func, method, args, ret)
    }
}

pub struct NativeTable {
    kind: NativeKind,
    functions: DashMap<String, NativeEntry>,
    newobj: DashMap<String, NativeEntry>,
}

impl NativeTable {
    pub fn new(kind: NativeKind) -> Self {
        Self {
            kind,
            functions: DashMap::new(),
            newobj: DashMap::new(),
        }
    }

    pub fn kind(&self) -> NativeKind {
        self.kind
    }

    pub fn register(&self, name: &str, func: MethodPointer, invoker: NativeInvoker) {
        self.insert(
            &self.functions,
            name,
            NativeEntry {
                func: Some(func),
                invoker,
            },
        );
    }

    pub fn register_newobj(&self, name: &str, invoker: NativeInvoker) {
        self.insert(&self.newobj, name, NativeEntry { func: None, invoker });
    }

    fn insert(&self, map: &DashMap<String, NativeEntry>, name: &str, entry: NativeEntry) {
        if map.insert(name.to_string(), entry).is_some() {
            warn!(kind = %self.kind, name, "replacing existing native registration");
        } else {
            trace!(kind = %self.kind, name, "registered native function");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<NativeEntry> {
        self.functions.get(name).map(|e| *e)
    }

    pub fn lookup_newobj(&self, name: &str) -> Option<NativeEntry> {
        self.newobj.get(name).map(|e| *e)
    }

    /// The entry to use for `method` under `name`: constructors prefer a `newobj` entry.
    pub fn find(&self, name: &str, method: &MethodInfo) -> Option<NativeEntry> {
        if method.is_constructor() {
            if let Some(entry) = self.lookup_newobj(name) {
                return Some(entry);
            }
        }
        self.lookup(name)
    }

    pub fn resolve(&self, name: &str, method: &MethodInfo) -> RuntimeResult<NativeEntry> {
        self.find(name, method)
            .ok_or_else(|| RuntimeError::binding_not_found(self.kind, name))
    }

    pub fn len(&self) -> usize {
        self.functions.len() + self.newobj.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct NativeRegistry {
    pinvoke: NativeTable,
    internal_calls: NativeTable,
    intrinsics: NativeTable,
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self {
            pinvoke: NativeTable::new(NativeKind::PInvoke),
            internal_calls: NativeTable::new(NativeKind::InternalCall),
            intrinsics: NativeTable::new(NativeKind::Intrinsic),
        }
    }
}

impl NativeRegistry {
    pub fn table(&self, kind: NativeKind) -> &NativeTable {
        match kind {
            NativeKind::PInvoke => &self.pinvoke,
            NativeKind::InternalCall => &self.internal_calls,
            NativeKind::Intrinsic => &self.intrinsics,
        }
    }
}
