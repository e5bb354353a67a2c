//! Runtime-side records for assemblies, modules, classes and their members.
//!
//! Assemblies, modules and classes live in the append-only [`MetadataStore`] and are addressed by
//! handle. Members are owned by their declaring class's lazy collections and shared by `Arc`.
use super::{
    handles::{AssemblyHandle, ClassHandle, ModuleHandle},
    lazy::LazyMembers,
    raw::{ModuleMetadata, Visibility},
    types::TypeSig,
};
use crate::{
    error::{RuntimeError, RuntimeResult},
    invoke::MethodImpl,
    statics::TypeInitState,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, OnceLock,
    },
};

#[derive(Debug)]
pub struct Assembly {
    pub(crate) handle: AssemblyHandle,
    pub(crate) name: String,
    pub(crate) module: ModuleHandle,
}

impl Assembly {
    pub fn handle(&self) -> AssemblyHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> ModuleHandle {
        self.module
    }
}

pub struct ModuleDef {
    pub(crate) handle: ModuleHandle,
    pub(crate) assembly: AssemblyHandle,
    pub(crate) name: String,
    pub(crate) is_corlib: bool,
    pub(crate) classes: Vec<ClassHandle>,
    pub(crate) source: Arc<dyn ModuleMetadata>,
}

impl ModuleDef {
    pub fn handle(&self) -> ModuleHandle {
        self.handle
    }

    pub fn assembly(&self) -> AssemblyHandle {
        self.assembly
    }

    /// Module file name including its extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_without_extension(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    pub fn is_corlib(&self) -> bool {
        self.is_corlib
    }

    /// All classes of the module in definition order.
    pub fn classes(&self) -> &[ClassHandle] {
        &self.classes
    }

    pub(crate) fn source(&self) -> &dyn ModuleMetadata {
        &*self.source
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("is_corlib", &self.is_corlib)
            .field("classes", &self.classes.len())
            .finish()
    }
}

/// Size and alignment of a value type's instance fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLayout {
    pub size: usize,
    pub align: usize,
}

#[derive(Debug)]
pub struct Class {
    pub(crate) handle: ClassHandle,
    pub(crate) module: ModuleHandle,
    pub(crate) row: usize,
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) parent: Option<ClassHandle>,
    pub(crate) declaring_class: Option<ClassHandle>,
    pub(crate) visibility: Visibility,
    pub(crate) is_interface: bool,
    pub(crate) interfaces: LazyMembers<ClassHandle>,
    pub(crate) nested_classes: LazyMembers<ClassHandle>,
    pub(crate) methods: LazyMembers<Arc<MethodInfo>>,
    pub(crate) fields: LazyMembers<Arc<FieldInfo>>,
    pub(crate) properties: LazyMembers<Arc<PropertyInfo>>,
    pub(crate) events: LazyMembers<Arc<EventInfo>>,
    pub(crate) layout: OnceLock<ValueLayout>,
    pub(crate) byval_sig: OnceLock<TypeSig>,
    pub(crate) statics: TypeInitState,
}

impl Class {
    pub(crate) fn new(
        handle: ClassHandle,
        module: ModuleHandle,
        row: usize,
        namespace: String,
        name: String,
        full_name: String,
    ) -> Self {
        Self {
            handle,
            module,
            row,
            namespace,
            name,
            full_name,
            parent: None,
            declaring_class: None,
            visibility: Visibility::Public,
            is_interface: false,
            interfaces: LazyMembers::new(),
            nested_classes: LazyMembers::new(),
            methods: LazyMembers::new(),
            fields: LazyMembers::new(),
            properties: LazyMembers::new(),
            events: LazyMembers::new(),
            layout: OnceLock::new(),
            byval_sig: OnceLock::new(),
            statics: TypeInitState::default(),
        }
    }

    pub fn handle(&self) -> ClassHandle {
        self.handle
    }

    pub fn module(&self) -> ModuleHandle {
        self.module
    }

    /// Declaration-order row of this class in its module.
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Namespace.Name`, or `Namespace.Outer/Inner` for nested classes.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn parent(&self) -> Option<ClassHandle> {
        self.parent
    }

    /// The enclosing class of a nested class.
    pub fn declaring_class(&self) -> Option<ClassHandle> {
        self.declaring_class
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn is_exported(&self) -> bool {
        self.visibility.is_exported()
    }

    pub fn is_interface(&self) -> bool {
        self.is_interface
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn nested_class_count(&self) -> usize {
        self.nested_classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Whether the type initializer has completed (or there was none to run).
    pub fn is_type_initialized(&self) -> bool {
        self.statics.state() == crate::statics::INIT_STATE_INITIALIZED
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    pub(crate) name: String,
    pub(crate) sig: TypeSig,
}

impl ParamInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sig(&self) -> &TypeSig {
        &self.sig
    }
}

#[derive(Debug)]
pub struct MethodInfo {
    pub(crate) declaring_class: ClassHandle,
    pub(crate) module: ModuleHandle,
    pub(crate) row: usize,
    pub(crate) name: String,
    pub(crate) qualified_name: String,
    pub(crate) is_static: bool,
    pub(crate) is_virtual: bool,
    pub(crate) special_name: bool,
    pub(crate) params: Vec<ParamInfo>,
    pub(crate) return_type: TypeSig,
    pub(crate) implementation: MethodImpl,
    pub(crate) total_arg_stack_object_size: usize,
    pub(crate) return_value_stack_object_size: usize,
}

impl MethodInfo {
    pub fn declaring_class(&self) -> ClassHandle {
        self.declaring_class
    }

    pub fn module(&self) -> ModuleHandle {
        self.module
    }

    /// Declaration-order position among the class's methods.
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Namespace.Type::Method`, the key used by the native registration tables.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_instance(&self) -> bool {
        !self.is_static
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn is_constructor(&self) -> bool {
        self.special_name && self.is_instance() && self.name == ".ctor"
    }

    pub fn is_type_initializer(&self) -> bool {
        self.special_name && self.is_static && self.name == ".cctor" && self.params.is_empty()
    }

    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn return_type(&self) -> &TypeSig {
        &self.return_type
    }

    pub fn implementation(&self) -> &MethodImpl {
        &self.implementation
    }

    /// Slots the argument buffer must hold: the receiver (if any) plus every parameter.
    pub fn total_arg_stack_object_size(&self) -> usize {
        self.total_arg_stack_object_size
    }

    pub fn return_value_stack_object_size(&self) -> usize {
        self.return_value_stack_object_size
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.qualified_name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", p.sig, p.name)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug)]
pub struct FieldInfo {
    pub(crate) declaring_class: ClassHandle,
    pub(crate) name: String,
    pub(crate) sig: TypeSig,
    pub(crate) is_static: bool,
}

impl FieldInfo {
    pub fn declaring_class(&self) -> ClassHandle {
        self.declaring_class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sig(&self) -> &TypeSig {
        &self.sig
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }
}

#[derive(Debug)]
pub struct PropertyInfo {
    pub(crate) declaring_class: ClassHandle,
    pub(crate) name: String,
    pub(crate) sig: TypeSig,
    pub(crate) getter: Option<Arc<MethodInfo>>,
    pub(crate) setter: Option<Arc<MethodInfo>>,
}

impl PropertyInfo {
    pub fn declaring_class(&self) -> ClassHandle {
        self.declaring_class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sig(&self) -> &TypeSig {
        &self.sig
    }

    pub fn getter(&self) -> Option<&Arc<MethodInfo>> {
        self.getter.as_ref()
    }

    pub fn setter(&self) -> Option<&Arc<MethodInfo>> {
        self.setter.as_ref()
    }
}

#[derive(Debug)]
pub struct EventInfo {
    pub(crate) declaring_class: ClassHandle,
    pub(crate) name: String,
    pub(crate) add: Option<Arc<MethodInfo>>,
    pub(crate) remove: Option<Arc<MethodInfo>>,
    pub(crate) raise: Option<Arc<MethodInfo>>,
}

impl EventInfo {
    pub fn declaring_class(&self) -> ClassHandle {
        self.declaring_class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_method(&self) -> Option<&Arc<MethodInfo>> {
        self.add.as_ref()
    }

    pub fn remove_method(&self) -> Option<&Arc<MethodInfo>> {
        self.remove.as_ref()
    }

    pub fn raise_method(&self) -> Option<&Arc<MethodInfo>> {
        self.raise.as_ref()
    }
}

/// Append-only tables of everything the runtime has loaded.
///
/// Every store has its own id, stamped into the handles it issues; a handle from another store is
/// rejected rather than resolved against the wrong table.
///
/// Lock order when committing is assemblies, then modules, then classes; readers only ever hold
/// one read lock at a time.
pub(crate) struct MetadataStore {
    id: u32,
    assemblies: RwLock<Vec<Arc<Assembly>>>,
    modules: RwLock<Vec<Arc<ModuleDef>>>,
    classes: RwLock<Vec<Arc<Class>>>,
    by_name: DashMap<String, AssemblyHandle>,
}

static NEXT_STORE_ID: AtomicU32 = AtomicU32::new(1);

impl Default for MetadataStore {
    fn default() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            assemblies: RwLock::default(),
            modules: RwLock::default(),
            classes: RwLock::default(),
            by_name: DashMap::new(),
        }
    }
}

fn lookup<T>(table: &RwLock<Vec<Arc<T>>>, index: Option<usize>) -> Option<Arc<T>> {
    index.and_then(|i| table.read().get(i).cloned())
}

impl MetadataStore {
    pub fn id(&self) -> u32 {
        self.id
    }

    fn owned(&self, owner: u32, index: usize) -> Option<usize> {
        (owner == self.id).then_some(index)
    }

    pub fn assembly(&self, handle: AssemblyHandle) -> RuntimeResult<Arc<Assembly>> {
        lookup(&self.assemblies, self.owned(handle.owner(), handle.index()))
            .ok_or_else(|| RuntimeError::invalid_handle(handle))
    }

    pub fn module(&self, handle: ModuleHandle) -> RuntimeResult<Arc<ModuleDef>> {
        lookup(&self.modules, self.owned(handle.owner(), handle.index()))
            .ok_or_else(|| RuntimeError::invalid_handle(handle))
    }

    pub fn class(&self, handle: ClassHandle) -> RuntimeResult<Arc<Class>> {
        lookup(&self.classes, self.owned(handle.owner(), handle.index()))
            .ok_or_else(|| RuntimeError::invalid_handle(handle))
    }

    pub fn assembly_count(&self) -> usize {
        self.assemblies.read().len()
    }

    pub fn assembly_handles(&self) -> Vec<AssemblyHandle> {
        self.assemblies.read().iter().map(|a| a.handle).collect()
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// First class among `handles` satisfying `predicate`, under a single read lock.
    pub fn find_class<P>(&self, handles: &[ClassHandle], mut predicate: P) -> Option<ClassHandle>
    where
        P: FnMut(&Class) -> bool,
    {
        let classes = self.classes.read();
        handles.iter().copied().find(|h| {
            h.owner() == self.id && classes.get(h.index()).is_some_and(|c| predicate(c))
        })
    }

    pub fn find_assembly(&self, name: &str) -> Option<AssemblyHandle> {
        self.by_name.get(name).map(|h| *h)
    }

    /// Publish a module and its class records in one step. `build` receives the new module's
    /// handle and the class-table index its first class will occupy.
    pub fn commit<F>(
        &self,
        requested_name: &str,
        assembly_name: &str,
        module_name: &str,
        is_corlib: bool,
        source: Arc<dyn ModuleMetadata>,
        build: F,
    ) -> AssemblyHandle
    where
        F: FnOnce(ModuleHandle, usize) -> Vec<Class>,
    {
        let mut assemblies = self.assemblies.write();
        let mut modules = self.modules.write();
        let mut classes = self.classes.write();

        let assembly = AssemblyHandle::new(self.id, assemblies.len());
        let module = ModuleHandle::new(self.id, modules.len());
        let base = classes.len();

        let records = build(module, base);
        let handles = (base..base + records.len())
            .map(|i| ClassHandle::new(self.id, i))
            .collect();
        classes.extend(records.into_iter().map(Arc::new));

        modules.push(Arc::new(ModuleDef {
            handle: module,
            assembly,
            name: module_name.to_string(),
            is_corlib,
            classes: handles,
            source,
        }));
        assemblies.push(Arc::new(Assembly {
            handle: assembly,
            name: assembly_name.to_string(),
            module,
        }));

        self.by_name.insert(assembly_name.to_string(), assembly);
        if requested_name != assembly_name {
            self.by_name.insert(requested_name.to_string(), assembly);
        }
        assembly
    }
}
