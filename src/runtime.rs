//! The runtime context object: lifecycle, loaded-assembly tables and type resolution.
//!
//! Everything that would otherwise be process-wide state (the registration tables, the loaded
//! module list, the class table) hangs off a [`Runtime`], so several isolated runtimes can live
//! in one process. A runtime is created by [`RuntimeBuilder::initialize`] and torn down by
//! [`Runtime::shutdown`], which consumes it.
use crate::{
    config::RuntimeConfig,
    error::{AssemblyLoadError, RuntimeError, RuntimeResult},
    exceptions::{CorlibExceptionFactory, ExceptionFactory, ExceptionRef},
    intrinsics,
    invoke::{Interpreter, NoInterpreter},
    metadata::{
        Assembly, AssemblyHandle, AssemblyResolver, Class, ClassHandle, DllResolver, MetadataStore,
        ModuleDef, ModuleHandle, RawTypeDef, RawTypeRef,
    },
    native::{MethodPointer, NativeInvoker, NativeKind, NativeRegistry, NativeTable},
    pinvoke::NativeLibraries,
};
use parking_lot::ReentrantMutex;
use std::{
    cell::RefCell,
    sync::{Arc, OnceLock},
};
use tracing::{debug, info};

/// How many type-forwarding hops to follow before giving up.
const MAX_FORWARDS: usize = 8;

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    resolver: Option<Box<dyn AssemblyResolver>>,
    interpreter: Box<dyn Interpreter>,
    exceptions: Box<dyn ExceptionFactory>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            resolver: None,
            interpreter: Box::new(NoInterpreter),
            exceptions: Box::new(CorlibExceptionFactory),
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `resolver` instead of a [`DllResolver`] over the configured assembly root.
    pub fn resolver(mut self, resolver: impl AssemblyResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn interpreter(mut self, interpreter: impl Interpreter + 'static) -> Self {
        self.interpreter = Box::new(interpreter);
        self
    }

    pub fn exception_factory(mut self, factory: impl ExceptionFactory + 'static) -> Self {
        self.exceptions = Box::new(factory);
        self
    }

    /// Bring up a runtime: registers the built-in intrinsics and loads the core library.
    pub fn initialize(self) -> RuntimeResult<Runtime> {
        let resolver = match (self.resolver, &self.config.assembly_root) {
            (Some(resolver), _) => resolver,
            (None, Some(root)) => Box::new(DllResolver::new(root.clone())),
            (None, None) => {
                return Err(RuntimeError::Initialization(
                    "no assembly resolver or assembly root configured".to_string(),
                ))
            }
        };
        let libraries = NativeLibraries::new(
            self.config
                .native_library_root
                .clone()
                .unwrap_or_else(|| ".".into()),
        );

        let runtime = Runtime {
            config: self.config,
            resolver,
            interpreter: self.interpreter,
            exceptions: self.exceptions,
            natives: NativeRegistry::default(),
            libraries,
            store: MetadataStore::default(),
            loading: ReentrantMutex::new(RefCell::new(Vec::new())),
            corlib: OnceLock::new(),
        };

        intrinsics::register_builtins(runtime.native_table(NativeKind::Intrinsic));

        let corlib_name = runtime.config.corlib_name.clone();
        let corlib = runtime.load_assembly_internal(&corlib_name).map_err(|e| {
            RuntimeError::Initialization(format!("could not load core library {corlib_name}: {e}"))
        })?;
        let _ = runtime.corlib.set(runtime.assembly(corlib)?.module());

        info!(corlib = %corlib_name, "runtime initialized");
        Ok(runtime)
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    resolver: Box<dyn AssemblyResolver>,
    interpreter: Box<dyn Interpreter>,
    exceptions: Box<dyn ExceptionFactory>,
    natives: NativeRegistry,
    libraries: NativeLibraries,
    store: MetadataStore,
    /// Names of assemblies whose load is in progress on the lock-holding thread.
    loading: ReentrantMutex<RefCell<Vec<String>>>,
    corlib: OnceLock<ModuleHandle>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Tear the runtime down. Consumes it, so no handle-taking call can follow.
    pub fn shutdown(self) {
        info!(
            assemblies = self.store.assembly_count(),
            "runtime shutting down"
        );
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &dyn Interpreter {
        &*self.interpreter
    }

    pub fn native_libraries(&self) -> &NativeLibraries {
        &self.libraries
    }

    pub fn native_table(&self, kind: NativeKind) -> &NativeTable {
        self.natives.table(kind)
    }

    pub fn register_pinvoke_func(&self, name: &str, func: MethodPointer, invoker: NativeInvoker) {
        self.native_table(NativeKind::PInvoke)
            .register(name, func, invoker);
    }

    pub fn register_newobj_pinvoke_func(&self, name: &str, invoker: NativeInvoker) {
        self.native_table(NativeKind::PInvoke)
            .register_newobj(name, invoker);
    }

    pub fn register_internal_call_func(
        &self,
        name: &str,
        func: MethodPointer,
        invoker: NativeInvoker,
    ) {
        self.native_table(NativeKind::InternalCall)
            .register(name, func, invoker);
    }

    pub fn register_newobj_internal_call_func(&self, name: &str, invoker: NativeInvoker) {
        self.native_table(NativeKind::InternalCall)
            .register_newobj(name, invoker);
    }

    pub fn register_intrinsic_func(&self, name: &str, func: MethodPointer, invoker: NativeInvoker) {
        self.native_table(NativeKind::Intrinsic)
            .register(name, func, invoker);
    }

    pub fn register_newobj_intrinsic_func(&self, name: &str, invoker: NativeInvoker) {
        self.native_table(NativeKind::Intrinsic)
            .register_newobj(name, invoker);
    }

    pub fn raise_error_as_exception(&self, error: RuntimeError) -> ExceptionRef {
        debug!(%error, "raising error as exception");
        self.exceptions.create(&error, None, None)
    }

    pub fn create_exception(
        &self,
        error: &RuntimeError,
        message: Option<&str>,
        inner: Option<ExceptionRef>,
    ) -> ExceptionRef {
        self.exceptions.create(error, message, inner)
    }

    /// Identifier stamped into every handle this runtime issues.
    pub fn id(&self) -> u32 {
        self.store.id()
    }

    /// The record behind `handle`, or [`RuntimeError::InvalidHandle`] if this runtime did not
    /// issue it.
    pub fn assembly(&self, handle: AssemblyHandle) -> RuntimeResult<Arc<Assembly>> {
        self.store.assembly(handle)
    }

    pub fn module(&self, handle: ModuleHandle) -> RuntimeResult<Arc<ModuleDef>> {
        self.store.module(handle)
    }

    pub fn class(&self, handle: ClassHandle) -> RuntimeResult<Arc<Class>> {
        self.store.class(handle)
    }

    pub fn corlib(&self) -> Option<ModuleHandle> {
        self.corlib.get().copied()
    }

    pub fn get_assembly_count(&self) -> usize {
        self.store.assembly_count()
    }

    /// Loaded assemblies in registration order.
    pub fn get_assemblies(&self) -> Vec<AssemblyHandle> {
        self.store.assembly_handles()
    }

    /// Exact, case-sensitive lookup among loaded assemblies. Never loads.
    pub fn get_assembly(&self, name: &str) -> Option<AssemblyHandle> {
        self.store.find_assembly(name)
    }

    pub fn load_assembly(&self, name: &str) -> Result<AssemblyHandle, ExceptionRef> {
        self.load_assembly_internal(name)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    // The queries below answer "absent" (None, false, empty) for handles this runtime did not
    // issue.

    pub fn get_module_for_assembly(&self, assembly: AssemblyHandle) -> Option<ModuleHandle> {
        self.assembly(assembly).ok().map(|a| a.module())
    }

    pub fn get_assembly_for_module(&self, module: ModuleHandle) -> Option<AssemblyHandle> {
        self.module(module).ok().map(|m| m.assembly())
    }

    pub fn module_is_corlib(&self, module: ModuleHandle) -> bool {
        self.module(module).is_ok_and(|m| m.is_corlib())
    }

    pub fn get_module_name_noext(&self, module: ModuleHandle) -> Option<String> {
        self.module(module)
            .ok()
            .map(|m| m.name_without_extension().to_string())
    }

    pub fn get_class_count(&self, module: ModuleHandle) -> usize {
        self.module(module).map_or(0, |m| m.classes().len())
    }

    /// Classes of `module` in definition order, optionally only those visible outside it.
    pub fn get_classes(&self, module: ModuleHandle, export_only: bool) -> Vec<ClassHandle> {
        let Ok(module) = self.module(module) else {
            return Vec::new();
        };
        if !export_only {
            return module.classes().to_vec();
        }
        module
            .classes()
            .iter()
            .copied()
            .filter(|c| self.is_class_exported(*c))
            .collect()
    }

    /// A class is exported when it and every enclosing class are publicly visible.
    pub fn is_class_exported(&self, class: ClassHandle) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            match self.class(c) {
                Ok(record) if record.is_exported() => current = record.declaring_class(),
                _ => return false,
            }
        }
        true
    }

    /// Look up a class by `Namespace.Name` (or `Namespace.Outer/Inner`). Absence is not an error.
    pub fn get_class_by_name(
        &self,
        module: ModuleHandle,
        full_name: &str,
        ignore_case: bool,
    ) -> Option<ClassHandle> {
        let module = self.module(module).ok()?;
        self.store.find_class(module.classes(), |c| {
            names_match(c.full_name(), full_name, ignore_case)
        })
    }

    /// `class` followed by its parent chain up to the root.
    pub fn ancestors(&self, class: ClassHandle) -> Ancestors<'_> {
        Ancestors {
            runtime: self,
            next: Some(class),
            remaining: self.store.class_count(),
        }
    }

    pub fn is_value_type(&self, class: ClassHandle) -> bool {
        match self.class(class) {
            Ok(record) if !is_system_type(&record, "Enum") => self
                .ancestors(class)
                .skip(1)
                .any(|a| self.is_named_system_type(a, "ValueType")),
            _ => false,
        }
    }

    pub fn is_enum(&self, class: ClassHandle) -> bool {
        self.class(class)
            .ok()
            .and_then(|c| c.parent())
            .is_some_and(|p| self.is_named_system_type(p, "Enum"))
    }

    fn is_named_system_type(&self, class: ClassHandle, name: &str) -> bool {
        self.class(class).is_ok_and(|c| is_system_type(&c, name))
    }

    pub(crate) fn load_assembly_internal(&self, name: &str) -> RuntimeResult<AssemblyHandle> {
        if let Some(handle) = self.store.find_assembly(name) {
            return Ok(handle);
        }

        let guard = self.loading.lock();
        if let Some(handle) = self.store.find_assembly(name) {
            return Ok(handle);
        }
        if guard.borrow().iter().any(|n| n == name) {
            return Err(AssemblyLoadError::CircularDependency(name.to_string()).into());
        }

        guard.borrow_mut().push(name.to_string());
        let result = self.load_module(name);
        guard.borrow_mut().retain(|n| n != name);
        result
    }

    fn load_module(&self, name: &str) -> RuntimeResult<AssemblyHandle> {
        debug!(assembly = name, "loading assembly");
        let source = self.resolver.resolve(name)?;

        let defs = (0..source.type_count())
            .map(|row| source.type_def(row))
            .collect::<RuntimeResult<Vec<_>>>()?;
        let full_names = qualified_type_names(&defs)?;

        // Parents in other assemblies are resolved (and loaded) before anything is published.
        let mut parents = Vec::with_capacity(defs.len());
        for def in &defs {
            parents.push(match &def.extends {
                None => ParentRef::None,
                Some(r) if r.is_local() => ParentRef::Local(local_row(&defs, r)?),
                Some(r) => ParentRef::External(self.resolve_type_ref(None, r)?),
            });
        }

        let assembly_name = source.assembly_name().to_string();
        let module_name = source.module_name().to_string();
        let is_corlib =
            assembly_name == self.config.corlib_name || name == self.config.corlib_name;
        let type_count = defs.len();

        let handle = self.store.commit(
            name,
            &assembly_name,
            &module_name,
            is_corlib,
            source,
            |module, base| {
                defs.into_iter()
                    .zip(full_names)
                    .zip(parents)
                    .enumerate()
                    .map(|(row, ((def, full_name), parent))| {
                        let mut class = Class::new(
                            ClassHandle::new(module.owner(), base + row),
                            module,
                            row,
                            def.namespace,
                            def.name,
                            full_name,
                        );
                        class.parent = match parent {
                            ParentRef::None => None,
                            ParentRef::Local(r) => {
                                Some(ClassHandle::new(module.owner(), base + r))
                            }
                            ParentRef::External(h) => Some(h),
                        };
                        class.declaring_class = def
                            .encloser
                            .map(|e| ClassHandle::new(module.owner(), base + e));
                        class.visibility = def.visibility;
                        class.is_interface = def.is_interface;
                        class
                    })
                    .collect()
            },
        );

        info!(
            assembly = %assembly_name,
            types = type_count,
            corlib = is_corlib,
            "loaded assembly"
        );
        Ok(handle)
    }

    /// Resolve a type reference made from `module`. `None` means the referring module has not
    /// been published yet, so only references into other assemblies can be resolved.
    pub(crate) fn resolve_type_ref(
        &self,
        module: Option<&ModuleDef>,
        raw: &RawTypeRef,
    ) -> RuntimeResult<ClassHandle> {
        match raw {
            RawTypeRef::Definition(row) => module
                .and_then(|m| m.classes().get(*row).copied())
                .ok_or_else(|| RuntimeError::malformed(format!("type row {row} does not exist"))),
            RawTypeRef::External {
                assembly,
                namespace,
                name,
            } => self.resolve_external(assembly, namespace, name),
            RawTypeRef::Nested { enclosing, name } => {
                let enclosing = self.resolve_type_ref(module, enclosing)?;
                let outer = self.class(enclosing)?;
                let full_name = format!("{}/{}", outer.full_name(), name);
                let owner = self.module(outer.module())?;
                self.store
                    .find_class(owner.classes(), |c| c.full_name() == full_name)
                    .ok_or(RuntimeError::TypeLoad(full_name))
            }
        }
    }

    fn resolve_external(
        &self,
        assembly: &str,
        namespace: &str,
        name: &str,
    ) -> RuntimeResult<ClassHandle> {
        let full_name = if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}.{name}")
        };

        let mut target = assembly.to_string();
        for _ in 0..MAX_FORWARDS {
            let handle = self.load_assembly_internal(&target)?;
            let module = self.module(self.assembly(handle)?.module())?;
            if let Some(class) = self
                .store
                .find_class(module.classes(), |c| c.full_name() == full_name)
            {
                return Ok(class);
            }
            match module.source().forwarded_type(namespace, name) {
                Some(next) => {
                    debug!(r#type = %full_name, from = %target, to = %next, "following type forwarder");
                    target = next;
                }
                None => break,
            }
        }
        Err(RuntimeError::TypeLoad(format!("{full_name} in assembly {target}")))
    }
}

pub(crate) fn names_match(a: &str, b: &str, ignore_case: bool) -> bool {
    if ignore_case {
        a.chars()
            .flat_map(char::to_lowercase)
            .eq(b.chars().flat_map(char::to_lowercase))
    } else {
        a == b
    }
}

fn is_system_type(class: &Class, name: &str) -> bool {
    class.namespace() == "System" && class.name() == name && class.declaring_class().is_none()
}

enum ParentRef {
    None,
    Local(usize),
    External(ClassHandle),
}

fn local_row(defs: &[RawTypeDef], raw: &RawTypeRef) -> RuntimeResult<usize> {
    match raw {
        RawTypeRef::Definition(row) if *row < defs.len() => Ok(*row),
        RawTypeRef::Definition(row) => Err(RuntimeError::malformed(format!(
            "type row {row} does not exist"
        ))),
        RawTypeRef::Nested { enclosing, name } => {
            let outer = local_row(defs, enclosing)?;
            defs.iter()
                .position(|d| d.encloser == Some(outer) && &d.name == name)
                .ok_or_else(|| {
                    RuntimeError::TypeLoad(format!("{}/{}", defs[outer].name, name))
                })
        }
        RawTypeRef::External { .. } => Err(RuntimeError::malformed(
            "external reference where a local one was expected",
        )),
    }
}

fn qualified_type_names(defs: &[RawTypeDef]) -> RuntimeResult<Vec<String>> {
    (0..defs.len())
        .map(|row| {
            let mut segments = vec![defs[row].name.as_str()];
            let mut outermost = row;
            while let Some(encloser) = defs[outermost].encloser {
                let outer = defs.get(encloser).ok_or_else(|| {
                    RuntimeError::malformed(format!("enclosing type row {encloser} does not exist"))
                })?;
                if segments.len() > defs.len() {
                    return Err(RuntimeError::malformed(format!(
                        "cyclic nesting involving {}",
                        defs[row].name
                    )));
                }
                segments.push(outer.name.as_str());
                outermost = encloser;
            }
            segments.reverse();

            let nested = segments.join("/");
            let namespace = &defs[outermost].namespace;
            Ok(if namespace.is_empty() {
                nested
            } else {
                format!("{namespace}.{nested}")
            })
        })
        .collect()
}

pub struct Ancestors<'a> {
    runtime: &'a Runtime,
    next: Option<ClassHandle>,
    remaining: usize,
}

impl Iterator for Ancestors<'_> {
    type Item = ClassHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let record = self.runtime.class(current).ok()?;
        self.next = record.parent();
        Some(current)
    }
}
