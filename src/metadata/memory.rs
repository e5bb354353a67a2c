//! A metadata provider assembled in code rather than decoded from an image.
//!
//! Hosts use it to define small synthetic assemblies; the test suite builds its corlib and
//! fixture assemblies with it.
use super::raw::{
    AssemblyResolver, ModuleMetadata, RawEvent, RawField, RawMethod, RawProperty, RawTypeDef,
    RawTypeRef, RawTypeSig, Visibility,
};
use crate::error::{AssemblyLoadError, RuntimeError, RuntimeResult};
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, Default)]
pub struct InMemoryType {
    pub def: Option<RawTypeDef>,
    pub interfaces: Vec<RawTypeRef>,
    pub methods: Vec<RawMethod>,
    pub fields: Vec<RawField>,
    pub properties: Vec<RawProperty>,
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryModule {
    assembly_name: String,
    module_name: String,
    types: Vec<InMemoryType>,
    forwarders: HashMap<(String, String), String>,
}

impl InMemoryModule {
    pub fn new(assembly_name: impl Into<String>) -> Self {
        let assembly_name = assembly_name.into();
        Self {
            module_name: format!("{assembly_name}.dll"),
            assembly_name,
            types: Vec::new(),
            forwarders: HashMap::new(),
        }
    }

    /// Append a type definition and return a builder for it.
    pub fn add_type(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> TypeBuilder<'_> {
        let row = self.types.len();
        self.types.push(InMemoryType {
            def: Some(RawTypeDef::new(namespace, name)),
            ..Default::default()
        });
        TypeBuilder { module: self, row }
    }

    /// Reopen an already-added row.
    pub fn edit(&mut self, row: usize) -> TypeBuilder<'_> {
        TypeBuilder { module: self, row }
    }

    pub fn forward(&mut self, namespace: &str, name: &str, assembly: impl Into<String>) {
        self.forwarders
            .insert((namespace.to_string(), name.to_string()), assembly.into());
    }

    /// Row of the first type whose `Namespace.Name` matches.
    pub fn find_row(&self, full_name: &str) -> Option<usize> {
        self.types.iter().position(|t| {
            t.def.as_ref().is_some_and(|d| {
                if d.namespace.is_empty() {
                    d.name == full_name
                } else {
                    full_name
                        .strip_prefix(d.namespace.as_str())
                        .and_then(|rest| rest.strip_prefix('.'))
                        == Some(d.name.as_str())
                }
            })
        })
    }

    /// A minimal corlib: `System.Object`, `System.ValueType`, `System.Enum`, the primitive value
    /// types, `System.String` and `System.Math` with intrinsic entry points.
    pub fn corlib(assembly_name: impl Into<String>) -> Self {
        let mut module = Self::new(assembly_name);
        let object = module.add_type("System", "Object").row();
        module.edit(object).method(RawMethod::constructor());
        let value_type = module
            .add_type("System", "ValueType")
            .extends(RawTypeRef::Definition(object))
            .row();
        module
            .add_type("System", "Enum")
            .extends(RawTypeRef::Definition(value_type));

        for (name, sig) in [
            ("Boolean", RawTypeSig::Boolean),
            ("Char", RawTypeSig::Char),
            ("SByte", RawTypeSig::I1),
            ("Byte", RawTypeSig::U1),
            ("Int16", RawTypeSig::I2),
            ("UInt16", RawTypeSig::U2),
            ("Int32", RawTypeSig::I4),
            ("UInt32", RawTypeSig::U4),
            ("Int64", RawTypeSig::I8),
            ("UInt64", RawTypeSig::U8),
            ("Single", RawTypeSig::R4),
            ("Double", RawTypeSig::R8),
            ("IntPtr", RawTypeSig::IntPtr),
            ("UIntPtr", RawTypeSig::UIntPtr),
        ] {
            module
                .add_type("System", name)
                .extends(RawTypeRef::Definition(value_type))
                .field(RawField::new("m_value", sig));
        }
        module
            .add_type("System", "Void")
            .extends(RawTypeRef::Definition(value_type));
        module
            .add_type("System", "String")
            .extends(RawTypeRef::Definition(object))
            .field(RawField::new("_stringLength", RawTypeSig::I4));

        let mut math = module
            .add_type("System", "Math")
            .extends(RawTypeRef::Definition(object));
        for name in ["Sqrt", "Sin", "Cos", "Floor", "Ceiling"] {
            math = math.method(
                RawMethod::new(name, RawTypeSig::R8)
                    .param("d", RawTypeSig::R8)
                    .intrinsic(),
            );
        }
        math.method(
            RawMethod::new("Pow", RawTypeSig::R8)
                .param("x", RawTypeSig::R8)
                .param("y", RawTypeSig::R8)
                .intrinsic(),
        );
        module
    }

    fn entry(&self, row: usize) -> RuntimeResult<&InMemoryType> {
        self.types.get(row).ok_or_else(|| {
            RuntimeError::malformed(format!(
                "type row {row} out of range in {}",
                self.module_name
            ))
        })
    }
}

pub struct TypeBuilder<'a> {
    module: &'a mut InMemoryModule,
    row: usize,
}

impl TypeBuilder<'_> {
    pub fn row(&self) -> usize {
        self.row
    }

    fn ty(&mut self) -> &mut InMemoryType {
        &mut self.module.types[self.row]
    }

    fn def(&mut self) -> &mut RawTypeDef {
        self.ty().def.get_or_insert_with(|| RawTypeDef::new("", ""))
    }

    pub fn extends(mut self, parent: RawTypeRef) -> Self {
        self.def().extends = Some(parent);
        self
    }

    /// Nest this type in `encloser`; visibility becomes nested-public unless set otherwise.
    pub fn nested_in(mut self, encloser: usize) -> Self {
        let def = self.def();
        def.encloser = Some(encloser);
        def.namespace.clear();
        if def.visibility == Visibility::Public {
            def.visibility = Visibility::NestedPublic;
        }
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.def().visibility = visibility;
        self
    }

    pub fn interface(mut self) -> Self {
        self.def().is_interface = true;
        self
    }

    pub fn implements(mut self, interface: RawTypeRef) -> Self {
        self.ty().interfaces.push(interface);
        self
    }

    pub fn method(mut self, method: RawMethod) -> Self {
        self.ty().methods.push(method);
        self
    }

    pub fn field(mut self, field: RawField) -> Self {
        self.ty().fields.push(field);
        self
    }

    pub fn property(mut self, property: RawProperty) -> Self {
        self.ty().properties.push(property);
        self
    }

    pub fn event(mut self, event: RawEvent) -> Self {
        self.ty().events.push(event);
        self
    }
}

impl ModuleMetadata for InMemoryModule {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    fn type_count(&self) -> usize {
        self.types.len()
    }

    fn type_def(&self, row: usize) -> RuntimeResult<RawTypeDef> {
        self.entry(row)?
            .def
            .clone()
            .ok_or_else(|| RuntimeError::malformed(format!("type row {row} has no definition")))
    }

    fn interfaces(&self, row: usize) -> RuntimeResult<Vec<RawTypeRef>> {
        Ok(self.entry(row)?.interfaces.clone())
    }

    fn nested_types(&self, row: usize) -> RuntimeResult<Vec<usize>> {
        self.entry(row)?;
        Ok(self
            .types
            .iter()
            .enumerate()
            .filter(|(_, t)| t.def.as_ref().and_then(|d| d.encloser) == Some(row))
            .map(|(i, _)| i)
            .collect())
    }

    fn methods(&self, row: usize) -> RuntimeResult<Vec<RawMethod>> {
        Ok(self.entry(row)?.methods.clone())
    }

    fn fields(&self, row: usize) -> RuntimeResult<Vec<RawField>> {
        Ok(self.entry(row)?.fields.clone())
    }

    fn properties(&self, row: usize) -> RuntimeResult<Vec<RawProperty>> {
        Ok(self.entry(row)?.properties.clone())
    }

    fn events(&self, row: usize) -> RuntimeResult<Vec<RawEvent>> {
        Ok(self.entry(row)?.events.clone())
    }

    fn forwarded_type(&self, namespace: &str, name: &str) -> Option<String> {
        self.forwarders
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

/// Resolves assembly names against a fixed set of registered sources.
#[derive(Default)]
pub struct InMemoryResolver {
    sources: HashMap<String, Arc<dyn ModuleMetadata>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: InMemoryModule) -> Self {
        self.add_module(module);
        self
    }

    pub fn add_module(&mut self, module: InMemoryModule) {
        let name = module.assembly_name.clone();
        self.sources.insert(name, Arc::new(module));
    }

    /// Register an arbitrary source under `name`.
    pub fn with_source(mut self, name: impl Into<String>, source: Arc<dyn ModuleMetadata>) -> Self {
        self.sources.insert(name.into(), source);
        self
    }
}

impl AssemblyResolver for InMemoryResolver {
    fn resolve(&self, name: &str) -> Result<Arc<dyn ModuleMetadata>, AssemblyLoadError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| AssemblyLoadError::FileNotFound(name.to_string()))
    }
}
