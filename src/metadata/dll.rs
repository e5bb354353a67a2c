//! Metadata decoded from on-disk assembly images with `dotnetdll`.
use super::raw::{
    AssemblyResolver, ModuleMetadata, RawEvent, RawField, RawMethod, RawMethodImpl, RawParam,
    RawProperty, RawTypeDef, RawTypeRef, RawTypeSig, Visibility,
};
use crate::error::{AssemblyLoadError, RuntimeError, RuntimeResult};
use dotnetdll::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
    ptr,
    sync::Arc,
};
use tracing::debug;

/// Looks up `<name>.dll` under a root directory.
#[derive(Debug, Clone)]
pub struct DllResolver {
    assembly_root: PathBuf,
}

impl DllResolver {
    pub fn new(assembly_root: impl Into<PathBuf>) -> Self {
        Self {
            assembly_root: assembly_root.into(),
        }
    }

    pub fn assembly_root(&self) -> &Path {
        &self.assembly_root
    }
}

impl AssemblyResolver for DllResolver {
    fn resolve(&self, name: &str) -> Result<Arc<dyn ModuleMetadata>, AssemblyLoadError> {
        let path = self.assembly_root.join(format!("{name}.dll"));
        if !path.exists() {
            return Err(AssemblyLoadError::FileNotFound(path.display().to_string()));
        }
        Ok(Arc::new(DllModule::open(&path, name)?))
    }
}

pub struct DllModule {
    assembly_name: String,
    module_name: String,
    resolution: &'static Resolution<'static>,
}

impl DllModule {
    pub fn open(path: &Path, requested_name: &str) -> Result<Self, AssemblyLoadError> {
        let bytes = fs::read(path)
            .map_err(|e| AssemblyLoadError::Io(format!("{}: {e}", path.display())))?;
        // Resolutions borrow their image for their whole lifetime and are never unloaded.
        let image: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        let resolution = Resolution::parse(image, ReadOptions::default()).map_err(|e| {
            AssemblyLoadError::InvalidFormat(format!("{}: {e:?}", path.display()))
        })?;
        let resolution: &'static Resolution<'static> = Box::leak(Box::new(resolution));

        let assembly_name = resolution
            .assembly
            .as_ref()
            .map_or_else(|| requested_name.to_string(), |a| a.name.to_string());
        let module_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or_else(|| format!("{requested_name}.dll"), str::to_string);

        debug!(
            assembly = %assembly_name,
            types = resolution.type_definitions.len(),
            "parsed assembly image"
        );

        Ok(Self {
            assembly_name,
            module_name,
            resolution,
        })
    }

    fn definition(&self, row: usize) -> RuntimeResult<&'static TypeDefinition<'static>> {
        self.resolution.type_definitions.get(row).ok_or_else(|| {
            RuntimeError::malformed(format!(
                "type row {row} out of range in {}",
                self.module_name
            ))
        })
    }

    fn row_of(&self, td: &TypeDefinition<'static>) -> RuntimeResult<usize> {
        self.resolution
            .type_definitions
            .iter()
            .position(|t| ptr::eq(t, td))
            .ok_or_else(|| RuntimeError::malformed(format!("dangling type index for {}", td.name)))
    }

    fn user_type_ref(&self, user: UserType) -> RuntimeResult<RawTypeRef> {
        match user {
            UserType::Definition(d) => Ok(RawTypeRef::Definition(self.row_of(&self.resolution[d])?)),
            UserType::Reference(r) => {
                let type_ref = &self.resolution[r];
                match &type_ref.scope {
                    ResolutionScope::Assembly(a) => Ok(RawTypeRef::External {
                        assembly: self.resolution[*a].name.to_string(),
                        namespace: type_ref.namespace.as_deref().unwrap_or("").to_string(),
                        name: type_ref.name.to_string(),
                    }),
                    ResolutionScope::Nested(o) => Ok(RawTypeRef::nested(
                        self.user_type_ref(UserType::Reference(*o))?,
                        type_ref.name.to_string(),
                    )),
                    _ => Err(RuntimeError::malformed(format!(
                        "unsupported resolution scope for {}",
                        type_ref.name
                    ))),
                }
            }
        }
    }

    fn type_source_ref<T>(&self, source: &TypeSource<T>) -> RuntimeResult<RawTypeRef> {
        match source {
            TypeSource::User(u) | TypeSource::Generic { base: u, .. } => self.user_type_ref(*u),
        }
    }

    fn base_sig<T>(&self, base: &BaseType<T>) -> RuntimeResult<RawTypeSig> {
        Ok(match base {
            BaseType::Type {
                value_kind, source, ..
            } => {
                let target = self.type_source_ref(source)?;
                if matches!(value_kind, Some(ValueKind::ValueType)) {
                    RawTypeSig::ValueType(target)
                } else {
                    RawTypeSig::Class(target)
                }
            }
            BaseType::Boolean => RawTypeSig::Boolean,
            BaseType::Char => RawTypeSig::Char,
            BaseType::Int8 => RawTypeSig::I1,
            BaseType::UInt8 => RawTypeSig::U1,
            BaseType::Int16 => RawTypeSig::I2,
            BaseType::UInt16 => RawTypeSig::U2,
            BaseType::Int32 => RawTypeSig::I4,
            BaseType::UInt32 => RawTypeSig::U4,
            BaseType::Int64 => RawTypeSig::I8,
            BaseType::UInt64 => RawTypeSig::U8,
            BaseType::Float32 => RawTypeSig::R4,
            BaseType::Float64 => RawTypeSig::R8,
            BaseType::IntPtr => RawTypeSig::IntPtr,
            BaseType::UIntPtr => RawTypeSig::UIntPtr,
            BaseType::Object => RawTypeSig::Object,
            BaseType::String => RawTypeSig::String,
            BaseType::Vector(..) | BaseType::Array(..) => RawTypeSig::Array,
            BaseType::ValuePointer(..) | BaseType::FunctionPointer(_) => RawTypeSig::Pointer,
        })
    }

    fn member_sig(&self, t: &MemberType) -> RuntimeResult<RawTypeSig> {
        match t {
            MemberType::Base(b) => self.base_sig(b),
            MemberType::TypeGeneric(i) => Ok(RawTypeSig::GenericParam(*i)),
        }
    }

    fn method_sig(&self, t: &MethodType) -> RuntimeResult<RawTypeSig> {
        match t {
            MethodType::Base(b) => self.base_sig(b),
            MethodType::TypeGeneric(i) | MethodType::MethodGeneric(i) => {
                Ok(RawTypeSig::GenericParam(*i))
            }
        }
    }

    fn parameter_sig(&self, p: &ParameterType<MethodType>) -> RuntimeResult<RawTypeSig> {
        match p {
            ParameterType::Value(t) => self.method_sig(t),
            ParameterType::Ref(t) => Ok(RawTypeSig::ByRef(Box::new(self.method_sig(t)?))),
            ParameterType::TypedReference => Ok(RawTypeSig::TypedReference),
        }
    }

    fn raw_method(&self, m: &Method<'static>) -> RuntimeResult<RawMethod> {
        let params = m
            .signature
            .parameters
            .iter()
            .enumerate()
            .map(|(i, Parameter(_, p))| {
                Ok(RawParam {
                    name: format!("arg{i}"),
                    sig: self.parameter_sig(p)?,
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?;

        let return_type = match &m.signature.return_type {
            ReturnType(_, None) => RawTypeSig::Void,
            ReturnType(_, Some(p)) => self.parameter_sig(p)?,
        };

        let implementation = if let Some(p) = &m.pinvoke {
            RawMethodImpl::PInvoke {
                module: self.resolution[p.import_scope].name.to_string(),
                entry: p.import_name.to_string(),
            }
        } else if m.internal_call {
            RawMethodImpl::InternalCall
        } else if m.body.is_some() {
            RawMethodImpl::Managed
        } else {
            RawMethodImpl::Abstract
        };

        Ok(RawMethod {
            name: m.name.to_string(),
            is_static: !m.signature.instance,
            is_virtual: m.virtual_member,
            special_name: m.runtime_special_name,
            params,
            return_type,
            implementation,
        })
    }
}

impl ModuleMetadata for DllModule {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    fn type_count(&self) -> usize {
        self.resolution.type_definitions.len()
    }

    fn type_def(&self, row: usize) -> RuntimeResult<RawTypeDef> {
        let td = self.definition(row)?;
        let encloser = td
            .encloser
            .map(|e| self.row_of(&self.resolution[e]))
            .transpose()?;
        let extends = td
            .extends
            .as_ref()
            .map(|ts| self.type_source_ref(ts))
            .transpose()?;
        // Compiler-generated types (`<Module>`, closures, state machines) are never exported.
        let hidden = td.name.starts_with('<');
        let visibility = match (encloser.is_some(), hidden) {
            (false, false) => Visibility::Public,
            (false, true) => Visibility::NotPublic,
            (true, false) => Visibility::NestedPublic,
            (true, true) => Visibility::NestedPrivate,
        };

        Ok(RawTypeDef {
            namespace: td.namespace.as_deref().unwrap_or("").to_string(),
            name: td.name.to_string(),
            extends,
            encloser,
            visibility,
            is_interface: matches!(td.flags.kind, Kind::Interface),
        })
    }

    fn interfaces(&self, row: usize) -> RuntimeResult<Vec<RawTypeRef>> {
        self.definition(row)?
            .implements
            .iter()
            .map(|(_, ts)| self.type_source_ref(ts))
            .collect()
    }

    fn nested_types(&self, row: usize) -> RuntimeResult<Vec<usize>> {
        let owner = self.definition(row)?;
        Ok(self
            .resolution
            .type_definitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.encloser.is_some_and(|e| ptr::eq(&self.resolution[e], owner)))
            .map(|(i, _)| i)
            .collect())
    }

    fn methods(&self, row: usize) -> RuntimeResult<Vec<RawMethod>> {
        let td = self.definition(row)?;
        let accessors = td
            .properties
            .iter()
            .flat_map(|p| p.getter.iter().chain(p.setter.iter()))
            .chain(td.events.iter().flat_map(|e| {
                [&e.add_listener, &e.remove_listener]
                    .into_iter()
                    .chain(e.raise_event.iter())
            }));
        td.methods
            .iter()
            .chain(accessors)
            .map(|m| self.raw_method(m))
            .collect()
    }

    fn fields(&self, row: usize) -> RuntimeResult<Vec<RawField>> {
        self.definition(row)?
            .fields
            .iter()
            .map(|f| {
                Ok(RawField {
                    name: f.name.to_string(),
                    sig: self.member_sig(&f.return_type)?,
                    is_static: f.static_member,
                })
            })
            .collect()
    }

    fn properties(&self, row: usize) -> RuntimeResult<Vec<RawProperty>> {
        self.definition(row)?
            .properties
            .iter()
            .map(|p| {
                let sig = match (&p.getter, &p.setter) {
                    (Some(getter), _) => match &getter.signature.return_type {
                        ReturnType(_, Some(t)) => self.parameter_sig(t)?,
                        ReturnType(_, None) => RawTypeSig::Void,
                    },
                    (None, Some(setter)) => match setter.signature.parameters.last() {
                        Some(Parameter(_, t)) => self.parameter_sig(t)?,
                        None => RawTypeSig::Object,
                    },
                    (None, None) => RawTypeSig::Object,
                };
                Ok(RawProperty {
                    name: p.name.to_string(),
                    sig,
                    getter: p.getter.as_ref().map(|m| m.name.to_string()),
                    setter: p.setter.as_ref().map(|m| m.name.to_string()),
                })
            })
            .collect()
    }

    fn events(&self, row: usize) -> RuntimeResult<Vec<RawEvent>> {
        Ok(self
            .definition(row)?
            .events
            .iter()
            .map(|e| RawEvent {
                name: e.name.to_string(),
                add: Some(e.add_listener.name.to_string()),
                remove: Some(e.remove_listener.name.to_string()),
                raise: e.raise_event.as_ref().map(|m| m.name.to_string()),
            })
            .collect())
    }

    fn forwarded_type(&self, namespace: &str, name: &str) -> Option<String> {
        self.resolution.exported_types.iter().find_map(|e| {
            if e.namespace.as_deref().unwrap_or("") != namespace || e.name != name {
                return None;
            }
            match e.implementation {
                TypeImplementation::TypeForwarder(a) => Some(self.resolution[a].name.to_string()),
                _ => None,
            }
        })
    }
}
