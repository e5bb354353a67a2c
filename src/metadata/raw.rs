//! The boundary between the runtime and whatever decodes assembly images.
//!
//! An [`AssemblyResolver`] turns assembly names into [`ModuleMetadata`] sources, which answer
//! row-level questions about type definitions and their members. Type references inside these
//! records are expressed as [`RawTypeRef`]s and resolved into class handles by the runtime.
use crate::error::{AssemblyLoadError, RuntimeResult};
use std::sync::Arc;

pub trait AssemblyResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Arc<dyn ModuleMetadata>, AssemblyLoadError>;
}

/// Row-level access to one module's type definitions. Every per-type query is addressed by the
/// type's row (its position in declaration order).
pub trait ModuleMetadata: Send + Sync {
    /// File name of the module image, e.g. `Core.dll`.
    fn module_name(&self) -> &str;
    fn assembly_name(&self) -> &str;
    fn type_count(&self) -> usize;
    fn type_def(&self, row: usize) -> RuntimeResult<RawTypeDef>;
    fn interfaces(&self, row: usize) -> RuntimeResult<Vec<RawTypeRef>>;
    /// Rows of the types directly nested in `row`.
    fn nested_types(&self, row: usize) -> RuntimeResult<Vec<usize>>;
    fn methods(&self, row: usize) -> RuntimeResult<Vec<RawMethod>>;
    fn fields(&self, row: usize) -> RuntimeResult<Vec<RawField>>;
    fn properties(&self, row: usize) -> RuntimeResult<Vec<RawProperty>>;
    fn events(&self, row: usize) -> RuntimeResult<Vec<RawEvent>>;

    /// The assembly a type has been forwarded to, if this module forwards it.
    fn forwarded_type(&self, _namespace: &str, _name: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawTypeRef {
    /// A type defined in the same module, by row.
    Definition(usize),
    External {
        assembly: String,
        namespace: String,
        name: String,
    },
    Nested {
        enclosing: Box<RawTypeRef>,
        name: String,
    },
}

impl RawTypeRef {
    /// An external reference from a dotted full name such as `System.Object`.
    pub fn external(assembly: impl Into<String>, full_name: &str) -> Self {
        let (namespace, name) = match full_name.rsplit_once('.') {
            Some((namespace, name)) => (namespace.to_string(), name.to_string()),
            None => (String::new(), full_name.to_string()),
        };
        Self::External {
            assembly: assembly.into(),
            namespace,
            name,
        }
    }

    pub fn nested(enclosing: RawTypeRef, name: impl Into<String>) -> Self {
        Self::Nested {
            enclosing: Box::new(enclosing),
            name: name.into(),
        }
    }

    /// Whether the reference bottoms out in a definition of the referring module.
    pub fn is_local(&self) -> bool {
        match self {
            Self::Definition(_) => true,
            Self::External { .. } => false,
            Self::Nested { enclosing, .. } => enclosing.is_local(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Public,
    NotPublic,
    NestedPublic,
    /// Any nested accessibility narrower than public.
    NestedPrivate,
}

impl Visibility {
    pub fn is_exported(self) -> bool {
        matches!(self, Self::Public | Self::NestedPublic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTypeDef {
    pub namespace: String,
    pub name: String,
    pub extends: Option<RawTypeRef>,
    /// Row of the enclosing type for nested types.
    pub encloser: Option<usize>,
    pub visibility: Visibility,
    pub is_interface: bool,
}

impl RawTypeDef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            extends: None,
            encloser: None,
            visibility: Visibility::Public,
            is_interface: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawTypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    IntPtr,
    UIntPtr,
    Object,
    String,
    Pointer,
    Array,
    TypedReference,
    ByRef(Box<RawTypeSig>),
    Class(RawTypeRef),
    ValueType(RawTypeRef),
    GenericParam(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMethodImpl {
    /// Has an IL body for the interpreter.
    Managed,
    PInvoke { module: String, entry: String },
    InternalCall,
    Intrinsic,
    /// No body at all: abstract, interface or runtime-provided.
    Abstract,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParam {
    pub name: String,
    pub sig: RawTypeSig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMethod {
    pub name: String,
    pub is_static: bool,
    pub is_virtual: bool,
    pub special_name: bool,
    pub params: Vec<RawParam>,
    pub return_type: RawTypeSig,
    pub implementation: RawMethodImpl,
}

impl RawMethod {
    /// A static managed method returning `return_type` with no parameters.
    pub fn new(name: impl Into<String>, return_type: RawTypeSig) -> Self {
        Self {
            name: name.into(),
            is_static: true,
            is_virtual: false,
            special_name: false,
            params: Vec::new(),
            return_type,
            implementation: RawMethodImpl::Managed,
        }
    }

    pub fn type_initializer() -> Self {
        Self::new(".cctor", RawTypeSig::Void).special_name()
    }

    pub fn constructor() -> Self {
        Self::new(".ctor", RawTypeSig::Void).instance().special_name()
    }

    pub fn instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    pub fn virtual_method(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn special_name(mut self) -> Self {
        self.special_name = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>, sig: RawTypeSig) -> Self {
        self.params.push(RawParam {
            name: name.into(),
            sig,
        });
        self
    }

    pub fn pinvoke(mut self, module: impl Into<String>, entry: impl Into<String>) -> Self {
        self.implementation = RawMethodImpl::PInvoke {
            module: module.into(),
            entry: entry.into(),
        };
        self
    }

    pub fn internal_call(mut self) -> Self {
        self.implementation = RawMethodImpl::InternalCall;
        self
    }

    pub fn intrinsic(mut self) -> Self {
        self.implementation = RawMethodImpl::Intrinsic;
        self
    }

    pub fn abstract_method(mut self) -> Self {
        self.is_virtual = true;
        self.implementation = RawMethodImpl::Abstract;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub sig: RawTypeSig,
    pub is_static: bool,
}

impl RawField {
    pub fn new(name: impl Into<String>, sig: RawTypeSig) -> Self {
        Self {
            name: name.into(),
            sig,
            is_static: false,
        }
    }

    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProperty {
    pub name: String,
    pub sig: RawTypeSig,
    pub getter: Option<String>,
    pub setter: Option<String>,
}

impl RawProperty {
    pub fn new(name: impl Into<String>, sig: RawTypeSig) -> Self {
        Self {
            name: name.into(),
            sig,
            getter: None,
            setter: None,
        }
    }

    pub fn getter(mut self, method: impl Into<String>) -> Self {
        self.getter = Some(method.into());
        self
    }

    pub fn setter(mut self, method: impl Into<String>) -> Self {
        self.setter = Some(method.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub add: Option<String>,
    pub remove: Option<String>,
    pub raise: Option<String>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            add: None,
            remove: None,
            raise: None,
        }
    }

    /// Conventional `add_<Name>` / `remove_<Name>` accessors.
    pub fn with_default_accessors(mut self) -> Self {
        self.add = Some(format!("add_{}", self.name));
        self.remove = Some(format!("remove_{}", self.name));
        self
    }

    pub fn raise(mut self, method: impl Into<String>) -> Self {
        self.raise = Some(method.into());
        self
    }
}
