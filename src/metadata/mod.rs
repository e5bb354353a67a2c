//! Metadata model: typed handles, the provider boundary, resolved signatures and the runtime's
//! own records for assemblies, modules, classes and members.
mod dll;
mod handles;
mod lazy;
mod memory;
mod model;
mod raw;
mod types;

pub use dll::{DllModule, DllResolver};
pub use handles::{AssemblyHandle, ClassHandle, ModuleHandle};
pub use lazy::{LazyMembers, LazyState};
pub use memory::{InMemoryModule, InMemoryResolver, InMemoryType, TypeBuilder};
pub(crate) use model::MetadataStore;
pub use model::{
    Assembly, Class, EventInfo, FieldInfo, MethodInfo, ModuleDef, ParamInfo, PropertyInfo,
    ValueLayout,
};
pub use raw::{
    AssemblyResolver, ModuleMetadata, RawEvent, RawField, RawMethod, RawMethodImpl, RawParam,
    RawProperty, RawTypeDef, RawTypeRef, RawTypeSig, Visibility,
};
pub use types::{corlib_primitive, TypeSig, POINTER_SIZE};
