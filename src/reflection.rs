//! Lazy reflection over a class's members.
//!
//! The six member collections of a class (interfaces, nested classes, methods, fields,
//! properties, events) are derived from the module's metadata source the first time they are
//! asked for, then served from the class's cache. `initialize_*` propagate [`RuntimeError`]s
//! for use inside the runtime; the `get_class_*` family is the host surface and reports
//! failures as exception objects. By-name lookups return `None` when nothing matches.
use crate::{
    error::{RuntimeError, RuntimeResult},
    exceptions::ExceptionRef,
    invoke::{InternalCall, Interpreted, Intrinsic, MethodImpl, NoBody, PInvoke},
    metadata::{
        corlib_primitive, Class, ClassHandle, EventInfo, FieldInfo, MethodInfo, ModuleDef,
        ParamInfo, PropertyInfo, RawMethod, RawMethodImpl, RawTypeSig, TypeSig, ValueLayout,
        POINTER_SIZE,
    },
    runtime::names_match,
    stack::stack_object_size_of_byte_size,
    Runtime,
};
use std::sync::Arc;
use tracing::trace;

/// Value types nested deeper than this are treated as recursive layouts.
const MAX_LAYOUT_DEPTH: usize = 64;

fn find_named<T>(
    items: &[Arc<T>],
    name: &str,
    ignore_case: bool,
    name_of: impl Fn(&T) -> &str,
) -> Option<Arc<T>> {
    items
        .iter()
        .find(|&item| names_match(name_of(&**item), name, ignore_case))
        .cloned()
}

impl Runtime {
    pub fn initialize_interfaces(&self, class: ClassHandle) -> RuntimeResult<Arc<[ClassHandle]>> {
        let record = self.class(class)?;
        record.interfaces.get_or_try_init(|| {
            let module = self.module(record.module())?;
            trace!(class = %record.full_name(), "initializing interfaces");
            module
                .source()
                .interfaces(record.row())?
                .iter()
                .map(|r| self.resolve_type_ref(Some(&*module), r))
                .collect()
        })
    }

    pub fn initialize_nested_classes(
        &self,
        class: ClassHandle,
    ) -> RuntimeResult<Arc<[ClassHandle]>> {
        let record = self.class(class)?;
        record.nested_classes.get_or_try_init(|| {
            let module = self.module(record.module())?;
            trace!(class = %record.full_name(), "initializing nested classes");
            module
                .source()
                .nested_types(record.row())?
                .into_iter()
                .map(|row| {
                    let nested = module.classes().get(row).copied().ok_or_else(|| {
                        RuntimeError::malformed(format!("nested type row {row} does not exist"))
                    })?;
                    if self.class(nested)?.declaring_class() != Some(class) {
                        return Err(RuntimeError::malformed(format!(
                            "type row {row} is not nested in {}",
                            record.full_name()
                        )));
                    }
                    Ok(nested)
                })
                .collect()
        })
    }

    pub fn initialize_methods(&self, class: ClassHandle) -> RuntimeResult<Arc<[Arc<MethodInfo>]>> {
        let record = self.class(class)?;
        record.methods.get_or_try_init(|| {
            let module = self.module(record.module())?;
            trace!(class = %record.full_name(), "initializing methods");
            module
                .source()
                .methods(record.row())?
                .into_iter()
                .enumerate()
                .map(|(row, raw)| self.build_method(&record, &module, row, raw).map(Arc::new))
                .collect()
        })
    }

    pub fn initialize_fields(&self, class: ClassHandle) -> RuntimeResult<Arc<[Arc<FieldInfo>]>> {
        let record = self.class(class)?;
        record.fields.get_or_try_init(|| {
            let module = self.module(record.module())?;
            trace!(class = %record.full_name(), "initializing fields");
            module
                .source()
                .fields(record.row())?
                .into_iter()
                .map(|raw| {
                    Ok(Arc::new(FieldInfo {
                        declaring_class: class,
                        sig: self.resolve_sig(&module, &raw.sig)?,
                        name: raw.name,
                        is_static: raw.is_static,
                    }))
                })
                .collect()
        })
    }

    pub fn initialize_properties(
        &self,
        class: ClassHandle,
    ) -> RuntimeResult<Arc<[Arc<PropertyInfo>]>> {
        let record = self.class(class)?;
        record.properties.get_or_try_init(|| {
            let module = self.module(record.module())?;
            trace!(class = %record.full_name(), "initializing properties");
            module
                .source()
                .properties(record.row())?
                .into_iter()
                .map(|raw| {
                    Ok(Arc::new(PropertyInfo {
                        declaring_class: class,
                        sig: self.resolve_sig(&module, &raw.sig)?,
                        getter: self.accessor(class, raw.getter.as_deref())?,
                        setter: self.accessor(class, raw.setter.as_deref())?,
                        name: raw.name,
                    }))
                })
                .collect()
        })
    }

    pub fn initialize_events(&self, class: ClassHandle) -> RuntimeResult<Arc<[Arc<EventInfo>]>> {
        let record = self.class(class)?;
        record.events.get_or_try_init(|| {
            let module = self.module(record.module())?;
            trace!(class = %record.full_name(), "initializing events");
            module
                .source()
                .events(record.row())?
                .into_iter()
                .map(|raw| {
                    Ok(Arc::new(EventInfo {
                        declaring_class: class,
                        add: self.accessor(class, raw.add.as_deref())?,
                        remove: self.accessor(class, raw.remove.as_deref())?,
                        raise: self.accessor(class, raw.raise.as_deref())?,
                        name: raw.name,
                    }))
                })
                .collect()
        })
    }

    fn accessor(
        &self,
        class: ClassHandle,
        name: Option<&str>,
    ) -> RuntimeResult<Option<Arc<MethodInfo>>> {
        match name {
            Some(name) => self.find_method_by_name(class, name, false),
            None => Ok(None),
        }
    }

    pub fn find_method_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> RuntimeResult<Option<Arc<MethodInfo>>> {
        let methods = self.initialize_methods(class)?;
        Ok(find_named(&methods, name, ignore_case, MethodInfo::name))
    }

    /// First method in declaration order with this name and parameter count.
    pub fn find_method_by_name_and_arity(
        &self,
        class: ClassHandle,
        name: &str,
        param_count: usize,
    ) -> RuntimeResult<Option<Arc<MethodInfo>>> {
        let methods = self.initialize_methods(class)?;
        Ok(methods
            .iter()
            .find(|m| m.name() == name && m.param_count() == param_count)
            .cloned())
    }

    pub fn find_field_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> RuntimeResult<Option<Arc<FieldInfo>>> {
        let fields = self.initialize_fields(class)?;
        Ok(find_named(&fields, name, ignore_case, FieldInfo::name))
    }

    pub fn find_property_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> RuntimeResult<Option<Arc<PropertyInfo>>> {
        let properties = self.initialize_properties(class)?;
        Ok(find_named(&properties, name, ignore_case, PropertyInfo::name))
    }

    pub fn find_event_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> RuntimeResult<Option<Arc<EventInfo>>> {
        let events = self.initialize_events(class)?;
        Ok(find_named(&events, name, ignore_case, EventInfo::name))
    }

    /// The class's static constructor, if it declares one.
    pub fn find_type_initializer(
        &self,
        class: ClassHandle,
    ) -> RuntimeResult<Option<Arc<MethodInfo>>> {
        let methods = self.initialize_methods(class)?;
        Ok(methods.iter().find(|m| m.is_type_initializer()).cloned())
    }

    pub fn get_class_interfaces(
        &self,
        class: ClassHandle,
    ) -> Result<Arc<[ClassHandle]>, ExceptionRef> {
        self.initialize_interfaces(class)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_nested_classes(
        &self,
        class: ClassHandle,
    ) -> Result<Arc<[ClassHandle]>, ExceptionRef> {
        self.initialize_nested_classes(class)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_methods(
        &self,
        class: ClassHandle,
    ) -> Result<Arc<[Arc<MethodInfo>]>, ExceptionRef> {
        self.initialize_methods(class)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_method_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> Result<Option<Arc<MethodInfo>>, ExceptionRef> {
        self.find_method_by_name(class, name, ignore_case)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_method_by_name_and_arity(
        &self,
        class: ClassHandle,
        name: &str,
        param_count: usize,
    ) -> Result<Option<Arc<MethodInfo>>, ExceptionRef> {
        self.find_method_by_name_and_arity(class, name, param_count)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_fields(
        &self,
        class: ClassHandle,
    ) -> Result<Arc<[Arc<FieldInfo>]>, ExceptionRef> {
        self.initialize_fields(class)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_field_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> Result<Option<Arc<FieldInfo>>, ExceptionRef> {
        self.find_field_by_name(class, name, ignore_case)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_properties(
        &self,
        class: ClassHandle,
    ) -> Result<Arc<[Arc<PropertyInfo>]>, ExceptionRef> {
        self.initialize_properties(class)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_property_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> Result<Option<Arc<PropertyInfo>>, ExceptionRef> {
        self.find_property_by_name(class, name, ignore_case)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_events(
        &self,
        class: ClassHandle,
    ) -> Result<Arc<[Arc<EventInfo>]>, ExceptionRef> {
        self.initialize_events(class)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    pub fn get_class_event_by_name(
        &self,
        class: ClassHandle,
        name: &str,
        ignore_case: bool,
    ) -> Result<Option<Arc<EventInfo>>, ExceptionRef> {
        self.find_event_by_name(class, name, ignore_case)
            .map_err(|e| self.raise_error_as_exception(e))
    }

    /// The signature of the class used by value: a primitive for corlib's built-in types,
    /// otherwise a class or value-type reference.
    pub fn get_class_byval_arg(&self, class: ClassHandle) -> RuntimeResult<TypeSig> {
        let record = self.class(class)?;
        if let Some(sig) = record.byval_sig.get() {
            return Ok(sig.clone());
        }
        let is_corlib = self.module(record.module())?.is_corlib();
        let sig = match corlib_primitive(record.namespace(), record.name()) {
            Some(primitive) if is_corlib && record.declaring_class().is_none() => primitive,
            _ if self.is_value_type(class) => TypeSig::ValueType(class),
            _ => TypeSig::Class(class),
        };
        Ok(record.byval_sig.get_or_init(|| sig).clone())
    }

    /// The signature of a managed reference to the class, as used for `this` and `ref` params.
    pub fn get_class_this_arg(&self, class: ClassHandle) -> RuntimeResult<TypeSig> {
        Ok(TypeSig::ByRef(Box::new(self.get_class_byval_arg(class)?)))
    }

    /// Size and alignment of a value type's instance fields, laid out in declaration order.
    pub fn value_layout(&self, class: ClassHandle) -> RuntimeResult<ValueLayout> {
        self.value_layout_at_depth(class, 0)
    }

    fn value_layout_at_depth(&self, class: ClassHandle, depth: usize) -> RuntimeResult<ValueLayout> {
        let record = self.class(class)?;
        if let Some(layout) = record.layout.get() {
            return Ok(*layout);
        }
        if depth > MAX_LAYOUT_DEPTH {
            return Err(RuntimeError::malformed(format!(
                "{} has a recursive layout",
                record.full_name()
            )));
        }

        let mut size: usize = 0;
        let mut align: usize = 1;
        for field in self.initialize_fields(class)?.iter().filter(|f| !f.is_static()) {
            let (field_size, field_align) = self.sig_layout(field.sig(), depth + 1)?;
            size = size.next_multiple_of(field_align) + field_size;
            align = align.max(field_align);
        }
        // Empty structs still occupy a byte.
        let layout = ValueLayout {
            size: size.next_multiple_of(align).max(1),
            align,
        };
        Ok(*record.layout.get_or_init(|| layout))
    }

    fn sig_layout(&self, sig: &TypeSig, depth: usize) -> RuntimeResult<(usize, usize)> {
        match sig {
            TypeSig::ValueType(class) => {
                let layout = self.value_layout_at_depth(*class, depth)?;
                Ok((layout.size, layout.align))
            }
            other => {
                let size = other.fixed_size().unwrap_or(POINTER_SIZE);
                Ok((size, size.clamp(1, POINTER_SIZE)))
            }
        }
    }

    /// Byte size of a value of type `sig` as it is passed on the stack.
    pub fn type_size(&self, sig: &TypeSig) -> RuntimeResult<usize> {
        Ok(self.sig_layout(sig, 0)?.0)
    }

    fn resolve_sig(&self, module: &ModuleDef, raw: &RawTypeSig) -> RuntimeResult<TypeSig> {
        Ok(match raw {
            RawTypeSig::Void => TypeSig::Void,
            RawTypeSig::Boolean => TypeSig::Boolean,
            RawTypeSig::Char => TypeSig::Char,
            RawTypeSig::I1 => TypeSig::I1,
            RawTypeSig::U1 => TypeSig::U1,
            RawTypeSig::I2 => TypeSig::I2,
            RawTypeSig::U2 => TypeSig::U2,
            RawTypeSig::I4 => TypeSig::I4,
            RawTypeSig::U4 => TypeSig::U4,
            RawTypeSig::I8 => TypeSig::I8,
            RawTypeSig::U8 => TypeSig::U8,
            RawTypeSig::R4 => TypeSig::R4,
            RawTypeSig::R8 => TypeSig::R8,
            RawTypeSig::IntPtr => TypeSig::IntPtr,
            RawTypeSig::UIntPtr => TypeSig::UIntPtr,
            RawTypeSig::Object => TypeSig::Object,
            RawTypeSig::String => TypeSig::String,
            RawTypeSig::Pointer => TypeSig::Pointer,
            RawTypeSig::Array => TypeSig::Array,
            RawTypeSig::TypedReference => TypeSig::TypedReference,
            RawTypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(self.resolve_sig(module, inner)?)),
            RawTypeSig::Class(r) | RawTypeSig::ValueType(r) => {
                let class = self.resolve_type_ref(Some(module), r)?;
                self.get_class_byval_arg(class)?
            }
            RawTypeSig::GenericParam(i) => TypeSig::GenericParam(*i),
        })
    }

    fn build_method(
        &self,
        class: &Class,
        module: &ModuleDef,
        row: usize,
        raw: RawMethod,
    ) -> RuntimeResult<MethodInfo> {
        let params = raw
            .params
            .into_iter()
            .map(|p| {
                Ok(ParamInfo {
                    sig: self.resolve_sig(module, &p.sig)?,
                    name: p.name,
                })
            })
            .collect::<RuntimeResult<Vec<_>>>()?;
        let return_type = self.resolve_sig(module, &raw.return_type)?;

        let mut arg_slots = usize::from(!raw.is_static);
        for param in &params {
            arg_slots += stack_object_size_of_byte_size(self.type_size(param.sig())?);
        }
        let ret_slots = stack_object_size_of_byte_size(self.type_size(&return_type)?);

        let implementation = match raw.implementation {
            RawMethodImpl::Managed => MethodImpl::Interpreted(Interpreted),
            RawMethodImpl::PInvoke { module, entry } => {
                MethodImpl::PInvoke(PInvoke { module, entry })
            }
            RawMethodImpl::InternalCall => MethodImpl::InternalCall(InternalCall),
            RawMethodImpl::Intrinsic => MethodImpl::Intrinsic(Intrinsic),
            RawMethodImpl::Abstract => MethodImpl::NoBody(NoBody),
        };

        Ok(MethodInfo {
            declaring_class: class.handle(),
            module: module.handle(),
            row,
            qualified_name: format!("{}::{}", class.full_name(), raw.name),
            name: raw.name,
            is_static: raw.is_static,
            is_virtual: raw.is_virtual,
            special_name: raw.special_name,
            params,
            return_type,
            implementation,
            total_arg_stack_object_size: arg_slots,
            return_value_stack_object_size: ret_slots,
        })
    }
}
