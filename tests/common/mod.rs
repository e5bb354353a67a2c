#![allow(dead_code)]

use dotnet_embed::{
    error::RuntimeError,
    metadata::{
        InMemoryModule, InMemoryResolver, ModuleMetadata, RawEvent, RawField, RawMethod,
        RawProperty, RawTypeDef, RawTypeRef, RawTypeSig, Visibility,
    },
    stack::{read_return, set_return_value, write_return, ArgReader},
    ClassHandle, Interpreter, MethodInfo, ModuleHandle, Runtime, RuntimeConfig, RuntimeResult,
    StackObject,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

pub const CORLIB: &str = "mscorlib";

/// Wraps a module and counts how often each member query reaches it.
#[derive(Default)]
pub struct CountingModule {
    inner: InMemoryModule,
    pub interface_calls: AtomicUsize,
    pub nested_calls: AtomicUsize,
    pub method_calls: AtomicUsize,
    pub field_calls: AtomicUsize,
    pub property_calls: AtomicUsize,
    pub event_calls: AtomicUsize,
    pub fail_fields: AtomicBool,
}

impl CountingModule {
    pub fn new(inner: InMemoryModule) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }
}

impl ModuleMetadata for CountingModule {
    fn module_name(&self) -> &str {
        self.inner.module_name()
    }

    fn assembly_name(&self) -> &str {
        self.inner.assembly_name()
    }

    fn type_count(&self) -> usize {
        self.inner.type_count()
    }

    fn type_def(&self, row: usize) -> RuntimeResult<RawTypeDef> {
        self.inner.type_def(row)
    }

    fn interfaces(&self, row: usize) -> RuntimeResult<Vec<RawTypeRef>> {
        self.interface_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.interfaces(row)
    }

    fn nested_types(&self, row: usize) -> RuntimeResult<Vec<usize>> {
        self.nested_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.nested_types(row)
    }

    fn methods(&self, row: usize) -> RuntimeResult<Vec<RawMethod>> {
        self.method_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.methods(row)
    }

    fn fields(&self, row: usize) -> RuntimeResult<Vec<RawField>> {
        self.field_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fields.load(Ordering::SeqCst) {
            return Err(RuntimeError::malformed("field table is corrupt"));
        }
        self.inner.fields(row)
    }

    fn properties(&self, row: usize) -> RuntimeResult<Vec<RawProperty>> {
        self.property_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.properties(row)
    }

    fn events(&self, row: usize) -> RuntimeResult<Vec<RawEvent>> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.events(row)
    }
}

#[derive(Default)]
pub struct Counters {
    pub foo_cctor_runs: AtomicUsize,
    pub broken_cctor_runs: AtomicUsize,
    pub executed: AtomicUsize,
}

/// Interprets the handful of managed bodies the `Core` fixture declares.
pub struct StubInterpreter {
    pub counters: Arc<Counters>,
}

impl Interpreter for StubInterpreter {
    fn execute(
        &self,
        _runtime: &Runtime,
        method: &MethodInfo,
        args: &[StackObject],
        ret: &mut [StackObject],
    ) -> RuntimeResult<()> {
        self.counters.executed.fetch_add(1, Ordering::SeqCst);
        match method.qualified_name() {
            "Namespace.Foo::.cctor" => {
                self.counters.foo_cctor_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            "Namespace.Foo::Bar" => {
                let x = ArgReader::new(args).read::<i32>()?;
                write_return(ret, x * 2 + 1)
            }
            "Namespace.Broken::.cctor" => {
                self.counters.broken_cctor_runs.fetch_add(1, Ordering::SeqCst);
                Err(RuntimeError::Invocation("static constructor threw".to_string()))
            }
            "Namespace.Panicky::Boom" => panic!("interpreter lost its place"),
            "Namespace.Point::Shift" => {
                let mut point = [0u8; 16];
                ArgReader::new(args).read_bytes(&mut point)?;
                let x = i32::from_ne_bytes(point[..4].try_into().unwrap()) + 1;
                point[..4].copy_from_slice(&x.to_ne_bytes());
                set_return_value(ret, &point)
            }
            _ => Ok(()),
        }
    }
}

fn object() -> RawTypeRef {
    RawTypeRef::external(CORLIB, "System.Object")
}

pub fn core_module() -> InMemoryModule {
    use RawTypeSig::*;

    let mut m = InMemoryModule::new("Core");
    let ithing = m
        .add_type("Namespace", "IThing")
        .interface()
        .method(RawMethod::new("Run", Void).instance().abstract_method())
        .row();

    let foo = m
        .add_type("Namespace", "Foo")
        .extends(object())
        .implements(RawTypeRef::Definition(ithing))
        .method(RawMethod::type_initializer())
        .method(RawMethod::new("Bar", I4).param("x", I4))
        .method(RawMethod::new("Bar", I4).param("x", I4).param("y", I4))
        .method(RawMethod::new("Baz", Void))
        .method(
            RawMethod::new("NativeAdd", I4)
                .param("a", I4)
                .param("b", I4)
                .pinvoke("native", "NativeAdd"),
        )
        .method(RawMethod::new("get_Value", I4).instance().special_name())
        .method(
            RawMethod::new("add_Changed", Void)
                .instance()
                .special_name()
                .param("handler", Object),
        )
        .method(
            RawMethod::new("remove_Changed", Void)
                .instance()
                .special_name()
                .param("handler", Object),
        )
        .method(RawMethod::new("Run", Void).instance().virtual_method())
        .field(RawField::new("Count", I4).static_field())
        .field(RawField::new("value", I4))
        .property(RawProperty::new("Value", I4).getter("get_Value"))
        .event(RawEvent::new("Changed").with_default_accessors())
        .row();
    m.add_type("", "Inner")
        .nested_in(foo)
        .extends(object())
        .method(RawMethod::new("Ping", Void));
    m.add_type("", "Hidden")
        .nested_in(foo)
        .visibility(Visibility::NestedPrivate);

    let point = m
        .add_type("Namespace", "Point")
        .extends(RawTypeRef::external(CORLIB, "System.ValueType"))
        .field(RawField::new("X", I4))
        .field(RawField::new("Y", I8))
        .field(RawField::new("Origin", I4).static_field())
        .row();
    m.edit(point).method(
        RawMethod::new("Shift", ValueType(RawTypeRef::Definition(point)))
            .param("p", ValueType(RawTypeRef::Definition(point))),
    );

    let color = m
        .add_type("Namespace", "Color")
        .extends(RawTypeRef::external(CORLIB, "System.Enum"))
        .field(RawField::new("value__", I4))
        .row();
    m.edit(color)
        .field(RawField::new("Red", ValueType(RawTypeRef::Definition(color))).static_field());

    m.add_type("Namespace", "Broken")
        .extends(object())
        .method(RawMethod::type_initializer())
        .method(RawMethod::new("Touch", Void));

    m.add_type("Namespace", "Bad")
        .extends(object())
        .implements(RawTypeRef::Definition(999));

    m.add_type("Namespace", "Native")
        .extends(object())
        .method(RawMethod::constructor().param("seed", I4).internal_call())
        .method(RawMethod::new("Twice", I4).param("x", I4).internal_call())
        .method(RawMethod::new("Unbound", Void).pinvoke("native", "Unregistered"))
        .method(RawMethod::new("Missing", Void).internal_call());

    m.add_type("Namespace", "Handle")
        .extends(object())
        .method(RawMethod::constructor().param("seed", I4).pinvoke("native", "CreateHandle"))
        .method(RawMethod::new("Seed", I4).param("seed", I4).pinvoke("native", "CreateHandle"));

    m.add_type("Namespace", "Panicky")
        .extends(object())
        .method(RawMethod::new("Boom", Void));

    m.add_type("", "<PrivateImplementationDetails>")
        .visibility(Visibility::NotPublic);
    m
}

pub struct TestHarness {
    pub runtime: Runtime,
    pub core: Arc<CountingModule>,
    pub counters: Arc<Counters>,
}

impl TestHarness {
    pub fn new() -> Self {
        let core = Arc::new(CountingModule::new(core_module()));
        let counters = Arc::new(Counters::default());
        let resolver = InMemoryResolver::new()
            .with_module(InMemoryModule::corlib(CORLIB))
            .with_source("Core", core.clone());

        let runtime = Runtime::builder()
            .config(RuntimeConfig::default().with_corlib(CORLIB))
            .resolver(resolver)
            .interpreter(StubInterpreter {
                counters: counters.clone(),
            })
            .initialize()
            .expect("runtime initializes");

        Self {
            runtime,
            core,
            counters,
        }
    }

    pub fn core_module(&self) -> ModuleHandle {
        let assembly = self.runtime.load_assembly("Core").expect("Core loads");
        self.runtime.get_module_for_assembly(assembly).expect("Core has a module")
    }

    pub fn class(&self, full_name: &str) -> ClassHandle {
        let module = self.core_module();
        self.runtime
            .get_class_by_name(module, full_name, false)
            .unwrap_or_else(|| panic!("{full_name} exists"))
    }

    pub fn corlib_class(&self, full_name: &str) -> ClassHandle {
        let module = self.runtime.corlib().expect("corlib loaded");
        self.runtime
            .get_class_by_name(module, full_name, false)
            .unwrap_or_else(|| panic!("{full_name} exists"))
    }

    pub fn method(&self, class: &str, name: &str) -> Arc<MethodInfo> {
        self.runtime
            .get_class_method_by_name(self.class(class), name, false)
            .expect("methods initialize")
            .unwrap_or_else(|| panic!("{class}::{name} exists"))
    }

    /// Invoke a method taking and returning a single `int`.
    pub fn call_i32(&self, method: &MethodInfo, arg: i32) -> Result<i32, dotnet_embed::ExceptionRef> {
        let mut args = vec![StackObject::ZERO; method.total_arg_stack_object_size()];
        dotnet_embed::stack::ArgWriter::new(&mut args)
            .push(arg)
            .expect("argument fits");
        let mut ret = vec![StackObject::ZERO; method.return_value_stack_object_size()];
        self.runtime.invoke_with_buffer(method, &args, &mut ret)?;
        Ok(read_return::<i32>(&ret).expect("return fits"))
    }
}
