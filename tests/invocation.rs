mod common;

use common::{TestHarness, CORLIB};
use dotnet_embed::{
    error::RuntimeResult,
    metadata::{InMemoryModule, InMemoryResolver, RawMethod, RawTypeRef, RawTypeSig},
    pinvoke::ffi_invoker,
    stack::{new_buffer, read_return, write_return, ArgReader, ArgWriter},
    MethodInfo, MethodPointer, NativeKind, Runtime, RuntimeConfig, RuntimeError, StackObject,
};
use std::{
    cell::Cell,
    ffi::c_void,
    sync::{atomic::Ordering, Barrier},
};

extern "C" fn native_add(a: i32, b: i32) -> i32 {
    a + b
}

fn add_by_hand(
    func: Option<MethodPointer>,
    _method: &MethodInfo,
    args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()> {
    let func = func.ok_or_else(|| RuntimeError::Invocation("unbound".to_string()))?;
    // SAFETY: registered with `native_add` below.
    let add: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(func.as_ptr()) };
    let mut reader = ArgReader::new(args);
    let (a, b) = (reader.read::<i32>()?, reader.read::<i32>()?);
    write_return(ret, add(a, b))
}

fn twice(
    _func: Option<MethodPointer>,
    _method: &MethodInfo,
    args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()> {
    let x = ArgReader::new(args).read::<i32>()?;
    write_return(ret, x * 2)
}

fn always_99(
    _func: Option<MethodPointer>,
    _method: &MethodInfo,
    _args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()> {
    write_return(ret, 99i32)
}

thread_local! {
    // Invocation runs on the calling thread.
    static LAST_SEED: Cell<i32> = const { Cell::new(0) };
}

fn construct_native(
    _func: Option<MethodPointer>,
    _method: &MethodInfo,
    args: &[StackObject],
    _ret: &mut [StackObject],
) -> RuntimeResult<()> {
    let mut reader = ArgReader::new(args);
    let _this = reader.read::<u64>()?;
    let seed = reader.read::<i32>()?;
    LAST_SEED.with(|last| last.set(seed));
    Ok(())
}

fn reject(
    _func: Option<MethodPointer>,
    method: &MethodInfo,
    _args: &[StackObject],
    _ret: &mut [StackObject],
) -> RuntimeResult<()> {
    Err(RuntimeError::Invocation(format!(
        "{} should have used its newobj entry",
        method.qualified_name()
    )))
}

fn pointer(f: extern "C" fn(i32, i32) -> i32) -> MethodPointer {
    MethodPointer::new(f as *const c_void)
}

#[test]
fn interpreted_method_round_trip() {
    let harness = TestHarness::new();
    let bar = harness.method("Namespace.Foo", "Bar");
    assert_eq!(harness.call_i32(&bar, 20).unwrap(), 41);
    assert_eq!(harness.call_i32(&bar, -1).unwrap(), -1);
}

#[test]
fn type_initializer_runs_once() {
    let harness = TestHarness::new();
    let foo = harness.class("Namespace.Foo");
    let bar = harness.method("Namespace.Foo", "Bar");
    assert!(!harness.runtime.class(foo).unwrap().is_type_initialized());

    for i in 0..5 {
        harness.call_i32(&bar, i).unwrap();
    }
    let baz = harness.method("Namespace.Foo", "Baz");
    harness.runtime.invoke_with_buffer(&baz, &[], &mut []).unwrap();
    assert_eq!(harness.counters.foo_cctor_runs.load(Ordering::SeqCst), 1);
    assert!(harness.runtime.class(foo).unwrap().is_type_initialized());

    harness.runtime.run_class_constructor(foo).unwrap();
    assert_eq!(harness.counters.foo_cctor_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn type_initializer_runs_once_across_threads() {
    let harness = TestHarness::new();
    let bar = harness.method("Namespace.Foo", "Bar");
    let barrier = Barrier::new(8);

    std::thread::scope(|s| {
        for i in 0..8 {
            let (harness, bar, barrier) = (&harness, &bar, &barrier);
            s.spawn(move || {
                barrier.wait();
                assert_eq!(harness.call_i32(bar, i).unwrap(), i * 2 + 1);
            });
        }
    });
    assert_eq!(harness.counters.foo_cctor_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_type_initializer_is_sticky() {
    let harness = TestHarness::new();
    let touch = harness.method("Namespace.Broken", "Touch");

    for _ in 0..2 {
        let err = harness
            .runtime
            .invoke_with_buffer(&touch, &[], &mut [])
            .unwrap_err();
        assert!(err.is("System.TypeInitializationException"));
        assert!(err.message().contains("Namespace.Broken"), "{err}");
        let inner = err.inner().expect("initializer failure is the inner exception");
        assert!(inner.is("System.InvalidOperationException"));
    }
    assert_eq!(harness.counters.broken_cctor_runs.load(Ordering::SeqCst), 1);
    assert!(!harness.runtime.class(harness.class("Namespace.Broken")).unwrap().is_type_initialized());
}

#[test]
fn value_types_pass_through_slots() {
    let harness = TestHarness::new();
    let shift = harness.method("Namespace.Point", "Shift");

    let mut point = [0u8; 16];
    point[..4].copy_from_slice(&41i32.to_ne_bytes());
    point[8..].copy_from_slice(&(-7i64).to_ne_bytes());

    let mut args = new_buffer(shift.total_arg_stack_object_size());
    ArgWriter::new(&mut args).push_bytes(&point).unwrap();
    let mut ret = new_buffer(shift.return_value_stack_object_size());
    harness.runtime.invoke_with_buffer(&shift, &args, &mut ret).unwrap();

    let mut shifted = [0u8; 16];
    ArgReader::new(&ret).read_bytes(&mut shifted).unwrap();
    assert_eq!(i32::from_ne_bytes(shifted[..4].try_into().unwrap()), 42);
    assert_eq!(i64::from_ne_bytes(shifted[8..].try_into().unwrap()), -7);
}

#[test]
fn mixed_width_arguments_occupy_whole_slots() {
    let mut args = new_buffer(5);
    ArgWriter::new(&mut args)
        .push(true)
        .unwrap()
        .push(-3i32)
        .unwrap()
        .push(2.5f64)
        .unwrap()
        .push_bytes(&[7u8; 16])
        .unwrap();

    let mut reader = ArgReader::new(&args);
    assert!(reader.read::<bool>().unwrap());
    assert_eq!(reader.read::<i32>().unwrap(), -3);
    assert_eq!(reader.read::<f64>().unwrap(), 2.5);
    let mut tail = [0u8; 16];
    reader.read_bytes(&mut tail).unwrap();
    assert_eq!(tail, [7u8; 16]);
    assert_eq!(reader.offset(), 5);
}

#[test]
fn short_buffers_are_rejected() {
    let harness = TestHarness::new();
    let bar = harness.method("Namespace.Foo", "Bar");

    let err = harness.runtime.invoke_with_buffer(&bar, &[], &mut [StackObject::ZERO]).unwrap_err();
    assert!(err.is("System.IndexOutOfRangeException"));
    let err = harness
        .runtime
        .invoke_with_buffer(&bar, &[StackObject::from_bits(3)], &mut [])
        .unwrap_err();
    assert!(err.is("System.IndexOutOfRangeException"));
    assert_eq!(harness.counters.executed.load(Ordering::SeqCst), 0);

    // Oversized buffers are fine; only the leading slots are used.
    let mut ret = new_buffer(4);
    harness
        .runtime
        .invoke_with_buffer(&bar, &[StackObject::from_bits(3), StackObject::from_bits(9)], &mut ret)
        .unwrap();
    assert_eq!(read_return::<i32>(&ret).unwrap(), 7);
}

#[test]
fn pinvoke_with_custom_invoker() {
    let harness = TestHarness::new();
    harness
        .runtime
        .register_pinvoke_func("NativeAdd", pointer(native_add), add_by_hand);
    let add = harness.method("Namespace.Foo", "NativeAdd");

    let mut args = new_buffer(add.total_arg_stack_object_size());
    ArgWriter::new(&mut args).push(40i32).unwrap().push(2i32).unwrap();
    let mut ret = new_buffer(1);
    harness.runtime.invoke_with_buffer(&add, &args, &mut ret).unwrap();
    assert_eq!(read_return::<i32>(&ret).unwrap(), 42);
}

#[test]
fn pinvoke_through_libffi() {
    let harness = TestHarness::new();
    harness
        .runtime
        .register_pinvoke_func("NativeAdd", pointer(native_add), ffi_invoker);
    let add = harness.method("Namespace.Foo", "NativeAdd");

    let mut args = new_buffer(2);
    ArgWriter::new(&mut args).push(-5i32).unwrap().push(12i32).unwrap();
    let mut ret = new_buffer(1);
    harness.runtime.invoke_with_buffer(&add, &args, &mut ret).unwrap();
    assert_eq!(read_return::<i32>(&ret).unwrap(), 7);
}

#[test]
fn unbound_pinvoke_is_entry_point_not_found() {
    let harness = TestHarness::new();
    let unbound = harness.method("Namespace.Native", "Unbound");
    let err = harness.runtime.invoke_with_buffer(&unbound, &[], &mut []).unwrap_err();
    assert!(err.is("System.EntryPointNotFoundException"), "{err}");
    assert!(err.message().contains("Unregistered"));
}

#[test]
fn missing_library_is_dll_not_found() {
    let harness = TestHarness::new();
    let unbound = harness.method("Namespace.Native", "Unbound");
    let err = harness.runtime.bind_pinvoke_method(&unbound).unwrap_err();
    let exception = harness.runtime.raise_error_as_exception(err);
    assert!(exception.is("System.DllNotFoundException"), "{exception}");
}

#[test]
fn internal_calls_and_newobj_constructors() {
    let harness = TestHarness::new();
    let runtime = &harness.runtime;
    runtime.register_internal_call_func("Namespace.Native::Twice", pointer(native_add), twice);
    runtime.register_internal_call_func("Namespace.Native::.ctor", pointer(native_add), reject);
    runtime.register_newobj_internal_call_func("Namespace.Native::.ctor", construct_native);

    let twice_method = harness.method("Namespace.Native", "Twice");
    assert_eq!(harness.call_i32(&twice_method, 21).unwrap(), 42);

    let ctor = harness.method("Namespace.Native", ".ctor");
    assert!(ctor.is_constructor());
    let mut args = new_buffer(ctor.total_arg_stack_object_size());
    ArgWriter::new(&mut args).push(0u64).unwrap().push(1234i32).unwrap();
    runtime.invoke_with_buffer(&ctor, &args, &mut []).unwrap();
    assert_eq!(LAST_SEED.with(Cell::get), 1234);

    let missing = harness.method("Namespace.Native", "Missing");
    let err = runtime.invoke_with_buffer(&missing, &[], &mut []).unwrap_err();
    assert!(err.is("System.MissingMethodException"));
}

#[test]
fn pinvoke_constructors_prefer_newobj_entries() {
    let harness = TestHarness::new();
    let runtime = &harness.runtime;
    runtime.register_pinvoke_func("CreateHandle", pointer(native_add), twice);
    runtime.register_newobj_pinvoke_func("CreateHandle", construct_native);
    assert!(runtime
        .native_table(NativeKind::PInvoke)
        .lookup_newobj("CreateHandle")
        .is_some());
    assert!(runtime
        .native_table(NativeKind::InternalCall)
        .lookup_newobj("CreateHandle")
        .is_none());

    let ctor = harness.method("Namespace.Handle", ".ctor");
    let mut args = new_buffer(ctor.total_arg_stack_object_size());
    ArgWriter::new(&mut args).push(0u64).unwrap().push(-77i32).unwrap();
    runtime.invoke_with_buffer(&ctor, &args, &mut []).unwrap();
    assert_eq!(LAST_SEED.with(Cell::get), -77);

    // Plain methods bound to the same entry point keep the ordinary registration.
    let seed = harness.method("Namespace.Handle", "Seed");
    assert_eq!(harness.call_i32(&seed, 8).unwrap(), 16);
}

#[test]
fn later_registration_wins() {
    let harness = TestHarness::new();
    let runtime = &harness.runtime;
    runtime.register_internal_call_func("Namespace.Native::Twice", pointer(native_add), always_99);
    runtime.register_internal_call_func("Namespace.Native::Twice", pointer(native_add), twice);

    let twice_method = harness.method("Namespace.Native", "Twice");
    assert_eq!(harness.call_i32(&twice_method, 5).unwrap(), 10);
}

#[test]
fn builtin_math_intrinsics() {
    let harness = TestHarness::new();
    let math = harness.corlib_class("System.Math");
    let runtime = &harness.runtime;

    let sqrt = runtime.get_class_method_by_name(math, "Sqrt", false).unwrap().unwrap();
    let mut args = new_buffer(1);
    ArgWriter::new(&mut args).push(16.0f64).unwrap();
    let mut ret = new_buffer(1);
    runtime.invoke_with_buffer(&sqrt, &args, &mut ret).unwrap();
    assert_eq!(read_return::<f64>(&ret).unwrap(), 4.0);

    let pow = runtime.get_class_method_by_name(math, "Pow", false).unwrap().unwrap();
    let mut args = new_buffer(2);
    ArgWriter::new(&mut args).push(2.0f64).unwrap().push(10.0f64).unwrap();
    runtime.invoke_with_buffer(&pow, &args, &mut ret).unwrap();
    assert_eq!(read_return::<f64>(&ret).unwrap(), 1024.0);

    let floor = runtime.get_class_method_by_name(math, "Floor", false).unwrap().unwrap();
    let mut args = new_buffer(1);
    ArgWriter::new(&mut args).push(-1.5f64).unwrap();
    runtime.invoke_with_buffer(&floor, &args, &mut ret).unwrap();
    assert_eq!(read_return::<f64>(&ret).unwrap(), -2.0);
}

#[test]
fn intrinsics_intercept_managed_methods() {
    let harness = TestHarness::new();
    harness
        .runtime
        .register_intrinsic_func("Namespace.Foo::Bar", pointer(native_add), always_99);
    let bar = harness.method("Namespace.Foo", "Bar");
    assert_eq!(harness.call_i32(&bar, 1).unwrap(), 99);
    // Only the type initializer reached the interpreter.
    assert_eq!(harness.counters.executed.load(Ordering::SeqCst), 1);
}

#[test]
fn panics_surface_as_invalid_operation() {
    let harness = TestHarness::new();
    let boom = harness.method("Namespace.Panicky", "Boom");
    let err = harness.runtime.invoke_with_buffer(&boom, &[], &mut []).unwrap_err();
    assert!(err.is("System.InvalidOperationException"));
    assert!(err.message().contains("interpreter lost its place"), "{err}");
}

#[test]
fn abstract_methods_have_no_body() {
    let harness = TestHarness::new();
    let run = harness.method("Namespace.IThing", "Run");
    assert_eq!(run.total_arg_stack_object_size(), 1);
    let err = harness
        .runtime
        .invoke_with_buffer(&run, &[StackObject::ZERO], &mut [])
        .unwrap_err();
    assert!(err.is("System.InvalidOperationException"));
}

#[test]
fn managed_code_without_an_interpreter_fails_cleanly() {
    let mut app = InMemoryModule::new("App");
    app.add_type("App", "Program")
        .extends(RawTypeRef::external(CORLIB, "System.Object"))
        .method(RawMethod::new("Main", RawTypeSig::Void));
    let runtime = Runtime::builder()
        .config(RuntimeConfig::default().with_corlib(CORLIB))
        .resolver(
            InMemoryResolver::new()
                .with_module(InMemoryModule::corlib(CORLIB))
                .with_module(app),
        )
        .initialize()
        .unwrap();

    let module = runtime.get_module_for_assembly(runtime.load_assembly("App").unwrap()).unwrap();
    let program = runtime.get_class_by_name(module, "App.Program", false).unwrap();
    let main = runtime.get_class_method_by_name(program, "Main", false).unwrap().unwrap();
    let err = runtime.invoke_with_buffer(&main, &[], &mut []).unwrap_err();
    assert!(err.is("System.InvalidOperationException"));
    assert!(runtime.class(program).unwrap().is_type_initialized());
}

#[test]
fn handles_from_another_runtime_are_rejected() {
    let one = TestHarness::new();
    let two = TestHarness::new();
    assert_ne!(one.runtime.id(), two.runtime.id());

    let one_foo = one.class("Namespace.Foo");
    let one_bar = one.method("Namespace.Foo", "Bar");
    let mut args = new_buffer(one_bar.total_arg_stack_object_size());
    ArgWriter::new(&mut args).push(1i32).unwrap();
    let mut ret = new_buffer(one_bar.return_value_stack_object_size());
    let err = two.runtime.invoke_with_buffer(&one_bar, &args, &mut ret).unwrap_err();
    assert!(err.is("System.ArgumentException"), "{err}");
    assert_eq!(one.counters.foo_cctor_runs.load(Ordering::SeqCst), 0);
    assert_eq!(two.counters.foo_cctor_runs.load(Ordering::SeqCst), 0);

    let one_panicky = one.class("Namespace.Panicky");
    let err = two.runtime.get_class_methods(one_panicky).unwrap_err();
    assert!(err.is("System.ArgumentException"), "{err}");
    assert!(matches!(two.runtime.class(one_foo), Err(RuntimeError::InvalidHandle(_))));
    assert!(two.runtime.run_class_constructor(one_foo).is_err());
    assert!(!two.runtime.is_value_type(one.class("Namespace.Point")));
    assert_eq!(two.runtime.get_class_by_name(one.core_module(), "Namespace.Foo", false), None);

    // The owning runtime is unaffected.
    assert_eq!(one.call_i32(&one_bar, 3).unwrap(), 7);
}
