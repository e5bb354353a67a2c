//! Intrinsics the runtime registers for itself at initialization.
use crate::{
    error::{RuntimeError, RuntimeResult},
    metadata::MethodInfo,
    native::{MethodPointer, NativeTable},
    stack::{write_return, ArgReader, StackObject},
};
use std::ffi::c_void;

type UnaryF64 = extern "C" fn(f64) -> f64;
type BinaryF64 = extern "C" fn(f64, f64) -> f64;

extern "C" fn math_sqrt(d: f64) -> f64 {
    d.sqrt()
}

extern "C" fn math_sin(d: f64) -> f64 {
    d.sin()
}

extern "C" fn math_cos(d: f64) -> f64 {
    d.cos()
}

extern "C" fn math_floor(d: f64) -> f64 {
    d.floor()
}

extern "C" fn math_ceiling(d: f64) -> f64 {
    d.ceil()
}

extern "C" fn math_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

fn missing_pointer(method: &MethodInfo) -> RuntimeError {
    RuntimeError::Invocation(format!(
        "{} was registered without a function pointer",
        method.qualified_name()
    ))
}

/// Invoker for `double f(double)` entry points.
pub fn unary_f64_invoker(
    func: Option<MethodPointer>,
    method: &MethodInfo,
    args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()> {
    let func = func.ok_or_else(|| missing_pointer(method))?;
    // SAFETY: only registered with functions of this exact signature.
    let f: UnaryF64 = unsafe { std::mem::transmute::<*const c_void, UnaryF64>(func.as_ptr()) };
    let mut reader = ArgReader::new(args);
    let d = reader.read::<f64>()?;
    write_return(ret, f(d))
}

/// Invoker for `double f(double, double)` entry points.
pub fn binary_f64_invoker(
    func: Option<MethodPointer>,
    method: &MethodInfo,
    args: &[StackObject],
    ret: &mut [StackObject],
) -> RuntimeResult<()> {
    let func = func.ok_or_else(|| missing_pointer(method))?;
    // SAFETY: only registered with functions of this exact signature.
    let f: BinaryF64 = unsafe { std::mem::transmute::<*const c_void, BinaryF64>(func.as_ptr()) };
    let mut reader = ArgReader::new(args);
    let x = reader.read::<f64>()?;
    let y = reader.read::<f64>()?;
    write_return(ret, f(x, y))
}

pub(crate) fn register_builtins(table: &NativeTable) {
    let unary: [(&str, UnaryF64); 5] = [
        ("System.Math::Sqrt", math_sqrt),
        ("System.Math::Sin", math_sin),
        ("System.Math::Cos", math_cos),
        ("System.Math::Floor", math_floor),
        ("System.Math::Ceiling", math_ceiling),
    ];
    for (name, f) in unary {
        table.register(name, MethodPointer::new(f as *const c_void), unary_f64_invoker);
    }
    table.register(
        "System.Math::Pow",
        MethodPointer::new(math_pow as BinaryF64 as *const c_void),
        binary_f64_invoker,
    );
}
