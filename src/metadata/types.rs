use super::handles::ClassHandle;
use std::fmt;

pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// A resolved type signature. Class and value-type references point at runtime class records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
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
    ByRef(Box<TypeSig>),
    Class(ClassHandle),
    ValueType(ClassHandle),
    GenericParam(usize),
}

impl TypeSig {
    /// Size in bytes when it does not depend on a user value type's layout.
    pub fn fixed_size(&self) -> Option<usize> {
        Some(match self {
            Self::Void => 0,
            Self::Boolean | Self::I1 | Self::U1 => 1,
            Self::Char | Self::I2 | Self::U2 => 2,
            Self::I4 | Self::U4 | Self::R4 => 4,
            Self::I8 | Self::U8 | Self::R8 => 8,
            Self::TypedReference => 2 * POINTER_SIZE,
            Self::IntPtr
            | Self::UIntPtr
            | Self::Object
            | Self::String
            | Self::Pointer
            | Self::Array
            | Self::ByRef(_)
            | Self::Class(_)
            | Self::GenericParam(_) => POINTER_SIZE,
            Self::ValueType(_) => return None,
        })
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Object | Self::String | Self::Array | Self::Class(_)
        )
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Boolean => write!(f, "bool"),
            Self::Char => write!(f, "char"),
            Self::I1 => write!(f, "sbyte"),
            Self::U1 => write!(f, "byte"),
            Self::I2 => write!(f, "short"),
            Self::U2 => write!(f, "ushort"),
            Self::I4 => write!(f, "int"),
            Self::U4 => write!(f, "uint"),
            Self::I8 => write!(f, "long"),
            Self::U8 => write!(f, "ulong"),
            Self::R4 => write!(f, "float"),
            Self::R8 => write!(f, "double"),
            Self::IntPtr => write!(f, "nint"),
            Self::UIntPtr => write!(f, "nuint"),
            Self::Object => write!(f, "object"),
            Self::String => write!(f, "string"),
            Self::Pointer => write!(f, "void*"),
            Self::Array => write!(f, "array"),
            Self::TypedReference => write!(f, "typedref"),
            Self::ByRef(inner) => write!(f, "ref {inner}"),
            Self::Class(c) => write!(f, "class {c}"),
            Self::ValueType(c) => write!(f, "valuetype {c}"),
            Self::GenericParam(i) => write!(f, "!{i}"),
        }
    }
}

/// The built-in signature for a corlib `System` type, if it has one.
pub fn corlib_primitive(namespace: &str, name: &str) -> Option<TypeSig> {
    if namespace != "System" {
        return None;
    }
    Some(match name {
        "Void" => TypeSig::Void,
        "Boolean" => TypeSig::Boolean,
        "Char" => TypeSig::Char,
        "SByte" => TypeSig::I1,
        "Byte" => TypeSig::U1,
        "Int16" => TypeSig::I2,
        "UInt16" => TypeSig::U2,
        "Int32" => TypeSig::I4,
        "UInt32" => TypeSig::U4,
        "Int64" => TypeSig::I8,
        "UInt64" => TypeSig::U8,
        "Single" => TypeSig::R4,
        "Double" => TypeSig::R8,
        "IntPtr" => TypeSig::IntPtr,
        "UIntPtr" => TypeSig::UIntPtr,
        "Object" => TypeSig::Object,
        "String" => TypeSig::String,
        "TypedReference" => TypeSig::TypedReference,
        _ => return None,
    })
}
