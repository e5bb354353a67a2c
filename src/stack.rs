//! The stack-object buffer shared by every invocation path.
//!
//! Arguments and return values travel between the host, the interpreter and native code as
//! contiguous runs of 8-byte [`StackObject`] slots. A value of `n` bytes occupies
//! `ceil(n / 8)` consecutive slots starting at the current cursor; the low bytes of the first slot
//! hold the first bytes of the value.
//!
//! All accessors are bounds-checked and report [`RuntimeError::BufferOverrun`] instead of reading
//! or writing past the buffer.
use crate::error::{RuntimeError, RuntimeResult};
use std::fmt;

pub const STACK_OBJECT_SIZE: usize = 8;

#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StackObject(u64);

impl StackObject {
    pub const ZERO: Self = Self(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for StackObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StackObject({:#018x})", self.0)
    }
}

/// Number of slots a value of `byte_size` bytes occupies.
pub const fn stack_object_size_of_byte_size(byte_size: usize) -> usize {
    byte_size.div_ceil(STACK_OBJECT_SIZE)
}

pub fn new_buffer(slots: usize) -> Vec<StackObject> {
    vec![StackObject::ZERO; slots]
}

fn check_bounds(len: usize, slot: usize, byte_size: usize) -> RuntimeResult<()> {
    let needed = slot + stack_object_size_of_byte_size(byte_size);
    if needed > len {
        return Err(RuntimeError::BufferOverrun {
            needed,
            available: len,
        });
    }
    Ok(())
}

fn write_bytes(buffer: &mut [StackObject], slot: usize, data: &[u8]) -> RuntimeResult<()> {
    check_bounds(buffer.len(), slot, data.len())?;
    for (target, chunk) in buffer[slot..]
        .iter_mut()
        .zip(data.chunks(STACK_OBJECT_SIZE))
    {
        let mut bytes = [0u8; STACK_OBJECT_SIZE];
        bytes[..chunk.len()].copy_from_slice(chunk);
        *target = StackObject(u64::from_ne_bytes(bytes));
    }
    Ok(())
}

fn read_bytes(buffer: &[StackObject], slot: usize, data: &mut [u8]) -> RuntimeResult<()> {
    check_bounds(buffer.len(), slot, data.len())?;
    for (source, chunk) in buffer[slot..]
        .iter()
        .zip(data.chunks_mut(STACK_OBJECT_SIZE))
    {
        let bytes = source.0.to_ne_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    Ok(())
}

/// Copies `data.len()` bytes out of the argument buffer at `*offset` and advances the cursor.
pub fn get_argument(
    args: &[StackObject],
    offset: &mut usize,
    data: &mut [u8],
) -> RuntimeResult<()> {
    read_bytes(args, *offset, data)?;
    *offset += stack_object_size_of_byte_size(data.len());
    Ok(())
}

/// Writes `data` into the argument buffer at `*offset` and advances the cursor.
pub fn push_argument(
    args: &mut [StackObject],
    offset: &mut usize,
    data: &[u8],
) -> RuntimeResult<()> {
    write_bytes(args, *offset, data)?;
    *offset += stack_object_size_of_byte_size(data.len());
    Ok(())
}

pub fn get_return_value(ret: &[StackObject], data: &mut [u8]) -> RuntimeResult<()> {
    read_bytes(ret, 0, data)
}

pub fn set_return_value(ret: &mut [StackObject], data: &[u8]) -> RuntimeResult<()> {
    write_bytes(ret, 0, data)
}

/// Plain values that can be copied in and out of stack-object slots.
pub trait StackPrimitive: Copy {
    const SIZE: usize;

    fn store(self, out: &mut [u8]);
    fn load(bytes: &[u8]) -> Self;
}

macro_rules! stack_primitive {
    ($($t:ty),*) => {
        $(
            impl StackPrimitive for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn store(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                fn load(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

stack_primitive!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64);

impl StackPrimitive for bool {
    const SIZE: usize = 1;

    fn store(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn load(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Sequential reader over an argument buffer.
#[derive(Debug)]
pub struct ArgReader<'a> {
    buffer: &'a [StackObject],
    offset: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(buffer: &'a [StackObject]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn read<T: StackPrimitive>(&mut self) -> RuntimeResult<T> {
        let mut raw = [0u8; STACK_OBJECT_SIZE];
        get_argument(self.buffer, &mut self.offset, &mut raw[..T::SIZE])?;
        Ok(T::load(&raw[..T::SIZE]))
    }

    pub fn read_bytes(&mut self, data: &mut [u8]) -> RuntimeResult<()> {
        get_argument(self.buffer, &mut self.offset, data)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Sequential writer over an argument buffer.
#[derive(Debug)]
pub struct ArgWriter<'a> {
    buffer: &'a mut [StackObject],
    offset: usize,
}

impl<'a> ArgWriter<'a> {
    pub fn new(buffer: &'a mut [StackObject]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn push<T: StackPrimitive>(&mut self, value: T) -> RuntimeResult<&mut Self> {
        let mut raw = [0u8; STACK_OBJECT_SIZE];
        value.store(&mut raw[..T::SIZE]);
        push_argument(self.buffer, &mut self.offset, &raw[..T::SIZE])?;
        Ok(self)
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> RuntimeResult<&mut Self> {
        push_argument(self.buffer, &mut self.offset, data)?;
        Ok(self)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

pub fn read_return<T: StackPrimitive>(ret: &[StackObject]) -> RuntimeResult<T> {
    let mut raw = [0u8; STACK_OBJECT_SIZE];
    get_return_value(ret, &mut raw[..T::SIZE])?;
    Ok(T::load(&raw[..T::SIZE]))
}

pub fn write_return<T: StackPrimitive>(ret: &mut [StackObject], value: T) -> RuntimeResult<()> {
    let mut raw = [0u8; STACK_OBJECT_SIZE];
    value.store(&mut raw[..T::SIZE]);
    set_return_value(ret, &raw[..T::SIZE])
}
