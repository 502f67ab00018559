use crate::{name::AmlName, namespace::AmlHandle, AmlError};
use alloc::{boxed::Box, string::String, vec::Vec};
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use core::{cmp, fmt, iter, mem};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MethodFlags(u8);

impl MethodFlags {
    pub fn new(arg_count: u8, serialize: bool, sync_level: u8) -> MethodFlags {
        assert!(arg_count <= 7);
        assert!(sync_level <= 15);

        let mut value = 0;
        value.set_bits(0..3, arg_count);
        value.set_bit(3, serialize);
        value.set_bits(4..8, sync_level);
        MethodFlags(value)
    }

    pub fn from(value: u8) -> MethodFlags {
        MethodFlags(value)
    }

    pub fn arg_count(&self) -> u8 {
        self.0.get_bits(0..3)
    }

    pub fn serialize(&self) -> bool {
        self.0.get_bit(3)
    }

    pub fn sync_level(&self) -> u8 {
        self.0.get_bits(4..8)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectType {
    Uninitialized,
    Integer,
    String,
    Buffer,
    Package,
    Reference,
    /// An unresolved name, as found in package literals.
    Name,
}

/// Identifies a single method call. Context stack positions are reused by later calls, but serial numbers are
/// not, so a reference to the locals or args of a call that has returned can't reach those of another.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FrameId {
    /// Position of the call's frame in the context stack.
    pub index: usize,
    pub serial: u64,
}

/// The location a [`Variable::Reference`] refers to. References never own the value they point at.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Reference {
    /// The object held by a namespace node.
    Node(AmlHandle),
    /// A local of the method call `frame`.
    Local { frame: FrameId, index: u8 },
    /// An argument of the method call `frame`.
    Arg { frame: FrameId, index: u8 },
    /// An element of a package, or a byte of a buffer or string.
    Index { base: Box<Reference>, index: usize },
}

/// A tagged AML value. Strings, buffers and packages own their storage; every other variant owns nothing.
///
/// A variable that is moved out of a location must leave `Uninitialized` behind (see [`Variable::take`]), so
/// that finalizing that location later releases nothing.
#[derive(Clone, PartialEq, Debug, Default)]
pub enum Variable {
    #[default]
    Uninitialized,
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<Variable>),
    Reference(Reference),
    Name(AmlName),
}

impl Variable {
    /// Create a string of `length` NUL characters.
    pub fn create_string(length: usize) -> Result<Variable, AmlError> {
        let mut string = String::new();
        string.try_reserve_exact(length).map_err(|_| AmlError::OutOfMemory)?;
        string.extend(iter::repeat('\0').take(length));
        Ok(Variable::String(string))
    }

    pub fn create_c_string(text: &str) -> Result<Variable, AmlError> {
        let mut string = String::new();
        string.try_reserve_exact(text.len()).map_err(|_| AmlError::OutOfMemory)?;
        string.push_str(text);
        Ok(Variable::String(string))
    }

    /// Create a zero-filled buffer of `length` bytes. Empty buffers are allowed.
    pub fn create_buffer(length: usize) -> Result<Variable, AmlError> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(length).map_err(|_| AmlError::OutOfMemory)?;
        buffer.resize(length, 0);
        Ok(Variable::Buffer(buffer))
    }

    /// Create a package with `count` elements, all of which are `Uninitialized`.
    pub fn create_package(count: usize) -> Result<Variable, AmlError> {
        let mut elements = Vec::new();
        elements.try_reserve_exact(count).map_err(|_| AmlError::OutOfMemory)?;
        elements.resize_with(count, Variable::default);
        Ok(Variable::Package(elements))
    }

    /// Release any storage owned by this variable, leaving it `Uninitialized`. Variables that own nothing are
    /// left as they are, so finalizing one that has already been finalized does nothing.
    pub fn finalize(&mut self) {
        if self.owns_storage() {
            *self = Variable::Uninitialized;
        }
    }

    /// Move the value out of this variable, leaving `Uninitialized` in its place.
    pub fn take(&mut self) -> Variable {
        mem::take(self)
    }

    pub fn owns_storage(&self) -> bool {
        matches!(self, Variable::String(_) | Variable::Buffer(_) | Variable::Package(_) | Variable::Name(_))
    }

    pub fn typ(&self) -> ObjectType {
        match self {
            Variable::Uninitialized => ObjectType::Uninitialized,
            Variable::Integer(_) => ObjectType::Integer,
            Variable::String(_) => ObjectType::String,
            Variable::Buffer(_) => ObjectType::Buffer,
            Variable::Package(_) => ObjectType::Package,
            Variable::Reference(_) => ObjectType::Reference,
            Variable::Name(_) => ObjectType::Name,
        }
    }

    pub fn as_integer(&self) -> Result<u64, AmlError> {
        match self {
            Variable::Integer(value) => Ok(*value),
            other => Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Integer, got: other.typ() }),
        }
    }

    /// Convert this value to an integer, applying the implicit conversions of §19.3.5 of the ACPI
    /// specification to strings and buffers.
    pub fn to_integer(&self) -> Result<u64, AmlError> {
        match self {
            Variable::Integer(value) => Ok(*value),

            Variable::Buffer(bytes) => {
                /*
                 * The first 8 bytes of the buffer are converted to an integer, taking the first byte as the least
                 * significant byte. Zero-length buffers are illegal, but they do appear in real tables, so we
                 * return `0` for them.
                 */
                let length = cmp::min(bytes.len(), 8);
                let mut padded = [0u8; 8];
                padded[..length].copy_from_slice(&bytes[..length]);
                Ok(LittleEndian::read_u64(&padded))
            }

            /*
             * Strings are interpreted as hexadecimal, stopping at the first character that isn't a hex digit. Any
             * digits past the width of an integer are ignored.
             */
            Variable::String(string) => Ok(string
                .chars()
                .map_while(|c| c.to_digit(16))
                .take(16)
                .fold(0, |value, digit| (value << 4) | digit as u64)),

            other => Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Integer, got: other.typ() }),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Uninitialized => write!(f, "[Uninitialized]"),
            Variable::Integer(value) => write!(f, "{:#x}", value),
            Variable::String(string) => write!(f, "{:?}", string),
            Variable::Buffer(bytes) => write!(f, "Buffer({:x?})", bytes),
            Variable::Package(elements) => {
                write!(f, "Package {{ ")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, " }}")
            }
            Variable::Reference(reference) => write!(f, "Reference({:?})", reference),
            Variable::Name(name) => write!(f, "{}", name),
        }
    }
}
