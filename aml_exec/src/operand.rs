use crate::{name::AmlNamePath, namespace::AmlHandle, variable::Variable};
use core::fmt;

/// The number of operand slots that can be live at once. No production of the AML grammar needs more.
pub const OPSTACK_CAPACITY: usize = 16;

/// A slot of the operand stack.
#[derive(Clone, PartialEq, Debug)]
pub enum Operand<'a> {
    /// A live value, owned by the slot.
    Object(Variable),
    /// A name that has not been resolved yet. Borrows the code it was parsed from, and owns nothing.
    UnresolvedName(AmlNamePath<'a>),
    /// A name that has been resolved to a namespace node.
    ResolvedName(AmlHandle),
    Local(u8),
    Arg(u8),
    /// A store target that discards whatever is stored to it.
    Null,
    /// The Debug object. Values stored to it are logged.
    Debug,
}

impl Default for Operand<'_> {
    fn default() -> Self {
        Operand::Object(Variable::Uninitialized)
    }
}

impl Operand<'_> {
    /// Release anything owned by this slot. Returns `true` if the slot held an object.
    pub fn finalize(&mut self) -> bool {
        match self {
            Operand::Object(object) => {
                object.finalize();
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Object(object) => write!(f, "{}", object),
            Operand::UnresolvedName(path) => write!(f, "Name({})", path),
            Operand::ResolvedName(handle) => write!(f, "{:?}", handle),
            Operand::Local(index) => write!(f, "Local{}", index),
            Operand::Arg(index) => write!(f, "Arg{}", index),
            Operand::Null => write!(f, "Null"),
            Operand::Debug => write!(f, "Debug"),
        }
    }
}

/// A fixed-capacity stack of operands. Slots are addressed by absolute index from the bottom of the stack.
pub struct OperandStack<'a> {
    slots: heapless::Vec<Operand<'a>, OPSTACK_CAPACITY>,
}

impl<'a> OperandStack<'a> {
    pub fn new() -> OperandStack<'a> {
        OperandStack { slots: heapless::Vec::new() }
    }

    /// Push a new slot, holding an `Uninitialized` object. Returns `None` if the stack is full.
    pub fn push(&mut self) -> Option<&mut Operand<'a>> {
        self.slots.push(Operand::default()).ok()?;
        self.slots.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Operand<'a>> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Operand<'a>> {
        self.slots.get_mut(index)
    }

    /// Remove the top `n` slots, finalizing the objects among them. Returns the number of objects finalized, or
    /// `None`, without removing anything, if there are fewer than `n` slots.
    pub fn pop(&mut self, n: usize) -> Option<usize> {
        if n > self.slots.len() {
            return None;
        }
        let mut finalized = 0;
        for _ in 0..n {
            if let Some(mut operand) = self.slots.pop() {
                if operand.finalize() {
                    finalized += 1;
                }
            }
        }
        Some(finalized)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for OperandStack<'_> {
    fn default() -> Self {
        OperandStack::new()
    }
}
