//! `aml_exec` is the execution-state core of an AML interpreter. It provides the pieces a bytecode decode loop
//! drives while evaluating AML: the name parser and namespace resolver, the tagged `Variable` model, and the
//! three stacks that make up an interpreter [`State`] (the context stack, the execution stack and the operand
//! stack).
//!
//! Per-opcode semantics, table loading and hardware access live outside of this crate. The host supplies a
//! [`Handler`], which is used to report conditions that the interpreter cannot recover from.
//!
//! ### Synchronization
//! Nothing in this crate locks. A [`Namespace`] is shared between the table loader and every later
//! evaluation, and the host must make sure only one sequence of lookups and mutations is in flight at a time.
//! Each [`State`] serves a single evaluation.

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod context;
pub mod control;
pub mod mode;
pub mod name;
pub mod namespace;
pub mod operand;
pub mod stack;
pub mod state;
pub mod variable;

#[cfg(test)]
mod test_utils;

pub use context::{ContextItem, Invocation};
pub use control::StackItem;
pub use mode::EvalMode;
pub use name::{AmlName, AmlNamePath, NameSeg};
pub use namespace::{AmlHandle, Namespace, NodeKind};
pub use operand::{Operand, OperandStack};
pub use state::State;
pub use variable::{FrameId, MethodFlags, ObjectType, Reference, Variable};

use core::fmt;

/// This trait represents the interface from the interpreter to the hosting environment.
pub trait Handler {
    /// Called when the interpreter hits a condition it cannot recover from: stack storage could not be grown,
    /// the operand stack overflowed or was indexed out of bounds, or the AML contained a malformed name. The
    /// state of the interpreter can no longer be trusted at this point, and so this must not return.
    fn fatal(&self, message: fmt::Arguments<'_>) -> ! {
        panic!("Unrecoverable error in AML interpreter: {}", message);
    }
}

/// Controls how much the interpreter traces its own stack traffic through `log`. Levels are ordered, so a
/// message tagged with a level is emitted if it is less than or equal to the configured level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum DebugVerbosity {
    /// Print no debug information
    None,
    /// Trace context-stack frames: method invocations and scope entries
    Scopes,
    /// Also trace control-flow markers on the execution stack
    AllScopes,
    /// Trace everything, including every operand-stack slot
    All,
}

#[derive(Clone, PartialEq, Debug)]
pub enum AmlError {
    /*
     * Errors produced while decoding names.
     */
    UnexpectedEndOfStream,
    UnexpectedByte(u8),
    InvalidNameSeg([u8; 4]),
    EmptyNamesAreInvalid,

    /*
     * Errors produced by the namespace.
     */
    /// Produced when a name's parent prefixes (`^`) climb past the root of the namespace.
    RootHasNoParent,
    LevelDoesNotExist(AmlName),
    ObjectDoesNotExist(AmlName),
    NameCollision(AmlName),

    /*
     * Errors produced by the variable model.
     */
    /// The allocator could not provide storage for a new string, buffer or package.
    OutOfMemory,
    ObjectNotOfExpectedType {
        expected: ObjectType,
        got: ObjectType,
    },
    InvalidStoreTarget,
    InvalidLoadSource,
    InvalidReference,
    IndexOutOfBounds {
        index: usize,
        length: usize,
    },
    ReferenceDepthExceeded,

    /*
     * Errors produced by method invocation and argument access.
     */
    /// A local or argument was accessed, but no context frame owns an invocation.
    NoInvocation,
    InvalidLocalOrArg(u8),
    NotAMethod(AmlName),
    MethodArgCountIncorrect {
        expected: usize,
        got: usize,
    },

    /// The decode loop asked for something the current evaluation mode does not permit (e.g. executing an
    /// operator while parsing constant data).
    NotAllowedInMode(EvalMode),
}
