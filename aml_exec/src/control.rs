use crate::stack::Finalize;

/// A marker on the execution stack, recording which nested construct the decode loop is in and how far it has
/// got through it. Markers never own values: anything a construct produces lives on the operand stack or in
/// the namespace, so popping a marker releases nothing.
///
/// Program counters are offsets into the code of the method or table being executed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StackItem {
    /// Executing the top-level code of a table (or the body of a `Scope`-like block) to populate the namespace.
    Populate { end_pc: usize },
    /// Executing the body of a method. The method's arguments and locals live in the context stack.
    Method { want_result: bool },
    /// An `If`, optionally followed by an `Else`.
    Conditional { predicate_done: bool, body_end_pc: usize, else_end_pc: Option<usize> },
    /// A `While` loop. The decode loop jumps back to `predicate_pc` at the end of each iteration, and to `end_pc`
    /// once the predicate evaluates to zero (or on `Break`).
    Loop { predicate_done: bool, predicate_pc: usize, end_pc: usize },
    /// Building a package literal. The package itself lives in the operand stack at `opstack_slot`.
    Package { opstack_slot: usize, element_index: usize, want_result: bool },
    /// Collecting the operands of an operator. Its operands start at `opstack_frame`.
    Op { opcode: u16, opstack_frame: usize, want_result: bool },
}

impl StackItem {
    pub fn want_result(&self) -> bool {
        match *self {
            StackItem::Method { want_result }
            | StackItem::Package { want_result, .. }
            | StackItem::Op { want_result, .. } => want_result,
            StackItem::Populate { .. } | StackItem::Conditional { .. } | StackItem::Loop { .. } => false,
        }
    }
}

impl Finalize for StackItem {
    fn finalize(&mut self) -> usize {
        0
    }
}
