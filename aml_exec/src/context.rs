use crate::{namespace::AmlHandle, stack::Finalize, variable::Variable};
use alloc::boxed::Box;

pub const NUM_ARGS: usize = 7;
pub const NUM_LOCALS: usize = 8;

/// The arguments and locals of a single method call.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Invocation {
    /// Distinguishes this call from any other that occupies the same context stack position.
    pub serial: u64,
    pub args: [Variable; NUM_ARGS],
    pub locals: [Variable; NUM_LOCALS],
}

impl Invocation {
    /// Create an invocation from the arguments a method was called with. Arguments past the ones supplied are
    /// left `Uninitialized`.
    pub fn new(args: impl IntoIterator<Item = Variable>) -> Invocation {
        let mut invocation = Invocation::default();
        for (slot, arg) in invocation.args.iter_mut().zip(args) {
            *slot = arg;
        }
        invocation
    }
}

/// A frame of the context stack. One is pushed for each method invocation, and for each scope the decode loop
/// enters while loading a table.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ContextItem {
    /// The namespace scope names are resolved relative to while this frame is on top.
    pub scope: Option<AmlHandle>,
    pub invocation: Option<Box<Invocation>>,
}

impl Finalize for ContextItem {
    fn finalize(&mut self) -> usize {
        match self.invocation.take() {
            Some(mut invocation) => {
                let mut finalized = 0;
                for slot in invocation.args.iter_mut().chain(invocation.locals.iter_mut()) {
                    slot.finalize();
                    finalized += 1;
                }
                finalized
            }
            None => 0,
        }
    }
}
