use crate::{
    context::{ContextItem, Invocation},
    control::StackItem,
    mode::{self, EvalMode},
    name::AmlNamePath,
    namespace::{AmlHandle, Namespace, NodeKind},
    operand::{Operand, OperandStack},
    stack::Stack,
    variable::{FrameId, ObjectType, Reference, Variable},
    AmlError,
    DebugVerbosity,
    Handler,
};
use alloc::{boxed::Box, vec::Vec};
use core::fmt;
use log::{error, info, trace};

type ContextStack = Stack<[ContextItem; 8]>;
type ExecutionStack = Stack<[StackItem; 16]>;

/// How many references may be followed while reading or writing through a single reference. Chains this long
/// only come from reference cycles.
const REFERENCE_DEPTH_LIMIT: usize = 16;

/// The state of a single evaluation: the context stack of method invocations and scopes, the execution stack of
/// control-flow markers, and the operand stack. The decode loop drives all three.
///
/// `'a` is the lifetime of both the host's [`Handler`] and the AML code being evaluated, which unresolved names
/// on the operand stack borrow from.
pub struct State<'a> {
    handler: &'a dyn Handler,
    verbosity: DebugVerbosity,
    ctx_stack: ContextStack,
    exec_stack: ExecutionStack,
    op_stack: OperandStack<'a>,
    next_serial: u64,
}

enum StoreTarget {
    Location(Reference),
    Null,
    Debug,
}

impl<'a> State<'a> {
    pub fn new(handler: &'a dyn Handler, verbosity: DebugVerbosity) -> State<'a> {
        State {
            handler,
            verbosity,
            ctx_stack: ContextStack::new(),
            exec_stack: ExecutionStack::new(),
            op_stack: OperandStack::new(),
            next_serial: 0,
        }
    }

    fn comment(&self, verbosity: DebugVerbosity, message: fmt::Arguments<'_>) {
        if verbosity <= self.verbosity {
            trace!("{}", message);
        }
    }

    /*
     * Context stack.
     */

    /// Push an empty frame (with no scope and no invocation) to the context stack.
    pub fn push_ctxstack(&mut self) -> &mut ContextItem {
        self.comment(DebugVerbosity::Scopes, format_args!("Pushing context frame {}", self.ctx_stack.len()));
        match self.ctx_stack.try_push(ContextItem::default()) {
            Ok(frame) => frame,
            Err(_) => fatal(self.handler, format_args!("failed to allocate memory for context stack")),
        }
    }

    /// Push a frame that resolves names relative to `scope`, such as when the decode loop enters a `Device`.
    pub fn push_scope(&mut self, scope: AmlHandle) -> &mut ContextItem {
        let frame = self.push_ctxstack();
        frame.scope = Some(scope);
        frame
    }

    /// Push a frame for a call to `method`, holding the arguments it was called with. The number of arguments
    /// must match the number the method declares.
    pub fn push_invocation(
        &mut self,
        namespace: &Namespace,
        method: AmlHandle,
        args: Vec<Variable>,
    ) -> Result<&mut ContextItem, AmlError> {
        let method = namespace.follow_alias(method);
        let expected = match namespace.get(method).kind {
            NodeKind::Method { flags, .. } => flags.arg_count() as usize,
            _ => return Err(AmlError::NotAMethod(namespace.path_of(method))),
        };
        if args.len() != expected {
            return Err(AmlError::MethodArgCountIncorrect { expected, got: args.len() });
        }

        self.comment(DebugVerbosity::Scopes, format_args!("Invoking {}", namespace.path_of(method)));
        let serial = self.next_serial;
        self.next_serial += 1;
        let frame = self.push_ctxstack();
        frame.scope = Some(method);
        frame.invocation = Some(Box::new(Invocation { serial, ..Invocation::new(args) }));
        Ok(frame)
    }

    pub fn peek_ctxstack_back(&self) -> Option<&ContextItem> {
        self.ctx_stack.peek_back()
    }

    pub fn peek_ctxstack_back_mut(&mut self) -> Option<&mut ContextItem> {
        self.ctx_stack.peek_back_mut()
    }

    /// Pop the top context frame, finalizing its arguments and locals if it has an invocation. Returns the number
    /// of slots finalized.
    pub fn pop_ctxstack_back(&mut self) -> usize {
        match self.ctx_stack.pop() {
            Some(finalized) => {
                self.comment(
                    DebugVerbosity::Scopes,
                    format_args!("Popped context frame {} ({} slots finalized)", self.ctx_stack.len(), finalized),
                );
                finalized
            }
            None => fatal(self.handler, format_args!("context stack underflow")),
        }
    }

    pub fn ctxstack_len(&self) -> usize {
        self.ctx_stack.len()
    }

    /*
     * Execution stack.
     */

    pub fn push_stack(&mut self, item: StackItem) -> &mut StackItem {
        self.comment(DebugVerbosity::AllScopes, format_args!("Pushing {:?}", item));
        match self.exec_stack.try_push(item) {
            Ok(item) => item,
            Err(_) => fatal(self.handler, format_args!("failed to allocate memory for execution stack")),
        }
    }

    /// Get the `n`th marker from the top of the execution stack.
    pub fn peek_stack(&self, n: usize) -> Option<&StackItem> {
        self.exec_stack.peek(n)
    }

    pub fn peek_stack_back(&self) -> Option<&StackItem> {
        self.exec_stack.peek_back()
    }

    pub fn peek_stack_back_mut(&mut self) -> Option<&mut StackItem> {
        self.exec_stack.peek_back_mut()
    }

    /// Get the marker at an absolute position in the execution stack, as previously recorded with
    /// [`State::stack_len`].
    pub fn peek_stack_at(&self, index: usize) -> Option<&StackItem> {
        self.exec_stack.peek_at(index)
    }

    pub fn peek_stack_at_mut(&mut self, index: usize) -> Option<&mut StackItem> {
        self.exec_stack.peek_at_mut(index)
    }

    pub fn pop_stack(&mut self, n: usize) {
        if self.exec_stack.pop_n(n).is_none() {
            fatal(self.handler, format_args!("execution stack underflow"));
        }
        self.comment(DebugVerbosity::AllScopes, format_args!("Popped {} markers", n));
    }

    pub fn pop_stack_back(&mut self) {
        self.pop_stack(1);
    }

    pub fn stack_len(&self) -> usize {
        self.exec_stack.len()
    }

    /*
     * Operand stack.
     */

    /// Push a new operand slot, holding an `Uninitialized` object.
    pub fn push_opstack(&mut self) -> &mut Operand<'a> {
        self.comment(DebugVerbosity::All, format_args!("Pushing operand {}", self.op_stack.len()));
        match self.op_stack.push() {
            Some(slot) => slot,
            None => fatal(self.handler, format_args!("operand stack overflow")),
        }
    }

    /// Get the operand at absolute position `index`.
    pub fn get_opstack(&self, index: usize) -> &Operand<'a> {
        match self.op_stack.get(index) {
            Some(slot) => slot,
            None => fatal(self.handler, format_args!("operand stack access out of bounds: {}", index)),
        }
    }

    pub fn get_opstack_mut(&mut self, index: usize) -> &mut Operand<'a> {
        match self.op_stack.get_mut(index) {
            Some(slot) => slot,
            None => fatal(self.handler, format_args!("operand stack access out of bounds: {}", index)),
        }
    }

    /// Pop the top `n` operands, finalizing any objects among them. Returns the number of objects finalized.
    pub fn pop_opstack(&mut self, n: usize) -> usize {
        match self.op_stack.pop(n) {
            Some(finalized) => {
                self.comment(DebugVerbosity::All, format_args!("Popped {} operands ({} objects)", n, finalized));
                finalized
            }
            None => fatal(self.handler, format_args!("operand stack underflow")),
        }
    }

    pub fn opstack_len(&self) -> usize {
        self.op_stack.len()
    }

    /*
     * Names.
     */

    /// Decode a name from the start of `code`. A malformed name is fatal.
    pub fn parse_name(&self, code: &'a [u8]) -> (AmlNamePath<'a>, usize) {
        match AmlNamePath::parse(code) {
            Ok(parsed) => parsed,
            Err(err) => fatal(self.handler, format_args!("malformed name in AML: {:?}", err)),
        }
    }

    /// The scope names are currently resolved relative to: that of the closest context frame with a scope, or
    /// the root if there isn't one.
    pub fn current_scope(&self, namespace: &Namespace) -> AmlHandle {
        (0..self.ctx_stack.len())
            .rev()
            .find_map(|i| self.ctx_stack.peek_at(i).and_then(|frame| frame.scope))
            .unwrap_or_else(|| namespace.root())
    }

    /// Resolve `path` from the current scope. Returns `None` if there is no such object.
    pub fn resolve(&self, namespace: &Namespace, path: &AmlNamePath<'_>) -> Option<AmlHandle> {
        match namespace.resolve(self.current_scope(namespace), path) {
            Ok(handle) => handle,
            Err(err) => fatal(self.handler, format_args!("failed to resolve {}: {:?}", path, err)),
        }
    }

    /// Resolve `path` from the current scope, creating the final segment if it doesn't exist.
    pub fn resolve_or_create(
        &self,
        namespace: &mut Namespace,
        path: &AmlNamePath<'_>,
    ) -> Result<AmlHandle, AmlError> {
        let scope = self.current_scope(namespace);
        match namespace.resolve_or_create(scope, path) {
            Err(err) if is_fatal(&err) => {
                fatal(self.handler, format_args!("failed to create {}: {:?}", path, err))
            }
            other => other,
        }
    }

    fn resolve_existing(&self, namespace: &Namespace, path: &AmlNamePath<'_>) -> Result<AmlHandle, AmlError> {
        self.resolve(namespace, path).ok_or_else(|| AmlError::ObjectDoesNotExist(path.to_name()))
    }

    /// Push the operand produced by a name, according to the evaluation `mode`:
    ///  - `Data` pushes the name unresolved
    ///  - `Reference` pushes the resolved node, without reading it
    ///  - `Object` pushes the value of the named object. Methods are pushed as the resolved node, so the decode
    ///    loop can invoke them.
    ///  - `Exec` checks the name resolves, and only pushes methods (for the decode loop to invoke)
    pub fn push_name(
        &mut self,
        namespace: &Namespace,
        mode: EvalMode,
        path: AmlNamePath<'a>,
    ) -> Result<(), AmlError> {
        match mode {
            EvalMode::Data => *self.push_opstack() = Operand::UnresolvedName(path),
            EvalMode::Reference => {
                let handle = self.resolve_existing(namespace, &path)?;
                *self.push_opstack() = Operand::ResolvedName(handle);
            }
            EvalMode::Object | EvalMode::Exec => {
                let handle = self.resolve_existing(namespace, &path)?;
                if let NodeKind::Method { .. } = namespace.get(handle).kind {
                    *self.push_opstack() = Operand::ResolvedName(handle);
                } else if mode.keeps_result() {
                    let value = self.load_operand(namespace, &Operand::ResolvedName(handle))?;
                    *self.push_opstack() = Operand::Object(value);
                }
            }
            EvalMode::ImmediateWord => return Err(AmlError::NotAllowedInMode(mode)),
        }
        Ok(())
    }

    /// Decode a 16-bit immediate from the start of `code` and push it as an integer. Returns the number of bytes
    /// consumed.
    pub fn push_immediate_word(&mut self, mode: EvalMode, code: &[u8]) -> Result<usize, AmlError> {
        if mode != EvalMode::ImmediateWord {
            return Err(AmlError::NotAllowedInMode(mode));
        }
        let (word, length) = mode::decode_immediate_word(code)?;
        *self.push_opstack() = Operand::Object(Variable::Integer(word as u64));
        Ok(length)
    }

    /*
     * Package literals.
     */

    /// Start building a package literal with `count` elements. The package is pushed to the operand stack, and
    /// each element is moved into it by [`State::package_append`] once it has been evaluated. Returns the
    /// operand stack slot holding the package.
    pub fn begin_package(&mut self, count: usize, want_result: bool) -> Result<usize, AmlError> {
        let package = Variable::create_package(count)?;
        let opstack_slot = self.op_stack.len();
        *self.push_opstack() = Operand::Object(package);
        self.push_stack(StackItem::Package { opstack_slot, element_index: 0, want_result });
        Ok(opstack_slot)
    }

    /// Move the operand on top of the operand stack into the next element of the package being built.
    pub fn package_append(&mut self) -> Result<(), AmlError> {
        let (opstack_slot, element_index) = match self.exec_stack.peek_back() {
            Some(StackItem::Package { opstack_slot, element_index, .. }) => (*opstack_slot, *element_index),
            other => fatal(self.handler, format_args!("package element outside of package literal: {:?}", other)),
        };

        let value_slot = match self.op_stack.len().checked_sub(1) {
            Some(slot) if slot > opstack_slot => slot,
            _ => fatal(self.handler, format_args!("no package element on the operand stack")),
        };
        let length = match self.op_stack.get(opstack_slot) {
            Some(Operand::Object(Variable::Package(elements))) => elements.len(),
            _ => fatal(self.handler, format_args!("package literal is not on the operand stack")),
        };
        if element_index >= length {
            return Err(AmlError::IndexOutOfBounds { index: element_index, length });
        }

        let value = match self.op_stack.get_mut(value_slot) {
            Some(Operand::Object(object)) => object.take(),
            Some(Operand::UnresolvedName(path)) => Variable::Name(path.to_name()),
            Some(Operand::ResolvedName(handle)) => Variable::Reference(Reference::Node(*handle)),
            _ => return Err(AmlError::InvalidLoadSource),
        };
        self.pop_opstack(1);

        if let Some(Operand::Object(Variable::Package(elements))) = self.op_stack.get_mut(opstack_slot) {
            if let Some(element) = elements.get_mut(element_index) {
                *element = value;
            }
        }
        if let Some(StackItem::Package { element_index, .. }) = self.exec_stack.peek_back_mut() {
            *element_index += 1;
        }
        Ok(())
    }

    /// Finish the package being built. Elements that were never appended stay `Uninitialized`. If the result
    /// isn't wanted, the package is popped from the operand stack.
    pub fn end_package(&mut self) {
        let (opstack_slot, want_result) = match self.exec_stack.peek_back() {
            Some(StackItem::Package { opstack_slot, want_result, .. }) => (*opstack_slot, *want_result),
            other => fatal(self.handler, format_args!("end of package outside of package literal: {:?}", other)),
        };
        self.pop_stack_back();
        if !want_result {
            let n = self.op_stack.len().saturating_sub(opstack_slot);
            self.pop_opstack(n);
        }
    }

    /*
     * Loads and stores.
     */

    /// Read the value of the operand in `slot`, following references and resolving names.
    pub fn load(&self, namespace: &Namespace, slot: usize) -> Result<Variable, AmlError> {
        self.load_operand(namespace, self.get_opstack(slot))
    }

    pub fn load_operand(&self, namespace: &Namespace, operand: &Operand<'_>) -> Result<Variable, AmlError> {
        let value = match operand {
            Operand::Object(Variable::Reference(reference)) => read(&self.ctx_stack, namespace, reference, 0)?,
            Operand::Object(object) => object.clone(),
            Operand::UnresolvedName(path) => {
                let handle = self.resolve_existing(namespace, path)?;
                read(&self.ctx_stack, namespace, &Reference::Node(handle), 0)?
            }
            Operand::ResolvedName(handle) => read(&self.ctx_stack, namespace, &Reference::Node(*handle), 0)?,
            Operand::Local(index) => {
                let reference = Reference::Local { frame: self.invocation_frame()?, index: *index };
                read(&self.ctx_stack, namespace, &reference, 0)?
            }
            Operand::Arg(index) => {
                let reference = Reference::Arg { frame: self.invocation_frame()?, index: *index };
                read(&self.ctx_stack, namespace, &reference, 0)?
            }
            Operand::Null | Operand::Debug => return Err(AmlError::InvalidLoadSource),
        };

        match value {
            Variable::Name(name) => {
                let handle = self.resolve_existing(namespace, &name.as_path())?;
                read(&self.ctx_stack, namespace, &Reference::Node(handle), 0)
            }
            other => Ok(other),
        }
    }

    /// Store `value` to the location described by the operand in `slot`, finalizing whatever was there before.
    pub fn store(&mut self, namespace: &mut Namespace, slot: usize, value: Variable) -> Result<(), AmlError> {
        let target = self.target_of(namespace, self.get_opstack(slot))?;
        self.store_to_target(namespace, target, value)
    }

    pub fn store_to(
        &mut self,
        namespace: &mut Namespace,
        operand: &Operand<'_>,
        value: Variable,
    ) -> Result<(), AmlError> {
        let target = self.target_of(namespace, operand)?;
        self.store_to_target(namespace, target, value)
    }

    fn store_to_target(
        &mut self,
        namespace: &mut Namespace,
        target: StoreTarget,
        value: Variable,
    ) -> Result<(), AmlError> {
        match target {
            StoreTarget::Location(reference) => write(&mut self.ctx_stack, namespace, &reference, value),
            StoreTarget::Null => Ok(()),
            StoreTarget::Debug => {
                info!("[AML DEBUG] {}", value);
                Ok(())
            }
        }
    }

    /// Get a reference to the object described by the operand in `slot`.
    pub fn get_object_reference(&self, namespace: &Namespace, slot: usize) -> Result<Variable, AmlError> {
        match self.get_opstack(slot) {
            Operand::Object(object) if !matches!(object, Variable::Reference(_) | Variable::Name(_)) => {
                Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Reference, got: object.typ() })
            }
            operand => match self.target_of(namespace, operand)? {
                StoreTarget::Location(reference) => Ok(Variable::Reference(reference)),
                StoreTarget::Null | StoreTarget::Debug => Err(AmlError::InvalidReference),
            },
        }
    }

    /// Load the operand in `slot`, and convert it to an integer.
    pub fn get_integer(&self, namespace: &Namespace, slot: usize) -> Result<u64, AmlError> {
        self.load(namespace, slot)?.to_integer()
    }

    fn target_of(&self, namespace: &Namespace, operand: &Operand<'_>) -> Result<StoreTarget, AmlError> {
        let reference = match operand {
            Operand::Object(Variable::Reference(reference)) => reference.clone(),
            Operand::Object(Variable::Name(name)) => {
                Reference::Node(self.resolve_existing(namespace, &name.as_path())?)
            }
            Operand::Object(_) => return Err(AmlError::InvalidStoreTarget),
            Operand::UnresolvedName(path) => Reference::Node(self.resolve_existing(namespace, path)?),
            Operand::ResolvedName(handle) => Reference::Node(*handle),
            Operand::Local(index) => Reference::Local { frame: self.invocation_frame()?, index: *index },
            Operand::Arg(index) => {
                // Stores to an argument that holds a reference are made to the referenced object instead
                let arg = Reference::Arg { frame: self.invocation_frame()?, index: *index };
                match locate(&self.ctx_stack, namespace, &arg, 0)? {
                    Variable::Reference(inner) => inner.clone(),
                    _ => arg,
                }
            }
            Operand::Null => return Ok(StoreTarget::Null),
            Operand::Debug => return Ok(StoreTarget::Debug),
        };
        Ok(StoreTarget::Location(reference))
    }

    /// Find the closest context frame that owns an invocation, which locals and args refer to.
    fn invocation_frame(&self) -> Result<FrameId, AmlError> {
        (0..self.ctx_stack.len())
            .rev()
            .find_map(|index| {
                let invocation = self.ctx_stack.peek_at(index)?.invocation.as_ref()?;
                Some(FrameId { index, serial: invocation.serial })
            })
            .ok_or(AmlError::NoInvocation)
    }
}

fn fatal(handler: &dyn Handler, message: fmt::Arguments<'_>) -> ! {
    error!("Fatal error in AML interpreter: {}", message);
    handler.fatal(message)
}

/// Whether an error means the AML (or the interpreter) is broken badly enough that evaluation can't continue.
fn is_fatal(error: &AmlError) -> bool {
    matches!(
        error,
        AmlError::UnexpectedEndOfStream
            | AmlError::UnexpectedByte(_)
            | AmlError::InvalidNameSeg(_)
            | AmlError::EmptyNamesAreInvalid
            | AmlError::RootHasNoParent
    )
}

/// Get the invocation of the method call `frame`. Fails if that call has returned, even if another call now
/// sits at the same position.
fn invocation(ctx_stack: &ContextStack, frame: FrameId) -> Result<&Invocation, AmlError> {
    ctx_stack
        .peek_at(frame.index)
        .and_then(|item| item.invocation.as_deref())
        .filter(|invocation| invocation.serial == frame.serial)
        .ok_or(AmlError::InvalidReference)
}

fn invocation_mut(ctx_stack: &mut ContextStack, frame: FrameId) -> Result<&mut Invocation, AmlError> {
    ctx_stack
        .peek_at_mut(frame.index)
        .and_then(|item| item.invocation.as_deref_mut())
        .filter(|invocation| invocation.serial == frame.serial)
        .ok_or(AmlError::InvalidReference)
}

/// Find the variable `reference` refers to. References stored in that variable are not followed, but the
/// container of an `Index` is found through any references on the way to it.
fn locate<'s>(
    ctx_stack: &'s ContextStack,
    namespace: &'s Namespace,
    reference: &Reference,
    depth: usize,
) -> Result<&'s Variable, AmlError> {
    match reference {
        Reference::Node(handle) => Ok(&namespace.get(namespace.follow_alias(*handle)).object),
        Reference::Local { frame, index } => {
            invocation(ctx_stack, *frame)?.locals.get(*index as usize).ok_or(AmlError::InvalidLocalOrArg(*index))
        }
        Reference::Arg { frame, index } => {
            invocation(ctx_stack, *frame)?.args.get(*index as usize).ok_or(AmlError::InvalidLocalOrArg(*index))
        }
        Reference::Index { base, index } => match follow(ctx_stack, namespace, base, depth + 1)? {
            Variable::Package(elements) => {
                elements.get(*index).ok_or(AmlError::IndexOutOfBounds { index: *index, length: elements.len() })
            }
            other => Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Package, got: other.typ() }),
        },
    }
}

/// Find the variable `reference` refers to, following any chain of references stored along the way.
fn follow<'s>(
    ctx_stack: &'s ContextStack,
    namespace: &'s Namespace,
    reference: &Reference,
    depth: usize,
) -> Result<&'s Variable, AmlError> {
    if depth > REFERENCE_DEPTH_LIMIT {
        return Err(AmlError::ReferenceDepthExceeded);
    }
    match locate(ctx_stack, namespace, reference, depth)? {
        Variable::Reference(inner) => follow(ctx_stack, namespace, inner, depth + 1),
        other => Ok(other),
    }
}

/// Read the value `reference` refers to, following any chain of references stored along the way. Unlike
/// [`follow`], an `Index` anywhere in the chain may refer to a byte of a buffer or string, which is read as an
/// integer.
fn read(
    ctx_stack: &ContextStack,
    namespace: &Namespace,
    reference: &Reference,
    depth: usize,
) -> Result<Variable, AmlError> {
    if depth > REFERENCE_DEPTH_LIMIT {
        return Err(AmlError::ReferenceDepthExceeded);
    }

    let value = match reference {
        Reference::Index { base, index } => {
            let index = *index;
            let byte_at = |bytes: &[u8]| {
                bytes
                    .get(index)
                    .map(|&byte| Variable::Integer(byte as u64))
                    .ok_or(AmlError::IndexOutOfBounds { index, length: bytes.len() })
            };
            match follow(ctx_stack, namespace, base, depth + 1)? {
                Variable::Buffer(bytes) => return byte_at(&bytes[..]),
                Variable::String(string) => return byte_at(string.as_bytes()),
                Variable::Package(elements) => {
                    elements.get(index).ok_or(AmlError::IndexOutOfBounds { index, length: elements.len() })?
                }
                other => {
                    let got = other.typ();
                    return Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Package, got });
                }
            }
        }
        other => locate(ctx_stack, namespace, other, depth)?,
    };

    match value {
        Variable::Reference(inner) => read(ctx_stack, namespace, inner, depth + 1),
        other => Ok(other.clone()),
    }
}

/// Rewrite `reference` so that the base of an `Index` refers directly to the container, rather than to a chain of
/// references that ends at it. Locations found through such a reference can be borrowed mutably without following
/// anything.
fn direct(
    ctx_stack: &ContextStack,
    namespace: &Namespace,
    reference: &Reference,
    depth: usize,
) -> Result<Reference, AmlError> {
    match reference {
        Reference::Index { base, index } => Ok(Reference::Index {
            base: Box::new(direct_container(ctx_stack, namespace, base, depth + 1)?),
            index: *index,
        }),
        other => Ok(other.clone()),
    }
}

fn direct_container(
    ctx_stack: &ContextStack,
    namespace: &Namespace,
    reference: &Reference,
    depth: usize,
) -> Result<Reference, AmlError> {
    if depth > REFERENCE_DEPTH_LIMIT {
        return Err(AmlError::ReferenceDepthExceeded);
    }
    let reference = direct(ctx_stack, namespace, reference, depth)?;
    match locate(ctx_stack, namespace, &reference, depth)? {
        Variable::Reference(inner) => direct_container(ctx_stack, namespace, inner, depth + 1),
        _ => Ok(reference),
    }
}

/// Borrow the variable a direct reference (see [`direct`]) refers to.
fn locate_mut<'s>(
    ctx_stack: &'s mut ContextStack,
    namespace: &'s mut Namespace,
    reference: &Reference,
) -> Result<&'s mut Variable, AmlError> {
    match reference {
        Reference::Node(handle) => {
            let handle = namespace.follow_alias(*handle);
            Ok(&mut namespace.get_mut(handle).object)
        }
        Reference::Local { frame, index } => invocation_mut(ctx_stack, *frame)?
            .locals
            .get_mut(*index as usize)
            .ok_or(AmlError::InvalidLocalOrArg(*index)),
        Reference::Arg { frame, index } => invocation_mut(ctx_stack, *frame)?
            .args
            .get_mut(*index as usize)
            .ok_or(AmlError::InvalidLocalOrArg(*index)),
        Reference::Index { base, index } => match locate_mut(ctx_stack, namespace, base)? {
            Variable::Package(elements) => {
                let length = elements.len();
                elements.get_mut(*index).ok_or(AmlError::IndexOutOfBounds { index: *index, length })
            }
            other => Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Package, got: other.typ() }),
        },
    }
}

fn write(
    ctx_stack: &mut ContextStack,
    namespace: &mut Namespace,
    reference: &Reference,
    value: Variable,
) -> Result<(), AmlError> {
    let reference = direct(ctx_stack, namespace, reference, 0)?;

    if let Reference::Index { base, index } = &reference {
        let index = *index;
        match locate_mut(ctx_stack, namespace, base)? {
            Variable::Package(_) => (),
            Variable::Buffer(bytes) => {
                let length = bytes.len();
                let byte = bytes.get_mut(index).ok_or(AmlError::IndexOutOfBounds { index, length })?;
                *byte = value.to_integer()? as u8;
                return Ok(());
            }
            Variable::String(string) => {
                let byte = value.to_integer()? as u8;
                if index >= string.len() {
                    return Err(AmlError::IndexOutOfBounds { index, length: string.len() });
                }
                if !byte.is_ascii() || !string.is_char_boundary(index) || !string.is_char_boundary(index + 1) {
                    return Err(AmlError::InvalidStoreTarget);
                }
                string.replace_range(index..(index + 1), char::from(byte).encode_utf8(&mut [0; 4]));
                return Ok(());
            }
            other => {
                return Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Package, got: other.typ() })
            }
        }
    }

    let location = locate_mut(ctx_stack, namespace, &reference)?;
    location.finalize();
    *location = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        name::NameSeg,
        test_utils::{init_logger, TestHandler},
        variable::MethodFlags,
    };
    use alloc::{string::String, vec};

    struct TestNamespace {
        namespace: Namespace,
        dev0: AmlHandle,
        method: AmlHandle,
        int0: AmlHandle,
    }

    /// `\_SB_.DEV0` holds `BUF0 = Buffer { 1, 2, 3 }`, `PKG0 = Package { 1, 2 }`, `INT0 = 0`, `STR0 = "ABC"`, and
    /// `MTH1`, which takes one argument.
    fn test_namespace() -> TestNamespace {
        let mut namespace = Namespace::with_predefined();
        let sb = namespace.search("\\_SB").unwrap();
        let dev0 = namespace.add_child(sb, NameSeg(*b"DEV0"), NodeKind::Device);
        namespace.add_name(dev0, NameSeg(*b"BUF0"), Variable::Buffer(vec![0x01, 0x02, 0x03]));
        let pkg0 = Variable::Package(vec![Variable::Integer(1), Variable::Integer(2)]);
        namespace.add_name(dev0, NameSeg(*b"PKG0"), pkg0);
        namespace.add_name(dev0, NameSeg(*b"STR0"), Variable::String(String::from("ABC")));
        let int0 = namespace.add_name(dev0, NameSeg(*b"INT0"), Variable::Integer(0));
        let method = namespace.add_child(
            dev0,
            NameSeg(*b"MTH1"),
            NodeKind::Method { flags: MethodFlags::new(1, false, 0), code: vec![] },
        );
        TestNamespace { namespace, dev0, method, int0 }
    }

    #[test]
    fn context_stack_spills() {
        init_logger();
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::All);

        for i in 0..8 {
            state.push_ctxstack();
            assert_eq!(state.ctxstack_len(), i + 1);
        }
        assert!(!state.ctx_stack.is_spilled());
        assert_eq!(state.peek_ctxstack_back(), Some(&ContextItem::default()));

        state.push_ctxstack();
        assert!(state.ctx_stack.is_spilled());

        for _ in 0..9 {
            assert_eq!(state.pop_ctxstack_back(), 0);
        }
        assert!(state.ctx_stack.is_spilled());
        assert_eq!(state.peek_ctxstack_back(), None);
    }

    #[test]
    fn execution_stack_spills() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);

        state.push_stack(StackItem::Method { want_result: true });
        for end_pc in 1..16 {
            state.push_stack(StackItem::Populate { end_pc });
        }
        assert!(!state.exec_stack.is_spilled());

        let loop_start = state.stack_len();
        state.push_stack(StackItem::Loop { predicate_done: false, predicate_pc: 4, end_pc: 20 });
        assert!(state.exec_stack.is_spilled());
        assert_eq!(state.peek_stack_back(), state.peek_stack_at(loop_start));
        assert_eq!(state.peek_stack(16), Some(&StackItem::Method { want_result: true }));

        if let Some(StackItem::Loop { predicate_done, .. }) = state.peek_stack_at_mut(loop_start) {
            *predicate_done = true;
        }
        assert_eq!(
            state.peek_stack_back(),
            Some(&StackItem::Loop { predicate_done: true, predicate_pc: 4, end_pc: 20 })
        );

        state.pop_stack(16);
        assert_eq!(state.stack_len(), 1);
        assert!(state.exec_stack.is_spilled());
        state.pop_stack_back();
        assert_eq!(state.peek_stack_back(), None);
    }

    #[test]
    fn invocation_frames_finalize_all_slots() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::Scopes);
        let TestNamespace { namespace, method, dev0, .. } = test_namespace();

        state.push_scope(dev0);
        let frame = state.push_invocation(&namespace, method, vec![Variable::create_buffer(8).unwrap()]).unwrap();
        assert_eq!(frame.scope, Some(method));
        assert_eq!(state.current_scope(&namespace), method);

        assert_eq!(state.pop_ctxstack_back(), 15);
        assert_eq!(state.current_scope(&namespace), dev0);
        assert_eq!(state.pop_ctxstack_back(), 0);
        assert_eq!(state.current_scope(&namespace), namespace.root());
    }

    #[test]
    fn invocation_checks() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { namespace, method, dev0, .. } = test_namespace();

        assert_eq!(
            state.push_invocation(&namespace, method, vec![]).map(|_| ()),
            Err(AmlError::MethodArgCountIncorrect { expected: 1, got: 0 })
        );
        assert_eq!(
            state.push_invocation(&namespace, dev0, vec![]).map(|_| ()),
            Err(AmlError::NotAMethod(namespace.path_of(dev0)))
        );
        assert_eq!(state.ctxstack_len(), 0);
        assert_eq!(state.load_operand(&namespace, &Operand::Local(0)), Err(AmlError::NoInvocation));
    }

    #[test]
    #[should_panic(expected = "context stack underflow")]
    fn context_stack_underflow() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        state.pop_ctxstack_back();
    }

    #[test]
    #[should_panic(expected = "operand stack overflow")]
    fn operand_stack_overflow() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        for _ in 0..17 {
            state.push_opstack();
        }
    }

    #[test]
    #[should_panic(expected = "operand stack access out of bounds")]
    fn operand_stack_out_of_bounds() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        state.push_opstack();
        state.get_opstack(1);
    }

    #[test]
    #[should_panic(expected = "malformed name")]
    fn malformed_names_are_fatal() {
        let handler = TestHandler;
        let state = State::new(&handler, DebugVerbosity::None);
        state.parse_name(b"\\\x2eABCD1234");
    }

    #[test]
    #[should_panic(expected = "RootHasNoParent")]
    fn prefixes_past_root_are_fatal() {
        let handler = TestHandler;
        let state = State::new(&handler, DebugVerbosity::None);
        let namespace = Namespace::new();
        let (path, _) = state.parse_name(b"^FOO_");
        state.resolve(&namespace, &path);
    }

    #[test]
    fn operand_stack_pops() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::All);
        let (path, _) = state.parse_name(b"_STA");

        *state.push_opstack() = Operand::Object(Variable::create_c_string("hello").unwrap());
        *state.push_opstack() = Operand::UnresolvedName(path);
        *state.push_opstack() = Operand::Object(Variable::Integer(3));
        assert_eq!(state.opstack_len(), 3);
        assert_eq!(state.pop_opstack(2), 1);
        assert_eq!(state.get_opstack(0), &Operand::Object(Variable::String(String::from("hello"))));
        assert_eq!(state.pop_opstack(1), 1);
        assert_eq!(state.opstack_len(), 0);
    }

    #[test]
    fn load_and_store_names() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, dev0, int0, .. } = test_namespace();
        state.push_scope(dev0);

        let (path, _) = state.parse_name(b"INT0");
        *state.push_opstack() = Operand::UnresolvedName(path);
        state.store(&mut namespace, 0, Variable::Integer(0xff)).unwrap();
        assert_eq!(namespace.get(int0).object, Variable::Integer(0xff));
        assert_eq!(state.load(&namespace, 0), Ok(Variable::Integer(0xff)));
        assert_eq!(state.get_integer(&namespace, 0), Ok(0xff));
        assert_eq!(state.get_object_reference(&namespace, 0), Ok(Variable::Reference(Reference::Node(int0))));

        let (missing, _) = state.parse_name(b"MISS");
        assert_eq!(
            state.store_to(&mut namespace, &Operand::UnresolvedName(missing), Variable::Integer(1)),
            Err(AmlError::ObjectDoesNotExist(missing.to_name()))
        );
        assert_eq!(
            state.store_to(&mut namespace, &Operand::Object(Variable::Integer(1)), Variable::Integer(1)),
            Err(AmlError::InvalidStoreTarget)
        );
        assert_eq!(state.store_to(&mut namespace, &Operand::Null, Variable::Integer(1)), Ok(()));
        assert_eq!(state.store_to(&mut namespace, &Operand::Debug, Variable::Integer(1)), Ok(()));
        assert_eq!(state.load_operand(&namespace, &Operand::Debug), Err(AmlError::InvalidLoadSource));
    }

    #[test]
    fn store_to_locals() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, method, .. } = test_namespace();
        state.push_invocation(&namespace, method, vec![Variable::Integer(7)]).unwrap();

        state.store_to(&mut namespace, &Operand::Local(0), Variable::create_buffer(4).unwrap()).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::Local(0)), Ok(Variable::Buffer(vec![0; 4])));

        // The buffer is released, and the local holds the new value
        state.store_to(&mut namespace, &Operand::Local(0), Variable::Integer(4)).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::Local(0)), Ok(Variable::Integer(4)));
        assert_eq!(state.load_operand(&namespace, &Operand::Arg(0)), Ok(Variable::Integer(7)));

        assert_eq!(
            state.store_to(&mut namespace, &Operand::Local(8), Variable::Integer(1)),
            Err(AmlError::InvalidLocalOrArg(8))
        );
    }

    #[test]
    fn store_through_args() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, method, int0, .. } = test_namespace();
        state.push_invocation(&namespace, method, vec![Variable::Reference(Reference::Node(int0))]).unwrap();

        state.store_to(&mut namespace, &Operand::Arg(0), Variable::Integer(5)).unwrap();
        assert_eq!(namespace.get(int0).object, Variable::Integer(5));
        assert_eq!(
            state.peek_ctxstack_back().unwrap().invocation.as_ref().unwrap().args[0],
            Variable::Reference(Reference::Node(int0))
        );
        assert_eq!(state.load_operand(&namespace, &Operand::Arg(0)), Ok(Variable::Integer(5)));
    }

    #[test]
    fn indexed_stores() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, dev0, .. } = test_namespace();
        let buf0 = namespace.child(dev0, NameSeg(*b"BUF0")).unwrap();
        let pkg0 = namespace.child(dev0, NameSeg(*b"PKG0")).unwrap();
        let str0 = namespace.child(dev0, NameSeg(*b"STR0")).unwrap();
        let index = |node, index| {
            Operand::Object(Variable::Reference(Reference::Index { base: Box::new(Reference::Node(node)), index }))
        };

        state.store_to(&mut namespace, &index(buf0, 1), Variable::Integer(0x1ff)).unwrap();
        assert_eq!(namespace.get(buf0).object, Variable::Buffer(vec![0x01, 0xff, 0x03]));
        assert_eq!(state.load_operand(&namespace, &index(buf0, 2)), Ok(Variable::Integer(3)));
        assert_eq!(
            state.store_to(&mut namespace, &index(buf0, 3), Variable::Integer(0)),
            Err(AmlError::IndexOutOfBounds { index: 3, length: 3 })
        );

        state.store_to(&mut namespace, &index(pkg0, 0), Variable::create_c_string("first").unwrap()).unwrap();
        assert_eq!(state.load_operand(&namespace, &index(pkg0, 0)), Ok(Variable::String(String::from("first"))));
        assert_eq!(state.load_operand(&namespace, &index(pkg0, 1)), Ok(Variable::Integer(2)));

        state.store_to(&mut namespace, &index(str0, 0), Variable::Integer(b'X' as u64)).unwrap();
        assert_eq!(namespace.get(str0).object, Variable::String(String::from("XBC")));
    }

    #[test]
    fn index_through_references() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, dev0, method, .. } = test_namespace();
        let pkg0 = namespace.child(dev0, NameSeg(*b"PKG0")).unwrap();
        state.push_invocation(&namespace, method, vec![Variable::Reference(Reference::Node(pkg0))]).unwrap();

        let frame = state.invocation_frame().unwrap();
        let element = Operand::Object(Variable::Reference(Reference::Index {
            base: Box::new(Reference::Arg { frame, index: 0 }),
            index: 1,
        }));
        state.store_to(&mut namespace, &element, Variable::Integer(9)).unwrap();
        assert_eq!(
            namespace.get(pkg0).object,
            Variable::Package(vec![Variable::Integer(1), Variable::Integer(9)])
        );
        assert_eq!(state.load_operand(&namespace, &element), Ok(Variable::Integer(9)));
    }

    #[test]
    fn reference_cycles() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, method, .. } = test_namespace();
        state.push_invocation(&namespace, method, vec![Variable::Integer(0)]).unwrap();

        let frame = state.invocation_frame().unwrap();
        let cycle = Variable::Reference(Reference::Local { frame, index: 0 });
        state.store_to(&mut namespace, &Operand::Local(0), cycle).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::Local(0)), Err(AmlError::ReferenceDepthExceeded));
    }

    #[test]
    fn integer_coercion() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { namespace, dev0, .. } = test_namespace();
        state.push_scope(dev0);

        let (buf0, _) = state.parse_name(b"BUF0");
        let (pkg0, _) = state.parse_name(b"PKG0");
        *state.push_opstack() = Operand::UnresolvedName(buf0);
        *state.push_opstack() = Operand::UnresolvedName(pkg0);
        *state.push_opstack() = Operand::Object(Variable::Integer(12));

        assert_eq!(state.get_integer(&namespace, 0), Ok(0x030201));
        assert_eq!(
            state.get_integer(&namespace, 1),
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Integer, got: ObjectType::Package })
        );
        assert_eq!(
            state.get_object_reference(&namespace, 2),
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Reference, got: ObjectType::Integer })
        );
    }

    #[test]
    fn package_literals() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::All);
        let TestNamespace { namespace, dev0, .. } = test_namespace();
        state.push_scope(dev0);

        let slot = state.begin_package(3, true).unwrap();
        *state.push_opstack() = Operand::Object(Variable::create_c_string("PNP0A03").unwrap());
        state.package_append().unwrap();
        let (name, _) = state.parse_name(b"INT0");
        state.push_name(&namespace, EvalMode::Data, name).unwrap();
        state.package_append().unwrap();
        assert_eq!(
            state.peek_stack_back(),
            Some(&StackItem::Package { opstack_slot: slot, element_index: 2, want_result: true })
        );
        state.end_package();

        assert_eq!(state.peek_stack_back(), None);
        assert_eq!(state.opstack_len(), 1);
        assert_eq!(
            state.get_opstack(slot),
            &Operand::Object(Variable::Package(vec![
                Variable::String(String::from("PNP0A03")),
                Variable::Name(name.to_name()),
                Variable::Uninitialized,
            ]))
        );

        // Loading an unresolved name from a package resolves it
        let element = Variable::Name(name.to_name());
        assert_eq!(state.load_operand(&namespace, &Operand::Object(element)), Ok(Variable::Integer(0)));
    }

    #[test]
    fn discarded_packages() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);

        state.begin_package(1, false).unwrap();
        *state.push_opstack() = Operand::Object(Variable::Integer(1));
        state.package_append().unwrap();
        *state.push_opstack() = Operand::Object(Variable::Integer(2));
        assert_eq!(state.package_append(), Err(AmlError::IndexOutOfBounds { index: 1, length: 1 }));
        state.pop_opstack(1);
        state.end_package();
        assert_eq!(state.opstack_len(), 0);
    }

    #[test]
    fn evaluation_modes() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { namespace, dev0, int0, method } = test_namespace();
        state.push_scope(dev0);

        let (int_name, _) = state.parse_name(b"INT0");
        let (method_name, _) = state.parse_name(b"MTH1");
        let (missing, _) = state.parse_name(b"MISS");

        state.push_name(&namespace, EvalMode::Data, missing).unwrap();
        assert_eq!(state.get_opstack(0), &Operand::UnresolvedName(missing));
        assert_eq!(
            state.push_name(&namespace, EvalMode::Object, missing),
            Err(AmlError::ObjectDoesNotExist(missing.to_name()))
        );

        state.push_name(&namespace, EvalMode::Object, int_name).unwrap();
        assert_eq!(state.get_opstack(1), &Operand::Object(Variable::Integer(0)));
        state.push_name(&namespace, EvalMode::Reference, int_name).unwrap();
        assert_eq!(state.get_opstack(2), &Operand::ResolvedName(int0));

        state.push_name(&namespace, EvalMode::Exec, int_name).unwrap();
        assert_eq!(state.opstack_len(), 3);
        state.push_name(&namespace, EvalMode::Exec, method_name).unwrap();
        assert_eq!(state.get_opstack(3), &Operand::ResolvedName(method));

        assert_eq!(
            state.push_name(&namespace, EvalMode::ImmediateWord, int_name),
            Err(AmlError::NotAllowedInMode(EvalMode::ImmediateWord))
        );
        assert_eq!(state.push_immediate_word(EvalMode::ImmediateWord, &[0x0a, 0x0b]), Ok(2));
        assert_eq!(state.get_opstack(4), &Operand::Object(Variable::Integer(0x0b0a)));
        assert_eq!(
            state.push_immediate_word(EvalMode::Data, &[0x0a, 0x0b]),
            Err(AmlError::NotAllowedInMode(EvalMode::Data))
        );
    }

    #[test]
    fn load_bytes_through_stored_references() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, dev0, method, int0 } = test_namespace();
        let buf0 = namespace.child(dev0, NameSeg(*b"BUF0")).unwrap();
        let str0 = namespace.child(dev0, NameSeg(*b"STR0")).unwrap();
        let pkg0 = namespace.child(dev0, NameSeg(*b"PKG0")).unwrap();
        let index = |node, index| {
            Variable::Reference(Reference::Index { base: Box::new(Reference::Node(node)), index })
        };

        state.push_invocation(&namespace, method, vec![index(buf0, 1)]).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::Arg(0)), Ok(Variable::Integer(0x02)));

        state.store_to(&mut namespace, &Operand::Local(0), index(str0, 2)).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::Local(0)), Ok(Variable::Integer(b'C' as u64)));

        // A reference to the arg, which itself holds an index into the buffer
        let arg0 = Variable::Reference(Reference::Arg { frame: state.invocation_frame().unwrap(), index: 0 });
        assert_eq!(state.load_operand(&namespace, &Operand::Object(arg0)), Ok(Variable::Integer(0x02)));

        // Stores through the arg and loads through it agree
        state.store_to(&mut namespace, &Operand::Arg(0), Variable::Integer(0x7f)).unwrap();
        assert_eq!(namespace.get(buf0).object, Variable::Buffer(vec![0x01, 0x7f, 0x03]));
        assert_eq!(state.load_operand(&namespace, &Operand::Arg(0)), Ok(Variable::Integer(0x7f)));

        // Through a namespace object, and through a package element
        state.store_to(&mut namespace, &Operand::ResolvedName(int0), index(buf0, 0)).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::ResolvedName(int0)), Ok(Variable::Integer(0x01)));
        state.store_to(&mut namespace, &Operand::Object(index(pkg0, 0)), index(str0, 0)).unwrap();
        assert_eq!(
            state.load_operand(&namespace, &Operand::Object(index(pkg0, 0))),
            Ok(Variable::Integer(b'A' as u64))
        );

        // Bytes aren't containers, so they can't be indexed again
        let nested = Variable::Reference(Reference::Index { base: Box::new(Reference::Node(int0)), index: 0 });
        assert_eq!(
            state.load_operand(&namespace, &Operand::Object(nested)),
            Err(AmlError::ObjectNotOfExpectedType { expected: ObjectType::Package, got: ObjectType::Buffer })
        );
    }

    #[test]
    fn references_do_not_outlive_their_call() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, method, int0, .. } = test_namespace();

        state.push_invocation(&namespace, method, vec![Variable::Integer(0)]).unwrap();
        state.store_to(&mut namespace, &Operand::Local(0), Variable::Integer(111)).unwrap();
        *state.push_opstack() = Operand::Local(0);
        let local0 = state.get_object_reference(&namespace, 0).unwrap();
        state.pop_opstack(1);
        state.store_to(&mut namespace, &Operand::ResolvedName(int0), local0).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::ResolvedName(int0)), Ok(Variable::Integer(111)));
        state.pop_ctxstack_back();

        // A second call reuses the same context stack position
        state.push_invocation(&namespace, method, vec![Variable::Integer(0)]).unwrap();
        state.store_to(&mut namespace, &Operand::Local(0), Variable::Integer(222)).unwrap();
        assert_eq!(state.load_operand(&namespace, &Operand::ResolvedName(int0)), Err(AmlError::InvalidReference));

        // Storing to the stale reference is refused rather than reaching the new call's local
        let stale = namespace.get(int0).object.clone();
        assert_eq!(
            state.store_to(&mut namespace, &Operand::Object(stale), Variable::Integer(333)),
            Err(AmlError::InvalidReference)
        );
        assert_eq!(state.load_operand(&namespace, &Operand::Local(0)), Ok(Variable::Integer(222)));
    }

    #[test]
    fn create_forward_references() {
        let handler = TestHandler;
        let mut state = State::new(&handler, DebugVerbosity::None);
        let TestNamespace { mut namespace, dev0, .. } = test_namespace();
        state.push_scope(dev0);

        let (path, _) = state.parse_name(b"_HID");
        let created = state.resolve_or_create(&mut namespace, &path).unwrap();
        assert_eq!(namespace.get(created).kind, NodeKind::Placeholder);
        assert_eq!(state.resolve(&namespace, &path), Some(created));

        let (nested, _) = state.parse_name(b"\x2eNONE_HID");
        assert!(matches!(state.resolve_or_create(&mut namespace, &nested), Err(AmlError::LevelDoesNotExist(_))));
    }
}
