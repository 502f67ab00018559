use crate::{
    name::{AmlName, AmlNamePath, NameSeg},
    variable::{MethodFlags, Variable},
    AmlError,
};
use alloc::{collections::BTreeMap, string::String, vec::Vec};
use core::{fmt, str::FromStr};
use log::{trace, warn};

/// A handle is used to refer to a namespace node without borrowing the namespace (this makes borrowing much
/// easier, as you only have to consider who's borrowing the namespace). They can also be cached to avoid
/// repeating lookups.
///
/// Nodes are never removed, so a handle stays valid for as long as the namespace it came from.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AmlHandle(u32);

#[derive(Clone, PartialEq, Debug)]
pub enum NodeKind {
    Root,
    Scope,
    Device,
    /// A legacy `Processor` object. Modern tables define processors as `Device`s.
    Processor,
    PowerResource,
    ThermalZone,
    /// A named data object (`DefName`). Its value is held in the node's `object`.
    Name,
    Method {
        flags: MethodFlags,
        code: Vec<u8>,
    },
    /// An alias to another node. Aliases always point at a node that is not itself an alias.
    Alias(AmlHandle),
    /// Created by `resolve_or_create` for a name that is referenced before it is defined. It will be given a
    /// real kind when its definition is loaded.
    Placeholder,
}

pub struct NamespaceNode {
    pub name: NameSeg,
    pub parent: Option<AmlHandle>,
    pub kind: NodeKind,
    pub object: Variable,
    children: BTreeMap<NameSeg, AmlHandle>,
}

impl NamespaceNode {
    pub fn children(&self) -> impl Iterator<Item = (&NameSeg, &AmlHandle)> {
        self.children.iter()
    }
}

/// The namespace is the tree of every object that AML can name. It is populated by loading tables, and then
/// shared by every later evaluation - see the crate documentation for the synchronization this requires.
pub struct Namespace {
    /// Every node, indexed by handle. The root is always the first node.
    nodes: Vec<NamespaceNode>,
}

impl Namespace {
    /// Create an empty namespace that only contains the root.
    pub fn new() -> Namespace {
        Namespace {
            nodes: alloc::vec![NamespaceNode {
                name: NameSeg(*b"\\___"),
                parent: None,
                kind: NodeKind::Root,
                object: Variable::Uninitialized,
                children: BTreeMap::new(),
            }],
        }
    }

    /// Create a namespace with the scopes and objects the ACPI specification pre-defines.
    pub fn with_predefined() -> Namespace {
        let mut namespace = Namespace::new();
        let root = namespace.root();

        for scope in [b"_GPE", b"_SB_", b"_SI_", b"_PR_", b"_TZ_"] {
            namespace.add_child(root, NameSeg(*scope), NodeKind::Scope);
        }

        /*
         * `\_OS` and `\_REV` are both considered deprecated, as firmwares used them to detect which OS they
         * were running on. We follow the NT interpreter and ACPICA by calling ourselves `Microsoft Windows NT`,
         * and by reporting `2` as the supported revision (which newer ACPI revisions describe as "ACPI 2 or
         * greater").
         */
        namespace.add_name(root, NameSeg(*b"_OS_"), Variable::String(String::from("Microsoft Windows NT")));
        namespace.add_name(root, NameSeg(*b"_REV"), Variable::Integer(2));

        namespace
    }

    pub fn root(&self) -> AmlHandle {
        AmlHandle(0)
    }

    pub fn get(&self, handle: AmlHandle) -> &NamespaceNode {
        &self.nodes[handle.0 as usize]
    }

    pub fn get_mut(&mut self, handle: AmlHandle) -> &mut NamespaceNode {
        &mut self.nodes[handle.0 as usize]
    }

    pub fn parent(&self, handle: AmlHandle) -> Option<AmlHandle> {
        self.get(handle).parent
    }

    /// Look up the immediate child of `handle` called `name`. Aliases are not followed.
    pub fn child(&self, handle: AmlHandle, name: NameSeg) -> Option<AmlHandle> {
        self.get(handle).children.get(&name).copied()
    }

    /// Add a child node to `parent`. If the child already exists, the existing node is returned: blocks like
    /// `Scope` and `Device` can be opened more than once for the same name, and placeholders created by
    /// forward references take on the kind of their definition.
    pub fn add_child(&mut self, parent: AmlHandle, name: NameSeg, kind: NodeKind) -> AmlHandle {
        if let Some(existing) = self.child(parent, name) {
            let node = self.get_mut(existing);
            if node.kind == NodeKind::Placeholder {
                node.kind = kind;
            } else if kind != NodeKind::Scope && node.kind != kind {
                /*
                 * Real AML often has name collisions, and so we can't afford to be too strict about it. We do
                 * note it, as it does have the potential to break stuff.
                 */
                trace!("AML name collision: {}. Replacing object kind.", self.path_of(existing));
                self.get_mut(existing).kind = kind;
            }
            return existing;
        }

        let handle = AmlHandle(self.nodes.len() as u32);
        self.nodes.push(NamespaceNode {
            name,
            parent: Some(parent),
            kind,
            object: Variable::Uninitialized,
            children: BTreeMap::new(),
        });
        self.get_mut(parent).children.insert(name, handle);
        handle
    }

    /// Add a named data object (`DefName`), replacing the value of any existing object of the same name.
    pub fn add_name(&mut self, parent: AmlHandle, name: NameSeg, value: Variable) -> AmlHandle {
        let handle = self.add_child(parent, name, NodeKind::Name);
        let object = &mut self.get_mut(handle).object;
        object.finalize();
        *object = value;
        handle
    }

    pub fn add_alias(
        &mut self,
        parent: AmlHandle,
        name: NameSeg,
        target: AmlHandle,
    ) -> Result<AmlHandle, AmlError> {
        if let Some(existing) = self.child(parent, name) {
            return Err(AmlError::NameCollision(self.path_of(existing)));
        }
        let target = self.follow_alias(target);
        Ok(self.add_child(parent, name, NodeKind::Alias(target)))
    }

    pub fn follow_alias(&self, handle: AmlHandle) -> AmlHandle {
        match self.get(handle).kind {
            NodeKind::Alias(target) => target,
            _ => handle,
        }
    }

    /// Resolve `path` against the namespace, starting at `context` for relative paths. Returns `Ok(None)` if
    /// no node of that name exists.
    ///
    /// If the search rules described in §5.3 of the ACPI specification apply to the path (it is a single,
    /// unprefixed segment), the name is looked for in `context`, and then in each of its ancestors up to and
    /// including the root. Errors are only returned for paths that can't possibly be valid, such as those that
    /// climb past the root with `^` prefixes.
    pub fn resolve(&self, context: AmlHandle, path: &AmlNamePath<'_>) -> Result<Option<AmlHandle>, AmlError> {
        let mut path = *path;

        if path.search_scopes() {
            let segment = path.next_segment().ok_or(AmlError::EmptyNamesAreInvalid)?;
            let mut scope = Some(self.follow_alias(context));
            while let Some(current) = scope {
                if let Some(node) = self.child(current, segment) {
                    return Ok(Some(self.follow_alias(node)));
                }
                scope = self.parent(current);
            }
            return Ok(None);
        }

        let mut current = self.starting_scope(context, &path)?;
        for segment in path {
            match self.child(current, segment) {
                Some(node) => current = self.follow_alias(node),
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Resolve `path` in the same way as [`Namespace::resolve`], except that the last segment is created as a
    /// placeholder node if it doesn't exist. Search rules never apply: new names are always created relative to
    /// `context`. Every segment before the last one must already exist.
    pub fn resolve_or_create(
        &mut self,
        context: AmlHandle,
        path: &AmlNamePath<'_>,
    ) -> Result<AmlHandle, AmlError> {
        let mut path = *path;
        let mut current = self.starting_scope(context, &path)?;

        let mut segment = path.next_segment().ok_or(AmlError::EmptyNamesAreInvalid)?;
        for next in path {
            current = match self.child(current, segment) {
                Some(node) => self.follow_alias(node),
                None => {
                    let mut missing = self.path_of(current);
                    missing.push(segment);
                    return Err(AmlError::LevelDoesNotExist(missing));
                }
            };
            segment = next;
        }

        match self.child(current, segment) {
            Some(existing) => Ok(self.follow_alias(existing)),
            None => {
                trace!("Creating placeholder for forward reference to {}.{}", self.path_of(current), segment);
                Ok(self.add_child(current, segment, NodeKind::Placeholder))
            }
        }
    }

    /// Find the node a non-search path starts walking its segments from: the root for absolute paths, otherwise
    /// `context` after exiting `height` scopes.
    fn starting_scope(&self, context: AmlHandle, path: &AmlNamePath<'_>) -> Result<AmlHandle, AmlError> {
        if path.is_absolute() {
            return Ok(self.root());
        }

        let mut current = self.follow_alias(context);
        for _ in 0..path.height() {
            current = self.parent(current).ok_or(AmlError::RootHasNoParent)?;
        }
        Ok(current)
    }

    /// Get the absolute path of a node. For example, the path of a device `PCI0` in `\_SB` is `\_SB_.PCI0`.
    pub fn path_of(&self, handle: AmlHandle) -> AmlName {
        let mut segments = Vec::new();
        let mut current = handle;
        while let Some(parent) = self.parent(current) {
            segments.push(self.get(current).name);
            current = parent;
        }

        let mut name = AmlName::root();
        for segment in segments.into_iter().rev() {
            name.push(segment);
        }
        name
    }

    /// Look up a node by an absolute path given in ASL notation. This is mostly useful for hosts that want to
    /// find well-known objects, such as `\_SB.PCI0._PRT`.
    pub fn search(&self, path: &str) -> Result<AmlHandle, AmlError> {
        let name = AmlName::from_str(path)?;
        if !name.is_absolute() {
            warn!("Namespace::search called with relative path {}. Resolving from the root.", name);
        }
        self.resolve(self.root(), &name.as_path())?.ok_or(AmlError::ObjectDoesNotExist(name))
    }

    /// Traverse the namespace, calling `f` on each node below the root. `f` returns a `Result<bool, AmlError>` -
    /// errors terminate the traversal and are propagated, and the `bool` on the successful path marks whether
    /// the children of the node should also be traversed.
    pub fn traverse<F>(&self, mut f: F) -> Result<(), AmlError>
    where
        F: FnMut(AmlHandle, &NamespaceNode) -> Result<bool, AmlError>,
    {
        fn traverse_node<F>(namespace: &Namespace, handle: AmlHandle, f: &mut F) -> Result<(), AmlError>
        where
            F: FnMut(AmlHandle, &NamespaceNode) -> Result<bool, AmlError>,
        {
            for &child in namespace.get(handle).children.values() {
                if f(child, namespace.get(child))? {
                    traverse_node(namespace, child, f)?;
                }
            }
            Ok(())
        }

        traverse_node(self, self.root(), &mut f)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::new()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const STEM: &str = "│   ";
        const BRANCH: &str = "├── ";
        const END: &str = "└── ";

        fn print_node(
            namespace: &Namespace,
            f: &mut fmt::Formatter<'_>,
            node: &NamespaceNode,
            indent_stack: &str,
        ) -> fmt::Result {
            for (i, &child) in node.children.values().enumerate() {
                let end = i == node.children.len() - 1;
                let child = namespace.get(child);
                write!(f, "{}{}{}: ", indent_stack, if end { END } else { BRANCH }, child.name)?;
                match child.kind {
                    NodeKind::Name => writeln!(f, "{}", child.object)?,
                    NodeKind::Method { flags, .. } => writeln!(f, "Method({} args)", flags.arg_count())?,
                    NodeKind::Alias(target) => writeln!(f, "Alias -> {}", namespace.path_of(target))?,
                    ref other => writeln!(f, "{:?}", other)?,
                }

                let mut child_indent = String::from(indent_stack);
                child_indent.push_str(if end { "    " } else { STEM });
                print_node(namespace, f, child, &child_indent)?;
            }
            Ok(())
        }

        writeln!(f, "\n    \\:")?;
        print_node(self, f, self.get(self.root()), "    ")
    }
}
