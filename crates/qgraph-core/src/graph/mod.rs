//! The query graph: a rooted tree of retrieval nodes.
//!
//! Nodes live in an arena (`Vec<QueryNode>`) and refer to each other by
//! index, so parent links are non-owning by construction. The root is the
//! unique node never joined as a child.

mod builder;

pub use builder::{build_graph, build_graph_with};

use crate::db::{Connector, ConnectorRegistry};
use crate::error::GraphConfigError;
use crate::manipulate::ManipulationSet;
use crate::template::QueryTemplate;
use crate::types::{Frame, JoinKind};
use std::collections::HashMap;
use std::sync::Arc;

pub type NodeId = usize;

/// How a child's frame merges into its parent: join kind plus
/// `(parent_column, child_column)` equivalence pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinContext {
    pub kind: JoinKind,
    pub pairs: Vec<(String, String)>,
}

impl JoinContext {
    pub fn new(kind: JoinKind, pairs: Vec<(String, String)>) -> Self {
        Self { kind, pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl Default for JoinContext {
    fn default() -> Self {
        Self {
            kind: JoinKind::Left,
            pairs: Vec::new(),
        }
    }
}

/// One retrieval step: a template bound to a connector, with a manipulation
/// pipeline and a join context towards its parent.
pub struct QueryNode {
    pub name: String,
    pub template: QueryTemplate,
    connector: Arc<dyn Connector>,
    /// Post-retrieval projection; empty keeps every retrieved column.
    pub fields: Vec<String>,
    pub manipulations: ManipulationSet,
    pub join: JoinContext,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Populated exactly once per execution cycle.
    pub frame: Option<Frame>,
    pub executed: bool,
}

impl QueryNode {
    pub fn new(
        name: impl Into<String>,
        template: QueryTemplate,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            connector,
            fields: Vec::new(),
            manipulations: ManipulationSet::new(),
            join: JoinContext::default(),
            parent: None,
            children: Vec::new(),
            frame: None,
            executed: false,
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// A node is independent iff its template has no `{{ }}` token.
    pub fn is_independent(&self) -> bool {
        !self.template.has_dependent_parameters()
    }
}

impl std::fmt::Debug for QueryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryNode")
            .field("name", &self.name)
            .field("connector", &self.connector.name())
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("executed", &self.executed)
            .finish()
    }
}

/// The rooted tree of query nodes plus the connector registry.
#[derive(Debug)]
pub struct QueryGraph {
    nodes: Vec<QueryNode>,
    by_name: HashMap<String, NodeId>,
    registry: ConnectorRegistry,
    root: Option<NodeId>,
}

impl QueryGraph {
    pub fn new(registry: ConnectorRegistry) -> Self {
        Self {
            nodes: Vec::new(),
            by_name: HashMap::new(),
            registry,
            root: None,
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn node(&self, name: &str) -> Option<&QueryNode> {
        self.by_name.get(name).map(|&id| &self.nodes[id])
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut QueryNode> {
        let id = *self.by_name.get(name)?;
        Some(&mut self.nodes[id])
    }

    pub(crate) fn get(&self, id: NodeId) -> &QueryNode {
        &self.nodes[id]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut QueryNode {
        &mut self.nodes[id]
    }

    pub(crate) fn id_of(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// The root node, once resolved.
    pub fn root(&self) -> Option<&QueryNode> {
        self.root.map(|id| &self.nodes[id])
    }

    pub(crate) fn root_id(&self) -> Option<NodeId> {
        self.root
    }

    /// Adds a detached node. Names are unique across the graph.
    pub fn add_node(&mut self, node: QueryNode) -> Result<NodeId, GraphConfigError> {
        if self.by_name.contains_key(&node.name) {
            return Err(GraphConfigError::DuplicateNode(node.name.clone()));
        }
        let id = self.nodes.len();
        self.by_name.insert(node.name.clone(), id);
        self.nodes.push(node);
        // a structural change invalidates any previously resolved root
        self.root = None;
        Ok(id)
    }

    /// Wires `child` under `parent` with the given join context.
    ///
    /// Fails, leaving the graph unchanged, when either name is unknown, the
    /// child already has a parent, the context has no column pairs, or the
    /// parent lies inside the child's own subtree.
    pub fn attach_child(
        &mut self,
        parent: &str,
        child: &str,
        join: JoinContext,
    ) -> Result<(), GraphConfigError> {
        let parent_id = self
            .id_of(parent)
            .ok_or_else(|| GraphConfigError::UnknownNode(parent.to_string()))?;
        let child_id = self
            .id_of(child)
            .ok_or_else(|| GraphConfigError::UnknownNode(child.to_string()))?;
        if self.nodes[child_id].parent.is_some() {
            return Err(GraphConfigError::DuplicateParent(child.to_string()));
        }
        if join.is_empty() {
            return Err(GraphConfigError::EmptyJoin(child.to_string()));
        }
        // Walking up from the parent: hitting the child means the parent is
        // inside the child's subtree.
        let mut cursor = Some(parent_id);
        while let Some(id) = cursor {
            if id == child_id {
                return Err(GraphConfigError::Cycle {
                    parent: parent.to_string(),
                    child: child.to_string(),
                });
            }
            cursor = self.nodes[id].parent;
        }
        self.nodes[child_id].parent = Some(parent_id);
        self.nodes[child_id].join = join;
        self.nodes[parent_id].children.push(child_id);
        self.root = None;
        Ok(())
    }

    /// Determines the unique parentless node and records it as the root.
    pub fn resolve_root(&mut self) -> Result<NodeId, GraphConfigError> {
        let parentless: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&id| self.nodes[id].parent.is_none())
            .collect();
        match parentless.as_slice() {
            [] => Err(GraphConfigError::NoRoot),
            [root] => {
                self.root = Some(*root);
                Ok(*root)
            }
            many => Err(GraphConfigError::MultipleRoots(
                many.iter().map(|&id| self.nodes[id].name.clone()).collect(),
            )),
        }
    }

    /// Preorder traversal from the root: parents before children, children in
    /// declared order. Empty when the root is unresolved.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// Clears per-execution state on every node.
    pub(crate) fn reset_execution_state(&mut self) {
        for node in &mut self.nodes {
            node.frame = None;
            node.executed = false;
        }
    }
}
