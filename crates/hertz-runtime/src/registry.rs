//! [`NodeRegistry`] – the declared topology and the live-instance list.
//!
//! The registry owns one [`NodeRecord`] per node and the flat list of live
//! peripheral instances the poller cycles over.  It is shared between the
//! orchestrator and the poller as a [`SharedRegistry`]; every operation is
//! synchronous and never touches hardware.
//!
//! Structural operations (`append`, `insert_before`, `detach`, `clear`) only
//! change where a node sits in the tree.  They never start, stop or repeat
//! any lifecycle operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hertz_hal::PeripheralInstance;
use hertz_types::{Attributes, HertzError, NodeId};
use parking_lot::Mutex;

/// Registry handle shared by the orchestrator and the poller.
pub type SharedRegistry = Arc<Mutex<NodeRegistry>>;

/// Where a node is attached: directly under the root container, or under
/// another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachPoint {
    Container,
    Node(NodeId),
}

pub struct NodeRecord {
    pub id: NodeId,
    pub kind: String,
    /// Attributes the node was created with; init mounts these.
    pub created: Attributes,
    /// Latest declared attributes.
    pub attributes: Attributes,
    /// `None` when attached to the container or not attached at all.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub instance: Arc<dyn PeripheralInstance>,
}

impl NodeRecord {
    pub fn new(attributes: Attributes, instance: Arc<dyn PeripheralInstance>) -> Self {
        Self {
            id: instance.id(),
            kind: instance.kind().to_string(),
            created: attributes.clone(),
            attributes,
            parent: None,
            children: Vec::new(),
            instance,
        }
    }

    /// `kind#id`, the label used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}{}", self.kind, self.id)
    }
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, NodeRecord>,
    roots: Vec<NodeId>,
    attached_to_container: HashSet<NodeId>,
    live: Vec<Arc<dyn PeripheralInstance>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh registry for sharing.
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Add a detached node and its instance to the live list.
    pub fn insert(&mut self, record: NodeRecord) {
        self.live.push(record.instance.clone());
        self.nodes.insert(record.id, record);
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes attached directly to the container, in order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Ordered children of an attach point.
    pub fn children(&self, at: AttachPoint) -> Option<&[NodeId]> {
        match at {
            AttachPoint::Container => Some(&self.roots),
            AttachPoint::Node(id) => self.nodes.get(&id).map(|r| r.children.as_slice()),
        }
    }

    /// Every node with no parent: the container's children in order, then
    /// never-attached or detached nodes by id.
    pub fn top_level(&self) -> Vec<NodeId> {
        let mut loose: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|r| r.parent.is_none() && !self.attached_to_container.contains(&r.id))
            .map(|r| r.id)
            .collect();
        loose.sort();

        let mut ids = self.roots.clone();
        ids.extend(loose);
        ids
    }

    /// Attach `child` as the last child of `at`, detaching it from any
    /// previous position first.
    pub fn append(&mut self, at: AttachPoint, child: NodeId) -> Result<(), HertzError> {
        self.check_attach(at, child)?;
        self.detach(child)?;
        self.siblings_mut(at)?.push(child);
        self.set_parent(at, child);
        Ok(())
    }

    /// Attach `child` under `at` right before the sibling `before`.
    pub fn insert_before(
        &mut self,
        at: AttachPoint,
        child: NodeId,
        before: NodeId,
    ) -> Result<(), HertzError> {
        self.check_attach(at, child)?;
        if child == before {
            return Err(HertzError::Topology(format!(
                "cannot insert {child} before itself"
            )));
        }
        if !self
            .children(at)
            .is_some_and(|siblings| siblings.contains(&before))
        {
            return Err(HertzError::Topology(format!(
                "{before} is not a child of {}",
                describe(at)
            )));
        }

        self.detach(child)?;
        let siblings = self.siblings_mut(at)?;
        let index = siblings
            .iter()
            .position(|id| *id == before)
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.set_parent(at, child);
        Ok(())
    }

    /// Remove `child` from its current position.  Detaching a node that is
    /// not attached anywhere is a no-op.
    pub fn detach(&mut self, child: NodeId) -> Result<(), HertzError> {
        let parent = self
            .nodes
            .get_mut(&child)
            .ok_or(HertzError::UnknownNode(child))?
            .parent
            .take();

        match parent {
            Some(parent) => {
                if let Some(record) = self.nodes.get_mut(&parent) {
                    record.children.retain(|id| *id != child);
                }
            }
            None => {
                self.roots.retain(|id| *id != child);
                self.attached_to_container.remove(&child);
            }
        }
        Ok(())
    }

    /// Detach every child of `at`.  Returns the detached ids in their former
    /// order.
    pub fn clear(&mut self, at: AttachPoint) -> Result<Vec<NodeId>, HertzError> {
        let detached = self
            .children(at)
            .ok_or_else(|| unknown(at))?
            .to_vec();
        for child in &detached {
            self.detach(*child)?;
        }
        Ok(detached)
    }

    /// Ids of `id`'s subtree in post-order: every child before its parent,
    /// `id` last.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        // (node, children already pushed)
        let mut stack = vec![(id, false)];
        while let Some((node, expanded)) = stack.pop() {
            let Some(record) = self.nodes.get(&node) else {
                continue;
            };
            if expanded {
                order.push(node);
            } else {
                stack.push((node, true));
                for child in record.children.iter().rev() {
                    stack.push((*child, false));
                }
            }
        }
        order
    }

    /// Drop a node's record and its live instance.
    pub fn purge(&mut self, id: NodeId) -> Option<NodeRecord> {
        let _ = self.detach(id);
        let record = self.nodes.remove(&id)?;
        self.live.retain(|instance| instance.id() != id);
        for child in &record.children {
            if let Some(child) = self.nodes.get_mut(child) {
                child.parent = None;
            }
        }
        Some(record)
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn live_at(&self, index: usize) -> Option<Arc<dyn PeripheralInstance>> {
        self.live.get(index).cloned()
    }

    fn check_attach(&self, at: AttachPoint, child: NodeId) -> Result<(), HertzError> {
        if !self.contains(child) {
            return Err(HertzError::UnknownNode(child));
        }
        if let AttachPoint::Node(parent) = at {
            if !self.contains(parent) {
                return Err(HertzError::UnknownNode(parent));
            }
            if self.subtree(child).contains(&parent) {
                return Err(HertzError::Topology(format!(
                    "attaching {child} under {parent} would create a cycle"
                )));
            }
        }
        Ok(())
    }

    fn siblings_mut(&mut self, at: AttachPoint) -> Result<&mut Vec<NodeId>, HertzError> {
        match at {
            AttachPoint::Container => Ok(&mut self.roots),
            AttachPoint::Node(id) => self
                .nodes
                .get_mut(&id)
                .map(|r| &mut r.children)
                .ok_or(HertzError::UnknownNode(id)),
        }
    }

    fn set_parent(&mut self, at: AttachPoint, child: NodeId) {
        match at {
            AttachPoint::Container => {
                self.attached_to_container.insert(child);
            }
            AttachPoint::Node(parent) => {
                if let Some(record) = self.nodes.get_mut(&child) {
                    record.parent = Some(parent);
                }
            }
        }
    }
}

fn describe(at: AttachPoint) -> String {
    match at {
        AttachPoint::Container => "the container".to_string(),
        AttachPoint::Node(id) => id.to_string(),
    }
}

fn unknown(at: AttachPoint) -> HertzError {
    match at {
        AttachPoint::Container => HertzError::Topology("container unavailable".to_string()),
        AttachPoint::Node(id) => HertzError::UnknownNode(id),
    }
}
