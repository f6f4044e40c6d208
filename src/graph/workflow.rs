// src/graph/workflow.rs

//! The workflow registry: owns every data node and connector, assigns path
//! ids, and exposes the graph-editing operations.
//!
//! All mutation is funneled through the coordinator that owns this struct;
//! none of these methods are safe to call from concurrent contexts, and the
//! engine never shares `Workflow` across threads. Executions started by the
//! state machine accumulate in an internal buffer that the engine drains
//! with [`Workflow::drain_ready`] after every operation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info};

use crate::context::Context;
use crate::errors::{Result, WorkflowError};
use crate::graph::node::{Connector, DataNode, ExecutionRequest, RemovedNode};
use crate::graph::path_id::PathIdTable;
use crate::graph::state;
use crate::payload::Payload;
use crate::transform::Transform;
use crate::types::{ExecId, ExecOutcome, NodeId, NodeState};

/// The root registry of one document's workflow graph.
pub struct Workflow {
    pub(crate) data_nodes: HashMap<NodeId, DataNode>,
    pub(crate) connectors: HashMap<NodeId, Connector>,
    /// Root of path-id assignment and subtree traversals; the first created
    /// data node unless overridden with [`Workflow::set_top`].
    pub(crate) top: Option<NodeId>,
    /// The designated working data node; its consumers are all recomputed
    /// whenever it becomes valid.
    pub(crate) working: Option<NodeId>,
    topology_version: u64,
    /// Nodes not currently in `{Valid, Failed}`.
    pub(crate) unsettled: HashSet<NodeId>,
    path_ids: PathIdTable,
    pub(crate) ctx: Arc<Context>,
    pub(crate) exec_seq: u64,
    /// Execution requests produced by state transitions, drained by the
    /// engine after every operation.
    pub(crate) ready: Vec<ExecutionRequest>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("data_nodes", &self.data_nodes.len())
            .field("connectors", &self.connectors.len())
            .field("topology_version", &self.topology_version)
            .field("unsettled", &self.unsettled.len())
            .finish_non_exhaustive()
    }
}

impl Workflow {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            data_nodes: HashMap::new(),
            connectors: HashMap::new(),
            top: None,
            working: None,
            topology_version: 0,
            unsettled: HashSet::new(),
            path_ids: PathIdTable::new(),
            ctx,
            exec_seq: 0,
            ready: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Monotonic counter incremented on every structural edit.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// The aggregate "is anything still settling" flag: true when every node
    /// is in `{Valid, Failed}`.
    pub fn is_settled(&self) -> bool {
        self.unsettled.is_empty()
    }

    pub fn data_node(&self, id: NodeId) -> Option<&DataNode> {
        self.data_nodes.get(&id)
    }

    pub fn connector(&self, id: NodeId) -> Option<&Connector> {
        self.connectors.get(&id)
    }

    pub fn state_of(&self, id: NodeId) -> Option<NodeState> {
        self.data_nodes
            .get(&id)
            .map(|n| n.state())
            .or_else(|| self.connectors.get(&id).map(|c| c.state()))
    }

    pub fn data_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.data_nodes.keys().copied()
    }

    pub fn connector_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.connectors.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.data_nodes.len() + self.connectors.len()
    }

    pub fn top(&self) -> Option<NodeId> {
        self.top
    }

    pub fn set_top(&mut self, node: NodeId) {
        self.top = Some(node);
    }

    pub fn working(&self) -> Option<NodeId> {
        self.working
    }

    pub fn set_working(&mut self, node: NodeId) {
        self.working = Some(node);
    }

    /// Drain the execution requests produced since the last drain. The
    /// engine calls this after every event/operation and hands the result to
    /// the executor backend.
    pub fn drain_ready(&mut self) -> Vec<ExecutionRequest> {
        std::mem::take(&mut self.ready)
    }

    // ---- state machine -------------------------------------------------

    /// The state-machine entry point (see `graph::state`). Requesting
    /// `Computing` from outside is a contract violation and panics.
    pub fn request_state(&mut self, node: NodeId, target: NodeState) {
        state::request_state(self, node, target);
    }

    /// Sugar for "request Invalid" regardless of the current state; used
    /// after editing a transform's parameters or duplicating a slice.
    pub fn force_recompute(&mut self, node: NodeId) {
        self.request_state(node, NodeState::Invalid);
    }

    /// Feed an execution's terminal outcome into the state machine. Stale
    /// and foreign events are dropped.
    pub fn on_execution_finished(&mut self, conn: NodeId, exec_id: ExecId, outcome: ExecOutcome) {
        state::on_execution_finished(self, conn, exec_id, outcome);
    }

    // ---- factories -----------------------------------------------------

    /// Register a new data node owning `payload`. Initial state `Invalid`;
    /// loaders mark roots valid once their content is in place.
    pub fn create_data_node(&mut self, title: impl Into<String>, payload: Box<dyn Payload>) -> NodeId {
        let node = DataNode::new(title.into(), payload);
        let id = node.id;
        self.data_nodes.insert(id, node);
        self.unsettled.insert(id);
        if self.top.is_none() {
            self.top = Some(id);
        }
        self.bump_topology();
        debug!(node = %id, "data node created");
        id
    }

    /// Register a connector from `parent` to `child` carrying `transform`.
    ///
    /// If the parent is already valid the connector is immediately promoted
    /// through the invalid handler and may enqueue an execution.
    pub fn create_connector(
        &mut self,
        parent: NodeId,
        child: NodeId,
        transform: Option<Arc<dyn Transform>>,
    ) -> Result<NodeId> {
        if !self.data_nodes.contains_key(&parent) {
            return Err(WorkflowError::NodeNotFound(parent));
        }
        let child_node = self
            .data_nodes
            .get(&child)
            .ok_or(WorkflowError::NodeNotFound(child))?;
        if child_node.parent.is_some() {
            return Err(WorkflowError::AlreadyAttached(child));
        }

        let conn = Connector::new(parent, child, transform);
        let id = conn.id;
        self.connectors.insert(id, conn);
        self.unsettled.insert(id);

        if let Some(p) = self.data_nodes.get_mut(&parent) {
            p.children.push(id);
        }
        if let Some(c) = self.data_nodes.get_mut(&child) {
            c.parent = Some(id);
        }

        self.bump_topology();
        debug!(connector = %id, %parent, %child, "connector created");

        // Eligibility check: promotes to Computing when the parent is
        // already valid, otherwise leaves the connector waiting.
        self.request_state(id, NodeState::Invalid);
        Ok(id)
    }

    /// Rebind a connector's transform and refresh applicability. Callers
    /// follow up with [`Workflow::force_recompute`] once editing is done.
    pub fn set_transform(&mut self, conn: NodeId, transform: Arc<dyn Transform>) -> Result<()> {
        let parent = {
            let c = self
                .connectors
                .get_mut(&conn)
                .ok_or(WorkflowError::NotAConnector(conn))?;
            c.title = transform.name().to_string();
            c.transform = Some(transform);
            c.parent
        };
        let parent_valid = self.data_nodes.get(&parent).map(|n| n.state()) == Some(NodeState::Valid);
        state::refresh_applicability(self, conn, parent_valid);
        Ok(())
    }

    /// Document reset: drop every node. In-flight executions are cancelled;
    /// their terminal events will find no connector and be dropped.
    pub fn clear(&mut self) {
        for conn in self.connectors.values() {
            if let Some(h) = &conn.current_exec {
                h.token.cancel();
            }
        }
        let removed = self.node_count();
        self.data_nodes.clear();
        self.connectors.clear();
        self.unsettled.clear();
        self.ready.clear();
        self.top = None;
        self.working = None;
        self.bump_topology();
        info!(removed, "workflow cleared");
    }

    // ---- deletion ------------------------------------------------------

    /// Delete `node` and/or its descendants.
    ///
    /// Descendants are removed post-order (children before their parent's
    /// reference is dropped); in-flight executions of removed connectors are
    /// cancelled. Idempotent: unknown ids are a no-op. Returns the removed
    /// node records, post-order, for undo via [`Workflow::reconnect`].
    pub fn delete(
        &mut self,
        node: NodeId,
        delete_node: bool,
        delete_descendants: bool,
    ) -> Vec<RemovedNode> {
        let mut removed = Vec::new();
        if !self.data_nodes.contains_key(&node) && !self.connectors.contains_key(&node) {
            return removed;
        }

        if delete_descendants {
            self.remove_descendants(node, &mut removed);
        }
        if delete_node {
            self.remove_single(node, &mut removed);
        }
        if !removed.is_empty() {
            self.bump_topology();
            info!(node = %node, removed = removed.len(), "deleted workflow nodes");
        }
        removed
    }

    fn remove_descendants(&mut self, node: NodeId, out: &mut Vec<RemovedNode>) {
        if let Some(children) = self.data_nodes.get(&node).map(|n| n.children.clone()) {
            for conn in children {
                self.remove_descendants(conn, out);
                self.remove_single(conn, out);
            }
        } else if let Some(child) = self.connectors.get(&node).map(|c| c.child) {
            self.remove_descendants(child, out);
            self.remove_single(child, out);
        }
    }

    fn remove_single(&mut self, node: NodeId, out: &mut Vec<RemovedNode>) {
        if let Some(conn) = self.connectors.remove(&node) {
            if let Some(h) = &conn.current_exec {
                h.token.cancel();
            }
            if let Some(p) = self.data_nodes.get_mut(&conn.parent) {
                p.children.retain(|c| *c != node);
            }
            if let Some(c) = self.data_nodes.get_mut(&conn.child) {
                if c.parent == Some(node) {
                    c.parent = None;
                }
            }
            self.unsettled.remove(&node);
            out.push(RemovedNode::Connector(conn));
        } else if let Some(data) = self.data_nodes.remove(&node) {
            self.unsettled.remove(&node);
            if self.top == Some(node) {
                self.top = None;
            }
            if self.working == Some(node) {
                self.working = None;
            }
            out.push(RemovedNode::Data(data));
        }
    }

    /// Re-insert a node removed by [`Workflow::delete`] and re-wire the
    /// given structural references, without re-running validation. Used by
    /// undo; the caller restores a consistent state afterwards.
    pub fn reconnect(
        &mut self,
        node: RemovedNode,
        parent: Option<NodeId>,
        children: &[NodeId],
    ) -> Result<NodeId> {
        let id = node.id();
        match node {
            RemovedNode::Data(mut data) => {
                data.parent = parent;
                data.children = children.to_vec();
                if let Some(p) = parent {
                    if let Some(conn) = self.connectors.get_mut(&p) {
                        conn.child = id;
                    }
                }
                for conn in children {
                    if let Some(c) = self.connectors.get_mut(conn) {
                        c.parent = id;
                    }
                }
                if !data.state().is_settled() {
                    self.unsettled.insert(id);
                }
                if self.top.is_none() {
                    self.top = Some(id);
                }
                self.data_nodes.insert(id, data);
            }
            RemovedNode::Connector(mut conn) => {
                let parent = parent.ok_or_else(|| {
                    WorkflowError::Other(anyhow!("reconnecting connector {id} requires a parent"))
                })?;
                conn.parent = parent;
                if let Some(child) = children.first() {
                    conn.child = *child;
                }
                if let Some(p) = self.data_nodes.get_mut(&parent) {
                    if !p.children.contains(&id) {
                        p.children.push(id);
                    }
                }
                if let Some(c) = self.data_nodes.get_mut(&conn.child) {
                    c.parent = Some(id);
                }
                if !conn.state().is_settled() {
                    self.unsettled.insert(id);
                }
                self.connectors.insert(id, conn);
            }
        }
        self.bump_topology();
        debug!(node = %id, "node reconnected");
        Ok(id)
    }

    // ---- duplication ---------------------------------------------------

    /// Duplicate the selected slice of the subtree under the top data node.
    ///
    /// Connectors in `selected` are cloned structurally: a new child data
    /// node with a fresh empty payload of the same type and a new connector
    /// with an independent copy of the transform; recursion continues inside
    /// the clone. Unselected connectors are traversed through the original
    /// child, sharing nothing mutable. The new connectors are
    /// force-recomputed so the clone populates. Returns exactly the newly
    /// created node ids.
    pub fn duplicate(&mut self, selected: &HashSet<NodeId>) -> Vec<NodeId> {
        let mut new_nodes = Vec::new();
        let Some(top) = self.top else {
            return new_nodes;
        };
        self.dup_visit(top, top, selected, &mut new_nodes);
        if new_nodes.is_empty() {
            return new_nodes;
        }
        self.bump_topology();
        info!(created = new_nodes.len(), "duplicated workflow slice");

        let new_connectors: Vec<NodeId> = new_nodes
            .iter()
            .copied()
            .filter(|id| self.connectors.contains_key(id))
            .collect();
        for conn in new_connectors {
            self.force_recompute(conn);
        }
        new_nodes
    }

    fn dup_visit(
        &mut self,
        orig_data: NodeId,
        attach_data: NodeId,
        selected: &HashSet<NodeId>,
        out: &mut Vec<NodeId>,
    ) {
        let child_conns = match self.data_nodes.get(&orig_data) {
            Some(n) => n.children.clone(),
            None => return,
        };

        for conn in child_conns {
            let Some((orig_child, transform, conn_title)) = self
                .connectors
                .get(&conn)
                .map(|c| (c.child, c.transform.clone(), c.title.clone()))
            else {
                continue;
            };

            if selected.contains(&conn) {
                let Some((child_title, fresh_payload)) = self
                    .data_nodes
                    .get(&orig_child)
                    .map(|n| (n.title.clone(), n.prototype.new_empty()))
                else {
                    continue;
                };

                let new_data = DataNode::new(child_title, fresh_payload);
                let new_data_id = new_data.id;
                self.data_nodes.insert(new_data_id, new_data);
                self.unsettled.insert(new_data_id);

                let mut new_conn = Connector::new(
                    attach_data,
                    new_data_id,
                    transform.as_ref().map(|t| t.duplicate()),
                );
                new_conn.title = conn_title;
                let new_conn_id = new_conn.id;
                self.connectors.insert(new_conn_id, new_conn);
                self.unsettled.insert(new_conn_id);

                if let Some(p) = self.data_nodes.get_mut(&attach_data) {
                    p.children.push(new_conn_id);
                }
                if let Some(c) = self.data_nodes.get_mut(&new_data_id) {
                    c.parent = Some(new_conn_id);
                }

                out.push(new_conn_id);
                out.push(new_data_id);

                self.dup_visit(orig_child, new_data_id, selected, out);
            } else {
                self.dup_visit(orig_child, orig_child, selected, out);
            }
        }
    }

    // ---- recompute subset ----------------------------------------------

    /// Depth-first from the top data node: the first connector found in
    /// `targets` is force-recomputed and its subtree is not descended into
    /// (its recompute cascades there anyway); traversal continues through
    /// non-target branches.
    pub fn recompute_subset(&mut self, targets: &HashSet<NodeId>) {
        let Some(top) = self.top else {
            return;
        };
        self.recompute_visit(top, targets);
    }

    fn recompute_visit(&mut self, data: NodeId, targets: &HashSet<NodeId>) {
        let child_conns = match self.data_nodes.get(&data) {
            Some(n) => n.children.clone(),
            None => return,
        };
        for conn in child_conns {
            if targets.contains(&conn) {
                self.force_recompute(conn);
            } else if let Some(child) = self.connectors.get(&conn).map(|c| c.child) {
                self.recompute_visit(child, targets);
            }
        }
    }

    // ---- path ids ------------------------------------------------------

    fn bump_topology(&mut self) {
        self.topology_version += 1;
        self.assign_path_ids();
    }

    /// Re-derive path ids top-down from the top data node: existing ids are
    /// kept, the first child of any node inherits its parent's id, every
    /// further sibling gets the lowest unreserved number.
    fn assign_path_ids(&mut self) {
        self.path_ids.clear();
        for n in self.data_nodes.values() {
            if n.path_id != 0 {
                self.path_ids.reserve(n.path_id);
            }
        }
        for c in self.connectors.values() {
            if c.path_id != 0 {
                self.path_ids.reserve(c.path_id);
            }
        }

        let Some(top) = self.top else {
            return;
        };
        self.assign_data_path_id(top, 0);
    }

    fn assign_data_path_id(&mut self, node: NodeId, inherited: u32) {
        let Some(current) = self.data_nodes.get(&node).map(|n| n.path_id) else {
            return;
        };
        let path_id = if current != 0 {
            current
        } else {
            let assigned = if inherited != 0 {
                inherited
            } else {
                self.path_ids.allocate_lowest()
            };
            if let Some(n) = self.data_nodes.get_mut(&node) {
                n.path_id = assigned;
            }
            assigned
        };
        let children = match self.data_nodes.get(&node) {
            Some(n) => n.children.clone(),
            None => return,
        };
        for (i, conn) in children.into_iter().enumerate() {
            let inherit = if i == 0 { path_id } else { 0 };
            self.assign_connector_path_id(conn, inherit);
        }
    }

    fn assign_connector_path_id(&mut self, conn: NodeId, inherited: u32) {
        let Some(current) = self.connectors.get(&conn).map(|c| c.path_id) else {
            return;
        };
        let path_id = if current != 0 {
            current
        } else {
            let assigned = if inherited != 0 {
                inherited
            } else {
                self.path_ids.allocate_lowest()
            };
            if let Some(c) = self.connectors.get_mut(&conn) {
                c.path_id = assigned;
            }
            assigned
        };
        // The child data node is the connector's first (and primary) child;
        // it continues the same lineage.
        if let Some(child) = self.connectors.get(&conn).map(|c| c.child) {
            self.assign_data_path_id(child, path_id);
        }
    }

    // ---- diagnostics ---------------------------------------------------

    /// Indented dump of the graph under the top node, in stable insertion
    /// order: `title [path] (state)`.
    pub fn format_tree(&self) -> String {
        let mut out = String::new();
        if let Some(top) = self.top {
            self.format_data(top, 0, &mut out);
        }
        out
    }

    fn format_data(&self, node: NodeId, depth: usize, out: &mut String) {
        let Some(n) = self.data_nodes.get(&node) else {
            return;
        };
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{} [{}] ({})\n", n.title, n.path_id, n.state()));
        for conn in &n.children {
            if let Some(c) = self.connectors.get(conn) {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(&format!("-> {} [{}] ({})\n", c.title, c.path_id, c.state()));
                self.format_data(c.child, depth + 2, out);
            }
        }
    }
}
