// =============================================================================
//  Refiner - Graph Crate
//  File: lib.rs
//
//  Description: The solution graph arena (node storage, successor lists,
//  per-node state snapshots and method lists) plus the graph operations
//  that classify todo items into node kinds, expand them into successor
//  nodes, prune a failed subtree's descendants, and extract the final
//  plan by preorder traversal. The graph is stored map-keyed by integer id
//  precisely to avoid pointer cycles: parents reference children by id,
//  children discover parents by linear search, and pruning a subtree is
//  just removing a set of ids from the map.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

use htn_domain::{Constrained, Domain, MultigoalMethodFn, TaskMethodFn, TodoItem, UnigoalMethodFn};
use htn_state::State;
use log::trace;
use std::collections::{HashMap, VecDeque};

pub type NodeId = usize;
pub const ROOT: NodeId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Action,
    Task,
    Goal,
    Multigoal,
    VerifyGoal,
    VerifyMultigoal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Open,
    Closed,
    Failed,
    NotApplicable,
}

/// A single registered method, tagged by which dispatch signature it uses.
/// `available_methods` on a node only ever holds the variant matching that
/// node's kind.
#[derive(Clone)]
pub enum MethodRef {
    Task(TaskMethodFn),
    Unigoal(UnigoalMethodFn),
    Multigoal(MultigoalMethodFn),
}

/// What a node refines, or the absence of a todo item for the root and
/// verification nodes. VerifyGoal/VerifyMultigoal intentionally carry no
/// payload of their own: per spec section 4.4 they re-read the goal they
/// verify from their nearest enclosing Goal/Multigoal ancestor, found via
/// [`find_predecessor`].
#[derive(Clone)]
pub enum NodeInfo {
    Root,
    Item(Constrained<TodoItem>),
    VerifyGoal,
    VerifyMultigoal,
}

pub struct Node {
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub info: NodeInfo,
    pub successors: Vec<NodeId>,
    pub state_snapshot: Option<State>,
    pub selected_method: Option<MethodRef>,
    pub available_methods: VecDeque<MethodRef>,
    pub action: Option<htn_domain::ActionFn>,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    /// Creation-order stamp, purely for diagnostics; refinement logic never
    /// reads it. Mirrors the original source's high-level-clock metadata
    /// without depending on wall-clock time.
    pub sequence: u64,
}

impl Node {
    fn new(kind: NodeKind, info: NodeInfo, sequence: u64) -> Self {
        Self {
            kind,
            status: NodeStatus::Open,
            info,
            successors: Vec::new(),
            state_snapshot: None,
            selected_method: None,
            available_methods: VecDeque::new(),
            action: None,
            start_time: 0,
            end_time: 0,
            duration: 0,
            sequence,
        }
    }
}

/// The arena of refinement nodes. Node 0 is the pre-created root.
pub struct SolutionGraph {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
}

impl Default for SolutionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SolutionGraph {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        let mut root = Node::new(NodeKind::Root, NodeInfo::Root, 0);
        root.status = NodeStatus::NotApplicable;
        nodes.insert(ROOT, root);
        Self { nodes, next_id: ROOT + 1 }
    }

    pub fn create_node(
        &mut self,
        kind: NodeKind,
        info: NodeInfo,
        available_methods: VecDeque<MethodRef>,
        action: Option<htn_domain::ActionFn>,
    ) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        let mut node = Node::new(kind, info, id as u64);
        node.available_methods = available_methods;
        node.action = action;
        self.nodes.insert(id, node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn update(&mut self, id: NodeId, node: Node) {
        self.nodes.insert(id, node);
    }

    pub fn add_successor(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.successors.push(child);
        }
    }

    pub fn set_status(&mut self, id: NodeId, status: NodeStatus) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.status = status;
        }
    }

    pub fn save_snapshot(&mut self, id: NodeId, state: State) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.state_snapshot = Some(state);
        }
    }

    pub fn get_snapshot(&self, id: NodeId) -> Option<&State> {
        self.nodes.get(&id).and_then(|n| n.state_snapshot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Classifies a todo item into its node kind. Because `TodoItem` is already
/// a closed sum type, this is an exhaustive match rather than the dynamic
/// shape-sniffing the original engine performs on untyped data (see
/// DESIGN NOTES); the `Root` kind is reserved for node 0 and never produced
/// here.
pub fn classify(item: &TodoItem) -> NodeKind {
    match item {
        TodoItem::Action { .. } => NodeKind::Action,
        TodoItem::Task { .. } => NodeKind::Task,
        TodoItem::Unigoal { .. } => NodeKind::Goal,
        TodoItem::Multigoal(_) => NodeKind::Multigoal,
    }
}

fn method_count(domain: &Domain, item: &TodoItem) -> usize {
    match item {
        TodoItem::Task { name, .. } => domain.task_methods(name).len(),
        TodoItem::Unigoal { variable, .. } => domain.unigoal_methods(variable).len(),
        TodoItem::Multigoal(_) => domain.multigoal_methods().len(),
        TodoItem::Action { .. } => 0,
    }
}

/// Reorders a batch of sibling goals so goals with fewer registered methods
/// are tried first (spec section 4.4, "Goal ordering optimization"). Applies
/// only when every item in the batch is a unigoal — the shape produced by a
/// multigoal's decomposition into several simultaneous sibling goals — since
/// that is the case the optimization is specified for; a mixed batch (e.g. a
/// task expanding into an action followed by a goal) is left in its original
/// order. The sort is stable, so ties keep their original relative order.
fn reorder_goals(domain: &Domain, children: &mut [Constrained<TodoItem>]) {
    let all_unigoals = children
        .iter()
        .all(|c| matches!(c.item, TodoItem::Unigoal { .. }));
    if !all_unigoals || children.len() < 2 {
        return;
    }
    children.sort_by_key(|c| method_count(domain, &c.item));
}

fn gather_methods(domain: &Domain, item: &TodoItem) -> VecDeque<MethodRef> {
    match item {
        TodoItem::Task { name, .. } => domain
            .task_methods(name)
            .iter()
            .cloned()
            .map(MethodRef::Task)
            .collect(),
        TodoItem::Unigoal { variable, .. } => domain
            .unigoal_methods(variable)
            .iter()
            .cloned()
            .map(MethodRef::Unigoal)
            .collect(),
        TodoItem::Multigoal(_) => domain
            .multigoal_methods()
            .iter()
            .cloned()
            .map(MethodRef::Multigoal)
            .collect(),
        TodoItem::Action { .. } => VecDeque::new(),
    }
}

/// Classifies, registers methods for, and links a batch of children under
/// `parent`. VerifyGoal/VerifyMultigoal nodes are not created here: the
/// engine appends one as a goal node's own trailing child once that goal's
/// chosen method's subtasks have themselves been linked in a later call, so
/// that re-verification happens after — and inside — the subtree that might
/// have clobbered the goal, not as a sibling of it.
pub fn add_nodes_and_edges(
    graph: &mut SolutionGraph,
    domain: &Domain,
    parent: NodeId,
    mut children: Vec<Constrained<TodoItem>>,
) -> Vec<NodeId> {
    reorder_goals(domain, &mut children);
    let mut created = Vec::with_capacity(children.len());
    for child in children {
        let kind = classify(&child.item);
        let methods = gather_methods(domain, &child.item);
        let action = match &child.item {
            TodoItem::Action { name, .. } => domain.action(name),
            _ => None,
        };
        let id = graph.create_node(kind, NodeInfo::Item(child), methods, action);
        graph.add_successor(parent, id);
        created.push(id);
    }
    trace!("graph: expanded node {parent} into {} successors", created.len());
    created
}

/// Appends a VerifyGoal node as `goal`'s own trailing child, used by the
/// engine once a goal's chosen method's subtasks have been linked under it.
pub fn append_verify_goal(graph: &mut SolutionGraph, goal: NodeId) -> NodeId {
    let verify_id = graph.create_node(NodeKind::VerifyGoal, NodeInfo::VerifyGoal, VecDeque::new(), None);
    graph.add_successor(goal, verify_id);
    verify_id
}

/// Appends a VerifyMultigoal node as `multigoal`'s own trailing child.
pub fn append_verify_multigoal(graph: &mut SolutionGraph, multigoal: NodeId) -> NodeId {
    let verify_id = graph.create_node(NodeKind::VerifyMultigoal, NodeInfo::VerifyMultigoal, VecDeque::new(), None);
    graph.add_successor(multigoal, verify_id);
    verify_id
}

/// The first successor of `parent` whose status is `Open`, scanning
/// left-to-right.
pub fn find_open(graph: &SolutionGraph, parent: NodeId) -> Option<NodeId> {
    let node = graph.get(parent)?;
    node.successors
        .iter()
        .copied()
        .find(|&id| matches!(graph.get(id), Some(n) if n.status == NodeStatus::Open))
}

/// The unique node whose successor list contains `id`, or `None` if `id` is
/// the root or unlinked.
pub fn find_predecessor(graph: &SolutionGraph, id: NodeId) -> Option<NodeId> {
    graph
        .nodes
        .iter()
        .find(|(_, node)| node.successors.contains(&id))
        .map(|(&pid, _)| pid)
}

/// Removes every node reachable from `id`'s successors (but not `id`
/// itself) and clears `id`'s successor list, so a re-attempted refinement
/// starts from a clean subtree.
pub fn remove_descendants(graph: &mut SolutionGraph, id: NodeId) {
    let mut stack: Vec<NodeId> = graph.get(id).map(|n| n.successors.clone()).unwrap_or_default();
    let mut visited = Vec::new();
    while let Some(current) = stack.pop() {
        if visited.contains(&current) {
            continue;
        }
        visited.push(current);
        if let Some(node) = graph.get(current) {
            stack.extend(node.successors.iter().copied());
        }
    }
    for descendant in &visited {
        graph.nodes.remove(descendant);
    }
    if let Some(node) = graph.get_mut(id) {
        node.successors.clear();
    }
    trace!("graph: pruned {} descendants of node {id}", visited.len());
}

/// A single action call in an extracted plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub name: String,
    pub args: Vec<htn_state::Value>,
}

/// An ordered sequence of action calls, the planner's final output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Iterative preorder DFS from the root, pushing successors in reverse so
/// left-to-right order is preserved. Emits every Closed Action node's
/// unwrapped item; does not descend into Failed branches.
pub fn extract_plan(graph: &SolutionGraph) -> Plan {
    let mut stack = vec![ROOT];
    let mut steps = Vec::new();
    while let Some(id) = stack.pop() {
        let node = match graph.get(id) {
            Some(n) => n,
            None => continue,
        };
        if node.status == NodeStatus::Failed {
            continue;
        }
        if node.kind == NodeKind::Action && node.status == NodeStatus::Closed {
            if let NodeInfo::Item(Constrained { item: TodoItem::Action { name, args }, .. }) = &node.info {
                steps.push(PlanStep { name: name.clone(), args: args.clone() });
            }
        }
        for &child in node.successors.iter().rev() {
            stack.push(child);
        }
    }
    Plan { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htn_domain::{DomainBuilder, Multigoal};
    use htn_state::Value;

    fn domain_with_two_unigoal_methods() -> Domain {
        DomainBuilder::new()
            .add_unigoal_method("pos", |_s, _a, _v| Some(vec![]))
            .add_unigoal_method("pos", |_s, _a, _v| Some(vec![]))
            .add_unigoal_method("clear", |_s, _a, _v| Some(vec![]))
            .build()
    }

    #[test]
    fn root_is_not_applicable_initially() {
        let graph = SolutionGraph::new();
        assert_eq!(graph.get(ROOT).unwrap().status, NodeStatus::NotApplicable);
    }

    #[test]
    fn classify_matches_enum_variant() {
        assert_eq!(classify(&TodoItem::action("a", vec![])), NodeKind::Action);
        assert_eq!(classify(&TodoItem::task("t", vec![])), NodeKind::Task);
        assert_eq!(classify(&TodoItem::unigoal("v", "a", true)), NodeKind::Goal);
        assert_eq!(classify(&TodoItem::multigoal(Multigoal::new("g"))), NodeKind::Multigoal);
    }

    #[test]
    fn goal_expansion_does_not_eagerly_create_verify_node() {
        let domain = DomainBuilder::new().add_unigoal_method("pos", |_s, _a, _v| Some(vec![])).build();
        let mut graph = SolutionGraph::new();
        let children = vec![Constrained::plain(TodoItem::unigoal("pos", "a", "table"))];
        add_nodes_and_edges(&mut graph, &domain, ROOT, children);
        let successors = &graph.get(ROOT).unwrap().successors;
        assert_eq!(successors.len(), 1);
        assert_eq!(graph.get(successors[0]).unwrap().kind, NodeKind::Goal);
    }

    #[test]
    fn append_verify_goal_links_as_trailing_child_not_sibling() {
        let domain = DomainBuilder::new().add_unigoal_method("pos", |_s, _a, _v| Some(vec![])).build();
        let mut graph = SolutionGraph::new();
        let ids = add_nodes_and_edges(
            &mut graph,
            &domain,
            ROOT,
            vec![Constrained::plain(TodoItem::unigoal("pos", "a", "table"))],
        );
        let goal_id = ids[0];
        let verify_id = append_verify_goal(&mut graph, goal_id);
        assert_eq!(graph.get(ROOT).unwrap().successors, vec![goal_id]);
        assert_eq!(graph.get(goal_id).unwrap().successors, vec![verify_id]);
        assert_eq!(find_predecessor(&graph, verify_id), Some(goal_id));
    }

    #[test]
    fn goal_ordering_prefers_fewer_methods_first() {
        let domain = domain_with_two_unigoal_methods();
        let mut graph = SolutionGraph::new();
        let children = vec![
            Constrained::plain(TodoItem::unigoal("pos", "a", "table")),
            Constrained::plain(TodoItem::unigoal("clear", "b", true)),
        ];
        add_nodes_and_edges(&mut graph, &domain, ROOT, children);
        let successors = &graph.get(ROOT).unwrap().successors;
        // "clear" has 1 registered method, "pos" has 2: clear goes first.
        let first_goal = graph.get(successors[0]).unwrap();
        match &first_goal.info {
            NodeInfo::Item(Constrained { item: TodoItem::Unigoal { variable, .. }, .. }) => {
                assert_eq!(variable, "clear");
            }
            _ => panic!("expected a goal node"),
        }
    }

    #[test]
    fn find_open_scans_left_to_right() {
        let domain = Domain::default();
        let mut graph = SolutionGraph::new();
        let children = vec![
            Constrained::plain(TodoItem::action("a1", vec![Value::Int(1)])),
            Constrained::plain(TodoItem::action("a2", vec![])),
        ];
        let ids = add_nodes_and_edges(&mut graph, &domain, ROOT, children);
        graph.set_status(ids[0], NodeStatus::Closed);
        assert_eq!(find_open(&graph, ROOT), Some(ids[1]));
        graph.set_status(ids[1], NodeStatus::Closed);
        assert_eq!(find_open(&graph, ROOT), None);
    }

    #[test]
    fn find_predecessor_is_unique() {
        let domain = Domain::default();
        let mut graph = SolutionGraph::new();
        let ids = add_nodes_and_edges(
            &mut graph,
            &domain,
            ROOT,
            vec![Constrained::plain(TodoItem::action("a1", vec![]))],
        );
        assert_eq!(find_predecessor(&graph, ids[0]), Some(ROOT));
        assert_eq!(find_predecessor(&graph, ROOT), None);
    }

    #[test]
    fn remove_descendants_clears_subtree_but_not_node_itself() {
        let domain = DomainBuilder::new().add_unigoal_method("pos", |_s, _a, _v| Some(vec![])).build();
        let mut graph = SolutionGraph::new();
        let ids = add_nodes_and_edges(
            &mut graph,
            &domain,
            ROOT,
            vec![Constrained::plain(TodoItem::unigoal("pos", "a", "table"))],
        );
        let before = graph.len();
        remove_descendants(&mut graph, ROOT);
        assert!(graph.len() < before);
        assert!(graph.get(ROOT).unwrap().successors.is_empty());
        for id in ids {
            assert!(graph.get(id).is_none());
        }
    }

    #[test]
    fn extract_plan_skips_failed_branches() {
        let domain = Domain::default();
        let mut graph = SolutionGraph::new();
        let ids = add_nodes_and_edges(
            &mut graph,
            &domain,
            ROOT,
            vec![
                Constrained::plain(TodoItem::action("ok", vec![])),
                Constrained::plain(TodoItem::action("bad", vec![])),
            ],
        );
        graph.set_status(ids[0], NodeStatus::Closed);
        graph.set_status(ids[1], NodeStatus::Failed);
        let plan = extract_plan(&graph);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].name, "ok");
    }
}
