// =============================================================================
//  Refiner - Engine Crate
//  File: lib.rs
//
//  Description: The refinement engine's outer loop. Maintains a solution
//  graph and a temporal network alongside a cursor that walks the graph
//  depth-first, dispatching each node by kind and backtracking to the
//  nearest ancestor with an untried method on failure. Exposes the
//  `Planner` facade and the closed `PlanError` taxonomy.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

use htn_domain::{Constrained, Constraints, Domain, Multigoal, TodoItem};
use htn_graph::{
    add_nodes_and_edges, append_verify_goal, append_verify_multigoal, extract_plan, find_open, find_predecessor,
    remove_descendants, MethodRef, NodeId, NodeInfo, NodeKind, NodeStatus, Plan, SolutionGraph, ROOT,
};
use htn_state::State;
use htn_stn::{Snapshot as StnSnapshot, Stn};
use log::{debug, info, trace};
use std::collections::{HashMap, HashSet};

/// The four outcomes the refinement engine reports, matching the closed
/// taxonomy the original design calls for — callers are expected to match
/// on this, not just propagate it, so it is a `thiserror` enum rather than
/// `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("no plan exists for the given state and todo list")]
    Unresolvable,
    #[error("exhausted {tries} retries; last state returned")]
    BudgetExhausted { tries: u32 },
    #[error("temporal constraint network became inconsistent")]
    TemporalInconsistency,
    #[error("todo item at position {index} did not classify as a known kind")]
    MalformedItem { index: usize },
}

enum DispatchOutcome {
    /// The node closed without producing children (action applied, goal
    /// already satisfied, or verification passed).
    Resolved,
    /// The node was expanded; its children are now open successors.
    Descended,
    /// The node could not be resolved and needs to be backtracked past.
    Failed,
}

enum BacktrackOutcome {
    /// Backtracking rewound to this ancestor; retry dispatch from here.
    Resume(NodeId),
    /// No ancestor had an untried alternative left.
    Unresolvable,
}

type BlacklistKey = (NodeKind, String, usize);

/// Drives one solution graph to completion. Borrows an immutable `Domain`
/// for the lifetime of the planning call; owns the graph and temporal
/// network it builds.
pub struct Planner<'d> {
    domain: &'d Domain,
    graph: SolutionGraph,
    stn: Stn,
    stn_snapshots: HashMap<NodeId, StnSnapshot>,
    blacklist: HashSet<BlacklistKey>,
}

impl<'d> Planner<'d> {
    pub fn new(domain: &'d Domain) -> Self {
        Self {
            domain,
            graph: SolutionGraph::new(),
            stn: Stn::new(),
            stn_snapshots: HashMap::new(),
            blacklist: HashSet::new(),
        }
    }

    /// Refines `todo_list` against `state` to a complete plan, or reports
    /// why none exists.
    pub fn find_plan(&mut self, state: State, todo_list: Vec<Constrained<TodoItem>>) -> Result<Plan, PlanError> {
        self.graph = SolutionGraph::new();
        self.stn = Stn::new();
        self.stn_snapshots.clear();
        self.blacklist.clear();
        self.graph.save_snapshot(ROOT, state);
        add_nodes_and_edges(&mut self.graph, self.domain, ROOT, todo_list);

        let mut current = ROOT;
        loop {
            match find_open(&self.graph, current) {
                Some(child) => {
                    trace!("engine: descending into node {child}");
                    match self.dispatch(child) {
                        DispatchOutcome::Descended => current = child,
                        DispatchOutcome::Resolved => current = child,
                        DispatchOutcome::Failed => match self.backtrack(child) {
                            BacktrackOutcome::Resume(ancestor) => {
                                // `ancestor` was just reopened with its subtree
                                // pruned; it must be re-dispatched as its own
                                // parent's open child, not scanned for open
                                // children of its own (it has none yet).
                                current = find_predecessor(&self.graph, ancestor).unwrap_or(ROOT);
                            }
                            BacktrackOutcome::Unresolvable => {
                                if !self.stn.is_consistent() {
                                    return Err(PlanError::TemporalInconsistency);
                                }
                                return Err(PlanError::Unresolvable);
                            }
                        },
                    }
                }
                None => {
                    if current == ROOT {
                        break;
                    }
                    // A leaf already closed by `dispatch` (an applied action,
                    // an already-satisfied goal, a passed verification) must
                    // keep the exit state `dispatch` gave it; only a
                    // still-Open container whose children just all finished
                    // needs its exit state computed here.
                    if self.graph.get(current).unwrap().status == NodeStatus::Open {
                        self.close_container(current);
                    }
                    current = find_predecessor(&self.graph, current).unwrap_or(ROOT);
                }
            }
        }

        info!("engine: plan complete");
        Ok(extract_plan(&self.graph))
    }

    /// Repeatedly plans and commits the first action of the plan, re-planning
    /// from the resulting state each cycle, up to `max_tries` cycles, until
    /// `todo_list` is fully satisfied with no further open work. This models
    /// lazy lookahead execution where downstream effects are only checked
    /// just before they are needed, rather than committing a long plan
    /// up-front.
    pub fn run_lazy_refineahead(
        &mut self,
        mut state: State,
        todo_list: Vec<Constrained<TodoItem>>,
        max_tries: u32,
    ) -> Result<State, PlanError> {
        for attempt in 0..max_tries {
            let plan = self.find_plan(state.clone(), todo_list.clone())?;
            if plan.is_empty() {
                info!("engine: run_lazy_refineahead converged after {attempt} cycles");
                return Ok(state);
            }
            let mut committed = true;
            for step in &plan.steps {
                let action = match self.domain.action(&step.name) {
                    Some(a) => a,
                    None => {
                        debug!("engine: run_lazy_refineahead found no registered action {}", step.name);
                        return Err(PlanError::Unresolvable);
                    }
                };
                match action(&state, &step.args) {
                    Some(next) => state = next,
                    None => {
                        // The world moved beneath us: re-enter planning from
                        // the state as committed so far, with the same todo
                        // list, rather than surfacing this cycle's failure.
                        debug!("engine: run_lazy_refineahead commit of {} failed; re-planning", step.name);
                        committed = false;
                        break;
                    }
                }
            }
            if !committed {
                continue;
            }
            debug!("engine: run_lazy_refineahead committed cycle {attempt}");
        }
        Err(PlanError::BudgetExhausted { tries: max_tries })
    }

    fn fingerprint(&self, id: NodeId) -> String {
        match &self.graph.get(id).unwrap().info {
            NodeInfo::Item(c) => c.item.to_string(),
            NodeInfo::Root => "root".to_string(),
            NodeInfo::VerifyGoal => "verify-goal".to_string(),
            NodeInfo::VerifyMultigoal => "verify-multigoal".to_string(),
        }
    }

    /// The state a node sees on entry: the previous sibling's exit state, or
    /// (for a first child) the entering state of its own parent, recursing
    /// to the root's seeded initial state.
    fn entering_state(&self, id: NodeId) -> State {
        if id == ROOT {
            return self.graph.get_snapshot(ROOT).cloned().expect("root must be seeded");
        }
        let parent = find_predecessor(&self.graph, id).expect("non-root node must have a predecessor");
        let siblings = &self.graph.get(parent).unwrap().successors;
        let idx = siblings.iter().position(|&s| s == id).expect("node must be linked under its predecessor");
        if idx == 0 {
            self.entering_state(parent)
        } else {
            let prev = siblings[idx - 1];
            match self.graph.get_snapshot(prev) {
                Some(s) => s.clone(),
                None => self.entering_state(parent),
            }
        }
    }

    /// The `Constraints` a node's `Constrained<TodoItem>` carries, if any.
    /// `Root`/`VerifyGoal`/`VerifyMultigoal` nodes carry no item and so
    /// never carry constraints either.
    fn constraints_of(&self, id: NodeId) -> Option<Constraints> {
        match &self.graph.get(id).unwrap().info {
            NodeInfo::Item(Constrained { constraints, .. }) => constraints.clone(),
            NodeInfo::Root | NodeInfo::VerifyGoal | NodeInfo::VerifyMultigoal => None,
        }
    }

    fn dispatch(&mut self, id: NodeId) -> DispatchOutcome {
        let state = self.entering_state(id);
        let kind = self.graph.get(id).unwrap().kind;
        trace!("engine: dispatching node {id} (kind={kind:?})");
        // Constraint checks apply before a node's state-changing work,
        // regardless of kind: any todo item may be boxed with constraints,
        // not just actions.
        if let Some(constraints) = self.constraints_of(id) {
            if !self.apply_constraints(id, &state, &constraints) {
                return self.fail(id);
            }
        }
        match kind {
            NodeKind::Action => self.dispatch_action(id, &state),
            NodeKind::Task => self.dispatch_task(id, &state),
            NodeKind::Goal => self.dispatch_goal(id, &state),
            NodeKind::Multigoal => self.dispatch_multigoal(id, &state),
            NodeKind::VerifyGoal => self.dispatch_verify_goal(id, &state),
            NodeKind::VerifyMultigoal => self.dispatch_verify_multigoal(id, &state),
            NodeKind::Root => unreachable!("root is never dispatched"),
        }
    }

    fn close(&mut self, id: NodeId, state: State) -> DispatchOutcome {
        self.graph.save_snapshot(id, state);
        self.graph.set_status(id, NodeStatus::Closed);
        DispatchOutcome::Resolved
    }

    fn fail(&mut self, id: NodeId) -> DispatchOutcome {
        self.graph.set_status(id, NodeStatus::Failed);
        DispatchOutcome::Failed
    }

    fn dispatch_action(&mut self, id: NodeId, state: &State) -> DispatchOutcome {
        let node = self.graph.get(id).unwrap();
        let (name, args) = match &node.info {
            NodeInfo::Item(Constrained { item: TodoItem::Action { name, args }, .. }) => (name.clone(), args.clone()),
            _ => unreachable!("action node must carry an Action item"),
        };
        let action_fn = match &node.action {
            Some(f) => f.clone(),
            None => {
                debug!("engine: node {id} names unregistered action {name}");
                return self.fail(id);
            }
        };
        let new_state = match action_fn(state, &args) {
            Some(s) => s,
            None => {
                debug!("engine: action {name} inapplicable at node {id}");
                return self.fail(id);
            }
        };
        debug!("engine: action {name} applied at node {id}");
        self.close(id, new_state)
    }

    fn apply_constraints(&mut self, id: NodeId, state: &State, constraints: &Constraints) -> bool {
        for req in &constraints.requires_entities {
            if state.entities_matching(&req.entity_type, &req.capabilities).is_empty() {
                debug!("engine: node {id} has no entity satisfying {:?}", req);
                return false;
            }
        }
        if constraints.duration.is_some() || constraints.start_time.is_some() || constraints.end_time.is_some() {
            let point = id.to_string();
            let result = self.stn.add_interval(
                &point,
                constraints.start_time.unwrap_or(0),
                constraints.end_time.unwrap_or(0),
                constraints.duration.unwrap_or(0),
            );
            if result.is_err() || !self.stn.is_consistent() {
                debug!("engine: node {id} temporal constraints made the network inconsistent");
                return false;
            }
        }
        true
    }

    fn try_methods<F>(&mut self, id: NodeId, kind: NodeKind, state: &State, mut call: F) -> DispatchOutcome
    where
        F: FnMut(&MethodRef, &State) -> Option<Vec<Constrained<TodoItem>>>,
    {
        let fingerprint = self.fingerprint(id);
        loop {
            let method = self.graph.get_mut(id).unwrap().available_methods.pop_front();
            let slot = self.graph.get(id).unwrap().available_methods.len();
            let method = match method {
                Some(m) => m,
                None => return self.fail(id),
            };
            if self.blacklist.contains(&(kind, fingerprint.clone(), slot)) {
                continue;
            }
            match call(&method, state) {
                None => {
                    self.blacklist.insert((kind, fingerprint.clone(), slot));
                    continue;
                }
                Some(children) => {
                    self.graph.get_mut(id).unwrap().selected_method = Some(method);
                    self.stn_snapshots.insert(id, self.stn.snapshot());
                    add_nodes_and_edges(&mut self.graph, self.domain, id, children);
                    return DispatchOutcome::Descended;
                }
            }
        }
    }

    fn dispatch_task(&mut self, id: NodeId, state: &State) -> DispatchOutcome {
        let args = match &self.graph.get(id).unwrap().info {
            NodeInfo::Item(Constrained { item: TodoItem::Task { args, .. }, .. }) => args.clone(),
            _ => unreachable!("task node must carry a Task item"),
        };
        self.try_methods(id, NodeKind::Task, state, move |method, state| match method {
            MethodRef::Task(f) => f(state, &args),
            _ => unreachable!("task node must only hold task methods"),
        })
    }

    fn dispatch_goal(&mut self, id: NodeId, state: &State) -> DispatchOutcome {
        let (variable, argument, value) = match &self.graph.get(id).unwrap().info {
            NodeInfo::Item(Constrained { item: TodoItem::Unigoal { variable, argument, value }, .. }) => {
                (variable.clone(), argument.clone(), value.clone())
            }
            _ => unreachable!("goal node must carry a Unigoal item"),
        };
        if state.satisfies(&variable, &argument, &value) {
            debug!("engine: goal {variable}[{argument}] already satisfied at node {id}");
            return self.close(id, state.clone());
        }
        let outcome = self.try_methods(id, NodeKind::Goal, state, move |method, state| match method {
            MethodRef::Unigoal(f) => f(state, &argument, &value),
            _ => unreachable!("goal node must only hold unigoal methods"),
        });
        if matches!(outcome, DispatchOutcome::Descended) {
            append_verify_goal(&mut self.graph, id);
        }
        outcome
    }

    fn dispatch_multigoal(&mut self, id: NodeId, state: &State) -> DispatchOutcome {
        let goal = match &self.graph.get(id).unwrap().info {
            NodeInfo::Item(Constrained { item: TodoItem::Multigoal(m), .. }) => m.clone(),
            _ => unreachable!("multigoal node must carry a Multigoal item"),
        };
        if goal.is_satisfied(state) {
            debug!("engine: multigoal {} already satisfied at node {id}", goal.name);
            return self.close(id, state.clone());
        }
        let outcome = self.try_methods(id, NodeKind::Multigoal, state, move |method, state| match method {
            MethodRef::Multigoal(f) => f(state, &goal),
            _ => unreachable!("multigoal node must only hold multigoal methods"),
        });
        if matches!(outcome, DispatchOutcome::Descended) {
            append_verify_multigoal(&mut self.graph, id);
        }
        outcome
    }

    fn preceding_goal_sibling(&self, verify_id: NodeId) -> NodeId {
        let parent = find_predecessor(&self.graph, verify_id).expect("verify node must have a predecessor");
        // The verify node is itself the goal's own trailing child, so the
        // goal whose truth it re-checks is its predecessor.
        parent
    }

    fn dispatch_verify_goal(&mut self, id: NodeId, state: &State) -> DispatchOutcome {
        let goal_id = self.preceding_goal_sibling(id);
        let (variable, argument, value) = match &self.graph.get(goal_id).unwrap().info {
            NodeInfo::Item(Constrained { item: TodoItem::Unigoal { variable, argument, value }, .. }) => {
                (variable.clone(), argument.clone(), value.clone())
            }
            _ => unreachable!("verify goal's predecessor must be a goal node"),
        };
        if state.satisfies(&variable, &argument, &value) {
            self.close(id, state.clone())
        } else {
            debug!("engine: re-verification of goal {variable}[{argument}] failed at node {id}");
            self.fail(id)
        }
    }

    fn dispatch_verify_multigoal(&mut self, id: NodeId, state: &State) -> DispatchOutcome {
        let goal_id = self.preceding_goal_sibling(id);
        let goal = match &self.graph.get(goal_id).unwrap().info {
            NodeInfo::Item(Constrained { item: TodoItem::Multigoal(m), .. }) => m.clone(),
            _ => unreachable!("verify multigoal's predecessor must be a multigoal node"),
        };
        if goal.is_satisfied(state) {
            self.close(id, state.clone())
        } else {
            debug!("engine: re-verification of multigoal {} failed at node {id}", goal.name);
            self.fail(id)
        }
    }

    /// Marks a container node Closed once it has no more open children,
    /// caching its exit state as its last child's exit state (or its own
    /// entering state, if it ended up with no children at all).
    fn close_container(&mut self, id: NodeId) {
        let exit_state = match self.graph.get(id).unwrap().successors.last().copied() {
            Some(last) => self.graph.get_snapshot(last).cloned().unwrap_or_else(|| self.entering_state(id)),
            None => self.entering_state(id),
        };
        self.graph.save_snapshot(id, exit_state);
        self.graph.set_status(id, NodeStatus::Closed);
    }

    /// Rewinds from `failed_id` to the nearest ancestor with an untried
    /// method, pruning the subtree that ancestor most recently produced and
    /// restoring the temporal network to how it looked before that attempt.
    fn backtrack(&mut self, mut failed_id: NodeId) -> BacktrackOutcome {
        loop {
            if failed_id == ROOT {
                return BacktrackOutcome::Unresolvable;
            }
            let parent = match find_predecessor(&self.graph, failed_id) {
                Some(p) => p,
                None => return BacktrackOutcome::Unresolvable,
            };
            let parent_kind = self.graph.get(parent).unwrap().kind;
            let has_alternative = matches!(parent_kind, NodeKind::Task | NodeKind::Goal | NodeKind::Multigoal)
                && !self.graph.get(parent).unwrap().available_methods.is_empty();

            if has_alternative {
                let slot = self.graph.get(parent).unwrap().available_methods.len();
                let fingerprint = self.fingerprint(parent);
                self.blacklist.insert((parent_kind, fingerprint, slot));
                remove_descendants(&mut self.graph, parent);
                self.graph.set_status(parent, NodeStatus::Open);
                if let Some(snapshot) = self.stn_snapshots.get(&parent) {
                    self.stn.restore(snapshot);
                }
                debug!("engine: backtracking from node {failed_id} to ancestor {parent}");
                return BacktrackOutcome::Resume(parent);
            }

            if parent == ROOT {
                return BacktrackOutcome::Unresolvable;
            }
            self.graph.set_status(parent, NodeStatus::Failed);
            failed_id = parent;
        }
    }
}
