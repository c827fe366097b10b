// =============================================================================
//  Refiner - Domain Crate
//  File: lib.rs
//
//  Description: The todo-item vocabulary (actions, tasks, unigoals,
//  multigoals), the constraint wrapper any of them may carry, and the
//  read-only Domain the engine consults for methods and actions. Domain
//  construction is a separate builder phase; methods and actions are pure
//  functions of their inputs and must not mutate the state passed in.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

pub mod wire;

use htn_state::{State, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A conjunction of unigoals treated as one refinement unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Multigoal {
    pub name: String,
    pub state: HashMap<String, HashMap<String, Value>>,
}

impl Multigoal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HashMap::new(),
        }
    }

    pub fn want(mut self, variable: impl Into<String>, argument: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state
            .entry(variable.into())
            .or_default()
            .insert(argument.into(), value.into());
        self
    }

    /// Every `(variable, argument, value)` triple this multigoal names.
    pub fn triples(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.state.iter().flat_map(|(var, args)| {
            args.iter().map(move |(arg, val)| (var.as_str(), arg.as_str(), val))
        })
    }

    pub fn is_satisfied(&self, state: &State) -> bool {
        self.triples().all(|(var, arg, val)| state.satisfies(var, arg, val))
    }

    /// The `(variable, argument, value)` triples not yet achieved in `state`.
    pub fn unsatisfied(&self, state: &State) -> Vec<(String, String, Value)> {
        self.triples()
            .filter(|(var, arg, val)| !state.satisfies(var, arg, val))
            .map(|(var, arg, val)| (var.to_string(), arg.to_string(), val.clone()))
            .collect()
    }
}

/// A requirement an entity must satisfy: matching type plus a superset of
/// the requested capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRequirement {
    pub entity_type: String,
    pub capabilities: Vec<String>,
}

/// Temporal and resource constraints a todo item may carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub duration: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub requires_entities: Vec<EntityRequirement>,
}

/// A todo item, optionally boxed with constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Constrained<T> {
    pub item: T,
    pub constraints: Option<Constraints>,
}

impl<T> Constrained<T> {
    pub fn plain(item: T) -> Self {
        Self { item, constraints: None }
    }

    pub fn with(item: T, constraints: Constraints) -> Self {
        Self { item, constraints: Some(constraints) }
    }
}

/// The four shapes a todo item may take. Closed sum type; no dynamic
/// variant dispatch (see DESIGN NOTES in the specification).
#[derive(Debug, Clone, PartialEq)]
pub enum TodoItem {
    Action { name: String, args: Vec<Value> },
    Task { name: String, args: Vec<Value> },
    Unigoal { variable: String, argument: String, value: Value },
    Multigoal(Multigoal),
}

impl TodoItem {
    pub fn action(name: impl Into<String>, args: Vec<Value>) -> Self {
        TodoItem::Action { name: name.into(), args }
    }

    pub fn task(name: impl Into<String>, args: Vec<Value>) -> Self {
        TodoItem::Task { name: name.into(), args }
    }

    pub fn unigoal(variable: impl Into<String>, argument: impl Into<String>, value: impl Into<Value>) -> Self {
        TodoItem::Unigoal {
            variable: variable.into(),
            argument: argument.into(),
            value: value.into(),
        }
    }

    pub fn multigoal(goal: Multigoal) -> Self {
        TodoItem::Multigoal(goal)
    }
}

impl fmt::Display for TodoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TodoItem::Action { name, args } => write!(f, "{name}({args:?})"),
            TodoItem::Task { name, args } => write!(f, "task:{name}({args:?})"),
            TodoItem::Unigoal { variable, argument, value } => {
                write!(f, "goal:{variable}[{argument}]={value:?}")
            }
            TodoItem::Multigoal(m) => write!(f, "multigoal:{}", m.name),
        }
    }
}

/// `(state, args) -> new_state`, or `None` if the action is inapplicable.
pub type ActionFn = Rc<dyn Fn(&State, &[Value]) -> Option<State>>;
/// `(state, args) -> subitems`, or `None` if the method does not apply.
pub type TaskMethodFn = Rc<dyn Fn(&State, &[Value]) -> Option<Vec<Constrained<TodoItem>>>>;
/// `(state, argument, value) -> subitems`, or `None` if inapplicable.
pub type UnigoalMethodFn = Rc<dyn Fn(&State, &str, &Value) -> Option<Vec<Constrained<TodoItem>>>>;
/// `(state, multigoal) -> subitems`, or `None` if inapplicable.
pub type MultigoalMethodFn = Rc<dyn Fn(&State, &Multigoal) -> Option<Vec<Constrained<TodoItem>>>>;

/// The planner's read-only collaborator: a library of actions and methods.
/// Built once via [`DomainBuilder`]; the engine never mutates it.
#[derive(Default, Clone)]
pub struct Domain {
    actions: HashMap<String, ActionFn>,
    task_methods: HashMap<String, Vec<TaskMethodFn>>,
    unigoal_methods: HashMap<String, Vec<UnigoalMethodFn>>,
    multigoal_methods: Vec<MultigoalMethodFn>,
}

impl Domain {
    pub fn action(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn task_methods(&self, name: &str) -> &[TaskMethodFn] {
        self.task_methods.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn unigoal_methods(&self, variable: &str) -> &[UnigoalMethodFn] {
        self.unigoal_methods.get(variable).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn multigoal_methods(&self) -> &[MultigoalMethodFn] {
        &self.multigoal_methods
    }
}

/// Builder for a [`Domain`]. Registration is a separate phase from
/// planning: once `build()` is called the engine only ever sees an
/// immutable collaborator.
#[derive(Default)]
pub struct DomainBuilder {
    domain: Domain,
}

impl DomainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(
        mut self,
        name: impl Into<String>,
        action: impl Fn(&State, &[Value]) -> Option<State> + 'static,
    ) -> Self {
        self.domain.actions.insert(name.into(), Rc::new(action));
        self
    }

    pub fn add_task_method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&State, &[Value]) -> Option<Vec<Constrained<TodoItem>>> + 'static,
    ) -> Self {
        self.domain
            .task_methods
            .entry(name.into())
            .or_default()
            .push(Rc::new(method));
        self
    }

    pub fn add_unigoal_method(
        mut self,
        variable: impl Into<String>,
        method: impl Fn(&State, &str, &Value) -> Option<Vec<Constrained<TodoItem>>> + 'static,
    ) -> Self {
        self.domain
            .unigoal_methods
            .entry(variable.into())
            .or_default()
            .push(Rc::new(method));
        self
    }

    pub fn add_multigoal_method(
        mut self,
        method: impl Fn(&State, &Multigoal) -> Option<Vec<Constrained<TodoItem>>> + 'static,
    ) -> Self {
        self.domain.multigoal_methods.push(Rc::new(method));
        self
    }

    pub fn build(self) -> Domain {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multigoal_satisfaction() {
        let mut state = State::new();
        state.set("pos", "a", "table");
        let goal = Multigoal::new("g1").want("pos", "a", "table");
        assert!(goal.is_satisfied(&state));
        assert!(goal.unsatisfied(&state).is_empty());
    }

    #[test]
    fn multigoal_reports_unsatisfied_triples() {
        let state = State::new();
        let goal = Multigoal::new("g1").want("pos", "a", "table");
        assert_eq!(goal.unsatisfied(&state).len(), 1);
    }

    #[test]
    fn builder_round_trips_action() {
        let domain = DomainBuilder::new()
            .add_action("noop", |state, _args| Some(state.clone()))
            .build();
        assert!(domain.has_action("noop"));
        assert!(domain.action("missing").is_none());
    }
}
