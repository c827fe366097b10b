// =============================================================================
//  Refiner - State Crate
//  File: lib.rs
//
//  Description: Predicate store and entity capability registry for the
//  planner's world state. Values are pure data; state mutation is always
//  copy-on-write so that parent nodes in the solution graph retain their
//  snapshots unaffected by later mutation.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A scalar state value. Closed sum type; no dynamic dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// An entity's type and capability bits, keyed by entity id in
/// `State::entity_capabilities`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: String,
    pub capabilities: HashSet<String>,
}

impl EntityRecord {
    pub fn new(entity_type: impl Into<String>, capabilities: impl IntoIterator<Item = String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// An entity satisfies a requirement if its type matches and its
    /// capability set is a superset of the requirement's capabilities.
    pub fn satisfies(&self, required_type: &str, required_caps: &[String]) -> bool {
        self.entity_type == required_type
            && required_caps.iter().all(|c| self.capabilities.contains(c))
    }
}

/// The planner's world state: a predicate store plus entity capabilities.
///
/// Mutation is always copy-on-write: `set` operates on `self` directly, but
/// every node in the solution graph holds its own owned `State` (via
/// `State::clone`, a deep clone through `HashMap`'s `Clone`), so mutating one
/// node's state can never be observed through another node's snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    variables: HashMap<String, HashMap<String, Value>>,
    entity_capabilities: HashMap<String, EntityRecord>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `variable[argument]`, or `None` if absent.
    /// Absence is distinguishable from any scalar value.
    pub fn get(&self, variable: &str, argument: &str) -> Option<&Value> {
        self.variables.get(variable)?.get(argument)
    }

    /// Sets `variable[argument] = value`, auto-creating the inner map.
    pub fn set(&mut self, variable: impl Into<String>, argument: impl Into<String>, value: impl Into<Value>) {
        self.variables
            .entry(variable.into())
            .or_default()
            .insert(argument.into(), value.into());
    }

    pub fn has(&self, variable: &str, argument: &str) -> bool {
        self.get(variable, argument).is_some()
    }

    /// Returns whether `state[variable][argument] == desired`.
    pub fn satisfies(&self, variable: &str, argument: &str, desired: &Value) -> bool {
        self.get(variable, argument) == Some(desired)
    }

    pub fn list_variables(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(|s| s.as_str())
    }

    pub fn variable(&self, variable: &str) -> Option<&HashMap<String, Value>> {
        self.variables.get(variable)
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityRecord> {
        self.entity_capabilities.get(entity_id)
    }

    pub fn set_entity(&mut self, entity_id: impl Into<String>, record: EntityRecord) {
        self.entity_capabilities.insert(entity_id.into(), record);
    }

    pub fn entities(&self) -> impl Iterator<Item = (&str, &EntityRecord)> {
        self.entity_capabilities.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns every entity id whose record satisfies `(type, capabilities)`.
    pub fn entities_matching(&self, required_type: &str, required_caps: &[String]) -> Vec<&str> {
        self.entity_capabilities
            .iter()
            .filter(|(_, rec)| rec.satisfies(required_type, required_caps))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_on_missing_returns_none() {
        let s = State::new();
        assert_eq!(s.get("pos", "a"), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut s = State::new();
        s.set("pos", "a", "b");
        assert_eq!(s.get("pos", "a"), Some(&Value::Str("b".into())));
    }

    #[test]
    fn clone_is_isolated_from_mutation() {
        let mut s = State::new();
        s.set("clear", "a", true);
        let snapshot = s.clone();
        s.set("clear", "a", false);
        assert_eq!(snapshot.get("clear", "a"), Some(&Value::Bool(true)));
        assert_eq!(s.get("clear", "a"), Some(&Value::Bool(false)));
    }

    #[test]
    fn satisfies_checks_exact_value() {
        let mut s = State::new();
        s.set("holding", "hand", false);
        assert!(s.satisfies("holding", "hand", &Value::Bool(false)));
        assert!(!s.satisfies("holding", "hand", &Value::Bool(true)));
    }

    #[test]
    fn entity_capability_set_cover() {
        let mut s = State::new();
        s.set_entity(
            "r1",
            EntityRecord::new("robot", ["gripper".to_string()]),
        );
        assert_eq!(s.entities_matching("robot", &["gripper".to_string()]), vec!["r1"]);
        assert!(s.entities_matching("robot", &["precision".to_string()]).is_empty());
    }
}
