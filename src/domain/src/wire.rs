// =============================================================================
//  Refiner - Domain Crate
//  File: wire.rs
//
//  Description: The canonical on-the-wire shape for a constrained todo
//  item (spec section 6), used only at serialization boundaries when an
//  embedding caller hands the planner JSON instead of already-typed
//  `TodoItem`s. Internal refinement logic never touches these types.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

use crate::{Constrained, Constraints, Domain, EntityRequirement, Multigoal, TodoItem};
use htn_state::Value;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct WireEntityRequirement {
    #[serde(rename = "type")]
    entity_type: String,
    capabilities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireConstraints {
    duration: Option<i64>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    requires_entities: Option<Vec<WireEntityRequirement>>,
}

#[derive(Debug, Deserialize)]
struct WireWrappedItem {
    item: serde_json::Value,
    constraints: Option<WireConstraints>,
}

#[derive(Debug, Deserialize)]
struct WireMultigoal {
    name: String,
    state: HashMap<String, HashMap<String, WireValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<WireValue> for Value {
    fn from(v: WireValue) -> Self {
        match v {
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Int(i),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Str(s) => Value::Str(s),
        }
    }
}

/// Error parsing a wire-format todo item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    NotConstructible,
    InvalidJson(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::NotConstructible => {
                write!(f, "item did not classify as an action, task, unigoal, or multigoal")
            }
            WireError::InvalidJson(msg) => write!(f, "invalid wire payload: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}

/// Parses the canonical wrapped-item wire shape into a `Constrained<TodoItem>`,
/// consulting `domain` to classify an `[name, arg1, ...]` array as an action,
/// task, or unigoal in that order, matching spec section 4.3's classification
/// order. Multigoals are recognized by their `{name, state}` object shape.
pub fn parse_constrained(raw: &serde_json::Value, domain: &Domain) -> Result<Constrained<TodoItem>, WireError> {
    if let Ok(wrapped) = serde_json::from_value::<WireWrappedItem>(raw.clone()) {
        let item = parse_item(&wrapped.item, domain)?;
        let constraints = wrapped.constraints.map(|c| Constraints {
            duration: c.duration,
            start_time: c.start_time,
            end_time: c.end_time,
            requires_entities: c
                .requires_entities
                .unwrap_or_default()
                .into_iter()
                .map(|r| EntityRequirement {
                    entity_type: r.entity_type,
                    capabilities: r.capabilities,
                })
                .collect(),
        });
        return Ok(Constrained { item, constraints });
    }
    Ok(Constrained::plain(parse_item(raw, domain)?))
}

fn parse_item(raw: &serde_json::Value, domain: &Domain) -> Result<TodoItem, WireError> {
    if let Ok(goal) = serde_json::from_value::<WireMultigoal>(raw.clone()) {
        let mut multigoal = Multigoal::new(goal.name);
        for (variable, args) in goal.state {
            for (argument, value) in args {
                multigoal = multigoal.want(variable.clone(), argument, Value::from(value));
            }
        }
        return Ok(TodoItem::multigoal(multigoal));
    }

    let array = raw.as_array().ok_or(WireError::NotConstructible)?;
    let head = array.first().and_then(|v| v.as_str()).ok_or(WireError::NotConstructible)?;
    let rest: Vec<Value> = array[1..].iter().map(json_to_value).collect::<Option<_>>().ok_or_else(|| {
        WireError::InvalidJson("todo item arguments must be scalar".to_string())
    })?;

    if domain.has_action(head) {
        return Ok(TodoItem::action(head, rest));
    }
    if !domain.task_methods(head).is_empty() {
        return Ok(TodoItem::task(head, rest));
    }
    if array.len() == 3 && !domain.unigoal_methods(head).is_empty() {
        return Ok(TodoItem::unigoal(head, array[1].as_str().unwrap_or_default(), rest.into_iter().nth(1).unwrap_or(Value::Bool(false))));
    }
    Err(WireError::NotConstructible)
}

fn json_to_value(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainBuilder;

    fn sample_domain() -> Domain {
        DomainBuilder::new()
            .add_action("pickup", |s, _| Some(s.clone()))
            .add_unigoal_method("pos", |s, _a, _v| {
                let _ = s;
                Some(vec![])
            })
            .build()
    }

    #[test]
    fn classifies_action_before_unigoal() {
        let domain = sample_domain();
        let raw = serde_json::json!(["pickup", "a"]);
        let parsed = parse_constrained(&raw, &domain).unwrap();
        assert!(matches!(parsed.item, TodoItem::Action { .. }));
    }

    #[test]
    fn classifies_unigoal_by_arity_and_registration() {
        let domain = sample_domain();
        let raw = serde_json::json!(["pos", "a", "table"]);
        let parsed = parse_constrained(&raw, &domain).unwrap();
        assert!(matches!(parsed.item, TodoItem::Unigoal { .. }));
    }

    #[test]
    fn unwraps_constraints_envelope() {
        let domain = sample_domain();
        let raw = serde_json::json!({
            "item": ["pickup", "a"],
            "constraints": { "duration": 500 }
        });
        let parsed = parse_constrained(&raw, &domain).unwrap();
        assert_eq!(parsed.constraints.unwrap().duration, Some(500));
    }

    #[test]
    fn unrecognized_head_is_not_constructible() {
        let domain = sample_domain();
        let raw = serde_json::json!(["nonexistent", "a", "b", "c"]);
        assert_eq!(parse_constrained(&raw, &domain), Err(WireError::NotConstructible));
    }

    #[test]
    fn multigoal_shape_recognized() {
        let domain = sample_domain();
        let raw = serde_json::json!({
            "name": "g1",
            "state": { "pos": { "a": "table" } }
        });
        let parsed = parse_constrained(&raw, &domain).unwrap();
        assert!(matches!(parsed.item, TodoItem::Multigoal(_)));
    }
}
