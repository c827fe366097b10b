// =============================================================================
//  Refiner
//  File: lib.rs
//
//  Description: Public facade. Re-exports the planner and its data model
//  from the subsystem crates; hosts no planning logic of its own.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

pub use htn_domain::{
    wire, ActionFn, Constrained, Constraints, Domain, DomainBuilder, EntityRequirement, Multigoal, MultigoalMethodFn,
    TaskMethodFn, TodoItem, UnigoalMethodFn,
};
pub use htn_engine::{PlanError, Planner};
pub use htn_graph::{Plan, PlanStep};
pub use htn_state::{EntityRecord, State, Value};
pub use htn_stn::{Stn, StnError};
