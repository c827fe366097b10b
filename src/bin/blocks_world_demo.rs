// =============================================================================
//  Refiner - Demo CLI
//  File: blocks_world_demo.rs
//
//  Description: Runs one of a few small built-in domains through the
//  planner and prints the resulting action plan. Owns process-wide
//  concerns (logging init, argument parsing) the library itself never
//  touches.
//
//  This file is dual licensed under the MIT and Apache 2.0 licenses.
// =============================================================================

use anyhow::Result;
use clap::{Parser, ValueEnum};
use refiner::{Constrained, Domain, DomainBuilder, Multigoal, Planner, State, TodoItem, Value};

#[derive(Copy, Clone, ValueEnum)]
enum Example {
    /// Move a single block that starts clear.
    Blocks,
    /// Two simultaneous position goals, combined in a multigoal.
    Stack,
}

#[derive(Parser)]
#[command(name = "blocks-world-demo")]
#[command(about = "Runs a built-in example domain through the refiner planner")]
#[command(version)]
struct Cli {
    /// Which built-in domain to run
    #[arg(value_enum, default_value_t = Example::Blocks)]
    example: Example,

    /// Retry budget passed to run_lazy_refineahead
    #[arg(long, default_value_t = 10)]
    max_tries: u32,
}

fn blocks_world_domain() -> Domain {
    DomainBuilder::new()
        .add_action("move", |state, args| {
            let block = args.first()?.as_str()?.to_string();
            let dest = args.get(1)?.as_str()?.to_string();
            if !state.satisfies("clear", &block, &Value::Bool(true)) {
                return None;
            }
            let mut next = state.clone();
            next.set("pos", block, dest);
            Some(next)
        })
        .add_unigoal_method("pos", |state, block, value| {
            let dest = value.as_str()?.to_string();
            if state.satisfies("pos", block, &Value::Str(dest.clone())) {
                return Some(vec![]);
            }
            Some(vec![Constrained::plain(TodoItem::action(
                "move",
                vec![Value::Str(block.to_string()), Value::Str(dest)],
            ))])
        })
        .add_multigoal_method(|state, goal| {
            let unsatisfied = goal.unsatisfied(state);
            if unsatisfied.is_empty() {
                return None;
            }
            Some(
                unsatisfied
                    .into_iter()
                    .map(|(variable, argument, value)| Constrained::plain(TodoItem::unigoal(variable, argument, value)))
                    .collect(),
            )
        })
        .build()
}

fn run_blocks(domain: &Domain, max_tries: u32) -> Result<()> {
    let mut state = State::new();
    state.set("clear", "a", true);
    state.set("pos", "a", "table");

    let mut planner = Planner::new(domain);
    let todo = vec![Constrained::plain(TodoItem::unigoal("pos", "a", "shelf"))];
    let plan = planner.find_plan(state.clone(), todo.clone())?;
    println!("plan: {:?}", plan.steps.iter().map(|s| &s.name).collect::<Vec<_>>());

    let result = planner.run_lazy_refineahead(state, todo, max_tries)?;
    println!("final pos[a] = {:?}", result.get("pos", "a"));
    Ok(())
}

fn run_stack(domain: &Domain, max_tries: u32) -> Result<()> {
    let mut state = State::new();
    state.set("clear", "a", true);
    state.set("clear", "b", true);
    state.set("pos", "a", "table");
    state.set("pos", "b", "table");

    let goal = Multigoal::new("tidy").want("pos", "a", "shelf").want("pos", "b", "floor");
    let mut planner = Planner::new(domain);
    let todo = vec![Constrained::plain(TodoItem::multigoal(goal))];
    let plan = planner.find_plan(state.clone(), todo.clone())?;
    println!("plan: {:?}", plan.steps.iter().map(|s| &s.name).collect::<Vec<_>>());

    let result = planner.run_lazy_refineahead(state, todo, max_tries)?;
    println!("final pos[a]={:?} pos[b]={:?}", result.get("pos", "a"), result.get("pos", "b"));
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let domain = blocks_world_domain();

    match cli.example {
        Example::Blocks => run_blocks(&domain, cli.max_tries),
        Example::Stack => run_stack(&domain, cli.max_tries),
    }
    .map_err(|e| {
        eprintln!("planning failed: {e}");
        e
    })?;
    Ok(())
}
