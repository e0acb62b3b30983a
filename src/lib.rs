//! Branch-join core of a JavaScript partial evaluator.
//!
//! When the evaluator reaches a condition it cannot decide at analysis
//! time it forks, evaluates both branches for their effects, and must
//! reconcile the two resulting program states into one sound abstract
//! state guarded by the branch condition. This crate implements that
//! reconciliation: joins of completions, values, property descriptors,
//! variable bindings, and whole effects records, plus the composition of
//! pending completions with subsequently observed effects and an n-ary
//! driver that folds a family of branches into one.

pub mod types;

pub mod evaluator;

pub use evaluator::{
    Realm, compose_completions, compose_with_effects, join_completions, join_descriptors,
    join_effects, join_maps, join_property_bindings, join_values,
    join_values_of_selected_completions, map_and_join,
};
