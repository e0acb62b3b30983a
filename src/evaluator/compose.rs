use std::rc::Rc;

use super::join::{empty_preferring_factory, join_completions, join_effects};
use super::types::*;
use super::Realm;

/// Glues a pending completion onto a newly observed one. An absent or
/// normal left yields the right; an abrupt left propagates and the right
/// is discarded; a possibly-normal left distributes the right over its
/// normal paths. Nodes already published elsewhere are never mutated:
/// the splice case rebuilds the right-hand join node with the pending
/// completion attached.
pub fn compose_completions(
    realm: &mut Realm,
    left: Option<Completion>,
    right: Completion,
) -> Completion {
    let Some(left) = left else {
        return right;
    };
    match left {
        Completion::Normal(_) => right,
        Completion::JoinedNormalAndAbrupt(pending) => {
            let right = match right {
                Completion::JoinedNormalAndAbrupt(r) => {
                    // the new completion continues the pending one
                    return Completion::JoinedNormalAndAbrupt(Rc::new(JoinedNormalAndAbrupt {
                        condition: r.condition.clone(),
                        consequent: r.consequent.clone(),
                        alternate: r.alternate.clone(),
                        composed_with: Some(pending.clone()),
                        path_conditions_at_creation: pending.path_conditions_at_creation.clone(),
                        saved_effects: r.saved_effects.clone(),
                    }));
                }
                other => other,
            };
            let consequent =
                compose_completions(realm, Some(pending.consequent.clone()), right.clone());
            let alternate = compose_completions(realm, Some(pending.alternate.clone()), right);
            let joined = join_completions(realm, &pending.condition, consequent, alternate);
            match joined {
                Completion::JoinedNormalAndAbrupt(j) => {
                    Completion::JoinedNormalAndAbrupt(Rc::new(JoinedNormalAndAbrupt {
                        condition: j.condition.clone(),
                        consequent: j.consequent.clone(),
                        alternate: j.alternate.clone(),
                        composed_with: pending.composed_with.clone(),
                        path_conditions_at_creation: pending.path_conditions_at_creation.clone(),
                        saved_effects: pending.saved_effects.clone(),
                    }))
                }
                other => other,
            }
        }
        abrupt => abrupt,
    }
}

/// Distributes a completion tree over freshly observed effects: abrupt
/// leaves carry empty effects, a normal leaf keeps the observed effects
/// with its value as the result, and a possibly-normal join recombines
/// the per-branch distributions.
pub fn compose_with_effects(realm: &mut Realm, completion: Completion, effects: Effects) -> Effects {
    match completion {
        Completion::Normal(v) => effects.shallow_clone_with_result(Completion::Normal(v)),
        Completion::JoinedNormalAndAbrupt(j) => {
            let e1 = compose_with_effects(realm, j.consequent.clone(), effects.clone());
            let e2 = compose_with_effects(realm, j.alternate.clone(), effects);
            join_effects(realm, &j.condition, e1, e2)
        }
        abrupt => Effects::with_result(abrupt),
    }
}

/// Folds a completion tree into one value: leaves selected by `selector`
/// contribute their value, every other leaf contributes the empty
/// sentinel, and joined nodes combine their sides under the join
/// condition. A pending completion reachable through `composed_with` is
/// folded in under a freshly derived reachability condition.
pub fn join_values_of_selected_completions(
    realm: &mut Realm,
    selector: &CompletionSelector,
    completion: &Completion,
) -> Value {
    match completion {
        Completion::JoinedAbrupt(j) => {
            join_selected_sides(realm, selector, &j.condition, &j.consequent, &j.alternate, None)
        }
        Completion::JoinedNormalAndAbrupt(j) => join_selected_sides(
            realm,
            selector,
            &j.condition,
            &j.consequent,
            &j.alternate,
            j.composed_with.as_ref(),
        ),
        leaf if selector(leaf) => leaf.value().clone(),
        _ => realm.intrinsics.empty.clone(),
    }
}

fn join_selected_sides(
    realm: &mut Realm,
    selector: &CompletionSelector,
    condition: &Value,
    consequent: &Completion,
    alternate: &Completion,
    composed_with: Option<&Rc<JoinedNormalAndAbrupt>>,
) -> Value {
    let v1 = join_values_of_selected_completions(realm, selector, consequent);
    let v2 = join_values_of_selected_completions(realm, selector, alternate);
    let factory = empty_preferring_factory(condition.clone());
    let mut result = factory(realm, Some(v1), Some(v2));
    if let Some(pending) = composed_with {
        let earlier = Completion::JoinedNormalAndAbrupt(pending.clone());
        let reached =
            AbstractValue::join_condition_for_selected_completions(realm, selector, &earlier);
        let earlier_value = join_values_of_selected_completions(realm, selector, &earlier);
        let factory = empty_preferring_factory(reached);
        result = factory(realm, Some(earlier_value), Some(result));
    }
    result
}
