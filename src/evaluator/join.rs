use crate::types::ConcreteValue;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use super::helpers::{equal_descriptors, strict_equals};
use super::types::*;
use super::{Realm, path};

/// Builds one abstract value from the two per-branch values of a join;
/// `None` marks a side on which no value was observed.
pub type ValueFactory<'a> = dyn Fn(&mut Realm, Option<Value>, Option<Value>) -> Value + 'a;

/// Default factory for completion and state joins: when one side is the
/// empty sentinel the other side wins outright, so conditionally absent
/// values do not accumulate conditional wrappers. A missing side becomes
/// the realm's undefined.
pub fn empty_preferring_factory(
    condition: Value,
) -> impl Fn(&mut Realm, Option<Value>, Option<Value>) -> Value {
    move |realm, v1, v2| {
        if v1.as_ref().is_some_and(Value::is_empty) {
            return v2.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        }
        if v2.as_ref().is_some_and(Value::is_empty) {
            return v1.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        }
        let consequent = v1.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        let alternate = v2.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        AbstractValue::conditional_of(realm, condition.clone(), consequent, alternate)
    }
}

/// Factory that never prefers a side: used where both branch values are
/// genuinely present even when one is the empty sentinel, e.g. two thrown
/// values or a property materialized against an absent slot.
pub fn plain_factory(
    condition: Value,
) -> impl Fn(&mut Realm, Option<Value>, Option<Value>) -> Value {
    move |realm, v1, v2| {
        let consequent = v1.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        let alternate = v2.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        AbstractValue::conditional_of(realm, condition.clone(), consequent, alternate)
    }
}

/// Factory for joined binding values. The two boolean flags belong to the
/// abstract-value collaborator and are forwarded verbatim: the joined
/// value is not a condition, and it must not be simplified away because
/// both branch values have to survive verbatim for the leak rewrite's
/// binding-assignment materialization.
fn binding_value_factory(
    condition: Value,
) -> impl Fn(&mut Realm, Option<Value>, Option<Value>) -> Value {
    move |realm, v1, v2| {
        let consequent = v1.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        let alternate = v2.unwrap_or_else(|| realm.intrinsics.undefined.clone());
        AbstractValue::conditional_of_full(realm, condition.clone(), consequent, alternate, false, true)
    }
}

pub(crate) fn join_single(
    realm: &mut Realm,
    v1: Option<Value>,
    v2: Option<Value>,
    factory: &ValueFactory,
) -> Value {
    if v1.is_none() && v2.is_none() {
        return realm.intrinsics.undefined.clone();
    }
    if let (Some(Value::Concrete(a)), Some(Value::Concrete(b))) = (&v1, &v2)
        && strict_equals(a, b)
    {
        return v1.unwrap();
    }
    factory(realm, v1, v2)
}

/// Joins two optional values or two parallel arrays of values under a
/// condition. Equal concrete single values join to themselves; arrays are
/// joined element-wise, the shorter side padded with the empty sentinel.
/// Mixing a single value with an array is a programmer error.
pub fn join_values(
    realm: &mut Realm,
    v1: Option<&JoinedValue>,
    v2: Option<&JoinedValue>,
    factory: &ValueFactory,
) -> JoinedValue {
    use JoinedValue::*;
    match (v1, v2) {
        (Some(Values(a1)), Some(Values(a2))) => Values(join_value_arrays(
            realm,
            Some(a1.as_slice()),
            Some(a2.as_slice()),
            factory,
        )),
        (Some(Values(a1)), None) => {
            Values(join_value_arrays(realm, Some(a1.as_slice()), None, factory))
        }
        (None, Some(Values(a2))) => {
            Values(join_value_arrays(realm, None, Some(a2.as_slice()), factory))
        }
        (Some(Entries(a1)), Some(Entries(a2))) => Entries(join_entry_arrays(
            realm,
            Some(a1.as_slice()),
            Some(a2.as_slice()),
            factory,
        )),
        (Some(Entries(a1)), None) => {
            Entries(join_entry_arrays(realm, Some(a1.as_slice()), None, factory))
        }
        (None, Some(Entries(a2))) => {
            Entries(join_entry_arrays(realm, None, Some(a2.as_slice()), factory))
        }
        (Some(Single(x)), Some(Single(y))) => Single(join_single(
            realm,
            Some(x.clone()),
            Some(y.clone()),
            factory,
        )),
        (Some(Single(x)), None) => Single(join_single(realm, Some(x.clone()), None, factory)),
        (None, Some(Single(y))) => Single(join_single(realm, None, Some(y.clone()), factory)),
        (None, None) => Single(join_single(realm, None, None, factory)),
        _ => panic!("cannot join a single value with an array of values"),
    }
}

fn join_value_arrays(
    realm: &mut Realm,
    a1: Option<&[Value]>,
    a2: Option<&[Value]>,
    factory: &ValueFactory,
) -> Vec<Value> {
    let n = a1.map_or(0, <[Value]>::len).max(a2.map_or(0, <[Value]>::len));
    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let e1 = a1
            .and_then(|a| a.get(i))
            .cloned()
            .unwrap_or_else(|| realm.intrinsics.empty.clone());
        let e2 = a2
            .and_then(|a| a.get(i))
            .cloned()
            .unwrap_or_else(|| realm.intrinsics.empty.clone());
        result.push(factory(realm, Some(e1), Some(e2)));
    }
    result
}

fn join_entry_arrays(
    realm: &mut Realm,
    a1: Option<&[MapEntry]>,
    a2: Option<&[MapEntry]>,
    factory: &ValueFactory,
) -> Vec<MapEntry> {
    let n = a1
        .map_or(0, <[MapEntry]>::len)
        .max(a2.map_or(0, <[MapEntry]>::len));
    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let side = |realm: &Realm, a: Option<&[MapEntry]>| match a.and_then(|a| a.get(i)) {
            Some(e) => (e.key.clone(), e.value.clone()),
            None => (
                Some(realm.intrinsics.empty.clone()),
                Some(realm.intrinsics.empty.clone()),
            ),
        };
        let (k1, v1) = side(realm, a1);
        let (k2, v2) = side(realm, a2);
        if k1.is_none() && k2.is_none() {
            // a slot deleted on both sides stays a hole
            result.push(MapEntry {
                key: None,
                value: None,
            });
            continue;
        }
        let key = factory(realm, k1, k2);
        let value = factory(realm, v1, v2);
        result.push(MapEntry {
            key: Some(key),
            value: Some(value),
        });
    }
    result
}

/// Union-join of two keyed maps: `f` sees every key of either map with
/// the per-side values, `None` marking an absent side.
pub fn join_maps<K, V, R>(
    m1: &HashMap<K, V>,
    m2: &HashMap<K, V>,
    mut f: impl FnMut(&K, Option<&V>, Option<&V>) -> R,
) -> HashMap<K, R>
where
    K: Eq + Hash + Clone,
{
    let mut result = HashMap::with_capacity(m1.len().max(m2.len()));
    for (k, v1) in m1 {
        result.insert(k.clone(), f(k, Some(v1), m2.get(k)));
    }
    for (k, v2) in m2 {
        if !m1.contains_key(k) {
            result.insert(k.clone(), f(k, None, Some(v2)));
        }
    }
    result
}

/// Joins two optional property descriptors. Equal-shape descriptors merge
/// into one (reconciling the value slot for data descriptors); a
/// descriptor present on only one side is materialized against an empty
/// slot; anything else stays opaque, retaining both originals.
pub fn join_descriptors(
    realm: &mut Realm,
    condition: &Value,
    d1: Option<Descriptor>,
    d2: Option<Descriptor>,
) -> Option<Descriptor> {
    let factory = plain_factory(condition.clone());
    match (d1, d2) {
        (None, None) => None,
        (Some(d), None) => Some(materialize_against_empty(realm, condition, d, true, &factory)),
        (None, Some(d)) => Some(materialize_against_empty(realm, condition, d, false, &factory)),
        (Some(Descriptor::Plain(p1)), Some(Descriptor::Plain(p2)))
            if equal_descriptors(&p1, &p2) =>
        {
            let mut joined = p1.clone();
            if joined.is_data_descriptor() {
                joined.value = Some(join_values(
                    realm,
                    p1.value.as_ref(),
                    p2.value.as_ref(),
                    &factory,
                ));
            }
            Some(Descriptor::Plain(joined))
        }
        (Some(d1), Some(d2)) => Some(Descriptor::Joined(JoinedDescriptor {
            condition: condition.clone(),
            descriptor1: Some(Box::new(d1)),
            descriptor2: Some(Box::new(d2)),
        })),
    }
}

/// A property that exists in only one branch becomes conditionally
/// present: its value is the branch value when the condition selects that
/// branch and the empty sentinel otherwise, so later reads observe the
/// correct materialization. Accessor and already-joined descriptors have
/// no value slot to rewrite and stay opaque instead.
fn materialize_against_empty(
    realm: &mut Realm,
    condition: &Value,
    d: Descriptor,
    present_on_consequent: bool,
    factory: &ValueFactory,
) -> Descriptor {
    let Descriptor::Plain(pd) = &d else {
        return opaque_one_sided(condition, d, present_on_consequent);
    };
    if !pd.is_data_descriptor() {
        return opaque_one_sided(condition, d, present_on_consequent);
    }
    let mut joined = pd.clone();
    let payload = match &pd.value {
        Some(p) => p.clone(),
        None => JoinedValue::Single(realm.intrinsics.undefined.clone()),
    };
    joined.value = Some(join_payload_against_empty(
        realm,
        &payload,
        present_on_consequent,
        factory,
    ));
    Descriptor::Plain(joined)
}

fn join_payload_against_empty(
    realm: &mut Realm,
    payload: &JoinedValue,
    present_on_consequent: bool,
    factory: &ValueFactory,
) -> JoinedValue {
    let pair = |realm: &mut Realm, v: Option<Value>| -> Value {
        let empty = realm.intrinsics.empty.clone();
        if present_on_consequent {
            factory(realm, v, Some(empty))
        } else {
            factory(realm, Some(empty), v)
        }
    };
    match payload {
        JoinedValue::Single(v) => JoinedValue::Single(pair(realm, Some(v.clone()))),
        JoinedValue::Values(vs) => {
            let mut out = Vec::with_capacity(vs.len());
            for v in vs {
                out.push(pair(realm, Some(v.clone())));
            }
            JoinedValue::Values(out)
        }
        JoinedValue::Entries(es) => {
            let mut out = Vec::with_capacity(es.len());
            for e in es {
                if e.key.is_none() && e.value.is_none() {
                    out.push(MapEntry {
                        key: None,
                        value: None,
                    });
                    continue;
                }
                out.push(MapEntry {
                    key: Some(pair(realm, e.key.clone())),
                    value: Some(pair(realm, e.value.clone())),
                });
            }
            JoinedValue::Entries(out)
        }
    }
}

fn opaque_one_sided(condition: &Value, d: Descriptor, present_on_consequent: bool) -> Descriptor {
    let boxed = Some(Box::new(d));
    let (descriptor1, descriptor2) = if present_on_consequent {
        (boxed, None)
    } else {
        (None, boxed)
    };
    Descriptor::Joined(JoinedDescriptor {
        condition: condition.clone(),
        descriptor1,
        descriptor2,
    })
}

/// Joins two binding deltas, returning the (possibly rewritten)
/// per-branch generators and the joined map. When exactly one branch
/// leaked a binding, the un-leaked branch's final value must be
/// materialized as an explicit write in the leaked branch's log before
/// the join point, so replaying that path still ends with the slot
/// holding the value the other branch computed. The first such rewrite
/// on a side wraps the original generator in a fresh outer one that
/// replays it and then appends, so generators owned by earlier effects
/// records are never mutated.
pub fn join_bindings(
    realm: &mut Realm,
    condition: &Value,
    g1: Generator,
    m1: &Bindings,
    g2: Generator,
    m2: &Bindings,
) -> (Generator, Generator, Bindings) {
    let factory = binding_value_factory(condition.clone());
    let mut g1 = g1;
    let mut g2 = g2;
    let mut g1_rewritten = false;
    let mut g2_rewritten = false;
    let joined = join_maps(m1, m2, |id, e1, e2| {
        let (v1, l1) = match e1 {
            Some(e) => (e.value.clone(), e.has_leaked),
            None => (Some(realm.binding_value(*id)), realm.binding_has_leaked(*id)),
        };
        let (v2, l2) = match e2 {
            Some(e) => (e.value.clone(), e.has_leaked),
            None => (Some(realm.binding_value(*id)), realm.binding_has_leaked(*id)),
        };
        let has_leaked = l1 || l2;
        if l1 != l2 {
            if l1 {
                // leaked on the left only: the right branch's value is
                // written into the slot on the left path
                if !g1_rewritten {
                    let mut outer = Generator::new("JoinBindings");
                    outer.append_generator(std::mem::take(&mut g1), "");
                    g1 = outer;
                    g1_rewritten = true;
                }
                if let Some(v) = &v2 {
                    g1.emit_binding_assignment(*id, v.clone());
                }
            } else {
                if !g2_rewritten {
                    let mut outer = Generator::new("JoinBindings");
                    outer.append_generator(std::mem::take(&mut g2), "");
                    g2 = outer;
                    g2_rewritten = true;
                }
                if let Some(v) = &v1 {
                    g2.emit_binding_assignment(*id, v.clone());
                }
            }
        }
        // a leaked slot's value cannot be trusted past the join
        let value = if has_leaked {
            None
        } else {
            Some(join_single(realm, v1, v2, &factory))
        };
        BindingEntry { value, has_leaked }
    });
    (g1, g2, joined)
}

/// Joins two property-binding deltas. Per-branch created-object sets
/// decide when a slot needs no reconciliation at all: a write to an
/// object that exists only in the other branch stands verbatim. An
/// absent side otherwise resolves to the pre-branch descriptor, or to a
/// deleted (empty-valued) clone of it when the branch recorded a
/// deletion.
pub fn join_property_bindings(
    realm: &mut Realm,
    condition: &Value,
    m1: &PropertyBindings,
    m2: &PropertyBindings,
    c1: &CreatedObjects,
    c2: &CreatedObjects,
) -> PropertyBindings {
    join_maps(m1, m2, |b, d1, d2| {
        let d1 = d1.cloned().flatten();
        let d2 = d2.cloned().flatten();
        let d1 = match d1 {
            Some(d) => Some(d),
            None => {
                if c2.contains(&b.object) {
                    // the slot did not exist before the branch
                    return d2;
                }
                resolve_unwritten_side(realm, b, m1.contains_key(b))
            }
        };
        let d2 = match d2 {
            Some(d) => Some(d),
            None => {
                if c1.contains(&b.object) {
                    return d1;
                }
                resolve_unwritten_side(realm, b, m2.contains_key(b))
            }
        };
        join_descriptors(realm, condition, d1, d2)
    })
}

fn resolve_unwritten_side(
    realm: &Realm,
    b: &PropertyBinding,
    branch_has_entry: bool,
) -> Option<Descriptor> {
    let current = realm.property_descriptor(b)?;
    if !branch_has_entry {
        // no write in this branch
        return Some(current);
    }
    // an entry with no descriptor records a deletion
    Some(match current {
        Descriptor::Plain(mut pd) => {
            pd.value = Some(JoinedValue::Single(realm.intrinsics.empty.clone()));
            Descriptor::Plain(pd)
        }
        joined @ Descriptor::Joined(_) => joined,
    })
}

/// Collapses two completions under a condition. Like-kinded leaves fuse
/// into one leaf with a joined value; anything else becomes a tagged join
/// node, abrupt when both sides are.
pub fn join_completions(
    realm: &mut Realm,
    condition: &Value,
    c1: Completion,
    c2: Completion,
) -> Completion {
    if !condition.might_not_be_true() {
        return c1;
    }
    if !condition.might_not_be_false() {
        return c2;
    }
    let factory = empty_preferring_factory(condition.clone());
    match (c1, c2) {
        (Completion::Break(b1), Completion::Break(b2)) if b1.target == b2.target => {
            let value = join_single(realm, Some(b1.value), Some(b2.value), &factory);
            Completion::Break(BreakCompletion {
                value,
                target: b1.target,
            })
        }
        (Completion::Continue(k1), Completion::Continue(k2)) if k1.target == k2.target => {
            // continue values never survive past the loop header
            Completion::Continue(ContinueCompletion {
                value: realm.intrinsics.empty.clone(),
                target: k1.target,
            })
        }
        (Completion::Return(v1), Completion::Return(v2)) => {
            Completion::Return(join_single(realm, Some(v1), Some(v2), &factory))
        }
        (Completion::Throw(t1), Completion::Throw(t2)) => {
            // both sides really threw; neither value may be preferred away
            let throw_factory = plain_factory(condition.clone());
            let value = join_single(realm, Some(t1.value), Some(t2.value), &throw_factory);
            Completion::Throw(ThrowCompletion {
                value,
                location: t1.location,
            })
        }
        (Completion::Normal(v1), Completion::Normal(v2)) => {
            Completion::Normal(factory(realm, Some(v1), Some(v2)))
        }
        (c1, c2) => {
            if c1.is_abrupt() && c2.is_abrupt() {
                Completion::JoinedAbrupt(Rc::new(JoinedCompletion {
                    condition: condition.clone(),
                    consequent: c1,
                    alternate: c2,
                }))
            } else {
                Completion::JoinedNormalAndAbrupt(Rc::new(JoinedNormalAndAbrupt {
                    condition: condition.clone(),
                    consequent: c1,
                    alternate: c2,
                    composed_with: None,
                    path_conditions_at_creation: realm.path_conditions.clone(),
                    saved_effects: None,
                }))
            }
        }
    }
}

/// Joins two effects records into one guarded by `condition`: completions
/// through the completion joiner, state deltas through the binding and
/// property joiners, residual logs into a single branching log, and the
/// created-object sets by union.
pub fn join_effects(realm: &mut Realm, condition: &Value, e1: Effects, e2: Effects) -> Effects {
    assert!(
        e1.can_be_applied && e2.can_be_applied,
        "cannot join effects that can no longer be applied"
    );
    if !condition.might_not_be_true() {
        return e1;
    }
    if !condition.might_not_be_false() {
        return e2;
    }
    let Effects {
        result: r1,
        generator: g1,
        bindings: b1,
        properties: p1,
        created_objects: c1,
        ..
    } = e1;
    let Effects {
        result: r2,
        generator: g2,
        bindings: b2,
        properties: p2,
        created_objects: c2,
        ..
    } = e2;
    let result = join_completions(realm, condition, r1, r2);
    let (g1, g2, bindings) = join_bindings(realm, condition, g1, &b1, g2, &b2);
    let generator = if g1.is_empty() && g2.is_empty() {
        Generator::new("Join")
    } else {
        Generator::join_generators(condition.clone(), g1, g2)
    };
    let properties = join_property_bindings(realm, condition, &p1, &p2, &c1, &c2);
    let mut created_objects = c1;
    created_objects.extend(c2);
    Effects::new(result, generator, bindings, properties, created_objects)
}

/// Evaluates `f` once per concrete value, each run captured under its own
/// branch condition, and right-folds the captured effects into a single
/// joined record that is applied to the realm. The fold follows the slice
/// order, so the last value's condition ends up outermost.
pub fn map_and_join(
    realm: &mut Realm,
    values: &[ConcreteValue],
    cond_factory: impl Fn(&mut Realm, &ConcreteValue) -> Value,
    mut f: impl FnMut(&mut Realm, &ConcreteValue) -> Completion,
) -> Result<Value, Value> {
    assert!(
        values.len() > 1,
        "map_and_join needs at least two values to branch over"
    );
    let mut joined: Option<Effects> = None;
    for value in values {
        let condition = cond_factory(realm, value);
        assert!(
            condition.is_abstract(),
            "branch condition must be abstract, got {condition:?}"
        );
        let effects = realm.evaluate_for_effects("MapAndJoin", |realm| {
            path::with_condition(realm, condition.clone(), |realm| f(realm, value))
        });
        joined = Some(match joined {
            None => effects,
            Some(acc) => join_effects(realm, &condition, effects, acc),
        });
    }
    let joined = joined.expect("at least two values were folded");
    let result = joined.result.clone();
    realm.apply_effects(joined);
    realm.return_or_throw_completion(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond() -> Value {
        AbstractValue::variable("c")
    }

    fn num(n: f64) -> Value {
        Value::number(n)
    }

    fn single(v: Value) -> JoinedValue {
        JoinedValue::Single(v)
    }

    fn throw(v: Value) -> Completion {
        Completion::Throw(ThrowCompletion {
            value: v,
            location: None,
        })
    }

    fn brk(v: Value, target: Option<&str>) -> Completion {
        Completion::Break(BreakCompletion {
            value: v,
            target: target.map(str::to_string),
        })
    }

    fn as_conditional(v: &Value) -> (&Value, &Value, &Value) {
        let Value::Abstract(t) = v else {
            panic!("expected an abstract value, got {v:?}");
        };
        let AbstractValueKind::Conditional {
            condition,
            consequent,
            alternate,
        } = &t.kind
        else {
            panic!("expected a conditional, got {:?}", t.kind);
        };
        (condition, consequent, alternate)
    }

    #[test]
    fn joining_equal_concrete_values_is_identity() {
        let mut realm = Realm::new();
        let factory = empty_preferring_factory(cond());
        let j = join_values(
            &mut realm,
            Some(&single(num(1.0))),
            Some(&single(num(1.0))),
            &factory,
        );
        assert_eq!(j, single(num(1.0)));
    }

    #[test]
    fn joining_unequal_values_builds_a_conditional() {
        let mut realm = Realm::new();
        let c = cond();
        let factory = empty_preferring_factory(c.clone());
        let j = join_values(
            &mut realm,
            Some(&single(num(1.0))),
            Some(&single(num(2.0))),
            &factory,
        );
        let JoinedValue::Single(v) = &j else {
            panic!("expected a single value");
        };
        let (jc, v1, v2) = as_conditional(v);
        assert_eq!(jc, &c);
        assert_eq!(v1, &num(1.0));
        assert_eq!(v2, &num(2.0));
    }

    #[test]
    fn joining_missing_sides_yields_undefined() {
        let mut realm = Realm::new();
        let factory = empty_preferring_factory(cond());
        let j = join_values(&mut realm, None, None, &factory);
        assert_eq!(j, single(Value::undefined()));
    }

    #[test]
    #[should_panic(expected = "single value with an array")]
    fn mixing_single_and_array_is_rejected() {
        let mut realm = Realm::new();
        let factory = empty_preferring_factory(cond());
        join_values(
            &mut realm,
            Some(&single(num(1.0))),
            Some(&JoinedValue::Values(vec![num(2.0)])),
            &factory,
        );
    }

    #[test]
    fn array_join_pads_the_short_side_with_empty() {
        let mut realm = Realm::new();
        let c = cond();
        let factory = plain_factory(c.clone());
        let j = join_values(
            &mut realm,
            Some(&JoinedValue::Values(vec![num(1.0), num(2.0)])),
            Some(&JoinedValue::Values(vec![num(1.0)])),
            &factory,
        );
        let JoinedValue::Values(vs) = &j else {
            panic!("expected a value array");
        };
        assert_eq!(vs.len(), 2);
        assert_eq!(vs[0], num(1.0));
        let (_, v1, v2) = as_conditional(&vs[1]);
        assert_eq!(v1, &num(2.0));
        assert!(v2.is_empty());
    }

    #[test]
    fn entry_array_join_preserves_holes() {
        let mut realm = Realm::new();
        let factory = plain_factory(cond());
        let hole = MapEntry {
            key: None,
            value: None,
        };
        let e1 = JoinedValue::Entries(vec![
            hole.clone(),
            MapEntry {
                key: Some(num(1.0)),
                value: Some(num(10.0)),
            },
        ]);
        let e2 = JoinedValue::Entries(vec![
            hole.clone(),
            MapEntry {
                key: Some(num(1.0)),
                value: Some(num(20.0)),
            },
        ]);
        let j = join_values(&mut realm, Some(&e1), Some(&e2), &factory);
        let JoinedValue::Entries(es) = &j else {
            panic!("expected an entry array");
        };
        assert_eq!(es[0], hole);
        assert_eq!(es[1].key, Some(num(1.0)));
        let (_, v1, v2) = as_conditional(es[1].value.as_ref().unwrap());
        assert_eq!(v1, &num(10.0));
        assert_eq!(v2, &num(20.0));
    }

    #[test]
    fn join_maps_is_a_keyed_union() {
        let mut m1 = HashMap::new();
        m1.insert("a", 1);
        m1.insert("b", 2);
        let mut m2 = HashMap::new();
        m2.insert("b", 20);
        m2.insert("c", 30);
        let joined = join_maps(&m1, &m2, |_k, v1, v2| (v1.copied(), v2.copied()));
        assert_eq!(joined["a"], (Some(1), None));
        assert_eq!(joined["b"], (Some(2), Some(20)));
        assert_eq!(joined["c"], (None, Some(30)));
    }

    #[test]
    fn equal_target_breaks_collapse() {
        let mut realm = Realm::new();
        let c = cond();
        let joined = join_completions(
            &mut realm,
            &c,
            brk(num(3.0), Some("L")),
            brk(num(4.0), Some("L")),
        );
        let Completion::Break(b) = &joined else {
            panic!("expected a single break, got {joined:?}");
        };
        assert_eq!(b.target.as_deref(), Some("L"));
        let (_, v1, v2) = as_conditional(&b.value);
        assert_eq!(v1, &num(3.0));
        assert_eq!(v2, &num(4.0));
    }

    #[test]
    fn different_target_breaks_stay_apart() {
        let mut realm = Realm::new();
        let joined = join_completions(
            &mut realm,
            &cond(),
            brk(num(3.0), Some("L")),
            brk(num(4.0), Some("M")),
        );
        let Completion::JoinedAbrupt(j) = &joined else {
            panic!("expected a joined abrupt completion, got {joined:?}");
        };
        assert!(matches!(&j.consequent, Completion::Break(b) if b.target.as_deref() == Some("L")));
        assert!(matches!(&j.alternate, Completion::Break(b) if b.target.as_deref() == Some("M")));
    }

    #[test]
    fn returns_collapse_to_one_return() {
        let mut realm = Realm::new();
        let joined = join_completions(
            &mut realm,
            &cond(),
            Completion::Return(num(1.0)),
            Completion::Return(num(2.0)),
        );
        assert!(matches!(joined, Completion::Return(_)));
        let joined = join_completions(
            &mut realm,
            &cond(),
            Completion::Return(num(5.0)),
            Completion::Return(num(5.0)),
        );
        // equal concrete returns need no conditional at all
        assert!(matches!(joined, Completion::Return(v) if v == num(5.0)));
    }

    #[test]
    fn continues_discard_their_values() {
        let mut realm = Realm::new();
        let joined = join_completions(
            &mut realm,
            &cond(),
            Completion::Continue(ContinueCompletion {
                value: num(1.0),
                target: None,
            }),
            Completion::Continue(ContinueCompletion {
                value: num(2.0),
                target: None,
            }),
        );
        assert!(matches!(joined, Completion::Continue(k) if k.value.is_empty()));
    }

    #[test]
    fn throws_join_without_preferring_a_side() {
        let mut realm = Realm::new();
        let loc = crate::types::SourceLocation { line: 3, column: 7 };
        let joined = join_completions(
            &mut realm,
            &cond(),
            Completion::Throw(ThrowCompletion {
                value: num(1.0),
                location: Some(loc),
            }),
            throw(Value::empty()),
        );
        let Completion::Throw(t) = &joined else {
            panic!("expected a throw");
        };
        assert_eq!(t.location, Some(loc));
        // the empty side is a real thrown value, kept in the conditional
        let (_, v1, v2) = as_conditional(&t.value);
        assert_eq!(v1, &num(1.0));
        assert!(v2.is_empty());
    }

    #[test]
    fn normal_and_abrupt_make_a_possibly_normal_join() {
        let mut realm = Realm::new();
        let c = cond();
        let joined = join_completions(
            &mut realm,
            &c,
            Completion::Normal(num(1.0)),
            throw(num(2.0)),
        );
        let Completion::JoinedNormalAndAbrupt(j) = &joined else {
            panic!("expected a possibly-normal join, got {joined:?}");
        };
        assert_eq!(j.condition, c);
        assert!(j.composed_with.is_none());
        assert!(matches!(&j.consequent, Completion::Normal(_)));
        assert!(matches!(&j.alternate, Completion::Throw(_)));
    }

    #[test]
    fn known_conditions_short_circuit_completion_joins() {
        let mut realm = Realm::new();
        let c1 = Completion::Return(num(1.0));
        let c2 = Completion::Return(num(2.0));
        let joined = join_completions(&mut realm, &Value::boolean(true), c1, c2);
        assert!(matches!(joined, Completion::Return(v) if v == num(1.0)));
        let c1 = Completion::Return(num(1.0));
        let c2 = Completion::Return(num(2.0));
        let joined = join_completions(&mut realm, &Value::boolean(false), c1, c2);
        assert!(matches!(joined, Completion::Return(v) if v == num(2.0)));
    }

    #[test]
    fn known_conditions_short_circuit_effects_joins() {
        let mut realm = Realm::new();
        let e1 = Effects::with_result(Completion::Normal(num(1.0)));
        let e2 = Effects::with_result(Completion::Normal(num(2.0)));
        let joined = join_effects(&mut realm, &Value::boolean(true), e1, e2);
        assert!(matches!(joined.result, Completion::Normal(v) if v == num(1.0)));
        let e1 = Effects::with_result(Completion::Normal(num(1.0)));
        let e2 = Effects::with_result(Completion::Normal(num(2.0)));
        let joined = join_effects(&mut realm, &Value::boolean(false), e1, e2);
        assert!(matches!(joined.result, Completion::Normal(v) if v == num(2.0)));
    }

    #[test]
    #[should_panic(expected = "can no longer be applied")]
    fn joining_consumed_effects_is_rejected() {
        let mut realm = Realm::new();
        let mut e1 = Effects::with_result(Completion::Normal(num(1.0)));
        e1.can_be_applied = false;
        let e2 = Effects::with_result(Completion::Normal(num(2.0)));
        join_effects(&mut realm, &cond(), e1, e2);
    }

    #[test]
    fn created_objects_union() {
        let mut realm = Realm::new();
        let e1 = realm.evaluate_for_effects("left", |realm| {
            realm.create_object();
            Completion::Normal(Value::undefined())
        });
        let e2 = realm.evaluate_for_effects("right", |realm| {
            realm.create_object();
            realm.create_object();
            Completion::Normal(Value::undefined())
        });
        let expected: CreatedObjects = e1
            .created_objects
            .union(&e2.created_objects)
            .copied()
            .collect();
        let joined = join_effects(&mut realm, &cond(), e1, e2);
        assert_eq!(joined.created_objects, expected);
        assert_eq!(joined.created_objects.len(), 3);
    }

    #[test]
    fn equal_shape_data_descriptors_merge() {
        let mut realm = Realm::new();
        let d = Descriptor::Plain(PropertyDescriptor::data(num(5.0), true, true, false));
        let joined = join_descriptors(&mut realm, &cond(), Some(d.clone()), Some(d)).unwrap();
        let Descriptor::Plain(pd) = &joined else {
            panic!("expected a plain descriptor");
        };
        assert_eq!(pd.value, Some(single(num(5.0))));
        assert_eq!(pd.writable, Some(true));
        assert_eq!(pd.configurable, Some(false));
    }

    #[test]
    fn equal_accessor_descriptors_merge_to_a_clone() {
        let mut realm = Realm::new();
        let getter = AbstractValue::variable("get_x");
        let d = Descriptor::Plain(PropertyDescriptor::accessor(Some(getter.clone()), None));
        let joined = join_descriptors(&mut realm, &cond(), Some(d.clone()), Some(d)).unwrap();
        let Descriptor::Plain(pd) = &joined else {
            panic!("expected a plain descriptor");
        };
        assert_eq!(pd.get, Some(getter));
        assert_eq!(pd.value, None);
    }

    #[test]
    fn mismatched_descriptors_stay_opaque() {
        let mut realm = Realm::new();
        let c = cond();
        let data = Descriptor::Plain(PropertyDescriptor::data_default(num(1.0)));
        let accessor = Descriptor::Plain(PropertyDescriptor::accessor(
            Some(AbstractValue::variable("g")),
            None,
        ));
        let joined = join_descriptors(&mut realm, &c, Some(data), Some(accessor)).unwrap();
        let Descriptor::Joined(j) = &joined else {
            panic!("expected an opaque joined descriptor");
        };
        assert_eq!(j.condition, c);
        assert!(j.descriptor1.is_some());
        assert!(j.descriptor2.is_some());
    }

    #[test]
    fn one_sided_data_descriptor_materializes_against_empty() {
        let mut realm = Realm::new();
        let d = Descriptor::Plain(PropertyDescriptor::data_default(num(7.0)));
        let joined = join_descriptors(&mut realm, &cond(), Some(d), None).unwrap();
        let Descriptor::Plain(pd) = &joined else {
            panic!("expected a plain descriptor");
        };
        let Some(JoinedValue::Single(v)) = &pd.value else {
            panic!("expected a single value");
        };
        let (_, v1, v2) = as_conditional(v);
        assert_eq!(v1, &num(7.0));
        assert!(v2.is_empty());
    }

    #[test]
    fn one_sided_accessor_descriptor_stays_opaque() {
        let mut realm = Realm::new();
        let d = Descriptor::Plain(PropertyDescriptor::accessor(
            Some(AbstractValue::variable("g")),
            None,
        ));
        let joined = join_descriptors(&mut realm, &cond(), None, Some(d)).unwrap();
        let Descriptor::Joined(j) = &joined else {
            panic!("expected an opaque joined descriptor");
        };
        assert!(j.descriptor1.is_none());
        assert!(j.descriptor2.is_some());
    }

    #[test]
    fn property_created_in_one_branch_needs_no_join() {
        let mut realm = Realm::new();
        let e2 = realm.evaluate_for_effects("right", |realm| {
            let obj = realm.create_object();
            realm.define_property(
                obj,
                "p",
                Some(Descriptor::Plain(PropertyDescriptor::data_default(num(
                    7.0,
                )))),
            );
            Completion::Normal(Value::undefined())
        });
        let m1 = PropertyBindings::new();
        let c1 = CreatedObjects::new();
        let joined = join_property_bindings(
            &mut realm,
            &cond(),
            &m1,
            &e2.properties,
            &c1,
            &e2.created_objects,
        );
        assert_eq!(joined.len(), 1);
        let desc = joined.values().next().unwrap().as_ref().unwrap();
        // the right branch's descriptor stands verbatim
        let pd = desc.as_plain().unwrap();
        assert_eq!(pd.value, Some(single(num(7.0))));
    }

    #[test]
    fn property_deleted_in_one_branch_becomes_conditionally_empty() {
        let mut realm = Realm::new();
        let c = cond();
        let obj = realm.create_object();
        realm.define_property(
            obj,
            "p",
            Some(Descriptor::Plain(PropertyDescriptor::data_default(num(
                10.0,
            )))),
        );
        let binding = PropertyBinding {
            object: obj,
            key: "p".to_string(),
        };
        let mut m1 = PropertyBindings::new();
        m1.insert(binding.clone(), None); // deletion on the left
        let m2 = PropertyBindings::new();
        let none = CreatedObjects::new();
        let joined = join_property_bindings(&mut realm, &c, &m1, &m2, &none, &none);
        let desc = joined[&binding].as_ref().unwrap();
        let pd = desc.as_plain().unwrap();
        let Some(JoinedValue::Single(v)) = &pd.value else {
            panic!("expected a single value");
        };
        let (jc, v1, v2) = as_conditional(v);
        assert_eq!(jc, &c);
        assert!(v1.is_empty());
        assert_eq!(v2, &num(10.0));
    }

    #[test]
    fn leak_asymmetry_rewrites_the_leaked_side() {
        let mut realm = Realm::new();
        let b = realm.create_binding("b", num(0.0));
        let mut m1 = Bindings::new();
        m1.insert(
            b,
            BindingEntry {
                value: Some(num(5.0)),
                has_leaked: false,
            },
        );
        let mut m2 = Bindings::new();
        m2.insert(
            b,
            BindingEntry {
                value: Some(num(9.0)),
                has_leaked: true,
            },
        );
        let g1 = Generator::new("left");
        let mut g2 = Generator::new("right");
        g2.emit_binding_assignment(b, num(9.0));
        let (g1, g2, joined) = join_bindings(&mut realm, &cond(), g1, &m1, g2, &m2);
        // the un-leaked left value is materialized into the leaked right
        // branch's log, after that log replays in full
        assert_eq!(g2.entries.len(), 2);
        assert!(matches!(
            &g2.entries[0],
            GeneratorEntry::Subgenerator { generator, .. }
                if generator.entries.len() == 1
        ));
        assert!(matches!(
            &g2.entries[1],
            GeneratorEntry::BindingAssignment { binding, value } if *binding == b && *value == num(5.0)
        ));
        // the un-leaked left branch is untouched
        assert!(g1.is_empty());
        assert_eq!(
            joined.get(&b),
            Some(&BindingEntry {
                value: None,
                has_leaked: true,
            })
        );
    }

    #[test]
    fn unleaked_bindings_join_their_values() {
        let mut realm = Realm::new();
        let b = realm.create_binding("b", num(0.0));
        let mut m1 = Bindings::new();
        m1.insert(
            b,
            BindingEntry {
                value: Some(num(1.0)),
                has_leaked: false,
            },
        );
        let m2 = Bindings::new(); // no write on the right: current value is used
        let (g1, g2, joined) = join_bindings(
            &mut realm,
            &cond(),
            Generator::new("left"),
            &m1,
            Generator::new("right"),
            &m2,
        );
        assert!(g1.is_empty() && g2.is_empty());
        let entry = &joined[&b];
        assert!(!entry.has_leaked);
        let (_, v1, v2) = as_conditional(entry.value.as_ref().unwrap());
        assert_eq!(v1, &num(1.0));
        assert_eq!(v2, &num(0.0));
    }

    #[test]
    fn joined_effects_merge_all_five_parts() {
        let mut realm = Realm::new();
        let c = cond();
        let x = realm.create_binding("x", num(1.0));
        let e1 = realm.evaluate_for_effects("left", |realm| {
            realm.set_binding(x, num(2.0));
            Completion::Normal(num(10.0))
        });
        let e2 = realm.evaluate_for_effects("right", |realm| {
            realm.set_binding(x, num(3.0));
            realm.create_object();
            Completion::Normal(num(20.0))
        });
        let joined = join_effects(&mut realm, &c, e1, e2);
        let Completion::Normal(v) = &joined.result else {
            panic!("expected a normal result");
        };
        let (_, r1, r2) = as_conditional(v);
        assert_eq!(r1, &num(10.0));
        assert_eq!(r2, &num(20.0));
        let entry = &joined.bindings[&x];
        assert!(!entry.has_leaked);
        let (_, v1, v2) = as_conditional(entry.value.as_ref().unwrap());
        assert_eq!(v1, &num(2.0));
        assert_eq!(v2, &num(3.0));
        assert_eq!(joined.created_objects.len(), 1);
        // neither branch emitted residual effects
        assert!(joined.generator.is_empty());
        assert!(joined.can_be_applied);
    }

    #[test]
    fn map_and_join_right_folds_the_branches() {
        let mut realm = Realm::new();
        let x = AbstractValue::variable("x");
        let values = [
            ConcreteValue::Number(1.0),
            ConcreteValue::Number(2.0),
            ConcreteValue::Number(3.0),
        ];
        let cond_factory = {
            let x = x.clone();
            move |realm: &mut Realm, v: &ConcreteValue| {
                AbstractValue::strict_equal_of(realm, x.clone(), Value::Concrete(v.clone()))
            }
        };
        let result = map_and_join(&mut realm, &values, cond_factory, |_realm, v| {
            let ConcreteValue::Number(n) = v else {
                panic!("expected a number");
            };
            Completion::Normal(num(n * 2.0))
        })
        .unwrap();
        // (x === 3) ? 6 : ((x === 2) ? 4 : 2)
        let (c3, v3, rest) = as_conditional(&result);
        let Value::Abstract(t) = c3 else {
            panic!("expected an abstract condition");
        };
        assert!(
            matches!(&t.kind, AbstractValueKind::StrictEqual { right, .. }
                if *right == Value::Concrete(ConcreteValue::Number(3.0)))
        );
        assert_eq!(v3, &num(6.0));
        let (c2, v2, v1) = as_conditional(rest);
        let Value::Abstract(t) = c2 else {
            panic!("expected an abstract condition");
        };
        assert!(
            matches!(&t.kind, AbstractValueKind::StrictEqual { right, .. }
                if *right == Value::Concrete(ConcreteValue::Number(2.0)))
        );
        assert_eq!(v2, &num(4.0));
        assert_eq!(v1, &num(2.0));
        // path conditions were popped again
        assert!(realm.path_conditions().is_empty());
    }

    #[test]
    #[should_panic(expected = "at least two values")]
    fn map_and_join_rejects_singletons() {
        let mut realm = Realm::new();
        let values = [ConcreteValue::Number(1.0)];
        let _ = map_and_join(
            &mut realm,
            &values,
            |_realm, _v| AbstractValue::variable("c"),
            |_realm, _v| Completion::Normal(Value::undefined()),
        );
    }
}
