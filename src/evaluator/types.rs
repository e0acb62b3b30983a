use crate::types::{BindingId, ConcreteValue, ObjectId, SourceLocation};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::Realm;
use super::helpers::{same_value, to_boolean};

/// A symbolic value: either a fully known runtime datum or an abstract
/// term standing for a set of possible runtime values.
#[derive(Clone, Debug)]
pub enum Value {
    Concrete(ConcreteValue),
    Abstract(Rc<AbstractValue>),
}

impl Value {
    pub fn undefined() -> Value {
        Value::Concrete(ConcreteValue::Undefined)
    }

    pub fn empty() -> Value {
        Value::Concrete(ConcreteValue::Empty)
    }

    pub fn boolean(b: bool) -> Value {
        Value::Concrete(ConcreteValue::Boolean(b))
    }

    pub fn number(n: f64) -> Value {
        Value::Concrete(ConcreteValue::Number(n))
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, Value::Abstract(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Concrete(ConcreteValue::Empty))
    }

    pub fn as_concrete(&self) -> Option<&ConcreteValue> {
        match self {
            Value::Concrete(c) => Some(c),
            Value::Abstract(_) => None,
        }
    }

    /// False only when this value is known to be true, i.e. a concrete
    /// value whose ToBoolean is true. Abstract values may be either.
    pub fn might_not_be_true(&self) -> bool {
        match self {
            Value::Concrete(c) => !to_boolean(c),
            Value::Abstract(_) => true,
        }
    }

    pub fn might_not_be_false(&self) -> bool {
        match self {
            Value::Concrete(c) => to_boolean(c),
            Value::Abstract(_) => true,
        }
    }
}

// Concrete values compare by SameValue; abstract values by term identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Concrete(a), Value::Concrete(b)) => same_value(a, b),
            (Value::Abstract(a), Value::Abstract(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An abstract term. Constructed only through the factory functions below,
/// which fold concrete operands so that residual terms are genuinely
/// undecided.
#[derive(Debug)]
pub struct AbstractValue {
    pub kind: AbstractValueKind,
    /// Marks terms known to be boolean-typed. Forwarded verbatim from the
    /// `conditional_of_full` flag; downstream consumers may use it for
    /// typing, this crate never interprets it.
    pub is_condition: bool,
}

#[derive(Debug)]
pub enum AbstractValueKind {
    /// A free symbolic input, named for diagnostics.
    Variable(String),
    /// `condition ? consequent : alternate`
    Conditional {
        condition: Value,
        consequent: Value,
        alternate: Value,
    },
    /// `left === right` where at least one side is abstract.
    StrictEqual { left: Value, right: Value },
    Not(Value),
    And(Value, Value),
    Or(Value, Value),
}

pub type CompletionSelector = dyn Fn(&Completion) -> bool;

impl AbstractValue {
    fn term(kind: AbstractValueKind, is_condition: bool) -> Value {
        Value::Abstract(Rc::new(AbstractValue { kind, is_condition }))
    }

    pub fn variable(name: &str) -> Value {
        Self::term(AbstractValueKind::Variable(name.to_string()), false)
    }

    /// Builds `condition ? consequent : alternate`.
    pub fn conditional_of(
        realm: &Realm,
        condition: Value,
        consequent: Value,
        alternate: Value,
    ) -> Value {
        Self::conditional_of_full(realm, condition, consequent, alternate, false, false)
    }

    /// Variant taking the two collaborator-defined flags. `is_condition`
    /// marks the result as boolean-typed; `do_not_simplify` keeps both
    /// operands alive verbatim even when the term could be folded.
    pub fn conditional_of_full(
        realm: &Realm,
        condition: Value,
        consequent: Value,
        alternate: Value,
        is_condition: bool,
        do_not_simplify: bool,
    ) -> Value {
        if !do_not_simplify {
            if !condition.might_not_be_true() {
                return consequent;
            }
            if !condition.might_not_be_false() {
                return alternate;
            }
            // A condition already on the current path is known to hold.
            if realm.path_conditions.iter().any(|pc| *pc == condition) {
                return consequent;
            }
            if consequent == alternate {
                return consequent;
            }
        }
        Self::term(
            AbstractValueKind::Conditional {
                condition,
                consequent,
                alternate,
            },
            is_condition,
        )
    }

    pub fn strict_equal_of(_realm: &Realm, left: Value, right: Value) -> Value {
        if let (Value::Concrete(a), Value::Concrete(b)) = (&left, &right) {
            return Value::boolean(super::helpers::strict_equals(a, b));
        }
        Self::term(AbstractValueKind::StrictEqual { left, right }, true)
    }

    pub fn not_of(_realm: &Realm, operand: Value) -> Value {
        match &operand {
            Value::Concrete(c) => Value::boolean(!to_boolean(c)),
            Value::Abstract(a) => {
                if let AbstractValueKind::Not(inner) = &a.kind {
                    return inner.clone();
                }
                Self::term(AbstractValueKind::Not(operand), true)
            }
        }
    }

    pub fn and_of(_realm: &Realm, left: Value, right: Value) -> Value {
        if let Value::Concrete(c) = &left {
            return if to_boolean(c) { right } else { Value::boolean(false) };
        }
        if let Value::Concrete(c) = &right {
            return if to_boolean(c) { left } else { Value::boolean(false) };
        }
        Self::term(AbstractValueKind::And(left, right), true)
    }

    pub fn or_of(_realm: &Realm, left: Value, right: Value) -> Value {
        if let Value::Concrete(c) = &left {
            return if to_boolean(c) { Value::boolean(true) } else { right };
        }
        if let Value::Concrete(c) = &right {
            return if to_boolean(c) { Value::boolean(true) } else { left };
        }
        Self::term(AbstractValueKind::Or(left, right), true)
    }

    /// The abstract predicate under which some completion selected by
    /// `selector` is reached inside `completion`. For a joined node with
    /// condition c this is `(c && reach(consequent)) || (!c && reach(alternate))`;
    /// the connectives fold concrete leaves away.
    pub fn join_condition_for_selected_completions(
        realm: &Realm,
        selector: &CompletionSelector,
        completion: &Completion,
    ) -> Value {
        let joined = |condition: &Value, consequent: &Completion, alternate: &Completion| {
            let c1 = Self::join_condition_for_selected_completions(realm, selector, consequent);
            let c2 = Self::join_condition_for_selected_completions(realm, selector, alternate);
            let lhs = Self::and_of(realm, condition.clone(), c1);
            let rhs = Self::and_of(realm, Self::not_of(realm, condition.clone()), c2);
            Self::or_of(realm, lhs, rhs)
        };
        match completion {
            Completion::JoinedAbrupt(j) => joined(&j.condition, &j.consequent, &j.alternate),
            Completion::JoinedNormalAndAbrupt(j) => {
                joined(&j.condition, &j.consequent, &j.alternate)
            }
            leaf => Value::boolean(selector(leaf)),
        }
    }
}

/// The payload accepted and produced by the value joiner, and stored in
/// data descriptors: a single value, a parallel array of values, or an
/// array of key/value entries (internal map slots).
#[derive(Clone, Debug, PartialEq)]
pub enum JoinedValue {
    Single(Value),
    Values(Vec<Value>),
    Entries(Vec<MapEntry>),
}

impl JoinedValue {
    /// The single value carried, for callers that know no array form is
    /// involved.
    pub fn expect_single(self) -> Value {
        match self {
            JoinedValue::Single(v) => v,
            other => panic!("expected a single value, found {other:?}"),
        }
    }
}

impl From<Value> for JoinedValue {
    fn from(v: Value) -> JoinedValue {
        JoinedValue::Single(v)
    }
}

/// One slot of an internal map. A `{None, None}` entry marks a deleted
/// slot and propagates through joins unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub key: Option<Value>,
    pub value: Option<Value>,
}

/// Outcome of evaluating a program fragment.
#[derive(Clone, Debug)]
pub enum Completion {
    Normal(Value),
    Return(Value),
    Throw(ThrowCompletion),
    Break(BreakCompletion),
    Continue(ContinueCompletion),
    /// Both branches of a join ended abruptly.
    JoinedAbrupt(Rc<JoinedCompletion>),
    /// At least one branch of a join may complete normally.
    JoinedNormalAndAbrupt(Rc<JoinedNormalAndAbrupt>),
}

#[derive(Clone, Debug)]
pub struct ThrowCompletion {
    pub value: Value,
    pub location: Option<SourceLocation>,
}

#[derive(Clone, Debug)]
pub struct BreakCompletion {
    pub value: Value,
    pub target: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ContinueCompletion {
    pub value: Value,
    pub target: Option<String>,
}

#[derive(Clone, Debug)]
pub struct JoinedCompletion {
    pub condition: Value,
    pub consequent: Completion,
    pub alternate: Completion,
}

#[derive(Clone, Debug)]
pub struct JoinedNormalAndAbrupt {
    pub condition: Value,
    pub consequent: Completion,
    pub alternate: Completion,
    /// An earlier possibly-normal completion this one continues from; the
    /// chain forms a DAG, hence the shared ownership.
    pub composed_with: Option<Rc<JoinedNormalAndAbrupt>>,
    pub path_conditions_at_creation: Vec<Value>,
    pub saved_effects: Option<Box<Effects>>,
}

impl Completion {
    pub fn is_abrupt(&self) -> bool {
        !matches!(
            self,
            Completion::Normal(_) | Completion::JoinedNormalAndAbrupt(_)
        )
    }

    /// The value carried by a leaf completion.
    pub fn value(&self) -> &Value {
        match self {
            Completion::Normal(v) | Completion::Return(v) => v,
            Completion::Throw(t) => &t.value,
            Completion::Break(b) => &b.value,
            Completion::Continue(c) => &c.value,
            Completion::JoinedAbrupt(_) | Completion::JoinedNormalAndAbrupt(_) => {
                panic!("joined completions carry no single value")
            }
        }
    }

    /// Whether any leaf of this completion tree (following composed-with
    /// links) satisfies `selector`.
    pub fn contains_selected(&self, selector: &CompletionSelector) -> bool {
        match self {
            Completion::JoinedAbrupt(j) => {
                j.consequent.contains_selected(selector) || j.alternate.contains_selected(selector)
            }
            Completion::JoinedNormalAndAbrupt(j) => {
                j.consequent.contains_selected(selector)
                    || j.alternate.contains_selected(selector)
                    || j.composed_with.as_ref().is_some_and(|cw| {
                        Completion::JoinedNormalAndAbrupt(cw.clone()).contains_selected(selector)
                    })
            }
            leaf => selector(leaf),
        }
    }
}

/// Property slot metadata. `Plain` is an ordinary data or accessor
/// descriptor; `Joined` retains both unjoined originals when the two
/// branch descriptors could not be merged directly.
#[derive(Clone, Debug)]
pub enum Descriptor {
    Plain(PropertyDescriptor),
    Joined(JoinedDescriptor),
}

impl Descriptor {
    pub fn as_plain(&self) -> Option<&PropertyDescriptor> {
        match self {
            Descriptor::Plain(d) => Some(d),
            Descriptor::Joined(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PropertyDescriptor {
    pub value: Option<JoinedValue>,
    pub writable: Option<bool>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    pub fn data(value: Value, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            value: Some(value.into()),
            writable: Some(writable),
            get: None,
            set: None,
            enumerable: Some(enumerable),
            configurable: Some(configurable),
        }
    }

    pub fn data_default(value: Value) -> Self {
        Self::data(value, true, true, true)
    }

    pub fn accessor(get: Option<Value>, set: Option<Value>) -> Self {
        Self {
            value: None,
            writable: None,
            get,
            set,
            enumerable: Some(true),
            configurable: Some(true),
        }
    }

    pub fn is_data_descriptor(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    pub fn is_accessor_descriptor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }
}

/// A descriptor whose two branch shapes disagree; readers must consult
/// `condition` to pick a side. A missing side means the property did not
/// exist on that path.
#[derive(Clone, Debug)]
pub struct JoinedDescriptor {
    pub condition: Value,
    pub descriptor1: Option<Box<Descriptor>>,
    pub descriptor2: Option<Box<Descriptor>>,
}

/// A variable binding slot in the realm's arena.
#[derive(Clone, Debug)]
pub struct BindingSlot {
    pub name: String,
    pub value: Value,
    /// A reference to this slot escaped to code the analysis cannot see;
    /// its value may change without a recorded write.
    pub has_leaked: bool,
}

/// End-of-branch state of one binding, recorded in an effects delta. A
/// `None` value on a leaked entry means the value cannot be trusted.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingEntry {
    pub value: Option<Value>,
    pub has_leaked: bool,
}

/// A property slot of a specific object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyBinding {
    pub object: ObjectId,
    pub key: String,
}

pub type Bindings = HashMap<BindingId, BindingEntry>;
/// `None` records a deletion of the slot in that branch.
pub type PropertyBindings = HashMap<PropertyBinding, Option<Descriptor>>;
pub type CreatedObjects = HashSet<ObjectId>;

/// Heap object state. Only what the join core observes: own properties in
/// insertion order and extensibility.
#[derive(Debug)]
pub struct ObjectData {
    pub id: Option<ObjectId>,
    pub properties: HashMap<String, Descriptor>,
    pub property_order: Vec<String>,
    pub extensible: bool,
}

impl ObjectData {
    pub(crate) fn new() -> Self {
        Self {
            id: None,
            properties: HashMap::new(),
            property_order: Vec::new(),
            extensible: true,
        }
    }

    pub fn insert_property(&mut self, key: String, desc: Descriptor) {
        if !self.properties.contains_key(&key) {
            self.property_order.push(key.clone());
        }
        self.properties.insert(key, desc);
    }

    pub fn remove_property(&mut self, key: &str) {
        if self.properties.remove(key).is_some() {
            self.property_order.retain(|k| k != key);
        }
    }
}

/// Ordered log of externally observable effects, replayed when effects
/// are applied. Append-only: joins wrap generators, they never rewrite
/// entries in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generator {
    pub label: String,
    pub entries: Vec<GeneratorEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GeneratorEntry {
    /// Write `value` into `binding` when this point of the log replays.
    BindingAssignment { binding: BindingId, value: Value },
    /// Replay one of two sub-logs depending on `condition`.
    Branch {
        condition: Value,
        consequent: Generator,
        alternate: Generator,
    },
    /// Replay an entire earlier log at this point.
    Subgenerator { label: String, generator: Generator },
}

impl Generator {
    pub fn new(label: &str) -> Generator {
        Generator {
            label: label.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A fresh generator holding a single branching entry over the two
    /// per-branch logs.
    pub fn join_generators(condition: Value, consequent: Generator, alternate: Generator) -> Generator {
        let mut g = Generator::new("Join");
        g.entries.push(GeneratorEntry::Branch {
            condition,
            consequent,
            alternate,
        });
        g
    }

    pub fn append_generator(&mut self, generator: Generator, label: &str) {
        if generator.is_empty() {
            return;
        }
        self.entries.push(GeneratorEntry::Subgenerator {
            label: label.to_string(),
            generator,
        });
    }

    pub fn emit_binding_assignment(&mut self, binding: BindingId, value: Value) {
        self.entries
            .push(GeneratorEntry::BindingAssignment { binding, value });
    }
}

/// Everything evaluating a fragment did: its completion, the residual
/// effect log, the state deltas, and the objects it allocated.
#[derive(Clone, Debug)]
pub struct Effects {
    pub result: Completion,
    pub generator: Generator,
    pub bindings: Bindings,
    pub properties: PropertyBindings,
    pub created_objects: CreatedObjects,
    /// Cleared when these effects are stashed inside a completion; joins
    /// and application require it.
    pub can_be_applied: bool,
}

impl Effects {
    pub fn new(
        result: Completion,
        generator: Generator,
        bindings: Bindings,
        properties: PropertyBindings,
        created_objects: CreatedObjects,
    ) -> Effects {
        Effects {
            result,
            generator,
            bindings,
            properties,
            created_objects,
            can_be_applied: true,
        }
    }

    /// Effects that did nothing but complete with `result`.
    pub fn with_result(result: Completion) -> Effects {
        Effects::new(
            result,
            Generator::default(),
            Bindings::new(),
            PropertyBindings::new(),
            CreatedObjects::new(),
        )
    }

    pub fn shallow_clone_with_result(&self, result: Completion) -> Effects {
        Effects {
            result,
            generator: self.generator.clone(),
            bindings: self.bindings.clone(),
            properties: self.properties.clone(),
            created_objects: self.created_objects.clone(),
            can_be_applied: self.can_be_applied,
        }
    }
}
