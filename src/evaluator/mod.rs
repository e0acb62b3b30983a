use crate::types::{BindingId, ConcreteValue, ObjectId};
use std::cell::RefCell;
use std::rc::Rc;

mod types;
pub use types::*;

mod helpers;
pub use helpers::{equal_descriptors, same_value, strict_equals, to_boolean};

pub mod path;

mod join;
pub use join::*;

mod compose;
pub use compose::*;

/// Values the realm hands out without allocation.
pub struct Intrinsics {
    pub empty: Value,
    pub undefined: Value,
}

/// The environment the join core runs against: intrinsics, the current
/// path conditions, the binding and object arenas, and the machinery that
/// captures evaluation into `Effects` records.
pub struct Realm {
    pub intrinsics: Intrinsics,
    pub(crate) path_conditions: Vec<Value>,
    bindings: Vec<BindingSlot>,
    objects: Vec<Rc<RefCell<ObjectData>>>,
    frames: Vec<EffectsFrame>,
    output: Generator,
    saved_completion: Option<Completion>,
}

/// State delta under construction while a thunk evaluates for effects.
struct EffectsFrame {
    generator: Generator,
    bindings: Bindings,
    properties: PropertyBindings,
    created_objects: CreatedObjects,
}

impl Realm {
    pub fn new() -> Realm {
        Realm {
            intrinsics: Intrinsics {
                empty: Value::Concrete(ConcreteValue::Empty),
                undefined: Value::Concrete(ConcreteValue::Undefined),
            },
            path_conditions: Vec::new(),
            bindings: Vec::new(),
            objects: Vec::new(),
            frames: Vec::new(),
            output: Generator::new("Main"),
            saved_completion: None,
        }
    }

    pub fn path_conditions(&self) -> &[Value] {
        &self.path_conditions
    }

    /// The residual effect log accumulated by applied effects.
    pub fn output(&self) -> &Generator {
        &self.output
    }

    /// A joined completion whose abrupt part is still pending
    /// incorporation by the caller.
    pub fn saved_completion(&self) -> Option<&Completion> {
        self.saved_completion.as_ref()
    }

    pub fn create_binding(&mut self, name: &str, value: Value) -> BindingId {
        let id = BindingId(self.bindings.len() as u64);
        self.bindings.push(BindingSlot {
            name: name.to_string(),
            value,
            has_leaked: false,
        });
        id
    }

    pub fn binding_name(&self, id: BindingId) -> &str {
        &self.bindings[id.0 as usize].name
    }

    /// Current value of a binding, reading through any active effects
    /// frames before consulting the store.
    pub fn binding_value(&self, id: BindingId) -> Value {
        for frame in self.frames.iter().rev() {
            if let Some(entry) = frame.bindings.get(&id) {
                return entry
                    .value
                    .clone()
                    .unwrap_or_else(|| self.intrinsics.undefined.clone());
            }
        }
        self.bindings[id.0 as usize].value.clone()
    }

    pub fn binding_has_leaked(&self, id: BindingId) -> bool {
        for frame in self.frames.iter().rev() {
            if let Some(entry) = frame.bindings.get(&id) {
                return entry.has_leaked;
            }
        }
        self.bindings[id.0 as usize].has_leaked
    }

    pub fn set_binding(&mut self, id: BindingId, value: Value) {
        let has_leaked = self.binding_has_leaked(id);
        if let Some(frame) = self.frames.last_mut() {
            frame
                .bindings
                .insert(id, BindingEntry { value: Some(value), has_leaked });
        } else {
            self.bindings[id.0 as usize].value = value;
        }
    }

    /// Marks a binding as escaped to unobservable code.
    pub fn leak_binding(&mut self, id: BindingId) {
        let current = self.binding_value(id);
        if let Some(frame) = self.frames.last_mut() {
            let entry = frame.bindings.entry(id).or_insert(BindingEntry {
                value: Some(current),
                has_leaked: false,
            });
            entry.has_leaked = true;
        } else {
            self.bindings[id.0 as usize].has_leaked = true;
        }
    }

    pub fn create_object(&mut self) -> ObjectId {
        let id = ObjectId(self.objects.len() as u64);
        let mut data = ObjectData::new();
        data.id = Some(id);
        self.objects.push(Rc::new(RefCell::new(data)));
        if let Some(frame) = self.frames.last_mut() {
            frame.created_objects.insert(id);
        }
        id
    }

    pub fn get_object(&self, id: ObjectId) -> Option<Rc<RefCell<ObjectData>>> {
        self.objects.get(id.0 as usize).cloned()
    }

    /// Defines (`Some`) or deletes (`None`) a property slot, recording
    /// the write in the active effects frame if one exists.
    pub fn define_property(&mut self, object: ObjectId, key: &str, desc: Option<Descriptor>) {
        let binding = PropertyBinding {
            object,
            key: key.to_string(),
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.properties.insert(binding, desc);
        } else if let Some(obj) = self.get_object(object) {
            let mut obj = obj.borrow_mut();
            match desc {
                Some(d) => obj.insert_property(binding.key, d),
                None => obj.remove_property(key),
            }
        }
    }

    /// Current descriptor of a property slot, reading through any active
    /// effects frames before consulting the object itself.
    pub fn property_descriptor(&self, binding: &PropertyBinding) -> Option<Descriptor> {
        for frame in self.frames.iter().rev() {
            if let Some(d) = frame.properties.get(binding) {
                return d.clone();
            }
        }
        self.get_object(binding.object)
            .and_then(|o| o.borrow().properties.get(&binding.key).cloned())
    }

    /// Appends to the residual log of the active frame (or the realm's
    /// own output when no capture is in progress).
    pub fn emit_binding_assignment(&mut self, binding: BindingId, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.generator.emit_binding_assignment(binding, value),
            None => self.output.emit_binding_assignment(binding, value),
        }
    }

    /// Evaluates `f` while capturing every state write, residual-log
    /// emission, and object creation into a fresh `Effects` record,
    /// leaving the realm as it was.
    pub fn evaluate_for_effects(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Realm) -> Completion,
    ) -> Effects {
        self.frames.push(EffectsFrame {
            generator: Generator::new(label),
            bindings: Bindings::new(),
            properties: PropertyBindings::new(),
            created_objects: CreatedObjects::new(),
        });
        let result = f(self);
        let frame = self
            .frames
            .pop()
            .expect("effects frame disappeared during evaluation");
        Effects::new(
            result,
            frame.generator,
            frame.bindings,
            frame.properties,
            frame.created_objects,
        )
    }

    /// Writes an effects record through: into the enclosing capture frame
    /// if one is active, otherwise into the arenas and the realm's output
    /// log.
    pub fn apply_effects(&mut self, effects: Effects) {
        assert!(
            effects.can_be_applied,
            "attempt to apply effects that are no longer applicable"
        );
        let Effects {
            generator,
            bindings,
            properties,
            created_objects,
            ..
        } = effects;
        if let Some(frame) = self.frames.last_mut() {
            frame.bindings.extend(bindings);
            frame.properties.extend(properties);
            frame.created_objects.extend(created_objects);
            frame.generator.append_generator(generator, "ApplyEffects");
            return;
        }
        for (id, entry) in bindings {
            let slot = &mut self.bindings[id.0 as usize];
            if let Some(value) = entry.value {
                slot.value = value;
            }
            slot.has_leaked |= entry.has_leaked;
        }
        for (binding, desc) in properties {
            if let Some(obj) = self.get_object(binding.object) {
                let mut obj = obj.borrow_mut();
                match desc {
                    Some(d) => obj.insert_property(binding.key, d),
                    None => obj.remove_property(&binding.key),
                }
            }
        }
        // created objects already live in the arena
        self.output.append_generator(generator, "ApplyEffects");
    }

    /// Converts a completion into a plain value or a thrown value. A
    /// joined completion that still has a normal part yields its joined
    /// normal value; if it also carries throws, the whole completion is
    /// stashed as `saved_completion` for the caller to incorporate.
    pub fn return_or_throw_completion(&mut self, completion: Completion) -> Result<Value, Value> {
        let is_loop_exit = |c: &Completion| matches!(c, Completion::Break(_) | Completion::Continue(_));
        match completion {
            Completion::Normal(v) | Completion::Return(v) => Ok(v),
            Completion::Throw(t) => Err(t.value),
            Completion::Break(_) | Completion::Continue(_) => {
                panic!("loop completion escaped its loop")
            }
            Completion::JoinedAbrupt(_) => {
                assert!(
                    !completion.contains_selected(&is_loop_exit),
                    "loop completion escaped its loop"
                );
                let is_return = |c: &Completion| matches!(c, Completion::Return(_));
                let is_throw = |c: &Completion| matches!(c, Completion::Throw(_));
                if !completion.contains_selected(&is_return) {
                    return Err(join_values_of_selected_completions(
                        self, &is_throw, &completion,
                    ));
                }
                let value = join_values_of_selected_completions(self, &is_return, &completion);
                if completion.contains_selected(&is_throw) {
                    self.saved_completion = Some(completion);
                }
                Ok(value)
            }
            Completion::JoinedNormalAndAbrupt(_) => {
                let is_normal =
                    |c: &Completion| matches!(c, Completion::Normal(_) | Completion::Return(_));
                let value = join_values_of_selected_completions(self, &is_normal, &completion);
                let is_throw = |c: &Completion| matches!(c, Completion::Throw(_));
                if completion.contains_selected(&is_throw) {
                    self.saved_completion = Some(completion);
                }
                Ok(value)
            }
        }
    }
}

impl Default for Realm {
    fn default() -> Self {
        Realm::new()
    }
}
