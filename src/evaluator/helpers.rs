use super::types::{PropertyDescriptor, Value};
use crate::types::ConcreteValue;

// §7.1.3 ToBoolean
pub fn to_boolean(val: &ConcreteValue) -> bool {
    match val {
        ConcreteValue::Empty | ConcreteValue::Undefined | ConcreteValue::Null => false,
        ConcreteValue::Boolean(b) => *b,
        ConcreteValue::Number(n) => *n != 0.0 && !n.is_nan(),
        ConcreteValue::String(s) => !s.is_empty(),
        ConcreteValue::BigInt(b) => b.value != num_bigint::BigInt::from(0),
        ConcreteValue::Symbol(_) | ConcreteValue::Object(_) => true,
    }
}

// §7.2.16 IsStrictlyEqual
pub fn strict_equals(left: &ConcreteValue, right: &ConcreteValue) -> bool {
    match (left, right) {
        (ConcreteValue::Empty, ConcreteValue::Empty) => true,
        (ConcreteValue::Undefined, ConcreteValue::Undefined) => true,
        (ConcreteValue::Null, ConcreteValue::Null) => true,
        (ConcreteValue::Boolean(a), ConcreteValue::Boolean(b)) => a == b,
        (ConcreteValue::Number(a), ConcreteValue::Number(b)) => a == b,
        (ConcreteValue::String(a), ConcreteValue::String(b)) => a == b,
        (ConcreteValue::Symbol(a), ConcreteValue::Symbol(b)) => a.id == b.id,
        (ConcreteValue::BigInt(a), ConcreteValue::BigInt(b)) => a.value == b.value,
        (ConcreteValue::Object(a), ConcreteValue::Object(b)) => a == b,
        _ => false,
    }
}

// §7.2.11 SameValue: NaN equals NaN, +0 and -0 are distinct.
pub fn same_value(left: &ConcreteValue, right: &ConcreteValue) -> bool {
    match (left, right) {
        (ConcreteValue::Number(a), ConcreteValue::Number(b)) => {
            if a.is_nan() && b.is_nan() {
                return true;
            }
            if *a == 0.0 && *b == 0.0 {
                return a.is_sign_positive() == b.is_sign_positive();
            }
            a == b
        }
        _ => strict_equals(left, right),
    }
}

/// Whether two descriptors have the same shape: identical attribute flags
/// and identical accessors. Values are deliberately not compared; joining
/// equal-shape data descriptors reconciles the values separately.
pub fn equal_descriptors(d1: &PropertyDescriptor, d2: &PropertyDescriptor) -> bool {
    d1.writable == d2.writable
        && d1.enumerable == d2.enumerable
        && d1.configurable == d2.configurable
        && option_value_eq(&d1.get, &d2.get)
        && option_value_eq(&d1.set, &d2.set)
}

fn option_value_eq(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
