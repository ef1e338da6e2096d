use std::fmt::{Display, Formatter};

use crate::gc::{GarbageCollector, Object, Reference};

/// The value types of the VM.
///
/// Numbers, booleans and nil are stored inline; everything else lives in the
/// [`GarbageCollector`] and is held through a [`Reference`]. Values are `Copy`, and two object
/// values are equal only when they reference the same object. Strings are interned, so for
/// them this is content equality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Object(Reference),
}

impl Value {
    /// `nil` and `false` are falsey, everything else (`0` included) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Nil => false,
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Reference> {
        match self {
            Value::Object(reference) => Some(*reference),
            _ => None,
        }
    }

    /// The type name of an inline value. Objects report their kind through the heap.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Object(_) => "object",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Value::Object(reference)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Nil, Into::into)
    }
}

/// Every host numeric type becomes a [`Value::Number`].
macro_rules! number_from_impl {
    ($($t: ty), * $(,)?) => {
        $(
        impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(n as f64)
            }
        }
        )*
    };
}

number_from_impl!(f64, f32, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// A [`Value`] paired with the heap it lives in, for printing.
pub struct DisplayValue<'a> {
    value: Value,
    heap: &'a GarbageCollector,
}

impl<'a> DisplayValue<'a> {
    pub fn new(value: Value, heap: &'a GarbageCollector) -> Self {
        Self { value, heap }
    }
}

impl Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Value::Number(n) => n.fmt(f),
            Value::Boolean(b) => b.fmt(f),
            Value::Nil => write!(f, "nil"),
            Value::Object(reference) => match self.heap.get(reference) {
                Some(Object::String(s)) => s.fmt(f),
                Some(Object::Native(native)) => native.fmt(f),
                Some(Object::Function(function)) => function.fmt(f),
                Some(Object::Closure(closure)) => match self.heap.get(closure.function) {
                    Some(Object::Function(function)) => function.fmt(f),
                    _ => write!(f, "<closure>"),
                },
                Some(Object::Upvalue(_)) => write!(f, "upvalue"),
                None => write!(f, "<freed {:?}>", reference),
            },
        }
    }
}
