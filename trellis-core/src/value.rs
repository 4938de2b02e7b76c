//! Dynamic member values.
//!
//! Fields, props, getter results and action results are all [`Value`]s.
//! Plain data is `serde_json::Value`; instance handles and function-valued
//! fields are carried by handle and compare by identity.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::instance::Instance;

/// A function stored as a field value.
#[derive(Clone)]
pub struct Function(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:p})", Arc::as_ptr(&self.0))
    }
}

/// The value of an instance member.
#[derive(Clone, Default)]
pub enum Value {
    /// Unset.
    #[default]
    Undefined,
    /// Plain data.
    Data(Json),
    /// A handle to another instance, usually an embedded behavior.
    Instance(Instance),
    /// A function-valued field.
    Function(Function),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_data(&self) -> Option<&Json> {
        match self {
            Value::Data(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_data().and_then(Json::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_data().and_then(Json::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_data().and_then(Json::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_data().and_then(Json::as_str)
    }

    /// Deserialize plain data into `T`. `Undefined` reads as JSON `null`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Value::Data(json) => serde_json::from_value(json.clone()),
            _ => serde_json::from_value(Json::Null),
        }
    }

    /// Change test for mutable state: scalars compare by value, while
    /// containers are always a new value and behaviors and functions compare
    /// by identity.
    pub(crate) fn same_reference(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Data(x), Value::Data(y)) => {
                !matches!(x, Json::Array(_) | Json::Object(_)) && x == y
            }
            (Value::Instance(x), Value::Instance(y)) => x.ptr_eq(y),
            (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
            _ => false,
        }
    }

    /// Change test for structural state.
    pub(crate) fn structurally_equal(a: &Value, b: &Value) -> bool {
        a == b
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Data(x), Value::Data(y)) => x == y,
            (Value::Instance(x), Value::Instance(y)) => x.ptr_eq(y),
            (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Data(json) => write!(f, "Data({json})"),
            Value::Instance(instance) => write!(f, "Instance({})", instance.class().name()),
            Value::Function(function) => function.fmt(f),
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::Data(json)
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Value::Instance(instance)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

macro_rules! from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Data(Json::from(v))
                }
            }
        )*
    };
}

from_scalar!(bool, i32, i64, u32, u64, f64, &str, String);
