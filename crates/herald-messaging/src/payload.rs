use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A single argument carried by a message
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A reference handed through unchanged; every receiver sees the same object
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Wrap an arbitrary object so it can travel by reference
    pub fn shared<T: Any + Send + Sync>(value: T) -> Self {
        Value::Shared(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Value::Shared(value)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats as-is; integers widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Recover the shared object if it has type `T`
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Shared(object) => Arc::clone(object).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Shared(_) => "shared",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Shared(a), Value::Shared(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Shared(object) => write!(f, "<shared {:p}>", Arc::as_ptr(object)),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Nil)
    }
}

/// Ordered arguments of one message occurrence.
///
/// Cloning is cheap: every handler and waiter of a send shares the same allocation,
/// and nothing in the bus ever mutates it.
#[derive(Clone, PartialEq)]
pub struct Payload(Arc<[Value]>);

impl Payload {
    pub fn new(values: Vec<Value>) -> Self {
        Payload(Arc::from(values))
    }

    pub fn empty() -> Self {
        Payload(Arc::from(Vec::new()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// True if both payloads are the same allocation
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<Vec<Value>> for Payload {
    fn from(values: Vec<Value>) -> Self {
        Payload::new(values)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::empty()
    }
}

impl FromIterator<Value> for Payload {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Payload::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Payload {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build a [`Payload`] from anything convertible into [`Value`].
///
/// ```
/// use herald_messaging::payload;
///
/// let args = payload!["a", 1, true];
/// assert_eq!(args.len(), 3);
/// assert!(payload![].is_empty());
/// ```
#[macro_export]
macro_rules! payload {
    () => {
        $crate::Payload::empty()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Payload::new(vec![$($crate::Value::from($value)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_macro_builds_ordered_values() {
        let args = payload!["a", 1, 2.5, false, ()];
        assert_eq!(args.len(), 5);
        assert_eq!(args.get(0).and_then(Value::as_str), Some("a"));
        assert_eq!(args.get(1).and_then(Value::as_int), Some(1));
        assert_eq!(args.get(2).and_then(Value::as_float), Some(2.5));
        assert_eq!(args.get(3).and_then(Value::as_bool), Some(false));
        assert!(args.get(4).is_some_and(Value::is_nil));
        assert!(args.get(5).is_none());
    }

    #[test]
    fn test_empty_payload() {
        assert!(payload![].is_empty());
        assert_eq!(Payload::default(), Payload::from(()));
    }

    #[test]
    fn test_clone_shares_allocation() {
        let args = payload!["x"];
        let copy = args.clone();
        assert!(args.ptr_eq(&copy));
        assert!(!args.ptr_eq(&payload!["x"]));
        assert_eq!(args, payload!["x"]);
    }

    #[test]
    fn test_shared_values_pass_by_reference() {
        let table = Arc::new(Mutex::new(Vec::<String>::new()));
        let value = Value::from_arc(Arc::clone(&table));

        let recovered = value.downcast::<Mutex<Vec<String>>>().expect("same type");
        recovered.lock().unwrap().push("level=3".to_string());

        assert_eq!(table.lock().unwrap().as_slice(), ["level=3".to_string()]);
        assert!(value.downcast::<String>().is_none());
        assert_eq!(value, value.clone());
        assert_ne!(value, Value::shared(Mutex::new(Vec::<String>::new())));
    }

    #[test]
    fn test_kinds_do_not_coerce() {
        assert_ne!(Value::from(1), Value::from(1.0));
        assert_ne!(Value::from("1"), Value::from(1));
        assert_eq!(Value::from(1).as_float(), Some(1.0));
        assert_eq!(Value::from(None::<i64>), Value::Nil);
    }

    #[test]
    fn test_debug_output() {
        assert_eq!(format!("{:?}", payload!["a", 1]), "[\"a\", 1]");
    }
}
