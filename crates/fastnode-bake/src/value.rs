//! Dynamically typed values exchanged between module bodies.
//!
//! Module exports are shared, identity-bearing objects: cloning an [`Object`]
//! aliases it, so a holder of a module's exports sees later writes to them.

use bytes::Bytes;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::Error;

/// HTTP request handed to the server entrypoint.
pub type Request = http::Request<Bytes>;
/// HTTP response produced by the server entrypoint.
pub type Response = http::Response<Bytes>;

/// A dynamically typed value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Vec<Value>),
    Object(Object),
    Function(Function),
    Promise(Promise),
    Request(Rc<Request>),
    Response(Rc<Response>),
}

impl Value {
    /// Human-readable type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "a boolean",
            Self::Number(_) => "a number",
            Self::String(_) => "a string",
            Self::Array(_) => "an array",
            Self::Object(_) => "an object",
            Self::Function(_) => "a function",
            Self::Promise(_) => "a promise",
            Self::Request(_) => "a Request",
            Self::Response(_) => "a Response",
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Convert a JSON value. Objects become fresh [`Object`]s.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s.as_str().into()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(Object::from_entries(
                map.iter().map(|(k, v)| (k.clone(), Self::from_json(v))),
            )),
        }
    }

    /// Render as JSON for diagnostics and the CLI.
    ///
    /// Functions become `"[Function name]"`, self-referencing objects
    /// `"[Circular]"`, and `undefined` becomes `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut stack = Vec::new();
        self.to_json_inner(&mut stack)
    }

    fn to_json_inner(&self, stack: &mut Vec<*const ()>) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Undefined | Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => Json::String(s.to_string()),
            Self::Array(items) => Json::Array(items.iter().map(|v| v.to_json_inner(stack)).collect()),
            Self::Object(obj) => {
                let ptr = obj.as_ptr();
                if stack.contains(&ptr) {
                    return Json::String("[Circular]".to_string());
                }
                stack.push(ptr);
                let map = obj
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_inner(stack)))
                    .collect();
                stack.pop();
                Json::Object(map)
            }
            Self::Function(f) => Json::String(format!("[Function {}]", f.name())),
            Self::Promise(_) => Json::String("[Promise]".to_string()),
            Self::Request(req) => Json::String(format!("[Request {} {}]", req.method(), req.uri())),
            Self::Response(res) => Json::String(format!("[Response {}]", res.status().as_u16())),
        }
    }
}

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Self::Object(obj)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Self::Promise(p)
    }
}

impl From<Response> for Value {
    fn from(res: Response) -> Self {
        Self::Response(Rc::new(res))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

/// A shared, insertion-ordered, string-keyed object.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<IndexMap<String, Value>>>);

impl Object {
    /// Create a new empty object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self(Rc::new(RefCell::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    /// Own enumerable keys, in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of the current entries.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Whether both handles alias the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object").field("keys", &self.keys()).finish()
    }
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value, Error>;

/// A named native callable.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    call: Rc<NativeFn>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, Error> + 'static,
    ) -> Self {
        Self {
            name: name.into().into(),
            call: Rc::new(f),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename, keeping the same callable.
    #[must_use]
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.into(),
            call: Rc::clone(&self.call),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, Error> {
        (self.call)(args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function {}]", self.name)
    }
}

/// A cloneable, lazily driven future of a value.
#[derive(Clone)]
pub struct Promise(Shared<LocalBoxFuture<'static, Result<Value, Error>>>);

impl Promise {
    pub fn from_future(fut: impl Future<Output = Result<Value, Error>> + 'static) -> Self {
        Self(fut.boxed_local().shared())
    }

    #[must_use]
    pub fn resolved(value: Value) -> Self {
        Self::settled(Ok(value))
    }

    #[must_use]
    pub fn rejected(error: Error) -> Self {
        Self::settled(Err(error))
    }

    #[must_use]
    pub fn settled(result: Result<Value, Error>) -> Self {
        Self::from_future(futures::future::ready(result))
    }

    /// The outcome, if it is available without waiting.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<Value, Error>> {
        self.clone().now_or_never()
    }
}

impl Future for Promise {
    type Output = Result<Value, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[Promise]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_clone_aliases() {
        let a = Object::new();
        let b = a.clone();
        b.set("x", 1);

        assert!(a.ptr_eq(&b));
        assert_eq!(a.get("x").and_then(|v| v.as_f64()), Some(1.0));
        assert!(!a.ptr_eq(&Object::new()));
    }

    #[test]
    fn test_object_preserves_insertion_order() {
        let obj = Object::new();
        obj.set("b", 1);
        obj.set("a", 2);
        obj.set("c", 3);
        obj.remove("a");

        assert_eq!(obj.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_json_conversion() {
        let input = json!({"name": "app", "n": 3, "ratio": 0.5, "tags": ["a", null]});
        let value = Value::from_json(&input);

        assert_eq!(value.to_json(), input);
    }

    #[test]
    fn test_to_json_handles_functions_and_cycles() {
        let obj = Object::new();
        obj.set("render", Function::new("render", |_| Ok(Value::Undefined)));
        obj.set("self", obj.clone());

        assert_eq!(
            Value::Object(obj).to_json(),
            json!({"render": "[Function render]", "self": "[Circular]"})
        );
    }

    #[test]
    fn test_function_call() {
        let add = Function::new("add", |args| {
            let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
            Ok(Value::Number(sum))
        });

        let result = add.call(&[1.into(), 2.into()]).unwrap();
        assert_eq!(result.as_f64(), Some(3.0));
        assert_eq!(add.with_name("plus").name(), "plus");
        assert!(add.ptr_eq(&add.with_name("plus")));
    }

    #[test]
    fn test_promise_settles_immediately() {
        let resolved = Promise::resolved("ok".into());
        let rejected = Promise::rejected(Error::thrown("nope"));

        assert_eq!(
            resolved.try_result().unwrap().unwrap().as_str(),
            Some("ok")
        );
        assert!(rejected.try_result().unwrap().is_err());

        let value = futures::executor::block_on(resolved).unwrap();
        assert_eq!(value.as_str(), Some("ok"));
    }
}
