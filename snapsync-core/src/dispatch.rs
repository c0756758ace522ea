//! Thread-safe method registry using DashMap.
//!
//! Maps method names to handlers for the RPC server. Handler failures are
//! returned to the caller as application errors, never raised in the server.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::error::DispatchError;
use crate::wire::Call;

/// A registered method: positional and keyword arguments in, value or error
/// message out.
pub type Handler = Arc<dyn Fn(&[Value], &Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// Registry of callable methods.
#[derive(Default)]
pub struct MethodDispatcher {
    methods: DashMap<String, Handler>,
}

impl MethodDispatcher {
    /// Create a new empty dispatcher.
    pub fn new() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }

    /// Register a handler under `name`.
    ///
    /// Re-registering a name replaces the previous handler (last write wins).
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[Value], &Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .methods
            .insert(name.clone(), Arc::new(handler))
            .is_some()
        {
            tracing::warn!(method = %name, "Method re-registered, previous handler replaced");
        }
    }

    /// Invoke the handler registered under `name`.
    pub fn dispatch(
        &self,
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        // Clone the handler out so the shard lock is not held while it runs.
        let handler = self
            .methods
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DispatchError::MethodNotFound(name.to_string()))?;

        handler(args, kwargs).map_err(DispatchError::Application)
    }

    /// Invoke the handler for a decoded call.
    pub fn dispatch_call(&self, call: &Call) -> Result<Value, DispatchError> {
        self.dispatch(&call.method, &call.args, &call.kwargs)
    }

    /// Check if a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Get the number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if the dispatcher is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Names of all registered methods, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

impl fmt::Debug for MethodDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDispatcher")
            .field("methods", &self.method_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add(args: &[Value], kwargs: &Map<String, Value>) -> Result<Value, String> {
        let a = args.first().and_then(Value::as_i64).ok_or("missing a")?;
        let b = args.get(1).and_then(Value::as_i64).ok_or("missing b")?;
        let c = kwargs.get("c").and_then(Value::as_i64).unwrap_or(10);
        Ok(json!(a + b + c))
    }

    #[test]
    fn test_dispatch_registered() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("add", add);

        let mut kwargs = Map::new();
        kwargs.insert("c".to_string(), json!(3));
        let result = dispatcher.dispatch("add", &[json!(1), json!(2)], &kwargs);
        assert_eq!(result, Ok(json!(6)));
    }

    #[test]
    fn test_dispatch_method_not_found() {
        let dispatcher = MethodDispatcher::new();
        let result = dispatcher.dispatch("nonexistent", &[], &Map::new());
        assert_eq!(
            result,
            Err(DispatchError::MethodNotFound("nonexistent".to_string()))
        );
    }

    #[test]
    fn test_dispatch_application_error() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("add", add);

        let result = dispatcher.dispatch("add", &[json!(1)], &Map::new());
        assert_eq!(
            result,
            Err(DispatchError::Application("missing b".to_string()))
        );
    }

    #[test]
    fn test_reregister_last_write_wins() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("ping", |_, _| Ok(json!("first")));
        dispatcher.register("ping", |_, _| Ok(json!("second")));

        assert_eq!(dispatcher.len(), 1);
        assert_eq!(
            dispatcher.dispatch("ping", &[], &Map::new()),
            Ok(json!("second"))
        );
    }

    #[test]
    fn test_dispatch_call() {
        let dispatcher = MethodDispatcher::new();
        dispatcher.register("add", add);

        let call = Call::new("add").arg(2).arg(2).kwarg("c", 0);
        assert_eq!(dispatcher.dispatch_call(&call), Ok(json!(4)));
        assert_eq!(dispatcher.method_names(), vec!["add".to_string()]);
    }
}
