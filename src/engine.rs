//! Engine capability surface: named methods over positional JSON arguments.
//!
//! The protocol has no compile-time knowledge of the engine's shape. Each
//! engine instead builds a [`DispatchTable`] once at host startup, mapping
//! method-name strings to typed invocation wrappers; the name set doubles as
//! the readiness payload announced to the UI side.

use crate::error::EngineError;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

/// Boxed future returned by asynchronous engine methods.
///
/// Not required to be `Send`: engines have thread-local state and stay
/// pinned to the worker thread's local runtime.
pub type MethodFuture = Pin<Box<dyn Future<Output = Result<JsonValue, EngineError>>>>;

/// Synchronous engine method. Runs to completion before the host handles the
/// next message.
pub type SyncHandler<E> = Box<dyn Fn(&mut E, Vec<JsonValue>) -> Result<JsonValue, EngineError>>;

/// Asynchronous engine method. Spawned on the worker's local task set, so
/// invocations may overlap when the engine itself is non-blocking.
pub type AsyncHandler<E> = Box<dyn Fn(Rc<RefCell<E>>, Vec<JsonValue>) -> MethodFuture>;

/// One invocable entry in a [`DispatchTable`].
pub enum MethodKind<E> {
    Sync(SyncHandler<E>),
    Async(AsyncHandler<E>),
}

/// Name -> invocation mapping, built once when the engine host starts.
pub struct DispatchTable<E> {
    methods: HashMap<String, MethodKind<E>>,
}

impl<E> DispatchTable<E> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a synchronous method.
    pub fn sync_method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut E, Vec<JsonValue>) -> Result<JsonValue, EngineError> + 'static,
    ) -> Self {
        self.methods
            .insert(name.into(), MethodKind::Sync(Box::new(f)));
        self
    }

    /// Register an asynchronous method.
    pub fn async_method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(Rc<RefCell<E>>, Vec<JsonValue>) -> MethodFuture + 'static,
    ) -> Self {
        self.methods
            .insert(name.into(), MethodKind::Async(Box::new(f)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&MethodKind<E>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Invocable method names, sorted for a stable readiness payload.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<E> Default for DispatchTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The opaque rendering engine adapted by the host.
///
/// Implementations are heavyweight and stateful; one instance lives on the
/// worker thread for the lifetime of its channel.
pub trait RenderEngine: Sized + 'static {
    /// Build the dispatch table for this engine. Called once at host startup.
    fn dispatch_table() -> DispatchTable<Self>;

    /// Release engine resources during shutdown.
    fn release(&mut self) {}
}

/// Extract and deserialize the positional argument at `index`.
///
/// A missing argument is treated as JSON `null` so optional trailing
/// arguments deserialize into `Option<T>`.
pub fn arg<T: DeserializeOwned>(args: &[JsonValue], index: usize) -> Result<T, EngineError> {
    let value = args.get(index).cloned().unwrap_or(JsonValue::Null);
    serde_json::from_value(value)
        .map_err(|err| EngineError::arguments(format!("argument {index}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Counter {
        hits: u32,
    }

    impl RenderEngine for Counter {
        fn dispatch_table() -> DispatchTable<Self> {
            DispatchTable::new()
                .sync_method("bump", |engine: &mut Counter, _args| {
                    engine.hits += 1;
                    Ok(json!(engine.hits))
                })
                .async_method("bumpLater", |engine, _args| {
                    Box::pin(async move {
                        let mut engine = engine.borrow_mut();
                        engine.hits += 1;
                        Ok(json!(engine.hits))
                    })
                })
        }
    }

    #[test]
    fn table_lists_sorted_names() {
        let table = Counter::dispatch_table();
        assert_eq!(table.method_names(), vec!["bump", "bumpLater"]);
        assert!(table.contains("bump"));
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn sync_entry_invokes_engine() {
        let table = Counter::dispatch_table();
        let mut engine = Counter { hits: 0 };
        let Some(MethodKind::Sync(f)) = table.get("bump") else {
            panic!("bump should be a sync method");
        };
        assert_eq!(f(&mut engine, Vec::new()).unwrap(), json!(1));
        assert_eq!(f(&mut engine, Vec::new()).unwrap(), json!(2));
    }

    #[test]
    fn arg_extracts_positionally() {
        let args = vec![json!(7), json!("fast")];
        let page: u32 = arg(&args, 0).unwrap();
        let mode: String = arg(&args, 1).unwrap();
        assert_eq!(page, 7);
        assert_eq!(mode, "fast");
    }

    #[test]
    fn arg_reports_type_mismatch() {
        let args = vec![json!("not a number")];
        let err = arg::<u32>(&args, 0).unwrap_err();
        assert!(err.is_arguments());
    }

    #[test]
    fn missing_arg_is_null() {
        let args: Vec<JsonValue> = Vec::new();
        let opt: Option<String> = arg(&args, 0).unwrap();
        assert!(opt.is_none());
    }
}
