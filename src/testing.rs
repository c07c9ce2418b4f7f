//! Shared test doubles for the worker bridge.
//!
//! Available to in-crate tests and, behind the `testing` feature, to
//! downstream crates wiring their own engines: a scripted notation-engine
//! stand-in with the method surface the session workflow drives, and a
//! manually-driven idle scheduler for deterministic slice control.

use crate::engine::{DispatchTable, RenderEngine, arg};
use crate::error::EngineError;
use crate::idle::{IdleCallback, IdleDeadline, IdleHandle, IdleScheduler};
use serde_json::{Value as JsonValue, json};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Minimal notation-engine stand-in.
///
/// `loadData` accepts a `pages:N` marker to control the reported page count;
/// `renderToSVG` is asynchronous with an optional reverse stagger so later
/// pages complete first, exercising out-of-order settlement.
pub struct StubEngine {
    document: Option<String>,
    options: JsonValue,
    render_stagger: Duration,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::staggered(Duration::ZERO)
    }

    /// Stagger renders so page `p` of `n` sleeps `(n - p) * step`.
    pub fn staggered(step: Duration) -> Self {
        Self {
            document: None,
            options: JsonValue::Null,
            render_stagger: step,
        }
    }

    /// Preload a document without going through `loadData`.
    pub fn set_document(&mut self, contents: &str) {
        self.document = Some(contents.to_string());
    }

    fn page_count(&self) -> u32 {
        self.document
            .as_deref()
            .and_then(|doc| doc.strip_prefix("pages:"))
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(1)
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderEngine for StubEngine {
    fn dispatch_table() -> DispatchTable<Self> {
        DispatchTable::new()
            .sync_method("loadData", |engine: &mut StubEngine, args| {
                let contents: String = arg(&args, 0)?;
                if contents.is_empty() {
                    return Err(EngineError::invocation("empty document"));
                }
                engine.document = Some(contents);
                Ok(json!(true))
            })
            .sync_method("getPageCount", |engine, _args| {
                Ok(json!(engine.page_count()))
            })
            .sync_method("setOptions", |engine, args| {
                engine.options = args.into_iter().next().unwrap_or(JsonValue::Null);
                Ok(json!(true))
            })
            .sync_method("getOptions", |engine, _args| Ok(engine.options.clone()))
            .sync_method("getMEI", |_engine, _args| Ok(json!("<mei/>")))
            .async_method("renderToSVG", |engine, args| {
                Box::pin(async move {
                    let page: u32 = arg(&args, 0)?;
                    let (step, total) = {
                        let engine = engine.borrow();
                        (engine.render_stagger, engine.page_count())
                    };
                    if page == 0 || page > total {
                        return Err(EngineError::arguments(format!(
                            "page {page} out of range 1..={total}"
                        )));
                    }
                    if !step.is_zero() {
                        tokio::time::sleep(step * (total - page)).await;
                    }
                    Ok(json!(format!("<svg data-page=\"{page}\"/>")))
                })
            })
    }

    fn release(&mut self) {
        self.document = None;
    }
}

/// Manually driven [`IdleScheduler`]: requests queue up until the test fires
/// them, one slice at a time.
pub struct ManualIdleScheduler {
    queue: RefCell<VecDeque<(IdleHandle, IdleCallback)>>,
    next_id: Cell<u64>,
}

impl ManualIdleScheduler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            queue: RefCell::new(VecDeque::new()),
            next_id: Cell::new(0),
        })
    }

    /// Number of outstanding idle-work requests.
    pub fn outstanding(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Fire the oldest outstanding request with the given slice budget.
    /// Returns false if none was outstanding.
    pub fn fire(&self, deadline: IdleDeadline) -> bool {
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some((_, callback)) => {
                callback(&deadline);
                true
            }
            None => false,
        }
    }

    /// Fire with generous budgets until no request is outstanding.
    pub fn drain(&self) {
        while self.fire(generous_deadline()) {}
    }
}

impl IdleScheduler for ManualIdleScheduler {
    fn request_idle_work(&self, callback: IdleCallback) -> IdleHandle {
        let handle = IdleHandle::new(self.next_id.get());
        self.next_id.set(handle.raw() + 1);
        self.queue.borrow_mut().push_back((handle, callback));
        handle
    }

    fn cancel_idle_work(&self, handle: IdleHandle) {
        self.queue
            .borrow_mut()
            .retain(|(queued, _)| *queued != handle);
    }
}

/// A slice budget that never runs out within a test.
pub fn generous_deadline() -> IdleDeadline {
    IdleDeadline::new(|| Duration::from_secs(1))
}

/// A slice budget that admits exactly `tasks` drain-loop iterations.
pub fn slice_budget(tasks: usize) -> IdleDeadline {
    let remaining = Cell::new(tasks);
    IdleDeadline::new(move || {
        if remaining.get() > 0 {
            remaining.set(remaining.get() - 1);
            Duration::from_millis(1)
        } else {
            Duration::ZERO
        }
    })
}
