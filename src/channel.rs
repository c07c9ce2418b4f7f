//! UI-side endpoint of the worker bridge.
//!
//! One channel instance owns one worker thread running the engine host. It
//! tags outgoing calls with correlation IDs, keeps the pending-request table
//! (the sole source of truth for calls in flight), fans inbound events out
//! to registered listeners, and tears everything down deterministically.

use crate::correlation::CorrelationId;
use crate::engine::RenderEngine;
use crate::error::{ChannelError, EngineError};
use crate::host;
use crate::message::{CallMessage, Reply};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};

/// Callback invoked for every inbound event matching a subscribed method
/// name. Receives the event payload.
pub type ListenerFn = Arc<dyn Fn(&JsonValue) + Send + Sync>;

/// Token identifying one registered listener.
///
/// Returned by [`WorkerChannel::add_listener`]; removal is by token and
/// idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Bookkeeping for one in-flight call, destroyed exactly once: on matching
/// reply receipt or on channel teardown.
struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Result<JsonValue, ChannelError>>,
}

#[derive(Default)]
struct Registry {
    /// Method name -> listeners in registration order.
    listeners: HashMap<String, Vec<(ListenerId, ListenerFn)>>,
    next_id: u64,
}

impl Registry {
    fn snapshot(&self, method: &str) -> Vec<ListenerFn> {
        self.listeners
            .get(method)
            .map(|entries| entries.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default()
    }
}

struct Shared {
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
    registry: Mutex<Registry>,
    destroyed: AtomicBool,
}

/// Typed call/response endpoint over one background engine worker.
pub struct WorkerChannel {
    shared: Arc<Shared>,
    to_worker: mpsc::UnboundedSender<CallMessage>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerChannel {
    /// Spawn the worker thread and start dispatching its replies.
    ///
    /// The factory runs on the worker thread; the engine never crosses the
    /// boundary. Must be called within a tokio runtime.
    pub fn spawn<E, F>(factory: F) -> Result<Self, ChannelError>
    where
        E: RenderEngine,
        F: FnOnce() -> Result<E, EngineError> + Send + 'static,
    {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let worker = std::thread::Builder::new()
            .name("engine-worker".into())
            .spawn(move || {
                // A worker-side panic is a transport error: logged, never
                // correlated to a specific pending call.
                let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                    host::worker_main(factory, call_rx, reply_tx)
                }));
                if run.is_err() {
                    log::error!("engine worker terminated abnormally");
                }
            })
            .map_err(|err| ChannelError::Spawn(err.to_string()))?;

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            registry: Mutex::new(Registry::default()),
            destroyed: AtomicBool::new(false),
        });
        let pump = tokio::spawn(pump(shared.clone(), reply_rx));

        Ok(Self {
            shared,
            to_worker: call_tx,
            pump: Mutex::new(Some(pump)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Issue a call. The message is posted immediately; the returned future
    /// settles when the matching reply arrives.
    ///
    /// Responses may settle out of call order; the correlation ID is the
    /// only matching key. Fails fast with [`ChannelError::Destroyed`] after
    /// [`WorkerChannel::destroy`].
    pub fn call(
        &self,
        method: impl Into<String>,
        args: Vec<JsonValue>,
        correlation_id: Option<CorrelationId>,
    ) -> impl Future<Output = Result<JsonValue, ChannelError>> + 'static {
        let prepared = self.prepare_call(method.into(), args, correlation_id);
        async move {
            match prepared {
                Err(err) => Err(err),
                Ok(rx) => match rx.await {
                    Ok(outcome) => outcome,
                    // Settlement handle dropped without a reply: teardown.
                    Err(_) => Err(ChannelError::Destroyed),
                },
            }
        }
    }

    fn prepare_call(
        &self,
        method: String,
        args: Vec<JsonValue>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<oneshot::Receiver<Result<JsonValue, ChannelError>>, ChannelError> {
        if self.is_destroyed() {
            return Err(ChannelError::Destroyed);
        }

        let (cid, rx) = {
            let mut pending = self.shared.pending.lock();
            let cid = match correlation_id {
                Some(id) => {
                    if pending.contains_key(&id) {
                        return Err(ChannelError::CorrelationInUse(id.to_string()));
                    }
                    id
                }
                // Retry generation while the ID collides with a call in flight.
                None => loop {
                    let id = CorrelationId::fresh();
                    if !pending.contains_key(&id) {
                        break id;
                    }
                },
            };
            let (tx, rx) = oneshot::channel();
            pending.insert(
                cid.clone(),
                PendingRequest {
                    method: method.clone(),
                    tx,
                },
            );
            (cid, rx)
        };

        if self
            .to_worker
            .send(CallMessage::new(method, args, cid.clone()))
            .is_err()
        {
            // Worker endpoint gone; roll the record back.
            self.shared.pending.lock().remove(&cid);
            return Err(ChannelError::Disconnected);
        }

        Ok(rx)
    }

    /// Subscribe to every inbound event named `method`, in registration
    /// order relative to other listeners on the same name. Independent of,
    /// and in addition to, pending-call settlement.
    pub fn add_listener(
        &self,
        method: impl Into<String>,
        callback: impl Fn(&JsonValue) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut registry = self.shared.registry.lock();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry
            .listeners
            .entry(method.into())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener by token. Unknown or already-removed tokens are a
    /// no-op.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut registry = self.shared.registry.lock();
        for entries in registry.listeners.values_mut() {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Number of calls in flight.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Tear the channel down: best-effort shutdown notice to the engine
    /// host (not awaited), detach the reply handler, clear the listener
    /// registry, and reject every pending call with
    /// [`ChannelError::Destroyed`].
    ///
    /// Calling destroy a second time is a no-op.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.to_worker.send(CallMessage::shutdown());

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.shared.registry.lock().listeners.clear();

        let drained: Vec<PendingRequest> = {
            let mut pending = self.shared.pending.lock();
            pending.drain().map(|(_, request)| request).collect()
        };
        for request in drained {
            log::debug!("rejecting in-flight call to `{}`", request.method);
            let _ = request.tx.send(Err(ChannelError::Destroyed));
        }

        // The worker exits once it sees the shutdown notice; detach rather
        // than block the control thread on a join.
        let _ = self.worker.lock().take();
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Inbound reply handler: fan out to listeners, then settle the pending
/// record matching the correlation ID. Replies matching neither are dropped
/// silently.
async fn pump(shared: Arc<Shared>, mut replies: mpsc::UnboundedReceiver<Reply>) {
    while let Some(reply) = replies.recv().await {
        if reply.success {
            let callbacks = shared.registry.lock().snapshot(&reply.method);
            if !callbacks.is_empty() {
                let data = reply.data.clone().unwrap_or(JsonValue::Null);
                for callback in callbacks {
                    callback(&data);
                }
            }
        }

        if let Some(cid) = &reply.correlation_id {
            let request = shared.pending.lock().remove(cid);
            if let Some(request) = request {
                let outcome = if reply.success {
                    Ok(reply.data.unwrap_or(JsonValue::Null))
                } else {
                    Err(ChannelError::Call {
                        method: reply.method,
                        message: reply.error.unwrap_or_default(),
                    })
                };
                let _ = request.tx.send(outcome);
            }
        }
    }
}
