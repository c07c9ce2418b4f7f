//! Background-side adapter between protocol messages and the engine.
//!
//! The host owns the engine instance for the lifetime of its worker thread:
//! it resolves method names against the dispatch table built at startup,
//! normalizes sync and async invocations into uniform reply envelopes, and
//! announces readiness before handling any call.

use crate::correlation::CorrelationId;
use crate::engine::{DispatchTable, MethodKind, RenderEngine};
use crate::error::EngineError;
use crate::message::{CallMessage, READY_METHOD, Reply};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::mpsc;

/// Adapter translating [`CallMessage`]s into engine invocations.
pub struct EngineHost<E: RenderEngine> {
    engine: Rc<RefCell<E>>,
    table: DispatchTable<E>,
    outbound: mpsc::UnboundedSender<Reply>,
}

impl<E: RenderEngine> EngineHost<E> {
    pub fn new(engine: E, outbound: mpsc::UnboundedSender<Reply>) -> Self {
        Self {
            engine: Rc::new(RefCell::new(engine)),
            table: E::dispatch_table(),
            outbound,
        }
    }

    /// Announce readiness, carrying the invocable method-name set.
    ///
    /// The orchestration layer relies on this notification before issuing
    /// any configuration call.
    fn announce_ready(&self) {
        let names = self.table.method_names();
        let _ = self
            .outbound
            .send(Reply::notification(READY_METHOD, JsonValue::from(names)));
    }

    /// Receive loop. Must run inside a `LocalSet` so async invocations can
    /// be spawned; returns when the shutdown method arrives or the inbound
    /// channel closes.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<CallMessage>) {
        self.announce_ready();

        while let Some(msg) = inbound.recv().await {
            if msg.is_shutdown() {
                inbound.close();
                self.engine.borrow_mut().release();
                log::debug!("engine host shut down");
                break;
            }
            self.dispatch(msg);
        }
    }

    fn dispatch(&self, msg: CallMessage) {
        let CallMessage {
            method,
            args,
            correlation_id,
        } = msg;

        match self.table.get(&method) {
            None => {
                let _ = self.outbound.send(Reply::err(
                    &method,
                    correlation_id,
                    format!("no invocable engine method named `{method}`"),
                ));
            }
            Some(MethodKind::Sync(f)) => {
                let result = {
                    let mut engine = self.engine.borrow_mut();
                    f(&mut engine, args)
                };
                let _ = self.outbound.send(reply_for(&method, correlation_id, result));
            }
            Some(MethodKind::Async(f)) => {
                let fut = f(self.engine.clone(), args);
                let outbound = self.outbound.clone();
                tokio::task::spawn_local(async move {
                    let result = fut.await;
                    let _ = outbound.send(reply_for(&method, correlation_id, result));
                });
            }
        }
    }
}

fn reply_for(
    method: &str,
    correlation_id: CorrelationId,
    result: Result<JsonValue, EngineError>,
) -> Reply {
    match result {
        Ok(data) => Reply::ok(method, correlation_id, data),
        Err(err) => Reply::err(method, correlation_id, err.to_string()),
    }
}

/// Worker thread entry: build a local runtime, construct the engine, and run
/// the host until shutdown.
///
/// A construction failure is a transport-level error: logged here, never
/// correlated to a specific pending call.
pub(crate) fn worker_main<E, F>(
    factory: F,
    inbound: mpsc::UnboundedReceiver<CallMessage>,
    outbound: mpsc::UnboundedSender<Reply>,
) where
    E: RenderEngine,
    F: FnOnce() -> Result<E, EngineError>,
{
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            log::error!("engine worker runtime failed to start: {err}");
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        let engine = match factory() {
            Ok(engine) => engine,
            Err(err) => {
                log::error!("engine construction failed: {err}");
                return;
            }
        };
        EngineHost::new(engine, outbound).run(inbound).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CorrelationId;
    use crate::testing::StubEngine;
    use serde_json::json;

    async fn next_reply(rx: &mut mpsc::UnboundedReceiver<Reply>) -> Reply {
        rx.recv().await.expect("host should post a reply")
    }

    fn call(method: &str, args: Vec<JsonValue>, cid: &str) -> CallMessage {
        CallMessage::new(method, args, CorrelationId::from(cid))
    }

    #[tokio::test]
    async fn announces_ready_before_any_reply() {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let host = EngineHost::new(StubEngine::new(), reply_tx);
                let run = tokio::task::spawn_local(host.run(call_rx));

                call_tx
                    .send(call("getMEI", vec![], "q-1"))
                    .expect("host alive");

                let ready = next_reply(&mut reply_rx).await;
                assert_eq!(ready.method, READY_METHOD);
                assert!(ready.correlation_id.is_none());
                let names = ready.data.expect("ready carries method names");
                assert!(
                    names
                        .as_array()
                        .expect("names are an array")
                        .iter()
                        .any(|n| n == "loadData")
                );

                let reply = next_reply(&mut reply_rx).await;
                assert_eq!(reply.method, "getMEI");
                assert_eq!(reply.correlation_id, Some(CorrelationId::from("q-1")));

                drop(call_tx);
                run.await.expect("host loop exits");
            })
            .await;
    }

    #[tokio::test]
    async fn unknown_method_gets_explicit_failure() {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let host = EngineHost::new(StubEngine::new(), reply_tx);
                let run = tokio::task::spawn_local(host.run(call_rx));

                let _ready = next_reply(&mut reply_rx).await;
                call_tx
                    .send(call("transposeScore", vec![], "x-9"))
                    .expect("host alive");

                let reply = next_reply(&mut reply_rx).await;
                assert!(!reply.success);
                assert_eq!(reply.correlation_id, Some(CorrelationId::from("x-9")));
                assert!(reply.error.expect("failure message").contains("transposeScore"));

                drop(call_tx);
                run.await.expect("host loop exits");
            })
            .await;
    }

    #[tokio::test]
    async fn shutdown_stops_dispatch_without_reply() {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let host = EngineHost::new(StubEngine::new(), reply_tx);
                let run = tokio::task::spawn_local(host.run(call_rx));

                let _ready = next_reply(&mut reply_rx).await;
                call_tx.send(CallMessage::shutdown()).expect("host alive");
                run.await.expect("host loop exits");

                // The reply channel closes with nothing after the ready event.
                assert!(reply_rx.recv().await.is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn async_methods_overlap_and_settle_by_correlation() {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut engine = StubEngine::staggered(std::time::Duration::from_millis(10));
                engine.set_document("pages:3");
                let host = EngineHost::new(engine, reply_tx);
                let run = tokio::task::spawn_local(host.run(call_rx));

                let _ready = next_reply(&mut reply_rx).await;
                for page in 1..=3 {
                    call_tx
                        .send(call("renderToSVG", vec![json!(page)], &format!("p-{page}")))
                        .expect("host alive");
                }

                // Page 3 has the shortest stagger, so replies arrive 3, 2, 1.
                let mut order = Vec::new();
                for _ in 0..3 {
                    let reply = next_reply(&mut reply_rx).await;
                    assert!(reply.success);
                    order.push(reply.correlation_id.expect("call reply").to_string());
                }
                assert_eq!(order, vec!["p-3", "p-2", "p-1"]);

                drop(call_tx);
                run.await.expect("host loop exits");
            })
            .await;
    }
}
