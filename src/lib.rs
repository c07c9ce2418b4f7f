//! Asynchronous bridge between a UI thread and a worker-hosted notation
//! rendering engine.
//!
//! One [`WorkerChannel`] per rendering session owns a background thread
//! running the engine behind an [`EngineHost`]. Calls cross the boundary as
//! correlation-tagged messages and settle as futures; unsolicited events
//! (such as the host's readiness announcement) fan out to registered
//! listeners. The [`IdleTaskQueue`] defers bulk UI materialization into host
//! idle slices, and [`RenderSession`] sequences the document workflow over
//! both.

mod channel;
mod correlation;
mod engine;
mod error;
mod host;
mod idle;
mod message;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{ListenerFn, ListenerId, WorkerChannel};
pub use correlation::{CorrelationId, generate_segmented_id};
pub use engine::{
    AsyncHandler, DispatchTable, MethodFuture, MethodKind, RenderEngine, SyncHandler, arg,
};
pub use error::{ChannelError, EngineError};
pub use host::EngineHost;
pub use idle::{
    IdleCallback, IdleDeadline, IdleHandle, IdleScheduler, IdleTask, IdleTaskQueue,
    LocalIdleScheduler,
};
pub use message::{CallMessage, READY_METHOD, Reply, SHUTDOWN_METHOD};
pub use session::{
    GET_PAGE_COUNT, LOAD_DATA, PanZoomView, RENDER_TO_SVG, RenderSession, SET_OPTIONS,
};
