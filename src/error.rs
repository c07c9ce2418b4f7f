/// Why a channel call failed
///
/// Returned from [`crate::WorkerChannel::call`] futures. A successful call
/// settles with the reply payload instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was destroyed: either the call was issued after
    /// `destroy()`, or teardown drained the call while it was in flight.
    Destroyed,

    /// The worker endpoint is gone (engine thread exited) but the channel
    /// was not destroyed.
    Disconnected,

    /// A caller-supplied correlation ID already has a pending record.
    CorrelationInUse(String),

    /// The engine host reported a dispatch failure for this call.
    Call { method: String, message: String },

    /// The worker thread could not be spawned.
    Spawn(String),
}

impl ChannelError {
    /// Returns true if the failure came from channel teardown.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Returns true if the engine host rejected the call itself.
    pub fn is_call_failure(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Destroyed => write!(f, "worker channel destroyed"),
            Self::Disconnected => write!(f, "worker endpoint disconnected"),
            Self::CorrelationInUse(id) => {
                write!(f, "correlation ID `{id}` already has a pending call")
            }
            Self::Call { method, message } => write!(f, "call to `{method}` failed: {message}"),
            Self::Spawn(msg) => write!(f, "failed to spawn engine worker: {msg}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Why an engine invocation failed on the worker side
///
/// Produced by dispatch-table closures and engine construction; surfaced to
/// callers as [`ChannelError::Call`] in the failure reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Construction of the engine instance failed.
    Initialization(String),

    /// Positional arguments did not match the method's expectations.
    Arguments(String),

    /// The method ran and failed inside the engine.
    Invocation(String),
}

impl EngineError {
    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    pub fn arguments(msg: impl Into<String>) -> Self {
        Self::Arguments(msg.into())
    }

    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Returns true if the caller passed unusable arguments.
    pub fn is_arguments(&self) -> bool {
        matches!(self, Self::Arguments(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialization(msg) => write!(f, "engine initialization failed: {msg}"),
            Self::Arguments(msg) => write!(f, "invalid arguments: {msg}"),
            Self::Invocation(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
