use crate::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Reserved method name for the host's unsolicited readiness notification.
///
/// The payload is the array of invocable engine method names.
pub const READY_METHOD: &str = "ready";

/// Reserved method name requesting engine-host teardown. Never replied to.
pub const SHUTDOWN_METHOD: &str = "shutdown";

// ============================================================================
// Call (UI side -> engine host)
// ============================================================================

/// One engine call posted across the thread boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
    /// Engine method name.
    pub method: String,
    /// Positional arguments.
    pub args: Vec<JsonValue>,
    /// Pairs this call with its reply.
    pub correlation_id: CorrelationId,
}

impl CallMessage {
    pub fn new(
        method: impl Into<String>,
        args: Vec<JsonValue>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            method: method.into(),
            args,
            correlation_id,
        }
    }

    /// Create the best-effort teardown notice sent right before the channel
    /// terminates its worker.
    pub fn shutdown() -> Self {
        Self::new(SHUTDOWN_METHOD, Vec::new(), CorrelationId::fresh())
    }

    pub fn is_shutdown(&self) -> bool {
        self.method == SHUTDOWN_METHOD
    }
}

// ============================================================================
// Reply (engine host -> UI side)
// ============================================================================

/// Reply envelope posted back by the engine host.
///
/// Carries either a call response (correlation ID present) or an unsolicited
/// notification such as [`READY_METHOD`] (correlation ID absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Method name the payload belongs to.
    pub method: String,
    /// Pairs a response with its pending call; `None` for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Success or failure.
    pub success: bool,
    /// Result payload (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    /// Error message if failed (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    /// Create a successful call response.
    pub fn ok(method: impl Into<String>, correlation_id: CorrelationId, data: JsonValue) -> Self {
        Self {
            method: method.into(),
            correlation_id: Some(correlation_id),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create a failed call response.
    pub fn err(
        method: impl Into<String>,
        correlation_id: CorrelationId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            correlation_id: Some(correlation_id),
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Create an unsolicited notification with no pending call to settle.
    pub fn notification(method: impl Into<String>, data: JsonValue) -> Self {
        Self {
            method: method.into(),
            correlation_id: None,
            success: true,
            data: Some(data),
            error: None,
        }
    }
}
