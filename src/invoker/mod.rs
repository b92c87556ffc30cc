//! Target invocation -- one outbound call per trigger.

use async_trait::async_trait;

pub mod http;

pub use self::http::HttpInvoker;

/// Status reported when the call exceeded the invoker's timeout.
pub const TIMEOUT_STATUS: u16 = 408;

/// What happened on the wire for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub status_code: Option<u16>,
    pub success: bool,
    /// Transport error message, if the call never produced a response.
    pub error: Option<String>,
}

impl Invocation {
    /// A response was received. Any status is a completed call; only 2xx counts as success.
    pub fn responded(status: u16) -> Self {
        Self {
            status_code: Some(status),
            success: (200..300).contains(&status),
            error: None,
        }
    }

    /// No usable response: timeout, refused connection, DNS failure...
    pub fn failed(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status_code,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Anything that can call a job target.
///
/// Implementations must not return early without an `Invocation`: every
/// transport failure is folded into a failed result so the caller can
/// always record an outcome.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, target: &str) -> Invocation;
}
