//! Control surface.
//!
//! The handful of attributes a management agent reads and writes to drive a
//! session: start/stop, whether a session is running, the last terminal
//! event, and which device this instance manages. Both sides implement it,
//! so the agent does not need to know which domain it runs in.

use crate::error::{EventCode, SessionError};

/// Session control attributes.
pub trait TrustedTouchControl {
    /// Start (`true`) or stop (`false`) a session.
    async fn set_session(&self, active: bool) -> Result<(), SessionError>;

    /// Whether a session is established.
    fn session_active(&self) -> bool;

    /// Last terminal event, `EventCode::None` if none since it was cleared.
    fn last_event(&self) -> EventCode;

    /// Clear the last event. Only `0` is accepted.
    fn write_last_event(&self, value: u8) -> Result<(), SessionError>;

    /// Resource tag this instance serves, e.g. `"primary"`.
    fn resource_kind(&self) -> &'static str;

    /// Wait until the next terminal event is published.
    async fn wait_event(&self) -> EventCode;

    /// Textual form of [`set_session`](Self::set_session).
    async fn write_session(&self, request: &str) -> Result<(), SessionError> {
        let active = parse_session_request(request)?;
        self.set_session(active).await
    }
}

/// Parse a session request: `"1"` starts, `"0"` stops.
///
/// Surrounding whitespace (a trailing newline from `echo`) is ignored.
pub fn parse_session_request(request: &str) -> Result<bool, SessionError> {
    match request.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(SessionError::InvalidValue),
    }
}
