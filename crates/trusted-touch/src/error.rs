//! Error taxonomy and the published event code.
//!
//! Every failure a caller can see is a [`SessionError`]. Failures that abort a
//! session also publish an [`EventCode`] readable through the control surface
//! until it is cleared. Raw resource-manager or hardware errors never leave
//! this crate.

use core::fmt;

// ── Event code ───────────────────────────────────────────────────────────────

/// Abort reason published through `last_event`.
///
/// `None` (0) means no abort since the code was last cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EventCode {
    /// No event pending.
    #[default]
    None = 0,
    /// Lending memory or the interrupt failed.
    LendFailure = 1,
    /// The lend acknowledgements did not match the issued transfers.
    LendNotificationFailure = 2,
    /// Accepting an offered resource failed.
    AcceptFailure = 3,
    /// The offered resources did not match the expected descriptor.
    FunctionalFailure = 4,
    /// Releasing a resource back to the owner failed.
    ReleaseFailure = 5,
    /// Reclaiming a resource failed.
    ReclaimFailure = 6,
    /// The bus failed while the session was running.
    TransportFailure = 7,
}

impl EventCode {
    /// Every code, in numeric order.
    pub const ALL: [EventCode; 8] = [
        EventCode::None,
        EventCode::LendFailure,
        EventCode::LendNotificationFailure,
        EventCode::AcceptFailure,
        EventCode::FunctionalFailure,
        EventCode::ReleaseFailure,
        EventCode::ReclaimFailure,
        EventCode::TransportFailure,
    ];

    /// Decode a stored code. Unknown values read as `None`.
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|code| *code as u8 == raw)
            .unwrap_or(Self::None)
    }

    /// Short identifier used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LendFailure => "lend-failure",
            Self::LendNotificationFailure => "lend-notification-failure",
            Self::AcceptFailure => "accept-failure",
            Self::FunctionalFailure => "functional-failure",
            Self::ReleaseFailure => "release-failure",
            Self::ReclaimFailure => "reclaim-failure",
            Self::TransportFailure => "transport-failure",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Session error ────────────────────────────────────────────────────────────

/// Errors returned by session operations and the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// Lending memory or the interrupt failed; the session was unwound.
    #[error("lend failed")]
    LendFailure,
    /// Lend acknowledgements did not match; the session was unwound.
    #[error("lend notification mismatch")]
    LendNotificationFailure,
    /// Accepting a resource failed; the session was unwound.
    #[error("accept failed")]
    AcceptFailure,
    /// The offer did not match the expected descriptor; nothing was accepted.
    #[error("offered resources do not match the descriptor")]
    FunctionalFailure,
    /// Releasing a resource failed; the session was unwound.
    #[error("release failed")]
    ReleaseFailure,
    /// Reclaiming a resource failed; the session was unwound.
    #[error("reclaim failed")]
    ReclaimFailure,
    /// A bus failure aborted the session.
    #[error("transport failure")]
    TransportFailure,
    /// Not every lend notification has arrived yet; call again later.
    #[error("notifications pending")]
    NotificationsPending,
    /// A session is already open or a transition is in progress.
    #[error("session busy")]
    Busy,
    /// The device is suspended, or the request does not apply to the current state.
    #[error("invalid state")]
    InvalidState,
    /// An abort is waiting to be unwound.
    #[error("abort pending")]
    AbortPending,
    /// Trusted touch is disabled by configuration.
    #[error("trusted touch not supported")]
    Unsupported,
    /// A control value could not be parsed or is not allowed.
    #[error("invalid value")]
    InvalidValue,
}

impl SessionError {
    /// The event code published when this error aborts a session.
    ///
    /// Returns `EventCode::None` for errors that are rejections rather than
    /// aborts (nothing is unwound, nothing is published).
    #[must_use]
    pub fn event_code(self) -> EventCode {
        match self {
            Self::LendFailure => EventCode::LendFailure,
            Self::LendNotificationFailure => EventCode::LendNotificationFailure,
            Self::AcceptFailure => EventCode::AcceptFailure,
            Self::FunctionalFailure => EventCode::FunctionalFailure,
            Self::ReleaseFailure => EventCode::ReleaseFailure,
            Self::ReclaimFailure => EventCode::ReclaimFailure,
            Self::TransportFailure => EventCode::TransportFailure,
            Self::NotificationsPending
            | Self::Busy
            | Self::InvalidState
            | Self::AbortPending
            | Self::Unsupported
            | Self::InvalidValue => EventCode::None,
        }
    }

    /// Returns `true` if the caller may simply retry later.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::NotificationsPending | Self::Busy)
    }
}

impl From<EventCode> for SessionError {
    /// Map an abort code back to the error surfaced to the caller.
    fn from(code: EventCode) -> Self {
        match code {
            EventCode::LendFailure => Self::LendFailure,
            EventCode::LendNotificationFailure => Self::LendNotificationFailure,
            EventCode::AcceptFailure => Self::AcceptFailure,
            EventCode::FunctionalFailure => Self::FunctionalFailure,
            EventCode::ReleaseFailure => Self::ReleaseFailure,
            EventCode::ReclaimFailure => Self::ReclaimFailure,
            EventCode::TransportFailure => Self::TransportFailure,
            EventCode::None => Self::InvalidState,
        }
    }
}
