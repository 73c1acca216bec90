//! Trusted touch handover
//!
//! Moves a touch controller (its IO memory, its interrupt and the bus/power
//! handle it sits on) from the primary domain to a trusted domain for the
//! duration of a session, then hands it back.
//!
//! Two state machines cooperate through an external resource manager:
//!
//! - [`OwnerSession`] runs in the primary domain. It quiesces the device,
//!   lends memory and interrupt, and reclaims both when the session ends.
//! - [`BorrowerSession`] runs in the trusted domain. It validates the offer
//!   against its own [`ResourceDescriptor`](platform::ResourceDescriptor),
//!   accepts, drives the device, and releases on teardown.
//!
//! Notifications from the resource manager arrive at a [`NotificationInbox`],
//! which merges the per-class lend/release messages into one "all arrived"
//! condition. Any failure mid-sequence records an [`EventCode`] and walks
//! the side's unwind table back to `Idle` (see [`unwind`]).
//!
//! Both sessions implement [`TrustedTouchControl`], the attribute surface a
//! management agent uses to start and stop a session.
//!
//! # Features
//!
//! - `std`: host builds (critical sections through `std`, platform mocks)
//! - `defmt`: log through defmt on hardware
//! - `tracing`: log through tracing on the host

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::print_stdout)] // log through defmt/tracing
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(async_fn_in_trait)] // single-executor firmware, Send bounds not needed

#[macro_use]
mod log;

pub mod borrower;
pub mod config;
pub mod control;
pub mod error;
pub mod gate;
pub mod notify;
pub mod owner;
pub mod state;
pub mod unwind;

pub use borrower::BorrowerSession;
pub use config::{ConfigError, Environment, Properties, SessionConfig, TouchMode};
pub use control::{parse_session_request, TrustedTouchControl};
pub use error::{EventCode, SessionError};
pub use gate::{SessionGate, Transition};
pub use notify::{Arrivals, Expect, Merge, NotificationInbox, Offered};
pub use owner::OwnerSession;
pub use state::{BorrowerState, MachineState, OwnerState, SessionState, Side};
pub use unwind::{abort, UnwindReport};
