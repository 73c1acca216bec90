//! Platform abstraction layer for trusted touch handover
//!
//! This crate provides trait-based abstractions for everything the trusted
//! touch protocol talks to but does not implement: the resource-management
//! service, its notification callbacks, the bus/power handle, the touch
//! interrupt line and the controller reset line.
//!
//! # Architecture Layers
//!
//! ```text
//! Control surface / policy (caller)
//!         ↓
//! Protocol core (trusted-touch crate: owner + borrower machines)
//!         ↓
//! Platform abstractions (this crate - trait abstractions)
//!         ↓
//! Hypervisor resource manager + board HAL
//! ```
//!
//! # Abstractions
//!
//! - [`ResourceDescriptor`] - which IO regions and which interrupt move
//! - [`ResourceManager`] - lend / accept / release / reclaim
//! - [`NotificationSink`] - asynchronous lend/release notifications
//! - [`SessionResource`] - bus + power handle held during a session
//! - [`TouchInterrupt`] - local interrupt masking
//! - [`ControllerReset`] - controller reset line
//!
//! # Features
//!
//! - `std`: Enable standard library support and the [`mocks`] module
//! - `defmt`: Enable defmt formatting for all public types
//!
//! # Example
//!
//! ```no_run
//! use platform::{ResourceClass, ResourceDescriptor, ResourceManager};
//!
//! async fn lend_memory<R: ResourceManager>(rm: &mut R, desc: &ResourceDescriptor) {
//!     let _handle = rm.lend(ResourceClass::Memory, desc).await;
//! }
//! ```

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
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this platform crate:
#![allow(clippy::doc_markdown)] // hex addresses in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors — callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

pub mod irq;
pub mod power;
pub mod reset;
pub mod resource;
pub mod rm;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

// Re-export commonly used types
pub use irq::TouchInterrupt;
pub use power::SessionResource;
pub use reset::{ControllerReset, GpioReset, ResetError, DEFAULT_RESET_PULSE_US};
pub use resource::{
    DescriptorError, InterruptId, IoRegion, RegionList, ResourceClass, ResourceDescriptor,
    ResourceTag, MAX_IO_REGIONS,
};
pub use rm::{
    HandleId, Notification, NotificationKind, NotificationSink, Offer, ResourceManager,
    TransferHandle,
};
