//! Session resource abstraction
//!
//! The bus and clock resources the touch controller needs while a session is
//! in progress. The owner holds them for the whole lend window so the
//! controller stays powered; the borrower acquires them while it drives the
//! controller.

/// Bus/clock resource held for the duration of a session.
pub trait SessionResource {
    /// Error type
    type Error: core::fmt::Debug;

    /// Acquire the resource (power the bus, enable clocks).
    async fn acquire(&mut self) -> Result<(), Self::Error>;

    /// Release the resource.
    async fn release(&mut self) -> Result<(), Self::Error>;
}
