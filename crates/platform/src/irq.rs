//! Touch interrupt line abstraction

/// Local control over the touch controller interrupt line.
pub trait TouchInterrupt {
    /// Error type
    type Error: core::fmt::Debug;

    /// Unmask the interrupt in this domain.
    fn enable(&mut self) -> Result<(), Self::Error>;

    /// Mask the interrupt in this domain.
    fn disable(&mut self) -> Result<(), Self::Error>;

    /// Report every active contact as lifted.
    ///
    /// Called by the owner just before it hands the line over, so the input
    /// stack does not see a finger stuck down for the duration of the session.
    fn release_contacts(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
