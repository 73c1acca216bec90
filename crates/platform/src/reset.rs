//! Touch controller reset line
//!
//! The borrower pulses the controller reset line when the bus fails in the
//! middle of a session, so the controller comes back in a known state before
//! its registers are handed back to the owner.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

/// Default width of the reset pulse in microseconds.
pub const DEFAULT_RESET_PULSE_US: u32 = 1_000;

/// Errors from the reset line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetError {
    /// The GPIO driving the reset line reported an error.
    #[error("reset GPIO error")]
    Gpio,
}

/// Hard reset of the touch controller.
pub trait ControllerReset {
    /// Error type
    type Error: core::fmt::Debug;

    /// Pulse the reset line and return once the controller is out of reset.
    async fn reset_controller(&mut self) -> Result<(), Self::Error>;
}

/// [`ControllerReset`] over an active-low reset GPIO.
///
/// Generic over:
/// - `P` — reset [`OutputPin`] (LOW holds the controller in reset).
/// - `D` — [`DelayNs`] for the pulse width.
///
/// In host tests supply `embedded_hal_mock::eh1::delay::NoopDelay`.
pub struct GpioReset<P, D> {
    pin: P,
    delay: D,
    pulse_us: u32,
}

impl<P, D> GpioReset<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    /// Create a reset driver with the given pulse width.
    pub fn new(pin: P, delay: D, pulse_us: u32) -> Self {
        Self {
            pin,
            delay,
            pulse_us,
        }
    }

    /// Configured pulse width in microseconds.
    pub fn pulse_us(&self) -> u32 {
        self.pulse_us
    }

    /// Give back the pin and delay.
    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

impl<P, D> ControllerReset for GpioReset<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    type Error = ResetError;

    async fn reset_controller(&mut self) -> Result<(), ResetError> {
        self.pin.set_low().map_err(|_| ResetError::Gpio)?;
        self.delay.delay_us(self.pulse_us).await;
        self.pin.set_high().map_err(|_| ResetError::Gpio)?;
        Ok(())
    }
}
