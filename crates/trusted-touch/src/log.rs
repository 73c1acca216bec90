//! Crate-internal logging macros.
//!
//! Hardware builds log through `defmt` (feature `defmt`), host builds through
//! `tracing` (feature `tracing`). With neither feature the macros still
//! type-check their arguments but emit nothing.
//!
//! Format strings must stay within the common subset: plain `{}` placeholders
//! whose arguments implement both `Display` and `defmt::Format`.

macro_rules! log_event {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "defmt")]
        ::defmt::$level!($($arg)+);
        #[cfg(all(feature = "tracing", not(feature = "defmt")))]
        ::tracing::$level!($($arg)+);
        #[cfg(not(any(feature = "defmt", feature = "tracing")))]
        {
            let _ = ::core::format_args!($($arg)+);
        }
    }};
}

macro_rules! trace {
    ($($arg:tt)+) => { log_event!(trace, $($arg)+) };
}

macro_rules! debug {
    ($($arg:tt)+) => { log_event!(debug, $($arg)+) };
}

macro_rules! info {
    ($($arg:tt)+) => { log_event!(info, $($arg)+) };
}

macro_rules! warn {
    ($($arg:tt)+) => { log_event!(warn, $($arg)+) };
}

macro_rules! error {
    ($($arg:tt)+) => { log_event!(error, $($arg)+) };
}
