//! Logging macros that forward to the `log` crate when the `log` feature is
//! enabled, and compile to nothing otherwise.
//!
//! The disabled variants still type-check their arguments, so a message that
//! builds without `log` also builds with it.

#![allow(unused_macros)]

#[cfg(feature = "log")]
macro_rules! trace {
    ($($arg:tt)*) => { ::log::trace!($($arg)*) };
}

#[cfg(feature = "log")]
macro_rules! debug {
    ($($arg:tt)*) => { ::log::debug!($($arg)*) };
}

#[cfg(feature = "log")]
macro_rules! info {
    ($($arg:tt)*) => { ::log::info!($($arg)*) };
}

#[cfg(feature = "log")]
macro_rules! warn {
    ($($arg:tt)*) => { ::log::warn!($($arg)*) };
}

#[cfg(feature = "log")]
macro_rules! error {
    ($($arg:tt)*) => { ::log::error!($($arg)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}
