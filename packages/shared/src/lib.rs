//! Utilities shared by the relay binary and library: logging setup and clocks.

pub mod logger;
pub mod time;
