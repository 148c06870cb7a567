//! Infrastructure layer: byte-stream framing, broker clients and HTTP DTOs.

pub mod broker;
pub mod dto;
pub mod framer;
