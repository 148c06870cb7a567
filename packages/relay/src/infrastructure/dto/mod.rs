//! Data Transfer Objects for the admin HTTP API.

pub mod conversion;
pub mod http;
