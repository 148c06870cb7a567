//! Broker clients implementing the domain's `EventPublisher` / `EventSource`.
//!
//! - `redis`: production lists on a Redis server
//! - `memory`: in-process lists for tests and local runs

pub mod memory;
pub mod redis;

pub use memory::InMemoryBroker;
pub use self::redis::{RedisPublisher, RedisSource};
