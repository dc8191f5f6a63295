//! Application services: reads, writes, aggregation and bulk work.

pub mod aggregate;
pub mod error;
pub mod export;
pub mod guard;
pub mod mutation;
pub mod pool;
pub mod query;
pub mod signing;
pub mod transport;
