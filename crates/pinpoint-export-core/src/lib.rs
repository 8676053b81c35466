pub mod batch;
pub mod buffer;
pub mod coerce;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod transform;
