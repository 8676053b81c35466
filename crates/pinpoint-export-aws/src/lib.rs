pub mod client;
pub mod convert;

pub use client::PinpointEventsApi;
