//! Services built on top of the proxy pool

pub mod outbound;

pub use outbound::OutboundExecutor;
