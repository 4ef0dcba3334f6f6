//! Server side: listener, accepted clients and their registry

pub mod client;
pub mod endpoint;
pub mod listener;
pub mod registry;

pub use client::ServerClient;
pub use endpoint::Endpoint;
pub use listener::Listener;
pub use registry::{BroadcastReport, ClientRegistry};
