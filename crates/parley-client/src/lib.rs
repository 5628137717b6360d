//! Client side of parley: REST calls, the gateway socket and the session
//! state a chat UI renders from.

pub mod config;
pub mod error;
pub mod rest;
pub mod session;
pub mod transport;
pub mod typing;

pub use config::ClientConfig;
pub use error::ClientError;
pub use rest::{ChatApi, RestClient};
pub use session::{ChatSession, GatewayFailure, PresenceEntry};
pub use transport::{ConnectionState, ReconnectPolicy, TransportEvent};
