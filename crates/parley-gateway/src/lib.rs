pub mod connection;
pub mod dispatcher;
pub mod gateway;
pub mod presence;
pub mod store;

pub use connection::{GatewayState, HandshakeParams, authenticate};
pub use dispatcher::Dispatcher;
pub use gateway::{Gateway, Session};
pub use presence::{ConnectionId, PresenceRegistry};
pub use store::ChatStore;
