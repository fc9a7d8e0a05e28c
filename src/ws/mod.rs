//! Reconnecting WebSocket stream connections (spec §4.5–§4.7).

pub mod connection;
pub mod multiplex;
pub mod user_data;

pub use connection::{StreamCallbacks, StreamConnection, StreamState};
pub use multiplex::{DepthLevel, DepthSpeed, MultiplexClient, StreamEvent};
pub use user_data::UserDataConnection;
