pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod heartbeat;
pub mod outbound;
pub mod registry;
pub mod resources;
pub mod script;
pub mod shutdown;
pub mod vehicle;

/// Server version reported to the backend on every heartbeat.
pub const SERVER_VERSION: &str = "2.3.2";

/// Protocol version expected from connecting game clients.
pub const CLIENT_VERSION: &str = "2.0";
