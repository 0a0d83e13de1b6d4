pub mod auth;
pub mod core;
pub mod cursor;
pub mod message;
pub mod peer;
pub mod registry;
pub mod serializer;
pub mod server;
pub mod session;
pub mod transport;
