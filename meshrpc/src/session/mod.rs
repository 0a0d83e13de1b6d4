pub mod dispatcher;
pub mod handshake;
pub mod service;
pub mod session;
