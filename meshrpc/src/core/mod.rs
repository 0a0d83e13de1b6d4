pub mod error;
pub mod hash;
pub mod id;
pub mod roles;
pub mod stream;
pub mod types;
