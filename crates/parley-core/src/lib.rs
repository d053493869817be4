pub mod errors;
pub mod events;
pub mod ids;
pub mod timeline;
pub mod transport;
pub mod wire;
