pub mod controller;
pub mod correlate;
pub mod error;
pub mod normalize;
pub mod retry;

pub use controller::{SessionConfig, SessionController};
pub use error::SessionError;
pub use normalize::ChunkNormalizer;
pub use retry::RetryController;
