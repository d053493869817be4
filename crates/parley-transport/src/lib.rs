pub mod http;
pub mod sse;

pub mod mock;

pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport};
