pub mod http;
pub mod traits;
pub mod types;

pub use http::HttpTransport;
pub use traits::Transport;
pub use types::{RequestOptions, TransportError, TransportResponse};
