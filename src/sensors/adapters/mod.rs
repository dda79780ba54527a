pub mod http;
pub mod unix_socket;

pub use http::HttpJsonFeed;
pub use unix_socket::UnixSocketStreamFeed;
