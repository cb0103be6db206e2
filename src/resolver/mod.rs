// Resolution strategies plugged into the settlement engine
pub mod http;
pub mod timeout;

pub use http::HttpResolver;
pub use timeout::TimeoutResolver;
