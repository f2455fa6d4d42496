mod http_feed_source;
mod payload;

pub use http_feed_source::*;
pub use payload::*;
