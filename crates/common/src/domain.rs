mod aggregate;
mod feed;
mod purchase;
mod raw_event;
mod result;
mod store;

pub use aggregate::*;
pub use feed::*;
pub use purchase::*;
pub use raw_event::*;
pub use result::*;
pub use store::*;
