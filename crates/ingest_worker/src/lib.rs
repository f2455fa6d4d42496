pub mod domain;
pub mod elasticsearch;
pub mod feed;
pub mod ingest_worker;

pub use domain::*;
pub use elasticsearch::*;
pub use feed::*;
pub use ingest_worker::*;
