mod aggregate_updater;
mod bulk_writer;
mod in_memory_purchase_store;
mod ingest_process;
mod normalizer;

pub use aggregate_updater::*;
pub use bulk_writer::*;
pub use in_memory_purchase_store::*;
pub use ingest_process::*;
pub use normalizer::*;
