mod purchase_store;

pub use purchase_store::*;
