mod durable;
mod kv;
mod memory_kv;
mod memory_store;

pub use durable::*;
pub use kv::*;
pub use memory_kv::*;
pub use memory_store::*;
