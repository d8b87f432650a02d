#![doc = include_str!("../README.md")]

mod cache;
mod core;
mod error;
mod index;
mod job;
mod keys;
mod lock;
mod model;
mod queue;
mod reconcile;
mod sequence;
mod store;
mod worker;

pub use crate::cache::*;
pub use crate::core::*;
pub use crate::error::*;
pub use crate::index::*;
pub use crate::job::*;
pub use crate::keys::*;
pub use crate::lock::*;
pub use crate::model::*;
pub use crate::queue::*;
pub use crate::reconcile::*;
pub use crate::sequence::*;
pub use crate::store::*;
pub use crate::worker::*;
