#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod resource;
mod snapshot;
mod version;

pub use self::{
    cache::{CacheError, SnapshotCache},
    resource::{Resource, ResourceError, ResourceKind},
    snapshot::{ResourceSet, Snapshot},
    version::Version,
};
