#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Derives per-node proxy configuration from live cluster state.
//!
//! A [`ConfigMapStore`] watches configuration documents and maintains one
//! [`ConfigStore`] per node identity in a shared [`Registry`]. Each store
//! recomputes its endpoint set on pod and service changes and pushes
//! immutable, versioned snapshots into the shared snapshot cache.

mod configmaps;
pub mod doc;
mod endpoints;
mod metrics;
mod registry;
mod settings;
mod store;
pub mod watch;

pub use self::{
    configmaps::ConfigMapStore,
    metrics::Metrics,
    registry::Registry,
    settings::Settings,
    store::{ConfigStore, Context},
};

#[cfg(test)]
mod tests;
