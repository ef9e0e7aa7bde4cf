#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use xds_controller_core as core;
pub use xds_controller_index as index;
pub use xds_controller_k8s as k8s;
pub use xds_controller_runtime::Args;
pub use xds_controller_trust as trust;
