//! Custom resource definitions for the `rullaus.io` API group.

pub mod machine_deployment;
pub mod machine_set;
