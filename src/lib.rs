//! RULLAUS - a rolling-update controller for declared machine fleets.
//!
//! A [`MachineDeployment`](crd::machine_deployment::MachineDeployment)
//! declares how many interchangeable machines should run at a given template
//! revision. This controller drives the fleet there by orchestrating
//! subordinate [`MachineSet`](crd::machine_set::MachineSet) objects: on every
//! reconciliation tick it scales the set matching the current template up
//! under the surge ceiling (`replicas + maxSurge`) and drains the remaining
//! sets under the availability floor (`replicas - maxUnavailable`).

pub mod controller;
pub mod crd;
pub mod server;
