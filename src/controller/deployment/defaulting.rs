//! Field defaulting for MachineDeployment.
//!
//! Runs at the top of every tick so the planners can rely on filled scalars;
//! a `None` slipping past this point is a programming error, not user input.

use crate::crd::machine_deployment::{
    MachineDeployment, MachineDeploymentStrategyType, MachineRollingUpdateDeployment,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Return a copy of the deployment with unset fields filled:
/// `replicas=1`, `minReadySeconds=0`, `revisionHistoryLimit=1`,
/// `progressDeadlineSeconds=600`, `strategy.type=RollingUpdate`,
/// `maxSurge=1`, `maxUnavailable=0`.
pub fn defaulted(md: &MachineDeployment) -> MachineDeployment {
    let mut md = md.clone();
    let spec = &mut md.spec;

    spec.replicas.get_or_insert(1);
    spec.min_ready_seconds.get_or_insert(0);
    spec.revision_history_limit.get_or_insert(1);
    spec.progress_deadline_seconds.get_or_insert(600);

    spec.strategy
        .strategy_type
        .get_or_insert(MachineDeploymentStrategyType::RollingUpdate);
    if spec.strategy.strategy_type == Some(MachineDeploymentStrategyType::RollingUpdate) {
        let rolling_update = spec
            .strategy
            .rolling_update
            .get_or_insert_with(MachineRollingUpdateDeployment::default);
        rolling_update.max_surge.get_or_insert(IntOrString::Int(1));
        rolling_update
            .max_unavailable
            .get_or_insert(IntOrString::Int(0));
    }

    md
}
