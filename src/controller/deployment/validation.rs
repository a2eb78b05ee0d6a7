//! Runtime validation of MachineDeployment specs.
//!
//! Validates constraints the CRD schema cannot express. Runs at the top of
//! every tick, after defaulting, so the planners can assume well-formed
//! input.

use super::machine_set::resolve_int_or_percent;
use crate::crd::machine_deployment::MachineDeployment;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Validate a MachineDeployment spec.
///
/// Rules:
/// - `spec.replicas`, `minReadySeconds`, `revisionHistoryLimit`,
///   `progressDeadlineSeconds` must be >= 0
/// - `spec.selector` must be non-empty and match the template labels
/// - `maxSurge` / `maxUnavailable` must be a non-negative integer or an
///   `N%` percentage
/// - `maxUnavailable` must not exceed 100% as a percentage
/// - `maxSurge` and `maxUnavailable` must not both resolve to zero
pub fn validate_machine_deployment(md: &MachineDeployment) -> Result<(), String> {
    let spec = &md.spec;

    if let Some(replicas) = spec.replicas {
        if replicas < 0 {
            return Err(format!("spec.replicas must be >= 0, got {replicas}"));
        }
    }
    if let Some(seconds) = spec.min_ready_seconds {
        if seconds < 0 {
            return Err(format!("spec.minReadySeconds must be >= 0, got {seconds}"));
        }
    }
    if let Some(limit) = spec.revision_history_limit {
        if limit < 0 {
            return Err(format!("spec.revisionHistoryLimit must be >= 0, got {limit}"));
        }
    }
    if let Some(deadline) = spec.progress_deadline_seconds {
        if deadline < 0 {
            return Err(format!(
                "spec.progressDeadlineSeconds must be >= 0, got {deadline}"
            ));
        }
    }

    validate_selector(md)?;

    if let Some(rolling_update) = &spec.strategy.rolling_update {
        if let Some(surge) = &rolling_update.max_surge {
            if !is_valid_int_or_percent(surge) {
                return Err(format!(
                    "spec.strategy.rollingUpdate.maxSurge invalid '{}': must be a non-negative integer or percentage (e.g. '25%')",
                    int_or_percent_display(surge)
                ));
            }
        }
        if let Some(unavailable) = &rolling_update.max_unavailable {
            if !is_valid_int_or_percent(unavailable) {
                return Err(format!(
                    "spec.strategy.rollingUpdate.maxUnavailable invalid '{}': must be a non-negative integer or percentage (e.g. '25%')",
                    int_or_percent_display(unavailable)
                ));
            }
            if let IntOrString::String(s) = unavailable {
                if resolve_int_or_percent(unavailable, 100, false) > 100 {
                    return Err(format!(
                        "spec.strategy.rollingUpdate.maxUnavailable '{s}' should not be more than 100%"
                    ));
                }
            }
        }

        // Both zero would let the rollout neither surge nor drop a machine.
        let surge = rolling_update
            .max_surge
            .as_ref()
            .map(|v| resolve_int_or_percent(v, 100, true));
        let unavailable = rolling_update
            .max_unavailable
            .as_ref()
            .map(|v| resolve_int_or_percent(v, 100, false));
        if surge == Some(0) && unavailable == Some(0) {
            return Err(
                "spec.strategy.rollingUpdate.maxUnavailable may not be 0 when maxSurge is 0"
                    .to_string(),
            );
        }
    }

    Ok(())
}

fn validate_selector(md: &MachineDeployment) -> Result<(), String> {
    let selector = &md.spec.selector;
    let match_labels = selector.match_labels.clone().unwrap_or_default();
    let match_expressions = selector.match_expressions.as_deref().unwrap_or(&[]);

    if match_labels.is_empty() && match_expressions.is_empty() {
        return Err("spec.selector must not be empty".to_string());
    }

    let template_labels = md
        .spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.as_ref());

    for (key, value) in &match_labels {
        if template_labels.and_then(|l| l.get(key)) != Some(value) {
            return Err(format!(
                "spec.selector does not match spec.template labels: {key}={value}"
            ));
        }
    }

    for expr in match_expressions {
        let label = template_labels.and_then(|l| l.get(&expr.key));
        let values = expr.values.as_deref().unwrap_or(&[]);
        let matched = match expr.operator.as_str() {
            "In" => label.is_some_and(|v| values.contains(v)),
            "NotIn" => label.is_none_or(|v| !values.contains(v)),
            "Exists" => label.is_some(),
            "DoesNotExist" => label.is_none(),
            other => {
                return Err(format!("spec.selector has unknown operator '{other}'"));
            }
        };
        if !matched {
            return Err(format!(
                "spec.selector does not match spec.template labels: {} {} {:?}",
                expr.key, expr.operator, values
            ));
        }
    }

    Ok(())
}

/// A value is valid when it is a non-negative integer or matches `^[0-9]+%$`.
fn is_valid_int_or_percent(value: &IntOrString) -> bool {
    match value {
        IntOrString::Int(i) => *i >= 0,
        IntOrString::String(s) => s
            .strip_suffix('%')
            .is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())),
    }
}

fn int_or_percent_display(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(i) => i.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}
