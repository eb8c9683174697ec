//! Reconciliation-status computation for Kubernetes resources.
//!
//! A port of the kstatus model covering the common workload kinds plus a
//! conditions/generation fallback for everything else. A resource is healthy
//! only when it computes to [`StatusKind::Current`].

use kube::api::DynamicObject;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Current,
    InProgress,
    Failed,
    Terminating,
    Unknown,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Current => "Current",
            Self::InProgress => "InProgress",
            Self::Failed => "Failed",
            Self::Terminating => "Terminating",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceStatus {
    pub status: StatusKind,
    pub message: String,
}

impl ResourceStatus {
    fn new(status: StatusKind, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Compute the reconciliation status of an arbitrary resource.
pub fn compute(obj: &DynamicObject) -> ResourceStatus {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    let status = &obj.data["status"];

    if obj.metadata.deletion_timestamp.is_some() {
        return ResourceStatus::new(StatusKind::Terminating, "Resource scheduled for deletion");
    }

    if let (Some(generation), Some(observed)) = (
        obj.metadata.generation,
        status["observedGeneration"].as_i64(),
    ) {
        if observed < generation {
            return ResourceStatus::new(
                StatusKind::InProgress,
                format!("{kind} generation is {generation}, but latest observed generation is {observed}"),
            );
        }
    }

    match kind.as_str() {
        "Deployment" => deployment_status(&obj.data),
        "StatefulSet" => stateful_set_status(&obj.data),
        "ReplicaSet" => replica_set_status(&obj.data),
        "DaemonSet" => daemon_set_status(status),
        "Pod" => pod_status(status),
        "Job" => job_status(status),
        "PersistentVolumeClaim" => pvc_status(status),
        _ => generic_status(status),
    }
}

fn deployment_status(data: &Value) -> ResourceStatus {
    let status = &data["status"];

    if let Some(progressing) = condition(status, "Progressing") {
        if progressing["reason"] == "ProgressDeadlineExceeded" {
            return ResourceStatus::new(StatusKind::Failed, "Progress deadline exceeded");
        }
    }

    let spec_replicas = data["spec"]["replicas"].as_i64().unwrap_or(1);
    let status_replicas = int(status, "replicas");
    let updated = int(status, "updatedReplicas");
    let ready = int(status, "readyReplicas");
    let available = int(status, "availableReplicas");

    if spec_replicas > status_replicas {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("replicas: {status_replicas}/{spec_replicas}"),
        );
    }
    if spec_replicas > updated {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("updated: {updated}/{spec_replicas}"),
        );
    }
    if status_replicas > spec_replicas {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Pending termination: {}", status_replicas - spec_replicas),
        );
    }
    if updated > available {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Available: {available}/{updated}"),
        );
    }
    if spec_replicas > ready {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Ready: {ready}/{spec_replicas}"),
        );
    }

    if !condition_true(status, "Available") {
        return ResourceStatus::new(StatusKind::InProgress, "Deployment not Available");
    }

    ResourceStatus::new(
        StatusKind::Current,
        format!("Deployment is available. Replicas: {status_replicas}"),
    )
}

fn stateful_set_status(data: &Value) -> ResourceStatus {
    let status = &data["status"];
    let spec_replicas = data["spec"]["replicas"].as_i64().unwrap_or(1);
    let status_replicas = int(status, "replicas");
    let ready = int(status, "readyReplicas");

    if spec_replicas > status_replicas {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("replicas: {status_replicas}/{spec_replicas}"),
        );
    }
    if spec_replicas > ready {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Ready: {ready}/{spec_replicas}"),
        );
    }
    if status_replicas > spec_replicas {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Pending termination: {}", status_replicas - spec_replicas),
        );
    }
    if status["updateRevision"] != status["currentRevision"] {
        return ResourceStatus::new(StatusKind::InProgress, "Rollout in progress");
    }

    ResourceStatus::new(
        StatusKind::Current,
        format!("All replicas ready. Replicas: {status_replicas}"),
    )
}

fn replica_set_status(data: &Value) -> ResourceStatus {
    let status = &data["status"];
    let spec_replicas = data["spec"]["replicas"].as_i64().unwrap_or(1);
    let status_replicas = int(status, "replicas");
    let ready = int(status, "readyReplicas");
    let available = int(status, "availableReplicas");

    if spec_replicas > ready {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Ready: {ready}/{spec_replicas}"),
        );
    }
    if spec_replicas > available {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Available: {available}/{spec_replicas}"),
        );
    }
    if status_replicas > spec_replicas {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Pending termination: {}", status_replicas - spec_replicas),
        );
    }

    ResourceStatus::new(
        StatusKind::Current,
        format!("ReplicaSet is available. Replicas: {status_replicas}"),
    )
}

fn daemon_set_status(status: &Value) -> ResourceStatus {
    let desired = int(status, "desiredNumberScheduled");
    let scheduled = int(status, "currentNumberScheduled");
    let updated = int(status, "updatedNumberScheduled");
    let available = int(status, "numberAvailable");
    let ready = int(status, "numberReady");

    if desired > scheduled {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Current: {scheduled}/{desired}"),
        );
    }
    if desired > updated {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Updated: {updated}/{desired}"),
        );
    }
    if desired > available {
        return ResourceStatus::new(
            StatusKind::InProgress,
            format!("Available: {available}/{desired}"),
        );
    }
    if desired > ready {
        return ResourceStatus::new(StatusKind::InProgress, format!("Ready: {ready}/{desired}"));
    }

    ResourceStatus::new(
        StatusKind::Current,
        format!("All replicas scheduled as expected. Replicas: {desired}"),
    )
}

fn pod_status(status: &Value) -> ResourceStatus {
    match status["phase"].as_str().unwrap_or_default() {
        "Succeeded" => ResourceStatus::new(StatusKind::Current, "Pod has completed"),
        "Running" => {
            if condition_true(status, "Ready") {
                ResourceStatus::new(StatusKind::Current, "Pod is Ready")
            } else {
                ResourceStatus::new(StatusKind::InProgress, "Pod is Running but not Ready")
            }
        }
        "Failed" => {
            let message = status["message"].as_str().unwrap_or("Pod has failed");
            ResourceStatus::new(StatusKind::Failed, message)
        }
        "Unknown" => ResourceStatus::new(StatusKind::Unknown, "Pod is in an unknown state"),
        _ => ResourceStatus::new(StatusKind::InProgress, "Pod is in the Pending phase"),
    }
}

fn job_status(status: &Value) -> ResourceStatus {
    if condition_true(status, "Complete") {
        return ResourceStatus::new(StatusKind::Current, "Job Completed");
    }
    if let Some(failed) = condition(status, "Failed") {
        if failed["status"] == "True" {
            let message = failed["message"].as_str().unwrap_or("Job has failed");
            return ResourceStatus::new(StatusKind::Failed, message);
        }
    }
    if status["startTime"].is_null() {
        return ResourceStatus::new(StatusKind::InProgress, "Job not started");
    }
    ResourceStatus::new(StatusKind::InProgress, "Job in progress")
}

fn pvc_status(status: &Value) -> ResourceStatus {
    if status["phase"] == "Bound" {
        ResourceStatus::new(StatusKind::Current, "PVC is Bound")
    } else {
        ResourceStatus::new(StatusKind::InProgress, "PVC is not Bound")
    }
}

/// Resources without kind-specific rules are judged by the standard
/// Reconciling/Stalled conditions when present.
fn generic_status(status: &Value) -> ResourceStatus {
    if let Some(stalled) = condition(status, "Stalled") {
        if stalled["status"] == "True" {
            let message = stalled["message"].as_str().unwrap_or("Resource is stalled");
            return ResourceStatus::new(StatusKind::Failed, message);
        }
    }
    if let Some(reconciling) = condition(status, "Reconciling") {
        if reconciling["status"] == "True" {
            let message = reconciling["message"]
                .as_str()
                .unwrap_or("Resource is reconciling");
            return ResourceStatus::new(StatusKind::InProgress, message);
        }
    }
    ResourceStatus::new(StatusKind::Current, "Resource is current")
}

fn condition<'a>(status: &'a Value, kind: &str) -> Option<&'a Value> {
    status["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"] == kind)
}

fn condition_true(status: &Value, kind: &str) -> bool {
    condition(status, kind).map(|c| c["status"] == "True").unwrap_or(false)
}

fn int(value: &Value, key: &str) -> i64 {
    value[key].as_i64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(raw: &str) -> DynamicObject {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    fn test_deployment_not_available() {
        let obj = from_yaml(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: test
  generation: 1
  namespace: test
status:
  observedGeneration: 1
  updatedReplicas: 1
  readyReplicas: 1
  availableReplicas: 1
  replicas: 1
  conditions:
    - type: Progressing
      status: "True"
      reason: NewReplicaSetAvailable
    - type: Available
      status: "False"
"#,
        );
        let res = compute(&obj);
        assert_eq!(res.status, StatusKind::InProgress);
        assert_eq!(res.message, "Deployment not Available");
    }

    #[test]
    fn test_deployment_available() {
        let obj = from_yaml(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: test
  generation: 1
  namespace: test
status:
  observedGeneration: 1
  updatedReplicas: 1
  readyReplicas: 1
  availableReplicas: 1
  replicas: 1
  conditions:
    - type: Progressing
      status: "True"
      reason: NewReplicaSetAvailable
    - type: Available
      status: "True"
"#,
        );
        assert_eq!(compute(&obj).status, StatusKind::Current);
    }

    #[test]
    fn test_deployment_scaling_up() {
        let obj = from_yaml(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: test
  generation: 1
spec:
  replicas: 3
status:
  observedGeneration: 1
  replicas: 1
  updatedReplicas: 1
  readyReplicas: 1
  availableReplicas: 1
"#,
        );
        let res = compute(&obj);
        assert_eq!(res.status, StatusKind::InProgress);
        assert_eq!(res.message, "replicas: 1/3");
    }

    #[test]
    fn test_stale_generation() {
        let obj = from_yaml(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: test
  generation: 2
status:
  observedGeneration: 1
"#,
        );
        let res = compute(&obj);
        assert_eq!(res.status, StatusKind::InProgress);
        assert!(res.message.contains("latest observed generation is 1"));
    }

    #[test]
    fn test_pod_ready() {
        let obj = from_yaml(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: test
status:
  phase: Running
  conditions:
    - type: Ready
      status: "True"
"#,
        );
        assert_eq!(compute(&obj).status, StatusKind::Current);
    }

    #[test]
    fn test_generic_resource_is_current() {
        let obj = from_yaml(
            r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: test
"#,
        );
        assert_eq!(compute(&obj).status, StatusKind::Current);
    }

    #[test]
    fn test_terminating() {
        let obj = from_yaml(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: test
  deletionTimestamp: "2024-01-01T00:00:00Z"
status:
  phase: Running
"#,
        );
        assert_eq!(compute(&obj).status, StatusKind::Terminating);
    }
}
