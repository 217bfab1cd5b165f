//! Readiness of applied resources
//!
//! Evaluated from the object as returned by the API server, so the checks
//! work on dynamic objects of any kind.

use serde_json::Value as JsonValue;

/// Result of one readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Still progressing, with what is being waited on
    Pending(String),
    /// Will not become ready without intervention
    Failed(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Check the readiness of an object of `kind`
///
/// Kinds without a notion of readiness are ready as soon as they exist.
pub fn readiness(kind: &str, object: &JsonValue) -> Readiness {
    match kind {
        "Deployment" => deployment(object),
        "StatefulSet" => statefulset(object),
        "DaemonSet" => daemonset(object),
        "Job" => job(object),
        "CustomResourceDefinition" => crd(object),
        _ => Readiness::Ready,
    }
}

fn int(object: &JsonValue, pointer: &str) -> i64 {
    object.pointer(pointer).and_then(JsonValue::as_i64).unwrap_or(0)
}

fn conditions(object: &JsonValue) -> impl Iterator<Item = &JsonValue> {
    object
        .pointer("/status/conditions")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
}

fn condition_is<'a>(object: &'a JsonValue, kind: &str, status: &str) -> Option<&'a JsonValue> {
    conditions(object).find(|c| c["type"] == kind && c["status"] == status)
}

/// Ready when every replica is updated, ready and available
fn deployment(object: &JsonValue) -> Readiness {
    let desired = object
        .pointer("/spec/replicas")
        .and_then(JsonValue::as_i64)
        .unwrap_or(1);
    let ready = int(object, "/status/readyReplicas");
    let updated = int(object, "/status/updatedReplicas");
    let available = int(object, "/status/availableReplicas");

    if let Some(c) = condition_is(object, "Progressing", "False") {
        return Readiness::Failed(
            c["message"]
                .as_str()
                .unwrap_or("deployment is not progressing")
                .to_string(),
        );
    }

    if ready == desired && updated == desired && available == desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated, {}/{} available",
            ready, desired, updated, desired, available, desired
        ))
    }
}

/// Ready when all replicas are ready and the rollout finished
fn statefulset(object: &JsonValue) -> Readiness {
    let desired = object
        .pointer("/spec/replicas")
        .and_then(JsonValue::as_i64)
        .unwrap_or(1);
    let ready = int(object, "/status/readyReplicas");
    let current = object.pointer("/status/currentRevision");
    let update = object.pointer("/status/updateRevision");

    if ready == desired && current == update {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("{}/{} ready", ready, desired))
    }
}

fn daemonset(object: &JsonValue) -> Readiness {
    let desired = int(object, "/status/desiredNumberScheduled");
    let ready = int(object, "/status/numberReady");
    let updated = int(object, "/status/updatedNumberScheduled");

    if ready == desired && updated == desired {
        Readiness::Ready
    } else {
        Readiness::Pending(format!(
            "{}/{} ready, {}/{} updated",
            ready, desired, updated, desired
        ))
    }
}

/// Ready once it has succeeded; failed on a `Failed` condition
fn job(object: &JsonValue) -> Readiness {
    if let Some(c) = condition_is(object, "Failed", "True") {
        return Readiness::Failed(c["message"].as_str().unwrap_or("job failed").to_string());
    }
    if int(object, "/status/succeeded") > 0 {
        Readiness::Ready
    } else {
        Readiness::Pending(format!("{} active", int(object, "/status/active")))
    }
}

/// Ready once the API server reports it established
fn crd(object: &JsonValue) -> Readiness {
    if condition_is(object, "Established", "True").is_some() {
        Readiness::Ready
    } else {
        Readiness::Pending("not established".to_string())
    }
}
