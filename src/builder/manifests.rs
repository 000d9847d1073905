// src/builder/manifests.rs

//! Container image discovery in Kubernetes manifests

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_yaml::Value;

/// Path from a document's root to its pod spec, by kind
fn pod_spec_path(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "Pod" => Some(&["spec"]),
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" => {
            Some(&["spec", "template", "spec"])
        }
        "CronJob" => Some(&["spec", "jobTemplate", "spec", "template", "spec"]),
        _ => None,
    }
}

/// Images referenced by every workload document in `content`
///
/// Covers `containers` and `initContainers`. Documents of other kinds and
/// empty documents are ignored. Order of first appearance is kept.
pub fn images_in_manifest(content: &str) -> Result<Vec<String>> {
    let mut images = Vec::new();

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::BuildInput(format!("yaml syntax error: {}", e)))?;

        let Some(kind) = value.get("kind").and_then(Value::as_str) else {
            continue;
        };
        let Some(path) = pod_spec_path(kind) else {
            continue;
        };

        let mut spec = Some(&value);
        for key in path {
            spec = spec.and_then(|v| v.get(*key));
        }
        let Some(spec) = spec else {
            continue;
        };

        for list in ["initContainers", "containers"] {
            let containers = spec.get(list).and_then(Value::as_sequence);
            for container in containers.into_iter().flatten() {
                if let Some(image) = container.get("image").and_then(Value::as_str) {
                    if !images.iter().any(|i| i == image) {
                        images.push(image.to_string());
                    }
                }
            }
        }
    }

    Ok(images)
}
