// src/builder/helm.rs

//! Content-addressed Helm chart references
//!
//! The chart controller only re-fetches a chart when its URL changes, so the
//! packaged chart file carries its own content hash in the name.

use crate::error::Result;
use crate::hash::ContentHash;
use serde::Serialize;

const CHARTS_DIR: &str = "data/server/static/charts";
const MANIFESTS_DIR: &str = "data/server/manifests";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HelmChartResource<'a> {
    api_version: &'static str,
    kind: &'static str,
    metadata: Metadata<'a>,
    spec: Spec<'a>,
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    name: &'a str,
    namespace: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Spec<'a> {
    chart: String,
    target_namespace: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    values_content: Option<&'a str>,
}

/// `data/server/static/charts/<id>-<hash>.tgz`
pub fn chart_target(chart_id: &str, hash: &ContentHash) -> String {
    format!("{}/{}-{}.tgz", CHARTS_DIR, chart_id, hash)
}

/// `data/server/manifests/<id>.yaml`
pub fn chart_resource_target(chart_id: &str) -> String {
    format!("{}/{}.yaml", MANIFESTS_DIR, chart_id)
}

/// Render the `HelmChart` custom resource pointing at the hashed chart file
pub fn chart_resource(chart_id: &str, hash: &ContentHash, values: Option<&str>) -> Result<String> {
    let resource = HelmChartResource {
        api_version: "helm.cattle.io/v1",
        kind: "HelmChart",
        metadata: Metadata {
            name: chart_id,
            namespace: "kube-system",
        },
        spec: Spec {
            chart: format!(
                "https://%{{KUBERNETES_API}}%/static/charts/{}-{}.tgz",
                chart_id, hash
            ),
            target_namespace: "default",
            values_content: values,
        },
    };

    Ok(serde_yaml::to_string(&resource)?)
}
