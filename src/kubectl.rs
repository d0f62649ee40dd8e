//! Structured cluster API access
//!
//! All interactions with the control-plane API go through `kubectl`
//! against the rewritten access credential, always with `-o json` so the
//! output is deserialized, never text-scraped. Labeling uses
//! `--overwrite` for upsert semantics; manifest application uses
//! server-side `apply`, which is an upsert by definition.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::remote::{CommandOutput, LocalRunner};

/// Time bound on any single kubectl invocation
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal view of a node, parsed from `kubectl get nodes -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    /// Object metadata (name, labels)
    pub metadata: ObjectMeta,
    /// Node status (conditions)
    #[serde(default)]
    pub status: NodeStatus,
}

/// Object metadata subset
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    /// Host-assigned node name
    pub name: String,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Node status subset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatus {
    /// Node conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A single status condition
#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    /// Condition type, e.g. `Ready`
    #[serde(rename = "type")]
    pub kind: String,
    /// Condition status: `True`, `False`, or `Unknown`
    pub status: String,
}

/// Minimal view of a pod, parsed from `kubectl get pods -o json`
#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    /// Object metadata
    pub metadata: ObjectMeta,
    /// Pod status
    #[serde(default)]
    pub status: PodStatus,
}

/// Pod status subset
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodStatus {
    /// Pod phase, e.g. `Running`
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl Node {
    /// Whether the node reports a `Ready=True` condition
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }
}

/// Whether the API server answers its authenticated readiness endpoint
pub async fn api_ready(local: &dyn LocalRunner, kubeconfig: &Path) -> bool {
    let kc = kubeconfig.to_string_lossy();
    match local
        .run(
            "kubectl",
            &["--kubeconfig", &kc, "get", "--raw", "/readyz"],
            KUBECTL_TIMEOUT,
        )
        .await
    {
        Ok(out) => out.success(),
        Err(_) => false,
    }
}

/// List all nodes registered with the control plane
pub async fn list_nodes(local: &dyn LocalRunner, kubeconfig: &Path) -> Result<Vec<Node>, Error> {
    let kc = kubeconfig.to_string_lossy();
    let out = local
        .run(
            "kubectl",
            &["--kubeconfig", &kc, "get", "nodes", "-o", "json"],
            KUBECTL_TIMEOUT,
        )
        .await?;
    expect_success("list nodes", &out)?;
    parse_node_list(&out.stdout)
}

/// List all pods across all namespaces
pub async fn list_pods(local: &dyn LocalRunner, kubeconfig: &Path) -> Result<Vec<Pod>, Error> {
    let kc = kubeconfig.to_string_lossy();
    let out = local
        .run(
            "kubectl",
            &["--kubeconfig", &kc, "get", "pods", "-A", "-o", "json"],
            KUBECTL_TIMEOUT,
        )
        .await?;
    expect_success("list pods", &out)?;
    parse_pod_list(&out.stdout)
}

/// Apply labels to a node with upsert semantics.
///
/// `--overwrite` makes reapplying an existing label a no-op instead of
/// an error; callers treat any failure here as a warning, not a fatality.
pub async fn label_node(
    local: &dyn LocalRunner,
    kubeconfig: &Path,
    node: &str,
    labels: &[(&str, &str)],
) -> Result<(), Error> {
    let kc = kubeconfig.to_string_lossy();
    let owned = label_args(&kc, node, labels);
    let args: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();

    debug!(node, "labeling node");
    let out = local.run("kubectl", &args, KUBECTL_TIMEOUT).await?;
    expect_success("label node", &out)
}

/// Apply a declarative manifest via stdin.
///
/// `kubectl apply` is an upsert: reapplying an unchanged manifest
/// succeeds without error.
pub async fn apply_manifest(
    local: &dyn LocalRunner,
    kubeconfig: &Path,
    manifest: &str,
) -> Result<(), Error> {
    let kc = kubeconfig.to_string_lossy();
    let out = local
        .run_with_stdin(
            "kubectl",
            &["--kubeconfig", &kc, "apply", "-f", "-"],
            manifest,
            KUBECTL_TIMEOUT,
        )
        .await?;
    expect_success("apply manifest", &out)
}

/// Build the label invocation. `--overwrite` gives upsert semantics:
/// reapplying an identical label set is a no-op, never an error.
fn label_args(kubeconfig: &str, node: &str, labels: &[(&str, &str)]) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--kubeconfig".to_string(),
        kubeconfig.to_string(),
        "label".to_string(),
        "node".to_string(),
        node.to_string(),
        "--overwrite".to_string(),
    ];
    args.extend(labels.iter().map(|(k, v)| format!("{}={}", k, v)));
    args
}

fn expect_success(step: &str, out: &CommandOutput) -> Result<(), Error> {
    if out.success() {
        Ok(())
    } else {
        Err(Error::install(step, out.stderr.trim().to_string()))
    }
}

fn parse_node_list(json: &str) -> Result<Vec<Node>, Error> {
    let list: List<Node> = serde_json::from_str(json)
        .map_err(|e| Error::install("list nodes", format!("unparseable node list: {}", e)))?;
    Ok(list.items)
}

fn parse_pod_list(json: &str) -> Result<Vec<Pod>, Error> {
    let list: List<Pod> = serde_json::from_str(json)
        .map_err(|e| Error::install("list pods", format!("unparseable pod list: {}", e)))?;
    Ok(list.items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_LIST: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "metadata": {
                    "name": "pi-worker",
                    "labels": {"kubernetes.io/hostname": "pi-worker"}
                },
                "status": {
                    "conditions": [
                        {"type": "MemoryPressure", "status": "False"},
                        {"type": "Ready", "status": "True"}
                    ]
                }
            },
            {
                "metadata": {"name": "skiff-server"},
                "status": {
                    "conditions": [{"type": "Ready", "status": "False"}]
                }
            }
        ]
    }"#;

    #[test]
    fn node_list_parses_names_and_labels() {
        let nodes = parse_node_list(NODE_LIST).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].metadata.name, "pi-worker");
        assert_eq!(
            nodes[0].metadata.labels.get("kubernetes.io/hostname"),
            Some(&"pi-worker".to_string())
        );
    }

    #[test]
    fn readiness_requires_ready_true() {
        let nodes = parse_node_list(NODE_LIST).unwrap();
        assert!(nodes[0].is_ready());
        assert!(!nodes[1].is_ready());
    }

    #[test]
    fn node_without_status_is_not_ready() {
        let json = r#"{"items": [{"metadata": {"name": "fresh"}}]}"#;
        let nodes = parse_node_list(json).unwrap();
        assert!(!nodes[0].is_ready());
    }

    #[test]
    fn empty_list_parses() {
        let nodes = parse_node_list(r#"{"items": []}"#).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn garbage_json_is_an_error() {
        assert!(parse_node_list("nope").is_err());
    }

    #[test]
    fn labeling_is_an_upsert() {
        let first = label_args("/kc", "pi-worker", &[("skiff.dev/role", "worker")]);
        let second = label_args("/kc", "pi-worker", &[("skiff.dev/role", "worker")]);

        // Reapplying identical labels issues an identical --overwrite
        // invocation, which kubectl treats as a no-op rather than an error.
        assert_eq!(first, second);
        assert!(first.contains(&"--overwrite".to_string()));
        assert!(first.contains(&"skiff.dev/role=worker".to_string()));
    }

    #[test]
    fn pod_list_parses_phases() {
        let json = r#"{
            "items": [
                {"metadata": {"name": "nginx-1"}, "status": {"phase": "Running"}},
                {"metadata": {"name": "dash-1"}, "status": {"phase": "Pending"}}
            ]
        }"#;
        let pods = parse_pod_list(json).unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].status.phase, "Running");
        assert_eq!(pods[1].status.phase, "Pending");
    }
}
