//! Final cluster state summary
//!
//! Read-only: queries node and workload state and renders access
//! instructions. Query failures degrade to warnings in the summary -
//! a run that bootstrapped successfully is never failed by its report.

use std::path::Path;

use tracing::warn;

use crate::kubectl;
use crate::remote::LocalRunner;
use crate::{DASHBOARD_NODE_PORT, SAMPLE_NODE_PORT};

/// One node line in the summary
#[derive(Debug, Clone)]
pub struct NodeSummary {
    /// Host-assigned node name
    pub name: String,
    /// Whether the node reports Ready
    pub ready: bool,
}

/// Snapshot of the cluster at the end of the run
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    /// All registered nodes
    pub nodes: Vec<NodeSummary>,
    /// Pods in the Running phase
    pub pods_running: usize,
    /// Total pods observed
    pub pods_total: usize,
    /// Identity of the node this run registered
    pub node_identity: String,
    /// Externally reachable cluster address
    pub address: String,
    /// Installed credential path, rendered for the operator
    pub kubeconfig_path: String,
    /// Warnings accumulated while reporting
    pub warnings: Vec<String>,
}

/// Query final state and assemble the summary. Never fails.
pub async fn report(
    local: &dyn LocalRunner,
    kubeconfig: &Path,
    address: &str,
    node_identity: &str,
) -> ClusterSummary {
    let mut warnings = Vec::new();

    let nodes = match kubectl::list_nodes(local, kubeconfig).await {
        Ok(nodes) => nodes
            .iter()
            .map(|n| NodeSummary {
                name: n.metadata.name.clone(),
                ready: n.is_ready(),
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "could not list nodes for the report");
            warnings.push(format!("node listing failed: {}", e));
            Vec::new()
        }
    };

    let (pods_running, pods_total) = match kubectl::list_pods(local, kubeconfig).await {
        Ok(pods) => (
            pods.iter().filter(|p| p.status.phase == "Running").count(),
            pods.len(),
        ),
        Err(e) => {
            warn!(error = %e, "could not list pods for the report");
            warnings.push(format!("pod listing failed: {}", e));
            (0, 0)
        }
    };

    ClusterSummary {
        nodes,
        pods_running,
        pods_total,
        node_identity: node_identity.to_string(),
        address: address.to_string(),
        kubeconfig_path: kubeconfig.display().to_string(),
        warnings,
    }
}

/// Render the summary with access instructions and follow-up commands
pub fn render(summary: &ClusterSummary) -> String {
    let mut out = String::new();

    out.push_str("=== Cluster ready ===\n\n");
    out.push_str(&format!("Registered node: {}\n", summary.node_identity));
    out.push_str(&format!(
        "API endpoint:    https://{}:{}\n",
        summary.address,
        crate::SUPERVISOR_PORT
    ));
    out.push_str(&format!("Credential:      {}\n\n", summary.kubeconfig_path));

    out.push_str("Nodes:\n");
    for node in &summary.nodes {
        let state = if node.ready { "Ready" } else { "NotReady" };
        out.push_str(&format!("  {:<24} {}\n", node.name, state));
    }

    out.push_str(&format!(
        "\nPods: {}/{} running\n",
        summary.pods_running, summary.pods_total
    ));

    out.push_str("\nAccess:\n");
    out.push_str(&format!(
        "  Dashboard:       https://{}:{}\n",
        summary.address, DASHBOARD_NODE_PORT
    ));
    out.push_str(&format!(
        "  Sample workload: http://{}:{}\n",
        summary.address, SAMPLE_NODE_PORT
    ));

    out.push_str("\nNext steps:\n");
    out.push_str("  kubectl get nodes\n");
    out.push_str("  kubectl get pods -A\n");
    out.push_str("  To remove the worker:  ssh <user>@<host> sudo /usr/local/bin/k3s-agent-uninstall.sh\n");
    out.push_str("  To remove the server:  ssh <user>@<host> sudo /usr/local/bin/k3s-uninstall.sh\n");

    if !summary.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &summary.warnings {
            out.push_str(&format!("  {}\n", w));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_summary() -> ClusterSummary {
        ClusterSummary {
            nodes: vec![
                NodeSummary {
                    name: "skiff-server".to_string(),
                    ready: true,
                },
                NodeSummary {
                    name: "pi-worker".to_string(),
                    ready: true,
                },
            ],
            pods_running: 5,
            pods_total: 6,
            node_identity: "pi-worker".to_string(),
            address: "10.0.0.17".to_string(),
            kubeconfig_path: "/home/op/.kube/config".to_string(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn render_includes_identity_and_endpoint() {
        let text = render(&sample_summary());
        assert!(text.contains("pi-worker"));
        assert!(text.contains("https://10.0.0.17:6443"));
        assert!(text.contains("/home/op/.kube/config"));
    }

    #[test]
    fn render_includes_dashboard_node_port() {
        let text = render(&sample_summary());
        assert!(text.contains("https://10.0.0.17:30443"));
        assert!(text.contains("http://10.0.0.17:30080"));
    }

    #[test]
    fn render_surfaces_warnings_without_failing() {
        let mut summary = sample_summary();
        summary.warnings.push("pod listing failed: timeout".to_string());
        let text = render(&summary);
        assert!(text.contains("Warnings:"));
        assert!(text.contains("pod listing failed"));
    }

    #[test]
    fn not_ready_nodes_are_labeled() {
        let mut summary = sample_summary();
        summary.nodes[1].ready = false;
        let text = render(&summary);
        assert!(text.contains("NotReady"));
    }

    #[tokio::test]
    async fn query_failures_degrade_to_warnings() {
        use crate::remote::fake::{FakeRunner, Scripted};

        let runner = FakeRunner::new(vec![
            Scripted::Completes(1, ""),
            Scripted::Completes(1, ""),
        ]);

        let summary = report(&runner, Path::new("/kc"), "10.0.0.5", "pi-host").await;
        assert_eq!(summary.warnings.len(), 2);
        assert!(summary.nodes.is_empty());
        assert_eq!(summary.node_identity, "pi-host");
    }
}
