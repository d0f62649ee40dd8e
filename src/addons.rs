//! Static add-on manifests and best-effort application
//!
//! Three add-on sets are applied after the node joins: the dashboard
//! (with an admin-access binding), a CI server, and a sample workload
//! exposed on a fixed node port. The manifests are static declarations;
//! application is an upsert, and one failed manifest does not abort the
//! rest of the set.

use std::path::Path;

use tracing::{info, warn};

use crate::kubectl;
use crate::remote::LocalRunner;

/// Dashboard deployment plus the admin-access service account binding
/// and a fixed NodePort service.
pub const DASHBOARD: &str = r#"apiVersion: v1
kind: Namespace
metadata:
  name: kubernetes-dashboard
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: admin-user
  namespace: kubernetes-dashboard
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: admin-user
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: cluster-admin
subjects:
- kind: ServiceAccount
  name: admin-user
  namespace: kubernetes-dashboard
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: kubernetes-dashboard
  namespace: kubernetes-dashboard
spec:
  replicas: 1
  selector:
    matchLabels:
      app: kubernetes-dashboard
  template:
    metadata:
      labels:
        app: kubernetes-dashboard
    spec:
      serviceAccountName: admin-user
      containers:
      - name: dashboard
        image: kubernetesui/dashboard:v2.7.0
        args:
        - --enable-skip-login
        - --namespace=kubernetes-dashboard
        ports:
        - containerPort: 8443
---
apiVersion: v1
kind: Service
metadata:
  name: kubernetes-dashboard
  namespace: kubernetes-dashboard
spec:
  type: NodePort
  selector:
    app: kubernetes-dashboard
  ports:
  - port: 443
    targetPort: 8443
    nodePort: 30443
"#;

/// CI server deployment with a fixed NodePort service
pub const CI_SERVER: &str = r#"apiVersion: v1
kind: Namespace
metadata:
  name: skiff-ci
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: ci-server
  namespace: skiff-ci
spec:
  replicas: 1
  selector:
    matchLabels:
      app: ci-server
  template:
    metadata:
      labels:
        app: ci-server
    spec:
      containers:
      - name: jenkins
        image: jenkins/jenkins:lts-jdk17
        ports:
        - containerPort: 8080
---
apiVersion: v1
kind: Service
metadata:
  name: ci-server
  namespace: skiff-ci
spec:
  type: NodePort
  selector:
    app: ci-server
  ports:
  - port: 8080
    targetPort: 8080
    nodePort: 30800
"#;

/// Sample workload with a fixed NodePort service
pub const SAMPLE_WORKLOAD: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: sample-web
  namespace: default
spec:
  replicas: 1
  selector:
    matchLabels:
      app: sample-web
  template:
    metadata:
      labels:
        app: sample-web
    spec:
      containers:
      - name: web
        image: nginx:1.27-alpine
        ports:
        - containerPort: 80
---
apiVersion: v1
kind: Service
metadata:
  name: sample-web
  namespace: default
spec:
  type: NodePort
  selector:
    app: sample-web
  ports:
  - port: 80
    targetPort: 80
    nodePort: 30080
"#;

/// The full add-on set, in application order
pub fn manifest_set() -> Vec<(&'static str, &'static str)> {
    vec![
        ("dashboard", DASHBOARD),
        ("ci-server", CI_SERVER),
        ("sample-workload", SAMPLE_WORKLOAD),
    ]
}

/// Apply every manifest in the set, best-effort.
///
/// A failure is logged as a warning and the remaining manifests still
/// apply. Returns how many applied cleanly.
pub async fn apply_all(local: &dyn LocalRunner, kubeconfig: &Path) -> usize {
    let mut applied = 0;
    for (name, manifest) in manifest_set() {
        match kubectl::apply_manifest(local, kubeconfig, manifest).await {
            Ok(()) => {
                info!(addon = name, "applied");
                applied += 1;
            }
            Err(e) => {
                warn!(addon = name, error = %e, "add-on failed to apply, continuing");
            }
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_contains_all_three_addons() {
        let names: Vec<_> = manifest_set().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["dashboard", "ci-server", "sample-workload"]);
    }

    #[test]
    fn dashboard_carries_admin_binding() {
        assert!(DASHBOARD.contains("kind: ClusterRoleBinding"));
        assert!(DASHBOARD.contains("cluster-admin"));
    }

    #[test]
    fn node_ports_match_crate_constants() {
        assert!(SAMPLE_WORKLOAD.contains(&format!("nodePort: {}", crate::SAMPLE_NODE_PORT)));
        assert!(DASHBOARD.contains(&format!("nodePort: {}", crate::DASHBOARD_NODE_PORT)));
        assert!(CI_SERVER.contains(&format!("nodePort: {}", crate::CI_NODE_PORT)));
    }

    #[test]
    fn every_manifest_is_valid_multi_document_yaml() {
        for (name, manifest) in manifest_set() {
            for document in manifest.split("\n---\n") {
                let parsed: Result<serde_yaml::Value, _> = serde_yaml::from_str(document);
                assert!(parsed.is_ok(), "{} has an unparseable document", name);
            }
        }
    }

    #[tokio::test]
    async fn one_failed_manifest_does_not_stop_the_rest() {
        use crate::remote::fake::{FakeRunner, Scripted};

        let runner = FakeRunner::new(vec![
            Scripted::Completes(0, ""),
            Scripted::Completes(1, ""),
            Scripted::Completes(0, ""),
        ]);

        let applied = apply_all(&runner, Path::new("/kc")).await;
        assert_eq!(applied, 2);
        assert_eq!(runner.invocations.lock().unwrap().len(), 3);
    }
}
