//! Real cluster backend using `kubectl` commands.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::backend::{Cluster, object_is_ready};
use crate::error::{Error, Result};
use crate::types::{ApiObject, ObjectRef};

/// Backend that executes real `kubectl` commands.
pub struct KubectlCluster {
    /// Path to the kubectl executable
    kubectl_path: String,
    context: Option<String>,
    kubeconfig: Option<PathBuf>,
}

impl KubectlCluster {
    /// Create a new KubectlCluster.
    ///
    /// Returns an error if kubectl is not installed.
    pub fn new() -> Result<Self> {
        let kubectl_path = find_kubectl()?;
        Ok(Self {
            kubectl_path,
            context: None,
            kubeconfig: None,
        })
    }

    /// Use a specific kubeconfig context
    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Use a specific kubeconfig file
    #[must_use]
    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.kubectl_path);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.args(args);
        cmd
    }

    /// Run a kubectl command and return output.
    fn run_kubectl(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
        log::debug!("kubectl {}", args.join(" "));
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        if stdin.is_some() {
            cmd.stdin(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| Error::CommandFailed {
            message: format!("failed to execute kubectl: {e}"),
            stderr: String::new(),
        })?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input)?;
        }

        Ok(child.wait_with_output()?)
    }

    /// Run a kubectl command and check for success.
    fn run_kubectl_checked(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        object: &str,
    ) -> Result<String> {
        let output = self.run_kubectl(args, stdin)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_kubectl_output(&stderr, object));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Build the `get`/`delete` target arguments for an object
fn target_args(object: &ObjectRef) -> Vec<String> {
    let mut args = vec![object.resource_name(), object.name.clone()];
    if let Some(namespace) = &object.namespace {
        args.push("--namespace".to_string());
        args.push(namespace.clone());
    }
    args
}

impl Cluster for KubectlCluster {
    fn name(&self) -> &str {
        "kubectl"
    }

    fn get(&self, object: &ObjectRef) -> Result<Option<ApiObject>> {
        let target = target_args(object);
        let mut args: Vec<&str> = vec!["get"];
        args.extend(target.iter().map(String::as_str));
        args.extend(["-o", "json", "--ignore-not-found"]);

        let stdout = self.run_kubectl_checked(&args, None, &object.to_string())?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&stdout)?))
    }

    fn apply(&self, object: &ApiObject) -> Result<ApiObject> {
        let payload = serde_json::to_vec(object)?;
        let stdout = self.run_kubectl_checked(
            &["apply", "-f", "-", "-o", "json"],
            Some(&payload),
            &object.object_ref().to_string(),
        )?;
        Ok(serde_json::from_str(&stdout)?)
    }

    fn delete(&self, object: &ObjectRef) -> Result<bool> {
        let target = target_args(object);
        let mut args: Vec<&str> = vec!["delete"];
        args.extend(target.iter().map(String::as_str));
        args.push("--ignore-not-found");

        let stdout = self.run_kubectl_checked(&args, None, &object.to_string())?;
        Ok(!stdout.trim().is_empty())
    }

    fn is_ready(&self, object: &ObjectRef) -> Result<bool> {
        Ok(self.get(object)?.as_ref().is_some_and(object_is_ready))
    }
}

/// Find kubectl installation.
fn find_kubectl() -> Result<String> {
    if let Ok(path) = std::env::var("KUBECTL")
        && Path::new(&path).exists()
    {
        return Ok(path);
    }

    let paths = ["/usr/local/bin/kubectl", "/usr/bin/kubectl", "/opt/homebrew/bin/kubectl"];
    for path in &paths {
        if Path::new(path).exists() {
            return Ok((*path).to_string());
        }
    }

    let output = Command::new("which")
        .arg("kubectl")
        .output()
        .map_err(|_| Error::KubectlNotFound)?;

    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(path);
        }
    }

    Err(Error::KubectlNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NamespaceSpec, ObjectMeta};
    use serde_json::json;

    #[test]
    fn test_target_args() {
        let args = target_args(&ObjectRef::secret("mongodb", "mongodb-secret"));
        assert_eq!(args, ["secrets", "mongodb-secret", "--namespace", "mongodb"]);

        let args = target_args(&ObjectRef::namespace("mongodb"));
        assert_eq!(args, ["namespaces", "mongodb"]);
    }

    #[test]
    fn test_namespace_ready_when_active() {
        let pending = NamespaceSpec::new("db").to_object();
        assert!(!object_is_ready(&pending));

        let active = pending.with_field("status", json!({ "phase": "Active" }));
        assert!(object_is_ready(&active));
    }

    #[test]
    fn test_deployment_ready_when_replicas_available() {
        let deployment = ApiObject::new("apps/v1", "Deployment", ObjectMeta::namespaced("db", "db"))
            .with_field("spec", json!({ "replicas": 2 }));
        let partial = deployment
            .clone()
            .with_field("status", json!({ "availableReplicas": 1 }));
        let full = deployment.with_field("status", json!({ "availableReplicas": 2 }));

        assert!(!object_is_ready(&partial));
        assert!(object_is_ready(&full));
    }
}
