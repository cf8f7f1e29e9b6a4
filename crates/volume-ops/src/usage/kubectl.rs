use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::records::{PersistentVolumeRecord, PodList};
use crate::config::UsageConfig;
use crate::exec::CommandRunner;
use crate::Error;

/// The cluster CLI, used read-only to fetch objects as JSON.
#[derive(Debug)]
pub struct Kubectl<R> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> Kubectl<R> {
    /// Creates a client that invokes the CLI named in `config` through `runner`.
    pub fn new(runner: R, config: &UsageConfig) -> Self {
        Kubectl {
            runner,
            program: config.kubectl.clone(),
        }
    }

    /// Lists the pods of every namespace.
    pub fn get_pods(&self) -> Result<PodList, Error> {
        self.get_json("pods", &["get", "pods", "--all-namespaces", "-o=json"])
    }

    /// Fetches a persistent volume claim.
    pub fn get_pvc(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim, Error> {
        let namespace_flag = format!("--namespace={}", namespace);
        self.get_json(
            &format!("pvc {}/{}", namespace, name),
            &["get", "pvc", name, &namespace_flag, "-o=json"],
        )
    }

    /// Fetches a persistent volume.
    pub fn get_pv(&self, name: &str) -> Result<PersistentVolumeRecord, Error> {
        self.get_json(&format!("pv {}", name), &["get", "pv", name, "-o=json"])
    }

    fn get_json<T: DeserializeOwned>(&self, object: &str, args: &[&str]) -> Result<T, Error> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
        debug!(program = %self.program, ?args, "Fetching {}", object);
        let output = self.runner.output(&self.program, &args).map_err(|e| {
            warn!(error = %e, "Failed to fetch {}", object);
            e
        })?;
        // kubectl prints deprecation and API server warnings on stderr even
        // when it succeeds; only stdout holds the document.
        if !output.stderr.is_empty() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "kubectl printed to stderr while fetching {}", object);
        }
        serde_json::from_slice(&output.stdout).map_err(|source| Error::Decode {
            object: object.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exec::test_utils::ScriptedRunner;

    #[test]
    fn pvc_lookup_is_namespaced() {
        let runner = ScriptedRunner::new().respond(
            "get pvc",
            r#"{"apiVersion":"v1","kind":"PersistentVolumeClaim","metadata":{"name":"data"}}"#,
        );
        let kubectl = Kubectl::new(&runner, &UsageConfig::default());

        kubectl.get_pvc("web", "data").unwrap();

        assert_eq!(
            runner.calls.borrow().as_slice(),
            ["kubectl get pvc data --namespace=web -o=json"]
        );
    }

    #[test]
    fn pods_are_listed_across_namespaces() {
        let runner = ScriptedRunner::new().respond("get pods", r#"{"items":[]}"#);
        let kubectl = Kubectl::new(&runner, &UsageConfig::default());

        let pods = kubectl.get_pods().unwrap();

        assert!(pods.items.is_empty());
        assert_eq!(
            runner.calls.borrow().as_slice(),
            ["kubectl get pods --all-namespaces -o=json"]
        );
    }

    #[test]
    fn stderr_warnings_do_not_break_decoding() {
        let runner = ScriptedRunner::new().respond_with_warning(
            "get pods",
            r#"{"items":[{"metadata":{"namespace":"web"},"spec":{"volumes":[{"name":"scratch","emptyDir":{}}]}}]}"#,
            "Warning: policy/v1beta1 PodSecurityPolicy is deprecated in v1.21+\n",
        );
        let kubectl = Kubectl::new(&runner, &UsageConfig::default());

        let pods = kubectl.get_pods().unwrap();

        assert_eq!(pods.items.len(), 1);
        let volumes = &pods.items[0].spec.as_ref().unwrap().volumes;
        assert!(volumes[0].sources.contains_key("emptyDir"));
    }

    #[test]
    fn malformed_output_is_a_decode_error() {
        let runner = ScriptedRunner::new().respond("get pv", "error: the server doesn't have a resource type");
        let kubectl = Kubectl::new(&runner, &UsageConfig::default());

        match kubectl.get_pv("pv-1") {
            Err(Error::Decode { object, .. }) => assert_eq!(object, "pv pv-1"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn command_failure_is_propagated() {
        let runner = ScriptedRunner::new().fail("get pv", 1);
        let kubectl = Kubectl::new(&runner, &UsageConfig::default());

        assert!(matches!(kubectl.get_pv("pv-1"), Err(Error::Command(_))));
    }
}
