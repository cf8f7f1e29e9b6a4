//! The parts of `kubectl -o json` output the usage report reads.
//!
//! Pods and persistent volumes are decoded into records that keep the volume
//! source fields as raw JSON keyed by field name, since the volume type is the
//! field name itself. Persistent volume claims are decoded with the full
//! `k8s-openapi` type.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;

use crate::Error;

/// The phase of a claim that has a volume bound to it.
pub const BOUND_PHASE: &str = "Bound";

/// `kubectl get pods -o json`
#[derive(Debug, Default, Deserialize)]
pub struct PodList {
    /// The pods. Absent when the cluster has none.
    #[serde(default)]
    pub items: Vec<PodRecord>,
}

/// A pod, reduced to what is needed to find its volumes.
#[derive(Debug, Default, Deserialize)]
pub struct PodRecord {
    /// The pod's metadata; only the namespace is used.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// The pod spec. Pods without one are skipped.
    pub spec: Option<PodSpecRecord>,
}

/// The volume list of a pod spec.
#[derive(Debug, Default, Deserialize)]
pub struct PodSpecRecord {
    /// Volumes declared by the pod
    #[serde(default)]
    pub volumes: Vec<PodVolume>,
}

/// A pod volume: its name plus one field named after its volume type, e.g.
/// `emptyDir` or `persistentVolumeClaim`.
#[derive(Debug, Deserialize)]
pub struct PodVolume {
    /// The volume's name within the pod. Empty if the server left it out.
    #[serde(default)]
    pub name: String,
    /// Every other field of the volume, keyed by field name
    #[serde(flatten)]
    pub sources: BTreeMap<String, serde_json::Value>,
}

impl PodVolume {
    /// The claim name, if this volume refers to a persistent volume claim.
    ///
    /// Returns `Some(None)` for a claim reference without a `claimName`.
    pub fn claim_name(&self) -> Option<Option<&str>> {
        self.sources
            .get("persistentVolumeClaim")
            .map(|claim| claim.get("claimName").and_then(|n| n.as_str()))
    }
}

/// `kubectl get pv NAME -o json`
#[derive(Debug, Default, Deserialize)]
pub struct PersistentVolumeRecord {
    /// The volume spec, keyed by field name in sorted order.
    pub spec: Option<BTreeMap<String, serde_json::Value>>,
}

impl PersistentVolumeRecord {
    /// Discovers the volume type by elimination: the first spec field, in
    /// sorted order, that is not one of `non_type_keys`.
    ///
    /// This relies on every non-type field of the spec being listed, and will
    /// misreport a new bookkeeping field as a volume type.
    pub fn volume_type<S: AsRef<str>>(&self, name: &str, non_type_keys: &[S]) -> Result<String, Error> {
        let spec = self.spec.as_ref().ok_or_else(|| Error::MissingField {
            object: format!("pv {}", name),
            field: "spec",
        })?;
        spec.keys()
            .find(|key| !non_type_keys.iter().any(|skip| skip.as_ref() == key.as_str()))
            .cloned()
            .ok_or_else(|| Error::NoVolumeType {
                name: name.to_owned(),
            })
    }
}

/// Where a persistent volume claim points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimBinding {
    /// The claim is bound to the named persistent volume.
    Bound(String),
    /// The claim is in some other phase, e.g. `Pending` or `Lost`.
    Unbound(String),
}

/// Reads the binding out of a claim, validating that the fields it depends on
/// are present.
pub fn claim_binding(claim: &PersistentVolumeClaim, namespace: &str, name: &str) -> Result<ClaimBinding, Error> {
    let object = || format!("pvc {}/{}", namespace, name);
    let status = claim.status.as_ref().ok_or_else(|| Error::MissingField {
        object: object(),
        field: "status",
    })?;
    let phase = status.phase.as_ref().ok_or_else(|| Error::MissingField {
        object: object(),
        field: "status.phase",
    })?;
    if phase != BOUND_PHASE {
        return Ok(ClaimBinding::Unbound(phase.clone()));
    }
    let spec = claim.spec.as_ref().ok_or_else(|| Error::MissingField {
        object: object(),
        field: "spec",
    })?;
    let volume_name = spec.volume_name.as_ref().ok_or_else(|| Error::MissingField {
        object: object(),
        field: "spec.volumeName",
    })?;
    Ok(ClaimBinding::Bound(volume_name.clone()))
}
