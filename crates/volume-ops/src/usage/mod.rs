//! Counts the volume types used by the pods of a cluster.
//!
//! Every source field of every pod volume counts once towards its type.
//! Persistent volume claims are followed to the volume they are bound to and
//! counted under that volume's type instead, so a cluster using claims backed
//! by GCE persistent disks reports `gcePersistentDisk` rather than
//! `persistentVolumeClaim`.
use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use crate::config::UsageConfig;
use crate::exec::CommandRunner;
use crate::Error;

mod kubectl;
pub mod records;

pub use kubectl::Kubectl;
use records::{claim_binding, ClaimBinding, PodList};

/// Counted for a claim that is not bound to a volume.
pub const UNBOUND_PVC: &str = "unboundPVC";
/// Counted for a claim that could not be fetched or was malformed.
pub const FAILED_TO_DEREF_PVC: &str = "failedToDerefPVC";
/// Counted for a bound claim whose volume could not be fetched or typed.
pub const FAILED_TO_DEREF_PV: &str = "failedToDerefPV";

const PERSISTENT_VOLUME_CLAIM: &str = "persistentVolumeClaim";

/// Volume type counts, ordered by type name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VolumeUsage {
    counts: BTreeMap<String, u32>,
}

impl VolumeUsage {
    /// The number of volumes of the given type.
    pub fn count(&self, volume_type: &str) -> u32 {
        self.counts.get(volume_type).copied().unwrap_or(0)
    }

    /// All counts, ordered by type name.
    pub fn counts(&self) -> &BTreeMap<String, u32> {
        &self.counts
    }

    /// Whether no volumes were counted.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn add(&mut self, volume_type: &str) {
        *self.counts.entry(volume_type.to_owned()).or_insert(0) += 1;
    }
}

impl fmt::Display for VolumeUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (volume_type, count) in &self.counts {
            writeln!(f, "{}: {}", volume_type, count)?;
        }
        Ok(())
    }
}

/// Fetches every pod in the cluster and tallies its volumes.
pub fn report<R: CommandRunner>(kubectl: &Kubectl<R>, config: &UsageConfig) -> Result<VolumeUsage, Error> {
    let pods = kubectl.get_pods()?;
    info!(pods = pods.items.len(), "Fetched pods");
    Ok(tally(kubectl, &pods, config))
}

/// Tallies the volumes of `pods`, dereferencing claims through `kubectl`.
///
/// Lookup failures never abort the tally; they are counted under the
/// [`FAILED_TO_DEREF_PVC`] and [`FAILED_TO_DEREF_PV`] categories.
pub fn tally<R: CommandRunner>(kubectl: &Kubectl<R>, pods: &PodList, config: &UsageConfig) -> VolumeUsage {
    let mut usage = VolumeUsage::default();
    for pod in &pods.items {
        let volumes = match &pod.spec {
            Some(spec) => &spec.volumes,
            None => continue,
        };
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(config.default_namespace.as_str());

        for volume in volumes {
            for source in volume.sources.keys() {
                if source != PERSISTENT_VOLUME_CLAIM {
                    usage.add(source);
                    continue;
                }
                match volume.claim_name() {
                    Some(Some(claim)) => usage.add(&dereference(kubectl, namespace, claim, config)),
                    _ => warn!(volume = %volume.name, namespace, "Claim reference has no claimName, skipping"),
                }
            }
        }
    }
    usage
}

fn dereference<R: CommandRunner>(
    kubectl: &Kubectl<R>,
    namespace: &str,
    claim: &str,
    config: &UsageConfig,
) -> String {
    let binding = kubectl
        .get_pvc(namespace, claim)
        .and_then(|pvc| claim_binding(&pvc, namespace, claim));
    let volume = match binding {
        Ok(ClaimBinding::Bound(volume)) => volume,
        Ok(ClaimBinding::Unbound(phase)) => {
            info!(namespace, claim, %phase, "Claim is not bound");
            return UNBOUND_PVC.to_owned();
        }
        Err(e) => {
            warn!(namespace, claim, error = %e, "Failed to get PVC");
            return FAILED_TO_DEREF_PVC.to_owned();
        }
    };

    match kubectl
        .get_pv(&volume)
        .and_then(|pv| pv.volume_type(&volume, config.non_type_keys.as_slice()))
    {
        Ok(volume_type) => volume_type,
        Err(e) => {
            warn!(volume = %volume, error = %e, "Failed to get PV");
            FAILED_TO_DEREF_PV.to_owned()
        }
    }
}
