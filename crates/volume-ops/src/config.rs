//! Configuration for the disk test run and the volume usage report
//!
//! Both configurations can be built by hand, starting from their `Default`
//! values, or, with the "cli" feature turned on, parsed from flags and
//! environment variables using [`GceConfig::new_from_flags`] and
//! [`UsageConfig::new_from_flags`].

use std::time::Duration;

#[cfg(feature = "cli")]
use structopt::StructOpt;

use crate::backoff::RetryPolicy;

const DEFAULT_PROJECT: &str = "saads-vms2";
const DEFAULT_ZONE: &str = "us-central1-b";
const DEFAULT_FIRST_INSTANCE: &str = "e2e-test-saadali-minion-group-s71i";
const DEFAULT_SECOND_INSTANCE: &str = "e2e-test-saadali-minion-group-68jg";
const DEFAULT_ACCOUNT: &str = "root";
const DEFAULT_FS_TYPE: &str = "ext4";
const DEFAULT_DISK_SIZE: &str = "10GB";
const DEFAULT_DISK_BY_ID_DIR: &str = "/dev/disk/by-id/";
const DEFAULT_DEVICE_PREFIX: &str = "scsi-0Google_PersistentDisk_";
const DEFAULT_GLOBAL_MOUNT_ROOT: &str = "/var/lib/saad/plugins/kubernetes.io/gce-pd/mounts/";
const DEFAULT_FINAL_MOUNT_ROOT: &str = "/var/lib/saad/pods/volumes/kubernetes.io~gce-pd/";
const DEFAULT_FILE_NAME: &str = "mytest.log";
const DEFAULT_FILE_CONTENT: &str = "hello world";
const DEFAULT_SETTLE_AFTER_WRITE_SECS: u64 = 3;
const DEFAULT_SETTLE_AFTER_READ_SECS: u64 = 10;

/// Persistent volume spec fields that never name the volume's type.
///
/// The volume type of a persistent volume is discovered by elimination: the
/// first spec field not in this list is taken to be the type. Any field the
/// API server adds to the spec in future must be added here too, or it will be
/// misreported as a volume type.
pub const DEFAULT_NON_TYPE_KEYS: &[&str] = &[
    "accessModes",
    "capacity",
    "claimRef",
    "mountOptions",
    "nodeAffinity",
    "persistentVolumeReclaimPolicy",
    "storageClassName",
    "volumeMode",
];

/// Everything the disk attach/mount test run needs to know about the cloud
/// project it runs against.
#[derive(Clone, Debug)]
pub struct GceConfig {
    /// The cloud CLI binary
    pub gcloud: String,
    /// The project disks are created in
    pub project: String,
    /// The zone disks and instances live in
    pub zone: String,
    /// The two instances the disk is moved between, in order
    pub instances: [String; 2],
    /// The account remote commands run as
    pub account: String,
    /// Filesystem the disk is formatted with
    pub fs_type: String,
    /// Size passed to disk creation, e.g. `10GB`
    pub disk_size: String,
    /// Name for the disk. A timestamped name is generated when unset.
    pub disk_name: Option<String>,
    /// Directory on the instances listing disks by id
    pub disk_by_id_dir: String,
    /// Prefix the instance gives attached persistent disks in `disk_by_id_dir`
    pub device_prefix: String,
    /// Root under which the device is mounted
    pub global_mount_root: String,
    /// Root under which the device mount is bind-mounted
    pub final_mount_root: String,
    /// Retry policy for disk create, delete, attach and detach
    pub retry: RetryPolicy,
    /// Name of the file written through the mount
    pub file_name: String,
    /// Content written to, and expected back from, that file
    pub file_content: String,
    /// Pause after writing on the first instance, before unmounting
    pub settle_after_write: Duration,
    /// Pause after reading on the second instance, before unmounting
    pub settle_after_read: Duration,
    /// Also run the read-only phase, attaching the disk to both instances at
    /// once
    pub read_only_phase: bool,
}

impl Default for GceConfig {
    fn default() -> Self {
        GceConfig {
            gcloud: "gcloud".to_owned(),
            project: DEFAULT_PROJECT.to_owned(),
            zone: DEFAULT_ZONE.to_owned(),
            instances: [
                DEFAULT_FIRST_INSTANCE.to_owned(),
                DEFAULT_SECOND_INSTANCE.to_owned(),
            ],
            account: DEFAULT_ACCOUNT.to_owned(),
            fs_type: DEFAULT_FS_TYPE.to_owned(),
            disk_size: DEFAULT_DISK_SIZE.to_owned(),
            disk_name: None,
            disk_by_id_dir: DEFAULT_DISK_BY_ID_DIR.to_owned(),
            device_prefix: DEFAULT_DEVICE_PREFIX.to_owned(),
            global_mount_root: DEFAULT_GLOBAL_MOUNT_ROOT.to_owned(),
            final_mount_root: DEFAULT_FINAL_MOUNT_ROOT.to_owned(),
            retry: RetryPolicy::default(),
            file_name: DEFAULT_FILE_NAME.to_owned(),
            file_content: DEFAULT_FILE_CONTENT.to_owned(),
            settle_after_write: Duration::from_secs(DEFAULT_SETTLE_AFTER_WRITE_SECS),
            settle_after_read: Duration::from_secs(DEFAULT_SETTLE_AFTER_READ_SECS),
            read_only_phase: false,
        }
    }
}

impl GceConfig {
    /// Parses all command line flags and sets the proper defaults. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn new_from_flags(version: &str) -> Self {
        let app = GceOpts::clap().version(version);
        GceOpts::from_clap(&app.get_matches()).into()
    }
}

/// Configuration for the volume usage report.
#[derive(Clone, Debug)]
pub struct UsageConfig {
    /// The cluster CLI binary
    pub kubectl: String,
    /// Namespace assumed for pods that do not report one
    pub default_namespace: String,
    /// Persistent volume spec fields skipped when discovering the volume type.
    /// See [`DEFAULT_NON_TYPE_KEYS`].
    pub non_type_keys: Vec<String>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        UsageConfig {
            kubectl: "kubectl".to_owned(),
            default_namespace: "default".to_owned(),
            non_type_keys: DEFAULT_NON_TYPE_KEYS
                .iter()
                .map(|k| (*k).to_owned())
                .collect(),
        }
    }
}

impl UsageConfig {
    /// Parses all command line flags and sets the proper defaults. The version
    /// of your application should be passed to set the proper version for the CLI
    #[cfg(any(feature = "cli", feature = "docs"))]
    #[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
    pub fn new_from_flags(version: &str) -> Self {
        let app = UsageOpts::clap().version(version);
        UsageOpts::from_clap(&app.get_matches()).into()
    }
}

/// CLI options for the disk attach/mount test run
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(
    name = "gce-pd-attach-mount",
    about = "Creates a persistent disk and moves it between two instances, checking data survives"
)]
pub struct GceOpts {
    #[structopt(
        long = "project",
        default_value = DEFAULT_PROJECT,
        env = "GCE_PROJECT",
        help = "The project the disk is created in"
    )]
    project: String,

    #[structopt(
        long = "zone",
        default_value = DEFAULT_ZONE,
        env = "GCE_ZONE",
        help = "The zone the disk and both instances live in"
    )]
    zone: String,

    #[structopt(
        long = "first-instance",
        default_value = DEFAULT_FIRST_INSTANCE,
        env = "GCE_FIRST_INSTANCE",
        help = "The instance the disk is attached to and written from first"
    )]
    first_instance: String,

    #[structopt(
        long = "second-instance",
        default_value = DEFAULT_SECOND_INSTANCE,
        env = "GCE_SECOND_INSTANCE",
        help = "The instance the disk is moved to and read back from"
    )]
    second_instance: String,

    #[structopt(
        long = "account",
        default_value = DEFAULT_ACCOUNT,
        env = "GCE_SSH_ACCOUNT",
        help = "The account remote commands run as. Must be able to mount"
    )]
    account: String,

    #[structopt(
        long = "disk-name",
        env = "GCE_DISK_NAME",
        help = "Name of the disk to create. Defaults to test-<timestamp>"
    )]
    disk_name: Option<String>,

    #[structopt(
        long = "disk-size",
        default_value = DEFAULT_DISK_SIZE,
        env = "GCE_DISK_SIZE",
        help = "Size of the disk to create"
    )]
    disk_size: String,

    #[structopt(
        long = "fs-type",
        default_value = DEFAULT_FS_TYPE,
        env = "GCE_FS_TYPE",
        help = "Filesystem to format the disk with if it is unformatted"
    )]
    fs_type: String,

    #[structopt(
        long = "global-mount-root",
        default_value = DEFAULT_GLOBAL_MOUNT_ROOT,
        help = "Directory on the instances under which the device is mounted"
    )]
    global_mount_root: String,

    #[structopt(
        long = "final-mount-root",
        default_value = DEFAULT_FINAL_MOUNT_ROOT,
        help = "Directory on the instances under which the device mount is bind-mounted"
    )]
    final_mount_root: String,

    #[structopt(
        long = "retry-timeout",
        default_value = "180",
        parse(try_from_str = parse_seconds),
        help = "Seconds to keep retrying disk operations before giving up"
    )]
    retry_timeout: Duration,

    #[structopt(
        long = "retry-interval",
        default_value = "5",
        parse(try_from_str = parse_seconds),
        help = "Seconds to wait between attempts at a disk operation"
    )]
    retry_interval: Duration,

    #[structopt(
        long = "read-only-phase",
        help = "After the read-write checks, attach the disk read-only to both instances at once"
    )]
    read_only_phase: bool,
}

#[cfg(feature = "cli")]
impl From<GceOpts> for GceConfig {
    fn from(opts: GceOpts) -> Self {
        GceConfig {
            project: opts.project,
            zone: opts.zone,
            instances: [opts.first_instance, opts.second_instance],
            account: opts.account,
            disk_name: opts.disk_name,
            disk_size: opts.disk_size,
            fs_type: opts.fs_type,
            global_mount_root: opts.global_mount_root,
            final_mount_root: opts.final_mount_root,
            retry: RetryPolicy {
                deadline: opts.retry_timeout,
                interval: opts.retry_interval,
            },
            read_only_phase: opts.read_only_phase,
            ..GceConfig::default()
        }
    }
}

/// CLI options for the volume usage report
#[derive(StructOpt, Clone, Debug)]
#[cfg(any(feature = "cli", feature = "docs"))]
#[cfg_attr(feature = "docs", doc(cfg(feature = "cli")))]
#[structopt(
    name = "pod-volume-usage",
    about = "Counts the volume types used by every pod in the cluster"
)]
pub struct UsageOpts {
    #[structopt(
        long = "kubectl",
        default_value = "kubectl",
        env = "KUBECTL",
        help = "The kubectl binary to use. It must already point at the cluster"
    )]
    kubectl: String,

    #[structopt(
        long = "non-type-keys",
        use_delimiter = true,
        help = "Persistent volume spec fields that are not volume types, separated by ','.
        Replaces the built-in list when given"
    )]
    non_type_keys: Vec<String>,
}

#[cfg(feature = "cli")]
impl From<UsageOpts> for UsageConfig {
    fn from(opts: UsageOpts) -> Self {
        let defaults = UsageConfig::default();
        UsageConfig {
            kubectl: opts.kubectl,
            non_type_keys: if opts.non_type_keys.is_empty() {
                defaults.non_type_keys
            } else {
                opts.non_type_keys
            },
            default_namespace: defaults.default_namespace,
        }
    }
}

#[cfg(feature = "cli")]
fn parse_seconds(s: &str) -> Result<Duration, std::num::ParseIntError> {
    Ok(Duration::from_secs(s.parse()?))
}
