//! Persistent disk lifecycle: create, attach, detach and delete, plus the
//! paths a disk appears at once attached to an instance.
use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info};

use crate::config::GceConfig;
use crate::exec::{CommandError, CommandRunner, Gcloud};
use crate::Error;

lazy_static! {
    static ref DISK_NAME: Regex = Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap();
}

/// How a disk is attached to an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachMode {
    /// Attached for reading and writing. A disk can only be attached read-write
    /// to one instance at a time.
    ReadWrite,
    /// Attached read-only. Any number of instances can share the disk this way.
    ReadOnly,
}

impl AttachMode {
    /// Whether the mode forbids writes.
    pub fn is_read_only(self) -> bool {
        matches!(self, AttachMode::ReadOnly)
    }
}

impl fmt::Display for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachMode::ReadWrite => f.write_str("rw"),
            AttachMode::ReadOnly => f.write_str("ro"),
        }
    }
}

/// Generates a disk name from the current local time.
pub fn timestamped_disk_name() -> String {
    disk_name_at(&Local::now())
}

/// Generates the disk name for a given instant, as `test-YYYYMMDDhhmmss`.
pub fn disk_name_at<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    format!("test-{}", time.format("%Y%m%d%H%M%S"))
}

/// Checks `name` against the cloud provider's resource naming rule.
pub fn validate_disk_name(name: &str) -> Result<(), Error> {
    if DISK_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidDiskName {
            name: name.to_owned(),
        })
    }
}

/// The device path an attached disk shows up at on an instance.
pub fn device_path(config: &GceConfig, disk: &str) -> String {
    join_remote(
        &config.disk_by_id_dir,
        &format!("{}{}", config.device_prefix, disk),
    )
}

/// Where the device is mounted on an instance.
pub fn global_mount_path(config: &GceConfig, disk: &str) -> String {
    join_remote(&config.global_mount_root, disk)
}

/// Where the device mount is bind-mounted on an instance.
pub fn final_mount_path(config: &GceConfig, disk: &str) -> String {
    join_remote(&config.final_mount_root, disk)
}

/// Joins a path on a remote (always Unix) host.
pub(crate) fn join_remote(dir: &str, name: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Disk operations for one project and zone.
pub struct Disks<'a, R> {
    gcloud: &'a Gcloud<R>,
    config: &'a GceConfig,
}

impl<'a, R: CommandRunner> Disks<'a, R> {
    /// Creates a handle for managing disks in the project and zone in `config`.
    pub fn new(gcloud: &'a Gcloud<R>, config: &'a GceConfig) -> Self {
        Disks { gcloud, config }
    }

    /// Creates a disk, returning its name.
    pub fn create(&self, name: &str) -> Result<String, CommandError> {
        info!(disk = name, "Creating disk");
        let args = vec![
            "compute".to_owned(),
            "--quiet".to_owned(),
            format!("--project={}", self.config.project),
            "disks".to_owned(),
            "create".to_owned(),
            format!("--zone={}", self.config.zone),
            format!("--size={}", self.config.disk_size),
            name.to_owned(),
        ];
        match self.gcloud.run(&args) {
            Ok(output) => {
                info!(disk = name, output = %String::from_utf8_lossy(&output), "Created disk");
                Ok(name.to_owned())
            }
            Err(e) => {
                error!(disk = name, error = %e, "Creating disk failed");
                Err(e)
            }
        }
    }

    /// Deletes a disk. The disk must not be attached anywhere.
    pub fn delete(&self, name: &str) -> Result<(), CommandError> {
        info!(disk = name, "Deleting disk");
        let args = vec![
            "compute".to_owned(),
            "--quiet".to_owned(),
            format!("--project={}", self.config.project),
            "disks".to_owned(),
            "delete".to_owned(),
            format!("--zone={}", self.config.zone),
            name.to_owned(),
        ];
        self.run_logged(&args, name, "Deleting disk")
    }

    /// Attaches a disk to an instance. The device name on the instance is the
    /// disk name.
    pub fn attach(&self, name: &str, instance: &str, mode: AttachMode) -> Result<(), CommandError> {
        info!(disk = name, instance, %mode, "Attaching disk");
        let args = vec![
            "compute".to_owned(),
            "instances".to_owned(),
            "--quiet".to_owned(),
            "attach-disk".to_owned(),
            instance.to_owned(),
            format!("--disk={}", name),
            format!("--device-name={}", name),
            format!("--mode={}", mode),
            format!("--zone={}", self.config.zone),
        ];
        self.run_logged(&args, name, "Attaching disk")
    }

    /// Detaches a disk from an instance.
    pub fn detach(&self, name: &str, instance: &str) -> Result<(), CommandError> {
        info!(disk = name, instance, "Detaching disk");
        let args = vec![
            "compute".to_owned(),
            "instances".to_owned(),
            "--quiet".to_owned(),
            "detach-disk".to_owned(),
            instance.to_owned(),
            format!("--disk={}", name),
            format!("--zone={}", self.config.zone),
        ];
        self.run_logged(&args, name, "Detaching disk")
    }

    /// [`Disks::create`], retried under the configured policy.
    pub fn create_with_retry(&self, name: &str) -> Result<String, CommandError> {
        self.config.retry.run("create disk", || self.create(name))
    }

    /// [`Disks::delete`], retried under the configured policy.
    pub fn delete_with_retry(&self, name: &str) -> Result<(), CommandError> {
        self.config.retry.run("delete disk", || self.delete(name))
    }

    /// [`Disks::attach`], retried under the configured policy.
    pub fn attach_with_retry(
        &self,
        name: &str,
        instance: &str,
        mode: AttachMode,
    ) -> Result<(), CommandError> {
        self.config
            .retry
            .run("attach disk", || self.attach(name, instance, mode))
    }

    /// [`Disks::detach`], retried under the configured policy.
    pub fn detach_with_retry(&self, name: &str, instance: &str) -> Result<(), CommandError> {
        self.config
            .retry
            .run("detach disk", || self.detach(name, instance))
    }

    fn run_logged(&self, args: &[String], disk: &str, action: &str) -> Result<(), CommandError> {
        match self.gcloud.run(args) {
            Ok(output) => {
                info!(disk, output = %String::from_utf8_lossy(&output), "{} succeeded", action);
                Ok(())
            }
            Err(e) => {
                error!(disk, error = %e, "{} failed", action);
                Err(e)
            }
        }
    }
}
