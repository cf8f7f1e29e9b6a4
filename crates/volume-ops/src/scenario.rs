//! The end-to-end disk test run.
//!
//! A fresh disk is created, attached read-write to the first instance,
//! mounted, bind-mounted and written to, then torn down and moved to the
//! second instance where the written file must read back unchanged. An
//! optional read-only phase then attaches the disk to both instances at once.
//! The disk is always deleted at the end.
//!
//! Failures after the disk exists do not stop the run: they are recorded in
//! the [`RunReport`] so that every teardown step still executes and no remote
//! state is leaked.
use std::fmt::Display;

use tracing::{debug, error, info, warn};

use crate::config::GceConfig;
use crate::disk::{self, AttachMode, Disks};
use crate::exec::{CommandRunner, Gcloud};
use crate::Error;

/// The outcome of a run that got far enough to create its disk.
#[derive(Debug, Default)]
pub struct RunReport {
    failures: Vec<String>,
}

impl RunReport {
    /// Whether any step failed in a way that makes the run a failure.
    pub fn is_fatal(&self) -> bool {
        !self.failures.is_empty()
    }

    /// A description of every failed step, in the order they happened.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    fn fail(&mut self, step: &str, error: impl Display) {
        error!(step, %error, "Step failed");
        self.failures.push(format!("{}: {}", step, error));
    }
}

/// Runs the full test against a new disk called `disk_name`.
///
/// Returns an error only if the disk could not be created at all, in which
/// case nothing else is attempted.
pub fn run<R: CommandRunner>(
    gcloud: &Gcloud<R>,
    config: &GceConfig,
    disk_name: &str,
) -> Result<RunReport, Error> {
    disk::validate_disk_name(disk_name)?;
    let disks = Disks::new(gcloud, config);
    let disk = disks.create_with_retry(disk_name)?;

    let scenario = Scenario {
        gcloud,
        config,
        device: disk::device_path(config, &disk),
        global_mount: disk::global_mount_path(config, &disk),
        final_mount: disk::final_mount_path(config, &disk),
        disks,
        disk,
    };
    let mut report = RunReport::default();

    scenario.read_write_phase(&mut report);
    if config.read_only_phase {
        scenario.read_only_phase(&mut report);
    }

    if let Err(e) = scenario.disks.delete_with_retry(&scenario.disk) {
        report.fail("delete disk", e);
    } else {
        info!(disk = %scenario.disk, "Deleted disk");
    }
    Ok(report)
}

struct Scenario<'a, R> {
    gcloud: &'a Gcloud<R>,
    config: &'a GceConfig,
    disks: Disks<'a, R>,
    disk: String,
    device: String,
    global_mount: String,
    final_mount: String,
}

impl<'a, R: CommandRunner> Scenario<'a, R> {
    fn read_write_phase(&self, report: &mut RunReport) {
        let [first, second] = &self.config.instances;

        info!(instance = %first, "Attaching disk read-write to first instance");
        self.publish(first, AttachMode::ReadWrite, report);
        let file = self.file_path();
        if let Err(e) = self
            .gcloud
            .host(first)
            .write_file(&self.config.file_content, &file)
        {
            report.fail("write file", e);
        }
        self.verify_file(first, report);
        self.settle(self.config.settle_after_write);
        self.unpublish(first);
        self.detach(first, report);

        info!(instance = %second, "Moving disk read-write to second instance");
        self.publish(second, AttachMode::ReadWrite, report);
        self.verify_file(second, report);
        self.settle(self.config.settle_after_read);
        self.unpublish(second);
        self.detach(second, report);
    }

    fn read_only_phase(&self, report: &mut RunReport) {
        let [first, second] = &self.config.instances;

        info!("Attaching disk read-only to both instances");
        self.publish(first, AttachMode::ReadOnly, report);
        self.publish(second, AttachMode::ReadOnly, report);
        self.verify_file(first, report);
        self.verify_file(second, report);

        self.unpublish(first);
        self.detach(first, report);
        self.unpublish(second);
        self.detach(second, report);
    }

    // Attach, mount and bind-mount, the way the kubelet would for a pod.
    fn publish(&self, instance: &str, mode: AttachMode, report: &mut RunReport) {
        if let Err(e) = self.disks.attach_with_retry(&self.disk, instance, mode) {
            report.fail("attach disk", e);
        }

        let host = self.gcloud.host(instance);
        match host.list_disks(&self.config.disk_by_id_dir) {
            Ok(listing) => debug!(instance, %listing, "Disks visible on instance"),
            Err(e) => warn!(instance, error = %e, "Could not list disks on instance"),
        }

        let read_only = mode.is_read_only();
        if let Err(e) = host.mount_device(
            &self.device,
            &self.global_mount,
            &self.config.fs_type,
            read_only,
        ) {
            report.fail("mount device", e);
        }
        if let Err(e) = host.bind_mount(&self.global_mount, &self.final_mount, read_only) {
            report.fail("bind mount", e);
        }
    }

    // Teardown failures are logged by the mount operations themselves and are
    // not fatal: the detach that follows is what decides whether the disk
    // can move on.
    fn unpublish(&self, instance: &str) {
        let host = self.gcloud.host(instance);
        let _ = host.remove_bind_mount(&self.final_mount);
        let _ = host.unmount_device(&self.global_mount);
    }

    fn detach(&self, instance: &str, report: &mut RunReport) {
        match self.disks.detach_with_retry(&self.disk, instance) {
            Ok(()) => info!(instance, disk = %self.disk, "Detached disk"),
            Err(e) => report.fail("detach disk", e),
        }
    }

    fn verify_file(&self, instance: &str, report: &mut RunReport) {
        let expected = &self.config.file_content;
        match self.gcloud.host(instance).read_file(&self.file_path()) {
            Ok(actual) if &actual == expected => {
                info!(instance, "File content read back intact")
            }
            Ok(actual) => report.fail(
                "verify file",
                format!(
                    "content on {} differs. Expected: <{}> Actual: <{}>",
                    instance, expected, actual
                ),
            ),
            Err(e) => report.fail("read file", e),
        }
    }

    fn file_path(&self) -> String {
        disk::join_remote(&self.final_mount, &self.config.file_name)
    }

    fn settle(&self, pause: std::time::Duration) {
        if !pause.is_zero() {
            info!("Sleeping {:?} before unmount", pause);
            std::thread::sleep(pause);
        }
    }
}
