//! Mounting an attached disk on an instance, and bind-mounting it to the path
//! a pod would see.
//!
//! Each mount point is created with `mkdir` before anything is mounted on it
//! and removed with `rmdir` after it is unmounted. Teardown always attempts the
//! `rmdir`, whether or not the unmount succeeded, so that failed runs do not
//! leave empty directories behind.
use tracing::{debug, error, info, warn};

use crate::exec::{CommandError, CommandRunner, RemoteHost};

pub(crate) mod command;

/// fsck exit status: errors were found and corrected.
const FSCK_ERRORS_CORRECTED: i32 = 1;
/// fsck exit status: errors were found but left uncorrected.
const FSCK_ERRORS_UNCORRECTED: i32 = 4;

/// The result of the repair pass run before mounting a device read-write.
#[derive(Debug)]
pub enum FsckOutcome {
    /// No problems were found.
    Clean,
    /// Problems were found and repaired.
    Corrected,
    /// fsck failed in a way that does not say anything about the filesystem,
    /// for example because the device has never been formatted. Mounting goes
    /// ahead.
    Inconclusive(CommandError),
}

/// Classifies the result of `fsck -a` by its exit status. Uncorrected errors
/// are returned as an error, since mounting would risk further damage.
pub fn classify_fsck(result: Result<Vec<u8>, CommandError>) -> Result<FsckOutcome, CommandError> {
    match result {
        Ok(_) => Ok(FsckOutcome::Clean),
        Err(e) => match e.exit_code() {
            Some(FSCK_ERRORS_CORRECTED) => Ok(FsckOutcome::Corrected),
            Some(FSCK_ERRORS_UNCORRECTED) => Err(e),
            _ => Ok(FsckOutcome::Inconclusive(e)),
        },
    }
}

// Which part of format-and-mount failed. Only a failure after a format was
// attempted leaves the mount directory in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Repair,
    Mount,
    Format,
}

impl<'a, R: CommandRunner> RemoteHost<'a, R> {
    /// Creates `dir`, and any missing parents, with mode 0750.
    pub fn mkdir(&self, dir: &str) -> Result<(), CommandError> {
        debug!(instance = self.instance(), dir, "Creating directory");
        self.exec(&command::mkdir(dir)).map(drop).map_err(|e| {
            error!(instance = self.instance(), dir, error = %e, "Failed to create directory");
            e
        })
    }

    /// Removes the empty directory `dir`.
    pub fn rmdir(&self, dir: &str) -> Result<(), CommandError> {
        debug!(instance = self.instance(), dir, "Removing directory");
        self.exec(&command::rmdir(dir)).map(drop).map_err(|e| {
            warn!(instance = self.instance(), dir, error = %e, "Failed to remove directory");
            e
        })
    }

    /// Unmounts whatever is mounted at `dir`.
    pub fn unmount(&self, dir: &str) -> Result<(), CommandError> {
        debug!(instance = self.instance(), dir, "Unmounting");
        self.exec(&command::umount(dir)).map(drop).map_err(|e| {
            warn!(instance = self.instance(), dir, error = %e, "Failed to unmount");
            e
        })
    }

    /// Mounts `source` on `target`.
    ///
    /// A `bind` option is honoured the way the kernel requires: a plain
    /// `-o bind` mount followed by a `remount` carrying the remaining options.
    pub fn mount<S: AsRef<str>>(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[S],
    ) -> Result<(), CommandError> {
        match command::bind_remount_options(options) {
            Some(remount) => {
                self.mount_once(source, target, fs_type, &["bind"])?;
                self.mount_once(source, target, fs_type, remount.as_slice())
            }
            None => self.mount_once(source, target, fs_type, options),
        }
    }

    fn mount_once<S: AsRef<str>>(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[S],
    ) -> Result<(), CommandError> {
        let line = command::mount(source, target, fs_type, options);
        debug!(instance = self.instance(), command = %line, "Mounting");
        self.exec(&line).map(drop).map_err(|e| {
            warn!(instance = self.instance(), source, target, error = %e, "Mount failed");
            e
        })
    }

    /// Runs the repair pass on `device` and classifies the result.
    pub fn fsck(&self, device: &str) -> Result<FsckOutcome, CommandError> {
        info!(instance = self.instance(), device, "Running fsck to fix repairable issues");
        classify_fsck(self.exec(&command::fsck(device)))
    }

    /// Creates a filesystem of type `fs_type` on `device`.
    pub fn format(&self, device: &str, fs_type: &str) -> Result<(), CommandError> {
        info!(instance = self.instance(), device, fs_type, "Formatting device");
        self.exec(&command::mkfs(fs_type, device)).map(drop).map_err(|e| {
            error!(instance = self.instance(), device, error = %e, "Failed to format device");
            e
        })
    }

    /// Reports whether `device` has no filesystem, judged by `lsblk` printing
    /// an empty filesystem type.
    pub fn disk_looks_unformatted(&self, device: &str) -> Result<bool, CommandError> {
        let output = self.exec(&command::lsblk_fstype(device))?;
        let fs_type = String::from_utf8_lossy(&output);
        let unformatted = fs_type.trim().is_empty();
        debug!(
            instance = self.instance(),
            device,
            fs_type = fs_type.trim(),
            unformatted,
            "Read device filesystem type"
        );
        Ok(unformatted)
    }

    /// Lists the disks the instance can see, for diagnostics.
    pub fn list_disks(&self, by_id_dir: &str) -> Result<String, CommandError> {
        self.exec(&command::list_disks(by_id_dir))
            .map(|o| String::from_utf8_lossy(&o).into_owned())
    }

    /// Mounts `device` on `dir`, repairing it first and formatting it if the
    /// mount fails because it has no filesystem.
    ///
    /// Read-only mounts skip both the repair pass and formatting.
    pub fn format_and_mount<S: AsRef<str>>(
        &self,
        device: &str,
        dir: &str,
        fs_type: &str,
        options: &[S],
    ) -> Result<(), CommandError> {
        self.try_format_and_mount(device, dir, fs_type, options)
            .map_err(|(_, e)| e)
    }

    fn try_format_and_mount<S: AsRef<str>>(
        &self,
        device: &str,
        dir: &str,
        fs_type: &str,
        options: &[S],
    ) -> Result<(), (Stage, CommandError)> {
        let mut options: Vec<String> = options.iter().map(|o| o.as_ref().to_owned()).collect();
        if options.iter().any(|o| o == "ro") {
            return self
                .mount(device, dir, fs_type, options.as_slice())
                .map_err(|e| (Stage::Mount, e));
        }
        options.push("defaults".to_owned());

        match self.fsck(device) {
            Ok(FsckOutcome::Clean) => (),
            Ok(FsckOutcome::Corrected) => {
                info!(instance = self.instance(), device, "fsck corrected errors on device")
            }
            Ok(FsckOutcome::Inconclusive(e)) => {
                warn!(instance = self.instance(), device, error = %e, "fsck failed; mounting anyway")
            }
            Err(e) => {
                error!(
                    instance = self.instance(),
                    device,
                    output = e.output(),
                    "fsck found errors it could not correct"
                );
                return Err((Stage::Repair, e));
            }
        }

        let mount_error = match self.mount(device, dir, fs_type, options.as_slice()) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        match self.disk_looks_unformatted(device) {
            Ok(true) => (),
            Ok(false) => return Err((Stage::Mount, mount_error)),
            Err(lsblk_error) => {
                warn!(instance = self.instance(), device, error = %lsblk_error, "Could not check whether device is formatted");
                return Err((Stage::Mount, mount_error));
            }
        }

        info!(instance = self.instance(), device, "Device looks unformatted, formatting it");
        self.format(device, fs_type)
            .map_err(|e| (Stage::Format, e))?;
        info!(instance = self.instance(), device, "Device formatted, mounting it");
        self.mount(device, dir, fs_type, options.as_slice())
            .map_err(|e| (Stage::Format, e))
    }

    /// Creates `dir` and mounts `device` on it, formatting the device if needed.
    ///
    /// If the repair pass aborts, or the mount fails on a device that already
    /// has a filesystem, `dir` is removed again. If formatting, or the mount
    /// after formatting, fails, `dir` is left in place.
    pub fn mount_device(
        &self,
        device: &str,
        dir: &str,
        fs_type: &str,
        read_only: bool,
    ) -> Result<(), CommandError> {
        self.mkdir(dir)?;

        let options: &[&str] = if read_only { &["ro"] } else { &[] };
        match self.try_format_and_mount(device, dir, fs_type, options) {
            Ok(()) => {
                info!(instance = self.instance(), device, dir, "Mounted device");
                Ok(())
            }
            Err((Stage::Format, e)) => {
                warn!(instance = self.instance(), dir, "Leaving mount directory in place after failed format");
                Err(e)
            }
            Err((_, e)) => {
                let _ = self.rmdir(dir);
                Err(e)
            }
        }
    }

    /// Unmounts the device from `dir` and removes `dir`. The directory removal
    /// is attempted even if the unmount fails; only the unmount error is
    /// reported.
    pub fn unmount_device(&self, dir: &str) -> Result<(), CommandError> {
        let result = self.unmount(dir);
        let _ = self.rmdir(dir);
        if result.is_ok() {
            info!(instance = self.instance(), dir, "Unmounted device");
        }
        result
    }

    /// Bind-mounts `source` on `target`, creating `target` first. If the bind
    /// mount fails, `target` is unmounted and removed before the error is
    /// returned.
    pub fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<(), CommandError> {
        self.mkdir(target)?;

        let options: &[&str] = if read_only { &["bind", "ro"] } else { &["bind"] };
        if let Err(e) = self.mount(source, target, "", options) {
            let _ = self.unmount(target);
            let _ = self.rmdir(target);
            return Err(e);
        }
        info!(instance = self.instance(), source, target, "Bind mounted");
        Ok(())
    }

    /// Removes a bind mount made by [`RemoteHost::bind_mount`], with the same
    /// always-remove-the-directory behaviour as [`RemoteHost::unmount_device`].
    pub fn remove_bind_mount(&self, target: &str) -> Result<(), CommandError> {
        let result = self.unmount(target);
        let _ = self.rmdir(target);
        if result.is_ok() {
            info!(instance = self.instance(), target, "Removed bind mount");
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GceConfig;
    use crate::exec::test_utils::ScriptedRunner;
    use crate::exec::Gcloud;

    const DEV: &str = "/dev/disk/by-id/scsi-0Google_PersistentDisk_test-1";

    fn failed(code: i32) -> CommandError {
        CommandError::Failed {
            command: "fsck".to_owned(),
            code: Some(code),
            output: String::new(),
        }
    }

    fn remote_commands(
        runner: ScriptedRunner,
        f: impl FnOnce(&RemoteHost<'_, &ScriptedRunner>) -> Result<(), CommandError>,
    ) -> (Result<(), CommandError>, Vec<String>) {
        let config = GceConfig::default();
        let gcloud = Gcloud::new(&runner, &config);
        let result = f(&gcloud.host("host-0"));
        (result, runner.remote_commands())
    }

    #[test]
    fn fsck_exit_codes_are_classified() {
        assert!(matches!(classify_fsck(Ok(vec![])), Ok(FsckOutcome::Clean)));
        assert!(matches!(classify_fsck(Err(failed(1))), Ok(FsckOutcome::Corrected)));
        assert!(matches!(classify_fsck(Err(failed(8))), Ok(FsckOutcome::Inconclusive(_))));
        assert_eq!(classify_fsck(Err(failed(4))).unwrap_err().exit_code(), Some(4));
    }

    #[test]
    fn mount_device_repairs_then_mounts() {
        let (result, commands) = remote_commands(ScriptedRunner::new(), |host| {
            host.mount_device(DEV, "/mnt/g", "ext4", false)
        });
        result.unwrap();
        assert_eq!(
            commands,
            vec![
                "mkdir -p -m 0750 /mnt/g".to_owned(),
                format!("fsck -a {}", DEV),
                format!("mount -t ext4 -o defaults {} /mnt/g", DEV),
            ]
        );
    }

    #[test]
    fn read_only_mount_skips_repair() {
        let (result, commands) = remote_commands(ScriptedRunner::new(), |host| {
            host.mount_device(DEV, "/mnt/g", "ext4", true)
        });
        result.unwrap();
        assert_eq!(
            commands,
            vec![
                "mkdir -p -m 0750 /mnt/g".to_owned(),
                format!("mount -t ext4 -o ro {} /mnt/g", DEV),
            ]
        );
    }

    #[test]
    fn unformatted_device_is_formatted_and_mounted() {
        // The first mount fails; once mkfs has run the second one succeeds.
        let runner = ScriptedRunner::new()
            .fail_first("--command mount", 32)
            .respond("lsblk", "\n");
        let config = GceConfig::default();
        let gcloud = Gcloud::new(&runner, &config);

        gcloud
            .host("host-0")
            .mount_device(DEV, "/mnt/g", "ext4", false)
            .unwrap();

        let commands = runner.remote_commands();
        assert_eq!(
            commands[3..],
            [
                format!("lsblk -nd -o FSTYPE {}", DEV),
                format!("mkfs.ext4 -E lazy_itable_init=0,lazy_journal_init=0 -F {}", DEV),
                format!("mount -t ext4 -o defaults {} /mnt/g", DEV),
            ]
        );
        assert!(!commands.iter().any(|c| c.starts_with("rmdir")));
    }

    #[test]
    fn formatted_device_propagates_the_original_mount_error() {
        let runner = ScriptedRunner::new()
            .fail("--command mount", 32)
            .respond("lsblk", "ext4\n");
        let (result, commands) =
            remote_commands(runner, |host| host.mount_device(DEV, "/mnt/g", "ext4", false));

        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), Some(32));
        assert!(!commands.iter().any(|c| c.starts_with("mkfs")));
        assert_eq!(commands.last().unwrap(), "rmdir /mnt/g");
    }

    #[test]
    fn failed_lsblk_propagates_the_original_mount_error() {
        let runner = ScriptedRunner::new()
            .fail("--command mount", 32)
            .fail("lsblk", 1);
        let (result, commands) =
            remote_commands(runner, |host| host.mount_device(DEV, "/mnt/g", "ext4", false));

        assert_eq!(result.unwrap_err().exit_code(), Some(32));
        assert!(!commands.iter().any(|c| c.starts_with("mkfs")));
        assert_eq!(commands.last().unwrap(), "rmdir /mnt/g");
    }

    #[test]
    fn format_and_mount_leaves_the_directory_alone() {
        let runner = ScriptedRunner::new()
            .fail_first("--command mount", 32)
            .respond("lsblk", "\n");
        let (result, commands) = remote_commands(runner, |host| {
            host.format_and_mount(DEV, "/mnt/g", "", &["noatime"])
        });

        result.unwrap();
        assert_eq!(
            commands,
            vec![
                format!("fsck -a {}", DEV),
                format!("mount -o noatime,defaults {} /mnt/g", DEV),
                format!("lsblk -nd -o FSTYPE {}", DEV),
                format!("mkfs.ext4 -E lazy_itable_init=0,lazy_journal_init=0 -F {}", DEV),
                format!("mount -o noatime,defaults {} /mnt/g", DEV),
            ]
        );
    }

    #[test]
    fn read_only_format_and_mount_never_formats() {
        let runner = ScriptedRunner::new().fail("--command mount", 32);
        let (result, commands) = remote_commands(runner, |host| {
            host.format_and_mount(DEV, "/mnt/g", "ext4", &["ro"])
        });

        assert_eq!(result.unwrap_err().exit_code(), Some(32));
        assert_eq!(commands, vec![format!("mount -t ext4 -o ro {} /mnt/g", DEV)]);
    }

    #[test]
    fn failed_format_leaves_the_directory_for_the_caller() {
        let runner = ScriptedRunner::new()
            .fail("--command mount", 32)
            .respond("lsblk", "")
            .fail("mkfs", 1);
        let (result, commands) =
            remote_commands(runner, |host| host.mount_device(DEV, "/mnt/g", "ext4", false));

        assert!(result.unwrap_err().to_string().contains("mkfs"));
        assert!(!commands.iter().any(|c| c.starts_with("rmdir")));
    }

    #[test]
    fn uncorrectable_fsck_errors_abort_the_mount() {
        let runner = ScriptedRunner::new().fail("fsck", 4);
        let (result, commands) =
            remote_commands(runner, |host| host.mount_device(DEV, "/mnt/g", "ext4", false));

        assert_eq!(result.unwrap_err().exit_code(), Some(4));
        assert!(!commands.iter().any(|c| c.starts_with("mount")));
        assert_eq!(commands.last().unwrap(), "rmdir /mnt/g");
    }

    #[test]
    fn corrected_fsck_errors_still_mount() {
        let runner = ScriptedRunner::new().fail("fsck", 1);
        let (result, commands) =
            remote_commands(runner, |host| host.mount_device(DEV, "/mnt/g", "ext4", false));

        result.unwrap();
        assert!(commands.last().unwrap().starts_with("mount -t ext4"));
    }

    #[test]
    fn unmount_failure_still_removes_the_directory() {
        let runner = ScriptedRunner::new().fail("umount", 32);
        let (result, commands) = remote_commands(runner, |host| host.unmount_device("/mnt/g"));

        assert_eq!(result.unwrap_err().exit_code(), Some(32));
        assert_eq!(commands, vec!["umount /mnt/g", "rmdir /mnt/g"]);
    }

    #[test]
    fn rmdir_failure_is_not_reported_by_unmount() {
        let runner = ScriptedRunner::new().fail("rmdir", 1);
        let (result, _) = remote_commands(runner, |host| host.remove_bind_mount("/mnt/f"));
        result.unwrap();
    }

    #[test]
    fn bind_mount_binds_then_remounts() {
        let (result, commands) = remote_commands(ScriptedRunner::new(), |host| {
            host.bind_mount("/mnt/g", "/mnt/f", true)
        });
        result.unwrap();
        assert_eq!(
            commands,
            vec![
                "mkdir -p -m 0750 /mnt/f",
                "mount -o bind /mnt/g /mnt/f",
                "mount -o remount,ro /mnt/g /mnt/f",
            ]
        );
    }

    #[test]
    fn bind_mount_failure_unwinds_before_returning() {
        let runner = ScriptedRunner::new().fail("-o bind", 32);
        let (result, commands) =
            remote_commands(runner, |host| host.bind_mount("/mnt/g", "/mnt/f", false));

        assert_eq!(result.unwrap_err().exit_code(), Some(32));
        assert_eq!(
            commands,
            vec![
                "mkdir -p -m 0750 /mnt/f",
                "mount -o bind /mnt/g /mnt/f",
                "umount /mnt/f",
                "rmdir /mnt/f",
            ]
        );
    }
}
