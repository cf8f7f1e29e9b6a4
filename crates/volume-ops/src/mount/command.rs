//! Shell command lines issued on the remote instance.

pub(crate) fn mkdir(dir: &str) -> String {
    format!("mkdir -p -m 0750 {}", dir)
}

pub(crate) fn rmdir(dir: &str) -> String {
    format!("rmdir {}", dir)
}

pub(crate) fn umount(dir: &str) -> String {
    format!("umount {}", dir)
}

pub(crate) fn fsck(device: &str) -> String {
    format!("fsck -a {}", device)
}

pub(crate) fn lsblk_fstype(device: &str) -> String {
    format!("lsblk -nd -o FSTYPE {}", device)
}

pub(crate) fn list_disks(dir: &str) -> String {
    format!("ls {}", dir)
}

/// `mkfs.<fstype>`, forcing eager inode table and journal initialisation on
/// ext3/ext4. An empty filesystem type means ext4.
pub(crate) fn mkfs(fs_type: &str, device: &str) -> String {
    let fs_type = if fs_type.is_empty() { "ext4" } else { fs_type };
    match fs_type {
        "ext3" | "ext4" => format!(
            "mkfs.{} -E lazy_itable_init=0,lazy_journal_init=0 -F {}",
            fs_type, device
        ),
        _ => format!("mkfs.{} {}", fs_type, device),
    }
}

/// `mount [-t fstype] [-o options] [source] target`
pub(crate) fn mount<S: AsRef<str>>(
    source: &str,
    target: &str,
    fs_type: &str,
    options: &[S],
) -> String {
    let mut cmd = String::from("mount");
    if !fs_type.is_empty() {
        cmd.push_str(" -t ");
        cmd.push_str(fs_type);
    }
    if !options.is_empty() {
        cmd.push_str(" -o ");
        cmd.push_str(
            &options
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    if !source.is_empty() {
        cmd.push(' ');
        cmd.push_str(source);
    }
    cmd.push(' ');
    cmd.push_str(target);
    cmd
}

/// If `options` request a bind mount, returns the options for the remount that
/// must follow the initial `-o bind` mount: `remount` plus every option that is
/// neither `bind` nor `remount`.
pub(crate) fn bind_remount_options<S: AsRef<str>>(options: &[S]) -> Option<Vec<String>> {
    let mut bind = false;
    let mut remount = vec!["remount".to_owned()];
    for option in options.iter().map(AsRef::as_ref) {
        match option {
            "bind" => bind = true,
            "remount" => (),
            other => remount.push(other.to_owned()),
        }
    }
    if bind {
        Some(remount)
    } else {
        None
    }
}

pub(crate) fn write_file(content: &str, path: &str) -> String {
    format!("echo '{}' > '{}'; sync", content, path)
}

pub(crate) fn read_file(path: &str) -> String {
    format!("cat '{}'", path)
}
