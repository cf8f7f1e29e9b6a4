//! Launching local command-line tools, and tunnelling shell commands to remote
//! instances through the cloud CLI.
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::config::GceConfig;

/// An error raised while running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started at all, usually because it is not on
    /// the `PATH`.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        /// The program that was being launched
        program: String,
        /// The underlying launch failure
        #[source]
        source: std::io::Error,
    },
    /// The program ran but exited unsuccessfully.
    #[error("`{command}` failed: {}\noutput: {output}", describe_exit(.code))]
    Failed {
        /// The program and its arguments, joined with spaces
        command: String,
        /// The exit code, or `None` if the process was killed by a signal
        code: Option<i32>,
        /// Combined standard output and standard error
        output: String,
    },
}

impl CommandError {
    /// The exit code of a command that ran to completion with a failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Spawn { .. } => None,
            CommandError::Failed { code, .. } => *code,
        }
    }

    /// The output captured before the command failed. Empty if it never ran.
    pub fn output(&self) -> &str {
        match self {
            CommandError::Spawn { .. } => "",
            CommandError::Failed { output, .. } => output,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit status {}", c),
        None => "terminated by signal".to_owned(),
    }
}

/// The streams captured from a successful run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: Vec<u8>,
    /// Standard error. Tools print warnings here even when they succeed.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Both streams concatenated, stdout first.
    pub fn combined(self) -> Vec<u8> {
        let mut combined = self.stdout;
        combined.extend_from_slice(&self.stderr);
        combined
    }
}

/// Runs a local program to completion.
///
/// This is the seam between the orchestration in this crate and the outside
/// world: implementations receive the program name and its argument list and
/// return what the program printed. A failed run carries the combined output
/// in its [`CommandError`].
pub trait CommandRunner {
    /// Runs `program` with `args`, blocking until it exits, and returns its
    /// output streams separately.
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError>;

    /// Like [`CommandRunner::output`], with the two streams concatenated.
    fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>, CommandError> {
        self.output(program, args).map(CommandOutput::combined)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        (**self).output(program, args)
    }
}

/// A [`CommandRunner`] that spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        debug!(program, ?args, "Executing command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| CommandError::Spawn {
                program: program.to_owned(),
                source,
            })?;

        let captured = CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if output.status.success() {
            Ok(captured)
        } else {
            Err(CommandError::Failed {
                command: render_command(program, args),
                code: output.status.code(),
                output: String::from_utf8_lossy(&captured.combined()).into_owned(),
            })
        }
    }
}

pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The cloud CLI, as used to manage disks and reach instances.
#[derive(Debug)]
pub struct Gcloud<R> {
    runner: R,
    program: String,
    account: String,
}

impl<R: CommandRunner> Gcloud<R> {
    /// Creates a client that invokes the CLI named in `config` through `runner`.
    pub fn new(runner: R, config: &GceConfig) -> Self {
        Gcloud {
            runner,
            program: config.gcloud.clone(),
            account: config.account.clone(),
        }
    }

    /// Runs the CLI with the given arguments.
    pub fn run(&self, args: &[String]) -> Result<Vec<u8>, CommandError> {
        self.runner.run(&self.program, args)
    }

    /// Runs `command` through a shell on `instance`, logged in as the
    /// configured account.
    ///
    /// No timeout is applied: a remote command that hangs blocks the caller
    /// until the CLI itself gives up.
    pub fn remote(&self, command: &str, instance: &str) -> Result<Vec<u8>, CommandError> {
        debug!(instance, command, "Executing remote command");
        self.run(&ssh_args(&self.account, instance, command))
    }

    /// Returns a handle for running commands on `instance`.
    pub fn host<'a>(&'a self, instance: &'a str) -> RemoteHost<'a, R> {
        RemoteHost {
            gcloud: self,
            instance,
        }
    }
}

fn ssh_args(account: &str, instance: &str, command: &str) -> Vec<String> {
    vec![
        "compute".to_owned(),
        "ssh".to_owned(),
        format!("{}@{}", account, instance),
        "--command".to_owned(),
        command.to_owned(),
    ]
}

/// A single instance reachable through [`Gcloud::remote`].
///
/// Mount and file operations are implemented on this type; see the
/// [`mount`](crate::mount) module.
#[derive(Debug)]
pub struct RemoteHost<'a, R> {
    gcloud: &'a Gcloud<R>,
    instance: &'a str,
}

impl<'a, R: CommandRunner> RemoteHost<'a, R> {
    /// The name of the instance commands are sent to.
    pub fn instance(&self) -> &str {
        self.instance
    }

    /// Runs a shell command on this instance.
    pub fn exec(&self, command: &str) -> Result<Vec<u8>, CommandError> {
        self.gcloud.remote(command, self.instance)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::cell::{Cell, RefCell};

    use super::*;

    type Responder = Box<dyn Fn(&str) -> Option<Result<CommandOutput, CommandError>>>;

    /// A runner that answers each invocation from a list of rules keyed on a
    /// substring of the rendered command line. Unmatched commands succeed with
    /// empty output.
    pub(crate) struct ScriptedRunner {
        rules: Vec<Responder>,
        pub(crate) calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            ScriptedRunner {
                rules: Vec::new(),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn respond(mut self, needle: &'static str, output: &'static str) -> Self {
            self.rules.push(Box::new(move |line: &str| {
                if line.contains(needle) {
                    Some(Ok(CommandOutput {
                        stdout: output.as_bytes().to_vec(),
                        stderr: Vec::new(),
                    }))
                } else {
                    None
                }
            }));
            self
        }

        /// Like [`ScriptedRunner::respond`], with `warning` printed on stderr.
        pub(crate) fn respond_with_warning(
            mut self,
            needle: &'static str,
            output: &'static str,
            warning: &'static str,
        ) -> Self {
            self.rules.push(Box::new(move |line: &str| {
                if line.contains(needle) {
                    Some(Ok(CommandOutput {
                        stdout: output.as_bytes().to_vec(),
                        stderr: warning.as_bytes().to_vec(),
                    }))
                } else {
                    None
                }
            }));
            self
        }

        pub(crate) fn fail(mut self, needle: &'static str, code: i32) -> Self {
            self.rules.push(Box::new(move |line: &str| {
                if line.contains(needle) {
                    Some(Err(CommandError::Failed {
                        command: line.to_owned(),
                        code: Some(code),
                        output: format!("{} failed", needle),
                    }))
                } else {
                    None
                }
            }));
            self
        }

        /// Like [`ScriptedRunner::fail`], but only for the first matching
        /// command. Later matches fall through to the remaining rules.
        pub(crate) fn fail_first(mut self, needle: &'static str, code: i32) -> Self {
            let fired = Cell::new(false);
            self.rules.push(Box::new(move |line: &str| {
                if line.contains(needle) && !fired.replace(true) {
                    Some(Err(CommandError::Failed {
                        command: line.to_owned(),
                        code: Some(code),
                        output: format!("{} failed", needle),
                    }))
                } else {
                    None
                }
            }));
            self
        }

        /// The remote commands issued so far, without the ssh wrapper.
        pub(crate) fn remote_commands(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .filter_map(|c| c.split(" --command ").nth(1).map(str::to_owned))
                .collect()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
            let line = render_command(program, args);
            self.calls.borrow_mut().push(line.clone());
            self.rules
                .iter()
                .find_map(|rule| rule(&line))
                .unwrap_or_else(|| Ok(CommandOutput::default()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::test_utils::ScriptedRunner;
    use super::*;

    #[test]
    fn remote_commands_are_tunnelled_as_root() {
        let runner = ScriptedRunner::new();
        let gcloud = Gcloud::new(&runner, &GceConfig::default());

        gcloud.remote("ls /dev/disk/by-id/", "host-0").unwrap();

        assert_eq!(
            runner.calls.borrow().as_slice(),
            ["gcloud compute ssh root@host-0 --command ls /dev/disk/by-id/"]
        );
    }

    #[test]
    fn failure_carries_output_and_exit_code() {
        let runner = ScriptedRunner::new().fail("umount", 32);
        let gcloud = Gcloud::new(&runner, &GceConfig::default());

        let err = gcloud.host("host-0").exec("umount /mnt/x").unwrap_err();

        assert_eq!(err.exit_code(), Some(32));
        assert_eq!(err.output(), "umount failed");
        let message = err.to_string();
        assert!(message.contains("exit status 32"), "{}", message);
        assert!(message.contains("output: umount failed"), "{}", message);
    }

    #[cfg(unix)]
    #[test]
    fn process_streams_are_kept_apart_until_combined() {
        let args = vec!["-c".to_owned(), "echo out; echo warn >&2".to_owned()];

        let output = ProcessRunner.output("sh", &args).unwrap();
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"warn\n");

        assert_eq!(ProcessRunner.run("sh", &args).unwrap(), b"out\nwarn\n");
    }

    #[cfg(unix)]
    #[test]
    fn failed_process_reports_both_streams() {
        let args = vec!["-c".to_owned(), "echo out; echo oops >&2; exit 3".to_owned()];

        let err = ProcessRunner.run("sh", &args).unwrap_err();

        assert_eq!(err.exit_code(), Some(3));
        assert_eq!(err.output(), "out\noops\n");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = ProcessRunner
            .run("definitely-not-a-real-program-4d1f", &[])
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(err.exit_code(), None);
    }
}
