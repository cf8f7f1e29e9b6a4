use tracing::{error, info};

use crate::exec::{CommandError, CommandRunner, RemoteHost};
use crate::mount::command;

impl<'a, R: CommandRunner> RemoteHost<'a, R> {
    /// Writes `content` to the file at `path`, followed by a newline, and
    /// syncs the filesystem so the data reaches the disk before it is
    /// detached.
    ///
    /// The content and path are single-quoted on the remote shell, so neither
    /// may contain a single quote.
    pub fn write_file(&self, content: &str, path: &str) -> Result<(), CommandError> {
        info!(instance = self.instance(), path, content, "Writing file");
        self.exec(&command::write_file(content, path))
            .map(drop)
            .map_err(|e| {
                error!(instance = self.instance(), path, error = %e, "Failed writing file");
                e
            })
    }

    /// Reads the file at `path`, trimming surrounding whitespace.
    pub fn read_file(&self, path: &str) -> Result<String, CommandError> {
        info!(instance = self.instance(), path, "Reading file");
        match self.exec(&command::read_file(path)) {
            Ok(output) => Ok(String::from_utf8_lossy(&output).trim().to_owned()),
            Err(e) => {
                error!(instance = self.instance(), path, error = %e, "Failed reading file");
                Err(e)
            }
        }
    }
}
