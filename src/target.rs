/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod ssh;

use async_trait::async_trait;
use std::{
    fmt,
    io::{Read, Write},
    sync::Arc,
};

pub use ssh::{PrivateKey, SshConnector};

/// Failure of a command executed over a persistent [`RemoteSession`].
#[derive(Debug)]
pub enum SessionError {
    /// The connection itself is gone. Nothing else will succeed on this session.
    ConnectionLost(String),

    /// A single command failed, the connection is still usable.
    CommandFailed(String),
}

impl SessionError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SessionError::ConnectionLost(_))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            SessionError::CommandFailed(msg) => write!(f, "command failed: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// A reachable machine on which commands can be run and files transferred.
///
/// Commands run as whichever user the target was connected as and return the combined
/// stdout+stderr. A non-zero exit status is an error which carries the output.
#[async_trait]
pub trait Target: Send + Sync {
    async fn run_command(&self, cmd: &str) -> anyhow::Result<String>;

    /// Copies everything from `src` into `remote_path`, creating parent directories as needed.
    async fn copy_file_to(
        &self,
        src: Box<dyn Read + Send>,
        remote_path: &str,
    ) -> anyhow::Result<()>;

    async fn copy_file_from(
        &self,
        remote_path: &str,
        dst: Box<dyn Write + Send>,
    ) -> anyhow::Result<()>;

    /// Opens a persistent connection which can run many commands.
    async fn client(&self) -> anyhow::Result<Box<dyn RemoteSession>>;
}

/// A long lived connection to a [`Target`].
#[async_trait]
pub trait RemoteSession: Send {
    async fn exec(&mut self, cmd: &str) -> Result<String, SessionError>;
}

/// Builds [`Target`]s for freshly launched hosts.
pub trait TargetConnector: Send + Sync {
    fn connect(&self, host: &str, user: &str, key: &PrivateKey) -> Arc<dyn Target>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_kinds() {
        let lost = SessionError::ConnectionLost("eof".to_string());
        let failed = SessionError::CommandFailed("exit 1".to_string());

        assert!(lost.is_connection_lost());
        assert!(!failed.is_connection_lost());
        assert_eq!(lost.to_string(), "connection lost: eof");
        assert_eq!(failed.to_string(), "command failed: exit 1");
    }
}
