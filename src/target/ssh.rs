/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{RemoteSession, SessionError, Target, TargetConnector};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use ssh2::{ErrorCode, ExtendedData, Session, Sftp};
use std::{
    fmt,
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    path::Path,
    sync::Arc,
    time::Duration,
};
use tracing::debug;

const SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
// Applies to the handshake and to every call on a persistent session. Benchmark commands can
// stay silent for minutes, so one-shot sessions drop it after authenticating.
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

// libssh2 error codes which mean the socket is gone.
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

/// An OpenSSH private key used to authenticate against launched instances. Parsing decodes the
/// key, so a corrupt or passphrase protected key is rejected before any instance is launched.
#[derive(Clone)]
pub struct PrivateKey {
    pem: Arc<str>,
    algorithm: ssh_key::Algorithm,
}
impl PrivateKey {
    pub fn parse(pem: &str) -> anyhow::Result<Self> {
        let pem = format!("{}\n", pem.trim());
        let key = ssh_key::PrivateKey::from_openssh(&pem)
            .map_err(|err| anyhow!("invalid OpenSSH private key: {err}"))?;
        if key.is_encrypted() {
            return Err(anyhow!("private key is protected by a passphrase"));
        }

        Ok(Self {
            pem: Arc::from(pem),
            algorithm: key.algorithm(),
        })
    }

    pub fn algorithm(&self) -> &ssh_key::Algorithm {
        &self.algorithm
    }

    fn pem(&self) -> &str {
        &self.pem
    }
}
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.algorithm)
    }
}

/// Connects to hosts over SSH on port 22.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;
impl TargetConnector for SshConnector {
    fn connect(&self, host: &str, user: &str, key: &PrivateKey) -> Arc<dyn Target> {
        Arc::new(SshTarget {
            host: host.to_string(),
            user: user.to_string(),
            key: key.clone(),
        })
    }
}

/// A host reached over SSH. Every call opens a fresh connection, [`Target::client`] hands out one
/// that stays open.
#[derive(Debug, Clone)]
pub struct SshTarget {
    host: String,
    user: String,
    key: PrivateKey,
}
impl SshTarget {
    fn open(&self, timeout: Option<Duration>) -> anyhow::Result<Session> {
        let addr = (self.host.as_str(), SSH_PORT)
            .to_socket_addrs()
            .context(format!("Unable to resolve {}", self.host))?
            .next()
            .context(format!("{} did not resolve to any address", self.host))?;

        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .context(format!("Unable to connect to {addr}"))?;

        let mut session = Session::new()?;
        session.set_timeout(timeout_ms(SESSION_TIMEOUT));
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake failed")?;
        session
            .userauth_pubkey_memory(&self.user, None, self.key.pem(), None)
            .context(format!("Unable to authenticate as {}", self.user))?;
        session.set_timeout(timeout.map_or(0, timeout_ms));

        debug!("opened SSH session to {}@{}", self.user, self.host);
        Ok(session)
    }
}

#[async_trait]
impl Target for SshTarget {
    async fn run_command(&self, cmd: &str) -> anyhow::Result<String> {
        let this = self.clone();
        let cmd = cmd.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let session = this.open(None)?;
            exec(&session, &cmd).map_err(anyhow::Error::from)
        })
        .await?
    }

    async fn copy_file_to(
        &self,
        mut src: Box<dyn Read + Send>,
        remote_path: &str,
    ) -> anyhow::Result<()> {
        let this = self.clone();
        let remote_path = remote_path.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let session = this.open(None)?;
            let sftp = session.sftp()?;
            let remote_path = Path::new(&remote_path);
            if let Some(parent) = remote_path.parent() {
                mkdir_all(&sftp, parent)?;
            }

            let mut file = sftp
                .create(remote_path)
                .context(format!("Unable to create {}", remote_path.display()))?;
            io::copy(&mut src, &mut file)?;
            Ok(())
        })
        .await?
    }

    async fn copy_file_from(
        &self,
        remote_path: &str,
        mut dst: Box<dyn Write + Send>,
    ) -> anyhow::Result<()> {
        let this = self.clone();
        let remote_path = remote_path.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let session = this.open(None)?;
            let sftp = session.sftp()?;
            let mut file = sftp
                .open(Path::new(&remote_path))
                .context(format!("Unable to open {remote_path}"))?;
            io::copy(&mut file, &mut dst)?;
            dst.flush()?;
            Ok(())
        })
        .await?
    }

    async fn client(&self) -> anyhow::Result<Box<dyn RemoteSession>> {
        let this = self.clone();
        let session =
            tokio::task::spawn_blocking(move || this.open(Some(SESSION_TIMEOUT))).await??;
        Ok(Box::new(SshSession { session }))
    }
}

/// A persistent SSH connection, each command runs in its own channel.
pub struct SshSession {
    session: Session,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&mut self, cmd: &str) -> Result<String, SessionError> {
        let session = self.session.clone();
        let cmd = cmd.to_string();
        tokio::task::spawn_blocking(move || exec(&session, &cmd))
            .await
            .map_err(|err| SessionError::CommandFailed(err.to_string()))?
    }
}

fn exec(session: &Session, cmd: &str) -> Result<String, SessionError> {
    let mut channel = session.channel_session().map_err(from_ssh_error)?;
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(from_ssh_error)?;
    channel.exec(cmd).map_err(from_ssh_error)?;

    let mut buf = vec![];
    channel.read_to_end(&mut buf).map_err(from_io_error)?;
    channel.wait_close().map_err(from_ssh_error)?;
    let status = channel.exit_status().map_err(from_ssh_error)?;

    let output = String::from_utf8_lossy(&buf).into_owned();
    if status != 0 {
        return Err(SessionError::CommandFailed(format!(
            "`{cmd}` exited with status {status}: {}",
            output.trim()
        )));
    }
    Ok(output)
}

fn mkdir_all(sftp: &Sftp, dir: &Path) -> anyhow::Result<()> {
    let mut ancestors = dir.ancestors().collect::<Vec<_>>();
    ancestors.reverse();
    for dir in ancestors {
        if dir.as_os_str().is_empty() || dir == Path::new("/") {
            continue;
        }
        if sftp.stat(dir).is_err() {
            sftp.mkdir(dir, 0o755)
                .context(format!("Unable to create directory {}", dir.display()))?;
        }
    }
    Ok(())
}

/// libssh2 takes milliseconds, 0 disables the timeout.
fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn from_ssh_error(err: ssh2::Error) -> SessionError {
    match err.code() {
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV
            | LIBSSH2_ERROR_TIMEOUT,
        ) => SessionError::ConnectionLost(err.to_string()),
        _ => SessionError::CommandFailed(err.to_string()),
    }
}

fn from_io_error(err: io::Error) -> SessionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut => SessionError::ConnectionLost(err.to_string()),
        _ => SessionError::CommandFailed(err.to_string()),
    }
}
