//! Authenticated SSH transport + pool [`Connector`] implementation.
//!
//! Covers the direct and proxy-tunnel connect paths the data model
//! carries — no OpenVPN, jump hosts, or proxy chains, since
//! `ConnectionEntry` has no field for any of those.

use async_trait::async_trait;
use std::net::TcpStream as StdTcpStream;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tabmux_core::model::{ConnectionEntry, Credential};
use tabmux_core::CoreError;
use tabmux_proxy::{open_tunnel, ProxyResolver};
use tokio::net::TcpStream as TokioTcpStream;

pub struct SshTransport {
    pub session: StdMutex<ssh2::Session>,
    pub host: String,
    pub port: u16,
}

impl tabmux_pool::Transport for SshTransport {
    fn is_closed(&self) -> bool {
        let session = self.session.lock().expect("ssh session mutex poisoned");
        !session.authenticated()
    }
}

impl SshTransport {
    /// Run a blocking ssh2 operation against this session on a blocking
    /// thread — `tokio::task::spawn_blocking` wrapping a cloned
    /// `ssh2::Session`, the same bridging pattern used for every
    /// `channel_*`/`sftp`/port-forward call.
    pub fn with_session<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut ssh2::Session) -> R + Send + 'static,
    ) -> tokio::task::JoinHandle<R>
    where
        R: 'static,
    {
        let session = self
            .session
            .lock()
            .expect("ssh session mutex poisoned")
            .clone();
        tokio::task::spawn_blocking(move || {
            let mut session = session;
            f(&mut session)
        })
    }
}

#[derive(Clone)]
pub struct SshConnector {
    pub proxy_resolver: std::sync::Arc<ProxyResolver>,
    pub connect_timeout: Duration,
}

#[async_trait]
impl tabmux_pool::Connector for SshConnector {
    type Transport = SshTransport;

    async fn connect(&self, entry: &ConnectionEntry) -> Result<SshTransport, CoreError> {
        let std_stream = self.establish_stream(entry).await?;

        let host = entry.host.clone();
        let port = entry.port;
        let username = entry.username.clone();
        let credential = entry.credential.clone();
        let passphrase = entry.passphrase.as_ref().map(|p| p.0.clone());

        let session = tokio::task::spawn_blocking(move || -> Result<ssh2::Session, CoreError> {
            let mut session = ssh2::Session::new().map_err(|e| CoreError::Network {
                key: None,
                source: Box::new(e),
            })?;
            session.set_tcp_stream(std_stream);
            session.handshake().map_err(|e| CoreError::Network {
                key: None,
                source: Box::new(e),
            })?;

            authenticate(&mut session, &username, &credential, passphrase.as_deref())?;
            Ok(session)
        })
        .await
        .map_err(|e| CoreError::Network { key: None, source: Box::new(e) })??;

        Ok(SshTransport { session: StdMutex::new(session), host, port })
    }
}

impl SshConnector {
    async fn establish_stream(&self, entry: &ConnectionEntry) -> Result<StdTcpStream, CoreError> {
        let resolved = self.proxy_resolver.resolve(&entry.proxy_policy);

        let tokio_stream: TokioTcpStream = match resolved {
            Some(proxy) => open_tunnel(&proxy, &entry.host, entry.port, self.connect_timeout)
                .await
                .map_err(|e| CoreError::ProxyHandshake { message: e.to_string() })?,
            None => {
                let addr = format!("{}:{}", entry.host, entry.port);
                tokio::time::timeout(self.connect_timeout, TokioTcpStream::connect(&addr))
                    .await
                    .map_err(|_| CoreError::OperationTimeout { elapsed_ms: self.connect_timeout.as_millis() as u64 })?
                    .map_err(|e| CoreError::Network { key: None, source: Box::new(e) })?
            }
        };

        let std_stream = tokio_stream.into_std().map_err(|e| CoreError::Network { key: None, source: Box::new(e) })?;
        std_stream.set_nonblocking(false).map_err(|e| CoreError::Network { key: None, source: Box::new(e) })?;
        Ok(std_stream)
    }
}

/// Tries public key, then password, in that order — no keyboard-
/// interactive/TOTP/agent fallback, since the data model only carries a
/// password or a private-key path. `passphrase` unlocks an encrypted
/// private key (`ConnectionEntry::passphrase`); it is ignored for
/// `Credential::Password`.
fn authenticate(
    session: &mut ssh2::Session,
    username: &str,
    credential: &Credential,
    passphrase: Option<&str>,
) -> Result<(), CoreError> {
    match credential {
        Credential::PrivateKey { path } => {
            session
                .userauth_pubkey_file(username, None, Path::new(path), passphrase)
                .map_err(|e| CoreError::Auth { key: None, source: Box::new(e) })?;
        }
        Credential::Password { secret } => {
            session
                .userauth_password(username, &secret.0)
                .map_err(|e| CoreError::Auth { key: None, source: Box::new(e) })?;
        }
    }
    Ok(())
}
