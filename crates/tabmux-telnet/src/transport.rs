//! Telnet transport + pool [`Connector`] implementation. Connects direct or
//! proxy-tunneled TCP, no protocol handshake beyond option negotiation, and
//! mirrors `tabmux-ssh`'s `SshConnector` shape so both transports satisfy
//! the same pool contract.

use async_trait::async_trait;
use std::net::TcpStream as StdTcpStream;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tabmux_core::model::ConnectionEntry;
use tabmux_core::CoreError;
use tabmux_proxy::{open_tunnel, ProxyResolver};
use tokio::net::TcpStream as TokioTcpStream;

pub struct TelnetTransport {
    pub stream: StdMutex<Option<StdTcpStream>>,
    pub host: String,
    pub port: u16,
}

impl tabmux_pool::Transport for TelnetTransport {
    fn is_closed(&self) -> bool {
        self.stream.lock().expect("telnet stream mutex poisoned").is_none()
    }
}

impl TelnetTransport {
    /// Hand the raw stream to the shell reader/writer thread, leaving `None`
    /// behind so a second `open_shell` call (or a health check) sees the
    /// transport as closed rather than double-owning the socket.
    pub fn take_stream(&self) -> Option<StdTcpStream> {
        self.stream.lock().expect("telnet stream mutex poisoned").take()
    }
}

#[derive(Clone)]
pub struct TelnetConnector {
    pub proxy_resolver: std::sync::Arc<ProxyResolver>,
    pub connect_timeout: Duration,
}

#[async_trait]
impl tabmux_pool::Connector for TelnetConnector {
    type Transport = TelnetTransport;

    async fn connect(&self, entry: &ConnectionEntry) -> Result<TelnetTransport, CoreError> {
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

        let std_stream = tokio_stream
            .into_std()
            .map_err(|e| CoreError::Network { key: None, source: Box::new(e) })?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| CoreError::Network { key: None, source: Box::new(e) })?;

        Ok(TelnetTransport {
            stream: StdMutex::new(Some(std_stream)),
            host: entry.host.clone(),
            port: entry.port,
        })
    }
}
