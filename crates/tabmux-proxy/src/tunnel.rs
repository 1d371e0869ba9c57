//! CONNECT-style tunnel establishment for HTTP and SOCKS5 proxies — the
//! two kinds `ProxyKind` exposes.

use crate::resolver::ResolvedProxy;
use base64::Engine;
use std::net::SocketAddr;
use tabmux_core::model::ProxyKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Duration};

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("failed to resolve proxy address: {0}")]
    Resolve(std::io::Error),
    #[error("proxy connection timed out")]
    Timeout,
    #[error("failed to connect to proxy: {0}")]
    Connect(std::io::Error),
    #[error("proxy handshake I/O error: {0}")]
    Io(std::io::Error),
    #[error("HTTP CONNECT rejected: {0}")]
    HttpConnectRejected(String),
    #[error("SOCKS5 greeting rejected by proxy")]
    Socks5BadGreeting,
    #[error("SOCKS5 requires authentication but none was provided")]
    Socks5AuthRequired,
    #[error("SOCKS5 authentication failed")]
    Socks5AuthFailed,
    #[error("SOCKS5 CONNECT failed with reply code {0}")]
    Socks5ConnectFailed(u8),
    #[error("SOCKS5 proxy offered no acceptable authentication method")]
    Socks5NoAcceptableAuth,
}

/// Open a tunnel through `proxy` to `(target_host, target_port)`, returning
/// the connected stream ready for the caller to layer SSH/Telnet framing
/// on top of.
pub async fn open_tunnel(
    proxy: &ResolvedProxy,
    target_host: &str,
    target_port: u16,
    overall_timeout: Duration,
) -> Result<TcpStream, TunnelError> {
    timeout(overall_timeout, async {
        match proxy.kind {
            ProxyKind::Http => open_http_connect(proxy, target_host, target_port).await,
            ProxyKind::Socks5 => open_socks5(proxy, target_host, target_port).await,
        }
    })
    .await
    .map_err(|_| TunnelError::Timeout)?
}

async fn connect_to_proxy(proxy: &ResolvedProxy) -> Result<TcpStream, TunnelError> {
    let mut addrs = lookup_host((proxy.host.as_str(), proxy.port))
        .await
        .map_err(TunnelError::Resolve)?;
    let addr: SocketAddr = addrs.next().ok_or_else(|| {
        TunnelError::Resolve(std::io::Error::new(std::io::ErrorKind::NotFound, "no address for proxy host"))
    })?;
    TcpStream::connect(addr).await.map_err(TunnelError::Connect)
}

async fn open_http_connect(
    proxy: &ResolvedProxy,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, TunnelError> {
    let mut stream = connect_to_proxy(proxy).await?;

    let mut request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n"
    );
    if let Some(auth) = &proxy.auth {
        let creds = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", auth.username, auth.password));
        request.push_str(&format!("Proxy-Authorization: Basic {creds}\r\n"));
    }
    request.push_str("Connection: keep-alive\r\n\r\n");

    stream.write_all(request.as_bytes()).await.map_err(TunnelError::Io)?;

    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).await.map_err(TunnelError::Io)?;
    let response = String::from_utf8_lossy(&buf[..n]).to_string();
    if !response.contains(" 200 ") && !response.starts_with("HTTP/1.1 200") && !response.starts_with("HTTP/1.0 200") {
        return Err(TunnelError::HttpConnectRejected(response));
    }

    Ok(stream)
}

async fn open_socks5(
    proxy: &ResolvedProxy,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, TunnelError> {
    let mut stream = connect_to_proxy(proxy).await?;

    let mut methods = vec![0x00u8];
    if proxy.auth.is_some() {
        methods.push(0x02);
    }
    let mut greeting = vec![0x05u8, methods.len() as u8];
    greeting.extend_from_slice(&methods);
    stream.write_all(&greeting).await.map_err(TunnelError::Io)?;

    let mut resp = [0u8; 2];
    stream.read_exact(&mut resp).await.map_err(TunnelError::Io)?;
    if resp[0] != 0x05 {
        return Err(TunnelError::Socks5BadGreeting);
    }

    match resp[1] {
        0x00 => {}
        0x02 => {
            let auth = proxy.auth.as_ref().ok_or(TunnelError::Socks5AuthRequired)?;
            let mut msg = vec![0x01u8, auth.username.len() as u8];
            msg.extend_from_slice(auth.username.as_bytes());
            msg.push(auth.password.len() as u8);
            msg.extend_from_slice(auth.password.as_bytes());
            stream.write_all(&msg).await.map_err(TunnelError::Io)?;

            let mut auth_resp = [0u8; 2];
            stream.read_exact(&mut auth_resp).await.map_err(TunnelError::Io)?;
            if auth_resp[1] != 0x00 {
                return Err(TunnelError::Socks5AuthFailed);
            }
        }
        0xFF => return Err(TunnelError::Socks5NoAcceptableAuth),
        other => return Err(TunnelError::Socks5ConnectFailed(other)),
    }

    let mut request = vec![0x05u8, 0x01, 0x00];
    if let Ok(ip) = target_host.parse::<std::net::IpAddr>() {
        match ip {
            std::net::IpAddr::V4(v4) => {
                request.push(0x01);
                request.extend_from_slice(&v4.octets());
            }
            std::net::IpAddr::V6(v6) => {
                request.push(0x04);
                request.extend_from_slice(&v6.octets());
            }
        }
    } else {
        let host_bytes = target_host.as_bytes();
        request.push(0x03);
        request.push(host_bytes.len() as u8);
        request.extend_from_slice(host_bytes);
    }
    request.extend_from_slice(&target_port.to_be_bytes());

    stream.write_all(&request).await.map_err(TunnelError::Io)?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(TunnelError::Io)?;
    if header[1] != 0x00 {
        return Err(TunnelError::Socks5ConnectFailed(header[1]));
    }

    match header[3] {
        0x01 => {
            let mut skip = [0u8; 4 + 2];
            stream.read_exact(&mut skip).await.map_err(TunnelError::Io)?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(TunnelError::Io)?;
            let mut skip = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut skip).await.map_err(TunnelError::Io)?;
        }
        0x04 => {
            let mut skip = [0u8; 16 + 2];
            stream.read_exact(&mut skip).await.map_err(TunnelError::Io)?;
        }
        _ => {}
    }

    Ok(stream)
}
