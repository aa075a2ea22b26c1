//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Opens a byte stream to a target host through one upstream proxy. The
//! caller speaks whatever protocol it wants over the returned stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::{PoolError, Result};
use crate::models::{ProxyProtocol, ProxyRecord};

/// Upper bound on the CONNECT response head we are willing to buffer
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Proxy transport handler
///
/// Manages connections through various proxy protocols
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to a target through the specified proxy
    #[instrument(skip(proxy), fields(proxy = %proxy.key(), target = %target_host))]
    pub async fn connect(
        proxy: &ProxyRecord,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        match proxy.protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(proxy, target_host, target_port).await
            }
            ProxyProtocol::Socks4 => Self::connect_socks4(proxy, target_host, target_port).await,
            ProxyProtocol::Socks5 => Self::connect_socks5(proxy, target_host, target_port).await,
        }
    }

    /// Connect through HTTP CONNECT method
    async fn connect_http(
        proxy: &ProxyRecord,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        debug!("Connecting to HTTP proxy at {}", proxy.key());

        let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
            .await
            .map_err(|e| PoolError::ProxyConnectionFailed(format!("TCP connect failed: {}", e)))?;

        let connect_request = Self::build_connect_request(target_host, target_port);
        stream.write_all(connect_request.as_bytes()).await.map_err(|e| {
            PoolError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;

        let head = Self::read_response_head(&mut stream).await?;
        let status_line = head.lines().next().unwrap_or("Unknown error");
        if !Self::is_connect_established(status_line) {
            return Err(PoolError::ProxyConnectionFailed(format!(
                "CONNECT failed: {}",
                status_line
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(Box::new(stream))
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(target_host: &str, target_port: u16) -> String {
        format!(
            "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
            target_host, target_port, target_host, target_port
        )
    }

    /// Read up to the end of the CONNECT response headers
    async fn read_response_head(stream: &mut TcpStream) -> Result<String> {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            let n = stream.read(&mut chunk).await.map_err(|e| {
                PoolError::ProxyConnectionFailed(format!("Failed to read CONNECT response: {}", e))
            })?;
            if n == 0 {
                return Err(PoolError::ProxyConnectionFailed(
                    "connection closed during CONNECT".to_string(),
                ));
            }

            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
            if buf.len() > MAX_CONNECT_RESPONSE {
                return Err(PoolError::ProxyConnectionFailed(
                    "CONNECT response too large".to_string(),
                ));
            }
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn is_connect_established(status_line: &str) -> bool {
        let mut parts = status_line.split_whitespace();
        matches!(
            (parts.next(), parts.next()),
            (Some(version), Some(code)) if version.starts_with("HTTP/1.") && code.starts_with('2')
        )
    }

    /// Connect through SOCKS4 proxy (SOCKS4a when the target is a hostname)
    async fn connect_socks4(
        proxy: &ProxyRecord,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        debug!("Connecting to SOCKS4 proxy at {}", proxy.key());

        let proxy_addr = proxy.key();
        let stream = Socks4Stream::connect(proxy_addr.as_str(), (target_host, target_port))
            .await
            .map_err(|e| PoolError::ProxyConnectionFailed(format!("SOCKS4 connect failed: {}", e)))?;

        debug!("SOCKS4 connection established");
        Ok(Box::new(stream))
    }

    /// Connect through SOCKS5 proxy, resolving the target on the proxy side
    async fn connect_socks5(
        proxy: &ProxyRecord,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        debug!("Connecting to SOCKS5 proxy at {}", proxy.key());

        let proxy_addr = proxy.key();
        let stream = Socks5Stream::connect(proxy_addr.as_str(), (target_host, target_port))
            .await
            .map_err(|e| PoolError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 connection established");
        Ok(Box::new(stream))
    }
}

/// Trait for proxy connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl ProxyConnection for TcpStream {}

impl ProxyConnection for Socks4Stream<TcpStream> {}

impl ProxyConnection for Socks5Stream<TcpStream> {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_build_connect_request() {
        assert_eq!(
            ProxyTransport::build_connect_request("httpbin.org", 80),
            "CONNECT httpbin.org:80 HTTP/1.1\r\nHost: httpbin.org:80\r\n\r\n"
        );
    }

    #[test]
    fn test_connect_status_line_parsing() {
        assert!(ProxyTransport::is_connect_established(
            "HTTP/1.1 200 Connection established"
        ));
        assert!(ProxyTransport::is_connect_established("HTTP/1.0 200 OK"));
        assert!(!ProxyTransport::is_connect_established(
            "HTTP/1.1 407 Proxy Authentication Required"
        ));
        assert!(!ProxyTransport::is_connect_established("garbage"));
    }

    #[tokio::test]
    async fn test_http_connect_through_local_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let proxy = ProxyRecord::new("127.0.0.1", port, ProxyProtocol::Http);
        let result = ProxyTransport::connect(&proxy, "example.com", 80).await;
        assert!(result.is_ok());

        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT example.com:80 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_http_connect_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await;
        });

        let proxy = ProxyRecord::new("127.0.0.1", port, ProxyProtocol::Http);
        let result = ProxyTransport::connect(&proxy, "example.com", 80).await;
        assert!(matches!(result, Err(PoolError::ProxyConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let proxy = ProxyRecord::new("127.0.0.1", port, ProxyProtocol::Socks5);
        let result = ProxyTransport::connect(&proxy, "example.com", 80).await;
        assert!(matches!(result, Err(PoolError::ProxyConnectionFailed(_))));
    }
}
