use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls, connect_async};
use url::Url;

use super::config::{Proxy, ProxyAuth};
use super::error::WsError;
use crate::Result;
use crate::error::Error;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the proxy's reply to `CONNECT`.
const MAX_TUNNEL_RESPONSE_BYTES: usize = 8 * 1024;

/// Open a WebSocket to `url`, tunnelling through `proxy` when one is given.
///
/// The whole handshake, proxy tunnel included, must finish within `handshake_timeout`.
pub(crate) async fn connect(
    url: &Url,
    proxy: Option<&Proxy>,
    handshake_timeout: Duration,
) -> Result<WsStream> {
    let handshake = async {
        match proxy {
            Some(proxy) => connect_via_proxy(url, proxy).await,
            None => {
                let (stream, _response) = connect_async(url.as_str()).await?;
                Ok::<_, Error>(stream)
            }
        }
    };

    timeout(handshake_timeout, handshake)
        .await
        .map_err(|_elapsed| WsError::Timeout(handshake_timeout))?
}

async fn connect_via_proxy(url: &Url, proxy: &Proxy) -> Result<WsStream> {
    let tcp = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(WsError::Proxy)?;
    let tcp = open_tunnel(tcp, &authority(url)?, proxy.auth.as_ref()).await?;

    let (stream, _response) = client_async_tls(url.as_str(), tcp).await?;
    Ok(stream)
}

/// `host:port` of the WebSocket endpoint, as the proxy needs it.
pub(crate) fn authority(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::validation(format!("{url} has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::validation(format!("{url} has no port")))?;

    Ok(format!("{host}:{port}"))
}

/// Ask an HTTP proxy to open a tunnel to `authority` over `stream`.
///
/// The proxy stays silent after its reply until the client speaks, so nothing past the
/// header block is consumed here.
pub(crate) async fn open_tunnel<S>(
    mut stream: S,
    authority: &str,
    auth: Option<&ProxyAuth>,
) -> Result<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = auth {
        request.push_str("Proxy-Authorization: ");
        request.push_str(&auth.header_value());
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(WsError::Proxy)?;
    stream.flush().await.map_err(WsError::Proxy)?;

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0_u8; 512];
    while !response.windows(4).any(|w| w == b"\r\n\r\n") {
        if response.len() > MAX_TUNNEL_RESPONSE_BYTES {
            return Err(WsError::InvalidMessage("oversized proxy response".to_owned()).into());
        }
        let read = stream.read(&mut chunk).await.map_err(WsError::Proxy)?;
        if read == 0 {
            return Err(WsError::Proxy(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed the connection during CONNECT",
            ))
            .into());
        }
        response.extend_from_slice(&chunk[..read]);
    }

    let head = String::from_utf8_lossy(&response);
    let status_line = head.lines().next().unwrap_or_default();
    let accepted = status_line.starts_with("HTTP/1.")
        && status_line.split_whitespace().nth(1) == Some("200");
    if !accepted {
        return Err(WsError::TunnelRejected {
            status: status_line.to_owned(),
        }
        .into());
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(%authority, "Proxy tunnel established");

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::error::Kind;

    #[test]
    fn authority_uses_scheme_default_port() {
        let url = Url::parse("wss://api.hyperliquid.xyz/ws").unwrap();
        assert_eq!(authority(&url).unwrap(), "api.hyperliquid.xyz:443");

        let url = Url::parse("ws://127.0.0.1:9000/ws").unwrap();
        assert_eq!(authority(&url).unwrap(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn tunnel_sends_basic_auth_and_accepts_200() {
        let (client, mut proxy) = duplex(4096);

        let proxy_side = tokio::spawn(async move {
            let mut buf = vec![0_u8; 1024];
            let n = proxy.read(&mut buf).await.unwrap();
            proxy
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8(buf[..n].to_vec()).unwrap()
        });

        let auth = ProxyAuth::new("user", "pass");
        open_tunnel(client, "example.com:443", Some(&auth))
            .await
            .unwrap();

        let request = proxy_side.await.unwrap();
        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn tunnel_without_credentials_omits_header() {
        let (client, mut proxy) = duplex(4096);

        let proxy_side = tokio::spawn(async move {
            let mut buf = vec![0_u8; 1024];
            let n = proxy.read(&mut buf).await.unwrap();
            proxy.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
            String::from_utf8(buf[..n].to_vec()).unwrap()
        });

        open_tunnel(client, "example.com:443", None).await.unwrap();

        assert!(!proxy_side.await.unwrap().contains("Proxy-Authorization"));
    }

    #[tokio::test]
    async fn tunnel_rejection_is_reported() {
        let (client, mut proxy) = duplex(4096);

        tokio::spawn(async move {
            let mut buf = vec![0_u8; 1024];
            let _n = proxy.read(&mut buf).await.unwrap();
            proxy
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let error = open_tunnel(client, "example.com:443", None)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::TunnelRejected { status }) if status.contains("407")
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let error = connect(&url, None, Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(error.kind(), Kind::WebSocket);
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        // Accepts TCP but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let error = connect(&url, None, Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::Timeout(_))
        ));
    }
}
