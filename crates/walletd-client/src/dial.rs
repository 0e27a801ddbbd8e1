//! Raw connections for the websocket, optionally through the configured proxy.
//!
//! The RPC side gets proxying and TLS settings from reqwest. The websocket
//! opens its own socket, so the same proxy kinds are spoken here with
//! hyper-util's connectors and TLS is set up to match `verify_tls`.

use std::future::poll_fn;
use std::sync::Arc;

use hyper_util::client::legacy::connect::proxy::{SocksV4, SocksV5, Tunnel};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use reqwest::header::HeaderValue;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::Connector;
use tower_service::Service;
use tracing::debug;
use url::Url;
use walletd_core::config::{ProxyDescriptor, ProxyScheme};

use crate::error::{ClientError, Result};
use crate::pool::basic_auth;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Open a TCP stream to the host of `target`, through `proxy` when set.
pub(crate) async fn dial(target: &Url, proxy: Option<&ProxyDescriptor>) -> Result<TcpStream> {
    let failed = |reason: String| ClientError::ConnectionFailed {
        url: target.to_string(),
        reason,
    };
    let host = target
        .host_str()
        .ok_or_else(|| failed("url has no host".to_string()))?;
    let port = target
        .port_or_known_default()
        .ok_or_else(|| failed("url has no port".to_string()))?;

    let Some(proxy) = proxy else {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        return TcpStream::connect((host, port))
            .await
            .map_err(|e| failed(e.to_string()));
    };

    debug!(proxy = %proxy.url(), target = %target, "dialing through proxy");
    let dst = format!("http://{}:{port}", bracketed(host))
        .parse::<Uri>()
        .map_err(|e| failed(e.to_string()))?;
    through_proxy(proxy, dst)
        .await
        .map_err(|e| failed(format!("proxy {}: {e}", proxy.url())))
}

async fn through_proxy(
    proxy: &ProxyDescriptor,
    dst: Uri,
) -> std::result::Result<TcpStream, BoxError> {
    let proxy_uri: Uri = format!("http://{}:{}", bracketed(&proxy.host), proxy.port).parse()?;
    let mut http = HttpConnector::new();
    http.enforce_http(false);

    match proxy.scheme {
        ProxyScheme::Socks5 | ProxyScheme::Socks5h => {
            let mut socks =
                SocksV5::new(proxy_uri, http).local_dns(proxy.scheme == ProxyScheme::Socks5);
            if let Some(user) = &proxy.username {
                socks = socks.with_auth(user.clone(), proxy.password.clone().unwrap_or_default());
            }
            connect_with(socks, dst).await
        }
        ProxyScheme::Socks4 => {
            connect_with(SocksV4::new(proxy_uri, http).local_dns(true), dst).await
        }
        ProxyScheme::Http => {
            let mut tunnel = Tunnel::new(proxy_uri, http);
            if let Some(user) = &proxy.username {
                let auth = basic_auth(user, proxy.password.as_deref().unwrap_or_default());
                tunnel = tunnel.with_auth(HeaderValue::from_str(&auth)?);
            }
            connect_with(tunnel, dst).await
        }
        ProxyScheme::Https => {
            Err("https proxies are not supported for websocket connections".into())
        }
    }
}

async fn connect_with<S>(mut connector: S, dst: Uri) -> std::result::Result<TcpStream, BoxError>
where
    S: Service<Uri, Response = TokioIo<TcpStream>>,
    S::Error: Into<BoxError>,
{
    poll_fn(|cx| connector.poll_ready(cx)).await.map_err(Into::into)?;
    let io = connector.call(dst).await.map_err(Into::into)?;
    Ok(io.into_inner())
}

fn bracketed(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// TLS connector for `wss://` URLs. `None` keeps tungstenite's default
/// (webpki roots, full verification).
pub(crate) fn tls_connector(verify_tls: bool) -> Result<Option<Connector>> {
    if verify_tls {
        return Ok(None);
    }
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::WebSocket(e.to_string()))?
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
    .with_no_client_auth();
    Ok(Some(Connector::Rustls(Arc::new(config))))
}

/// Accepts whatever the server presents.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
