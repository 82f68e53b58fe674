//! Socket and TLS setup for new channels.
//!
//! # Feature Flags
//!
//! TLS support requires both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! A `rustls::ClientConfig` passed to
//! [`ClientBuilder::tls_config`](crate::ClientBuilder::tls_config) replaces the
//! feature-gated defaults entirely.

use std::error::Error as StdError;

use http::Uri;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tower::ServiceExt;

use crate::{ClientBuildError, ClientError};

/// The byte stream a channel runs over, with or without TLS.
pub(crate) type ChannelIo = MaybeHttpsStream<TokioIo<TcpStream>>;

/// Opens new physical connections to the configured server.
#[derive(Clone, Debug)]
pub(crate) enum Connector {
    Http(HttpConnector),
    Https(HttpsConnector<HttpConnector>),
}

impl Connector {
    /// Pick a connector for `scheme`.
    ///
    /// `https` needs either `tls_config` or the TLS features; anything else
    /// is plain TCP.
    pub(crate) fn new(
        scheme: &str,
        tls_config: Option<ClientConfig>,
    ) -> Result<Self, ClientBuildError> {
        if scheme != "https" {
            return Ok(Connector::Http(build_http_connector()));
        }
        let config = match tls_config {
            Some(config) => config,
            None => default_tls_config()?,
        };
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(build_http_connector());
        Ok(Connector::Https(https))
    }

    /// Open a connection to `uri`'s authority.
    pub(crate) async fn connect(&self, uri: Uri) -> Result<ChannelIo, ClientError> {
        let authority = uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default();
        match self {
            Connector::Http(http) => http
                .clone()
                .oneshot(uri)
                .await
                .map(MaybeHttpsStream::Http)
                .map_err(|err| connect_error(&authority, &err)),
            Connector::Https(https) => https
                .clone()
                .oneshot(uri)
                .await
                .map_err(|err| connect_error(&authority, err.as_ref())),
        }
    }
}

fn build_http_connector() -> HttpConnector {
    let mut connector = HttpConnector::new();
    // The TLS wrapper hands https URIs to the inner connector.
    connector.enforce_http(false);
    connector.set_nodelay(true);
    connector
}

/// Build the feature-gated TLS configuration.
fn default_tls_config() -> Result<ClientConfig, ClientBuildError> {
    #[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
    {
        let builder = crypto_provider_builder()?;
        Ok(builder
            .with_root_certificates(build_root_store())
            .with_no_client_auth())
    }

    #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
    {
        Err(ClientBuildError::Tls(
            "https requires root certificates: enable `tls-native-roots` or \
             `tls-webpki-roots`, or pass a rustls ClientConfig"
                .to_string(),
        ))
    }
}

/// Priority: feature-gated provider, then a user-installed global default.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn crypto_provider_builder()
-> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, ClientBuildError> {
    #[cfg(feature = "tls-ring")]
    let provider = Some(std::sync::Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(std::sync::Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider = rustls::crypto::CryptoProvider::get_default().cloned();

    let provider = provider.ok_or_else(|| {
        ClientBuildError::Tls(
            "https requires a crypto provider: enable `tls-ring` or `tls-aws-lc`, \
             or install one with `CryptoProvider::install_default()`"
                .to_string(),
        )
    })?;

    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| ClientBuildError::Tls(err.to_string()))
}

/// Native roots win when both root features are enabled.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn build_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();

    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            tracing::debug!(errors = ?native_certs.errors, "errors loading native certs");
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Flatten a connect failure into one message.
///
/// The I/O kind (refused, unreachable, timed out) is buried a few sources
/// deep in hyper-util's error, so the whole chain is rendered.
fn connect_error(authority: &str, err: &(dyn StdError + 'static)) -> ClientError {
    let mut message = format!("failed to connect to {authority}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            message.push_str(&format!(": {io} ({:?})", io.kind()));
            break;
        }
        message.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    tracing::debug!(authority, error = %message, "connect failed");
    ClientError::Connection(message)
}
