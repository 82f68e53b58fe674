//! Outbound request assembly.
//!
//! Pure functions from configuration and call options to an
//! `http::Request`; nothing here touches the network.

use base64::Engine;
use bytes::Bytes;
use clickhouse_http_core::{Codec, CompressionEncoding, DataFormat, GzipCodec};
use http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, HOST, HeaderName, HeaderValue, USER_AGENT,
};
use http::{HeaderMap, Method, Request};
use url::Url;
use uuid::Uuid;

use crate::config::{ClientConfig, QueryOptions, upsert};
use crate::transport::TransportBody;
use crate::ClientError;

const DRIVER_NAME: &str = concat!("clickhouse-http-client/", env!("CARGO_PKG_VERSION"));

/// A request ready to send, plus the query id it carries.
#[derive(Debug)]
pub(crate) struct PreparedRequest {
    pub(crate) request: Request<TransportBody>,
    pub(crate) query_id: String,
}

/// Build a statement request.
///
/// Without `body` the statement text is the request body. With `body`, the
/// statement moves to the `query` URL parameter and `body` is sent instead
/// (e.g. rows for an `INSERT ... FORMAT ...`).
pub(crate) fn build_statement(
    config: &ClientConfig,
    sql: &str,
    body: Option<TransportBody>,
    format: Option<DataFormat>,
    options: &QueryOptions,
) -> Result<PreparedRequest, ClientError> {
    let query_id = match &options.query_id {
        Some(id) => {
            Uuid::parse_str(id).map_err(|err| {
                ClientError::InvalidRequest(format!("query id `{id}` is not a valid UUID: {err}"))
            })?;
            id.clone()
        }
        None => Uuid::new_v4().to_string(),
    };

    let mut url = endpoint(&config.url, "");
    {
        let mut params = url.query_pairs_mut();
        params.append_pair("query_id", &query_id);
        params.append_pair("database", &config.database);
        if let Some(format) = format {
            params.append_pair("default_format", format.as_str());
        }
        if config.compress_response {
            params.append_pair("enable_http_compression", "1");
        }
        if let Some(session_id) = options.session_id.as_ref().or(config.session_id.as_ref()) {
            params.append_pair("session_id", session_id);
        }
        for role in options.roles.as_ref().unwrap_or(&config.roles) {
            params.append_pair("role", role);
        }
        let mut settings = config.settings.clone();
        for (name, value) in &options.settings {
            upsert(&mut settings, name.clone(), value.clone());
        }
        for (name, value) in &settings {
            params.append_pair(name, value);
        }
        if body.is_some() {
            params.append_pair("query", sql);
        }
    }

    let body = match body {
        Some(body) => body,
        None => TransportBody::full(Bytes::copy_from_slice(sql.as_bytes())),
    };
    let body = if config.compress_request {
        gzip_body(body, config.compression_level.to_flate2())?
    } else {
        body
    };

    let mut headers = default_headers(config)?;
    if config.compress_request {
        headers.insert(CONTENT_ENCODING, gzip_header());
    }
    apply_headers(&mut headers, &config.http_headers)?;
    // Per-call credentials are method-level: they beat instance headers.
    if let Some(credentials) = &options.auth {
        headers.insert(
            AUTHORIZATION,
            basic_auth(&credentials.username, &credentials.password)?,
        );
    }
    apply_headers(&mut headers, &options.headers)?;

    let request = assemble(Method::POST, &url, headers, body)?;
    Ok(PreparedRequest { request, query_id })
}

/// Build the health-check request.
pub(crate) fn build_ping(config: &ClientConfig) -> Result<Request<TransportBody>, ClientError> {
    let url = endpoint(&config.url, "ping");
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, user_agent(config)?);
    apply_headers(&mut headers, &config.http_headers)?;
    assemble(Method::GET, &url, headers, TransportBody::empty())
}

/// `base` with `segment` appended to its path, query cleared.
fn endpoint(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{segment}", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url
}

/// Driver defaults: user agent, basic auth, compression negotiation.
fn default_headers(config: &ClientConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, user_agent(config)?);
    headers.insert(AUTHORIZATION, basic_auth(&config.username, &config.password)?);
    if config.compress_response {
        headers.insert(ACCEPT_ENCODING, gzip_header());
    }
    Ok(headers)
}

fn basic_auth(username: &str, password: &str) -> Result<HeaderValue, ClientError> {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    let mut value = header_value(&format!("Basic {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn gzip_header() -> HeaderValue {
    HeaderValue::from_static(CompressionEncoding::Gzip.as_str())
}

fn user_agent(config: &ClientConfig) -> Result<HeaderValue, ClientError> {
    match &config.application {
        Some(application) => header_value(&format!("{application} {DRIVER_NAME}")),
        None => Ok(HeaderValue::from_static(DRIVER_NAME)),
    }
}

fn apply_headers(headers: &mut HeaderMap, extra: &[(String, String)]) -> Result<(), ClientError> {
    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ClientError::InvalidRequest(format!("invalid header name `{name}`: {err}")))?;
        headers.insert(name, header_value(value)?);
    }
    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value)
        .map_err(|err| ClientError::InvalidRequest(format!("invalid header value: {err}")))
}

fn gzip_body(body: TransportBody, level: u32) -> Result<TransportBody, ClientError> {
    match body {
        TransportBody::Empty => Ok(TransportBody::Empty),
        TransportBody::Full { data } => {
            let data = data.unwrap_or_default();
            GzipCodec::with_level(level)
                .compress(&data)
                .map(TransportBody::full)
                .map_err(|err| {
                    ClientError::InvalidRequest(format!("failed to compress request body: {err}"))
                })
        }
        TransportBody::Streaming { stream } => Ok(TransportBody::gzip_streaming(stream, level)),
    }
}

fn assemble(
    method: Method,
    url: &Url,
    headers: HeaderMap,
    body: TransportBody,
) -> Result<Request<TransportBody>, ClientError> {
    let target = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(ClientError::InvalidRequest(format!("{url} has no host")));
        }
    };

    let mut request = Request::builder()
        .method(method)
        .uri(target)
        .body(body)
        .map_err(|err| ClientError::InvalidRequest(format!("failed to build request: {err}")))?;
    *request.headers_mut() = headers;
    request.headers_mut().insert(HOST, header_value(&host)?);
    Ok(request)
}
