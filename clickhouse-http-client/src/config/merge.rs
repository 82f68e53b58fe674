//! Layered client configuration.
//!
//! Configuration arrives in layers: builder calls and URL parameters. Each
//! layer is a [`ConfigOverrides`] with every field optional. Layers are
//! combined with [`ConfigOverrides::merge`], where the later layer wins, and
//! defaults are filled in exactly once by [`ConfigOverrides::resolve`].

use std::time::Duration;

use clickhouse_http_core::CompressionLevel;
use url::Url;

use super::options::upsert;
use crate::ClientBuildError;

pub const DEFAULT_URL: &str = "http://localhost:8123";
pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_USERNAME: &str = "default";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OPEN_CONNECTIONS: usize = 10;
pub const DEFAULT_IDLE_SOCKET_TTL: Duration = Duration::from_millis(2500);

/// One layer of configuration. `None` and empty mean "not set here".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides {
    pub url: Option<Url>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub request_timeout: Option<Duration>,
    pub max_open_connections: Option<usize>,
    pub keep_alive: Option<bool>,
    pub idle_socket_ttl: Option<Duration>,
    pub compress_request: Option<bool>,
    pub compress_response: Option<bool>,
    pub compression_level: Option<CompressionLevel>,
    pub application: Option<String>,
    pub session_id: Option<String>,
    pub roles: Option<Vec<String>>,
    /// Server settings, in insertion order.
    pub settings: Vec<(String, String)>,
    /// Extra HTTP headers (lowercase names), in insertion order.
    pub http_headers: Vec<(String, String)>,
}

impl ConfigOverrides {
    /// Combine two layers; values set in `later` win.
    ///
    /// Settings and headers merge key by key: a key present in both keeps
    /// its original position with `later`'s value, new keys are appended.
    pub fn merge(self, later: ConfigOverrides) -> ConfigOverrides {
        let mut settings = self.settings;
        for (name, value) in later.settings {
            upsert(&mut settings, name, value);
        }
        let mut http_headers = self.http_headers;
        for (name, value) in later.http_headers {
            upsert(&mut http_headers, name, value);
        }

        ConfigOverrides {
            url: later.url.or(self.url),
            username: later.username.or(self.username),
            password: later.password.or(self.password),
            database: later.database.or(self.database),
            request_timeout: later.request_timeout.or(self.request_timeout),
            max_open_connections: later.max_open_connections.or(self.max_open_connections),
            keep_alive: later.keep_alive.or(self.keep_alive),
            idle_socket_ttl: later.idle_socket_ttl.or(self.idle_socket_ttl),
            compress_request: later.compress_request.or(self.compress_request),
            compress_response: later.compress_response.or(self.compress_response),
            compression_level: later.compression_level.or(self.compression_level),
            application: later.application.or(self.application),
            session_id: later.session_id.or(self.session_id),
            roles: later.roles.or(self.roles),
            settings,
            http_headers,
        }
    }

    /// Read a layer from a connection URL.
    ///
    /// Userinfo becomes the credentials. Query parameters:
    ///
    /// | parameter | field |
    /// |---|---|
    /// | `database` | database |
    /// | `request_timeout` (ms) | request timeout |
    /// | `max_open_connections` | pool size |
    /// | `keep_alive_enabled` | keep-alive |
    /// | `keep_alive_idle_socket_ttl` (ms) | idle socket TTL |
    /// | `compress_request`, `compress_response` | compression flags |
    /// | `application` | user agent prefix |
    /// | `session_id`, `role` (repeatable) | session and roles |
    /// | `clickhouse_setting_<name>` or `ch_<name>` | server setting `<name>` |
    /// | `http_header_<name>` | HTTP header `<name>` |
    ///
    /// Unknown parameters are rejected. The path is kept as a prefix for
    /// every request (for servers behind a proxy).
    pub fn from_url(url: &Url) -> Result<ConfigOverrides, ClientBuildError> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ClientBuildError::InvalidUrl(format!(
                    "unsupported scheme `{other}`, expected http or https"
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(ClientBuildError::InvalidUrl(format!("{url} has no host")));
        }

        let mut layer = ConfigOverrides::default();
        if !url.username().is_empty() {
            layer.username = Some(percent_decoded(url.username()));
        }
        if let Some(password) = url.password() {
            layer.password = Some(percent_decoded(password));
        }

        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "database" => layer.database = Some(value),
                "request_timeout" => layer.request_timeout = Some(millis(&key, &value)?),
                "max_open_connections" => {
                    layer.max_open_connections = Some(positive(&key, &value)?)
                }
                "keep_alive_enabled" => layer.keep_alive = Some(boolean(&key, &value)?),
                "keep_alive_idle_socket_ttl" => {
                    layer.idle_socket_ttl = Some(millis(&key, &value)?)
                }
                "compress_request" => layer.compress_request = Some(boolean(&key, &value)?),
                "compress_response" => layer.compress_response = Some(boolean(&key, &value)?),
                "application" => layer.application = Some(value),
                "session_id" => layer.session_id = Some(value),
                "role" => layer.roles.get_or_insert_with(Vec::new).push(value),
                other => {
                    if let Some(name) = other
                        .strip_prefix("clickhouse_setting_")
                        .or_else(|| other.strip_prefix("ch_"))
                    {
                        upsert(&mut layer.settings, name.to_string(), value);
                    } else if let Some(name) = other.strip_prefix("http_header_") {
                        upsert(&mut layer.http_headers, name.to_ascii_lowercase(), value);
                    } else {
                        return Err(ClientBuildError::InvalidConfig(format!(
                            "unknown URL parameter `{other}`"
                        )));
                    }
                }
            }
        }

        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);
        // Only fails for URLs that cannot carry credentials, ruled out above.
        let _ = base.set_username("");
        let _ = base.set_password(None);
        layer.url = Some(base);
        Ok(layer)
    }

    /// Fill in defaults.
    pub fn resolve(self) -> Result<ClientConfig, ClientBuildError> {
        let url = match self.url {
            Some(url) => url,
            None => Url::parse(DEFAULT_URL)
                .map_err(|err| ClientBuildError::InvalidUrl(err.to_string()))?,
        };
        let max_open_connections = self
            .max_open_connections
            .unwrap_or(DEFAULT_MAX_OPEN_CONNECTIONS);
        if max_open_connections == 0 {
            return Err(ClientBuildError::InvalidConfig(
                "max_open_connections must be at least 1".to_string(),
            ));
        }

        Ok(ClientConfig {
            url,
            username: self.username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            password: self.password.unwrap_or_default(),
            database: self.database.unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_open_connections,
            keep_alive: self.keep_alive.unwrap_or(true),
            idle_socket_ttl: self.idle_socket_ttl.unwrap_or(DEFAULT_IDLE_SOCKET_TTL),
            compress_request: self.compress_request.unwrap_or(false),
            compress_response: self.compress_response.unwrap_or(true),
            compression_level: self.compression_level.unwrap_or_default(),
            application: self.application,
            session_id: self.session_id,
            roles: self.roles.unwrap_or_default(),
            settings: self.settings,
            http_headers: self.http_headers,
        })
    }
}

/// Fully resolved client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub url: Url,
    pub username: String,
    pub password: String,
    pub database: String,
    pub request_timeout: Duration,
    pub max_open_connections: usize,
    pub keep_alive: bool,
    pub idle_socket_ttl: Duration,
    pub compress_request: bool,
    pub compress_response: bool,
    pub compression_level: CompressionLevel,
    pub application: Option<String>,
    pub session_id: Option<String>,
    pub roles: Vec<String>,
    pub settings: Vec<(String, String)>,
    pub http_headers: Vec<(String, String)>,
}

fn percent_decoded(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| bytes.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn boolean(key: &str, value: &str) -> Result<bool, ClientBuildError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(invalid(key, value, "a boolean")),
    }
}

fn millis(key: &str, value: &str) -> Result<Duration, ClientBuildError> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(key, value, "milliseconds"))
}

fn positive(key: &str, value: &str) -> Result<usize, ClientBuildError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(key, value, "a positive integer")),
    }
}

fn invalid(key: &str, value: &str, expected: &str) -> ClientBuildError {
    ClientBuildError::InvalidConfig(format!("`{key}={value}` is not {expected}"))
}
