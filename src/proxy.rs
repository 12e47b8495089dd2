//! Outbound route selection.
//!
//! The connector asks a [`RouteSelector`] how to reach the broker before it opens a
//! socket. [`ProxyRouter`] forces every request that names a host through one HTTP proxy
//! and hands everything else to a fallback policy, normally [`SystemSelector`].

use std::fmt;
use std::io;
use std::net::SocketAddr;

use log::{debug, error, info};
use url::Url;

use crate::error::{ConfigError, ProxyError};

/// How to reach a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    /// tunnel through an HTTP proxy with CONNECT
    Http { host: String, port: u16 },
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Route::Direct => f.write_str("DIRECT"),
            Route::Http { host, port } => write!(f, "HTTP @ {}:{}", host, port),
        }
    }
}

/// Policy consulted for every outbound connection.
pub trait RouteSelector: Send + Sync {
    /// Routes to try for `target`, in order. Never empty.
    fn select(&self, target: Option<&Url>) -> Vec<Route>;

    /// Called when connecting through a route returned by `select` failed.
    ///
    /// Every argument must be present; a missing one is a caller bug and is returned as
    /// [`ProxyError::InvalidArgument`].
    fn connect_failed(
        &self,
        target: Option<&Url>,
        address: Option<SocketAddr>,
        cause: Option<&io::Error>,
    ) -> Result<(), ProxyError>;
}

fn require_failure_args<'a>(
    target: Option<&'a Url>,
    address: Option<SocketAddr>,
    cause: Option<&'a io::Error>,
) -> Result<(&'a Url, SocketAddr, &'a io::Error), ProxyError> {
    let target = target.ok_or(ProxyError::InvalidArgument("target uri"))?;
    let address = address.ok_or(ProxyError::InvalidArgument("socket address"))?;
    let cause = cause.ok_or(ProxyError::InvalidArgument("failure cause"))?;
    Ok((target, address, cause))
}

/// The proxy the operator configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
}

impl ProxyTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ProxyTarget {
            host: host.into(),
            port,
        }
    }

    /// Build a target from the raw hostname and port settings.
    ///
    /// Both unset means no proxy. Only one set, or a port that is not a number in
    /// `1..=65535`, is an error.
    pub fn from_settings(
        host: Option<&str>,
        port: Option<&str>,
    ) -> Result<Option<ProxyTarget>, ConfigError> {
        let host = host.map(str::trim).filter(|h| !h.is_empty());
        let port = port.map(str::trim).filter(|p| !p.is_empty());

        match (host, port) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::IncompleteProxy {
                missing: crate::config::PROXY_PORT_ENV_VAR,
            }),
            (None, Some(_)) => Err(ConfigError::IncompleteProxy {
                missing: crate::config::PROXY_HOSTNAME_ENV_VAR,
            }),
            (Some(host), Some(port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|source| ConfigError::MalformedProxyPort {
                        value: port.to_owned(),
                        source,
                    })?;
                if port == 0 {
                    return Err(ConfigError::ZeroProxyPort);
                }
                Ok(Some(ProxyTarget::new(host, port)))
            }
        }
    }

    fn route(&self) -> Route {
        Route::Http {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Forces a single configured HTTP proxy for every request with a host.
pub struct ProxyRouter<D: RouteSelector = SystemSelector> {
    target: Option<ProxyTarget>,
    fallback: D,
}

impl<D: RouteSelector> ProxyRouter<D> {
    pub fn new(target: Option<ProxyTarget>, fallback: D) -> Self {
        match &target {
            Some(t) => info!("Setting up proxy routing with proxy address {}", t),
            None => info!("No proxy configured, using default routing"),
        }
        ProxyRouter { target, fallback }
    }

    pub fn target(&self) -> Option<&ProxyTarget> {
        self.target.as_ref()
    }
}

impl<D: RouteSelector> RouteSelector for ProxyRouter<D> {
    fn select(&self, target: Option<&Url>) -> Vec<Route> {
        match (&self.target, target) {
            (Some(proxy), Some(uri)) if uri.host().is_some() => vec![proxy.route()],
            _ => self.fallback.select(target),
        }
    }

    fn connect_failed(
        &self,
        target: Option<&Url>,
        address: Option<SocketAddr>,
        cause: Option<&io::Error>,
    ) -> Result<(), ProxyError> {
        let (target, address, cause) =
            require_failure_args(target, address, cause).map_err(|e| {
                error!("{}", e);
                e
            })?;
        self.fallback
            .connect_failed(Some(target), Some(address), Some(cause))
    }
}

/// Environment driven default policy, honoring `ALL_PROXY`, `HTTPS_PROXY`,
/// `HTTP_PROXY` and `NO_PROXY` (upper or lower case).
#[derive(Debug, Clone, Default)]
pub struct SystemSelector {
    proxy: Option<ProxyTarget>,
    no_proxy: Vec<String>,
}

const PROXY_VARS: &[&str] = &[
    "ALL_PROXY",
    "all_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
];
const NO_PROXY_VARS: &[&str] = &["NO_PROXY", "no_proxy"];

/// `http://host:port`, or bare `host:port`; anything that is not an HTTP proxy is ignored
fn parse_proxy_var(raw: &str) -> Option<ProxyTarget> {
    let raw = raw.trim();
    let parsed = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("http://{}", raw))
    };
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("ignoring proxy setting '{}': {}", raw, e);
            return None;
        }
    };
    if parsed.scheme() != "http" {
        debug!("ignoring non-http proxy '{}'", raw);
        return None;
    }
    match parsed.host_str() {
        Some(host) => Some(ProxyTarget::new(host, parsed.port().unwrap_or(80))),
        None => {
            debug!("ignoring proxy setting '{}' without a host", raw);
            None
        }
    }
}

impl SystemSelector {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// same as [`SystemSelector::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|&k| lookup(k))
                .find(|v| !v.trim().is_empty())
        };

        let proxy = PROXY_VARS
            .iter()
            .filter_map(|&k| lookup(k))
            .filter(|v| !v.trim().is_empty())
            .find_map(|raw| parse_proxy_var(&raw));
        let no_proxy = first(NO_PROXY_VARS)
            .map(|raw| {
                raw.split(',')
                    .map(|entry| entry.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|entry| !entry.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        SystemSelector { proxy, no_proxy }
    }

    fn bypassed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.no_proxy.iter().any(|entry| {
            entry == "*"
                || host == *entry
                || (host.ends_with(entry.as_str())
                    && host[..host.len() - entry.len()].ends_with('.'))
        })
    }
}

impl RouteSelector for SystemSelector {
    fn select(&self, target: Option<&Url>) -> Vec<Route> {
        let host = match target.and_then(Url::host_str) {
            Some(host) => host,
            None => return vec![Route::Direct],
        };
        match &self.proxy {
            Some(proxy) if !self.bypassed(host) => vec![proxy.route()],
            _ => vec![Route::Direct],
        }
    }

    fn connect_failed(
        &self,
        target: Option<&Url>,
        address: Option<SocketAddr>,
        cause: Option<&io::Error>,
    ) -> Result<(), ProxyError> {
        let (target, address, cause) = require_failure_args(target, address, cause)?;
        debug!("connection to {} via {} failed: {}", target, address, cause);
        Ok(())
    }
}
