//! Environment configuration.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::ConfigError;
use crate::proxy::ProxyTarget;

pub const CONNECTION_STRING_ENV_VAR: &str = "MQ_CONNECTION_STRING";
pub const PROXY_HOSTNAME_ENV_VAR: &str = "PROXY_HOSTNAME";
pub const PROXY_PORT_ENV_VAR: &str = "PROXY_PORT";

/// the one queue every stress run talks to
pub const QUEUE_NAME: &str = "basicqueue";

const DEFAULT_AMQP_PORT: u16 = 5672;
const DEFAULT_USER: &str = "guest";
const DEFAULT_VHOST: &str = "/";

/// Where the broker lives and how to log in, parsed from an `amqp://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub virtual_host: String,
    endpoint: Url,
}

fn decode(raw: &str, field: &'static str) -> Result<String, ConfigError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ConfigError::InvalidEncoding { field })
}

impl BrokerSettings {
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(connection_string.trim())?;
        if url.scheme() != "amqp" {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = url.host_str().ok_or(ConfigError::MissingHost)?.to_owned();

        let username = match url.username() {
            "" => DEFAULT_USER.to_owned(),
            user => decode(user, "username")?,
        };
        let password = match url.password() {
            Some(password) => decode(password, "password")?,
            None => DEFAULT_USER.to_owned(),
        };
        let virtual_host = match url.path().trim_start_matches('/') {
            "" => DEFAULT_VHOST.to_owned(),
            vhost => decode(vhost, "virtual host")?,
        };

        let port = url.port().unwrap_or(DEFAULT_AMQP_PORT);
        let endpoint = Url::parse(&format!("amqp://{}:{}", host, port))?;

        Ok(BrokerSettings {
            host,
            port,
            username,
            password,
            virtual_host,
            endpoint,
        })
    }

    /// the broker address as the route selector sees it, without credentials
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerSettings,
    pub queue: String,
    pub proxy: Option<ProxyTarget>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// parse configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection_string = lookup(CONNECTION_STRING_ENV_VAR)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingConnectionString(
                CONNECTION_STRING_ENV_VAR,
            ))?;
        let broker = BrokerSettings::parse(&connection_string)?;

        let proxy = ProxyTarget::from_settings(
            lookup(PROXY_HOSTNAME_ENV_VAR).as_deref(),
            lookup(PROXY_PORT_ENV_VAR).as_deref(),
        )?;

        Ok(Config {
            broker,
            queue: QUEUE_NAME.to_owned(),
            proxy,
        })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Config:")?;
        writeln!(f, "     Broker:")?;
        writeln!(f, "         host: {}", self.broker.host)?;
        writeln!(f, "         port: {}", self.broker.port)?;
        writeln!(f, "         user: {}", self.broker.username)?;
        writeln!(f, "         password: ****")?;
        writeln!(f, "         vhost: {}", self.broker.virtual_host)?;
        writeln!(f, "         queue: {}", self.queue)?;
        write!(f, "     Proxy: ")?;
        match &self.proxy {
            Some(proxy) => write!(f, "{}", proxy),
            None => write!(f, "none"),
        }
    }
}
