//! Resolution of the supported construction inputs into one upstream endpoint.

use crate::app_config::ProxyPoolConfig;
use crate::errors::{ProxyError, ProxyResult};
use std::fmt::{self, Debug, Formatter};

/// Connection target and credentials of the upstream pool
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl UpstreamEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Debug for UpstreamEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// The accepted ways of naming an upstream pool
#[derive(Debug, Clone)]
pub enum EndpointSpec {
    Parts { host: String, port: u16, username: String, password: Option<String> },
    /// `[scheme://][user[:password]@]host:port`; embedded credentials win over the separate ones
    Uri { uri: String, username: Option<String>, password: Option<String> },
    Config(ProxyPoolConfig),
}

impl EndpointSpec {
    pub fn resolve(&self) -> ProxyResult<UpstreamEndpoint> {
        match self {
            EndpointSpec::Parts { host, port, username, password } => {
                build(host.clone(), Some(*port), Some(username.clone()), password.clone())
            }
            EndpointSpec::Uri { uri, username, password } => resolve_uri(uri, username.clone(), password.clone()),
            EndpointSpec::Config(config) => {
                let uri = match (config.url.as_deref(), config.uri.as_deref()) {
                    (Some(url), Some(uri)) if url != uri => {
                        return Err(ProxyError::InvalidArgument(format!("both url ({}) and uri ({}) are set", url, uri)));
                    }
                    (Some(uri), _) | (None, Some(uri)) => uri,
                    (None, None) => return Err(ProxyError::InvalidArgument("either url or uri is required".to_string())),
                };
                resolve_uri(uri, config.user.clone(), config.password.clone())
            }
        }
    }
}

struct ParsedUri {
    host: String,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
}

fn resolve_uri(uri: &str, username: Option<String>, password: Option<String>) -> ProxyResult<UpstreamEndpoint> {
    let parsed = parse_uri(uri)?;
    build(parsed.host, parsed.port, parsed.username.or(username), parsed.password.or(password))
}

fn build(host: String, port: Option<u16>, username: Option<String>, password: Option<String>) -> ProxyResult<UpstreamEndpoint> {
    if host.is_empty() {
        return Err(ProxyError::InvalidArgument("missing host".to_string()));
    }
    let port = match port {
        Some(0) | None => return Err(ProxyError::InvalidArgument(format!("missing port for host {}", host))),
        Some(port) => port,
    };
    let username = username
        .filter(|username| !username.is_empty())
        .ok_or_else(|| ProxyError::InvalidArgument(format!("missing username for {}:{}", host, port)))?;

    Ok(UpstreamEndpoint { host, port, username, password: password.unwrap_or_default() })
}

fn parse_uri(uri: &str) -> ProxyResult<ParsedUri> {
    let invalid = |reason: &str| ProxyError::InvalidArgument(format!("invalid uri {}: {}", uri, reason));

    let rest = match uri.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => rest,
        Some(_) => return Err(invalid("empty scheme")),
        None => uri,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();

    let (userinfo, hostport) = match authority.rsplit_once('@') {
        Some((userinfo, hostport)) => (Some(userinfo), hostport),
        None => (None, authority),
    };
    let (username, password) = match userinfo {
        Some(userinfo) => match userinfo.split_once(':') {
            Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
            None => (Some(userinfo.to_string()), None),
        },
        None => (None, None),
    };

    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']').ok_or_else(|| invalid("unterminated IPv6 address"))?;
        (host, after.strip_prefix(':'))
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };
    let port = port.map(|port| port.parse::<u16>().map_err(|_| invalid("bad port"))).transpose()?;

    Ok(ParsedUri { host: host.to_string(), port, username: username.filter(|u| !u.is_empty()), password })
}
