use sproxy_stratum::StratumError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Stratum(#[from] StratumError),

    #[error("unexpected subscription result: {0}")]
    MalformedSubscription(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("upstream session not established")]
    SessionNotEstablished,

    #[error("share store error: {0}")]
    Store(String),
}

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Failures while admitting a downstream share. Both variants end with "no share".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShareError {
    #[error("malformed argument: {0}")]
    MalformedArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}
