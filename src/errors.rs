use std::fmt;

use reqwest::StatusCode;
use tonic::Code;

/// gRPC status codes the write API reports in-band.
pub mod code {
    pub const INVALID_ARGUMENT: i32 = 3;
    pub const ALREADY_EXISTS: i32 = 6;
    pub const RESOURCE_EXHAUSTED: i32 = 8;
    pub const ABORTED: i32 = 10;
    pub const OUT_OF_RANGE: i32 = 11;
    pub const INTERNAL: i32 = 13;
    pub const UNAVAILABLE: i32 = 14;
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Reqwest(reqwest::Error),
    Http(StatusCode, String),
    Status(tonic::Status),
    Transport(tonic::transport::Error),
    Auth(String),
    Config(String),
    Key(String),
    JwtSign(String),
    Encode(prost::EncodeError),
    Protocol(String),
    Append {
        offset: u64,
        code: i32,
        message: String,
    },
    ChannelClosed,
}

/// Whether the run loop may keep going after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

impl Error {
    pub fn severity(&self) -> Severity {
        let recoverable = match self {
            Error::Reqwest(err) => err.is_connect() || err.is_timeout(),
            Error::Transport(_) => true,
            Error::Status(status) => matches!(
                status.code(),
                Code::Unavailable
                    | Code::ResourceExhausted
                    | Code::Aborted
                    | Code::Internal
                    | Code::DeadlineExceeded
            ),
            Error::Http(status, _) => matches!(
                *status,
                StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Error::Append { code: c, .. } => matches!(
                *c,
                code::UNAVAILABLE | code::RESOURCE_EXHAUSTED | code::ABORTED | code::INTERNAL
            ),
            _ => false,
        };
        if recoverable {
            Severity::Recoverable
        } else {
            Severity::Fatal
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Json(err) => write!(f, "json error: {err}"),
            Error::Reqwest(err) => write!(f, "transport error: {err}"),
            Error::Http(status, body) => write!(f, "http {status}: {body}"),
            Error::Status(status) => {
                write!(f, "rpc failed ({:?}): {}", status.code(), status.message())
            }
            Error::Transport(err) => write!(f, "grpc transport error: {err}"),
            Error::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Key(msg) => write!(f, "private key error: {msg}"),
            Error::JwtSign(msg) => write!(f, "jwt signing error: {msg}"),
            Error::Encode(err) => write!(f, "row encoding error: {err}"),
            Error::Protocol(msg) => write!(f, "unexpected server reply: {msg}"),
            Error::Append {
                offset,
                code,
                message,
            } => write!(
                f,
                "append at offset {offset} rejected (code {code}): {message}"
            ),
            Error::ChannelClosed => write!(f, "write channel is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Reqwest(err) => Some(err),
            Error::Status(err) => Some(err),
            Error::Transport(err) => Some(err),
            Error::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Reqwest(err)
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Status(status)
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport(err)
    }
}

impl From<prost::EncodeError> for Error {
    fn from(err: prost::EncodeError) -> Self {
        Error::Encode(err)
    }
}
