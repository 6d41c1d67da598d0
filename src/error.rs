use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Config(String),
    Status { status: u16, path: String },
    MissingToken,
    NoSite,
    Decode(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Status { status, path } => write!(f, "unexpected status {status} for {path}"),
            Error::MissingToken => write!(f, "login response has no token"),
            Error::NoSite => write!(f, "no site available"),
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
