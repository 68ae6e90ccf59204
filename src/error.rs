use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NoSuchLog(String),
    NoSuchGroup(String),
    GroupExists(String),
    IdentifierOverflow,
    InvalidId(String),
    Validation(&'static str),
    Internal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoSuchLog(name) => write!(f, "no such log: {name}"),
            Error::NoSuchGroup(name) => write!(f, "no such group: {name}"),
            Error::GroupExists(name) => write!(f, "group already exists: {name}"),
            Error::IdentifierOverflow => write!(f, "identifier sequence overflow"),
            Error::InvalidId(raw) => write!(f, "invalid entry id: {raw}"),
            Error::Validation(msg) => write!(f, "validation: {msg}"),
            Error::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
