use crate::cache::{CacheError, FetchError};
use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Cache(CacheError),

    #[from]
    Fetch(FetchError),

    #[from]
    Json(serde_json::Error),

    #[from]
    Http(reqwest::Error),

    #[from]
    Io(std::io::Error),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Cache(e) => write!(fmt, "{e}"),
            Self::Fetch(e) => write!(fmt, "{e}"),
            Self::Json(e) => write!(fmt, "{e}"),
            Self::Http(e) => write!(fmt, "{e}"),
            Self::Io(e) => write!(fmt, "{e}"),
            Self::Custom(message) => write!(fmt, "{message}"),
        }
    }
}

impl std::error::Error for Error {}
