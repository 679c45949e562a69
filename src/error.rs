use thiserror::Error;

/// Errors surfaced at the core's boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// A third side tried to join a nameplate or mailbox that already has
    /// two. The row is marked `crowded=true` and committed before this is
    /// returned to the offending caller.
    #[error("crowded")]
    Crowded,

    /// Nameplate allocation exhausted its retry budget.
    #[error("no nameplate available")]
    NoNameplate,

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::General(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::General(s.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
