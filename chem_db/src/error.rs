//! Crate-wide error type. Every fallible operation on an open database returns one of
//! these instead of panicking.

#[derive(Debug)]
pub enum Error {
    /// Query or external fingerprint was produced under a different configuration
    /// than the database was created with.
    ConfigurationMismatch(String),
    /// Explicit insert id collides with an id already present.
    DuplicateId(u64),
    /// No record with the requested id.
    NotFound(u64),
    /// Operation not valid for the handle's current state (closed, read-only, locked).
    StateError(&'static str),
    /// Per-query deadline expired before the cursor could produce the next result.
    Timeout,
    /// On-disk files failed an integrity check at open or read time.
    CorruptStore(String),
    Io(std::io::Error),
}

impl std::convert::From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl std::convert::From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Error {
        Error::CorruptStore(format!("bad header: {}", e))
    }
}
