use thiserror::Error;

#[derive(Debug, Error)]
pub enum TracestashError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("call already executed; clone it to run again")]
    AlreadyExecuted,

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TracestashError>;
