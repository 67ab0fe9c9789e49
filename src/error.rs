use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("wrong type for key")]
    WrongType,

    #[error("wrong number of arguments for '{0}' command")]
    Arity(String),

    #[error("value is not a valid float")]
    NotFloat,

    /// A score window boundary failed strict float parsing
    #[error("min or max is not a float")]
    InvalidBound,

    /// One of the `LIMIT` arguments is not an integer; carries "offset" or "limit"
    #[error("{0} arg is not a valid integer")]
    InvalidLimitArg(&'static str),

    #[error("syntax error")]
    SyntaxError,

    /// A key argument is not valid UTF-8
    #[error("invalid key")]
    InvalidKey,

    #[error("index out of range")]
    OutOfRange,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, KvError>;
