use thiserror::Error;

/// Errors produced by the kiosk ledger, auth gate, and admin operations.
#[derive(Debug, Error)]
pub enum KioskError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("account is already logged in elsewhere")]
    DuplicateSession,

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("username already exists: {0}")]
    DuplicateUser(String),

    #[error("user is online and cannot be deleted: {0}")]
    UserActive(String),

    #[error("invalid user or amount")]
    InvalidAmountOrUser,

    #[error("invalid billing interval")]
    InvalidSetting,

    #[error("client is not online: {0}")]
    ClientNotOnline(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("missing required fields")]
    MissingFields,

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("password must be at most 100 characters")]
    InvalidPassword,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("too many login attempts, try again later")]
    RateLimited,

    #[error("storage error: {0}")]
    StorageIo(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KioskError {
    fn from(e: serde_json::Error) -> Self {
        KioskError::Codec(e.to_string())
    }
}

pub type KioskResult<T> = Result<T, KioskError>;
