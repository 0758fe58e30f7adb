use thiserror::Error;

/// User-visible command failures, one per wire-level error code.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GameError {
    #[error("operation not valid in the current phase")]
    WrongPhase,
    #[error("dead players cannot act")]
    DeadPlayer,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("action already submitted this phase")]
    AlreadySubmitted,
    #[error("duplicate submission")]
    IdempotentDuplicate,
    #[error("room is full")]
    RoomFull,
    #[error("room not found")]
    RoomNotFound,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited")]
    RateLimited,
    #[error("name must be 3-15 characters")]
    InvalidName,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    /// Wire-level error code.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::WrongPhase => "WRONG_PHASE",
            GameError::DeadPlayer => "DEAD_PLAYER",
            GameError::InvalidTarget(_) => "INVALID_TARGET",
            GameError::AlreadySubmitted => "ALREADY_SUBMITTED",
            GameError::IdempotentDuplicate => "IDEMPOTENT_DUPLICATE",
            GameError::RoomFull => "ROOM_FULL",
            GameError::RoomNotFound => "ROOM_NOT_FOUND",
            GameError::Unauthorized(_) => "UNAUTHORIZED",
            GameError::RateLimited => "RATE_LIMITED",
            GameError::InvalidName => "INVALID_NAME",
            GameError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the client may usefully retry the same command.
    pub fn retryable(&self) -> bool {
        match self {
            GameError::InvalidTarget(_) | GameError::RateLimited | GameError::Internal(_) => true,
            GameError::WrongPhase
            | GameError::DeadPlayer
            | GameError::AlreadySubmitted
            | GameError::IdempotentDuplicate
            | GameError::RoomFull
            | GameError::RoomNotFound
            | GameError::Unauthorized(_)
            | GameError::InvalidName => false,
        }
    }
}

/// Failures inside the key-value store layer. These never reach the wire
/// directly; the dispatcher maps them to `INTERNAL_ERROR` after retries.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("concurrent write detected for {key}")]
    WriteLoss { key: String },
    #[error("state validation failed: {0}")]
    Validation(String),
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        GameError::Internal(err.to_string())
    }
}
