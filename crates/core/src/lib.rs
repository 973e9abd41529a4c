//! Core type aliases, identifiers, and constants for deckdraft.
//!
//! This crate provides the foundational types and configuration parameters
//! used throughout the deckdraft workspace.

// ============================================================================
// TYPE ALIASES
// ============================================================================
/// Card identifier as stored in the external card database.
pub type CardCode = u32;
/// Seat index around the draft table (rotation order).
pub type Position = usize;
/// Avatar / display-card identifier chosen by a participant.
pub type ImageId = u32;
/// Frame sequence number used for request/acknowledge correlation.
pub type Seq = u64;
/// Weight of one candidate composition in a dispatch segment.
pub type Rate = u32;

// ============================================================================
// IDENTITY TYPES
// ============================================================================
use std::cmp::Ordering;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;

/// Generic ID wrapper providing compile-time type safety over uuid::Uuid.
pub struct ID<T> {
    inner: uuid::Uuid,
    marker: PhantomData<T>,
}

impl<T> ID<T> {
    pub fn inner(&self) -> uuid::Uuid {
        self.inner
    }
}

impl<T> From<ID<T>> for uuid::Uuid {
    fn from(id: ID<T>) -> Self {
        id.inner()
    }
}
impl<T> From<uuid::Uuid> for ID<T> {
    fn from(inner: uuid::Uuid) -> Self {
        Self {
            inner,
            marker: PhantomData,
        }
    }
}

impl<T> Default for ID<T> {
    fn default() -> Self {
        Self {
            inner: uuid::Uuid::now_v7(),
            marker: PhantomData,
        }
    }
}

impl<T> Copy for ID<T> {}
impl<T> Clone for ID<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Eq for ID<T> {}
impl<T> PartialEq for ID<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Ord for ID<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}
impl<T> PartialOrd for ID<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Hash for ID<T> {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.inner.hash(state);
    }
}

impl<T> Debug for ID<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ID").field(&self.inner).finish()
    }
}
impl<T> Display for ID<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

// ============================================================================
// SESSION PARAMETERS
// ============================================================================
/// How long a delivery waits for a participant to reconnect (seconds).
pub const RECONNECT_TIMEOUT: u64 = 60;
/// Minimum unlocked item count before an adaptive part falls back to a
/// uniform sample from its full eligible set.
pub const UNLOCK_FLOOR: usize = 15;
/// Adaptive parts thinner than this are padded from their fallback pool
/// before dealing.
pub const PAD_THRESHOLD: usize = 50;
/// Soft sanity factor for unique dealing: a pool must hold at least
/// `POOL_GUARD_FACTOR * n` items before a dispatcher declaring `deal(n)`
/// is allowed to build.
pub const POOL_GUARD_FACTOR: usize = 5;

// ============================================================================
// ERRORS
// ============================================================================
use serde::Deserialize;
use serde::Serialize;

/// Wire-visible error codes. Serialized as SCREAMING_SNAKE_CASE strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Secret does not match the registered identity.
    Forbidden,
    /// Message requires a bound identity.
    Unbound,
    /// Connection superseded by a newer bind of the same uuid.
    Rebind,
    /// Already in a room.
    RoomConflict,
    /// Bound to an active draft.
    Picking,
    /// Room, preset, or resource does not exist.
    NotFound,
    /// Not a member of any room.
    NotInRoom,
    /// Not every participant flagged ready.
    NotReady,
    /// A session is already active for this room id.
    Conflict,
    /// Reconnection window elapsed for a single participant.
    Timedout,
    /// No participant in the session is reachable.
    AllOffline,
    /// Pick count outside the round's allowed budget.
    NpicksMismatch,
    /// Client acknowledged a request with a non-ok status.
    Rejected,
    /// Malformed preset, pool, or filter configuration.
    Config,
    /// Session aborted while the request was in flight.
    Aborted,
    /// Anything unexpected; details stay in the server log.
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "FORBIDDEN",
            Self::Unbound => "UNBOUND",
            Self::Rebind => "REBIND",
            Self::RoomConflict => "ROOM_CONFLICT",
            Self::Picking => "PICKING",
            Self::NotFound => "NOT_FOUND",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::NotReady => "NOT_READY",
            Self::Conflict => "CONFLICT",
            Self::Timedout => "TIMEDOUT",
            Self::AllOffline => "ALL_OFFLINE",
            Self::NpicksMismatch => "NPICKS_MISMATCH",
            Self::Rejected => "REJECTED",
            Self::Config => "CONFIG",
            Self::Aborted => "ABORTED",
            Self::ServerError => "SERVER_ERROR",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried through handlers and converted to `{code, message}`
/// acks at the message-dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftError {
    pub code: ErrorCode,
    pub message: String,
}

impl DraftError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: String::new(),
        }
    }
    pub fn with(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
    pub fn config(message: impl Into<String>) -> Self {
        Self::with(ErrorCode::Config, message)
    }
}

impl Display for DraftError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for DraftError {}

// ============================================================================
// RUNTIME UTILITIES
// ============================================================================
/// Initialize dual logging (terminal + file) with timestamped log files.
/// Creates `logs/` directory and writes DEBUG level to file, INFO to terminal.
pub fn log() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}

/// Register Ctrl+C handler for immediate (non-graceful) termination.
pub fn kys() {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("install ctrl-c handler");
        log::warn!("terminating immediately");
        std::process::exit(0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn error_codes_on_the_wire() {
        assert_eq!(ErrorCode::RoomConflict.as_str(), "ROOM_CONFLICT");
        assert_eq!(ErrorCode::NpicksMismatch.as_str(), "NPICKS_MISMATCH");
        assert_eq!(ErrorCode::AllOffline.to_string(), "ALL_OFFLINE");
    }
    #[test]
    fn error_display_with_and_without_message() {
        assert_eq!(DraftError::new(ErrorCode::Timedout).to_string(), "TIMEDOUT");
        assert_eq!(
            DraftError::with(ErrorCode::NotFound, "no such room").to_string(),
            "NOT_FOUND: no such room"
        );
    }
    #[test]
    fn typed_ids_are_distinct_per_marker() {
        struct A;
        let id = ID::<A>::default();
        assert_eq!(id, id.inner().into());
    }
}
