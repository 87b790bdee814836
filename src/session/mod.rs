//! Server-side sessions
//!
//! A [`Session`] holds transient per-client state with an expiry and dirty
//! tracking. It knows nothing about where it is persisted: a session store owned
//! by the application loads sessions with [`Session::restore`], inspects the
//! flags to decide whether to save, and calls [`Session::acknowledge_persisted`]
//! after a successful write.
//!
//! ```rust,ignore
//! use keystone::session::Session;
//!
//! let mut session = Session::new();
//! session.set("user", 42);
//!
//! if session.is_changed() || !session.is_stored() {
//!     store.save(&session.to_record())?;
//!     session.acknowledge_persisted();
//! }
//! ```

mod id;
mod state;

pub use id::{SessionId, SESSION_ID_BYTES, SESSION_ID_LEN};
pub use state::{Session, SessionRecord, DEFAULT_SESSION_LIFETIME_MINUTES};

/// Errors raised by session operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Read or delete of a key that is not in the session
    KeyNotFound(String),
    /// Identifier is not 64 lowercase hex characters
    InvalidSessionId(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::KeyNotFound(key) => write!(f, "Session key not found: '{}'", key),
            SessionError::InvalidSessionId(id) => write!(f, "Invalid session id: '{}'", id),
        }
    }
}

impl std::error::Error for SessionError {}
