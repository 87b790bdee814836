//! The session object

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use super::{SessionError, SessionId};

/// Lifetime of a fresh session
pub const DEFAULT_SESSION_LIFETIME_MINUTES: i64 = 60;

/// `now + minutes`, saturating at the representable range
fn expiry_after(minutes: i64) -> DateTime<Utc> {
    let now = Utc::now();
    Duration::try_minutes(minutes)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(if minutes < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// Transient server-side state for one client
///
/// A map of string keys to JSON values with an identifier, an absolute UTC expiry
/// and three flags a session store uses to decide what to persist:
///
/// - `changed`: data or identifier changed since the last save
/// - `expires_changed`: expiry changed since the last save
/// - `stored`: the store knows this identifier
///
/// Mutations only ever raise the dirty flags. They are cleared by the store through
/// [`Session::acknowledge_persisted`] once a save has completed.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    data: HashMap<String, JsonValue>,
    expires: DateTime<Utc>,
    changed: bool,
    expires_changed: bool,
    stored: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// New session expiring one hour from now
    pub fn new() -> Self {
        Self::with_lifetime(DEFAULT_SESSION_LIFETIME_MINUTES)
    }

    /// New session expiring `minutes` from now; the expiry does not count as a change
    pub fn with_lifetime(minutes: i64) -> Self {
        Session {
            id: SessionId::generate(),
            data: HashMap::new(),
            expires: expiry_after(minutes),
            changed: false,
            expires_changed: false,
            stored: false,
        }
    }

    /// Rebuild a session loaded by a store
    ///
    /// The result is marked stored with both dirty flags clear.
    pub fn restore(record: SessionRecord) -> Self {
        Session {
            id: record.id,
            data: record.data,
            expires: record.expires,
            changed: false,
            expires_changed: false,
            stored: true,
        }
    }

    /// Snapshot for persistence
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            data: self.data.clone(),
            expires: self.expires,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// Value at `key`, or `default` when absent
    pub fn get_or<'a>(&'a self, key: &str, default: &'a JsonValue) -> &'a JsonValue {
        self.data.get(key).unwrap_or(default)
    }

    /// Value at `key`; a missing key is an error
    pub fn try_get(&self, key: &str) -> Result<&JsonValue, SessionError> {
        self.data
            .get(key)
            .ok_or_else(|| SessionError::KeyNotFound(key.to_string()))
    }

    /// Store `value` at `key`. Always marks the session changed, even if the value
    /// is equal to the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.data.insert(key.into(), value.into());
        self.changed = true;
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Result<JsonValue, SessionError> {
        let value = self
            .data
            .remove(key)
            .ok_or_else(|| SessionError::KeyNotFound(key.to_string()))?;
        self.changed = true;
        Ok(value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    pub fn set_expires(&mut self, expires: DateTime<Utc>) {
        self.expires = expires;
        self.expires_changed = true;
    }

    /// Expire `minutes` from now
    pub fn set_lifetime(&mut self, minutes: i64) {
        self.set_expires(expiry_after(minutes));
    }

    pub fn is_expired(&self) -> bool {
        self.expires <= Utc::now()
    }

    /// Replace the identifier with a fresh one
    ///
    /// The session is marked changed and not stored, so the store writes it as a
    /// new record instead of updating the one under the old identifier.
    pub fn renew_id(&mut self) {
        self.id = SessionId::generate();
        self.changed = true;
        self.stored = false;
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_expires_changed(&self) -> bool {
        self.expires_changed
    }

    pub fn is_stored(&self) -> bool {
        self.stored
    }

    /// Record whether the store currently knows this identifier
    pub fn set_stored(&mut self, stored: bool) {
        self.stored = stored;
    }

    /// Called by the store after a successful save
    pub fn acknowledge_persisted(&mut self) {
        self.changed = false;
        self.expires_changed = false;
        self.stored = true;
    }
}

/// Persistable form of a [`Session`]
///
/// The expiry serializes as an RFC 3339 UTC timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub data: HashMap<String, JsonValue>,
    pub expires: DateTime<Utc>,
}
