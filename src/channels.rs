//! Channel registry for the relay server.
//!
//! Maintains the in-memory mapping from channel identifier to the
//! connections currently rendezvousing on it. The registry owns admission
//! (including identifier validation and the cap-at-two overflow policy),
//! pairing detection, and eviction.
//!
//! Channel buckets are ephemeral — created implicitly on first admission,
//! removed the instant the last member leaves, and lost on relay restart.

use std::collections::HashMap;

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Duration, Instant};

/// Required channel identifier length in bytes.
///
/// Matches the output length of the nanoid generator the reference client
/// uses to mint identifiers.
pub const CHANNEL_ID_LEN: usize = 21;

/// Number of members at which a channel is considered paired.
pub const PAIRING_THRESHOLD: usize = 2;

/// Unique runtime handle for one connection, assigned at admission.
pub type ConnId = u64;

/// Sender half of a connection's outbound frame channel.
pub type FrameSender = mpsc::UnboundedSender<Message>;

/// Errors that can occur when admitting a connection to a channel.
#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    /// The channel identifier is absent or not exactly [`CHANNEL_ID_LEN`]
    /// bytes long.
    #[error("channel identifier must be exactly {CHANNEL_ID_LEN} characters")]
    InvalidChannelId,
    /// The channel already holds a complete pair.
    #[error("channel already has {PAIRING_THRESHOLD} members")]
    ChannelFull,
}

/// One connection's membership in a channel bucket.
#[derive(Debug)]
struct Member {
    conn_id: ConnId,
    joined_at: Instant,
    sender: FrameSender,
}

/// Outcome of a successful admission.
#[derive(Debug)]
pub struct Admission {
    /// Member count after this admission (1 or [`PAIRING_THRESHOLD`]).
    pub members: usize,
    /// When this admission completed the pair, the senders of both members,
    /// in insertion order, so the caller can broadcast the peering signal.
    /// `None` for a first admission.
    pub peering: Option<Vec<FrameSender>>,
}

/// A connection selected by the staleness scan.
#[derive(Debug)]
pub struct StaleConn {
    /// Channel the connection belongs to (for logging).
    pub channel_id: String,
    /// The connection's runtime handle.
    pub conn_id: ConnId,
    /// Sender used to push the close frame to the connection's writer.
    pub sender: FrameSender,
}

/// Validates a channel identifier carried in the request path.
///
/// # Errors
///
/// Returns [`AdmitError::InvalidChannelId`] unless the identifier is exactly
/// [`CHANNEL_ID_LEN`] bytes long.
pub fn validate_channel_id(channel_id: &str) -> Result<(), AdmitError> {
    if channel_id.len() == CHANNEL_ID_LEN {
        Ok(())
    } else {
        Err(AdmitError::InvalidChannelId)
    }
}

/// In-memory directory of active channels and their members.
///
/// Thread-safe via [`RwLock`]: admissions and evictions take the write lock,
/// so the membership-count check and the pairing-broadcast decision are
/// serialized with every other mutation. Snapshots for forwarding and the
/// staleness scan take the read lock.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Vec<Member>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Creates a new, empty channel registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Admits a connection to a channel, creating the bucket if absent.
    ///
    /// The bucket lookup, the membership-count check, and the append happen
    /// under one write-lock acquisition, so two near-simultaneous admissions
    /// cannot both observe count one and miss the pairing signal.
    ///
    /// # Errors
    ///
    /// Returns [`AdmitError::InvalidChannelId`] for a wrong-length
    /// identifier (no bucket is created or mutated), or
    /// [`AdmitError::ChannelFull`] when the channel already holds a pair.
    pub async fn admit(
        &self,
        channel_id: &str,
        conn_id: ConnId,
        sender: FrameSender,
    ) -> Result<Admission, AdmitError> {
        validate_channel_id(channel_id)?;

        let mut channels = self.channels.write().await;
        let members = channels.entry(channel_id.to_string()).or_default();
        if members.len() >= PAIRING_THRESHOLD {
            return Err(AdmitError::ChannelFull);
        }
        members.push(Member {
            conn_id,
            joined_at: Instant::now(),
            sender,
        });
        let count = members.len();
        let peering = (count == PAIRING_THRESHOLD)
            .then(|| members.iter().map(|m| m.sender.clone()).collect());
        drop(channels);

        Ok(Admission {
            members: count,
            peering,
        })
    }

    /// Removes a connection from its channel; removes the bucket when it
    /// becomes empty.
    ///
    /// Idempotent: evicting a connection that is no longer a member (or a
    /// channel that no longer exists) is a no-op. A close event and a
    /// delivery-failure eviction may race here safely.
    pub async fn evict(&self, channel_id: &str, conn_id: ConnId) {
        let mut channels = self.channels.write().await;
        if let Some(members) = channels.get_mut(channel_id) {
            members.retain(|m| m.conn_id != conn_id);
            if members.is_empty() {
                channels.remove(channel_id);
            }
        }
    }

    /// Returns the senders of every member of a channel except the given
    /// connection, in insertion order.
    ///
    /// The snapshot is taken under the read lock; delivery happens outside it.
    pub async fn peers(
        &self,
        channel_id: &str,
        sender_conn_id: ConnId,
    ) -> Vec<(ConnId, FrameSender)> {
        let channels = self.channels.read().await;
        channels.get(channel_id).map_or_else(Vec::new, |members| {
            members
                .iter()
                .filter(|m| m.conn_id != sender_conn_id)
                .map(|m| (m.conn_id, m.sender.clone()))
                .collect()
        })
    }

    /// Returns every connection whose age exceeds `max_age`.
    pub async fn stale(&self, max_age: Duration) -> Vec<StaleConn> {
        let now = Instant::now();
        let channels = self.channels.read().await;
        channels
            .iter()
            .flat_map(|(channel_id, members)| {
                members
                    .iter()
                    .filter(move |m| now.duration_since(m.joined_at) > max_age)
                    .map(|m| StaleConn {
                        channel_id: channel_id.clone(),
                        conn_id: m.conn_id,
                        sender: m.sender.clone(),
                    })
            })
            .collect()
    }

    /// Returns the current member count of a channel (zero if absent).
    pub async fn member_count(&self, channel_id: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(channel_id).map_or(0, Vec::len)
    }

    /// Returns `true` if the channel currently has a bucket in the registry.
    pub async fn contains(&self, channel_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.contains_key(channel_id)
    }
}
