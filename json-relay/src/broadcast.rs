//! Fan-out of one relayed payload to every other open connection.

use tracing::{debug, trace, warn};

use crate::{
    connection::{ConnectionId, Payload, SendError},
    registry::Registry,
};

/// Counts from a single fan-out, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Open connections other than the sender at snapshot time.
    pub recipients: usize,
    pub delivered: usize,
    /// Recipients whose send failed; each one was deregistered.
    pub failed: usize,
    /// Recipients that started closing between the snapshot and their send.
    pub skipped: usize,
}

/// Delivers `payload` verbatim to every open connection except `sender`.
///
/// Sends only enqueue onto each recipient's writer, so one stuck socket never
/// holds up the rest. A failed send deregisters that recipient and the loop
/// moves on.
pub async fn broadcast(
    registry: &Registry,
    payload: &Payload,
    sender: ConnectionId,
) -> BroadcastOutcome {
    let recipients: Vec<_> = registry
        .snapshot()
        .await
        .into_iter()
        .filter(|conn| conn.id() != sender && conn.is_open())
        .collect();

    let mut outcome = BroadcastOutcome {
        recipients: recipients.len(),
        ..BroadcastOutcome::default()
    };

    debug!(
        conn_id = %sender,
        recipients = outcome.recipients,
        bytes = payload.as_str().len(),
        "broadcasting message"
    );

    for conn in recipients {
        match conn.send(payload.clone()) {
            Ok(()) => {
                trace!(conn_id = %conn.id(), from = %sender, "queued message for recipient");
                outcome.delivered += 1;
            }
            Err(SendError::NotOpen { id, state }) => {
                trace!(conn_id = %id, ?state, "recipient no longer open, skipping");
                outcome.skipped += 1;
            }
            Err(error @ SendError::ChannelClosed { .. }) => {
                warn!(
                    conn_id = %conn.id(),
                    peer = ?conn.peer(),
                    %error,
                    "send failed, dropping connection"
                );
                registry.remove(conn.id()).await;
                outcome.failed += 1;
            }
        }
    }

    outcome
}
