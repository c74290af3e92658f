use crate::NodeId;
use log::info;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct NeighborEntry {
    /// Newest sequence number accepted from this neighbor.
    pub last_seq: u16,
    /// When the last HELLO arrived.
    pub last_heard: Instant,
}

/// Directly heard peers, keyed by the IPv4 address they announce.
///
/// An entry is created on the first HELLO from a non-local address,
/// refreshed on every later one, and dropped by [`NeighborTable::remove_stale`]
/// once nothing has been heard for longer than the timeout.
#[derive(Debug)]
pub struct NeighborTable {
    local_ip: NodeId,
    entries: HashMap<NodeId, NeighborEntry>,
    timeout: Duration,
}

// Serial-number comparison over the u16 space, so the counter survives
// wrapping past 65535.
fn seq_newer(candidate: u16, current: u16) -> bool {
    candidate != current && candidate.wrapping_sub(current) < 0x8000
}

impl NeighborTable {
    pub fn new(local_ip: NodeId, timeout: Duration) -> Self {
        Self {
            local_ip,
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Record a HELLO. A lower or equal sequence number still refreshes
    /// liveness but never regresses `last_seq`.
    pub fn process_hello(&mut self, sender: &str, seq: u16, now: Instant) {
        if sender == self.local_ip {
            return;
        }

        match self.entries.get_mut(sender) {
            Some(entry) => {
                if seq_newer(seq, entry.last_seq) {
                    entry.last_seq = seq;
                }
                entry.last_heard = now;
            }
            None => {
                self.entries.insert(
                    sender.to_string(),
                    NeighborEntry {
                        last_seq: seq,
                        last_heard: now,
                    },
                );
                info!("New neighbor discovered: {} (seq={})", sender, seq);
            }
        }
    }

    /// Drop every neighbor silent for strictly longer than the timeout.
    /// Returns the expired addresses so routes through them can be purged.
    pub fn remove_stale(&mut self, now: Instant) -> Vec<NodeId> {
        let timeout = self.timeout;
        let mut expired = Vec::new();

        self.entries.retain(|ip, entry| {
            if now.saturating_duration_since(entry.last_heard) > timeout {
                expired.push(ip.clone());
                false
            } else {
                true
            }
        });

        for ip in &expired {
            info!("Link to neighbor {} expired", ip);
        }
        expired
    }

    pub fn get(&self, ip: &str) -> Option<&NeighborEntry> {
        self.entries.get(ip)
    }

    pub fn ips(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
