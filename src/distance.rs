use crate::{wire, NodeId};
use log::{debug, info};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Distances at or above this value mean "no usable route"; legitimate
/// hop counts can never reach it.
pub const NO_ROUTE: u32 = 1_000_000;

/// Routes learned from neighbor advertisements, keyed `(dest, via)`.
///
/// Several routes to the same destination may coexist, one per advertising
/// neighbor; the emitted distance vector carries the best one. The table
/// also owns the dirty flag that gates DV broadcasts, so flag and routes
/// are always read and written under the same lock.
#[derive(Debug)]
pub struct DistanceTable {
    local_ip: NodeId,
    routes: HashMap<(NodeId, NodeId), u32>,
    updated: bool,
}

impl DistanceTable {
    pub fn new(local_ip: NodeId) -> Self {
        Self {
            local_ip,
            routes: HashMap::new(),
            updated: false,
        }
    }

    pub fn distance(&self, dest: &str, via: &str) -> Option<u32> {
        self.routes.get(&(dest.to_string(), via.to_string())).copied()
    }

    pub fn best_distance(&self, dest: &str) -> u32 {
        self.routes
            .iter()
            .filter(|((d, _), _)| d == dest)
            .map(|(_, dist)| *dist)
            .min()
            .unwrap_or(NO_ROUTE)
    }

    /// Best distance per destination, sorted by destination so the emitted
    /// DV is deterministic. Destinations known only at sentinel distances
    /// are left out.
    pub fn distance_vector(&self) -> Vec<(NodeId, u32)> {
        let mut best: HashMap<&NodeId, u32> = HashMap::new();
        for ((dest, _), dist) in &self.routes {
            let slot = best.entry(dest).or_insert(*dist);
            if *dist < *slot {
                *slot = *dist;
            }
        }

        let mut vector: Vec<(NodeId, u32)> = best
            .into_iter()
            .filter(|(_, dist)| *dist < NO_ROUTE)
            .map(|(dest, dist)| (dest.clone(), dist))
            .collect();
        vector.sort();
        vector
    }

    /// Serialize this node's distance vector.
    pub fn encode(&self) -> String {
        wire::encode_distance_vector(&self.local_ip, &self.distance_vector())
    }

    /// Relax the table against a neighbor's advertisement. Each advertised
    /// distance costs one extra hop through the sender; a differing stored
    /// distance is overwritten even when the new one is worse, since the
    /// sender's own estimate is authoritative for routes through it.
    ///
    /// Returns whether anything changed (and thus the dirty flag was set).
    pub fn apply_update(&mut self, sender: &str, entries: &[(String, u32)]) -> bool {
        if sender == self.local_ip {
            debug!("Ignoring our own distance vector");
            return false;
        }

        let mut changed = false;
        for (dest, dist) in entries {
            let new_dist = dist.saturating_add(1);
            match self.routes.entry((dest.clone(), sender.to_string())) {
                Entry::Occupied(mut slot) => {
                    if *slot.get() != new_dist {
                        debug!(
                            "Route to {} via {} now {} hops (was {})",
                            dest,
                            sender,
                            new_dist,
                            slot.get()
                        );
                        slot.insert(new_dist);
                        changed = true;
                    }
                }
                Entry::Vacant(slot) => {
                    debug!("New route to {} via {}, {} hops", dest, sender, new_dist);
                    slot.insert(new_dist);
                    changed = true;
                }
            }
        }

        if changed {
            self.mark_updated();
        }
        changed
    }

    /// Drop every route advertised by one of the expired neighbors and
    /// dirty the table if any was dropped.
    pub fn purge_via(&mut self, dead: &[NodeId]) -> bool {
        let before = self.routes.len();
        self.routes.retain(|(_, via), _| !dead.contains(via));
        let purged = before - self.routes.len();

        if purged > 0 {
            info!("Dropped {} routes via expired neighbors", purged);
            self.mark_updated();
        }
        purged > 0
    }

    pub fn mark_updated(&mut self) {
        self.updated = true;
    }

    pub fn mark_sent(&mut self) {
        self.updated = false;
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{self, Message};

    fn table() -> DistanceTable {
        DistanceTable::new("10.0.0.1".to_string())
    }

    fn apply_raw(table: &mut DistanceTable, raw: &str) -> bool {
        match wire::parse(raw).unwrap() {
            Message::DistanceVector { sender, entries } => table.apply_update(&sender, &entries),
            other => panic!("expected a DV, got {:?}", other),
        }
    }

    #[test]
    fn test_ingestion_adds_one_hop() {
        let mut table = table();
        let changed = apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.3,0):(10.0.0.4,2):");

        assert!(changed);
        assert_eq!(table.distance("10.0.0.3", "10.0.0.2"), Some(1));
        assert_eq!(table.distance("10.0.0.4", "10.0.0.2"), Some(3));
        assert!(table.is_updated());
    }

    #[test]
    fn test_ingestion_is_idempotent() {
        let mut table = table();
        assert!(apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.3,0):"));

        table.mark_sent();
        assert!(!apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.3,0):"));
        assert!(!table.is_updated());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_own_dv_is_discarded() {
        let mut table = table();
        assert!(!apply_raw(&mut table, "10.0.0.1:DV:(10.0.0.9,0):"));
        assert!(table.is_empty());
        assert!(!table.is_updated());
    }

    #[test]
    fn test_worse_advertisement_overwrites() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.3,0):(10.0.0.4,2):");
        table.mark_sent();

        assert!(apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.3,5):"));
        assert_eq!(table.distance("10.0.0.3", "10.0.0.2"), Some(6));
        assert!(table.is_updated());
    }

    #[test]
    fn test_routes_via_other_neighbors_untouched() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.9,1):");
        apply_raw(&mut table, "10.0.0.5:DV:(10.0.0.9,3):");

        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.9,7):");
        assert_eq!(table.distance("10.0.0.9", "10.0.0.2"), Some(8));
        assert_eq!(table.distance("10.0.0.9", "10.0.0.5"), Some(4));
    }

    #[test]
    fn test_emission_picks_best_per_destination() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.7:DV:(10.0.0.20,1):(10.0.0.21,4):");
        apply_raw(&mut table, "10.0.0.8:DV:(10.0.0.20,3):");

        assert_eq!(
            table.distance_vector(),
            vec![
                ("10.0.0.20".to_string(), 2),
                ("10.0.0.21".to_string(), 5),
            ]
        );
        assert_eq!(table.encode(), "10.0.0.1:DV:(10.0.0.20,2):(10.0.0.21,5):");
    }

    #[test]
    fn test_each_destination_emitted_once() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.9,1):");
        apply_raw(&mut table, "10.0.0.3:DV:(10.0.0.9,1):");
        apply_raw(&mut table, "10.0.0.4:DV:(10.0.0.9,1):");

        let encoded = table.encode();
        assert_eq!(encoded.matches("10.0.0.9").count(), 1);
    }

    #[test]
    fn test_sentinel_distances_are_omitted() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.9,999999):(10.0.0.8,1):");

        // 999999 + 1 reaches the sentinel, so 10.0.0.9 is unreachable.
        assert_eq!(table.best_distance("10.0.0.9"), NO_ROUTE);
        assert_eq!(table.distance_vector(), vec![("10.0.0.8".to_string(), 2)]);
    }

    #[test]
    fn test_advertise_receive_round_trip() {
        let mut a = DistanceTable::new("10.0.0.1".to_string());
        apply_raw(&mut a, "10.0.0.2:DV:(10.0.0.5,0):(10.0.0.6,2):");

        let mut b = DistanceTable::new("10.0.0.9".to_string());
        apply_raw(&mut b, &a.encode());

        for (dest, best) in a.distance_vector() {
            assert_eq!(b.distance(&dest, "10.0.0.1"), Some(best + 1));
        }
    }

    #[test]
    fn test_purge_via_expired_neighbor() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.8,1):(10.0.0.9,1):");
        apply_raw(&mut table, "10.0.0.3:DV:(10.0.0.9,1):");
        table.mark_sent();

        assert!(table.purge_via(&["10.0.0.2".to_string()]));
        assert!(table.is_updated());
        assert_eq!(table.distance("10.0.0.8", "10.0.0.2"), None);
        assert_eq!(table.distance("10.0.0.9", "10.0.0.2"), None);
        assert_eq!(table.distance("10.0.0.9", "10.0.0.3"), Some(2));

        // Only 10.0.0.9 survives, through the remaining neighbor.
        assert_eq!(table.distance_vector(), vec![("10.0.0.9".to_string(), 2)]);
    }

    #[test]
    fn test_purge_without_matches_keeps_flag_clear() {
        let mut table = table();
        apply_raw(&mut table, "10.0.0.2:DV:(10.0.0.8,1):");
        table.mark_sent();

        assert!(!table.purge_via(&["10.0.0.99".to_string()]));
        assert!(!table.is_updated());
        assert_eq!(table.len(), 1);
    }
}
