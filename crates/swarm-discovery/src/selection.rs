//! Peer-selection operations the Coordinator uses to route tasks.

use rand::seq::SliceRandom;
use swarm_types::{Capability, ClusterView, NodeInfo};

/// The subset of alive peers whose capabilities are a superset of `caps`,
/// whose load is below `available_load_threshold`, excluding the local
/// node. An empty `caps` list returns all such peers (boundary behavior
/// named in the core spec).
#[must_use]
pub fn select_by_capability<'a>(
    view: &'a ClusterView,
    caps: &[Capability],
    available_load_threshold: f64,
) -> Vec<&'a NodeInfo> {
    view.active_peers()
        .into_iter()
        .filter(|peer| peer.has_all_capabilities(caps))
        .filter(|peer| peer.load < available_load_threshold)
        .collect()
}

/// Strict minimum by load; ties broken by lowest node id for determinism.
#[must_use]
pub fn select_least_loaded<'a>(candidates: &[&'a NodeInfo]) -> Option<&'a NodeInfo> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| {
            a.load
                .partial_cmp(&b.load)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Uniform random pick, used only as a fallback when load information is
/// unavailable or ties must be broken non-deterministically by design.
#[must_use]
pub fn select_random<'a>(candidates: &[&'a NodeInfo]) -> Option<&'a NodeInfo> {
    candidates.choose(&mut rand::thread_rng()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_types::NodeId;

    fn peer(id: &str, load: f64, caps: &[&str]) -> NodeInfo {
        let mut n = NodeInfo::new(NodeId::new(id), "127.0.0.1", 7946, 4)
            .with_capabilities(caps.iter().map(|c| Capability::new(*c)));
        n.load = load;
        n
    }

    #[test]
    fn empty_capability_list_returns_all_available() {
        let mut view = ClusterView::new(peer("local", 0.0, &[]));
        view.upsert_peer(peer("a", 0.1, &["code"]), 1);
        view.upsert_peer(peer("b", 0.2, &[]), 2);

        let selected = select_by_capability(&view, &[], 0.9);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn filters_by_capability_and_load() {
        let mut view = ClusterView::new(peer("local", 0.0, &[]));
        view.upsert_peer(peer("a", 0.1, &["code"]), 1);
        view.upsert_peer(peer("b", 0.95, &["code"]), 2);
        view.upsert_peer(peer("c", 0.1, &["research"]), 3);

        let selected = select_by_capability(&view, &[Capability::new("code")], 0.9);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, NodeId::new("a"));
    }

    #[test]
    fn excludes_local_node() {
        let view = ClusterView::new(peer("local", 0.0, &["code"]));
        let selected = select_by_capability(&view, &[Capability::new("code")], 0.9);
        assert!(selected.is_empty());
    }

    #[test]
    fn excludes_offline_peers() {
        let mut view = ClusterView::new(peer("local", 0.0, &[]));
        view.upsert_peer(peer("a", 0.1, &["code"]), 1);
        view.mark_offline(&NodeId::new("a"));
        let selected = select_by_capability(&view, &[Capability::new("code")], 0.9);
        assert!(selected.is_empty());
    }

    #[test]
    fn least_loaded_breaks_ties_by_id() {
        let a = peer("b-node", 0.5, &[]);
        let b = peer("a-node", 0.5, &[]);
        let candidates = vec![&a, &b];
        let selected = select_least_loaded(&candidates).unwrap();
        assert_eq!(selected.id, NodeId::new("a-node"));
    }

    #[test]
    fn least_loaded_empty_pool_returns_none() {
        let candidates: Vec<&NodeInfo> = Vec::new();
        assert!(select_least_loaded(&candidates).is_none());
    }

    #[test]
    fn select_random_only_picks_from_pool() {
        let a = peer("a", 0.1, &[]);
        let candidates = vec![&a];
        let selected = select_random(&candidates).unwrap();
        assert_eq!(selected.id, NodeId::new("a"));
    }
}
