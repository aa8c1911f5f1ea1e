//! Membership Module Tests
//!
//! Validates the local cluster map used by placement and the get-batch protocol.
//!
//! ## Test Scopes
//! - **Data Structures**: Node identity, state defaults and serialization.
//! - **Service Logic**: Active-set filtering, ordering, state changes and lookups.

#[cfg(test)]
mod tests {
    use crate::membership::service::MembershipService;
    use crate::membership::types::{Node, NodeId, NodeState};

    fn node(id: &str, port: u16, state: NodeState) -> Node {
        Node {
            id: NodeId(id.to_string()),
            http_addr: format!("127.0.0.1:{}", port).parse().unwrap(),
            data_addr: format!("127.0.0.1:{}", port + 1000).parse().unwrap(),
            state,
        }
    }

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();

        assert_ne!(id1, id2, "Each NodeId should be unique");
        assert_eq!(id1.as_str().len(), 12);
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        let mut ids = vec![NodeId::from("c"), NodeId::from("a"), NodeId::from("b")];
        ids.sort();

        assert_eq!(ids, vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")]);
    }

    // ============================================================
    // NODE TESTS
    // ============================================================

    #[test]
    fn test_node_state_defaults_to_active() {
        let json = r#"{"id":"n1","http_addr":"127.0.0.1:6000","data_addr":"127.0.0.1:7000"}"#;

        let restored: Node = serde_json::from_str(json).expect("Deserialization failed");

        assert_eq!(restored.state, NodeState::Active);
        assert!(restored.is_active());
    }

    #[test]
    fn test_node_bincode_serialization() {
        let original = node("bincode-test", 6000, NodeState::Maintenance);

        let encoded = bincode::serialize(&original).expect("Bincode serialization failed");
        let restored: Node = bincode::deserialize(&encoded).expect("Bincode deserialization failed");

        assert_eq!(restored, original);
        assert!(!restored.is_active());
    }

    #[test]
    fn test_node_http_url() {
        let n = node("n1", 6000, NodeState::Active);

        assert_eq!(n.http_url("/v1/cluster"), "http://127.0.0.1:6000/v1/cluster");
    }

    // ============================================================
    // MEMBERSHIP SERVICE TESTS
    // ============================================================

    #[test]
    fn test_membership_requires_local_node() {
        let nodes = vec![node("n1", 6000, NodeState::Active)];

        let result = MembershipService::new(&NodeId::from("missing"), nodes);

        assert!(result.is_err());
    }

    #[test]
    fn test_membership_rejects_duplicate_ids() {
        let nodes = vec![
            node("n1", 6000, NodeState::Active),
            node("n1", 6001, NodeState::Active),
        ];

        let result = MembershipService::new(&NodeId::from("n1"), nodes);

        assert!(result.is_err());
    }

    #[test]
    fn test_active_members_are_filtered_and_sorted() {
        let nodes = vec![
            node("n3", 6003, NodeState::Active),
            node("n1", 6001, NodeState::Active),
            node("n2", 6002, NodeState::Maintenance),
            node("n4", 6004, NodeState::Decommissioning),
        ];

        let service = MembershipService::new(&NodeId::from("n1"), nodes).unwrap();

        let active: Vec<String> = service
            .get_active_members()
            .into_iter()
            .map(|n| n.id.0)
            .collect();
        assert_eq!(active, vec!["n1".to_string(), "n3".to_string()]);
        assert_eq!(service.count_active(), 2);
        assert_eq!(service.all_members().len(), 4);
    }

    #[test]
    fn test_set_state_bumps_version() {
        let nodes = vec![
            node("n1", 6001, NodeState::Active),
            node("n2", 6002, NodeState::Active),
        ];
        let service = MembershipService::new(&NodeId::from("n1"), nodes).unwrap();
        let v0 = service.version();

        assert!(service.set_state(&NodeId::from("n2"), NodeState::Maintenance));

        assert_eq!(service.count_active(), 1);
        assert!(!service.is_active(&NodeId::from("n2")));
        assert!(service.version() > v0);

        // Unknown node
        assert!(!service.set_state(&NodeId::from("ghost"), NodeState::Active));
    }

    #[test]
    fn test_get_member_and_local_state() {
        let nodes = vec![node("n1", 6001, NodeState::Active)];
        let service = MembershipService::new(&NodeId::from("n1"), nodes).unwrap();

        assert!(service.get_member(&NodeId::from("n1")).is_some());
        assert!(service.get_member(&NodeId::from("non-existent")).is_none());
        assert!(service.is_local_active());

        service.upsert(node("n9", 6009, NodeState::Active));
        assert_eq!(service.count_active(), 2);
    }
}
