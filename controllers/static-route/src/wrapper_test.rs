//! Unit tests for the StaticRoute wrapper helpers

#[cfg(test)]
mod tests {
    use crate::test_utils::{ip, selector, test_route};
    use crate::wrapper::{StaticRouteExt, FINALIZER};
    use ipnetwork::Ipv4Network;

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    #[test]
    fn gateway_parses_a_valid_spec_gateway() {
        let route = test_route("a", "192.168.1.0/24", Some("10.0.0.1"));
        assert_eq!(route.gateway(), Some(ip([10, 0, 0, 1])));
    }

    #[test]
    fn gateway_is_none_when_missing_or_invalid() {
        assert_eq!(test_route("a", "192.168.1.0/24", None).gateway(), None);
        assert_eq!(test_route("a", "192.168.1.0/24", Some("")).gateway(), None);
        assert_eq!(
            test_route("a", "192.168.1.0/24", Some("500.1.2.3")).gateway(),
            None
        );
    }

    #[test]
    fn is_protected_detects_overlap_in_both_directions() {
        // spec subnet inside a protected subnet
        let route = test_route("a", "10.5.0.0/16", None);
        assert!(route.is_protected(&[net("10.0.0.0/8")]));

        // protected subnet inside the spec subnet
        assert!(route.is_protected(&[net("10.5.1.0/24")]));

        // disjoint
        assert!(!route.is_protected(&[net("192.168.0.0/16")]));

        // empty protected set
        assert!(!route.is_protected(&[]));
    }

    #[test]
    fn is_protected_is_false_for_malformed_subnet() {
        let route = test_route("a", "not-a-subnet", None);
        assert!(!route.is_protected(&[net("10.0.0.0/8")]));
    }

    #[test]
    fn is_changed_without_an_entry_is_false() {
        let route = test_route("a", "192.168.1.0/24", Some("10.0.0.1"));
        assert!(!route.is_changed("nodeA", "10.0.0.1", &route.spec.selectors.clone()));
    }

    #[test]
    fn is_changed_detects_subnet_gateway_and_selector_drift() {
        let mut route = test_route("a", "192.168.1.0/24", Some("10.0.0.1"));
        route.add_to_status("nodeA", ip([10, 0, 0, 1]), None);

        // unchanged
        assert!(!route.is_changed("nodeA", "10.0.0.1", &route.spec.selectors.clone()));

        // gateway drift
        assert!(route.is_changed("nodeA", "10.0.0.2", &route.spec.selectors.clone()));

        // subnet drift
        let mut changed = route.clone();
        changed.spec.subnet = "192.168.2.0/24".to_string();
        assert!(changed.is_changed("nodeA", "10.0.0.1", &changed.spec.selectors.clone()));

        // selector drift, reordering included
        let mut with_selectors = route.clone();
        with_selectors.spec.selectors = Some(vec![
            selector("role", "In", &["edge"]),
            selector("zone", "Exists", &[]),
        ]);
        assert!(with_selectors.is_changed(
            "nodeA",
            "10.0.0.1",
            &with_selectors.spec.selectors.clone()
        ));

        // a different node's drift does not count
        assert!(!route.is_changed("nodeB", "10.0.0.2", &route.spec.selectors.clone()));
    }

    #[test]
    fn add_to_status_appends_once_and_records_the_resolved_gateway() {
        let mut route = test_route("a", "192.168.1.0/24", None);
        assert!(route.add_to_status("nodeA", ip([10, 0, 0, 1]), None));
        assert!(!route.add_to_status("nodeA", ip([10, 0, 0, 2]), None));

        let entries = route.node_status();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hostname, "nodeA");
        assert_eq!(entries[0].state.gateway.as_deref(), Some("10.0.0.1"));
        assert_eq!(entries[0].error, "");
    }

    #[test]
    fn add_to_status_records_the_error_message() {
        let mut route = test_route("a", "192.168.1.0/24", None);
        assert!(route.add_to_status("nodeA", ip([0, 0, 0, 0]), Some("boom")));
        assert_eq!(route.node_status()[0].error, "boom");
    }

    #[test]
    fn remove_from_status_drops_every_entry_of_the_host() {
        let mut route = test_route("a", "192.168.1.0/24", None);
        assert!(!route.remove_from_status("nodeA"));

        route.add_to_status("nodeA", ip([10, 0, 0, 1]), None);
        route.add_to_status("nodeB", ip([10, 0, 0, 1]), None);

        assert!(route.remove_from_status("nodeA"));
        assert_eq!(route.node_status().len(), 1);
        assert_eq!(route.node_status()[0].hostname, "nodeB");

        assert!(!route.remove_from_status("nodeA"));
    }

    #[test]
    fn status_matches_compares_the_full_tuple() {
        let mut route = test_route("a", "192.168.1.0/24", None);
        route.add_to_status("nodeA", ip([10, 0, 0, 1]), Some("boom"));

        assert!(route.status_matches("nodeA", ip([10, 0, 0, 1]), Some("boom")));
        assert!(!route.status_matches("nodeA", ip([10, 0, 0, 1]), None));
        assert!(!route.status_matches("nodeA", ip([10, 0, 0, 2]), Some("boom")));
        assert!(!route.status_matches("nodeB", ip([10, 0, 0, 1]), Some("boom")));

        // spec drift breaks the match even with the same gateway and error
        route.spec.subnet = "192.168.2.0/24".to_string();
        assert!(!route.status_matches("nodeA", ip([10, 0, 0, 1]), Some("boom")));
    }

    #[test]
    fn set_finalizer_only_when_the_list_is_empty() {
        let mut route = test_route("a", "192.168.1.0/24", None);
        assert!(route.set_finalizer());
        assert_eq!(
            route.metadata.finalizers,
            Some(vec![FINALIZER.to_string()])
        );

        // second call is a no-op
        assert!(!route.set_finalizer());
    }

    #[test]
    fn set_finalizer_accepts_the_legacy_string_as_present() {
        let mut route = test_route("a", "192.168.1.0/24", None);
        route.metadata.finalizers = Some(vec!["finalizer.iks.ibm.com".to_string()]);
        assert!(!route.set_finalizer());
        assert_eq!(
            route.metadata.finalizers,
            Some(vec!["finalizer.iks.ibm.com".to_string()])
        );
    }
}
