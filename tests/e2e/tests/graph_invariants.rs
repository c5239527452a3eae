//! Graph governance scenarios: cycle rejection, lifecycle monotonicity,
//! the frozen-scope invariant and atomic supersession.

use kiln_core::graph::{EdgeType, GraphError, Intent, Lifecycle, ScopeNode};
use kiln_core::graph::validation::run_integrity_sweep;

use kiln_e2e_tests::harness::TestEnv;

#[test]
fn overrides_cycle_rejected_and_state_unchanged() {
    let env = TestEnv::new();
    for id in ["a", "b", "c"] {
        env.frozen_intent(id, &format!("statement {id}"), "topic_cycles");
    }

    env.graph
        .add_typed_edge(&env.edge("a", "b", EdgeType::Overrides))
        .unwrap();
    env.graph
        .add_typed_edge(&env.edge("b", "c", EdgeType::Overrides))
        .unwrap();

    let nodes_before = env.graph.get_all_nodes_raw().unwrap();
    let edges_before = env.graph.get_all_edges().unwrap();

    let err = env
        .graph
        .add_typed_edge(&env.edge("c", "a", EdgeType::Overrides))
        .unwrap_err();
    match &err {
        // The offending path walks the existing chain back to the source
        GraphError::CycleDetected { path, .. } => assert!(path.len() >= 3),
        other => panic!("expected cycle rejection, got {other:?}"),
    }

    // Graph state after equals graph state before the third attempt
    let nodes_after = env.graph.get_all_nodes_raw().unwrap();
    let edges_after = env.graph.get_all_edges().unwrap();
    assert_eq!(nodes_before.len(), nodes_after.len());
    assert_eq!(edges_before.len(), edges_after.len());

    // And both guarded edge types still scan as DAGs
    let report = run_integrity_sweep(&env.graph).unwrap();
    assert!(report.overrides_cycle.is_empty());
    assert!(report.superseded_cycle.is_empty());
}

#[test]
fn lifecycle_sequence_follows_transition_table() {
    let env = TestEnv::new();
    env.graph
        .add_intent(&Intent::new("i1", "governed statement"))
        .unwrap();

    // Forward-only walk
    env.graph.promote_intent("i1", Lifecycle::Forming).unwrap();
    assert!(matches!(
        env.graph.promote_intent("i1", Lifecycle::Loose),
        Err(GraphError::InvalidTransition { .. })
    ));

    // Freezing requires a scope edge
    assert!(matches!(
        env.graph.promote_intent("i1", Lifecycle::Frozen),
        Err(GraphError::InvariantViolation(_))
    ));
    env.graph
        .add_scope(&ScopeNode {
            id: "s1".to_string(),
            name: "scope".to_string(),
            description: String::new(),
            metadata: serde_json::Value::Null,
        })
        .unwrap();
    env.graph
        .register_edge("i1", "s1", EdgeType::AppliesTo, None)
        .unwrap();
    env.graph.promote_intent("i1", Lifecycle::Frozen).unwrap();

    // KILLED is terminal
    env.graph.kill_node("i1", "done", "test").unwrap();
    assert!(matches!(
        env.graph.promote_intent("i1", Lifecycle::Superseded),
        Err(GraphError::InvalidTransition { .. })
    ));

    // Kill is idempotent
    env.graph.kill_node("i1", "again", "test").unwrap();
    let node = env.graph.get_node("i1").unwrap().unwrap();
    assert_eq!(node.data["kill_reason"], "done");
}

#[test]
fn supersession_commits_edge_metadata_and_lifecycle_together() {
    let env = TestEnv::new();
    env.frozen_intent("old", "use the old rule", "topic_rules");
    env.frozen_intent("new", "use the new rule", "topic_rules");

    env.graph
        .supersede_node("old", "new", "rule replaced", "governor")
        .unwrap();

    let old = env.graph.get_intent("old").unwrap().unwrap();
    assert_eq!(old.lifecycle, Lifecycle::Superseded);
    assert_eq!(old.metadata["superseded_by"], "new");
    let new = env.graph.get_intent("new").unwrap().unwrap();
    assert_eq!(new.lifecycle, Lifecycle::Frozen);
    assert_eq!(new.metadata["supersedes"], "old");

    let edges = env.graph.get_edges_for_node("old").unwrap();
    assert!(
        edges
            .iter()
            .any(|e| e.edge_type == EdgeType::SupersededBy && e.target_id == "new")
    );
}

#[test]
fn supersession_requires_frozen_pair() {
    let env = TestEnv::new();
    env.frozen_intent("frozen-1", "anchor", "topic_pair");
    env.graph
        .add_intent(&Intent::new("loose-1", "still loose"))
        .unwrap();

    assert!(matches!(
        env.graph.supersede_node("frozen-1", "loose-1", "r", "t"),
        Err(GraphError::InvariantViolation(_))
    ));
    // Nothing moved
    assert_eq!(
        env.graph.get_intent("frozen-1").unwrap().unwrap().lifecycle,
        Lifecycle::Frozen
    );
}

#[test]
fn double_override_of_one_target_rejected() {
    let env = TestEnv::new();
    for id in ["winner", "rival", "target"] {
        env.frozen_intent(id, &format!("statement {id}"), "topic_override");
    }

    env.graph
        .add_typed_edge(&env.edge("winner", "target", EdgeType::Overrides))
        .unwrap();
    // Idempotent retry with the same source is fine
    assert!(
        !env.graph
            .add_typed_edge(&env.edge("winner", "target", EdgeType::Overrides))
            .unwrap()
    );
    // A second override from elsewhere violates the single-override rule
    assert!(matches!(
        env.graph
            .add_typed_edge(&env.edge("rival", "target", EdgeType::Overrides)),
        Err(GraphError::InvariantViolation(_))
    ));
}

#[test]
fn killed_nodes_persist_with_history() {
    let env = TestEnv::new();
    env.graph
        .add_intent(&Intent::new("doomed", "to be removed"))
        .unwrap();
    env.graph
        .kill_node("doomed", "superseded by doctrine", "governor")
        .unwrap();

    // No deletion: the node is still queryable with its full history
    let node = env.graph.get_node("doomed").unwrap().unwrap();
    assert_eq!(node.data["statement"], "to be removed");
    assert_eq!(node.data["lifecycle"], "killed");
    assert_eq!(node.data["killed_by"], "governor");
}
