//! Assembler scenarios: content addressing, provenance registration, empty
//! recall, and monotonic conflict resolution against governed intents.

use kiln_core::cognition::{CoverageStatus, canonical_content_hash};
use kiln_core::graph::{EdgeType, Intent, IntentType, Lifecycle};
use kiln_core::store::{Brick, BrickState, SourceAddress};
use kiln_core::vector::Embedder;

use kiln_e2e_tests::harness::TestEnv;

/// Seed a brick backed by a registered run, and index it
fn seed_sourced_brick(env: &TestEnv, id: &str, content: &str) {
    let run_id = format!("run-{id}");
    env.sync
        .register_run(
            &run_id,
            &serde_json::json!({"messages": [
                {"message_id": format!("msg-{id}"), "role": "assistant",
                 "created_at": "2026-01-01T00:00:00+00:00",
                 "content": content}
            ]}),
        )
        .unwrap();
    env.sync
        .upsert_brick(&Brick {
            id: id.to_string(),
            topic_id: "T".to_string(),
            content: content.to_string(),
            fingerprint: format!("fp-{id}"),
            state: BrickState::Improvise,
            scope: "global".to_string(),
            source_address: SourceAddress {
                run_id,
                json_path: "$.messages[0].content".to_string(),
                start_index: 0,
                end_index: content.len(),
                checksum: "c".to_string(),
            },
        })
        .unwrap();
    env.index_all_bricks();
}

#[test]
fn empty_recall_emits_addressed_empty_artifact() {
    let env = TestEnv::new();
    let artifact = env.assembler().assemble_topic("unknown topic").unwrap();

    assert_eq!(artifact.coverage_status, CoverageStatus::NoRecallMatches);
    assert!(artifact.path.exists());

    let envelope: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.path).unwrap()).unwrap();
    assert_eq!(envelope["payload"]["coverage_status"], "NO_RECALL_MATCHES");
    assert_eq!(envelope["derived_from"], serde_json::json!([]));
    // The artifact id is the canonical hash of the payload
    assert_eq!(
        envelope["artifact_id"].as_str().unwrap(),
        canonical_content_hash(&envelope["payload"]),
    );
}

#[test]
fn assembled_artifact_is_content_addressed_and_linked() {
    let env = TestEnv::new();
    seed_sourced_brick(&env, "brick-1", "Use cosine similarity for recall scoring.");

    let artifact = env.assembler().assemble_topic("similarity metric").unwrap();
    assert_eq!(artifact.coverage_status, CoverageStatus::Assembled);

    let envelope: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.path).unwrap()).unwrap();
    assert_eq!(
        envelope["artifact_id"].as_str().unwrap(),
        canonical_content_hash(&envelope["payload"]),
    );
    assert_eq!(envelope["payload"]["artifact_type"], "TOPIC_COGNITION_V1");
    assert_eq!(
        envelope["payload"]["provenance"]["brick_ids"],
        serde_json::json!(["brick-1"])
    );

    // Graph linkage: topic -ASSEMBLED_IN-> artifact -DERIVED_FROM-> brick
    let topic_node = "topic_similarity-metric";
    let edges = env.graph.get_edges_for_node(&artifact.artifact_id).unwrap();
    assert!(edges.iter().any(|e| e.source_id == topic_node
        && e.edge_type == EdgeType::AssembledIn
        && e.target_id == artifact.artifact_id));
    assert!(edges.iter().any(|e| e.source_id == artifact.artifact_id
        && e.edge_type == EdgeType::DerivedFrom
        && e.target_id == "brick-1"));
}

#[test]
fn identical_corpus_yields_identical_artifact_id() {
    let env = TestEnv::new();
    seed_sourced_brick(&env, "brick-1", "Use cosine similarity for recall scoring.");
    seed_sourced_brick(&env, "brick-2", "Euclidean distance is the index metric.");

    let first = env.assembler().assemble_topic("similarity metric").unwrap();
    let second = env.assembler().assemble_topic("similarity metric").unwrap();

    assert_eq!(first.artifact_id, second.artifact_id);

    let read = |path: &std::path::Path| -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    };
    assert_eq!(
        read(&first.path)["derived_from"],
        read(&second.path)["derived_from"],
    );
}

#[test]
fn frozen_anchor_overrides_matching_new_fact() {
    let env = TestEnv::new();
    seed_sourced_brick(&env, "brick-1", "Use cosine similarity for recall scoring.");

    // Existing doctrine: a FROZEN intent on this topic
    env.frozen_intent("i-anchor", "Use cosine similarity", "topic_similarity-metric");

    // The assembler distills a near-identical fact (same "cosine" bucket in
    // the keyword embedder, similarity 1.0)
    let assembler = env.assembler_with_facts(&["Must use cosine similarity"]);
    assembler.assemble_topic("similarity metric").unwrap();

    let intents = env.graph.get_intents_by_topic("topic_similarity-metric").unwrap();
    let anchor = intents.iter().find(|i| i.id == "i-anchor").unwrap();
    let newcomer = intents
        .iter()
        .find(|i| i.statement == "Must use cosine similarity")
        .expect("new fact registered as an intent");

    // The anchor wins: untouched, still frozen, overriding the newcomer
    assert_eq!(anchor.lifecycle, Lifecycle::Frozen);
    assert_eq!(anchor.statement, "Use cosine similarity");
    assert_eq!(newcomer.lifecycle, Lifecycle::Forming);

    let edges = env.graph.get_edges_for_node(&newcomer.id).unwrap();
    assert!(edges.iter().any(|e| e.source_id == "i-anchor"
        && e.edge_type == EdgeType::Overrides
        && e.target_id == newcomer.id));
}

#[test]
fn matching_forming_intent_is_retired_not_overridden() {
    let env = TestEnv::new();
    seed_sourced_brick(&env, "brick-2", "Euclidean distance is the index metric.");

    // A FORMING intent already tracks this fact
    env.graph
        .register_node(
            kiln_core::graph::NodeKind::Topic,
            "topic_index-metric",
            &serde_json::json!({"topic_slug": "index-metric"}),
            true,
        )
        .unwrap();
    env.graph
        .add_intent(&Intent {
            id: "i-forming".to_string(),
            statement: "Euclidean distance selected".to_string(),
            lifecycle: Lifecycle::Forming,
            intent_type: IntentType::Fact,
            metadata: serde_json::json!({}),
            created_at: None,
        })
        .unwrap();
    env.graph
        .register_edge("topic_index-metric", "i-forming", EdgeType::AssembledIn, None)
        .unwrap();

    let assembler = env.assembler_with_facts(&["Euclidean distance is mandatory"]);
    assembler.assemble_topic("index metric").unwrap();

    let intents = env.graph.get_intents_by_topic("topic_index-metric").unwrap();
    let newcomer = intents
        .iter()
        .find(|i| i.statement == "Euclidean distance is mandatory")
        .expect("new fact registered");

    // Old forming intent retires via SUPERSEDED_BY; OVERRIDES stays reserved
    // for frozen sources
    let edges = env.graph.get_edges_for_node("i-forming").unwrap();
    assert!(edges.iter().any(|e| e.source_id == "i-forming"
        && e.edge_type == EdgeType::SupersededBy
        && e.target_id == newcomer.id));
    assert!(!edges.iter().any(|e| e.edge_type == EdgeType::Overrides));
}

#[test]
fn novel_fact_registers_as_forming_intent() {
    let env = TestEnv::new();
    seed_sourced_brick(&env, "brick-1", "The kiln pipeline compiles conversations.");

    let assembler = env.assembler_with_facts(&["Compilation is deterministic"]);
    assembler.assemble_topic("kiln pipeline").unwrap();

    let intents = env.graph.get_intents_by_topic("topic_kiln-pipeline").unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].statement, "Compilation is deterministic");
    assert_eq!(intents[0].lifecycle, Lifecycle::Forming);

    // Provenance back to the artifact that spawned it
    let origin = intents[0].metadata["origin_artifact"].as_str().unwrap();
    assert!(env.graph.get_node(origin).unwrap().is_some());
    let embedded = env.embedder.embed(&intents[0].statement).unwrap();
    assert_eq!(embedded.len(), kiln_e2e_tests::mocks::TEST_DIMS);
}
