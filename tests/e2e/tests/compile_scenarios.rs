//! Compile pipeline scenarios: verbatim anchoring, hallucination rejection,
//! incremental boundaries and idempotent recompiles, driven through the tree
//! splitter and the real stores.

use kiln_core::audit::AuditFilter;
use kiln_core::ingest::{SplitterOptions, parse_dump, split_conversation};
use kiln_core::store::BrickState;

use kiln_e2e_tests::harness::TestEnv;
use kiln_e2e_tests::mocks::branched_dump;

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[test]
fn verbatim_quote_becomes_brick_with_exact_span() {
    let env = TestEnv::new();
    env.seed_topic("T");
    env.sync
        .register_run(
            "run-s1",
            &serde_json::json!({"messages": [{"id": "m1", "content": "Alpha beta gamma."}]}),
        )
        .unwrap();

    env.extractor
        .push_pointer("T", "$.messages[0].content", "beta");
    let count = env.compiler().compile_run("run-s1", "T").unwrap();
    assert_eq!(count, 1);

    let bricks = env.sync.get_bricks_for_topic("T").unwrap();
    assert_eq!(bricks.len(), 1);
    let brick = &bricks[0];

    assert_eq!(brick.content, "beta");
    assert_eq!(brick.source_address.start_index, 6);
    assert_eq!(brick.source_address.end_index, 10);
    assert_eq!(brick.state, BrickState::Improvise);

    // Property 1: content == source[start..end] and checksum covers the
    // full resolved node text
    let source = "Alpha beta gamma.";
    assert_eq!(
        &source[brick.source_address.start_index..brick.source_address.end_index],
        brick.content
    );
    assert_eq!(brick.source_address.checksum, sha256_hex(source.as_bytes()));

    // Brick identity is derived from topic and normalised content
    let fingerprint = sha256_hex("beta".as_bytes());
    assert_eq!(brick.fingerprint, fingerprint);
    assert_eq!(brick.id, sha256_hex(format!("T{fingerprint}").as_bytes()));
}

#[test]
fn hallucinated_quote_rejected_but_boundary_advances() {
    let env = TestEnv::new();
    env.seed_topic("T");
    env.sync
        .register_run(
            "run-s2",
            &serde_json::json!({"messages": [{"id": "m1", "content": "Alpha beta gamma."}]}),
        )
        .unwrap();

    env.extractor
        .push_pointer("T", "$.messages[0].content", "delta");
    let count = env.compiler().compile_run("run-s2", "T").unwrap();

    assert_eq!(count, 0);
    assert!(env.sync.get_bricks_for_topic("T").unwrap().is_empty());
    // The scan itself saw message 0, so the boundary still moves
    assert_eq!(
        env.sync.get_run("run-s2").unwrap().unwrap().last_processed_index,
        0
    );

    let detections = env
        .audit
        .read_events(&AuditFilter {
            event: Some("LLM_HALLUCINATION_DETECTED".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(detections.len(), 1);
}

#[test]
fn incremental_compile_only_feeds_new_messages() {
    let env = TestEnv::new();
    env.seed_topic("T");

    let initial = serde_json::json!({"messages": [
        {"id": "m0", "content": "zero"},
        {"id": "m1", "content": "one"},
        {"id": "m2", "content": "two"},
    ]});
    env.sync.register_run("run-s3", &initial).unwrap();

    env.extractor.push(r#"{"extracted_pointers": []}"#);
    env.compiler().compile_run("run-s3", "T").unwrap();
    assert_eq!(
        env.sync.get_run("run-s3").unwrap().unwrap().last_processed_index,
        2
    );

    // The conversation grows by one message
    let grown = serde_json::json!({"messages": [
        {"id": "m0", "content": "zero"},
        {"id": "m1", "content": "one"},
        {"id": "m2", "content": "two"},
        {"id": "m3", "content": "three boundary fresh"},
    ]});
    env.sync.refresh_run_content("run-s3", &grown).unwrap();

    env.extractor
        .push_pointer("T", "$.messages[3].content", "boundary fresh");
    let count = env.compiler().compile_run("run-s3", "T").unwrap();
    assert_eq!(count, 1);
    assert_eq!(
        env.sync.get_run("run-s3").unwrap().unwrap().last_processed_index,
        3
    );

    // A stale pointer into the already-processed window is rejected
    env.sync
        .refresh_run_content(
            "run-s3",
            &serde_json::json!({"messages": [
                {"id": "m0", "content": "zero"},
                {"id": "m1", "content": "one"},
                {"id": "m2", "content": "two"},
                {"id": "m3", "content": "three boundary fresh"},
                {"id": "m4", "content": "four"},
            ]}),
        )
        .unwrap();
    env.extractor.push_pointer("T", "$.messages[0].content", "zero");
    assert_eq!(env.compiler().compile_run("run-s3", "T").unwrap(), 0);

    let oob = env
        .audit
        .read_events(&AuditFilter {
            event: Some("LLM_PATH_OUT_OF_BOUNDS".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(oob.len(), 1);
}

#[test]
fn recompiling_unchanged_run_creates_nothing() {
    let env = TestEnv::new();
    env.seed_topic("T");
    env.sync
        .register_run(
            "run-s7",
            &serde_json::json!({"messages": [{"id": "m1", "content": "Alpha beta gamma."}]}),
        )
        .unwrap();

    env.extractor
        .push_pointer("T", "$.messages[0].content", "beta");
    assert_eq!(env.compiler().compile_run("run-s7", "T").unwrap(), 1);

    // Unchanged run: no extractor call (the script is empty, a call would
    // fail the compile), no new bricks
    assert_eq!(env.compiler().compile_run("run-s7", "T").unwrap(), 0);
    assert_eq!(env.sync.get_bricks_for_topic("T").unwrap().len(), 1);
}

#[test]
fn split_runs_compile_independently() {
    let env = TestEnv::new();
    env.seed_topic("T");

    let dump = parse_dump(branched_dump()).unwrap();
    let runs = split_conversation(&dump.conversations[0], SplitterOptions::default());
    assert_eq!(runs.len(), 2);

    for run in &runs {
        let raw = serde_json::to_value(&run.content).unwrap();
        env.sync.register_run(&run.run_id, &raw).unwrap();
        // Quote a fragment of the leaf message of each branch
        let leaf = run.content.messages.last().unwrap();
        let quote: String = leaf.content.split('.').next().unwrap().to_string();
        env.extractor
            .push_pointer("T", "$.messages[1].content", &quote);
        assert_eq!(env.compiler().compile_run(&run.run_id, "T").unwrap(), 1);
    }

    let bricks = env.sync.get_all_bricks().unwrap();
    assert_eq!(bricks.len(), 2);
    // Each brick checksums against its own branch's leaf message
    let checksums: std::collections::HashSet<&str> = bricks
        .iter()
        .map(|b| b.source_address.checksum.as_str())
        .collect();
    assert_eq!(checksums.len(), 2);
}

#[test]
fn every_materialisation_is_audited() {
    let env = TestEnv::new();
    env.seed_topic("T");
    env.sync
        .register_run(
            "run-audit",
            &serde_json::json!({"messages": [{"id": "m1", "content": "Alpha beta gamma."}]}),
        )
        .unwrap();
    env.extractor
        .push_pointer("T", "$.messages[0].content", "beta");
    env.compiler().compile_run("run-audit", "T").unwrap();

    for event in [
        "RUN_COMPILE_STARTED",
        "LLM_CALL_EXECUTED",
        "POINTERS_EXTRACTED",
        "BRICK_MATERIALIZED",
        "BOUNDARY_ADVANCED",
        "RUN_COMPILE_COMPLETED",
    ] {
        let hits = env
            .audit
            .read_events(&AuditFilter {
                event: Some(event.to_string()),
                run_id: Some("run-audit".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1, "expected exactly one {event} event");
    }
}
