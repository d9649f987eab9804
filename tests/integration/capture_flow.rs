//! Integration tests for the capture flow
//!
//! Tests the flow: MockChannel -> RpcClient -> CaptureEngine -> fixture files

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};
use tagcap::agent::mock::{
    card_detected_on, card_removed_on, MockChannel, MockReply, MockScriptBuilder,
};
use tagcap::capture::{
    AutomaticOperator, CancelReason, CaptureEngine, InteractiveOperator, ReaderScope,
    SequencerState, TagProfile,
};
use tagcap::config::{CaptureConfig, SettleConfig};
use tagcap::{CaptureError, ChannelError, Envelope};
use tempfile::{tempdir, TempDir};
use tokio::io::{duplex, BufReader};
use tokio_util::sync::CancellationToken;

const ACR1252: &str = "ACS ACR1252 1S CL Reader PICC 0";
const ACR122U: &str = "ACS ACR122U PICC Interface";
const ACR1552: &str = "ACS ACR1552 B";

fn test_config(dir: &Path, profiles: Vec<TagProfile>) -> CaptureConfig {
    CaptureConfig {
        capture_log: dir.join("nfc_capture.log"),
        testdata_root: dir.join("testdata"),
        receive_timeout: Duration::from_millis(20),
        rpc_timeout: Duration::from_millis(500),
        settle: SettleConfig {
            delay: Duration::from_millis(1),
            quiescence_poll: None,
            quiescence_max: Duration::from_millis(10),
        },
        max_wait: Some(Duration::from_secs(5)),
        profiles,
        ..CaptureConfig::default()
    }
}

fn ntag_profiles() -> Vec<TagProfile> {
    vec![
        TagProfile::new("NTAG213", "ntag213"),
        TagProfile::new("NTAG215", "ntag215"),
    ]
}

fn automatic_engine(config: CaptureConfig) -> CaptureEngine {
    CaptureEngine::new(config, Box::new(AutomaticOperator::new(Vec::new())))
}

fn append_line(path: &Path, line: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{line}").unwrap();
}

fn read_fixture(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn fixture_path(dir: &TempDir, reader_id: &str, slug: &str) -> PathBuf {
    dir.path()
        .join("testdata")
        .join(reader_id)
        .join(format!("{slug}.json"))
}

/// Two tags, the first with one logged exchange, the second with none
#[tokio::test]
async fn test_ntag_scenario_writes_both_fixtures() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let log_path = config.capture_log.clone();

    let script = MockScriptBuilder::new()
        .run(move || append_line(&log_path, "t0 | READ | cmd=00B0 | rsp=0102"))
        .tag_present("A", "NTAG213")
        .tag_removed()
        .tag_present("B", "NTAG215")
        .build();
    let channel = MockChannel::with_readers(&[ACR1252]).with_script(script);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let reports = engine
        .run(channel, ReaderScope::Index(0))
        .await
        .expect("capture should succeed");

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.state, SequencerState::Complete);
    assert_eq!(report.reader_id, "acr1252u");
    assert_eq!(report.fixtures.len(), 2);

    let first = read_fixture(&fixture_path(&dir, "acr1252u", "ntag213"));
    assert_eq!(first["uid"], "A");
    assert_eq!(first["tag_type"], "NTAG213");
    assert_eq!(first["reader"], ACR1252);
    assert_eq!(first["responses"], serde_json::json!({ "read": "0102" }));

    let second = read_fixture(&fixture_path(&dir, "acr1252u", "ntag215"));
    assert_eq!(second["uid"], "B");
    assert_eq!(second["responses"], serde_json::json!({}));

    assert_eq!(
        agent.sent_kinds(),
        vec!["list_readers", "subscribe", "unsubscribe"]
    );
    assert_eq!(agent.close_calls(), 1);
}

/// Every profile gets exactly one fixture when each tag is presented once
#[tokio::test]
async fn test_n_profiles_produce_n_fixtures() {
    let dir = tempdir().unwrap();
    let profiles: Vec<TagProfile> = (0..5)
        .map(|i| TagProfile::new(format!("TAG{i}"), format!("tag{i}")))
        .collect();
    let config = test_config(dir.path(), profiles);

    let mut script = MockScriptBuilder::new();
    for i in 0..5 {
        script = script.tag_present(&format!("UID{i}"), &format!("TAG{i}"));
    }
    let channel = MockChannel::with_readers(&["Generic Reader"]).with_script(script.build());

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    assert!(reports[0].is_complete());
    assert_eq!(reports[0].fixtures.len(), 5);
    for i in 0..5 {
        let fixture = read_fixture(&fixture_path(&dir, "generic_reader", &format!("tag{i}")));
        assert_eq!(fixture["uid"], format!("UID{i}"));
    }
}

/// A repeated uid without removal must not fill the next profile
#[tokio::test]
async fn test_duplicate_detection_is_debounced() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), ntag_profiles());
    config.max_wait = Some(Duration::from_millis(200));

    let script = MockScriptBuilder::new()
        .tag_present("A", "NTAG213")
        .tag_present("A", "NTAG213")
        .build();
    let channel = MockChannel::with_readers(&[ACR1252]).with_script(script);

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    let report = &reports[0];
    assert_eq!(report.state, SequencerState::Cancelled(CancelReason::TimedOut));
    assert_eq!(report.fixtures.len(), 1);
    assert!(fixture_path(&dir, "acr1252u", "ntag213").exists());
    assert!(!fixture_path(&dir, "acr1252u", "ntag215").exists());
}

#[tokio::test]
async fn test_string_encoded_events_are_decoded() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), vec![TagProfile::new("NTAG216", "ntag216")]);

    let script = MockScriptBuilder::new()
        .tag_present_encoded("04C0FFEE", "NTAG216")
        .build();
    let channel = MockChannel::with_readers(&[ACR1252])
        .with_reply(
            "list_readers",
            MockReply::StringEncoded(serde_json::json!([{ "name": ACR1252 }])),
        )
        .with_script(script);

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    assert!(reports[0].is_complete());
    let fixture = read_fixture(&fixture_path(&dir, "acr1252u", "ntag216"));
    assert_eq!(fixture["uid"], "04C0FFEE");
    assert_eq!(fixture["detected_size"], 144);
}

#[tokio::test]
async fn test_empty_reader_list_fails_before_subscribe() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let channel = MockChannel::with_readers(&[]);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let result = engine.run(channel, ReaderScope::Index(0)).await;

    assert!(matches!(result, Err(CaptureError::NoReader)));
    assert_eq!(agent.sent_kinds(), vec!["list_readers"]);
    assert_eq!(agent.close_calls(), 1);
}

#[tokio::test]
async fn test_reader_index_out_of_range() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let channel = MockChannel::with_readers(&[ACR1252]);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let result = engine.run(channel, ReaderScope::Index(3)).await;

    assert!(matches!(
        result,
        Err(CaptureError::ReaderIndexOutOfRange { index: 3, count: 1 })
    ));
    assert!(!agent.sent_kinds().contains(&"subscribe".to_string()));
    assert_eq!(agent.close_calls(), 1);
}

#[tokio::test]
async fn test_agent_error_on_subscribe() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let channel = MockChannel::with_readers(&[ACR1252])
        .with_reply("subscribe", MockReply::Error("reader busy".to_string()));
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let err = engine
        .run(channel, ReaderScope::Index(0))
        .await
        .unwrap_err();

    match err {
        CaptureError::Agent { request, message } => {
            assert_eq!(request, "subscribe");
            assert_eq!(message, "reader busy");
        }
        other => panic!("Expected Agent error, got {:?}", other),
    }
    assert_eq!(agent.close_calls(), 1);
}

#[tokio::test]
async fn test_cancellation_stops_run_and_unsubscribes() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let channel = MockChannel::with_readers(&[ACR1252]);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    engine.cancellation_token().cancel();
    let reports = engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    assert_eq!(
        reports[0].state,
        SequencerState::Cancelled(CancelReason::Requested)
    );
    assert!(reports[0].fixtures.is_empty());
    assert_eq!(
        agent.sent_kinds(),
        vec!["list_readers", "subscribe", "unsubscribe"]
    );
    assert_eq!(agent.close_calls(), 1);
}

#[tokio::test]
async fn test_peer_hangup_surfaces_channel_closed() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let script = MockScriptBuilder::new()
        .tag_present("A", "NTAG213")
        .close()
        .build();
    let channel = MockChannel::with_readers(&[ACR1252]).with_script(script);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let result = engine.run(channel, ReaderScope::Index(0)).await;

    assert!(matches!(
        result,
        Err(CaptureError::Channel(ChannelError::ChannelClosed))
    ));
    // the first tag was saved before the hangup
    assert!(fixture_path(&dir, "acr1252u", "ntag213").exists());
    assert_eq!(agent.close_calls(), 1);
}

/// ISO 15693 profiles are skipped on readers that cannot read them
#[tokio::test]
async fn test_all_readers_share_one_session() {
    let dir = tempdir().unwrap();
    let profiles = vec![
        TagProfile::new("NTAG213", "ntag213"),
        TagProfile::new("ICode Slix2", "icode_slix2").iso15693(),
    ];
    let config = test_config(dir.path(), profiles);

    let script = MockScriptBuilder::new()
        .tag_present_on(0, "A", "NTAG213")
        .tag_present_on(1, "B", "NTAG213")
        .tag_removed_on(1)
        .tag_present_on(1, "C", "ICODE SLIX2")
        .build();
    let channel = MockChannel::with_readers(&["ACS ACR122U PICC Interface", "ACS ACR1552 1U"])
        .with_script(script);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::All).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].reader_id, "acr122u");
    assert_eq!(reports[0].profiles.len(), 1);
    assert_eq!(reports[1].reader_id, "acr1552u");
    assert_eq!(reports[1].profiles.len(), 2);
    assert!(reports.iter().all(|r| r.is_complete()));

    assert!(fixture_path(&dir, "acr122u", "ntag213").exists());
    assert!(!fixture_path(&dir, "acr122u", "icode_slix2").exists());
    assert_eq!(
        read_fixture(&fixture_path(&dir, "acr1552u", "icode_slix2"))["uid"],
        "C"
    );

    assert_eq!(
        agent.sent_kinds(),
        vec![
            "list_readers",
            "subscribe",
            "unsubscribe",
            "subscribe",
            "unsubscribe"
        ]
    );
    let second_subscribe = &agent.sent()[3];
    assert_eq!(second_subscribe.payload.as_ref().unwrap()["readerIndex"], 1);
    assert_eq!(agent.close_calls(), 1);
}

#[tokio::test]
async fn test_with_commands_keeps_command_hex() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), vec![TagProfile::new("NTAG213", "ntag213")]);
    config.response_format = tagcap::capture::ResponseFormat::WithCommand;
    let log_path = config.capture_log.clone();

    let script = MockScriptBuilder::new()
        .run(move || {
            append_line(&log_path, "t0 | GET_UID | cmd=FFCA000000 | rsp=04A2B3C49000");
            append_line(&log_path, "t1 | truncated");
        })
        .tag_present("04A2B3C4", "NTAG213")
        .build();
    let channel = MockChannel::with_readers(&[ACR1252]).with_script(script);

    let mut engine = automatic_engine(config);
    engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    let fixture = read_fixture(&fixture_path(&dir, "acr1252u", "ntag213"));
    assert_eq!(
        fixture["responses"],
        serde_json::json!({ "get_uid": { "cmd": "FFCA000000", "rsp": "04A2B3C49000" } })
    );
}

/// Refusing a mismatched tag keeps the profile pending
#[tokio::test]
async fn test_interactive_mismatch_refusal_waits_for_right_tag() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), vec![TagProfile::new("NTAG213", "ntag213")]);

    let script = MockScriptBuilder::new()
        .tag_present("WRONG", "MIFARE Classic")
        .tag_removed()
        .tag_present("RIGHT", "NTAG213")
        .build();
    let channel = MockChannel::with_readers(&[ACR1252]).with_script(script);

    let input: &'static [u8] = b"\nn\n";
    let operator = InteractiveOperator::new(input, Vec::new(), Duration::from_secs(30));
    let mut engine = CaptureEngine::new(config, Box::new(operator));
    let reports = engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    assert!(reports[0].is_complete());
    let fixture = read_fixture(&fixture_path(&dir, "acr1252u", "ntag213"));
    assert_eq!(fixture["uid"], "RIGHT");
}

#[tokio::test]
async fn test_interactive_declined_retry_cancels() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let channel = MockChannel::with_readers(&[ACR1252]);

    let input: &'static [u8] = b"\nn\n";
    let operator = InteractiveOperator::new(input, Vec::new(), Duration::from_millis(30));
    let mut engine = CaptureEngine::new(config, Box::new(operator));
    let reports = engine.run(channel, ReaderScope::Index(0)).await.unwrap();

    assert_eq!(
        reports[0].state,
        SequencerState::Cancelled(CancelReason::OperatorDeclined)
    );
    assert!(reports[0].fixtures.is_empty());
}

/// Events emitted for reader 0 while its unsubscribe is in flight must not
/// become reader 1's fixtures
#[tokio::test]
async fn test_previous_reader_events_do_not_leak_into_next_reader() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), vec![TagProfile::new("NTAG213", "ntag213")]);

    let untagged = Envelope::event(
        "card_detected",
        Some(json!({ "card": { "uid": "UNTAGGED", "type": "NTAG213" } })),
    );
    let script = MockScriptBuilder::new()
        .tag_present_on(0, "A", "NTAG213")
        .tag_present_on(1, "B", "NTAG213")
        .build();
    let channel = MockChannel::with_readers(&[ACR122U, ACR1552])
        .with_events_before_reply(
            "unsubscribe",
            vec![
                card_removed_on(0),
                card_detected_on(0, "READER0_TAG", "NTAG213"),
                untagged,
            ],
        )
        .with_script(script);

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::All).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_complete()));
    assert_eq!(
        read_fixture(&fixture_path(&dir, "acr122u", "ntag213"))["uid"],
        "A"
    );
    assert_eq!(
        read_fixture(&fixture_path(&dir, "acr1552u", "ntag213"))["uid"],
        "B"
    );
}

/// A reader whose unsubscribe never gets an answer still hands over cleanly
#[tokio::test]
async fn test_all_readers_survive_unanswered_unsubscribe() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), vec![TagProfile::new("NTAG213", "ntag213")]);

    let script = MockScriptBuilder::new()
        .tag_present_on(0, "A", "NTAG213")
        // drained while reader 0's unsubscribe waits for a reply
        .tag_removed_on(0)
        .tag_present_on(0, "READER0_TAG", "NTAG213")
        .idle()
        // still arriving after reader 1 subscribed
        .tag_present_on(0, "READER0_LATE", "NTAG213")
        .tag_present_on(1, "B", "NTAG213")
        .build();
    let channel = MockChannel::with_readers(&[ACR122U, ACR1552])
        .with_reply("unsubscribe", MockReply::Silent)
        .with_script(script);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::All).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.is_complete()));
    assert_eq!(
        read_fixture(&fixture_path(&dir, "acr1552u", "ntag213"))["uid"],
        "B"
    );
    assert_eq!(
        agent.sent_kinds(),
        vec![
            "list_readers",
            "subscribe",
            "unsubscribe",
            "subscribe",
            "unsubscribe"
        ]
    );
    assert_eq!(agent.close_calls(), 1);
}

/// A failed write surfaces as an error and never counts as a capture
#[tokio::test]
async fn test_fixture_write_failure_is_reported() {
    let dir = tempdir().unwrap();
    let blocked_root = dir.path().join("testdata");
    fs::write(&blocked_root, "not a directory").unwrap();

    let mut config = test_config(dir.path(), ntag_profiles());
    config.testdata_root = blocked_root.clone();

    let script = MockScriptBuilder::new()
        .tag_present("A", "NTAG213")
        .tag_removed()
        .tag_present("B", "NTAG215")
        .build();
    let channel = MockChannel::with_readers(&[ACR1252]).with_script(script);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let result = engine.run(channel, ReaderScope::Index(0)).await;

    match result {
        Err(CaptureError::Io { path, .. }) => assert!(path.starts_with(&blocked_root)),
        other => panic!("Expected Io error, got {:?}", other),
    }
    assert!(blocked_root.is_file());
    assert_eq!(
        agent.sent_kinds(),
        vec!["list_readers", "subscribe", "unsubscribe"]
    );
    assert_eq!(agent.close_calls(), 1);
}

/// Cancelling while the operator is being prompted ends the run
#[tokio::test]
async fn test_cancel_during_interactive_prompt() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), ntag_profiles());
    let channel = MockChannel::with_readers(&[ACR1252]);
    let agent = channel.clone();

    // nobody ever types into this input
    let (_keyboard, input) = duplex(64);
    let cancel = CancellationToken::new();
    let operator =
        InteractiveOperator::new(BufReader::new(input), Vec::new(), Duration::from_secs(30))
            .with_cancellation(cancel.clone());
    let mut engine =
        CaptureEngine::new(config, Box::new(operator)).with_cancellation(cancel.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let reports = tokio::time::timeout(
        Duration::from_secs(5),
        engine.run(channel, ReaderScope::Index(0)),
    )
    .await
    .expect("run should stop once cancelled")
    .unwrap();

    assert_eq!(
        reports[0].state,
        SequencerState::Cancelled(CancelReason::Requested)
    );
    assert_eq!(agent.close_calls(), 1);
}

/// The time budget covers the whole run, not each reader
#[tokio::test]
async fn test_time_budget_spans_all_readers() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path(), vec![TagProfile::new("NTAG213", "ntag213")]);
    config.max_wait = Some(Duration::from_millis(150));

    let channel = MockChannel::with_readers(&[ACR122U, ACR1552]);
    let agent = channel.clone();

    let mut engine = automatic_engine(config);
    let reports = engine.run(channel, ReaderScope::All).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].state,
        SequencerState::Cancelled(CancelReason::TimedOut)
    );
    assert_eq!(
        agent.sent_kinds(),
        vec!["list_readers", "subscribe", "unsubscribe"]
    );
}
