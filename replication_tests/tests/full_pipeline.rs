// End-to-end integration tests for the replication pipeline.
//
// Each test starts a real synchronization server on OS-assigned ports and
// drives it over real TCP: operator commands on the privileged loopback
// listener, monitors and replicas on the public one. These exercise the same
// code paths as the live binaries; the only test-specific code is the
// blocking helpers in the harness crate.

use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use merccc_protocol::Event;
use merccc_sync::{ConfigSource, Replica, ReplicaError, SERVER_VERSION, SyncContext};
use replication_tests::{LineClient, SAMPLE_CONFIG, sample_config, start_test_server};

use merccc_core::ScoringConfig;

/// Monitor subscriptions from a background replica land asynchronously;
/// broadcasts reach only registered subscribers, so mutations that must be
/// observed wait for the registration first.
fn wait_for_subscribers(ctx: &SyncContext, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.subscriber_count() != count {
        assert!(
            Instant::now() < deadline,
            "monitor subscription did not settle"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

// ---------------------------------------------------------------------------
// Connection basics
// ---------------------------------------------------------------------------

#[test]
fn greetings_reflect_the_listener_tier() {
    let (handle, public, local, _ctx) = start_test_server(None, None);

    let viewer = LineClient::connect_raw(public);
    assert_eq!(viewer.greeting, format!("merccc-{SERVER_VERSION}"));

    let operator = LineClient::connect_raw(local);
    assert_eq!(operator.greeting, format!("merccc-{SERVER_VERSION} local"));

    handle.stop();
}

#[test]
fn privileged_commands_rejected_on_public_listener_with_bare_error() {
    let (handle, public, _local, _ctx) = start_test_server(None, None);
    let mut viewer = LineClient::connect(public);

    viewer.send("commit-score");
    viewer.expect_line("ERROR");

    // The connection stays usable and queries still work.
    viewer.send("teams");
    let rows = viewer.recv_until_done();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("TEAM 7, Alpha, North"));

    handle.stop();
}

#[test]
fn malformed_commands_answer_detailed_error_and_keep_the_connection() {
    let (handle, _public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);

    operator.send("launch-rocket");
    let reply = operator.recv();
    assert!(reply.starts_with("ERROR "), "got '{reply}'");
    assert!(reply.contains("unknown command"));

    operator.send("start-scoring-session 7");
    let reply = operator.recv();
    assert!(reply.starts_with("ERROR "), "got '{reply}'");

    operator.send("state");
    assert_eq!(operator.recv(), "STATE 0");

    handle.stop();
}

#[test]
fn prompt_follows_every_command_reply_until_disabled() {
    let (handle, public, _local, _ctx) = start_test_server(None, None);
    let mut viewer = LineClient::connect_raw(public);

    viewer.send("state");
    assert_eq!(viewer.recv(), "STATE 0");
    // The prompt is written with no newline, so it prefixes the next reply.
    viewer.send("state");
    assert_eq!(viewer.recv(), "> STATE 0");

    viewer.send("noprompt");
    assert_eq!(viewer.recv(), "> OK");
    viewer.send("state");
    assert_eq!(viewer.recv(), "STATE 0");

    handle.stop();
}

#[test]
fn hash_query_replies_the_tagged_fingerprint() {
    let (handle, public, _local, _ctx) = start_test_server(None, None);
    let mut viewer = LineClient::connect(public);

    viewer.send("hash");
    assert_eq!(
        viewer.recv(),
        format!("HASH {}", sample_config().fingerprint())
    );

    handle.stop();
}

// ---------------------------------------------------------------------------
// Scoring pipeline and monitor fan-out
// ---------------------------------------------------------------------------

#[test]
fn scoring_session_fans_out_identical_event_streams() {
    let (handle, public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);

    let mut monitors: Vec<LineClient> = (0..3)
        .map(|_| {
            let mut monitor = LineClient::connect(public);
            monitor.send("monitor");
            monitor.expect_line("MONITOR");
            monitor
        })
        .collect();

    // Zero setup time: the timer flips Setup -> Run on its first tick.
    operator.ok("start-scoring-session 7 3 0 30000");
    operator.wait_for_phase(2);
    operator.ok("set-score gates 3");
    operator.ok("commit-score");
    operator.ok("stop-scoring-session");
    operator.wait_for_phase(3);
    operator.ok("end-scoring-session");

    let expected = [
        "STATE_CHANGE_SETUP 7 3 0 30",
        "STATE_CHANGE_RUN",
        "SCORE_CHANGE gates 0 3",
        "SESSION_ATTEMPT_COMMITTED 7 1 30",
        "STATE_CHANGE_POSTRUN",
        "STATE_CHANGE_IDLE",
    ];
    for monitor in &mut monitors {
        for line in expected {
            assert_eq!(monitor.recv(), line);
        }
    }

    // The committed score shows up in the snapshot queries.
    operator.send("data");
    let rows = operator.recv_until_done();
    assert_eq!(rows, vec!["DATA 7, Alpha, 0, 3, 0, 0, 30"]);

    handle.stop();
}

#[test]
fn skip_setup_starts_the_run_window_early() {
    let (handle, public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);
    let mut monitor = LineClient::connect(public);
    monitor.send("monitor");
    monitor.expect_line("MONITOR");

    // A long setup window the operator cuts short.
    operator.ok("start-scoring-session 7 3 10000 30000");
    operator.ok("skip-setup");
    operator.ok("set-score gates 1");
    operator.ok("set-score bonus 2.5");
    operator.ok("commit-score");

    assert_eq!(monitor.recv(), "STATE_CHANGE_SETUP 7 3 10 30");
    assert_eq!(monitor.recv(), "STATE_CHANGE_RUN");
    assert_eq!(monitor.recv(), "SCORE_CHANGE gates 0 1");
    assert_eq!(monitor.recv(), "SCORE_CHANGE bonus 2 2.5");
    assert_eq!(monitor.recv(), "SESSION_ATTEMPT_COMMITTED 7 1 12.5");

    handle.stop();
}

#[test]
fn timer_drives_setup_expiry_and_window_expiry() {
    let (handle, public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);
    let mut monitor = LineClient::connect(public);
    monitor.send("monitor");
    monitor.expect_line("MONITOR");

    operator.ok("start-scoring-session 12 3 200 200");

    let start = Instant::now();
    assert_eq!(monitor.recv(), "STATE_CHANGE_SETUP 12 3 0 0");
    assert_eq!(monitor.recv(), "STATE_CHANGE_RUN");
    assert_eq!(monitor.recv(), "STATE_CHANGE_POSTRUN");
    // Both transitions were time-driven; nothing else was commanded.
    assert!(start.elapsed() >= Duration::from_millis(300));

    operator.ok("end-scoring-session");
    assert_eq!(monitor.recv(), "STATE_CHANGE_IDLE");

    handle.stop();
}

#[test]
fn a_session_started_at_postrun_still_gets_a_timer() {
    let (handle, _public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);

    // Restarting the moment POST_RUN is observed lands the new session inside
    // the previous timer thread's shutdown; every one must still be driven
    // through its window. wait_for_phase panics if a session stalls in Setup.
    operator.ok("start-scoring-session 7 1 0 100");
    for _ in 0..10 {
        operator.wait_for_phase(3);
        operator.ok("start-scoring-session 12 1 0 100");
    }
    operator.wait_for_phase(3);
    operator.ok("end-scoring-session");

    handle.stop();
}

#[test]
fn monitor_mode_honours_only_break() {
    let (handle, public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);
    let mut monitor = LineClient::connect(public);
    monitor.send("monitor");
    monitor.expect_line("MONITOR");

    // Commands other than break are ignored; the next line the monitor sees
    // is the broadcast event, not a teams reply.
    monitor.send("teams");
    operator.ok("preselect-team 7");
    assert_eq!(monitor.recv(), "TEAM_PRE_SELECT 7");

    monitor.send("break");
    monitor.expect_line("COMMAND");
    monitor.send("teams");
    assert_eq!(monitor.recv_until_done().len(), 3);

    // Unsubscribed: further events no longer reach this connection.
    operator.ok("preselect-team 12");
    monitor.send("state");
    assert_eq!(monitor.recv(), "STATE 0");

    handle.stop();
}

#[test]
fn classification_ranks_qualified_teams_first() {
    let (handle, _public, local, _ctx) = start_test_server(None, None);
    let mut operator = LineClient::connect(local);

    operator.ok("add-record 7 3 0 0");
    operator.ok("add-record 12 5 0 0");
    operator.ok("add-team-annotation 7 QUALIFIED");
    operator.ok("set-tiebreaker 3 5");

    operator.send("classification");
    let rows = operator.recv_until_done();
    assert_eq!(
        rows,
        vec![
            "CLASSIFICATION 1, 7, Alpha, North, 30",
            "CLASSIFICATION 2, 12, Beta, South, DNF(50)",
            "CLASSIFICATION 3, 3, Gamma, East, DNF(5)",
        ]
    );

    handle.stop();
}

// ---------------------------------------------------------------------------
// Replica
// ---------------------------------------------------------------------------

#[test]
fn replica_seeds_snapshot_and_mirrors_live_events() {
    let data_file = tempfile::NamedTempFile::new().unwrap();
    fs::write(data_file.path(), "DATA 12, Beta, 0, 2, 0, 0, 20\n").unwrap();
    let (handle, public, local, ctx) =
        start_test_server(None, Some(data_file.path().to_path_buf()));
    let mut operator = LineClient::connect(local);

    // Pre-existing data the snapshot must carry.
    operator.ok("add-record 7 1 0 0");
    operator.ok("add-team-annotation 7 QUALIFIED");

    let replica = Replica::connect(
        &public.to_string(),
        ConfigSource::Local(sample_config()),
        None,
    )
    .expect("replica connect");
    let mirrored = replica.competition();
    {
        let comp = mirrored.read().unwrap();
        let server = ctx.competition().read().unwrap();
        assert_eq!(
            comp.data_lines()
                .iter()
                .map(|l| l.to_line())
                .collect::<Vec<_>>(),
            server
                .data_lines()
                .iter()
                .map(|l| l.to_line())
                .collect::<Vec<_>>()
        );
    }

    let (tap, events) = mpsc::channel::<Event>();
    thread::spawn(move || {
        // Ends with Disconnected when the server goes away.
        let _ = replica.run(Some(tap));
    });
    wait_for_subscribers(&ctx, 1);

    // A live mutation arrives through the event stream.
    operator.ok("add-record 3 1 1 2");
    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.to_line(), "DATA_ADDED 3 1 1 2 7");

    // Bulk import: the replica breaks, re-pulls data, and re-monitors.
    operator.ok("import-data");
    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event, Event::DataImported);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mirrored_rows: Vec<String> = mirrored
            .read()
            .unwrap()
            .data_lines()
            .iter()
            .map(|l| l.to_line())
            .collect();
        if mirrored_rows == vec!["DATA 12, Beta, 0, 2, 0, 0, 20".to_string()] {
            break;
        }
        assert!(Instant::now() < deadline, "replica did not resync");
        thread::sleep(Duration::from_millis(20));
    }

    // Still mirroring after the resync.
    wait_for_subscribers(&ctx, 1);
    operator.ok("preselect-team 7");
    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.to_line(), "TEAM_PRE_SELECT 7");

    handle.stop();
}

#[test]
fn fingerprint_mismatch_is_fatal_before_any_state_is_fetched() {
    let (handle, public, _local, _ctx) = start_test_server(None, None);

    let other = ScoringConfig::from_raw(
        SAMPLE_CONFIG.replace("QUALIFIED", "ELIGIBLE"),
        "fixture-variant",
    )
    .unwrap();
    let result = Replica::connect(&public.to_string(), ConfigSource::Local(other), None);
    assert!(matches!(
        result,
        Err(ReplicaError::FingerprintMismatch { .. })
    ));

    handle.stop();
}

#[test]
fn replica_can_adopt_the_server_config() {
    let (handle, public, _local, _ctx) = start_test_server(None, None);

    let replica = Replica::connect(&public.to_string(), ConfigSource::FetchRemote, None)
        .expect("replica connect");
    assert_eq!(replica.config().fingerprint(), sample_config().fingerprint());
    assert_eq!(replica.config().fields().len(), 3);

    handle.stop();
}

#[test]
fn resource_bundle_travels_inside_the_connection() {
    let resources = tempfile::tempdir().unwrap();
    fs::create_dir_all(resources.path().join("logos")).unwrap();
    fs::write(resources.path().join("theme.json"), b"{\"accent\": \"red\"}").unwrap();
    fs::write(resources.path().join("logos/7.png"), vec![0x7A; 30_000]).unwrap();
    let (handle, public, _local, _ctx) =
        start_test_server(Some(resources.path().to_path_buf()), None);

    let dest = tempfile::tempdir().unwrap();
    let replica = Replica::connect(
        &public.to_string(),
        ConfigSource::Local(sample_config()),
        Some(dest.path()),
    )
    .expect("replica connect");

    assert_eq!(
        fs::read(dest.path().join("theme.json")).unwrap(),
        fs::read(resources.path().join("theme.json")).unwrap()
    );
    assert_eq!(fs::read(dest.path().join("logos/7.png")).unwrap().len(), 30_000);

    // The connection returned to line framing: the snapshot pull worked.
    assert_eq!(replica.competition().read().unwrap().teams().len(), 3);

    handle.stop();
}
