//! Investigation tests against the real assistant CLI.
//!
//! These verify assumptions about the installed binary's stream format and are
//! excluded from regular CI runs because they need the binary and credentials.
//!
//! Run with: `cargo test --test investigation -- --ignored`

use std::process::Command;
use std::time::Duration;

use relay::core::decode::decode;
use relay::io::config::ClientConfig;
use relay::io::launch::{ProcessLauncher, TurnRequest};
use relay::io::resolver::{PathResolver, ReadinessResolver};
use relay::test_support::RecordingSink;
use relay::turn::TurnController;

/// Budget for a real round trip.
const TURN_TIMEOUT: Duration = Duration::from_secs(120);

#[test]
#[ignore]
fn binary_is_ready() {
    let readiness = PathResolver::new(ClientConfig::default()).resolve();
    assert!(readiness.is_ready(), "not ready: {readiness}");
}

/// Every line of a real stream decodes to a known record kind.
#[test]
#[ignore]
fn real_stream_lines_decode() {
    let output = Command::new("claude")
        .args([
            "-p",
            "Reply with the single word: pong",
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
        ])
        .output()
        .expect("run claude");
    assert!(output.status.success(), "claude failed: {output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut undecoded = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        if let Err(err) = decode(line) {
            undecoded.push(format!("{err}: {line}"));
        }
    }
    assert!(undecoded.is_empty(), "undecodable lines:\n{}", undecoded.join("\n"));
}

/// A turn followed by a resumed turn keeps the conversation.
#[test]
#[ignore]
fn real_turn_then_resume() {
    let config = ClientConfig {
        timeout_secs: TURN_TIMEOUT.as_secs(),
        ..ClientConfig::default()
    };
    let launcher = ProcessLauncher::from_resolver(config.clone(), &PathResolver::new(config.clone()))
        .expect("ready");
    let ctl = TurnController::new(launcher, &config);

    let mut sink = RecordingSink::default();
    let first = ctl
        .run_turn(
            &TurnRequest::new("Remember the number 41. Reply with just: ok"),
            &mut sink,
        )
        .expect("first turn");
    assert!(first.is_success(), "first turn: {:?}", first.status);
    assert!(!sink.appended.is_empty(), "expected streamed deltas");
    let session_id = first.session_id.expect("session id");

    let mut sink = RecordingSink::default();
    let second = ctl
        .run_turn(
            &TurnRequest::new("What number plus one? Reply with digits only.").resume(session_id),
            &mut sink,
        )
        .expect("second turn");
    assert!(second.is_success(), "second turn: {:?}", second.status);
    assert!(second.answer.contains("42"), "answer: {}", second.answer);
}
