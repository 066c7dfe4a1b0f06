// Test-only harness for replication integration tests.
//
// Wraps a real synchronization server (started on OS-assigned ports) and a
// raw line-protocol client for driving it the way an operator console or a
// display client would. All networking uses the same code paths as the real
// binaries; the only test-specific code is the blocking helpers and the
// canned competition fixture.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use merccc_core::{ScoringConfig, TeamEntry};
use merccc_protocol::framing::{DONE, read_line, write_line};
use merccc_sync::{ServerConfig, ServerHandle, SyncContext, start_server};

/// Default timeout for blocking reads.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling timeout for phase waits.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The fixture scoring config shared by all scenarios:
/// total = gates * 10 - penalties * 5 + bonus, higher is better,
/// classification requires the QUALIFIED annotation.
pub const SAMPLE_CONFIG: &str = r#"{
  "fields": [
    {"key": "gates", "default": 0},
    {"key": "penalties", "default": 0},
    {"key": "bonus", "default": 0}
  ],
  "formula": ["gates", "10", "*", "penalties", "5", "*", "-", "bonus", "+"],
  "sort_descending": true,
  "classification": ["QUALIFIED"]
}"#;

pub fn sample_config() -> ScoringConfig {
    ScoringConfig::from_raw(SAMPLE_CONFIG.to_string(), "fixture").expect("fixture config")
}

pub fn sample_roster() -> Vec<TeamEntry> {
    vec![
        TeamEntry {
            number: 7,
            name: "Alpha".into(),
            institution: "North".into(),
            logo: "logos/7.png".into(),
        },
        TeamEntry {
            number: 12,
            name: "Beta".into(),
            institution: "South".into(),
            logo: "logos/12.png".into(),
        },
        TeamEntry {
            number: 3,
            name: "Gamma".into(),
            institution: "East".into(),
            logo: "".into(),
        },
    ]
}

/// Start a real server on OS-assigned ports. Returns the handle, the public
/// and privileged addresses, and the shared context for direct state checks.
pub fn start_test_server(
    resources: Option<PathBuf>,
    data: Option<PathBuf>,
) -> (ServerHandle, SocketAddr, SocketAddr, Arc<SyncContext>) {
    let ctx = Arc::new(SyncContext::new(
        sample_config(),
        sample_roster(),
        resources,
        data,
    ));
    let (handle, public, local) = start_server(
        ServerConfig {
            port: 0,
            local_port: 0,
        },
        ctx.clone(),
    )
    .expect("start_test_server failed");
    (handle, public, local, ctx)
}

/// A raw line-protocol client, as an operator console or display would use.
pub struct LineClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    pub greeting: String,
}

impl LineClient {
    /// Connect and read the greeting, leaving prompting enabled.
    pub fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect failed");
        stream.set_read_timeout(Some(READ_TIMEOUT)).expect("set timeout");
        let writer = stream.try_clone().expect("clone stream");
        let mut reader = BufReader::new(stream);
        let greeting = read_line(&mut reader)
            .expect("read greeting")
            .expect("greeting line");
        Self {
            reader,
            writer,
            greeting,
        }
    }

    /// Connect and disable prompts, the way the replica does.
    pub fn connect(addr: SocketAddr) -> Self {
        let mut client = Self::connect_raw(addr);
        client.send("noprompt");
        client.expect_line("OK");
        client
    }

    pub fn send(&mut self, line: &str) {
        write_line(&mut self.writer, line).expect("send failed");
    }

    pub fn recv(&mut self) -> String {
        read_line(&mut self.reader)
            .expect("recv failed")
            .expect("connection closed")
    }

    pub fn expect_line(&mut self, expected: &str) {
        let got = self.recv();
        assert_eq!(got, expected);
    }

    /// Send a command expected to succeed with a bare `OK`.
    pub fn ok(&mut self, line: &str) {
        self.send(line);
        self.expect_line("OK");
    }

    /// Collect a multi-row reply up to its `DONE` terminator.
    pub fn recv_until_done(&mut self) -> Vec<String> {
        let mut rows = Vec::new();
        loop {
            let line = self.recv();
            if line == DONE {
                return rows;
            }
            rows.push(line);
        }
    }

    /// Poll `state` until the phase code matches.
    pub fn wait_for_phase(&mut self, code: u8) {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < WAIT_TIMEOUT,
                "timed out waiting for phase {code}"
            );
            self.send("state");
            let state = self.recv();
            let phase = state
                .split_whitespace()
                .nth(1)
                .expect("STATE line carries a phase code")
                .to_string();
            if phase == code.to_string() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}
