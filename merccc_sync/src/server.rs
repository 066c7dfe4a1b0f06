// TCP synchronization server.
//
// Architecture: two accept loops feeding independent per-connection thread
// pairs.
//
// - **Accept threads** (one per listener): the public listener serves
//   read-only clients; a second, loopback-only listener serves the operator
//   console and accepts the privileged command set. Both run non-blocking
//   accept loops checking a shared `keep_running` flag.
// - **Handler thread** (one per connection): owns the read half, parses one
//   request line at a time, executes it against the shared `Competition`,
//   and queues reply lines.
// - **Writer thread** (one per connection): owns the write half and drains
//   an `mpsc` outbox. Replies and broadcast events go through the same
//   channel, so there is exactly one writer per socket and reply/event
//   interleaving is serialized by channel order.
//
// Broadcasts happen after the competition lock is released; a connection's
// death tears down only its own thread pair (the outbox sender disconnects,
// the subscriber entry is pruned on the next broadcast).
//
// Mode is an explicit two-state enum. In MONITOR mode the handler keeps
// reading but honours only `break`; everything else on the line is ignored.

use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use merccc_core::StateError;
use merccc_protocol::framing::{
    DONE, ERROR, GREETING_PREFIX, OK, PROMPT, read_line, write_cstring, write_line,
};
use merccc_protocol::snapshot::DataLine;
use merccc_protocol::{Event, Request};
use tracing::{debug, info, warn};

use crate::context::{ConnId, OutMsg, SyncContext};
use crate::timer::spawn_session_timer;
use crate::transfer;

/// Version advertised in the greeting line.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Listener configuration. Port 0 lets the OS pick (used by tests).
pub struct ServerConfig {
    /// Public read-only listener port, bound on all interfaces.
    pub port: u16,
    /// Privileged listener port, bound on loopback only.
    pub local_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9977,
            local_port: 9978,
        }
    }
}

/// Handle returned by `start_server`. Stopping joins the accept loops;
/// connection threads end when their peers disconnect.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    accept_threads: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        for handle in self.accept_threads {
            let _ = handle.join();
        }
    }
}

/// Connection privilege tier, fixed by which listener accepted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tier {
    Public,
    Privileged,
}

/// Per-connection protocol mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Command,
    Monitor,
}

/// Bind both listeners and start their accept loops on background threads.
/// Returns the handle and the actual bound addresses (public, privileged).
pub fn start_server(
    config: ServerConfig,
    ctx: Arc<SyncContext>,
) -> io::Result<(ServerHandle, SocketAddr, SocketAddr)> {
    let public = TcpListener::bind(("0.0.0.0", config.port))?;
    let local = TcpListener::bind(("127.0.0.1", config.local_port))?;
    let public_addr = public.local_addr()?;
    let local_addr = local.local_addr()?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let mut accept_threads = Vec::with_capacity(2);
    for (listener, tier) in [(public, Tier::Public), (local, Tier::Privileged)] {
        let ctx = ctx.clone();
        let keep_running = keep_running.clone();
        accept_threads.push(thread::spawn(move || {
            accept_loop(listener, tier, ctx, keep_running);
        }));
    }
    info!(%public_addr, %local_addr, "synchronization server listening");

    Ok((
        ServerHandle {
            keep_running,
            accept_threads,
        },
        public_addr,
        local_addr,
    ))
}

fn accept_loop(
    listener: TcpListener,
    tier: Tier,
    ctx: Arc<SyncContext>,
    keep_running: Arc<AtomicBool>,
) {
    // Non-blocking accept so the loop can check keep_running periodically.
    listener.set_nonblocking(true).ok();
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).ok();
                debug!(%peer, ?tier, "connection accepted");
                let ctx = ctx.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, tier, &ctx) {
                        debug!(%peer, "connection ended: {e}");
                    }
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}

/// Writer loop: sole owner of the socket's write half. Ends when every
/// outbox sender (handler + subscriber registry entry) is gone.
fn writer_loop(mut stream: TcpStream, outbox: Receiver<OutMsg>) {
    for msg in outbox {
        let result = match msg {
            OutMsg::Line(line) => write_line(&mut stream, &line),
            OutMsg::Raw(bytes) => stream.write_all(&bytes).and_then(|()| stream.flush()),
        };
        if result.is_err() {
            break;
        }
    }
}

/// `Write` adapter that feeds the connection's writer thread, used for the
/// bulk sub-protocol so even file bytes go through the single writer.
struct OutboxWriter<'a> {
    outbox: &'a Sender<OutMsg>,
}

impl Write for OutboxWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbox
            .send(OutMsg::Raw(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer thread gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Connection<'a> {
    ctx: &'a Arc<SyncContext>,
    id: ConnId,
    tier: Tier,
    outbox: Sender<OutMsg>,
    mode: Mode,
    prompt: bool,
}

impl Connection<'_> {
    fn send_line(&self, line: impl Into<String>) {
        let _ = self.outbox.send(OutMsg::Line(line.into()));
    }

    fn send_prompt(&self) {
        if self.prompt && self.mode == Mode::Command {
            let _ = self.outbox.send(OutMsg::Raw(PROMPT.as_bytes().to_vec()));
        }
    }
}

fn handle_connection(stream: TcpStream, tier: Tier, ctx: &Arc<SyncContext>) -> io::Result<()> {
    let id = ctx.allocate_conn_id();
    let write_half = stream.try_clone()?;
    let (outbox, outbox_rx) = mpsc::channel::<OutMsg>();
    let writer = thread::spawn(move || writer_loop(write_half, outbox_rx));
    let mut reader = BufReader::new(stream);

    let mut conn = Connection {
        ctx,
        id,
        tier,
        outbox,
        mode: Mode::Command,
        prompt: true,
    };
    let local_suffix = match tier {
        Tier::Privileged => " local",
        Tier::Public => "",
    };
    conn.send_line(format!("{GREETING_PREFIX}{SERVER_VERSION}{local_suffix}"));

    let result = serve(&mut conn, &mut reader);
    ctx.unsubscribe(id);
    drop(conn);
    let _ = writer.join();
    result
}

fn serve(conn: &mut Connection<'_>, reader: &mut BufReader<TcpStream>) -> io::Result<()> {
    while let Some(line) = read_line(reader)? {
        match conn.mode {
            Mode::Monitor => {
                if line == "break" {
                    conn.ctx.unsubscribe(conn.id);
                    conn.mode = Mode::Command;
                    conn.send_line("COMMAND");
                    conn.send_prompt();
                } else {
                    debug!(conn = conn.id, line, "ignored in monitor mode");
                }
            }
            Mode::Command => {
                handle_command_line(conn, reader, &line);
                conn.send_prompt();
            }
        }
    }
    Ok(())
}

fn handle_command_line(
    conn: &mut Connection<'_>,
    reader: &mut BufReader<TcpStream>,
    line: &str,
) {
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => {
            conn.send_line(format!("{ERROR} {e}"));
            return;
        }
    };
    if request.privileged() && conn.tier != Tier::Privileged {
        // Deliberately detail-free on privilege violations.
        conn.send_line(ERROR);
        return;
    }
    execute(conn, reader, request);
}

fn execute(conn: &mut Connection<'_>, reader: &mut BufReader<TcpStream>, request: Request) {
    let ctx = conn.ctx;
    match request {
        // --- queries ------------------------------------------------------
        Request::Teams => {
            let lines = read_competition(ctx, |c| c.team_lines());
            for row in lines {
                conn.send_line(row.to_line());
            }
            conn.send_line(DONE);
        }
        Request::Data => {
            let lines = read_competition(ctx, |c| c.data_lines());
            for row in lines {
                conn.send_line(row.to_line());
            }
            conn.send_line(DONE);
        }
        Request::Classification => {
            let lines = read_competition(ctx, |c| c.classification());
            for row in lines {
                conn.send_line(row.to_line());
            }
            conn.send_line(DONE);
        }
        Request::State => {
            let line = read_competition(ctx, |c| c.state_line());
            conn.send_line(line.to_line());
        }
        Request::Hash => {
            conn.send_line(format!("HASH {}", ctx.config().fingerprint()));
        }
        Request::Fields => {
            for field in ctx.config().fields() {
                conn.send_line(field.key.clone());
            }
            conn.send_line(DONE);
        }
        Request::Config => {
            // The raw config text travels NUL-framed, not line-framed, so it
            // may contain newlines.
            let mut framed = Vec::new();
            let _ = write_cstring(&mut framed, ctx.config().raw());
            let _ = conn.outbox.send(OutMsg::Raw(framed));
        }
        Request::Resources => {
            let root = ctx.resource_root();
            let mut writer = OutboxWriter {
                outbox: &conn.outbox,
            };
            match transfer::send_tree(reader, &mut writer, root.as_deref()) {
                Ok(summary) => {
                    debug!(
                        conn = conn.id,
                        files = summary.files,
                        bytes = summary.bytes,
                        "resource bundle delivered"
                    );
                }
                Err(e) => warn!(conn = conn.id, "resource transfer failed: {e}"),
            }
        }
        Request::Monitor => {
            // The ack is queued under the registry lock, so no broadcast can
            // reach this connection ahead of it.
            ctx.subscribe(conn.id, conn.outbox.clone(), "MONITOR");
            conn.mode = Mode::Monitor;
        }
        Request::Break => {
            // Already in command mode; idempotent.
            conn.send_line("COMMAND");
        }
        Request::NoPrompt => {
            conn.prompt = false;
            conn.send_line(OK);
        }

        // --- privileged mutations ----------------------------------------
        Request::StartSession {
            team,
            max_attempts,
            setup_ms,
            window_ms,
        } => {
            let started = mutate(conn, |c| c.start_session(team, max_attempts, setup_ms, window_ms));
            if started {
                spawn_session_timer(ctx.clone());
            }
        }
        Request::StopSession => {
            mutate(conn, |c| c.stop_session());
        }
        Request::EndSession => {
            mutate(conn, |c| c.end_session());
        }
        Request::SkipSetup => {
            mutate(conn, |c| c.skip_setup());
        }
        Request::CommitScore => {
            mutate(conn, |c| c.commit_score());
        }
        Request::DiscardScore => {
            mutate(conn, |c| c.discard_score());
        }
        Request::SetScore { key, value } => {
            mutate(conn, |c| c.set_score_field(&key, value));
        }
        Request::Pause => {
            mutate(conn, |c| c.pause());
        }
        Request::Resume => {
            mutate(conn, |c| c.resume());
        }
        Request::RedFlag => {
            mutate(conn, |c| c.red_flag());
        }
        Request::GreenFlag => {
            mutate(conn, |c| c.green_flag());
        }
        Request::AddTime { seconds } => {
            mutate(conn, |c| c.add_time(seconds));
        }
        Request::AddAnnotation { team, text } => {
            mutate(conn, |c| c.add_annotation(team, &text));
        }
        Request::RemoveAnnotation { team, text } => {
            mutate(conn, |c| c.remove_annotation(team, &text));
        }
        Request::ClearAnnotations { team } => {
            mutate(conn, |c| c.clear_annotations(team));
        }
        Request::SetTiebreaker { team, value } => {
            mutate(conn, |c| c.set_tiebreaker(team, value));
        }
        Request::AddRecord { team, values } => {
            mutate(conn, |c| c.add_record(team, &values));
        }
        Request::EditRecord { team, index, values } => {
            mutate(conn, |c| c.edit_record(team, index, &values));
        }
        Request::ExpungeRecord { team, index } => {
            mutate(conn, |c| c.expunge_record(team, index));
        }
        Request::ClearData => {
            mutate(conn, |c| c.clear_data());
        }
        Request::ImportData => {
            execute_import(conn);
        }
        Request::PreSelect { team } => {
            mutate(conn, |c| c.preselect(team));
        }
        Request::DisplayMode { mode } => {
            mutate(conn, |c| c.display_mode(mode));
        }
        Request::DisplayRank { rank } => {
            mutate(conn, |c| c.display_rank(rank));
        }
        Request::ResourcePath { path } => {
            ctx.set_resource_root(path.into());
            conn.send_line(OK);
        }
    }
}

/// Re-read the persisted `DATA` rows and replace the recorded scores.
fn execute_import(conn: &mut Connection<'_>) {
    let Some(path) = conn.ctx.data_path().cloned() else {
        conn.send_line(format!("{ERROR} no data file configured"));
        return;
    };
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            conn.send_line(format!("{ERROR} cannot read {}: {e}", path.display()));
            return;
        }
    };
    let mut rows = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match DataLine::parse(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                conn.send_line(format!("{ERROR} {e}"));
                return;
            }
        }
    }
    mutate(conn, |c| c.import_data(&rows));
}

fn read_competition<T>(
    ctx: &SyncContext,
    f: impl FnOnce(&merccc_core::Competition) -> T,
) -> T {
    let competition = ctx
        .competition()
        .read()
        .expect("competition lock poisoned");
    f(&competition)
}

/// Run one mutation under the write lock, broadcast its events after the
/// lock is dropped, and reply `OK` or `ERROR <detail>`. Returns whether the
/// mutation was accepted.
fn mutate(
    conn: &Connection<'_>,
    f: impl FnOnce(&mut merccc_core::Competition) -> Result<Vec<Event>, StateError>,
) -> bool {
    let result = {
        let mut competition = conn
            .ctx
            .competition()
            .write()
            .expect("competition lock poisoned");
        f(&mut competition)
    };
    match result {
        Ok(events) => {
            conn.ctx.broadcast(&events);
            conn.send_line(OK);
            true
        }
        Err(e) => {
            conn.send_line(format!("{ERROR} {e}"));
            false
        }
    }
}
