// merccc_sync: live-score synchronization over TCP.
//
// The runtime half of merccc: the synchronization server (two listeners,
// per-connection handler and writer threads, MONITOR fan-out), the 50 ms
// session timer, the bulk resource transfer, and the replica client that
// mirrors a running competition. The `merccc-server` and `merccc-replica`
// binaries live under `src/bin/`.
//
// Module overview:
// - `context.rs`:  `SyncContext`, the explicitly shared server state:
//                  competition lock, subscriber registry, resource root,
//                  timer slot.
// - `server.rs`:   Listeners, accept loops, connection handling, command
//                  dispatch.
// - `timer.rs`:    The session timer task; sole producer of time-driven
//                  phase transitions.
// - `transfer.rs`: The NUL-headed bulk file transfer with carry-over byte
//                  accounting.
// - `client.rs`:   `Replica`: snapshot seeding plus the MONITOR apply loop.
//
// Design decisions:
// - Blocking std networking, thread per connection. The protocol is chatty
//   but low-volume; an async runtime would buy nothing here.
// - One writer thread per socket. Command replies and broadcast events share
//   an `mpsc` outbox, so interleaving is decided by channel order and no two
//   threads ever write the same stream.

pub mod client;
pub mod context;
pub mod server;
pub mod timer;
pub mod transfer;

pub use client::{ConfigSource, Replica, ReplicaError};
pub use context::{ConnId, OutMsg, SyncContext};
pub use server::{SERVER_VERSION, ServerConfig, ServerHandle, start_server};
pub use transfer::{TransferError, TransferSummary};
