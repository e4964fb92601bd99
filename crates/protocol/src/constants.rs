use std::time::Duration;

/// Maximum WebSocket message size in bytes (16 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Size of the binary frames a retrieve is streamed in (64 KB).
pub const WS_CHUNK_SIZE: usize = 64 * 1024;

/// Time a peer has to send its authorization message.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Read deadline during a transfer.
///
/// An upload that receives nothing for this long, or a download frame the
/// peer does not accept within it, ends the session.
pub const TRANSFER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the client waits for the server's verdict once its upload
/// source is exhausted. Longer than [`TRANSFER_IDLE_TIMEOUT`] so a short
/// upload still hears the server's own timeout.
pub const CLOSE_WAIT: Duration = Duration::from_secs(90);

/// Timeout for the client's connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the server keeps draining after sending a close frame, so the
/// frame is not lost to a reset while unread bytes are still in flight.
pub const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Close reason for a completed upload.
pub const CONSIGN_COMPLETE: &str = "Consignment completed";

/// Close reason for a completed download.
pub const RETRIEVE_COMPLETE: &str = "File transfer complete";

/// Maximum close-frame reason length allowed by RFC 6455.
pub const MAX_CLOSE_REASON: usize = 123;
