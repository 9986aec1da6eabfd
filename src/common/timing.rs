// src/common/timing.rs

use std::time::Duration;

// Nominal values from the SDI-12 specification (1200 baud, 7E1). The spec
// allows +/- 0.40 ms tolerance on most intervals; constants here are the
// nominal figures and call sites add slack where needed.

// === Break / marking (Sec 7.0, 7.1) ===

/// Minimum duration of a valid break (recorder must hold spacing >= 12 ms).
pub const BREAK_DURATION_MIN: Duration = Duration::from_millis(12);
/// Break length actually emitted. Comfortably above the 12 ms minimum.
pub const BREAK_DURATION_DEFAULT: Duration = Duration::from_millis(20);
/// Marking required after a break before the first command byte (8.33 ms).
pub const POST_BREAK_MARKING_MIN: Duration = Duration::from_micros(8330);
/// If the line has been marking longer than this since the last activity,
/// the next command must be preceded by a fresh break. Sits above the 87 ms
/// short-command budget of Sec 7.1.
pub const PRE_COMMAND_BREAK_THRESHOLD: Duration = Duration::from_millis(85);

// === Byte timing at 1200 baud ===
// 1 start bit + 7 data bits + 1 parity bit + 1 stop bit = 10 bits per byte,
// so one byte takes 10 / 1200 s = 8.333 ms on the wire.

/// Nominal duration of a single byte (10 bits) at 1200 baud.
pub const BYTE_DURATION: Duration = Duration::from_micros(8333);

// === Retry budgets (Sec 7.2) ===

/// Command/response attempts inside the transaction engine, without a
/// fresh break between them.
pub const TRANSACTION_RETRIES: u32 = 3;
/// Attempts at the orchestrator level; each failure forces a break before
/// the next transaction, giving nine transmissions worst case.
pub const RETRIES_WITH_BREAK: u32 = 3;

// === Service request polling ===

/// Per-iteration read timeout while waiting for a service request.
pub const SERVICE_REQUEST_POLL: Duration = Duration::from_secs(1);
/// Grace delay before fetching data when no service request arrived;
/// accommodates sensors that never send one.
pub const SERVICE_REQUEST_GRACE: Duration = Duration::from_millis(500);

// === Buffers and locks ===

/// Longest possible SDI-12 response frame: 75 bytes of values plus address,
/// CRC and CR/LF, word aligned.
pub const LONGEST_FRAME: usize = 84;
/// Longest encoded command (`aMC9!` and friends fit with room to spare).
pub const LONGEST_COMMAND: usize = 8;
/// Timeout waiting for an already running transaction to finish.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Wire time for `len` bytes at 1200 baud 7E1.
pub fn transmit_time(len: usize) -> Duration {
    BYTE_DURATION * len as u32
}
