// src/recorder/transaction.rs

//! The transaction engine: one SDI-12 command/response round trip,
//! including break signalling, marking waits, character-time pacing and
//! the inner retry loop.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::common::error::Sdi12Error;
use crate::common::port::{Direction, Sdi12Port};
use crate::common::timing::{
    self, LONGEST_FRAME, PRE_COMMAND_BREAK_THRESHOLD, POST_BREAK_MARKING_MIN,
    TRANSACTION_RETRIES,
};

/// Protocol dump hook: direction, offset from the dialogue origin, frame.
pub type DumpFn = dyn FnMut(Direction, Duration, &[u8]) + Send;

/// Exclusive owner of the serial line plus the timing state that decides
/// when a break must precede the next command. Exactly one transaction is
/// in flight at any time; the driver serializes access with the bus mutex.
pub(crate) struct Bus<P: Sdi12Port> {
    port: P,
    /// Address byte of the last command sent; a different target needs a
    /// fresh break.
    last_address: Option<u8>,
    /// Last moment the line carried traffic in either direction.
    last_activity: Option<Instant>,
    /// Reference point for dump-hook timestamps, set when the port opens.
    origin: Instant,
    break_len: Duration,
    /// Inter-character timeout the port was opened with; restored after
    /// operations that temporarily change it.
    read_timeout: Duration,
    dump: Option<Box<DumpFn>>,
}

impl<P: Sdi12Port> Bus<P> {
    pub(crate) fn new(port: P, break_len: Duration) -> Self {
        Bus {
            port,
            last_address: None,
            last_activity: None,
            origin: Instant::now(),
            break_len,
            read_timeout: Duration::from_millis(50),
            dump: None,
        }
    }

    pub(crate) fn port(&mut self) -> &mut P {
        &mut self.port
    }

    pub(crate) fn is_open(&self) -> bool {
        self.port.is_open()
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Resets the dialogue state; called when the port is (re)opened or
    /// closed.
    pub(crate) fn reset(&mut self, read_timeout: Duration) {
        self.last_address = None;
        self.last_activity = None;
        self.origin = Instant::now();
        self.read_timeout = read_timeout;
    }

    /// Makes the next transaction start with a break regardless of timing.
    pub(crate) fn force_break(&mut self) {
        self.last_address = None;
    }

    /// Records line activity for the given target address; used when a
    /// service request arrives outside a transaction.
    pub(crate) fn mark_activity(&mut self, address: u8) {
        self.last_address = Some(address);
        self.last_activity = Some(Instant::now());
    }

    pub(crate) fn set_dump(&mut self, hook: Option<Box<DumpFn>>) {
        self.dump = hook;
    }

    fn dump_frame(&mut self, direction: Direction, bytes: &[u8]) {
        if let Some(hook) = self.dump.as_mut() {
            hook(direction, self.origin.elapsed(), bytes);
        }
    }

    /// Executes one command/response round trip.
    ///
    /// `cmd` holds the full command including the trailing `!`. On success
    /// the response frame (terminated by `<CR><LF>` on the wire) is copied
    /// into `out`, truncated to its capacity, and the copied length is
    /// returned. Retries up to [`TRANSACTION_RETRIES`] times without a
    /// fresh break; escalation with a break is the caller's business.
    pub(crate) fn transact(
        &mut self,
        cmd: &[u8],
        out: &mut [u8],
    ) -> Result<usize, Sdi12Error<P::Error>> {
        if cmd.is_empty() || out.is_empty() {
            return Err(Sdi12Error::InvalidFormat);
        }

        // A break wakes all sensors; required when changing targets or when
        // the line has idled past the marking threshold.
        let needs_break = match (self.last_address, self.last_activity) {
            (Some(addr), Some(at)) => {
                addr != cmd[0] || at.elapsed() > PRE_COMMAND_BREAK_THRESHOLD
            }
            _ => true,
        };
        if needs_break {
            trace!("break ({} ms) before {:?}", self.break_len.as_millis(), cmd[0] as char);
            self.port.send_break(self.break_len)?;
            // Sensors need >= 8.33 ms of marking after the break.
            thread::sleep(POST_BREAK_MARKING_MIN);
        }
        self.last_address = Some(cmd[0]);

        self.port.flush_io()?;

        let mut last_error = Sdi12Error::Timeout;
        for attempt in 0..TRANSACTION_RETRIES {
            self.dump_frame(Direction::Tx, cmd);
            self.port.write(cmd)?;
            // The write returns before the line is idle; wait out the
            // transmission so the read below starts at the response.
            thread::sleep(timing::transmit_time(cmd.len()));
            self.last_activity = Some(Instant::now());

            let mut frame = [0u8; LONGEST_FRAME];
            let mut filled = 0;
            loop {
                let n = self.port.read(&mut frame[filled..])?;
                if n == 0 {
                    // Inter-character timeout with no (or a partial) frame.
                    last_error = if filled == 0 {
                        Sdi12Error::Timeout
                    } else {
                        Sdi12Error::InvalidFormat
                    };
                    break;
                }
                filled += n;
                if filled >= 2 && frame[filled - 2..filled] == *b"\r\n" {
                    self.last_activity = Some(Instant::now());
                    self.dump_frame(Direction::Rx, &frame[..filled]);
                    let copied = filled.min(out.len());
                    out[..copied].copy_from_slice(&frame[..copied]);
                    return Ok(copied);
                }
                if filled == frame.len() {
                    last_error = Sdi12Error::InvalidFormat;
                    break;
                }
            }
            if attempt + 1 < TRANSACTION_RETRIES {
                debug!(
                    "no valid frame for {:?}, retry {}/{}",
                    String::from_utf8_lossy(cmd),
                    attempt + 2,
                    TRANSACTION_RETRIES
                );
            }
        }

        warn!(
            "transaction {:?} exhausted {} attempts",
            String::from_utf8_lossy(cmd),
            TRANSACTION_RETRIES
        );
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn open_bus(port: MockPort) -> Bus<MockPort> {
        let mut bus = Bus::new(port, timing::BREAK_DURATION_DEFAULT);
        bus.port()
            .open(&crate::common::frame::LineConfig::default())
            .unwrap();
        bus
    }

    #[test]
    fn round_trip_copies_the_frame() {
        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        let log = port.log();
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        let n = bus.transact(b"0!", &mut out).unwrap();
        assert_eq!(&out[..n], b"0\r\n");

        let log = log.lock();
        assert_eq!(log.writes, vec![b"0!".to_vec()]);
        // Cold bus: exactly one break before the first command.
        assert_eq!(log.breaks.len(), 1);
        assert_eq!(log.breaks[0], timing::BREAK_DURATION_DEFAULT);
    }

    #[test]
    fn no_break_for_same_address_back_to_back() {
        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        port.on("0!", "0\r\n");
        let log = port.log();
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        bus.transact(b"0!", &mut out).unwrap();
        bus.transact(b"0!", &mut out).unwrap();
        assert_eq!(log.lock().breaks.len(), 1);
    }

    #[test]
    fn address_change_emits_a_break() {
        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        port.on("1!", "1\r\n");
        let log = port.log();
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        bus.transact(b"0!", &mut out).unwrap();
        bus.transact(b"1!", &mut out).unwrap();
        assert_eq!(log.lock().breaks.len(), 2);
    }

    #[test]
    fn marking_expiry_emits_a_break() {
        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        port.on("0!", "0\r\n");
        let log = port.log();
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        bus.transact(b"0!", &mut out).unwrap();
        thread::sleep(PRE_COMMAND_BREAK_THRESHOLD + Duration::from_millis(20));
        bus.transact(b"0!", &mut out).unwrap();
        assert_eq!(log.lock().breaks.len(), 2);
    }

    #[test]
    fn force_break_overrides_the_timing_state() {
        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        port.on("0!", "0\r\n");
        let log = port.log();
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        bus.transact(b"0!", &mut out).unwrap();
        bus.force_break();
        bus.transact(b"0!", &mut out).unwrap();
        assert_eq!(log.lock().breaks.len(), 2);
    }

    #[test]
    fn silence_times_out_after_three_attempts() {
        let port = MockPort::new(); // nothing scripted: every read is empty
        let log = port.log();
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        let result = bus.transact(b"3!", &mut out);
        assert!(matches!(result, Err(Sdi12Error::Timeout)));
        assert_eq!(log.lock().writes.len(), TRANSACTION_RETRIES as usize);
    }

    #[test]
    fn chunked_response_is_accumulated() {
        let mut port = MockPort::new();
        port.on_chunks("0I!", &["013COMPANY", "MODEL001SN12345", "\r\n"]);
        let mut bus = open_bus(port);

        let mut out = [0u8; 64];
        let n = bus.transact(b"0I!", &mut out).unwrap();
        assert_eq!(&out[..n], b"013COMPANYMODEL001SN12345\r\n");
    }

    #[test]
    fn unterminated_frame_is_invalid() {
        let mut port = MockPort::new();
        // No CRLF, then silence, on every attempt.
        for _ in 0..TRANSACTION_RETRIES {
            port.on("0!", "0");
        }
        let mut bus = open_bus(port);

        let mut out = [0u8; 16];
        let result = bus.transact(b"0!", &mut out);
        assert!(matches!(result, Err(Sdi12Error::InvalidFormat)));
    }

    #[test]
    fn response_is_truncated_to_caller_capacity() {
        let mut port = MockPort::new();
        port.on("0D0!", "0+1.23+4.56-0.78\r\n");
        let mut bus = open_bus(port);

        let mut out = [0u8; 6];
        let n = bus.transact(b"0D0!", &mut out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&out[..n], b"0+1.23");
    }

    #[test]
    fn dump_hook_sees_both_directions() {
        use parking_lot::Mutex;
        use std::sync::Arc;

        let mut port = MockPort::new();
        port.on("0!", "0\r\n");
        let mut bus = open_bus(port);

        let seen: Arc<Mutex<Vec<(Direction, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.set_dump(Some(Box::new(move |dir, _elapsed, bytes| {
            sink.lock().push((dir, bytes.to_vec()));
        })));

        let mut out = [0u8; 16];
        bus.transact(b"0!", &mut out).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Direction::Tx, b"0!".to_vec()));
        assert_eq!(seen[1], (Direction::Rx, b"0\r\n".to_vec()));
    }

    #[test]
    fn rejects_degenerate_buffers() {
        let port = MockPort::new();
        let mut bus = open_bus(port);
        let mut out = [0u8; 4];
        assert!(matches!(
            bus.transact(b"", &mut out),
            Err(Sdi12Error::InvalidFormat)
        ));
        assert!(matches!(
            bus.transact(b"0!", &mut []),
            Err(Sdi12Error::InvalidFormat)
        ));
    }
}
