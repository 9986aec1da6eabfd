// src/recorder/protocol.rs

//! Command layer and the retrieve orchestrator: encodes protocol commands,
//! decodes their responses, and drives the start-measurement /
//! wait-for-service-request / send-data sequence on top of the transaction
//! engine. Transient failures force a break and are retried up to
//! [`RETRIES_WITH_BREAK`] times here.

use std::thread;

use log::{debug, trace};

use super::transaction::Bus;
use crate::common::address::Sdi12Addr;
use crate::common::command::{Command, Method, SensorSpec};
use crate::common::error::Sdi12Error;
use crate::common::port::Sdi12Port;
use crate::common::response::{expect_frame, parse_timing, parse_values, MeasurementTiming};
use crate::common::timing::{
    LONGEST_FRAME, RETRIES_WITH_BREAK, SERVICE_REQUEST_GRACE, SERVICE_REQUEST_POLL,
};

/// Identification responses carry up to 33 payload characters plus address
/// and `<CR><LF>`; the original driver demands a 37-byte caller buffer.
pub(crate) const MIN_INFO_BUFFER: usize = 37;

/// Upper bound on values a single 84-byte frame can carry (shortest field
/// is a sign plus one digit).
const MAX_VALUES_PER_FRAME: usize = 40;

/// Runs `op`, forcing a break and retrying on transient failures
/// (timeouts, wrong-sensor answers, CRC and framing errors). Anything else
/// is terminal.
pub(crate) fn with_break_retries<P, T, F>(
    bus: &mut Bus<P>,
    mut op: F,
) -> Result<T, Sdi12Error<P::Error>>
where
    P: Sdi12Port,
    F: FnMut(&mut Bus<P>) -> Result<T, Sdi12Error<P::Error>>,
{
    let mut last_error = Sdi12Error::Timeout;
    for attempt in 0..RETRIES_WITH_BREAK {
        match op(bus) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                debug!("attempt {}/{} failed: {e}", attempt + 1, RETRIES_WITH_BREAK);
                bus.force_break();
                last_error = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error)
}

/// Acknowledge Active (`a!`): the sensor answers with its bare address.
pub(crate) fn ack_active<P: Sdi12Port>(
    bus: &mut Bus<P>,
    address: Sdi12Addr,
) -> Result<(), Sdi12Error<P::Error>> {
    with_break_retries(bus, |bus| {
        let cmd = Command::AcknowledgeActive { address }.encode();
        let mut frame = [0u8; LONGEST_FRAME];
        let n = bus.transact(cmd.as_bytes(), &mut frame)?;
        let payload = expect_frame(&frame[..n], address, false)?;
        if payload.is_empty() {
            Ok(())
        } else {
            Err(Sdi12Error::UnexpectedAnswer)
        }
    })
}

/// Send Identification (`aI!`): writes the identification text into `buf`
/// and returns it, without the leading address byte.
pub(crate) fn send_id<'a, P: Sdi12Port>(
    bus: &mut Bus<P>,
    address: Sdi12Addr,
    buf: &'a mut [u8],
) -> Result<&'a str, Sdi12Error<P::Error>> {
    if buf.len() < MIN_INFO_BUFFER {
        return Err(Sdi12Error::BufferTooSmall {
            needed: MIN_INFO_BUFFER,
            got: buf.len(),
        });
    }

    let len = with_break_retries(bus, |bus| {
        let cmd = Command::SendIdentification { address }.encode();
        let mut frame = [0u8; LONGEST_FRAME];
        let n = bus.transact(cmd.as_bytes(), &mut frame)?;
        let payload = expect_frame(&frame[..n], address, false)?;
        let bytes = payload.as_bytes();
        if bytes.len() > buf.len() {
            return Err(Sdi12Error::BufferTooSmall {
                needed: bytes.len(),
                got: buf.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    })?;

    std::str::from_utf8(&buf[..len]).map_err(|_| Sdi12Error::InvalidFormat)
}

/// Change Address (`aAb!`): the sensor acknowledges under its new address.
pub(crate) fn change_address<P: Sdi12Port>(
    bus: &mut Bus<P>,
    address: Sdi12Addr,
    new_address: Sdi12Addr,
) -> Result<(), Sdi12Error<P::Error>> {
    with_break_retries(bus, |bus| {
        let cmd = Command::ChangeAddress { address, new_address }.encode();
        let mut frame = [0u8; LONGEST_FRAME];
        let n = bus.transact(cmd.as_bytes(), &mut frame)?;
        let payload = expect_frame(&frame[..n], new_address, false)?;
        if payload.is_empty() {
            Ok(())
        } else {
            Err(Sdi12Error::UnexpectedAnswer)
        }
    })
}

/// Starts a two-step measurement (`aM…!`, `aC…!`, `aV!`) and returns the
/// declared delay and value count.
pub(crate) fn start_measurement<P: Sdi12Port>(
    bus: &mut Bus<P>,
    spec: &SensorSpec,
) -> Result<MeasurementTiming, Sdi12Error<P::Error>> {
    spec.validate()?;
    debug_assert!(spec.method.is_two_step());

    let timing = with_break_retries(bus, |bus| {
        let cmd = Command::start_for(spec).encode();
        let mut frame = [0u8; LONGEST_FRAME];
        let n = bus.transact(cmd.as_bytes(), &mut frame)?;
        let payload = expect_frame(&frame[..n], spec.address, false)?;
        parse_timing(payload.as_bytes())
    })?;

    trace!(
        "sensor {} declares {} value(s) in {} s",
        spec.address,
        timing.values,
        timing.delay_seconds
    );

    if let Some(max_wait) = spec.max_wait {
        if timing.delay() > max_wait {
            return Err(Sdi12Error::Timeout);
        }
    }
    Ok(timing)
}

/// Waits up to `delay_seconds` for the sensor's spontaneous service
/// request (`a<CR><LF>`), polling the line with a one-second read timeout
/// per iteration. A timeout is not an error: non-conforming sensors never
/// send one, so the caller proceeds after a short grace delay.
pub(crate) fn wait_for_service_request<P: Sdi12Port>(
    bus: &mut Bus<P>,
    address: Sdi12Addr,
    delay_seconds: u16,
) -> Result<(), Sdi12Error<P::Error>> {
    let restore = bus.read_timeout();
    bus.port().set_read_timeout(SERVICE_REQUEST_POLL)?;

    let mut outcome: Result<bool, Sdi12Error<P::Error>> = Ok(false);
    let mut buf = [0u8; 4];
    for _ in 0..=delay_seconds {
        match bus.port().read(&mut buf) {
            Ok(0) => continue,
            Ok(_) => {
                if buf[0] == address.as_byte() {
                    trace!("service request from {address}");
                    bus.mark_activity(address.as_byte());
                }
                outcome = Ok(true);
                break;
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    bus.port().set_read_timeout(restore)?;

    match outcome? {
        true => Ok(()),
        false => {
            debug!("no service request from {address}, proceeding after grace delay");
            thread::sleep(SERVICE_REQUEST_GRACE);
            Ok(())
        }
    }
}

/// Fetches measurement data with `aD0!`..`aD9!` until `declared` values
/// have been gathered, the caller's buffers are full, or the sensor sends
/// an empty frame. Returns the number of values stored; their `status`
/// entries are promoted to `Ok`, all others stay `Missing`.
pub(crate) fn collect_data<P: Sdi12Port>(
    bus: &mut Bus<P>,
    spec: &SensorSpec,
    declared: usize,
    data: &mut [f32],
    status: &mut [crate::dacq::ValueStatus],
) -> Result<usize, Sdi12Error<P::Error>> {
    use crate::dacq::ValueStatus;

    for s in status.iter_mut() {
        *s = ValueStatus::Missing;
    }
    let want = declared.min(data.len()).min(status.len());
    if want == 0 {
        return Ok(0);
    }

    // Verification data is never CRC-protected; there is no `aVC!`.
    let use_crc = spec.use_crc && spec.method != Method::Verify;

    let mut got = 0;
    for index in 0..=9u8 {
        if got >= want {
            break;
        }
        let mut chunk = [0f32; MAX_VALUES_PER_FRAME];
        let parsed = with_break_retries(bus, |bus| {
            let cmd = Command::SendData { address: spec.address, index }.encode();
            let mut frame = [0u8; LONGEST_FRAME];
            let n = bus.transact(cmd.as_bytes(), &mut frame)?;
            let payload = expect_frame(&frame[..n], spec.address, use_crc)?;
            parse_values(payload.as_bytes(), &mut chunk)
        })?;
        if parsed == 0 {
            // Empty frame: the sensor has nothing more to send.
            break;
        }
        let take = parsed.min(want - got);
        data[got..got + take].copy_from_slice(&chunk[..take]);
        for s in &mut status[got..got + take] {
            *s = ValueStatus::Ok;
        }
        got += take;
    }

    debug!("collected {got}/{declared} value(s) from {}", spec.address);
    Ok(got)
}

/// Continuous measurement (`aR0!`..`aR9!`): one request, values in the
/// response, no two-step handshake and no declared count.
pub(crate) fn read_continuous<P: Sdi12Port>(
    bus: &mut Bus<P>,
    spec: &SensorSpec,
    data: &mut [f32],
    status: &mut [crate::dacq::ValueStatus],
) -> Result<usize, Sdi12Error<P::Error>> {
    use crate::dacq::ValueStatus;

    spec.validate()?;
    for s in status.iter_mut() {
        *s = ValueStatus::Missing;
    }
    let want = data.len().min(status.len());
    if want == 0 {
        return Ok(0);
    }

    let mut chunk = [0f32; MAX_VALUES_PER_FRAME];
    let parsed = with_break_retries(bus, |bus| {
        let cmd = Command::ReadContinuous {
            address: spec.address,
            index: spec.index,
            use_crc: spec.use_crc,
        }
        .encode();
        let mut frame = [0u8; LONGEST_FRAME];
        let n = bus.transact(cmd.as_bytes(), &mut frame)?;
        let payload = expect_frame(&frame[..n], spec.address, spec.use_crc)?;
        parse_values(payload.as_bytes(), &mut chunk)
    })?;

    let take = parsed.min(want);
    data[..take].copy_from_slice(&chunk[..take]);
    for s in &mut status[..take] {
        *s = ValueStatus::Ok;
    }
    Ok(take)
}

/// Transparent transfer: `buf[..len]` goes out unmodified and the raw
/// response replaces it. No framing checks beyond the engine's own.
pub(crate) fn transparent<P: Sdi12Port>(
    bus: &mut Bus<P>,
    buf: &mut [u8],
    len: usize,
) -> Result<usize, Sdi12Error<P::Error>> {
    if len == 0 {
        return Err(Sdi12Error::InvalidFormat);
    }
    if len > buf.len() || len > LONGEST_FRAME {
        return Err(Sdi12Error::BufferTooSmall {
            needed: len,
            got: buf.len().min(LONGEST_FRAME),
        });
    }
    let mut cmd = [0u8; LONGEST_FRAME];
    cmd[..len].copy_from_slice(&buf[..len]);
    bus.transact(&cmd[..len], buf)
}

/// The blocking retrieve state machine: start → wait for service request →
/// fetch, or a single continuous read for `R`.
pub(crate) fn retrieve_blocking<P: Sdi12Port>(
    bus: &mut Bus<P>,
    spec: &SensorSpec,
    data: &mut [f32],
    status: &mut [crate::dacq::ValueStatus],
) -> Result<usize, Sdi12Error<P::Error>> {
    spec.validate()?;
    if spec.method == Method::Continuous {
        return read_continuous(bus, spec, data, status);
    }

    let timing = start_measurement(bus, spec)?;
    if timing.values == 0 {
        return Err(Sdi12Error::NoSensorData);
    }
    wait_for_service_request(bus, spec.address, timing.delay_seconds)?;
    collect_data(bus, spec, timing.values as usize, data, status)
}
