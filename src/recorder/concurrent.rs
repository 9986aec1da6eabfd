// src/recorder/concurrent.rs

//! The concurrent-measurement scheduler: keeps a table of in-flight `C`
//! measurements and runs a single collector thread that wakes when the
//! earliest one falls due, pulls its data over the shared bus, and invokes
//! the caller's completion callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use super::protocol;
use super::transaction::Bus;
use crate::common::command::SensorSpec;
use crate::common::error::{ErrorRecord, Sdi12Error};
use crate::common::port::Sdi12Port;
use crate::common::timing::LOCK_TIMEOUT;
use crate::dacq::{DacqHandle, RetrieveCallback, ValueStatus};

/// Size of the pending-measurement table.
pub const MAX_CONCURRENT_REQUESTS: usize = 10;

/// Values each table slot can buffer for its callback.
const SLOT_VALUES: usize = 40;

/// One in-flight concurrent measurement.
struct PendingMeasurement {
    spec: SensorSpec,
    capacity: usize,
    /// Value count the sensor declared when the measurement started.
    declared: usize,
    /// When the data becomes due. `None` while the start command is still
    /// in flight, or once the slot is being serviced.
    ready_at: Option<Instant>,
    /// Taken by the collector before servicing; the slot itself stays
    /// occupied (the address stays busy) until the callback returns.
    callback: Option<RetrieveCallback<SensorSpec>>,
}

type SlotTable = [Option<PendingMeasurement>; MAX_CONCURRENT_REQUESTS];

struct Shared<P: Sdi12Port> {
    bus: Arc<Mutex<Bus<P>>>,
    slots: Mutex<SlotTable>,
    /// Signalled on submission and shutdown; the collector's timed wait on
    /// it doubles as the "next measurement due" alarm.
    ready: Condvar,
    quit: AtomicBool,
    last_error: Arc<Mutex<ErrorRecord>>,
}

/// Handle to the collector thread. The worker is started lazily on the
/// first submission; dropping the handle signals it to quit and joins it.
pub(crate) struct Collector<P: Sdi12Port> {
    shared: Arc<Shared<P>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    limit: usize,
}

impl<P> Collector<P>
where
    P: Sdi12Port + Send + 'static,
{
    pub(crate) fn new(
        bus: Arc<Mutex<Bus<P>>>,
        last_error: Arc<Mutex<ErrorRecord>>,
        limit: usize,
    ) -> Self {
        Collector {
            shared: Arc::new(Shared {
                bus,
                slots: Mutex::new(std::array::from_fn(|_| None)),
                ready: Condvar::new(),
                quit: AtomicBool::new(false),
                last_error,
            }),
            worker: Mutex::new(None),
            limit: limit.min(MAX_CONCURRENT_REQUESTS),
        }
    }

    /// Starts the collector thread if it is not running yet. Spawning can
    /// fail when the OS is out of thread resources; that surfaces as an
    /// error on the submission, never as a panic.
    fn ensure_started(&self) -> Result<(), Sdi12Error<P::Error>> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("sdi12-collect".into())
            .spawn(move || collect_loop(shared))
        {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                warn!("could not start sdi12-collect thread: {e}");
                Err(Sdi12Error::TtyOpen)
            }
        }
    }

    /// Submits a concurrent measurement: reserves a table slot, issues the
    /// start command, arms the slot with the sensor-declared delay and
    /// wakes the collector.
    pub(crate) fn submit(
        &self,
        spec: SensorSpec,
        capacity: usize,
        callback: RetrieveCallback<SensorSpec>,
    ) -> Result<(), Sdi12Error<P::Error>> {
        spec.validate()?;
        self.ensure_started()?;

        // Reserve before touching the bus, so a racing submission for the
        // same address cannot also start a measurement.
        let index = {
            let mut slots = self.shared.slots.lock();
            if slots
                .iter()
                .flatten()
                .any(|p| p.spec.address == spec.address)
            {
                return Err(Sdi12Error::SensorBusy);
            }
            if slots.iter().flatten().count() >= self.limit {
                return Err(Sdi12Error::TooManyRequests);
            }
            let index = slots
                .iter()
                .position(Option::is_none)
                .ok_or(Sdi12Error::TooManyRequests)?;
            slots[index] = Some(PendingMeasurement {
                spec,
                capacity: capacity.min(SLOT_VALUES),
                declared: 0,
                ready_at: None,
                callback: Some(callback),
            });
            index
        };

        let started = self.start_on_bus(&spec);
        match started {
            Ok(timing) => {
                let mut slots = self.shared.slots.lock();
                if let Some(pending) = slots[index].as_mut() {
                    pending.declared = timing.values as usize;
                    pending.ready_at = Some(Instant::now() + timing.delay());
                }
                drop(slots);
                debug!(
                    "queued concurrent measurement on {} (due in {} s)",
                    spec.address, timing.delay_seconds
                );
                self.shared.ready.notify_all();
                Ok(())
            }
            Err(e) => {
                self.shared.slots.lock()[index] = None;
                Err(e)
            }
        }
    }

    fn start_on_bus(
        &self,
        spec: &SensorSpec,
    ) -> Result<crate::common::response::MeasurementTiming, Sdi12Error<P::Error>> {
        let mut bus = self
            .shared
            .bus
            .try_lock_for(LOCK_TIMEOUT)
            .ok_or(Sdi12Error::DacqBusy)?;
        let timing = protocol::start_measurement(&mut bus, spec)?;
        if timing.values == 0 {
            return Err(Sdi12Error::NoSensorData);
        }
        Ok(timing)
    }

    /// Number of occupied table slots.
    pub(crate) fn pending(&self) -> usize {
        self.shared.slots.lock().iter().flatten().count()
    }
}

impl<P: Sdi12Port> Drop for Collector<P> {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::SeqCst);
        self.shared.ready.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn collect_loop<P: Sdi12Port>(shared: Arc<Shared<P>>) {
    loop {
        let due = {
            let mut slots = shared.slots.lock();
            loop {
                if shared.quit.load(Ordering::SeqCst) {
                    return;
                }
                // Earliest armed deadline, if any.
                let next = slots.iter().flatten().filter_map(|p| p.ready_at).min();
                match next {
                    None => {
                        shared.ready.wait(&mut slots);
                    }
                    Some(deadline) if Instant::now() >= deadline => {
                        // Table-scan order breaks ties deterministically.
                        break slots
                            .iter()
                            .position(|s| s.as_ref().and_then(|p| p.ready_at) == Some(deadline));
                    }
                    Some(deadline) => {
                        // Either the deadline passes (timed out) or a new
                        // submission re-arms the scan.
                        let _ = shared.ready.wait_until(&mut slots, deadline);
                    }
                }
            }
        };

        if let Some(index) = due {
            service_slot(&shared, index);
        }
    }
}

/// Pulls the due slot's data and runs its callback, then frees the slot.
/// The bus mutex is released before the callback is invoked.
fn service_slot<P: Sdi12Port>(shared: &Arc<Shared<P>>, index: usize) {
    let (spec, capacity, declared, mut callback) = {
        let mut slots = shared.slots.lock();
        let pending = match slots[index].as_mut() {
            Some(p) => p,
            None => return,
        };
        pending.ready_at = None;
        (
            pending.spec,
            pending.capacity,
            pending.declared,
            pending.callback.take(),
        )
    };

    let mut values = [0f32; SLOT_VALUES];
    let mut status = [ValueStatus::Missing; SLOT_VALUES];
    let capacity = capacity.min(SLOT_VALUES);

    let collected = {
        let mut bus = shared.bus.lock();
        protocol::collect_data(
            &mut bus,
            &spec,
            declared,
            &mut values[..capacity],
            &mut status[..capacity],
        )
    };

    let count = match collected {
        Ok(n) => {
            *shared.last_error.lock() = ErrorRecord::ok();
            n
        }
        Err(ref e) => {
            warn!("concurrent collection from {} failed: {e}", spec.address);
            *shared.last_error.lock() = ErrorRecord::from(e);
            0
        }
    };

    if let Some(cb) = callback.as_mut() {
        let mut handle = DacqHandle {
            timestamp: SystemTime::now(),
            data: &mut values[..capacity],
            status: &mut status[..capacity],
            count,
            request: spec,
        };
        let _ = cb(&mut handle);
    }

    shared.slots.lock()[index] = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::address::Sdi12Addr;
    use crate::common::command::Method;
    use crate::common::frame::LineConfig;
    use crate::common::timing::BREAK_DURATION_DEFAULT;
    use crate::mock::MockPort;
    use std::time::Duration;

    fn addr(c: char) -> Sdi12Addr {
        Sdi12Addr::new(c).unwrap()
    }

    fn collector_over(port: MockPort) -> Collector<MockPort> {
        let mut bus = Bus::new(port, BREAK_DURATION_DEFAULT);
        bus.port().open(&LineConfig::default()).unwrap();
        let bus = Arc::new(Mutex::new(bus));
        let last_error = Arc::new(Mutex::new(ErrorRecord::ok()));
        Collector::new(bus, last_error, MAX_CONCURRENT_REQUESTS)
    }

    fn spec(c: char) -> SensorSpec {
        SensorSpec::new(addr(c), Method::Concurrent)
    }

    #[test]
    fn earliest_ready_slot_is_served_first() {
        let mut port = MockPort::new();
        // '0' is due after 2 s, 'A' after 1 s; 'A' must complete first.
        port.on("0C!", "00023\r\n");
        port.on("AC!", "A0012\r\n");
        port.on("0D0!", "0+1.1+2.2+3.3\r\n");
        port.on("AD0!", "A+9.9+8.8\r\n");
        let collector = collector_over(port);

        let order: Arc<Mutex<Vec<char>>> = Arc::new(Mutex::new(Vec::new()));
        for c in ['0', 'A'] {
            let order = Arc::clone(&order);
            collector
                .submit(
                    spec(c),
                    8,
                    Box::new(move |handle| {
                        order.lock().push(handle.request.address.as_char());
                        true
                    }),
                )
                .unwrap();
        }

        // Both should be collected within ~2.5 s.
        let deadline = Instant::now() + Duration::from_secs(4);
        while collector.pending() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(*order.lock(), vec!['A', '0']);
    }

    #[test]
    fn duplicate_address_is_rejected_while_pending() {
        let mut port = MockPort::new();
        port.on("0C!", "09001\r\n");
        let collector = collector_over(port);

        collector
            .submit(spec('0'), 4, Box::new(|_| true))
            .unwrap();
        let result = collector.submit(spec('0'), 4, Box::new(|_| true));
        assert!(matches!(result, Err(Sdi12Error::SensorBusy)));
    }

    #[test]
    fn table_overflow_is_rejected() {
        let mut port = MockPort::new();
        let addresses = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
        for c in addresses {
            // Long delays keep every slot occupied for the duration of the test.
            port.on(&format!("{c}C!"), &format!("{c}9001\r\n"));
        }
        let collector = collector_over(port);

        for c in addresses {
            collector.submit(spec(c), 4, Box::new(|_| true)).unwrap();
        }
        let result = collector.submit(spec('z'), 4, Box::new(|_| true));
        assert!(matches!(result, Err(Sdi12Error::TooManyRequests)));
    }

    #[test]
    fn zero_declared_values_frees_the_slot() {
        let mut port = MockPort::new();
        port.on("0C!", "00010\r\n");
        let collector = collector_over(port);

        let result = collector.submit(spec('0'), 4, Box::new(|_| true));
        assert!(matches!(result, Err(Sdi12Error::NoSensorData)));
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn failed_collection_still_runs_the_callback() {
        let mut port = MockPort::new();
        port.on("0C!", "00012\r\n");
        // No `0D0!` response scripted: collection times out.
        let collector = collector_over(port);

        let seen: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        collector
            .submit(
                spec('0'),
                4,
                Box::new(move |handle| {
                    *sink.lock() = Some(handle.count);
                    true
                }),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(6);
        while seen.lock().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(*seen.lock(), Some(0));
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn shutdown_joins_the_worker() {
        let port = MockPort::new();
        let collector = collector_over(port);
        drop(collector); // must not hang
    }
}
