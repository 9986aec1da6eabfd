// src/recorder/mod.rs

//! The SDI-12 data recorder driver.
//!
//! [`Sdi12Dr`] owns the serial line behind a bus mutex, serializes all
//! protocol transactions over it, and implements the generic [`Dacq`]
//! façade. With `max_concurrent > 0` it also runs the concurrent-
//! measurement collector thread.

mod concurrent;
mod protocol;
mod transaction;

pub use concurrent::MAX_CONCURRENT_REQUESTS;
pub use transaction::DumpFn;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};

use crate::common::address::Sdi12Addr;
use crate::common::command::SensorSpec;
use crate::common::error::{ErrorRecord, Sdi12Error};
use crate::common::frame::LineConfig;
use crate::common::port::Sdi12Port;
use crate::common::timing::{BREAK_DURATION_DEFAULT, LOCK_TIMEOUT};
use crate::dacq::{Dacq, DacqHandle, DriverVersion, RetrieveCallback};
use concurrent::Collector;
use transaction::Bus;

const VERSION: DriverVersion = DriverVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

/// Driver configuration.
#[derive(Debug, Copy, Clone)]
pub struct Sdi12Config {
    /// Break length emitted before commands; the SDI-12 minimum is 12 ms.
    pub break_len: Duration,
    /// Usable concurrent-scheduler slots (at most
    /// [`MAX_CONCURRENT_REQUESTS`]); 0 disables the scheduler entirely.
    pub max_concurrent: usize,
}

impl Default for Sdi12Config {
    fn default() -> Self {
        Sdi12Config {
            break_len: BREAK_DURATION_DEFAULT,
            max_concurrent: MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// SDI-12 master driver over a [`Sdi12Port`].
pub struct Sdi12Dr<P: Sdi12Port + Send + 'static> {
    bus: Arc<Mutex<Bus<P>>>,
    last_error: Arc<Mutex<ErrorRecord>>,
    collector: Option<Collector<P>>,
}

impl<P> Sdi12Dr<P>
where
    P: Sdi12Port + Send + 'static,
{
    /// Creates a driver with the default configuration (20 ms break,
    /// scheduler enabled). The port is configured later via
    /// [`Dacq::open`].
    pub fn new(port: P) -> Self {
        Self::with_config(port, Sdi12Config::default())
    }

    pub fn with_config(port: P, config: Sdi12Config) -> Self {
        let bus = Arc::new(Mutex::new(Bus::new(port, config.break_len)));
        let last_error = Arc::new(Mutex::new(ErrorRecord::ok()));
        let collector = (config.max_concurrent > 0).then(|| {
            Collector::new(
                Arc::clone(&bus),
                Arc::clone(&last_error),
                config.max_concurrent,
            )
        });
        Sdi12Dr {
            bus,
            last_error,
            collector,
        }
    }

    /// Installs (or removes) the protocol dump hook. The hook observes
    /// every frame in both directions with timestamps relative to the
    /// moment the port was opened.
    pub fn set_dump_hook(&self, hook: Option<Box<DumpFn>>) {
        self.bus.lock().set_dump(hook);
    }

    /// Number of concurrent measurements currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.collector.as_ref().map_or(0, Collector::pending)
    }

    /// Acknowledge Active (`a!`): cheap liveness probe for one sensor.
    pub fn ack_active(&self, address: Sdi12Addr) -> Result<(), Sdi12Error<P::Error>> {
        self.finish((|| {
            let mut bus = self.lock_bus()?;
            protocol::ack_active(&mut bus, address)
        })())
    }

    fn lock_bus(&self) -> Result<MutexGuard<'_, Bus<P>>, Sdi12Error<P::Error>> {
        self.bus.try_lock_for(LOCK_TIMEOUT).ok_or(Sdi12Error::DacqBusy)
    }

    /// Records the outcome in the last-error slot and passes it through.
    fn finish<T>(
        &self,
        result: Result<T, Sdi12Error<P::Error>>,
    ) -> Result<T, Sdi12Error<P::Error>> {
        *self.last_error.lock() = match &result {
            Ok(_) => ErrorRecord::ok(),
            Err(e) => ErrorRecord::from(e),
        };
        result
    }
}

impl<P> Dacq for Sdi12Dr<P>
where
    P: Sdi12Port + Send + 'static,
{
    type Error = Sdi12Error<P::Error>;
    type Id = Sdi12Addr;
    type Request = SensorSpec;

    fn open(&self, config: &LineConfig) -> Result<(), Self::Error> {
        self.finish((|| {
            let mut bus = self.lock_bus()?;
            if bus.is_open() {
                return Err(Sdi12Error::TtyInUse);
            }
            bus.port().open(config)?;
            bus.reset(config.read_timeout);
            info!("sdi-12 line opened ({} baud)", config.baud);
            Ok(())
        })())
    }

    fn close(&self) {
        let mut bus = self.bus.lock();
        bus.port().close();
        bus.reset(LineConfig::default().read_timeout);
        debug!("sdi-12 line closed");
    }

    fn version(&self) -> DriverVersion {
        VERSION
    }

    fn info<'a>(&self, id: Self::Id, buf: &'a mut [u8]) -> Result<&'a str, Self::Error> {
        let result = self.lock_bus().and_then(|mut bus| protocol::send_id(&mut bus, id, buf));
        self.finish(result)
    }

    fn change_id(&self, id: Self::Id, new_id: Self::Id) -> Result<(), Self::Error> {
        self.finish((|| {
            let mut bus = self.lock_bus()?;
            protocol::change_address(&mut bus, id, new_id)
        })())
    }

    fn transparent(&self, buf: &mut [u8], len: usize) -> Result<usize, Self::Error> {
        self.finish((|| {
            let mut bus = self.lock_bus()?;
            protocol::transparent(&mut bus, buf, len)
        })())
    }

    fn retrieve(&self, handle: &mut DacqHandle<'_, SensorSpec>) -> Result<(), Self::Error> {
        let spec = handle.request;
        let result = (|| {
            let mut bus = self.lock_bus()?;
            protocol::retrieve_blocking(&mut bus, &spec, handle.data, handle.status)
        })();
        match self.finish(result) {
            Ok(count) => {
                handle.count = count;
                handle.timestamp = std::time::SystemTime::now();
                Ok(())
            }
            Err(e) => {
                handle.count = 0;
                Err(e)
            }
        }
    }

    fn retrieve_deferred(
        &self,
        request: SensorSpec,
        capacity: usize,
        callback: RetrieveCallback<SensorSpec>,
    ) -> Result<(), Self::Error> {
        let result = match &self.collector {
            Some(collector) => collector.submit(request, capacity, callback),
            None => Err(Sdi12Error::Unsupported),
        };
        self.finish(result)
    }

    fn is_busy(&self) -> bool {
        self.bus.try_lock().is_none()
    }

    fn last_error(&self) -> ErrorRecord {
        *self.last_error.lock()
    }

    fn unsupported() -> Self::Error {
        Sdi12Error::Unsupported
    }
}
