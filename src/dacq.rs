// src/dacq.rs

//! Generic data-acquisition façade.
//!
//! A [`Dacq`] backend drives one field bus and retrieves floating-point
//! readings into caller-owned buffers. The SDI-12 driver
//! ([`Sdi12Dr`](crate::recorder::Sdi12Dr)) is one concrete backend;
//! backend-specific request parameters travel through the associated
//! `Request` type.

use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use crate::common::error::ErrorRecord;
use crate::common::frame::LineConfig;

/// Per-value quality status.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum ValueStatus {
    /// The value was parsed from a sensor response.
    Ok = 0,
    /// No value was retrieved for this slot.
    Missing = 1,
    /// A value was retrieved but failed a plausibility check.
    Implausible = 2,
}

/// Driver version triple.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DriverVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Buffer-and-metadata envelope for one retrieve operation.
///
/// The caller owns the buffers; the driver writes readings into `data`,
/// promotes the matching `status` entries from [`ValueStatus::Missing`] to
/// [`ValueStatus::Ok`], and sets `count` to the number of valid entries.
/// `count` never exceeds the buffer capacity nor the number of values the
/// sensor declared.
#[derive(Debug)]
pub struct DacqHandle<'a, R> {
    /// When the data set was retrieved.
    pub timestamp: SystemTime,
    pub data: &'a mut [f32],
    pub status: &'a mut [ValueStatus],
    /// Number of valid entries in `data`/`status` after a retrieve.
    pub count: usize,
    /// Backend-specific request parameters.
    pub request: R,
}

impl<'a, R> DacqHandle<'a, R> {
    pub fn new(data: &'a mut [f32], status: &'a mut [ValueStatus], request: R) -> Self {
        DacqHandle {
            timestamp: SystemTime::UNIX_EPOCH,
            data,
            status,
            count: 0,
            request,
        }
    }

    /// Usable capacity: the shorter of the two buffers.
    pub fn capacity(&self) -> usize {
        self.data.len().min(self.status.len())
    }

    /// The valid readings of the last retrieve.
    pub fn values(&self) -> &[f32] {
        &self.data[..self.count]
    }
}

/// Completion callback for deferred retrieves. Runs on the collector
/// thread; the handle's buffers are only valid for the duration of the
/// call. The boolean result is reserved for caller-side chaining and is
/// ignored by the driver.
pub type RetrieveCallback<R> = Box<dyn FnMut(&mut DacqHandle<'_, R>) -> bool + Send>;

/// A data-acquisition backend.
///
/// All operations record the outcome in the instance's last-error slot
/// (see [`Dacq::last_error`]) in addition to returning it. Optional
/// capability hooks default to failing with [`Dacq::unsupported`].
pub trait Dacq {
    /// Error type of this backend.
    type Error: Debug;
    /// Bus address / device identifier type.
    type Id: Copy;
    /// Backend-specific sampling request description.
    type Request;

    /// Opens and configures the underlying line. Fails if already open.
    fn open(&self, config: &LineConfig) -> Result<(), Self::Error>;

    /// Closes the line. A no-op when already closed.
    fn close(&self);

    fn version(&self) -> DriverVersion;

    /// Reads the device identification into `buf`, returning it as text.
    fn info<'a>(&self, id: Self::Id, buf: &'a mut [u8]) -> Result<&'a str, Self::Error>;

    /// Re-addresses a device.
    fn change_id(&self, id: Self::Id, new_id: Self::Id) -> Result<(), Self::Error>;

    /// Raw request/response pass-through: transmits `buf[..len]` unmodified
    /// and writes the response back into `buf`, returning its length.
    fn transparent(&self, buf: &mut [u8], len: usize) -> Result<usize, Self::Error>;

    /// Blocking retrieve: runs the full sampling sequence described by
    /// `handle.request` and fills the handle's buffers before returning.
    fn retrieve(&self, handle: &mut DacqHandle<'_, Self::Request>) -> Result<(), Self::Error>;

    /// Deferred retrieve: starts the measurement, returns immediately, and
    /// invokes `callback` from the collector once the sensor-declared delay
    /// has elapsed and the data has been pulled. `capacity` bounds how many
    /// values will be collected.
    fn retrieve_deferred(
        &self,
        request: Self::Request,
        capacity: usize,
        callback: RetrieveCallback<Self::Request>,
    ) -> Result<(), Self::Error>;

    /// True while a transaction holds the bus.
    fn is_busy(&self) -> bool;

    /// The most recent error record of this instance.
    fn last_error(&self) -> ErrorRecord;

    /// Constructs this backend's "operation not supported" error; used by
    /// the default bodies of the optional hooks below.
    fn unsupported() -> Self::Error;

    fn set_date(&self, _date: SystemTime) -> Result<(), Self::Error> {
        Err(Self::unsupported())
    }

    fn get_date(&self) -> Result<SystemTime, Self::Error> {
        Err(Self::unsupported())
    }

    fn set_acq_interval(&self, _interval: Duration) -> Result<(), Self::Error> {
        Err(Self::unsupported())
    }

    fn get_acq_interval(&self) -> Result<Duration, Self::Error> {
        Err(Self::unsupported())
    }

    /// Aborts an ongoing acquisition, where the backend supports it.
    fn abort(&self) -> Result<(), Self::Error> {
        Err(Self::unsupported())
    }
}
