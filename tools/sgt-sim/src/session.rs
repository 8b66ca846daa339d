//! A simulated process talking to the allocator through the request surface.

use crate::script::Step;
use kernel_alloc::{BitmapFrameAlloc, FailAfter, SimulatedRam};
use kernel_sgt::request::{
    Response, SGT_GET_MAX_SIZE, SGT_RESERVE, SGT_UNRESERVE, SGT_UNRESERVE_ALL, SgtBuffer,
};
use kernel_sgt::{PhysicalAddress, SgtAllocator, SgtError};
use log::info;

pub type Device<'a> = SgtAllocator<&'a FailAfter<BitmapFrameAlloc>, &'a SimulatedRam>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("request {opcode:#010x} failed with errno {errno}: {source}")]
    Request {
        opcode: u32,
        errno: i32,
        #[source]
        source: SgtError,
    },
    #[error("there is no live reservation #{0}")]
    UnknownHandle(usize),
}

/// Reservations made so far, numbered from 1 in request order.
pub struct Session<'a> {
    device: &'a Device<'a>,
    handles: Vec<Option<PhysicalAddress>>,
}

impl<'a> Session<'a> {
    #[must_use]
    pub const fn new(device: &'a Device<'a>) -> Self {
        Self {
            device,
            handles: Vec::new(),
        }
    }

    /// Cross the byte boundary in both directions, as an ioctl would.
    fn ioctl(&self, opcode: u32, buffer: &mut SgtBuffer) -> Result<Response, SessionError> {
        let bytes = buffer.to_bytes();
        let mut request = SgtBuffer::from_bytes(&bytes);
        let result = self.device.dispatch(opcode, &mut request);
        *buffer = SgtBuffer::from_bytes(&request.to_bytes());
        result.map_err(|source| SessionError::Request {
            opcode,
            errno: source.errno(),
            source,
        })
    }

    /// Run one step and describe the outcome.
    ///
    /// # Errors
    /// The failed request, or an unknown reservation number.
    pub fn run(&mut self, step: Step) -> Result<String, SessionError> {
        info!("Step: {step:?}");
        match step {
            Step::Capacity => {
                let mut buffer = SgtBuffer::default();
                self.ioctl(SGT_GET_MAX_SIZE, &mut buffer)?;
                Ok(format!("Available memory: {}MB", buffer.size / (1024 * 1024)))
            }
            Step::Reserve { size, mode } => {
                let mut buffer = SgtBuffer::reserve(size, mode);
                self.ioctl(SGT_RESERVE, &mut buffer)?;
                let address = PhysicalAddress::new(buffer.address);
                self.handles.push(Some(address));
                Ok(format!(
                    "Reservation #{}: {size} bytes ({mode:?}), table at {address}",
                    self.handles.len()
                ))
            }
            Step::Unreserve { handle } => {
                let address = handle
                    .checked_sub(1)
                    .and_then(|i| self.handles.get(i).copied().flatten())
                    .ok_or(SessionError::UnknownHandle(handle))?;
                self.ioctl(SGT_UNRESERVE, &mut SgtBuffer::for_address(address))?;
                self.handles[handle - 1] = None;
                Ok(format!("Released reservation #{handle} at {address}"))
            }
            Step::UnreserveAll => {
                let mut buffer = SgtBuffer::default();
                let released = match self.ioctl(SGT_UNRESERVE_ALL, &mut buffer)? {
                    Response::UnreservedAll(n) => n,
                    _ => 0,
                };
                self.handles.iter_mut().for_each(|h| *h = None);
                Ok(format!("Released {released} remaining reservations"))
            }
        }
    }

    /// Addresses of reservations that have not been released.
    pub fn live(&self) -> impl Iterator<Item = (usize, PhysicalAddress)> + '_ {
        self.handles
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.map(|address| (i + 1, address)))
    }
}
