//! # Request Surface
//!
//! The four operations as seen from a calling process: ioctl-style opcodes, a
//! fixed-layout request/response record and the dispatch onto
//! [`SgtAllocator`].
//!
//! Opcodes use the Linux `_IOC` encoding on type `'Z'`:
//!
//! | Opcode                     | Direction | Number |
//! |----------------------------|-----------|--------|
//! | [`SGT_GET_MAX_SIZE`]       | `_IOW`    | 80     |
//! | [`SGT_RESERVE`]            | `_IOWR`   | 81     |
//! | [`SGT_UNRESERVE`]          | `_IOR`    | 82     |
//! | [`SGT_UNRESERVE_ALL`]      | `_IO`     | 83     |

use crate::addresses::PhysicalAddress;
use crate::allocator::SgtAllocator;
use crate::error::{InvalidRequest, SgtError};
use crate::{BufferMode, PageAllocator, PhysMapper};
use log::trace;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const IOC_NONE: u32 = 0;
pub const IOC_WRITE: u32 = 1;
pub const IOC_READ: u32 = 2;

/// Compose an opcode from direction, type, number and argument size.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    debug_assert!(size < (1 << IOC_SIZEBITS));
    (dir << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

/// Opcode type shared by all scatter-gather requests.
pub const SGT_IOC_TYPE: u8 = b'Z';

pub const SGT_GET_MAX_SIZE: u32 = ioc(IOC_WRITE, SGT_IOC_TYPE, 80, SgtBuffer::SIZE);
pub const SGT_RESERVE: u32 = ioc(IOC_READ | IOC_WRITE, SGT_IOC_TYPE, 81, SgtBuffer::SIZE);
pub const SGT_UNRESERVE: u32 = ioc(IOC_READ, SGT_IOC_TYPE, 82, SgtBuffer::SIZE);
pub const SGT_UNRESERVE_ALL: u32 = ioc(IOC_NONE, SGT_IOC_TYPE, 83, 0);

/// Request/response record exchanged with the caller.
///
/// `address` carries the table address in and out, `size` the requested byte
/// count or the reported capacity, `circular` selects [`BufferMode::Circular`]
/// when non-zero.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SgtBuffer {
    pub address: u64,
    pub size: u64,
    pub circular: u8,
    pub reserved: [u8; 7],
}

const _: () = assert!(size_of::<SgtBuffer>() == SgtBuffer::SIZE);

impl SgtBuffer {
    /// Size of the record at the boundary, in bytes.
    pub const SIZE: usize = 24;

    #[must_use]
    pub const fn reserve(size: u64, mode: BufferMode) -> Self {
        Self {
            address: 0,
            size,
            circular: if mode.is_circular() { 1 } else { 0 },
            reserved: [0; 7],
        }
    }

    #[must_use]
    pub const fn for_address(address: PhysicalAddress) -> Self {
        Self {
            address: address.as_u64(),
            size: 0,
            circular: 0,
            reserved: [0; 7],
        }
    }

    #[must_use]
    pub const fn mode(&self) -> BufferMode {
        BufferMode::from_circular(self.circular != 0)
    }

    /// Native-endian wire form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.address.to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.size.to_ne_bytes());
        bytes[16] = self.circular;
        bytes[17..].copy_from_slice(&self.reserved);
        bytes
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut address = [0; 8];
        let mut size = [0; 8];
        let mut reserved = [0; 7];
        address.copy_from_slice(&bytes[0..8]);
        size.copy_from_slice(&bytes[8..16]);
        reserved.copy_from_slice(&bytes[17..]);
        Self {
            address: u64::from_ne_bytes(address),
            size: u64::from_ne_bytes(size),
            circular: bytes[16],
            reserved,
        }
    }
}

/// A decoded request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Request {
    GetMaxSize,
    Reserve { size: u64, mode: BufferMode },
    Unreserve { address: PhysicalAddress },
    UnreserveAll,
}

/// Result of a successful request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Response {
    /// Advisory capacity in bytes.
    MaxSize(u64),
    /// Address of the new table.
    Reserved(PhysicalAddress),
    Unreserved,
    /// Number of tables released.
    UnreservedAll(usize),
}

impl Request {
    /// Decode `opcode` and its argument record.
    ///
    /// # Errors
    /// [`SgtError::InvalidRequest`] for unknown opcodes and zero-sized reservations.
    pub fn decode(opcode: u32, buffer: &SgtBuffer) -> Result<Self, SgtError> {
        match opcode {
            SGT_GET_MAX_SIZE => Ok(Self::GetMaxSize),
            SGT_RESERVE if buffer.size == 0 => Err(InvalidRequest::ZeroSize.into()),
            SGT_RESERVE => Ok(Self::Reserve {
                size: buffer.size,
                mode: buffer.mode(),
            }),
            SGT_UNRESERVE => Ok(Self::Unreserve {
                address: PhysicalAddress::new(buffer.address),
            }),
            SGT_UNRESERVE_ALL => Ok(Self::UnreserveAll),
            other => Err(InvalidRequest::UnknownOpcode(other).into()),
        }
    }

    #[must_use]
    pub const fn opcode(&self) -> u32 {
        match self {
            Self::GetMaxSize => SGT_GET_MAX_SIZE,
            Self::Reserve { .. } => SGT_RESERVE,
            Self::Unreserve { .. } => SGT_UNRESERVE,
            Self::UnreserveAll => SGT_UNRESERVE_ALL,
        }
    }
}

impl Response {
    /// Copy the response fields into the caller's record.
    pub const fn write_to(&self, buffer: &mut SgtBuffer) {
        match *self {
            Self::MaxSize(bytes) => buffer.size = bytes,
            Self::Reserved(address) => buffer.address = address.as_u64(),
            Self::Unreserved | Self::UnreservedAll(_) => {}
        }
    }
}

impl<A: PageAllocator, M: PhysMapper> SgtAllocator<A, M> {
    /// Run one decoded request.
    ///
    /// # Errors
    /// Whatever the underlying operation reports.
    pub fn handle(&self, request: Request) -> Result<Response, SgtError> {
        trace!("Handling {request:?}");
        match request {
            Request::GetMaxSize => Ok(Response::MaxSize(self.get_capacity())),
            Request::Reserve { size, mode } => self.reserve(size, mode).map(Response::Reserved),
            Request::Unreserve { address } => self.unreserve(address).map(|()| Response::Unreserved),
            Request::UnreserveAll => Ok(Response::UnreservedAll(self.unreserve_all())),
        }
    }

    /// Decode, run and answer one request in place.
    ///
    /// # Errors
    /// As [`Request::decode`] and [`handle`](Self::handle). Use
    /// [`SgtError::errno`] to report the failure to a calling process.
    pub fn dispatch(&self, opcode: u32, buffer: &mut SgtBuffer) -> Result<Response, SgtError> {
        let response = self.handle(Request::decode(opcode, buffer)?)?;
        response.write_to(buffer);
        Ok(response)
    }
}
