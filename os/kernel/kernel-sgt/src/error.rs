use crate::addresses::PhysicalAddress;

/// Errors reported by scatter-gather table operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SgtError {
    /// A page, index run or registry slot could not be acquired.
    #[error("out of memory")]
    OutOfMemory,
    /// No table is registered at the given address.
    #[error("no scatter-gather table at {0}")]
    NotFound(PhysicalAddress),
    /// The request was rejected before any work was done.
    #[error("invalid request: {0}")]
    InvalidRequest(InvalidRequest),
    /// The page allocator returned a page an entry cannot address.
    #[error("page at {0} lies outside the table address range")]
    Unaddressable(PhysicalAddress),
    /// The page allocator handed out a run that is still registered.
    #[error("table at {0} is already registered")]
    AlreadyRegistered(PhysicalAddress),
}

/// Reasons a request is rejected at the request surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("unknown opcode {0:#010x}")]
    UnknownOpcode(u32),
    #[error("zero-sized reservation")]
    ZeroSize,
}

const ENOMEM: i32 = 12;
const EINVAL: i32 = 22;

impl SgtError {
    /// Negative errno value reported to the calling process.
    ///
    /// Every lookup or validation failure maps to `-EINVAL`, every
    /// acquisition failure to `-ENOMEM`.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::OutOfMemory | Self::Unaddressable(_) => -ENOMEM,
            Self::NotFound(_) | Self::InvalidRequest(_) | Self::AlreadyRegistered(_) => -EINVAL,
        }
    }
}

impl From<InvalidRequest> for SgtError {
    fn from(value: InvalidRequest) -> Self {
        Self::InvalidRequest(value)
    }
}
