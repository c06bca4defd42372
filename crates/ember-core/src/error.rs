//! # EMBER Error Handling
//!
//! Error taxonomy for the command-buffer stack.
//!
//! Every fallible entry point returns [`Result`]. Failures fall into five
//! classes (see [`ErrorClass`]):
//! - invalid arguments, reported before anything is recorded
//! - features the back-end has no equivalent for
//! - resource exhaustion on the host or device
//! - calls made in the wrong lifecycle state
//! - device-side failures observed while executing recorded work
//!
//! An operation that succeeds with a weaker equivalent is not an error. It
//! returns `Ok` together with [`Status::Degraded`].

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// EMBER Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// EMBER unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Invalid Arguments
    // =========================================================================
    /// A value argument is out of range or unknown to its owner
    InvalidValue,
    /// Offset and size do not fit the referenced memory
    InvalidSize,
    /// Work dimensionality outside `1..=3`
    InvalidWorkDimension,
    /// Local size does not divide the global size or exceeds device limits
    InvalidWorkGroupSize,
    /// Kernel belongs to another context
    InvalidKernel,
    /// Kernel launched with unset arguments
    InvalidKernelArgs,
    /// Memory object is unusable here
    InvalidMemObject,
    /// Device is not part of the given context
    InvalidDevice,
    /// Queue does not belong to the command buffer's device
    InvalidQueue,
    /// Event is unusable here
    InvalidEvent,
    /// Handle is stale or was never issued
    InvalidNullHandle,

    // =========================================================================
    // Unsupported
    // =========================================================================
    /// Operation has no equivalent on this back-end
    UnsupportedFeature,

    // =========================================================================
    // Resources
    // =========================================================================
    /// Host allocation failed
    OutOfHostMemory,
    /// Device allocation failed
    OutOfDeviceMemory,
    /// Native object creation or instantiation failed
    OutOfResources,

    // =========================================================================
    // Lifecycle
    // =========================================================================
    /// Call is not legal in the object's current state
    InvalidOperation,

    // =========================================================================
    // Device
    // =========================================================================
    /// Scheduler can make no further progress
    DeviceLost,
    /// A kernel reported a failure while executing
    KernelFault,
}

impl Error {
    /// Taxonomy class of this error
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::InvalidValue
            | Self::InvalidSize
            | Self::InvalidWorkDimension
            | Self::InvalidWorkGroupSize
            | Self::InvalidKernel
            | Self::InvalidKernelArgs
            | Self::InvalidMemObject
            | Self::InvalidDevice
            | Self::InvalidQueue
            | Self::InvalidEvent
            | Self::InvalidNullHandle => ErrorClass::InvalidArgument,
            Self::UnsupportedFeature => ErrorClass::Unsupported,
            Self::OutOfHostMemory | Self::OutOfDeviceMemory | Self::OutOfResources => {
                ErrorClass::Resource
            },
            Self::InvalidOperation => ErrorClass::InvalidOperation,
            Self::DeviceLost | Self::KernelFault => ErrorClass::Device,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Arguments
            Self::InvalidValue => write!(f, "invalid value"),
            Self::InvalidSize => write!(f, "invalid size"),
            Self::InvalidWorkDimension => write!(f, "invalid work dimension"),
            Self::InvalidWorkGroupSize => write!(f, "invalid work-group size"),
            Self::InvalidKernel => write!(f, "invalid kernel"),
            Self::InvalidKernelArgs => write!(f, "kernel arguments not set"),
            Self::InvalidMemObject => write!(f, "invalid memory object"),
            Self::InvalidDevice => write!(f, "invalid device"),
            Self::InvalidQueue => write!(f, "invalid queue"),
            Self::InvalidEvent => write!(f, "invalid event"),
            Self::InvalidNullHandle => write!(f, "invalid or stale handle"),

            // Unsupported
            Self::UnsupportedFeature => write!(f, "feature not supported by back-end"),

            // Resources
            Self::OutOfHostMemory => write!(f, "out of host memory"),
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::OutOfResources => write!(f, "out of resources"),

            // Lifecycle
            Self::InvalidOperation => write!(f, "invalid operation"),

            // Device
            Self::DeviceLost => write!(f, "device lost"),
            Self::KernelFault => write!(f, "kernel fault"),
        }
    }
}

// =============================================================================
// ERROR CLASS
// =============================================================================

/// Coarse error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad argument; nothing was recorded
    InvalidArgument,
    /// No native equivalent; nothing was recorded
    Unsupported,
    /// Host or device allocation failure
    Resource,
    /// Wrong lifecycle state
    InvalidOperation,
    /// Failure observed while executing recorded work
    Device,
}

// =============================================================================
// STATUS
// =============================================================================

/// Outcome of an operation that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Recorded as requested
    #[default]
    Success,
    /// Recorded, but replaced by a weaker equivalent
    Degraded(DegradedReason),
}

impl Status {
    /// Check for a degraded outcome
    #[inline]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Why an operation was degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DegradedReason {
    /// Prefetch hint became a dependency-only node
    PrefetchIgnored,
    /// Memory advice became a dependency-only node
    AdviseIgnored,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrefetchIgnored => write!(f, "prefetch ignored"),
            Self::AdviseIgnored => write!(f, "memory advice ignored"),
        }
    }
}
