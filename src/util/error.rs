//! Error types for micromap baking.

use std::fmt;
use thiserror::Error;

/// Status codes reported by the graphics device.
///
/// Discriminants follow the native API's result codes so they can be passed
/// through to an embedding application unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeResult {
    Success,
    Incomplete,
    ErrorOutOfHostMemory,
    ErrorOutOfDeviceMemory,
    ErrorInitializationFailed,
    ErrorFeatureNotPresent,
    ErrorFormatNotSupported,
    ErrorUnknown,
}

impl NativeResult {
    /// Raw native result code.
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Incomplete => 5,
            Self::ErrorOutOfHostMemory => -1,
            Self::ErrorOutOfDeviceMemory => -2,
            Self::ErrorInitializationFailed => -3,
            Self::ErrorFeatureNotPresent => -8,
            Self::ErrorFormatNotSupported => -11,
            Self::ErrorUnknown => -13,
        }
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Negative codes are errors; positive codes are non-fatal statuses.
    #[inline]
    pub const fn is_error(self) -> bool {
        self.as_raw() < 0
    }
}

impl fmt::Display for NativeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Incomplete => "INCOMPLETE",
            Self::ErrorOutOfHostMemory => "ERROR_OUT_OF_HOST_MEMORY",
            Self::ErrorOutOfDeviceMemory => "ERROR_OUT_OF_DEVICE_MEMORY",
            Self::ErrorInitializationFailed => "ERROR_INITIALIZATION_FAILED",
            Self::ErrorFeatureNotPresent => "ERROR_FEATURE_NOT_PRESENT",
            Self::ErrorFormatNotSupported => "ERROR_FORMAT_NOT_SUPPORTED",
            Self::ErrorUnknown => "ERROR_UNKNOWN",
        };
        write!(f, "{} ({})", name, self.as_raw())
    }
}

/// Result of a raw device call.
pub type DeviceResult<T> = std::result::Result<T, NativeResult>;

/// Main error type for heightmap baking.
#[derive(Error, Debug)]
pub enum Error {
    /// Input layout the baker cannot consume (index type, texcoord format, stride...)
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// Subdivision level above what the packed format can hold
    #[error("Subdivision level {level} exceeds maximum of {max}")]
    SubdivisionLevel { level: u32, max: u32 },

    /// Mesh with zero triangles; nothing to bake
    #[error("Mesh has no triangles")]
    EmptyMesh,

    /// No pipeline, or the device function table could not be loaded
    #[error("Pipeline is not initialized")]
    NotInitialized,

    /// A device call reported failure
    #[error("Device call failed: {0}")]
    Native(NativeResult),

    /// Heightmap texels could not be used
    #[error("Invalid heightmap: {0}")]
    InvalidHeightmap(String),

    /// Bad bake configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an unsupported input error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedInput(msg.into())
    }

    /// Native status an embedding application should see for this error.
    pub fn status(&self) -> NativeResult {
        match self {
            Self::UnsupportedInput(_) | Self::SubdivisionLevel { .. } => {
                NativeResult::ErrorFormatNotSupported
            }
            Self::EmptyMesh => NativeResult::Incomplete,
            Self::NotInitialized => NativeResult::ErrorInitializationFailed,
            Self::Native(result) => *result,
            _ => NativeResult::ErrorUnknown,
        }
    }

    /// True when the request was valid but there was nothing to do.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::EmptyMesh)
    }
}

impl From<NativeResult> for Error {
    fn from(result: NativeResult) -> Self {
        Self::Native(result)
    }
}

/// Result type alias for baking operations.
pub type Result<T> = std::result::Result<T, Error>;
