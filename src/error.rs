use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants map onto the failure classes of the hooking pipeline:
///
/// ## Format Errors (fatal)
/// - [`Error::Malformed`] - Corrupted or inconsistent binary structure
/// - [`Error::OutOfBounds`] - Attempted to read or write beyond a buffer boundary
/// - [`Error::InvalidMagic`] - The metadata blob does not start with `0xFAB11BAF`
/// - [`Error::UnsupportedVersion`] - The metadata blob uses a revision other than 29
/// - [`Error::NotSupported`] - A well-formed input uses a feature outside of the supported set
///
/// ## Resolution Errors
/// - [`Error::UnresolvedReference`] - An expected artifact is missing from its container (fatal)
/// - [`Error::StructureNotFound`] - The code registration search found no candidate (fatal)
/// - [`Error::HookUnresolved`] - A hook target is not part of the script index (non-fatal)
///
/// ## Editing Errors
/// - [`Error::EditBounds`] - A module edit referenced a nonexistent entry
/// - [`Error::InvalidHandle`] - A deferred handle was used before or outside of its resolution
///
/// ## Session and I/O Errors
/// - [`Error::SessionState`] - A runtime operation was invoked in the wrong lifecycle state
/// - [`Error::Host`] - The host engine failed to instantiate or call into the module
/// - [`Error::FileError`] / [`Error::Serialization`] - Cache and file access failures
///
/// # Examples
///
/// ```rust
/// use webmodkit::{Error, metadata::Metadata};
///
/// let mut blob = vec![0u8; 256];
/// blob[..4].copy_from_slice(&0xFAB1_1BAFu32.to_le_bytes());
/// blob[4..8].copy_from_slice(&30u32.to_le_bytes());
///
/// match Metadata::decode(&blob, &["Assembly-CSharp.dll"]) {
///     Err(Error::UnsupportedVersion(version)) => assert_eq!(version, 30),
///     other => panic!("unexpected result: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The data is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted.
    ///
    /// Raised by every cursor read, seek and fixed-capacity write that would leave the
    /// underlying buffer.
    #[error("Out of Bound access would have occurred!")]
    OutOfBounds,

    /// The metadata blob does not carry the expected sanity value.
    #[error("Metadata file supplied is not a valid metadata file - sanity {0:#010x}")]
    InvalidMagic(u32),

    /// The metadata blob is well-formed but of an unsupported revision.
    ///
    /// Only a single revision is understood; every other value is rejected before any
    /// table is read.
    #[error("Metadata file supplied is not a supported version [{0}]")]
    UnsupportedVersion(u32),

    /// The input uses a feature outside of the supported subset.
    #[error("Not supported - {0}")]
    NotSupported(String),

    /// An expected binary artifact is absent from its container.
    ///
    /// Typically the global metadata node missing from the web data bundle, which happens
    /// when the game is encrypted or packaged in an unexpected way.
    #[error("Unresolved reference - {0}")]
    UnresolvedReference(String),

    /// The code registration structure could not be located in the memory image.
    ///
    /// Without it no function pointer can be recovered, so this aborts the pipeline.
    #[error("Unable to locate the code registration structure")]
    StructureNotFound,

    /// A hook target is missing from the script index.
    ///
    /// This error is reported per hook and never aborts the patch pass.
    #[error("Unable to resolve hook target {type_name}::{method_name}")]
    HookUnresolved {
        /// Full name of the targeted type
        type_name: String,
        /// Name of the targeted method
        method_name: String,
    },

    /// A module edit referenced an entry that does not exist.
    #[error("Edit out of bounds - {section} entry {index} (count {count})")]
    EditBounds {
        /// Name of the section being edited
        section: &'static str,
        /// The requested entry index
        index: u32,
        /// The number of entries available
        count: u32,
    },

    /// A deferred handle could not be resolved.
    #[error("Handle {0} has not been resolved")]
    InvalidHandle(u32),

    /// A runtime operation was called in the wrong lifecycle state.
    #[error("Invalid session state - {0}")]
    SessionState(String),

    /// The host engine reported a failure.
    #[error("Host error - {0}")]
    Host(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Cache record (de)serialization error.
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}
