//! Centralized error handling for objstream.
//!
//! Every failure the engine can surface is a [`StreamError`]. The type is `Clone`
//! because two parts of the engine have to keep an error around after it was raised:
//!
//! - the read-side handle table records a deferred class-resolution failure against a
//!   handle and hands out copies to every dependent object that later touches it;
//! - the descriptor cache memoizes a failed descriptor construction so that every
//!   subsequent lookup of the same type fails the same way.
//!
//! ## Error Categories
//!
//! - **Format** ([`StreamError::StreamCorrupted`], [`StreamError::UtfDataFormat`]): the byte
//!   stream violates the wire format. Always fatal for the current session.
//! - **Type resolution** ([`StreamError::ClassNotFound`], [`StreamError::InvalidClass`]):
//!   deferred per handle on read, immediate on write.
//! - **Admission control**: filter rejections surface as [`StreamError::InvalidClass`].
//! - **Hooks** ([`StreamError::Custom`]): user errors wrapped by [`StreamError::custom`];
//!   any `StreamError` returned by a hook is passed through untouched.
//! - **I/O** ([`StreamError::Io`]): failures of the underlying sink or source.
//!
//! ```rust
//! use objstream::{ObjStream, StreamError, Value};
//!
//! let bytes = ObjStream::to_bytes(&Value::from("hello"))?;
//! match ObjStream::from_bytes(&bytes[..3]) {
//!     Err(StreamError::Io(e)) => println!("truncated: {e}"),
//!     Err(e) => println!("other: {e}"),
//!     Ok(_) => unreachable!(),
//! }
//! # Ok::<(), objstream::StreamError>(())
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for objstream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// The master error enum covering all failure domains of the engine.
#[derive(Debug, Clone)]
pub enum StreamError {
    /// Failure of the underlying byte sink or source.
    ///
    /// Wrapped in an `Arc` so the error stays `Clone`.
    Io(Arc<io::Error>),

    /// The stream violates the wire format: bad magic, unknown tag, illegal handle,
    /// malformed block header, unexpected reset, truncated block.
    StreamCorrupted(String),

    /// A class descriptor is unusable: version mismatch, conflicting flags, illegal field
    /// order, filter rejection, missing allocation factory.
    InvalidClass {
        /// The class the problem was detected on, when known.
        class: Option<String>,
        /// Human-readable description.
        reason: String,
    },

    /// A class named by the stream could not be resolved locally.
    ClassNotFound(String),

    /// An attempt was made to write an instance of a type that is not serializable.
    NotSerializable(String),

    /// The reconstructed graph is invalid: failed validation, back-reference to an
    /// unshared object, missing enum constant.
    InvalidObject(String),

    /// Object read attempted while primitive data (or the end of custom data) is next.
    OptionalData {
        /// Number of bytes of primitive data immediately readable.
        length: usize,
        /// `true` if no more data is available in the current custom-data section.
        eof: bool,
    },

    /// The writer aborted and recorded a terminal failure record in the stream.
    WriteAborted(String),

    /// A hook-only operation was called outside of the corresponding hook.
    NotActive(String),

    /// Malformed modified UTF-8 data, or a string too long for its length prefix.
    UtfDataFormat(String),

    /// A value read from the stream cannot be assigned to the local field or slot.
    ClassCast(String),

    /// A programming error against the stream state (e.g. leaving block mode with unread
    /// block data, changing the protocol version of a non-empty stream).
    IllegalState(String),

    /// An error raised by user hook code.
    Custom(Arc<dyn std::error::Error + Send + Sync>),

    /// Logic error inside the engine. Should not occur.
    Internal(String),
}

impl StreamError {
    /// Wraps an arbitrary user error so it can be returned from a hook.
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(err))
    }

    /// Shorthand for [`StreamError::InvalidClass`] bound to a class name.
    pub fn invalid_class(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidClass {
            class: Some(class.into()),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`StreamError::InvalidClass`] without a class name.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidClass {
            class: None,
            reason: reason.into(),
        }
    }

    /// Shorthand for [`StreamError::StreamCorrupted`].
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::StreamCorrupted(reason.into())
    }

    /// Returns `true` if the error is a premature end of the underlying source.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    /// The unexpected-end-of-file error used by the block framer.
    pub(crate) fn eof() -> Self {
        Self::Io(Arc::new(io::Error::from(io::ErrorKind::UnexpectedEof)))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::StreamCorrupted(s) => write!(f, "stream corrupted: {s}"),
            Self::InvalidClass {
                class: Some(c),
                reason,
            } => write!(f, "invalid class {c}: {reason}"),
            Self::InvalidClass { class: None, reason } => write!(f, "invalid class: {reason}"),
            Self::ClassNotFound(s) => write!(f, "class not found: {s}"),
            Self::NotSerializable(s) => write!(f, "not serializable: {s}"),
            Self::InvalidObject(s) => write!(f, "invalid object: {s}"),
            Self::OptionalData { length, eof } => {
                write!(f, "optional data: length={length}, eof={eof}")
            }
            Self::WriteAborted(s) => write!(f, "writing aborted: {s}"),
            Self::NotActive(s) => write!(f, "not active: {s}"),
            Self::UtfDataFormat(s) => write!(f, "UTF data format: {s}"),
            Self::ClassCast(s) => write!(f, "class cast: {s}"),
            Self::IllegalState(s) => write!(f, "illegal state: {s}"),
            Self::Custom(e) => write!(f, "hook error: {e}"),
            Self::Internal(s) => write!(f, "internal logic error: {s}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            Self::Custom(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
