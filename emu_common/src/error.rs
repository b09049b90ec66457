//! Error taxonomy for the emulator runtime.
//!
//! Errors cross the runtime boundary as negative errno-class integers; the
//! typed API uses `CoreError`. Submissions that cannot be queued are
//! reported through the error-id encoding so raw callers can detect
//! failure without extra state.

use thiserror::Error;

use crate::consts::ERROR_ID_PREFIX;
use crate::klass::Klass;

/// Errors produced by the runtime and by object constructors.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Out-of-range klass, malformed config, bad command argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// `(klass, name)` already present in the registry.
    #[error("duplicate object: {klass}/{name}")]
    Duplicate {
        /// Klass of the rejected object.
        klass: Klass,
        /// Name of the rejected object.
        name: String,
    },

    /// Allocation failed.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// A command is already active on the target object.
    #[error("object busy: {0}")]
    Busy(String),

    /// No factory registered for the klass.
    #[error("factory load failure: {0}")]
    LoadFailure(String),

    /// An object's `init` returned an error.
    #[error("init failed for {object}: {reason}")]
    InitFailure {
        /// `klass/name` of the failing object.
        object: String,
        /// Failure description.
        reason: String,
    },

    /// Retryable pressure condition (queue or ring growth failure).
    #[error("transient failure: {0}")]
    Transient(String),

    /// The object does not implement the requested operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Config blob decode error.
    #[error("config error: {source}")]
    Config {
        /// Source decode error.
        #[from]
        source: serde_json::Error,
    },
}

/// Result alias for runtime operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Negative errno-class code for the runtime boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) | Self::Config { .. } => -libc::EINVAL,
            Self::NotFound(_) => -libc::ENOENT,
            Self::Duplicate { .. } => -libc::EEXIST,
            Self::NoMemory(_) => -libc::ENOMEM,
            Self::Busy(_) => -libc::EBUSY,
            Self::LoadFailure(_) => -libc::ENODEV,
            Self::InitFailure { .. } => -libc::EIO,
            Self::Transient(_) => -libc::EAGAIN,
            Self::NotSupported(_) => -libc::ENOTSUP,
        }
    }
}

/// Encode a negative errno as an error id: `(0xDEADBEEF << 32) | (-errno)`.
#[inline]
pub const fn error_id(errno: i32) -> u64 {
    (ERROR_ID_PREFIX << 32) | (errno.unsigned_abs() as u64)
}

/// True if `id` carries the error-id prefix.
#[inline]
pub const fn is_error_id(id: u64) -> bool {
    (id >> 32) == ERROR_ID_PREFIX
}

/// Recover the negative errno from an error id.
#[inline]
pub const fn error_id_errno(id: u64) -> i32 {
    -((id & 0xFFFF_FFFF) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(CoreError::InvalidArgument("x".into()).errno(), -libc::EINVAL);
        assert_eq!(CoreError::NotFound("x".into()).errno(), -libc::ENOENT);
        assert_eq!(
            CoreError::Duplicate {
                klass: Klass::Stepper,
                name: "s1".into()
            }
            .errno(),
            -libc::EEXIST
        );
        assert_eq!(CoreError::Busy("x".into()).errno(), -libc::EBUSY);
        assert_eq!(CoreError::Transient("x".into()).errno(), -libc::EAGAIN);
    }

    #[test]
    fn error_id_roundtrip() {
        let id = error_id(-libc::ENOMEM);
        assert!(is_error_id(id));
        assert_eq!(error_id_errno(id), -libc::ENOMEM);
        assert_eq!(id >> 32, 0xDEAD_BEEF);
    }

    #[test]
    fn ordinary_ids_are_not_error_ids() {
        assert!(!is_error_id(1));
        assert!(!is_error_id(u32::MAX as u64));
    }
}
