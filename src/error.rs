// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use std::io;
use thiserror::Error;

/// Result type alias used by the fallible parts of the public API.
pub type Result<T> = std::result::Result<T, LooperError>;

/// Composite error type for everything the looper can reject or fail at.
///
/// Infrastructure failures that leave the loop unable to function at all
/// (no backend, no wake channel) are not represented here; those abort,
/// because a loop that cannot be nudged is not recoverable.
#[derive(Error, Debug)]
pub enum LooperError {
    /// IO error from the readiness backend.
    #[error("IO error occurred: {0}")]
    IoError(#[from] io::Error),

    /// A registration without a callback was attempted on a loop that was
    /// not prepared with [`PrepareOpts::ALLOW_NON_CALLBACKS`].
    ///
    /// [`PrepareOpts::ALLOW_NON_CALLBACKS`]: crate::PrepareOpts::ALLOW_NON_CALLBACKS
    #[error("non-callback registrations are not allowed for this looper")]
    NonCallbacksNotAllowed,

    /// A registration without a callback used a negative identifier, which
    /// is reserved for callback mode.
    #[error("a registration without a callback requires an identifier >= 0 (got {ident})")]
    InvalidIdent {
        /// The rejected identifier.
        ident: i32,
    },
}

impl LooperError {
    /// The raw OS error number, if this error wraps one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            LooperError::IoError(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;

    #[test]
    fn io_error_msg() {
        let err: LooperError = io::Error::from_raw_os_error(libc::ENOENT).into();
        assert!(err.to_string().starts_with("IO error occurred"));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn non_callbacks_not_allowed_msg() {
        let err = LooperError::NonCallbacksNotAllowed;
        assert_eq!(
            err.to_string(),
            "non-callback registrations are not allowed for this looper"
        );
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn invalid_ident_msg() {
        let err = LooperError::InvalidIdent { ident: -7 };
        assert_eq!(
            err.to_string(),
            "a registration without a callback requires an identifier >= 0 (got -7)"
        );
    }
}
