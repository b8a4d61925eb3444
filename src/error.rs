// Copyright (c) SimpleStaking, Viable Systems and Tezedge Contributors
// SPDX-License-Identifier: MIT

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("process {0} not found")]
    ProcessNotFound(u32),
    #[error("target process vanished during collection")]
    TargetLost,
    #[error("permission denied on {0}, elevated access required")]
    PermissionDenied(String),
    #[error("malformed kernel record in {file}: {reason}")]
    MalformedKernelRecord { file: String, reason: String },
    #[error("interrupted by operator")]
    Interrupted,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

const ESRCH: i32 = 3;

impl Error {
    /// Classify an io error from a kernel pseudo-file that is not tied to the
    /// lifetime of the target process.
    pub(crate) fn from_io(error: io::Error, path: &str) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_string()),
            _ => Error::Io(error),
        }
    }

    /// Classify an io error from one of the target's `/proc/<pid>/` files.
    /// The files disappear (or yield ESRCH) as soon as the target exits.
    pub(crate) fn probe(error: io::Error, path: &str) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Error::TargetLost,
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_string()),
            _ => match error.raw_os_error() {
                Some(ESRCH) => Error::TargetLost,
                _ => Error::Io(error),
            },
        }
    }

    pub(crate) fn malformed(file: &str, reason: &str) -> Self {
        Error::MalformedKernelRecord {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use super::{Error, ESRCH};

    #[test]
    fn vanished_target_maps_to_target_lost() {
        let e = Error::probe(io::Error::from(io::ErrorKind::NotFound), "/proc/1234/pagemap");
        assert!(matches!(e, Error::TargetLost));

        let e = Error::probe(io::Error::from_raw_os_error(ESRCH), "/proc/1234/pagemap");
        assert!(matches!(e, Error::TargetLost));
    }

    #[test]
    fn privilege_failure_is_not_target_lost() {
        let e = Error::probe(
            io::Error::from(io::ErrorKind::PermissionDenied),
            "/proc/kpageflags",
        );
        assert!(matches!(e, Error::PermissionDenied(_)));
    }
}
