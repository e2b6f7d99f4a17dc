// SPDX-License-Identifier: MPL-2.0 OR LGPL-3.0-or-later
/*
 * securejoin: race-safe path resolution inside untrusted roots
 * Copyright (C) 2019-2025 Aleksa Sarai <cyphar@cyphar.com>
 * Copyright (C) 2019-2025 SUSE LLC
 *
 * == MPL-2.0 ==
 *
 *  This Source Code Form is subject to the terms of the Mozilla Public
 *  License, v. 2.0. If a copy of the MPL was not distributed with this
 *  file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * Alternatively, this Source Code Form may also (at your option) be used
 * under the terms of the GNU Lesser General Public License Version 3, as
 * described below:
 *
 * == LGPL-3.0-or-later ==
 *
 *  This program is free software: you can redistribute it and/or modify it
 *  under the terms of the GNU Lesser General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or (at
 *  your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful, but
 *  WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY  or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General
 * Public License  for more details.
 *
 *  You should have received a copy of the GNU Lesser General Public License
 *  along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![forbid(unsafe_code)]

//! Error types for securejoin.

use crate::{resolvers::opath::SymlinkStackError, syscalls::Error as SyscallError};

use std::{borrow::Cow, io::Error as IOError, path::PathBuf};

/// Opaque error type for securejoin.
///
/// If you wish to do non-trivial error handling with securejoin errors, use
/// [`Error::kind`] to get an [`ErrorKind`] you can handle programmatically.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] Box<ErrorImpl>);

impl<E: Into<ErrorImpl>> From<E> for Error {
    #[doc(hidden)]
    fn from(err: E) -> Self {
        Self(Box::new(err.into()))
    }
}

impl Error {
    /// Get the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// Returns whether this error indicates that the requested path (or one
    /// of its components) did not exist.
    ///
    /// This is intentionally broader than checking for `ENOENT` -- lookups
    /// that walked through a non-directory return `ENOTDIR` from the kernel,
    /// and operations that raced with a directory being deleted return the
    /// dead-inode error kinds. All of them mean "the thing you asked for is
    /// not there", no matter how many layers of context have been wrapped
    /// around the original error.
    pub fn is_not_exist(&self) -> bool {
        matches!(
            self.kind().errno(),
            Some(libc::ENOENT) | Some(libc::ENOTDIR)
        )
    }

    /// Shorthand for [`.kind().can_retry()`](ErrorKind::can_retry).
    pub fn can_retry(&self) -> bool {
        self.0.kind().can_retry()
    }

    pub(crate) fn is_safety_violation(&self) -> bool {
        self.0.is_safety_violation()
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ErrorImpl {
    #[error("feature {feature} not supported by the system")]
    NotSupported { feature: Cow<'static, str> },

    #[error("invalid {name} argument: {description}")]
    InvalidArgument {
        name: Cow<'static, str>,
        description: Cow<'static, str>,
    },

    #[error("root path {root:?} contains a '..' component")]
    UnsafeRoot { root: PathBuf },

    #[error("mode 0o{mode:o} contains bits other than the permission and sticky bits")]
    InvalidMode { mode: u32 },

    #[error("possible breakout detected: {description}")]
    PossibleBreakout { description: Cow<'static, str> },

    #[error("possible attack detected: {description}")]
    PossibleAttack { description: Cow<'static, str> },

    #[error("procfs handle is not safe to use: {description}")]
    UnsafeProcfs { description: Cow<'static, str> },

    #[error("current directory is invalid: {description}")]
    InvalidDirectory { description: Cow<'static, str> },

    #[error("inode has been deleted: {description}")]
    DeletedInode { description: Cow<'static, str> },

    #[error("exceeded maximum symlink traversal limit: {description}")]
    SymlinkLoop { description: Cow<'static, str> },

    #[error("broken symlink stack during iteration: {description}")]
    BadSymlinkStack {
        description: Cow<'static, str>,
        source: SymlinkStackError,
    },

    #[error("{operation} failed")]
    OsError {
        operation: Cow<'static, str>,
        source: IOError,
    },

    #[error("{operation} failed")]
    RawOsError {
        operation: Cow<'static, str>,
        source: SyscallError,
    },

    #[error("integer parsing failed")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{context}")]
    Wrapped {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

/// Underlying error class for securejoin errors.
///
/// This is similar in concept to [`std::io::ErrorKind`], except that several
/// of the kinds describe failure modes specific to in-root path resolution
/// (such as a detected rename attack during `mkdir_all`).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The requested feature is not supported by the system.
    NotSupported,
    /// The provided arguments were invalid.
    InvalidArgument,
    /// The caller's root path contained a `..` component.
    UnsafeRoot,
    /// The mode passed to a mkdir operation contained bits other than the
    /// lower permission bits and the sticky bit.
    InvalidMode,
    /// A `..` verification (or a mount-id check during resolution) failed,
    /// meaning that a racing attacker may have moved components of the path
    /// out of the root during the walk.
    PossibleBreakout,
    /// A directory created by `mkdir_all` was swapped for a different inode
    /// before we could get a handle to it.
    PossibleAttack,
    /// The procfs handle failed verification, or an overmount was detected
    /// on top of a procfs path we needed to operate on.
    UnsafeProcfs,
    /// A directory we were operating on was observed with a zero link count
    /// (it was deleted while we held a handle to it).
    InvalidDirectory,
    /// A file we were operating on was observed with a zero link count.
    DeletedInode,
    /// The symlink traversal budget was exceeded during resolution.
    SymlinkLoop,
    /// Some internal error occurred. For more information, see the string
    /// description of the original [`Error`].
    InternalError,
    /// The underlying error came from a system call. The wrapped value is
    /// the numerical `errno` value, if available.
    OsError(Option<i32>),
}

impl ErrorImpl {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::UnsafeRoot { .. } => ErrorKind::UnsafeRoot,
            Self::InvalidMode { .. } => ErrorKind::InvalidMode,
            Self::PossibleBreakout { .. } => ErrorKind::PossibleBreakout,
            Self::PossibleAttack { .. } => ErrorKind::PossibleAttack,
            Self::UnsafeProcfs { .. } => ErrorKind::UnsafeProcfs,
            Self::InvalidDirectory { .. } => ErrorKind::InvalidDirectory,
            Self::DeletedInode { .. } => ErrorKind::DeletedInode,
            Self::SymlinkLoop { .. } => ErrorKind::SymlinkLoop,
            // Any syscall-related errors get mapped to an OsError, since the
            // distinction doesn't matter to users checking error values.
            Self::OsError { source, .. } => ErrorKind::OsError(source.raw_os_error()),
            Self::RawOsError { source, .. } => {
                ErrorKind::OsError(source.root_cause().raw_os_error())
            }
            // These errors are internal error types that we don't want to
            // expose outside of the crate. All that matters to users is that
            // there was some internal error.
            Self::BadSymlinkStack { .. } | Self::ParseIntError(_) => ErrorKind::InternalError,

            Self::Wrapped { source, .. } => source.kind(),
        }
    }

    pub(crate) fn is_safety_violation(&self) -> bool {
        self.kind().is_safety_violation()
    }
}

impl ErrorKind {
    /// Return a C-like errno for the [`ErrorKind`].
    ///
    /// Aside from fetching the errno represented by standard
    /// [`ErrorKind::OsError`] errors, pure-Rust errors are also mapped to C
    /// errno values where appropriate. In particular, the attack-detection
    /// kinds are all mapped to `EXDEV` for compatibility with callers that
    /// match on the cross-device errno of the in-kernel resolver.
    pub(crate) fn errno(&self) -> Option<i32> {
        match self {
            ErrorKind::NotSupported => Some(libc::ENOSYS),
            ErrorKind::InvalidArgument | ErrorKind::UnsafeRoot | ErrorKind::InvalidMode => {
                Some(libc::EINVAL)
            }
            ErrorKind::PossibleBreakout
            | ErrorKind::PossibleAttack
            | ErrorKind::UnsafeProcfs => Some(libc::EXDEV),
            ErrorKind::InvalidDirectory | ErrorKind::DeletedInode => Some(libc::ENOENT),
            ErrorKind::SymlinkLoop => Some(libc::ELOOP),
            ErrorKind::OsError(errno) => *errno,
            _ => None,
        }
    }

    /// Indicates whether an [`ErrorKind`] was associated with a transient
    /// error and that the operation might succeed if retried.
    ///
    /// Callers can make use of this if they wish to have custom retry logic.
    pub fn can_retry(&self) -> bool {
        matches!(self.errno(), Some(libc::EAGAIN) | Some(libc::EINTR))
    }

    pub(crate) fn is_safety_violation(&self) -> bool {
        self.errno() == Some(libc::EXDEV)
    }
}

// Private trait necessary to work around the "orphan trait" restriction.
pub(crate) trait ErrorExt: Sized {
    /// Wrap a `Result<..., Error>` with an additional context string.
    fn wrap<S: Into<String>>(self, context: S) -> Self {
        self.with_wrap(|| context.into())
    }

    /// Wrap a `Result<..., Error>` with an additional context string created
    /// by a closure.
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String;
}

impl ErrorExt for ErrorImpl {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self::Wrapped {
            context: context_fn().into(),
            source: self.into(),
        }
    }
}

impl ErrorExt for Error {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.0.with_wrap(context_fn).into()
    }
}

impl<T, E: ErrorExt> ErrorExt for Result<T, E> {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| err.with_wrap(context_fn))
    }
}
