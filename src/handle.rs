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

use crate::{
    error::{Error, ErrorImpl},
    flags::OpenFlags,
    procfs::ProcfsHandle,
};

use std::{
    fs::File,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    path::{Path, PathBuf},
};

/// A handle to an existing filesystem object inside a [`Root`].
///
/// A `Handle` is an `O_PATH` file descriptor: it pins the inode it refers
/// to, but cannot be used for reading or writing by itself. To do actual
/// I/O, "upgrade" it with [`Handle::reopen`], which produces a regular
/// [`File`] referring to the same inode.
///
/// # Safety
///
/// It is critical that you never pass the underlying file descriptor of a
/// `Handle` to interfaces like `openat(2)` directly. The fd pins an inode,
/// not a path -- all path operations must go through a [`Root`].
///
/// [`Root`]: crate::Root
#[derive(Debug)]
pub struct Handle {
    inner: OwnedFd,
    name: PathBuf,
}

impl Handle {
    pub(crate) fn new(inner: OwnedFd, name: PathBuf) -> Self {
        Self { inner, name }
    }

    /// Wrap an [`OwnedFd`] into a [`Handle`] with the given advisory name.
    ///
    /// While this function is not `unsafe` (misuse cannot violate memory
    /// safety), the caller is responsible for the fd having the same
    /// semantics as one returned by [`Root::resolve`] -- usually this is
    /// only used to re-wrap an fd previously unwrapped with
    /// [`OwnedFd::from`] (possibly received from another process).
    ///
    /// [`Root::resolve`]: crate::Root::resolve
    pub fn from_fd_unchecked<Fd: Into<OwnedFd>>(fd: Fd, name: impl Into<PathBuf>) -> Self {
        Self {
            inner: fd.into(),
            name: name.into(),
        }
    }

    /// The advisory name of this handle -- the path by which it was
    /// obtained.
    ///
    /// The name is purely informational: the filesystem object may have
    /// been renamed since the handle was created, and nothing in securejoin
    /// makes decisions based on it.
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Create a copy of the handle.
    ///
    /// The new handle is completely independent of the original, but refers
    /// to the same underlying file.
    pub fn try_clone(&self) -> Result<Self, Error> {
        let inner = self
            .inner
            .try_clone()
            .map_err(|err| ErrorImpl::OsError {
                operation: "duplicate handle fd".into(),
                source: err,
            })?;
        Ok(Self {
            inner,
            name: self.name.clone(),
        })
    }

    /// "Upgrade" the handle to a usable [`File`].
    ///
    /// The new [`File`] is re-opened through the procfs `thread-self/fd`
    /// magic-link (after verifying it is not overmounted), so it refers to
    /// exactly the same inode as the handle, with the requested flags.
    /// `O_CLOEXEC` is always set; do not pass `O_NOFOLLOW` (the magic-link
    /// itself must be followed for the re-open to work).
    ///
    /// A fresh [`ProcfsHandle`] is constructed for (and dropped at the end
    /// of) every call.
    pub fn reopen(&self, flags: impl Into<OpenFlags>) -> Result<File, Error> {
        let procfs = ProcfsHandle::new()?;
        self.reopen_with(&procfs, flags)
    }

    pub(crate) fn reopen_with(
        &self,
        procfs: &ProcfsHandle,
        flags: impl Into<OpenFlags>,
    ) -> Result<File, Error> {
        procfs
            .reopen(self.inner.as_fd(), flags.into())
            .map(File::from)
    }
}

impl AsFd for Handle {
    /// Access the underlying file descriptor.
    ///
    /// This is intended for tests and fd-passing; it is not safe to use the
    /// returned [`BorrowedFd`] for filesystem operations directly.
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl From<Handle> for OwnedFd {
    /// Unwrap the [`Handle`] into its underlying [`OwnedFd`].
    ///
    /// This is intended for file descriptor passing; if you want a [`File`]
    /// for regular I/O, use [`Handle::reopen`] instead.
    fn from(handle: Handle) -> Self {
        handle.inner
    }
}

#[cfg(test)]
mod tests {
    use crate::{flags::OpenFlags, utils::FdExt, Root};

    use std::{io::Read, os::unix::io::{AsFd, AsRawFd}};

    use anyhow::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn reopen_same_inode() -> Result<(), Error> {
        let root = Root::open("/etc")?;
        let handle = root.resolve("passwd")?;

        let mut file = handle.reopen(OpenFlags::O_RDONLY)?;
        let handle_stat = handle.as_fd().stat()?;
        let file_stat = file.as_fd().stat()?;
        assert_eq!(
            (handle_stat.st_dev, handle_stat.st_ino),
            (file_stat.st_dev, file_stat.st_ino),
            "reopened file should refer to the same inode as the handle"
        );

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        assert!(
            contents.contains("root"),
            "/etc/passwd should mention root"
        );
        Ok(())
    }

    #[test]
    fn try_clone_same_inode() -> Result<(), Error> {
        let root = Root::open("/etc")?;
        let handle = root.resolve("passwd")?;
        let cloned = handle.try_clone()?;

        assert_ne!(
            handle.as_fd().as_raw_fd(),
            cloned.as_fd().as_raw_fd(),
            "cloned handle should have its own fd"
        );
        assert_eq!(
            handle.name(),
            cloned.name(),
            "cloned handle should keep the advisory name"
        );

        let orig_stat = handle.as_fd().stat()?;
        let clone_stat = cloned.as_fd().stat()?;
        assert_eq!(
            (orig_stat.st_dev, orig_stat.st_ino),
            (clone_stat.st_dev, clone_stat.st_ino),
            "cloned handle should refer to the same inode"
        );
        Ok(())
    }

    #[test]
    fn reopen_name_inherited() -> Result<(), Error> {
        let root = Root::open("/etc")?;
        let handle = root.resolve("passwd")?;
        assert_eq!(
            handle.name(),
            std::path::Path::new("/etc/passwd"),
            "handle name should reflect how it was obtained"
        );
        Ok(())
    }
}
