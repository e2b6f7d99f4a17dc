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

use crate::syscalls::{self, Error as SyscallError};

use std::{
    os::unix::io::BorrowedFd,
    path::{Path, PathBuf},
};

use rustix::fs::{Access, AtFlags};

/// An *unverified* reference to the root of a procfs mount.
///
/// This exists for the bootstrap problem: some probes (like figuring out
/// which `/proc/thread-self` fallback to use) have to happen while a
/// [`ProcfsHandle`] is still being constructed, or against a candidate fd
/// that has not been verified yet. Nothing accessed through this type may be
/// used for a safety decision -- it only answers "does this path appear to
/// exist" style questions.
///
/// [`ProcfsHandle`]: crate::procfs::ProcfsHandle
#[derive(Clone, Copy, Debug)]
pub(crate) enum RawProcfsRoot<'fd> {
    /// The host's `/proc`, looked up through the current mount namespace.
    UnsafeGlobal,
    /// A (not yet verified) procfs root file descriptor.
    UnsafeFd(BorrowedFd<'fd>),
}

impl RawProcfsRoot<'_> {
    /// Check whether `subpath` exists below this procfs root, without
    /// following a trailing symlink.
    pub(crate) fn exists_unchecked(&self, subpath: impl AsRef<Path>) -> Result<(), SyscallError> {
        let subpath = subpath.as_ref();
        match *self {
            Self::UnsafeGlobal => syscalls::accessat(
                syscalls::CWD,
                PathBuf::from("/proc").join(subpath),
                Access::EXISTS,
                AtFlags::SYMLINK_NOFOLLOW,
            ),
            Self::UnsafeFd(fd) => {
                syscalls::accessat(fd, subpath, Access::EXISTS, AtFlags::SYMLINK_NOFOLLOW)
            }
        }
    }

    /// Read a symlink below this procfs root, without any verification.
    pub(crate) fn readlink_unchecked(
        &self,
        subpath: impl AsRef<Path>,
    ) -> Result<PathBuf, SyscallError> {
        let subpath = subpath.as_ref();
        match *self {
            Self::UnsafeGlobal => {
                syscalls::readlinkat(syscalls::CWD, PathBuf::from("/proc").join(subpath))
            }
            Self::UnsafeFd(fd) => syscalls::readlinkat(fd, subpath),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_global_exists() {
        assert!(
            RawProcfsRoot::UnsafeGlobal.exists_unchecked("self").is_ok(),
            "/proc/self should exist"
        );
        assert!(
            RawProcfsRoot::UnsafeGlobal
                .exists_unchecked("definitely-not-a-procfs-file")
                .is_err(),
            "non-existent procfs path should fail the probe"
        );
    }

    #[test]
    fn unsafe_fd_exists() {
        let proc = std::fs::File::open("/proc").expect("open /proc");
        let proc_rootfd = RawProcfsRoot::UnsafeFd(std::os::unix::io::AsFd::as_fd(&proc));
        assert!(
            proc_rootfd.exists_unchecked("self").is_ok(),
            "self should exist below a procfs rootfd"
        );
    }
}
