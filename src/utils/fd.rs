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
    procfs::ProcfsHandle,
    syscalls,
};

use std::{
    os::unix::io::{AsFd, AsRawFd},
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use rustix::fs::{self as rustix_fs, AtFlags, FileType, Stat, StatxFlags};

/// `STATX_MNT_ID_UNIQUE` (Linux 6.8), the reuse-resistant form of the mount
/// id. Not yet exposed by all libc versions, so defined here.
const STATX_MNT_ID_UNIQUE: u32 = 0x4000;

/// Full mount-id mask -- we always request the unique form and accept
/// whichever of the two the kernel gives us.
fn statx_mnt_id_mask() -> StatxFlags {
    StatxFlags::MNT_ID | StatxFlags::from_bits_retain(STATX_MNT_ID_UNIQUE)
}

/// Whether the running kernel fills in the `statx(2)` mount-id field
/// (Linux 5.8 for `STATX_MNT_ID`). Evaluated at most once per process.
///
/// There is *no fallback* when this is false -- mount-id comparisons are
/// simply skipped, which matches the protection available on such kernels.
// MSRV(1.80): Use LazyLock.
static HAS_STATX_MNT_ID: Lazy<bool> = Lazy::new(|| {
    match syscalls::statx(syscalls::CWD, ".", AtFlags::empty(), statx_mnt_id_mask()) {
        Ok(stx) => stx.stx_mask & statx_mnt_id_mask().bits() != 0,
        Err(_) => false,
    }
});

/// Get the mount id of the filesystem object at `(dirfd, path)` (the empty
/// path means `dirfd` itself), or `None` if the kernel cannot tell us.
pub(crate) fn fetch_mnt_id(
    dirfd: impl AsFd,
    path: impl AsRef<Path>,
) -> Result<Option<u64>, Error> {
    if !*HAS_STATX_MNT_ID {
        return Ok(None);
    }

    let stx = syscalls::statx(
        dirfd,
        path,
        AtFlags::EMPTY_PATH | AtFlags::SYMLINK_NOFOLLOW,
        statx_mnt_id_mask(),
    )
    .map_err(|err| ErrorImpl::RawOsError {
        operation: "get mount id".into(),
        source: err,
    })?;

    if stx.stx_mask & statx_mnt_id_mask().bits() != 0 {
        Ok(Some(stx.stx_mnt_id))
    } else {
        Ok(None)
    }
}

/// Get the [`FileType`] from a [`Stat`].
pub(crate) fn file_type(stat: &Stat) -> FileType {
    FileType::from_raw_mode(stat.st_mode as rustix_fs::RawMode)
}

pub(crate) trait FdExt: AsFd {
    /// `fstat(2)` the file descriptor.
    fn stat(&self) -> Result<Stat, Error>;

    /// Ask the kernel what path this file descriptor refers to, through a
    /// verified procfs handle.
    ///
    /// The result is the kernel's view at the time of the call -- a racing
    /// rename can invalidate it immediately afterwards, so it must only ever
    /// be used as one input of a larger safety check (or as an advisory
    /// name), never as a trusted path.
    fn as_unsafe_path(&self, procfs: &ProcfsHandle) -> Result<PathBuf, Error>;

    /// Like [`FdExt::as_unsafe_path`], but going through the host's `/proc`
    /// without any verification. Only usable for diagnostics and tests.
    fn as_unsafe_path_unchecked(&self) -> Result<PathBuf, Error>;

    /// Whether this file descriptor lies on a filesystem that can contain
    /// magic-links (in practice, procfs).
    fn is_magiclink_filesystem(&self) -> Result<bool, Error>;
}

impl<Fd: AsFd> FdExt for Fd {
    fn stat(&self) -> Result<Stat, Error> {
        syscalls::fstat(self.as_fd()).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "fstat fd".into(),
                source: err,
            }
            .into()
        })
    }

    fn as_unsafe_path(&self, procfs: &ProcfsHandle) -> Result<PathBuf, Error> {
        procfs.readlink_fd(self.as_fd())
    }

    fn as_unsafe_path_unchecked(&self) -> Result<PathBuf, Error> {
        crate::utils::RawProcfsRoot::UnsafeGlobal
            .readlink_unchecked(format!("self/fd/{}", self.as_fd().as_raw_fd()))
            .map_err(|err| {
                ErrorImpl::RawOsError {
                    operation: "readlink unverified /proc/self/fd".into(),
                    source: err,
                }
                .into()
            })
    }

    fn is_magiclink_filesystem(&self) -> Result<bool, Error> {
        let fs_type = syscalls::fstatfs(self.as_fd())
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "fstatfs fd".into(),
                source: err,
            })?
            .f_type;
        Ok(fs_type == rustix_fs::PROC_SUPER_MAGIC)
    }
}
