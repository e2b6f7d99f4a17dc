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

//! The legacy string-based joiner.
//!
//! [`secure_join`] resolves an untrusted path inside a root *lexically*,
//! reading symlink targets from the filesystem but never opening a single
//! directory, and returns the resulting path as a string. Because there is
//! no handle pinning anything down, the result is only meaningful if the
//! tree cannot change between the join and the use of the returned path
//! (or the consequences of a race are acceptable). New code should use
//! [`open_in_root`](crate::open_in_root) instead; this interface is kept
//! for callers that genuinely need a path string.

use crate::{
    error::{Error, ErrorImpl},
    resolvers::MAX_SYMLINK_TRAVERSALS,
    utils::{self, PathIterExt},
};

use std::{
    collections::VecDeque,
    ffi::OsString,
    fs,
    io::Error as IOError,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

/// The subset of file-type information [`secure_join_vfs`] needs from
/// [`Vfs::lstat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum VfsFileType {
    Directory,
    Symlink,
    Other,
}

/// Filesystem seam for [`secure_join_vfs`].
///
/// Exactly two operations are needed by the joiner: a no-follow stat (only
/// the file type is consumed) and reading a symlink target. Implement this
/// on a mock to test path-walking logic without touching a real filesystem.
pub trait Vfs {
    /// `lstat(2)` the path (without following trailing symlinks).
    fn lstat(&self, path: &Path) -> Result<VfsFileType, IOError>;

    /// Read the target of the symlink at `path`.
    fn read_link(&self, path: &Path) -> Result<PathBuf, IOError>;
}

/// The real filesystem, as used by [`secure_join`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OsVfs;

impl Vfs for OsVfs {
    fn lstat(&self, path: &Path) -> Result<VfsFileType, IOError> {
        let file_type = fs::symlink_metadata(path)?.file_type();
        Ok(if file_type.is_symlink() {
            VfsFileType::Symlink
        } else if file_type.is_dir() {
            VfsFileType::Directory
        } else {
            VfsFileType::Other
        })
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, IOError> {
        fs::read_link(path)
    }
}

/// Join `unsafe_path` onto `root`, lexically confining it to `root`.
///
/// Symlinks are expanded (by reading their targets) so that the result
/// refers to the file the kernel *would* resolve `unsafe_path` to inside a
/// chroot at `root` -- in particular, `..` is evaluated against expanded
/// symlink targets rather than the literal path. Absolute symlink targets
/// restart at `root`, and `..` can never walk above it.
///
/// Components that do not exist (or cannot be inspected because a parent is
/// not a directory) are treated as plain directories -- the joiner cannot
/// do better without opening anything, and it guarantees only that the
/// *returned string* is lexically inside `root`.
///
/// # Errors
///
/// A `root` containing `..` components is rejected with
/// [`ErrorKind::UnsafeRoot`]. Symlink chains longer than the traversal
/// budget fail with [`ErrorKind::SymlinkLoop`]. Any other `lstat` or
/// `readlink` failure is passed through.
///
/// [`ErrorKind::UnsafeRoot`]: crate::error::ErrorKind::UnsafeRoot
/// [`ErrorKind::SymlinkLoop`]: crate::error::ErrorKind::SymlinkLoop
pub fn secure_join(root: impl AsRef<Path>, unsafe_path: impl AsRef<Path>) -> Result<PathBuf, Error> {
    secure_join_vfs(root, unsafe_path, &OsVfs)
}

/// [`secure_join`], with all filesystem access going through `vfs`.
pub fn secure_join_vfs(
    root: impl AsRef<Path>,
    unsafe_path: impl AsRef<Path>,
    vfs: &impl Vfs,
) -> Result<PathBuf, Error> {
    let root = root.as_ref();
    let unsafe_path = unsafe_path.as_ref();

    if utils::contains_dotdot(root) {
        Err(ErrorImpl::UnsafeRoot { root: root.into() })?
    }

    // The path walked so far, relative to the root. Every component in here
    // is a verified non-symlink (or something we chose to treat as a plain
    // directory), so ".." against it is purely lexical.
    let mut current = PathBuf::new();

    let mut remaining: VecDeque<OsString> = unsafe_path
        .raw_components()
        .map(|part| part.to_os_string())
        .collect();

    let mut symlink_traversals = 0;
    while let Some(part) = remaining.pop_front() {
        match part.as_bytes() {
            b"" | b"." => continue,
            b".." => {
                // Never walks above the root: popping an empty path is a
                // no-op.
                current.pop();
                continue;
            }
            _ => (),
        }

        let candidate = root.join(&current).join(&part);
        match vfs.lstat(&candidate) {
            Ok(VfsFileType::Symlink) => {
                symlink_traversals += 1;
                if symlink_traversals > MAX_SYMLINK_TRAVERSALS {
                    Err(ErrorImpl::SymlinkLoop {
                        description: format!(
                            "exceeded limit of {MAX_SYMLINK_TRAVERSALS} symlink traversals at {candidate:?}"
                        )
                        .into(),
                    })?
                }

                let target = vfs.read_link(&candidate).map_err(|err| {
                    ErrorImpl::OsError {
                        operation: "readlink next component".into(),
                        source: err,
                    }
                })?;

                // Absolute targets restart the walk at the root.
                if target.is_absolute() {
                    current = PathBuf::new();
                }
                target.raw_components().prepend(&mut remaining);
            }
            Ok(_) => current.push(&part),
            Err(err) => {
                // A missing component (or a non-directory somewhere in our
                // walked prefix) is treated as a plain directory; we cannot
                // tell more without opening anything. Everything else is a
                // real error.
                if !matches!(
                    err.raw_os_error(),
                    Some(libc::ENOENT) | Some(libc::ENOTDIR)
                ) {
                    Err(ErrorImpl::OsError {
                        operation: "lstat next component".into(),
                        source: err,
                    })?
                }
                current.push(&part);
            }
        }
    }

    Ok(utils::lexical_clean(root.join(current)))
}
