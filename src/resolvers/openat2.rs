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

//! In-kernel resolver backend based on `openat2(2)` with `RESOLVE_IN_ROOT`.
//!
//! The kernel scopes the entire resolution within a single syscall, so this
//! backend is atomic against concurrent renames and mounts -- rather than
//! detecting attacks after the fact, the kernel simply never lets the lookup
//! escape the root.

use crate::{
    error::{Error, ErrorImpl},
    flags::{OpenFlags, ResolverFlags},
    resolvers::PartialLookup,
    syscalls::{self, OpenHow},
    utils::PathIterExt,
};

use std::{
    os::unix::io::{AsFd, OwnedFd},
    path::{Path, PathBuf},
};

/// Resolve `path` within `root` through `openat2(2)`.
pub(crate) fn resolve(
    root: impl AsFd,
    path: impl AsRef<Path>,
    rflags: ResolverFlags,
    no_follow_trailing: bool,
) -> Result<OwnedFd, Error> {
    let mut oflags = OpenFlags::O_PATH;
    if no_follow_trailing {
        oflags.insert(OpenFlags::O_NOFOLLOW);
    }

    // An empty path would be rejected by the kernel, but for us it means
    // "the root itself".
    let path = path.as_ref();
    let path = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };

    let how = OpenHow {
        flags: oflags.bits() as u64,
        resolve: libc::RESOLVE_IN_ROOT | libc::RESOLVE_NO_MAGICLINKS | rflags.bits(),
        ..Default::default()
    };

    syscalls::openat2_follow(root, path, how).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "openat2 subpath".into(),
            source: err,
        }
        .into()
    })
}

/// Resolve as many components as possible in `path` within `root` using
/// `openat2(2)`.
pub(crate) fn resolve_partial(
    root: impl AsFd,
    path: impl AsRef<Path>,
    rflags: ResolverFlags,
    no_follow_trailing: bool,
) -> Result<PartialLookup<OwnedFd>, Error> {
    let root = root.as_fd();
    let path = path.as_ref();

    let mut last_error = match resolve(root, path, rflags, no_follow_trailing) {
        Ok(handle) => return Ok(PartialLookup::Complete(handle)),
        Err(err) => err,
    };

    // Walk progressively shorter ancestors of the full path until one of
    // them resolves, and report everything after it as the remainder.
    for (ancestor, remaining) in path.partial_ancestors() {
        if last_error.is_safety_violation() {
            // If we hit a safety violation (the kernel's EXDEV for a
            // detected race), return an error instead of a partial
            // resolution -- handing out a handle mid-attack would let
            // mkdir_all turn a detected race into created directories.
            return Err(last_error);
        }
        match resolve(root, ancestor, rflags, no_follow_trailing) {
            Ok(handle) => {
                return Ok(PartialLookup::Partial {
                    handle,
                    remaining: remaining.map(PathBuf::from).unwrap_or_default(),
                    last_error,
                })
            }
            Err(err) => last_error = err,
        }
    }

    Err(last_error)
}
