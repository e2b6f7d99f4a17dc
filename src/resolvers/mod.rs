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

//! Resolver backend implementations.

use crate::{error::Error, flags::ResolverFlags, syscalls};

use std::{
    os::unix::io::{AsFd, OwnedFd},
    path::{Path, PathBuf},
    rc::Rc,
};

use once_cell::sync::Lazy;
use static_assertions::const_assert;

/// `O_PATH`-based userspace resolver.
pub(crate) mod opath;
/// `openat2(2)`-based in-kernel resolver.
pub(crate) mod openat2;
/// A limited resolver only used for lookups inside `ProcfsHandle`.
pub(crate) mod procfs;

/// Maximum number of symlink traversals we will accept during a single
/// resolution.
///
/// The kernel's limit is 40, but unlike the kernel we expand symlink targets
/// into individual components (each of which may itself be a symlink), so we
/// allow a fair amount of headroom before declaring a loop.
pub(crate) const MAX_SYMLINK_TRAVERSALS: usize = 255;
const_assert!(MAX_SYMLINK_TRAVERSALS >= 40);

/// The backend used for path resolution within a root.
///
/// The default backend is chosen at runtime based on what the running kernel
/// supports; the emulated backend exists for pre-`openat2(2)` kernels (and
/// for seccomp configurations that block it).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ResolverBackend {
    /// Use the native `openat2(2)` backend (requires kernel support).
    KernelOpenat2,
    /// Use the userspace "emulated" backend.
    EmulatedOpath,
}

// MSRV(1.80): Use LazyLock.
static DEFAULT_RESOLVER_BACKEND: Lazy<ResolverBackend> = Lazy::new(|| {
    if syscalls::openat2::openat2_is_not_supported() {
        ResolverBackend::EmulatedOpath
    } else {
        ResolverBackend::KernelOpenat2
    }
});

impl Default for ResolverBackend {
    fn default() -> Self {
        *DEFAULT_RESOLVER_BACKEND
    }
}

impl ResolverBackend {
    /// Checks if the resolver is supported on the current platform.
    #[cfg(test)]
    pub(crate) fn supported(self) -> bool {
        match self {
            ResolverBackend::KernelOpenat2 => !syscalls::openat2::openat2_is_not_supported(),
            ResolverBackend::EmulatedOpath => true,
        }
    }
}

/// Resolver backend and its associated flags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Resolver {
    /// Underlying resolution backend used.
    pub(crate) backend: ResolverBackend,
    /// Flags to pass to the resolution backend.
    pub(crate) flags: ResolverFlags,
}

/// Result of a partial lookup: either the whole path resolved, or we have a
/// handle to the deepest component that did resolve plus the remainder.
#[derive(Debug)]
pub(crate) enum PartialLookup<H, E = Error> {
    Complete(H),
    Partial {
        handle: H,
        remaining: PathBuf,
        last_error: E,
    },
}

impl<H> AsRef<H> for PartialLookup<H> {
    fn as_ref(&self) -> &H {
        match self {
            Self::Complete(handle) => handle,
            Self::Partial { handle, .. } => handle,
        }
    }
}

impl TryFrom<PartialLookup<OwnedFd>> for OwnedFd {
    type Error = Error;

    fn try_from(lookup: PartialLookup<OwnedFd>) -> Result<Self, Error> {
        match lookup {
            PartialLookup::Complete(handle) => Ok(handle),
            PartialLookup::Partial { last_error, .. } => Err(last_error),
        }
    }
}

impl From<PartialLookup<Rc<OwnedFd>>> for PartialLookup<OwnedFd> {
    fn from(lookup: PartialLookup<Rc<OwnedFd>>) -> Self {
        let (rc, partial) = match lookup {
            PartialLookup::Complete(rc) => (rc, None),
            PartialLookup::Partial {
                handle,
                remaining,
                last_error,
            } => (handle, Some((remaining, last_error))),
        };

        // There is only a single reference left to whatever the final handle
        // points to -- the only Rc::clones made during the walk are of the
        // root (which the walk itself dropped) and frames in the symlink
        // stack (which has been consumed by this point).
        // MSRV(1.70): Use Rc::into_inner().
        let handle = Rc::try_unwrap(rc)
            .expect("resolved handle must have a single Rc reference after lookup");

        match partial {
            None => Self::Complete(handle),
            Some((remaining, last_error)) => Self::Partial {
                handle,
                remaining,
                last_error,
            },
        }
    }
}

impl Resolver {
    /// Resolve `path` within `root`, requiring the whole path to exist.
    pub(crate) fn resolve<F: AsFd, P: AsRef<Path>>(
        &self,
        root: F,
        path: P,
        no_follow_trailing: bool,
    ) -> Result<OwnedFd, Error> {
        match self.backend {
            ResolverBackend::KernelOpenat2 => {
                openat2::resolve(root, path, self.flags, no_follow_trailing)
            }
            ResolverBackend::EmulatedOpath => {
                opath::resolve(root, path, self.flags, no_follow_trailing)
            }
        }
    }

    /// Resolve as many components of `path` within `root` as possible.
    pub(crate) fn resolve_partial<F: AsFd, P: AsRef<Path>>(
        &self,
        root: F,
        path: P,
        no_follow_trailing: bool,
    ) -> Result<PartialLookup<OwnedFd>, Error> {
        match self.backend {
            ResolverBackend::KernelOpenat2 => {
                openat2::resolve_partial(root, path.as_ref(), self.flags, no_follow_trailing)
            }
            ResolverBackend::EmulatedOpath => {
                opath::resolve_partial(root, path.as_ref(), self.flags, no_follow_trailing)
                    // Rc<OwnedFd> -> OwnedFd
                    .map(Into::into)
            }
        }
    }
}
