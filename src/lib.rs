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

//! securejoin resolves untrusted paths inside a root directory, safely.
//!
//! Given a root and an attacker-supplied subpath, every operation in this
//! crate guarantees that resolution never escapes the root -- not through
//! `..`, not through symlinks (relative or absolute), and not through an
//! attacker concurrently renaming directories, swapping symlinks, or
//! mounting over paths. It is the primitive container runtimes and other
//! privileged tools need in order to operate on files inside a guest
//! filesystem tree without trusting its contents.
//!
//! # Example
//!
//! ```
//! # use securejoin::{error::Error, flags::OpenFlags, Root};
//! # fn main() -> Result<(), Error> {
//! let (root_path, unsafe_path) = ("/path/to/root", "etc/passwd");
//! # let root_path = "/";
//! // Get a root handle for resolution.
//! let root = Root::open(root_path)?;
//! // Resolve the untrusted path to an O_PATH handle.
//! let handle = root.resolve(unsafe_path)?;
//! // Upgrade the handle to a regular std::fs::File.
//! let file = handle.reopen(OpenFlags::O_RDONLY)?;
//! # let _ = file;
//! # Ok(())
//! # }
//! ```
//!
//! [`mkdir_all`] creates directory trees inside a root with the same
//! guarantees, and [`secure_join`] is the legacy purely-lexical variant for
//! callers that need a path *string* rather than a handle (with the caveat
//! that a string can always go stale between the join and its use).
//!
//! # Kernel support
//!
//! securejoin is Linux-only. Where the running kernel supports it, the
//! whole resolution is done in-kernel with [`openat2(2)`]`(RESOLVE_IN_ROOT)`
//! and is atomic against concurrent filesystem modification; on older
//! kernels a userspace walk *detects* (rather than prevents) races via
//! procfs readbacks and reports them as errors.
//!
//! | Feature               | Kernel | Used for | Fallback |
//! | --------------------- | ------ | -------- | -------- |
//! | [`openat2(2)`]        | 5.6    | In-kernel scoped lookups. | Emulated userspace walk. |
//! | `/proc/thread-self`   | 3.17   | Thread-specific procfs operations. | `/proc/self/task/<tid>`, then `/proc/self`. |
//! | New mount API         | 5.2    | Private procfs handle for verification (`fsopen(2)`/`open_tree(2)`). | Host `/proc` (mount races are then detectable but not preventable). |
//! | `STATX_MNT_ID`        | 5.8    | Detecting overmounts on procfs paths. | None; the check is skipped. |
//! | `STATX_MNT_ID_UNIQUE` | 6.8    | Same, resistant to mount-id recycling. | `STATX_MNT_ID`. |
//!
//! [`openat2(2)`]: https://www.man7.org/linux/man-pages/man2/openat2.2.html

// securejoin only supports Linux.
#![cfg(target_os = "linux")]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(missing_debug_implementations)]

#[macro_use]
extern crate bitflags;
extern crate libc;

// `Handle` implementation.
mod handle;
#[doc(inline)]
pub use handle::*;

// `Root` implementation and the mkdir_all/open_in_root entry points.
mod root;
#[doc(inline)]
pub use root::*;

// The legacy lexical joiner.
mod securejoin;
#[doc(inline)]
pub use securejoin::*;

pub mod error;
pub mod flags;
pub mod procfs;

// Resolver backend implementations.
mod resolvers;

// Internally used helpers.
mod syscalls;
mod utils;

// Library tests.
#[cfg(test)]
mod tests;
