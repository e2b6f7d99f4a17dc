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

//! Flag types used by securejoin operations.

use std::os::raw::c_int;

bitflags! {
    /// Wrapper for the underlying `libc`'s `O_*` flags.
    ///
    /// The flag values and their meaning is identical to the description in
    /// the [`open(2)`] man page.
    ///
    /// [`open(2)`]: https://www.man7.org/linux/man-pages/man2/open.2.html
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: c_int {
        const O_RDONLY = libc::O_RDONLY;
        const O_WRONLY = libc::O_WRONLY;
        const O_RDWR = libc::O_RDWR;
        const O_APPEND = libc::O_APPEND;
        const O_CLOEXEC = libc::O_CLOEXEC;
        const O_CREAT = libc::O_CREAT;
        const O_DIRECT = libc::O_DIRECT;
        const O_DIRECTORY = libc::O_DIRECTORY;
        const O_DSYNC = libc::O_DSYNC;
        const O_EXCL = libc::O_EXCL;
        const O_LARGEFILE = libc::O_LARGEFILE;
        const O_NOATIME = libc::O_NOATIME;
        const O_NOCTTY = libc::O_NOCTTY;
        const O_NOFOLLOW = libc::O_NOFOLLOW;
        const O_NONBLOCK = libc::O_NONBLOCK;
        const O_PATH = libc::O_PATH;
        const O_SYNC = libc::O_SYNC;
        const O_TMPFILE = libc::O_TMPFILE;
        const O_TRUNC = libc::O_TRUNC;

        // Don't clobber any unknown flags.
        const _ = !0;
    }
}

impl From<c_int> for OpenFlags {
    fn from(flags: c_int) -> Self {
        Self::from_bits_retain(flags)
    }
}

bitflags! {
    /// Optional restrictions to apply to a resolution within a
    /// [`Root`](crate::Root).
    ///
    /// The values correspond to the `RESOLVE_*` flags of [`openat2(2)`],
    /// though only the subset which makes sense for in-root resolution is
    /// exposed (the scoping flags are applied internally and cannot be
    /// disabled).
    ///
    /// [`openat2(2)`]: https://www.man7.org/linux/man-pages/man2/openat2.2.html
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ResolverFlags: u64 {
        /// Fail the entire resolution if any symlink component is hit.
        const NO_SYMLINKS = libc::RESOLVE_NO_SYMLINKS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn openflags_from_int() {
        let flags = OpenFlags::from(libc::O_PATH | libc::O_NOFOLLOW);
        assert_eq!(
            flags,
            OpenFlags::O_PATH | OpenFlags::O_NOFOLLOW,
            "OpenFlags::from(c_int) should preserve flag bits"
        );
        assert_eq!(
            flags.bits(),
            libc::O_PATH | libc::O_NOFOLLOW,
            "OpenFlags::bits() should round-trip"
        );
    }

    #[test]
    fn openflags_unknown_bits() {
        // FMODE_NONOTIFY-style kernel-internal bits must not be dropped.
        let flags = OpenFlags::from_bits_retain(0x10000000);
        assert_eq!(
            flags.bits(),
            0x10000000,
            "unknown OpenFlags bits should be retained"
        );
    }

    #[test]
    fn resolverflags_values() {
        assert_eq!(
            ResolverFlags::NO_SYMLINKS.bits(),
            libc::RESOLVE_NO_SYMLINKS,
            "ResolverFlags::NO_SYMLINKS should match RESOLVE_NO_SYMLINKS"
        );
    }
}
