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

//! Minimal kernel version detection.
//!
//! Feature probes are almost always better than version checks, but a few
//! kernel interfaces (notably the new mount API) have known-broken distro
//! backports that probe as "working", so for those we additionally require a
//! minimum upstream version.

use std::cmp::{self, Ordering};

use once_cell::sync::Lazy;
use rustix::system as rustix_system;

/// A parsed kernel version, comparable against other versions.
///
/// Kernel versions can have arbitrarily many dot-separated components; when
/// comparing versions of different lengths the shorter one is treated as if
/// it were right-padded with zeroes, so `3 < 3.1 < 3.1.18 < 4`.
#[derive(Clone, Debug)]
pub(crate) struct KernelVersion(pub(crate) Vec<u64>);

impl Ord for KernelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let common_len = cmp::min(self.0.len(), other.0.len());
        match self.0[..common_len].cmp(&other.0[..common_len]) {
            Ordering::Equal => {
                // The common prefix is equal, so whichever version has a
                // non-zero component in its tail is newer.
                let self_tail = self.0[common_len..].iter().any(|&part| part > 0);
                let other_tail = other.0[common_len..].iter().any(|&part| part > 0);
                self_tail.cmp(&other_tail)
            }
            ord => ord,
        }
    }
}

impl PartialOrd for KernelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KernelVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KernelVersion {}

/// Parse a `uname -r`-style string (`"6.12.49-1-default"`) into a
/// [`KernelVersion`], ignoring everything after the numeric prefix.
pub(crate) fn parse_kernel_version(release: &str) -> Option<KernelVersion> {
    let numeric_len = release
        .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
        .unwrap_or(release.len());

    let parts = release[..numeric_len]
        .split('.')
        .map(|part| part.parse().ok())
        .collect::<Option<Vec<u64>>>()?;

    // A lone number (or an empty string) is not a kernel version.
    if parts.len() < 2 {
        return None;
    }
    Some(KernelVersion(parts))
}

// MSRV(1.80): Use LazyLock.
pub(crate) static HOST_KERNEL_VERSION: Lazy<Option<KernelVersion>> = Lazy::new(|| {
    parse_kernel_version(&rustix_system::uname().release().to_string_lossy())
});

/// Returns whether the running kernel is at least as new as the given
/// version. Unparseable kernel versions compare as "too old".
macro_rules! is_gte {
    ($($part:literal),+) => {
        match &*$crate::utils::kernel_version::HOST_KERNEL_VERSION {
            Some(host) => {
                *host >= $crate::utils::kernel_version::KernelVersion(vec![$($part),+])
            }
            None => false,
        }
    };
}
pub(crate) use is_gte;

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    macro_rules! kver {
        ($($part:literal),+) => {
            KernelVersion(vec![$($part),+])
        };
    }

    #[test]
    fn parse_bad() {
        for bad in ["", ".", "..", "foo", "4", "a.b", "3a", "-1.2", "1..3", ".1.2"] {
            assert_eq!(
                parse_kernel_version(bad),
                None,
                "{bad:?} should not parse as a kernel version"
            );
        }
    }

    #[test]
    fn parse_good() {
        assert_eq!(parse_kernel_version("5.2"), Some(kver![5, 2]));
        assert_eq!(parse_kernel_version("3.8.12"), Some(kver![3, 8, 12]));
        assert_eq!(
            parse_kernel_version("6.12.49-1-default"),
            Some(kver![6, 12, 49])
        );
        assert_eq!(parse_kernel_version("5.15.0+debug"), Some(kver![5, 15, 0]));
        assert_eq!(
            parse_kernel_version("2.6.16.48foobar"),
            Some(kver![2, 6, 16, 48])
        );
    }

    #[test]
    fn compare_same_length() {
        assert!(kver![3, 7] < kver![3, 8]);
        assert!(kver![3, 8, 11] < kver![3, 8, 12]);
        assert!(kver![6, 0, 0] > kver![5, 99, 99]);
        assert!(kver![5, 2, 0] == kver![5, 2, 0]);
    }

    #[test]
    fn compare_padded() {
        assert!(kver![3, 8] == kver![3, 8, 0, 0]);
        assert!(kver![3, 1] < kver![3, 1, 18]);
        assert!(kver![3, 1, 18] < kver![4, 0]);
        assert!(kver![5, 4, 0, 0, 1] > kver![5, 4]);
    }

    #[test]
    fn host_version_sane() {
        // Not a strict test, but any kernel this library can run on is newer
        // than 2.6.
        let host = HOST_KERNEL_VERSION
            .clone()
            .expect("host kernel version should parse");
        assert!(host > kver![2, 6], "host kernel {host:?} should be > 2.6");
        assert!(is_gte!(2, 6), "is_gte!(2, 6) should hold on any host");
        assert!(
            !is_gte!(999, 0),
            "is_gte!(999, 0) should not hold on any host"
        );
    }
}
