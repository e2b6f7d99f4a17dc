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

use crate::{
    resolvers::{PartialLookup, ResolverBackend},
    tests::common as tests_common,
    utils::FdExt,
    Root,
};

use std::path::{Path, PathBuf};

use anyhow::Error;
use pretty_assertions::assert_eq;

/// (handle path relative to root, remaining, errno of last_error), or the
/// handle path for a complete lookup.
#[derive(Debug, PartialEq, Eq)]
enum Expected {
    Complete(PathBuf),
    Partial {
        at: PathBuf,
        remaining: PathBuf,
        errno: Option<i32>,
    },
}

fn run_partial_test(
    backend: ResolverBackend,
    path: &str,
    expected: Expected,
) -> Result<(), Error> {
    if !backend.supported() {
        return Ok(());
    }

    let dir = tests_common::create_basic_tree()?;
    let mut root = Root::open(dir.path())?;
    root.set_backend(backend);
    let root_dir = dir.path().canonicalize()?;

    let join_root = |subpath: &Path| {
        if subpath.as_os_str().is_empty() {
            root_dir.clone()
        } else {
            root_dir.join(subpath)
        }
    };

    let got = match root.resolve_partial(Path::new(path))? {
        PartialLookup::Complete(handle) => Expected::Complete(
            handle
                .as_unsafe_path_unchecked()
                .expect("get path of complete handle"),
        ),
        PartialLookup::Partial {
            handle,
            remaining,
            last_error,
        } => Expected::Partial {
            at: handle
                .as_unsafe_path_unchecked()
                .expect("get path of partial handle"),
            remaining,
            errno: last_error.kind().errno(),
        },
    };
    let expected = match expected {
        Expected::Complete(at) => Expected::Complete(join_root(&at)),
        Expected::Partial {
            at,
            remaining,
            errno,
        } => Expected::Partial {
            at: join_root(&at),
            remaining,
            errno,
        },
    };

    assert_eq!(
        got, expected,
        "unexpected result for {backend:?} resolve_partial(root, {path:?})"
    );

    let _dir = dir; // make sure the tempdir is not dropped early
    Ok(())
}

macro_rules! partial_tests {
    ($($test_name:ident: $path:expr => $expected:expr);+ $(;)?) => {
        $(
            paste::paste! {
                #[test]
                fn [<openat2_ $test_name>]() -> Result<(), Error> {
                    run_partial_test(ResolverBackend::KernelOpenat2, $path, $expected)
                }

                #[test]
                fn [<opath_ $test_name>]() -> Result<(), Error> {
                    run_partial_test(ResolverBackend::EmulatedOpath, $path, $expected)
                }
            }
        )*
    };
}

partial_tests! {
    complete_dir: "b/c" => Expected::Complete("b/c".into());
    complete_through_symlink: "e/f" => Expected::Complete("b/c/d/e/f".into());

    // The remainder keeps the first missing component.
    missing_tail: "a/b/c/d" => Expected::Partial {
        at: "a".into(),
        remaining: "b/c/d".into(),
        errno: Some(libc::ENOENT),
    };
    all_missing: "non/exist/path" => Expected::Partial {
        at: "".into(),
        remaining: "non/exist/path".into(),
        errno: Some(libc::ENOENT),
    };

    // A dangling symlink is reported in terms of the original path, not
    // its expanded target.
    dangling_symlink: "a-fake1" => Expected::Partial {
        at: "".into(),
        remaining: "a-fake1".into(),
        errno: Some(libc::ENOENT),
    };
    deep_dangling_symlink: "link3/deep_dangling1" => Expected::Partial {
        at: "link3".into(),
        remaining: "deep_dangling1".into(),
        errno: Some(libc::ENOENT),
    };
    dangling_with_tail: "a-fake1/tail" => Expected::Partial {
        at: "".into(),
        remaining: "a-fake1/tail".into(),
        errno: Some(libc::ENOENT),
    };

    // Hitting a non-directory stops the walk with ENOTDIR.
    file_blocks_walk: "b/c/file/next" => Expected::Partial {
        at: "b/c/file".into(),
        remaining: "next".into(),
        errno: Some(libc::ENOTDIR),
    };
}
