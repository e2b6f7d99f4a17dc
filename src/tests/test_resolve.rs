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
    resolvers::ResolverBackend,
    tests::common as tests_common,
    utils::FdExt,
    Root,
};

use std::{os::unix::io::AsFd, path::PathBuf};

use anyhow::Error;
use pretty_assertions::assert_eq;

type ExpectedResult = Result<PathBuf, Option<i32>>;

fn run_resolve_test(
    backend: ResolverBackend,
    no_follow_trailing: bool,
    path: &str,
    expected: ExpectedResult,
) -> Result<(), Error> {
    if !backend.supported() {
        return Ok(());
    }

    let dir = tests_common::create_basic_tree()?;
    let mut root = Root::open(dir.path())?;
    root.set_backend(backend);

    // Canonicalise the tempdir path -- /tmp is often a symlink (macOS-style
    // setups) or the tempdir may contain one, and the kernel readback gives
    // the canonical form.
    let root_dir = dir.path().canonicalize()?;
    let expected: ExpectedResult = expected.map(|subpath| {
        if subpath.as_os_str().is_empty() {
            root_dir.clone()
        } else {
            root_dir.join(subpath)
        }
    });

    let res = if no_follow_trailing {
        root.resolve_nofollow(path)
    } else {
        root.resolve(path)
    };
    let res = res
        .as_ref()
        .map(|handle| {
            handle
                .as_fd()
                .as_unsafe_path_unchecked()
                .expect("get actual path of resolved handle")
        })
        .map_err(|err| err.kind().errno());

    assert_eq!(
        res, expected,
        "unexpected result for {backend:?} resolve(root, {path:?}, nofollow={no_follow_trailing})"
    );

    let _dir = dir; // make sure the tempdir is not dropped early
    Ok(())
}

macro_rules! resolve_tests {
    ($($test_name:ident: $op:ident ($path:expr) == $expected:expr);+ $(;)?) => {
        $(
            paste::paste! {
                #[test]
                fn [<openat2_ $test_name>]() -> Result<(), Error> {
                    run_resolve_test(
                        ResolverBackend::KernelOpenat2,
                        resolve_tests!(@nofollow $op),
                        $path,
                        $expected,
                    )
                }

                #[test]
                fn [<opath_ $test_name>]() -> Result<(), Error> {
                    run_resolve_test(
                        ResolverBackend::EmulatedOpath,
                        resolve_tests!(@nofollow $op),
                        $path,
                        $expected,
                    )
                }
            }
        )*
    };

    (@nofollow resolve) => { false };
    (@nofollow resolve_nofollow) => { true };
}

resolve_tests! {
    // Complete lookups of plain paths.
    plain_dir: resolve("a") == Ok("a".into());
    plain_nested_dir: resolve("b/c/d/e/f") == Ok("b/c/d/e/f".into());
    plain_file: resolve("b/c/file") == Ok("b/c/file".into());
    plain_fifo: resolve("b/fifo") == Ok("b/fifo".into());

    // The root itself.
    empty_path: resolve("") == Ok("".into());
    root_slash: resolve("/") == Ok("".into());
    dot: resolve(".") == Ok("".into());

    // Absolute paths are interpreted relative to the root.
    absolute_subpath: resolve("/b/c") == Ok("b/c".into());

    // ".." can never escape the root.
    dotdot_chain: resolve("../../../../../..") == Ok("".into());
    dotdot_at_root: resolve("..") == Ok("".into());
    dotdot_inside: resolve("b/c/../c/d") == Ok("b/c/d".into());
    abs_dotdot_chain: resolve("/../../..") == Ok("".into());

    // Symlinks are followed, scoped to the root.
    symlink_abs_dir: resolve("e") == Ok("b/c/d/e".into());
    symlink_rel_file: resolve("b-file") == Ok("b/c/file".into());
    symlink_to_root: resolve("root-link1") == Ok("".into());
    symlink_to_root_dotdot: resolve("root-link2") == Ok("".into());
    symlink_component: resolve("e/f") == Ok("b/c/d/e/f".into());

    // Escape attempts get clamped to the root.
    escape_relative: resolve("escape-link1") == Ok("target".into());
    escape_absolute: resolve("escape-link2") == Ok("target".into());

    // Chained non-lexical symlinks.
    chained_abs: resolve("link3/target_abs") == Ok("target".into());
    chained_rel: resolve("link3/target_rel") == Ok("target".into());

    // Dangling symlinks are NotExist.
    dangling: resolve("a-fake1") == Err(Some(libc::ENOENT));
    dangling_abs: resolve("c/a-fake1") == Err(Some(libc::ENOENT));
    deep_dangling: resolve("link3/deep_dangling1") == Err(Some(libc::ENOENT));
    nonexistent: resolve("not/a/path") == Err(Some(libc::ENOENT));

    // Symlink loops exhaust the traversal budget.
    loop_self: resolve("loop/basic-loop1") == Err(Some(libc::ELOOP));
    loop_abs: resolve("loop/basic-loop2") == Err(Some(libc::ELOOP));
    loop_dotdot: resolve("loop/basic-loop3") == Err(Some(libc::ELOOP));
    loop_pair: resolve("loop/a/link") == Err(Some(libc::ELOOP));

    // Walking through a non-directory.
    trailing_slash_on_file: resolve("b/c/file/") == Err(Some(libc::ENOTDIR));
    trailing_dot_on_file: resolve("b/c/file/.") == Err(Some(libc::ENOTDIR));
    component_under_file: resolve("b/c/file/next") == Err(Some(libc::ENOTDIR));

    // resolve_nofollow returns the symlink itself.
    nofollow_symlink: resolve_nofollow("b-file") == Ok("b-file".into());
    nofollow_dangling: resolve_nofollow("a-fake1") == Ok("a-fake1".into());
    nofollow_plain_file: resolve_nofollow("b/c/file") == Ok("b/c/file".into());
    nofollow_dir: resolve_nofollow("a") == Ok("a".into());
    nofollow_component_still_followed: resolve_nofollow("e/f") == Ok("b/c/d/e/f".into());
}

#[test]
fn open_in_root_free_fn() -> Result<(), Error> {
    let dir = tests_common::create_basic_tree()?;
    let root_dir = dir.path().canonicalize()?;

    let handle = crate::open_in_root(dir.path(), "b/c/file")?;
    assert_eq!(
        handle.as_fd().as_unsafe_path_unchecked()?,
        root_dir.join("b/c/file"),
        "open_in_root should resolve to the file inside the root"
    );
    Ok(())
}

#[test]
fn open_at_in_root_free_fn() -> Result<(), Error> {
    let dir = tests_common::create_basic_tree()?;
    let root_dir = dir.path().canonicalize()?;
    let rootfd = std::fs::File::open(dir.path())?;

    let handle = crate::open_at_in_root(&rootfd, "escape-link1")?;
    assert_eq!(
        handle.as_fd().as_unsafe_path_unchecked()?,
        root_dir.join("target"),
        "open_at_in_root should clamp escaping symlinks to the root"
    );
    Ok(())
}

#[test]
fn resolver_flags_no_symlinks() -> Result<(), Error> {
    use crate::flags::ResolverFlags;

    for backend in [ResolverBackend::KernelOpenat2, ResolverBackend::EmulatedOpath] {
        if !backend.supported() {
            continue;
        }
        let dir = tests_common::create_basic_tree()?;
        let mut root =
            Root::open(dir.path())?.with_resolver_flags(ResolverFlags::NO_SYMLINKS);
        root.set_backend(backend);

        let err = root
            .resolve("b-file")
            .expect_err("NO_SYMLINKS resolution of a symlink should fail");
        assert_eq!(
            err.kind().errno(),
            Some(libc::ELOOP),
            "{backend:?}: NO_SYMLINKS should fail symlink lookups with ELOOP"
        );

        // Symlink-free paths are unaffected.
        root.resolve("b/c/file")
            .map_err(|err| anyhow::anyhow!("{backend:?}: plain lookup should work: {err}"))?;
    }
    Ok(())
}

#[test]
fn handle_names_are_advisory() -> Result<(), Error> {
    let dir = tests_common::create_basic_tree()?;
    let root = Root::open(dir.path())?;

    let handle = root.resolve("b/c/../c/file")?;
    assert_eq!(
        handle.name(),
        dir.path().join("b/c/file"),
        "handle names should be the lexically-cleaned lookup path"
    );
    Ok(())
}
