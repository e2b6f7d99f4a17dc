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
    error::ErrorKind,
    resolvers::ResolverBackend,
    tests::common as tests_common,
    utils::FdExt,
    Root,
};

use std::{fs, os::unix::{fs::MetadataExt, io::AsFd}, path::Path};

use anyhow::Error;
use pretty_assertions::assert_eq;

/// The umask the kernel will apply to our mkdirs (best-effort, used to
/// compute expected modes without mutating the process umask).
fn current_umask() -> u32 {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("Umask:").map(str::trim).map(String::from))
        })
        .and_then(|umask| u32::from_str_radix(&umask, 8).ok())
        .unwrap_or(0o022)
}

fn run_both_backends(
    test: impl Fn(&Root, &Path) -> Result<(), Error>,
) -> Result<(), Error> {
    for backend in [ResolverBackend::KernelOpenat2, ResolverBackend::EmulatedOpath] {
        if !backend.supported() {
            continue;
        }
        let dir = tests_common::create_basic_tree()?;
        let mut root = Root::open(dir.path())?;
        root.set_backend(backend);
        test(&root, dir.path())?;
    }
    Ok(())
}

#[test]
fn basic_creation() -> Result<(), Error> {
    run_both_backends(|root, root_dir| {
        let handle = root.mkdir_all("new1/new2/new3", 0o711)?;

        assert_eq!(
            handle.as_fd().as_unsafe_path_unchecked()?,
            root_dir.canonicalize()?.join("new1/new2/new3"),
            "mkdir_all handle should refer to the deepest created directory"
        );

        let expected_mode = 0o711 & !current_umask();
        for subpath in ["new1", "new1/new2", "new1/new2/new3"] {
            let meta = fs::symlink_metadata(root_dir.join(subpath))?;
            assert!(meta.is_dir(), "{subpath} should be a directory");
            assert_eq!(
                meta.mode() & 0o7777,
                expected_mode,
                "{subpath} should have the requested mode"
            );
        }
        Ok(())
    })
}

#[test]
fn idempotent() -> Result<(), Error> {
    run_both_backends(|root, _| {
        root.mkdir_all("x/y/z", 0o755)?;
        root.mkdir_all("x/y/z", 0o755)
            .map(drop)
            .map_err(|err| anyhow::anyhow!("second mkdir_all should succeed: {err}"))
    })
}

#[test]
fn existing_prefix() -> Result<(), Error> {
    run_both_backends(|root, root_dir| {
        let handle = root.mkdir_all("b/c/d/e/f/new1/new2", 0o755)?;
        assert_eq!(
            handle.as_fd().as_unsafe_path_unchecked()?,
            root_dir.canonicalize()?.join("b/c/d/e/f/new1/new2"),
            "mkdir_all below an existing prefix should work"
        );
        Ok(())
    })
}

#[test]
fn through_symlink() -> Result<(), Error> {
    run_both_backends(|root, root_dir| {
        // "e" is a symlink to /b/c/d/e -- resolution happens before
        // creation, so the new directory lands under the target.
        let handle = root.mkdir_all("e/newdir", 0o755)?;
        assert_eq!(
            handle.as_fd().as_unsafe_path_unchecked()?,
            root_dir.canonicalize()?.join("b/c/d/e/newdir"),
            "mkdir_all through a symlink should create below its target"
        );
        Ok(())
    })
}

#[test]
fn sticky_bit_allowed() -> Result<(), Error> {
    run_both_backends(|root, root_dir| {
        root.mkdir_all("stickydir", 0o1777)?;
        let meta = fs::symlink_metadata(root_dir.join("stickydir"))?;
        assert_eq!(
            meta.mode() & 0o7777,
            0o1777 & !current_umask(),
            "sticky bit should survive mkdir_all"
        );
        Ok(())
    })
}

#[test]
fn invalid_modes() -> Result<(), Error> {
    run_both_backends(|root, _| {
        for mode in [0o4755, 0o2755, 0o6777, 0o10000] {
            let err = root
                .mkdir_all("should-not-exist", mode)
                .expect_err("mode with non-permission bits should be rejected");
            assert_eq!(
                err.kind(),
                ErrorKind::InvalidMode,
                "mkdir_all(0o{mode:o}) should fail with InvalidMode"
            );
        }
        Ok(())
    })
}

#[test]
fn dotdot_in_tail() -> Result<(), Error> {
    run_both_backends(|root, _| {
        let err = root
            .mkdir_all("a/nonexist/../x", 0o755)
            .expect_err("'..' in the to-be-created part should fail");
        assert!(
            err.is_not_exist(),
            "'..' behind a missing component should be a not-exist error, got {err}"
        );
        Ok(())
    })
}

#[test]
fn target_is_file() -> Result<(), Error> {
    run_both_backends(|root, _| {
        let err = root
            .mkdir_all("b/c/file", 0o755)
            .expect_err("mkdir_all on an existing file should fail");
        assert_eq!(
            err.kind().errno(),
            Some(libc::ENOTDIR),
            "mkdir_all onto a file should fail with ENOTDIR"
        );
        Ok(())
    })
}

#[test]
fn tail_under_file() -> Result<(), Error> {
    run_both_backends(|root, _| {
        let err = root
            .mkdir_all("b/c/file/subdir", 0o755)
            .expect_err("mkdir_all below an existing file should fail");
        assert_eq!(
            err.kind().errno(),
            Some(libc::ENOTDIR),
            "mkdir_all below a file should fail with ENOTDIR"
        );
        Ok(())
    })
}

#[test]
fn dangling_symlink_tail() -> Result<(), Error> {
    run_both_backends(|root, _| {
        // Part of the stable API: a dangling symlink as the trailing
        // component gives ENOTDIR.
        let err = root
            .mkdir_all("a-fake1", 0o755)
            .expect_err("mkdir_all onto a dangling symlink should fail");
        assert_eq!(
            err.kind().errno(),
            Some(libc::ENOTDIR),
            "mkdir_all onto a dangling symlink should fail with ENOTDIR"
        );
        Ok(())
    })
}

#[test]
fn free_functions() -> Result<(), Error> {
    let dir = tests_common::create_basic_tree()?;

    crate::mkdir_all(dir.path(), "free1/free2", 0o755)?;
    assert!(
        dir.path().join("free1/free2").is_dir(),
        "mkdir_all free function should create directories"
    );

    let rootfd = fs::File::open(dir.path())?;
    let handle = crate::mkdir_all_handle(&rootfd, "free1/free3", 0o755)?;
    assert_eq!(
        handle.as_fd().as_unsafe_path_unchecked()?,
        dir.path().canonicalize()?.join("free1/free3"),
        "mkdir_all_handle should return a handle to the created directory"
    );
    Ok(())
}
