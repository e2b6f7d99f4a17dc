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

//! Shared filesystem fixtures for the test suite.

use std::{fs, os::unix::fs as unixfs, path::Path};

use anyhow::{Context, Error};
use rustix::fs::{self as rustix_fs, FileType, Mode, OFlags, CWD};
use tempfile::TempDir;

macro_rules! create_inode {
    // "foo/bar" => dir
    ($path:expr => dir) => {
        rustix_fs::mkdir($path, Mode::from_bits_retain(0o755))
            .with_context(|| format!("mkdir {}", $path.display()))?;
    };
    // "foo/bar" => file
    ($path:expr => file) => {
        rustix_fs::open($path, OFlags::CREATE, Mode::from_bits_retain(0o644))
            .with_context(|| format!("mkfile {}", $path.display()))?;
    };
    // "foo/bar" => fifo
    ($path:expr => fifo) => {
        rustix_fs::mknodat(CWD, $path, FileType::Fifo, Mode::from_bits_retain(0o644), 0)
            .with_context(|| format!("mkfifo {}", $path.display()))?;
    };
    // "foo/bar" => symlink -> "target"
    ($path:expr => symlink -> $target:expr) => {
        unixfs::symlink($target, $path)
            .with_context(|| format!("symlink {} -> {}", $path.display(), $target))?;
    };
}

macro_rules! create_tree {
    // create_tree! {
    //     "a" => (dir);
    //     "a/b/c" => (file);
    //     "b-link" => (symlink -> "a/b");
    // }
    ($($subpath:expr => ($($inner:tt)*));+ $(;)?) => {
        {
            let root = TempDir::new()?;
            $(
                {
                    let root_dir: &Path = root.as_ref();
                    let path = root_dir.join($subpath.trim_start_matches('/'));
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("mkdirall {}", parent.display()))?;
                    }
                    create_inode!(&path => $($inner)*);
                }
            )*
            root
        }
    }
}

pub(crate) fn create_basic_tree() -> Result<TempDir, Error> {
    Ok(create_tree! {
        // Basic inodes.
        "a" => (dir);
        "b/c/d/e/f" => (dir);
        "b/c/file" => (file);
        "b/fifo" => (fifo);
        "e" => (symlink -> "/b/c/d/e");
        "b-file" => (symlink -> "b/c/file");
        "root-link1" => (symlink -> "/");
        "root-link2" => (symlink -> "/..");
        // Escape attempts that land back on an in-root target.
        "target" => (dir);
        "escape-link1" => (symlink -> "../../../../../../../../../../target");
        "escape-link2" => (symlink -> "/../../../../../../../../../../target");
        // Dangling symlinks.
        "a-fake1" => (symlink -> "a/fake");
        "c/a-fake1" => (symlink -> "/a/fake");
        // Non-lexical symlink chains.
        "link1/target_abs" => (symlink -> "/target");
        "link1/target_rel" => (symlink -> "../target");
        "link2/link1_abs" => (symlink -> "/link1");
        "link2/link1_rel" => (symlink -> "../link1");
        "link3/target_abs" => (symlink -> "/link2/link1_rel/target_rel");
        "link3/target_rel" => (symlink -> "../link2/link1_rel/target_rel");
        "link3/deep_dangling1" => (symlink -> "../link2/link1_rel/target_rel/nonexist");
        // Symlink loops.
        "loop/basic-loop1" => (symlink -> "basic-loop1");
        "loop/basic-loop2" => (symlink -> "/loop/basic-loop2");
        "loop/basic-loop3" => (symlink -> "../loop/basic-loop3");
        "loop/a/link" => (symlink -> "../b/link");
        "loop/b/link" => (symlink -> "/loop/a/link");
    })
}
