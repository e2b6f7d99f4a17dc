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

//! A deliberately restricted resolver used for lookups *inside* procfs by
//! [`ProcfsHandle`](crate::procfs::ProcfsHandle).
//!
//! This resolver refuses:
//!
//!  1. Any `..` components.
//!  2. Any absolute symlinks (on procfs these are invariably magic-links).
//!  3. Any mount-point crossings (when the kernel can tell us about them).
//!
//! Because of these restrictions it needs no `/proc`-based verification of
//! its own, which is what lets the procfs gateway use it without circular
//! trust in procfs.

use crate::{
    error::{Error, ErrorExt, ErrorImpl},
    flags::{OpenFlags, ResolverFlags},
    procfs,
    resolvers::MAX_SYMLINK_TRAVERSALS,
    syscalls::{self, OpenHow},
    utils::{self, FdExt, PathIterExt},
};

use std::{
    collections::VecDeque,
    io::Error as IOError,
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, OwnedFd},
    },
    path::Path,
};

use rustix::fs::FileType;

/// Resolver used for lookups below a procfs root. The backend is chosen at
/// runtime, with tests able to force a specific one.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ProcfsResolver {
    Openat2,
    RestrictedOpath,
}

impl Default for ProcfsResolver {
    fn default() -> Self {
        // Only look at cached failures from previous openat2 calls -- this
        // constructor runs for every ProcfsHandle, so issuing a probe
        // syscall here would be wasted work. If openat2 turns out to be
        // unsupported we find out (and fall back) during the first lookup.
        if syscalls::openat2::saw_openat2_failure() {
            Self::RestrictedOpath
        } else {
            Self::Openat2
        }
    }
}

impl ProcfsResolver {
    pub(crate) fn resolve(
        &self,
        root: impl AsFd,
        path: impl AsRef<Path>,
        oflags: OpenFlags,
        rflags: ResolverFlags,
    ) -> Result<OwnedFd, Error> {
        // These flags don't make sense for procfs lookups and would produce
        // confusing errors deep in the walk. O_TMPFILE is a multi-bit flag
        // (it contains O_DIRECTORY!) so it has to be checked separately.
        let invalid_flags = OpenFlags::O_CREAT | OpenFlags::O_EXCL;
        if !oflags.intersection(invalid_flags).is_empty() || oflags.contains(OpenFlags::O_TMPFILE)
        {
            Err(ErrorImpl::InvalidArgument {
                name: "flags".into(),
                description: format!("invalid flags {oflags:?} specified for procfs lookup")
                    .into(),
            })?
        }

        let root = root.as_fd();
        let path = path.as_ref();

        match *self {
            Self::Openat2 => openat2_resolve(root, path, oflags, rflags).or_else(|err| {
                // openat2 could have failed because it is blocked by seccomp
                // or simply unsupported. Check with a (memoized) probe --
                // if the syscall genuinely doesn't work we fall back to the
                // restricted O_PATH walk, otherwise the error is real.
                if syscalls::openat2::openat2_is_not_supported() {
                    opath_resolve(root, path, oflags, rflags)
                } else {
                    Err(err)
                }
            }),
            Self::RestrictedOpath => opath_resolve(root, path, oflags, rflags),
        }
    }
}

/// `openat2(2)`-based backend: the kernel enforces all three restrictions
/// for us within a single syscall.
fn openat2_resolve(
    root: impl AsFd,
    path: impl AsRef<Path>,
    oflags: OpenFlags,
    rflags: ResolverFlags,
) -> Result<OwnedFd, Error> {
    syscalls::openat2_follow(
        root,
        path,
        OpenHow {
            flags: oflags.bits() as u64,
            resolve: libc::RESOLVE_BENEATH
                | libc::RESOLVE_NO_MAGICLINKS
                | libc::RESOLVE_NO_XDEV
                | rflags.bits(),
            ..Default::default()
        },
    )
    .map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "open subpath in procfs".into(),
            source: err,
        }
        .into()
    })
}

/// Reject link targets that look like magic-links.
///
/// Genuine procfs symlinks are all relative (`self`, `thread-self`,
/// `mounts`, ...), while magic-links either render as absolute paths (they
/// use `d_path()`) or as anon-inode style names like `pipe:[12345]`. Without
/// `openat2(2)` this classification is the best available.
fn check_possible_magic_link(link_target: &Path) -> Result<(), Error> {
    if link_target.is_absolute() {
        Err(ErrorImpl::OsError {
            operation: "emulated RESOLVE_NO_MAGICLINKS".into(),
            source: IOError::from_raw_os_error(libc::ELOOP),
        })
        .wrap(format!("step into absolute symlink {link_target:?}"))?
    }

    // Anon-inode targets look like "type:[inode]". No plain procfs symlink
    // contains ':', '[' and ']' in that order, so a cheap ordered scan of
    // those three characters is enough.
    let ordered = link_target
        .as_os_str()
        .as_bytes()
        .iter()
        .copied()
        .filter(|&ch| ch == b':' || ch == b'[' || ch == b']')
        .collect::<Vec<u8>>();
    if ordered.as_slice() == b":[]" {
        Err(ErrorImpl::OsError {
            operation: "emulated RESOLVE_NO_MAGICLINKS".into(),
            source: IOError::from_raw_os_error(libc::ELOOP),
        })
        .wrap(format!("step into likely magic-link {link_target:?}"))?
    }

    Ok(())
}

/// Restricted `O_PATH` walk used when `openat2(2)` is unavailable.
fn opath_resolve(
    root: impl AsFd,
    path: impl AsRef<Path>,
    oflags: OpenFlags,
    rflags: ResolverFlags,
) -> Result<OwnedFd, Error> {
    let root = root.as_fd();
    let root_mnt_id = utils::fetch_mnt_id(root, "")?;

    // We only need to keep track of our current dirfd, since we are
    // applying the components one-by-one.
    let mut current = root
        .try_clone_to_owned()
        .map_err(|err| ErrorImpl::OsError {
            operation: "dup root handle as starting point of resolution".into(),
            source: err,
        })?;

    // RESOLVE_BENEATH rejects absolute paths outright, and so do we.
    let path = path.as_ref();
    if path.is_absolute() {
        Err(ErrorImpl::OsError {
            operation: "emulated RESOLVE_BENEATH".into(),
            source: IOError::from_raw_os_error(libc::EXDEV),
        })
        .wrap(format!(
            "requested subpath {path:?} is absolute but this is forbidden by RESOLVE_BENEATH"
        ))?
    }

    let mut remaining_components = path
        .raw_components()
        .map(|part| {
            // Empty components are "." so that trailing "/" and "//" on a
            // non-directory produce the right error code.
            if part.is_empty() {
                ".".into()
            } else {
                part.to_os_string()
            }
        })
        .collect::<VecDeque<_>>();

    let mut symlink_traversals = 0;
    while let Some(part) = remaining_components.pop_front() {
        // ".." cannot be verified without procfs readbacks (which are what
        // this resolver exists to avoid), so it is always rejected.
        if part.as_bytes() == b".." {
            Err(ErrorImpl::OsError {
                operation: "step into '..'".into(),
                source: IOError::from_raw_os_error(libc::EXDEV),
            })
            .wrap("cannot walk into '..' with restricted procfs resolver")?
        }

        // Get our next element.
        let next = syscalls::openat(&current, &part, OpenFlags::O_PATH, 0).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "open next component of procfs resolution".into(),
                source: err,
            }
        })?;

        // The next component must be on the same mount as the procfs root.
        // NOTE: If the root is the host /proc, this is only safe if there
        // are no racing mounts.
        procfs::verify_same_mnt(root_mnt_id, &next, "")
            .with_wrap(|| format!("open next component {part:?}"))
            .wrap("emulated procfs resolver RESOLVE_NO_XDEV")?;

        let next_meta = next.stat().wrap("fstat of next component")?;
        let next_is_symlink = utils::file_type(&next_meta) == FileType::Symlink;

        // For the last component we try to re-open with the caller's actual
        // flags. We cannot reopen through procfs here (this *is* the procfs
        // reopen machinery), so the final component gets a second openat
        // with the requested flags plus O_NOFOLLOW.
        //
        // Forcing O_NOFOLLOW makes the error handling subtle. With the user
        // flag combinations below, a trailing symlink should behave as:
        //
        //                   symlink          directory    other-file
        //   OPATH           continue walking    open         open
        //   ODIR            continue walking    open        ENOTDIR
        //   OPATH|ODIR      continue walking    open        ENOTDIR
        //   ONF                 ELOOP           open         open
        //   ONF|OPATH       open the symlink    open         open
        //   ONF|ODIR           ENOTDIR          open        ENOTDIR
        //   ONF|OPATH|ODIR     ENOTDIR          open        ENOTDIR
        //
        // but our forced O_NOFOLLOW would turn the "continue walking" cases
        // into returning the symlink (plain O_PATH) or ENOTDIR (the
        // O_DIRECTORY cases). So: plain O_PATH skips the reopen entirely
        // (the loop below walks or returns correctly on its own), and an
        // ENOTDIR from the reopen is ignored when it was caused by a
        // symlink that the user's flags say we should keep walking.
        if remaining_components.is_empty()
            && oflags.intersection(
                OpenFlags::O_PATH | OpenFlags::O_NOFOLLOW | OpenFlags::O_DIRECTORY,
            ) != OpenFlags::O_PATH
        {
            match syscalls::openat(&current, &part, oflags, 0) {
                Ok(final_reopen) => {
                    // Re-verify the mount id of the fd we hand out.
                    procfs::verify_same_mnt(root_mnt_id, &final_reopen, "")
                        .wrap("re-open final component")
                        .wrap("emulated procfs resolver RESOLVE_NO_XDEV")?;
                    return Ok(final_reopen);
                }
                Err(err) => {
                    let walkable_symlink = !oflags.contains(OpenFlags::O_NOFOLLOW)
                        && oflags.contains(OpenFlags::O_DIRECTORY)
                        && err.root_cause().raw_os_error() == Some(libc::ENOTDIR)
                        && next_is_symlink;
                    if !walkable_symlink {
                        Err(ErrorImpl::RawOsError {
                            operation: format!(
                                "open last component of resolution with {oflags:?}"
                            )
                            .into(),
                            source: err,
                        })?
                    }
                }
            }
        }

        // An ordinary dirent just becomes the new current fd.
        if !next_is_symlink {
            current = next;
            continue;
        }

        // Don't continue walking if the caller asked for no symlinks.
        if rflags.contains(ResolverFlags::NO_SYMLINKS) {
            Err(ErrorImpl::OsError {
                operation: "emulated symlink resolution".into(),
                source: IOError::from_raw_os_error(libc::ELOOP),
            })
            .wrap(format!(
                "component {part:?} is a symlink but symlink resolution is disabled"
            ))?
        }

        // procfs has no symlink loops of its own, but an attacker can build
        // one through /proc/self/fd, so the budget still applies.
        symlink_traversals += 1;
        if symlink_traversals > MAX_SYMLINK_TRAVERSALS {
            Err(ErrorImpl::SymlinkLoop {
                description: format!(
                    "exceeded limit of {MAX_SYMLINK_TRAVERSALS} symlink traversals in procfs"
                )
                .into(),
            })?
        }

        let link_target =
            syscalls::readlinkat(&next, "").map_err(|err| ErrorImpl::RawOsError {
                operation: "readlink next symlink component".into(),
                source: err,
            })?;

        check_possible_magic_link(&link_target)
            .wrap("cannot walk into potential magic-links with restricted procfs resolver")?;

        link_target
            .raw_components()
            .prepend(&mut remaining_components);
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::ProcfsResolver;
    use crate::{
        error::Error as SecurejoinError,
        flags::{OpenFlags, ResolverFlags},
        syscalls,
        utils::FdExt,
    };

    use std::{fs::File, path::{Path, PathBuf}};

    use anyhow::Error;
    use pretty_assertions::{assert_eq, assert_matches};

    type ExpectedResult = Result<PathBuf, Option<i32>>;

    macro_rules! procfs_resolver_tests {
        ($($test_name:ident ($root:expr, $path:expr, $($oflag:ident)|+, $rflags:expr) == $expected_result:expr);+ $(;)?) => {
            $(
                paste::paste! {
                    #[test]
                    fn [<procfs_openat2_resolver_ $test_name>]() -> Result<(), Error> {
                        if syscalls::openat2::openat2_is_not_supported() {
                            return Ok(());
                        }
                        run_resolver_test(
                            ProcfsResolver::Openat2,
                            $root, $path, $(OpenFlags::$oflag)|*, $rflags,
                            $expected_result,
                        )
                    }

                    #[test]
                    fn [<procfs_opath_resolver_ $test_name>]() -> Result<(), Error> {
                        run_resolver_test(
                            ProcfsResolver::RestrictedOpath,
                            $root, $path, $(OpenFlags::$oflag)|*, $rflags,
                            $expected_result,
                        )
                    }
                }
            )*
        };
    }

    fn run_resolver_test(
        resolver: ProcfsResolver,
        root: &str,
        path: &str,
        oflags: OpenFlags,
        rflags: ResolverFlags,
        expected: ExpectedResult,
    ) -> Result<(), Error> {
        let root_dir = PathBuf::from(root);
        let root = File::open(&root_dir)?;
        let expected: ExpectedResult = expected.map(|subpath| {
            if subpath.is_absolute() {
                subpath
            } else {
                root_dir.join(subpath)
            }
        });
        let res = resolver
            .resolve(&root, path, oflags, rflags)
            .as_ref()
            .map(|fd| {
                fd.as_unsafe_path_unchecked()
                    .expect("get actual path of resolved handle")
            })
            .map_err(|err| SecurejoinError::kind(err).errno());
        assert_eq!(
            res, expected,
            "unexpected result for {resolver:?} resolve({root_dir:?}, {path:?}, {oflags:?}, {rflags:?})"
        );
        Ok(())
    }

    procfs_resolver_tests! {
        // Mount crossings and absolute paths are forbidden.
        xdev("/", "proc", O_DIRECTORY, ResolverFlags::empty()) == Err(Some(libc::EXDEV));
        xdev_dotdot("/proc", "..", O_DIRECTORY, ResolverFlags::empty()) == Err(Some(libc::EXDEV));
        xdev_abs_path("/proc", "/etc/passwd", O_DIRECTORY, ResolverFlags::empty()) == Err(Some(libc::EXDEV));

        // Invalid flags.
        bad_flag_ocreat("/tmp", "foobar", O_CREAT|O_RDWR, ResolverFlags::empty()) == Err(Some(libc::EINVAL));
        bad_flag_otmpfile("/tmp", "foobar", O_TMPFILE|O_RDWR, ResolverFlags::empty()) == Err(Some(libc::EINVAL));

        // RESOLVE_NO_SYMLINKS handling.
        resolve_no_symlinks("/proc", "self", O_DIRECTORY, ResolverFlags::NO_SYMLINKS) == Err(Some(libc::ELOOP));

        // Plain procfs symlinks are fine to walk...
        symlink("/proc", "self", O_DIRECTORY, ResolverFlags::empty()) == Ok(format!("/proc/{}", syscalls::getpid()).into());
        // ...but magic-links are not.
        magiclink_absolute("/proc", "self/exe", O_RDONLY, ResolverFlags::empty()) == Err(Some(libc::ELOOP));
        magiclink_absolute_parent("/proc", "self/root/etc/passwd", O_RDONLY, ResolverFlags::empty()) == Err(Some(libc::ELOOP));
        magiclink_anoninode("/proc", "self/ns/pid", O_RDONLY, ResolverFlags::empty()) == Err(Some(libc::ELOOP));
        magiclink_anoninode_opath_nofollow("/proc", "self/ns/user", O_PATH|O_NOFOLLOW, ResolverFlags::empty()) == Ok(format!("/proc/{}/ns/user", syscalls::getpid()).into());

        // The {O_PATH, O_NOFOLLOW, O_DIRECTORY} table from opath_resolve().
        sym_opath("/proc", "self", O_PATH, ResolverFlags::empty()) == Ok(format!("/proc/{}", syscalls::getpid()).into());
        dir_opath("/proc", "tty", O_PATH, ResolverFlags::empty()) == Ok("tty".into());
        file_opath("/proc", "filesystems", O_PATH, ResolverFlags::empty()) == Ok("filesystems".into());
        sym_odir("/proc", "self", O_DIRECTORY, ResolverFlags::empty()) == Ok(format!("/proc/{}", syscalls::getpid()).into());
        file_odir("/proc", "filesystems", O_DIRECTORY, ResolverFlags::empty()) == Err(Some(libc::ENOTDIR));
        sym_opath_odir("/proc", "self", O_PATH|O_DIRECTORY, ResolverFlags::empty()) == Ok(format!("/proc/{}", syscalls::getpid()).into());
        sym_onofollow("/proc", "self", O_NOFOLLOW, ResolverFlags::empty()) == Err(Some(libc::ELOOP));
        sym_opath_onofollow("/proc", "self", O_PATH|O_NOFOLLOW, ResolverFlags::empty()) == Ok("self".into());
        dir_onofollow("/proc", "tty", O_NOFOLLOW, ResolverFlags::empty()) == Ok("tty".into());
        file_onofollow("/proc", "filesystems", O_NOFOLLOW, ResolverFlags::empty()) == Ok("filesystems".into());
        sym_odir_onofollow("/proc", "self", O_DIRECTORY|O_NOFOLLOW, ResolverFlags::empty()) == Err(Some(libc::ENOTDIR));
        sym_opath_odir_onofollow("/proc", "self", O_PATH|O_DIRECTORY|O_NOFOLLOW, ResolverFlags::empty()) == Err(Some(libc::ENOTDIR));
    }

    #[test]
    fn possible_magic_link_classification() {
        // Regular symlink targets.
        assert_matches!(super::check_possible_magic_link(Path::new("foo")), Ok(_));
        assert_matches!(super::check_possible_magic_link(Path::new("12345")), Ok(_));
        assert_matches!(
            super::check_possible_magic_link(Path::new("../../net/foo")),
            Ok(_)
        );

        // Absolute targets.
        assert_matches!(super::check_possible_magic_link(Path::new("/")), Err(_));
        assert_matches!(
            super::check_possible_magic_link(Path::new("/foo/bar")),
            Err(_)
        );

        // Anon-inode style targets.
        assert_matches!(
            super::check_possible_magic_link(Path::new("pipe:[12345]")),
            Err(_)
        );
        assert_matches!(
            super::check_possible_magic_link(Path::new("anon_inode:[pidfd]")),
            Err(_)
        );
    }
}
