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

//! Userspace emulation of `openat2(RESOLVE_IN_ROOT)`.
//!
//! The walk opens one component at a time with `O_PATH|O_NOFOLLOW`, expands
//! symlinks by splicing their targets into the walk queue, and handles `..`
//! lexically against the set of already-verified components. Walking *down*
//! is safe by construction (the same argument as the in-kernel resolver);
//! the dangerous step is `..`, where a racing rename could have moved the
//! current directory (or the root itself) -- so after every `..` the
//! kernel's own view of both paths is read back through procfs and compared
//! against what the walk expects. Unlike the in-kernel resolver we cannot
//! limit the check to detected renames, so it runs on every `..`.
//!
//! The final handle is checked the same way before being returned. If any
//! check fails we assume we are being attacked and return an error -- this
//! backend detects mutation rather than preventing it, which is the best
//! that can be done from userspace.

use crate::{
    error::{Error, ErrorExt, ErrorImpl},
    flags::{OpenFlags, ResolverFlags},
    procfs::ProcfsHandle,
    resolvers::{opath::SymlinkStack, PartialLookup, MAX_SYMLINK_TRAVERSALS},
    syscalls,
    utils::{self, FdExt, PathIterExt},
};

use std::{
    collections::VecDeque,
    ffi::{OsStr, OsString},
    io::Error as IOError,
    iter,
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, BorrowedFd, OwnedFd},
    },
    path::{Path, PathBuf},
    rc::Rc,
};

use itertools::Itertools;
use rustix::fs::FileType;

/// Ensure that the current fd matches the path we expect it to be at, and
/// that the root has not moved out from under us.
fn check_current(
    procfs: &ProcfsHandle,
    current: BorrowedFd<'_>,
    root: BorrowedFd<'_>,
    expected: &Path,
) -> Result<(), Error> {
    let root_path = root
        .as_unsafe_path(procfs)
        .wrap("get root path to construct expected path")?;

    // expected is always "/" followed by the verified logical subpath, so
    // gluing it onto the root path is a pure string operation.
    let full_path = match expected.strip_prefix("/") {
        Ok(subpath) if subpath.as_os_str().is_empty() => root_path.clone(),
        Ok(subpath) => root_path.join(subpath),
        Err(_) => root_path.join(expected),
    };

    // Does the kernel agree with us? This check can give false negatives
    // (the kernel reports "/" for paths it considers unresolvable), but if
    // it passes then the path was inside the root at least at one point in
    // time, which is all this backend can promise.
    let current_path = current
        .as_unsafe_path(procfs)
        .wrap("check fd against expected path")?;
    if current_path != full_path {
        Err(ErrorImpl::PossibleBreakout {
            description: format!(
                "fd doesn't match expected path ({current_path:?} != {full_path:?})"
            )
            .into(),
        })?
    }

    // And the root must not have moved. An attacker that can move the root
    // itself can defeat this check, so roots should never be placed inside
    // attacker-controlled directories in the first place.
    let new_root_path = root
        .as_unsafe_path(procfs)
        .wrap("get root path to double-check it hasn't moved")?;
    if root_path != new_root_path {
        Err(ErrorImpl::PossibleBreakout {
            description: "root moved during lookup".into(),
        })?
    }

    Ok(())
}

/// Common implementation used by `resolve_partial()` and `resolve()`.
fn do_resolve(
    procfs: &ProcfsHandle,
    root: BorrowedFd<'_>,
    path: &Path,
    rflags: ResolverFlags,
    no_follow_trailing: bool,
    mut symlink_stack: Option<&mut SymlinkStack<OwnedFd>>,
) -> Result<PartialLookup<Rc<OwnedFd>>, Error> {
    // The logical path within the root that we expect the final fd to be
    // at, maintained as we walk so an attacker moving components around is
    // caught by the procfs cross-checks.
    let mut expected_path = PathBuf::from("/");

    // We only need to keep track of our current dirfd, since we are
    // applying the components one-by-one, and can always switch back to the
    // root if we hit an absolute symlink.
    let root = Rc::new(root.try_clone_to_owned().map_err(|err| ErrorImpl::OsError {
        operation: "dup root handle as starting point of resolution".into(),
        source: err,
    })?);
    let mut current = Rc::clone(&root);

    // Queue of components left to walk. Symlink targets get spliced into the
    // front as we encounter them; the walk ends when the queue is empty.
    let mut remaining_components = path
        .raw_components()
        .map(OsStr::to_os_string)
        .collect::<VecDeque<_>>();

    let mut symlink_traversals = 0;
    while let Some(part) = remaining_components.pop_front() {
        // Stash the true remainder at this point (including the current
        // component). We can't just collect() into a PathBuf because that
        // would normalise away the empty components we need to preserve.
        let remaining: PathBuf = Itertools::intersperse(
            iter::once(&part)
                .chain(remaining_components.iter())
                .map(OsString::as_os_str),
            OsStr::new("/"),
        )
        .collect::<OsString>()
        .into();

        let part: OsString = match part.as_bytes() {
            // An empty component is treated as "." so that trailing "/" and
            // "//" on a non-directory produce the right error code.
            b"" => ".".into(),
            // "." doesn't change expected_path, but we still do the open so
            // that "." through a non-directory errors out like openat2.
            b"." => part,
            b".." => {
                // Everything in expected_path is a verified non-symlink, so
                // ".." is handled lexically. Failing to pop means we are at
                // the root, where ".." is a no-op -- but the symlink stack
                // still needs to see the component, or a later pop would be
                // out of step with the walk.
                if !expected_path.pop() {
                    if let Some(ref mut stack) = symlink_stack {
                        stack
                            .pop_part(OsStr::new(".."))
                            .map_err(|err| ErrorImpl::BadSymlinkStack {
                                description: "walking into root".into(),
                                source: err,
                            })?;
                    }
                    current = Rc::clone(&root);
                    continue;
                }
                part
            }
            _ => {
                // Might be a symlink, in which case it is removed from
                // expected_path again below.
                expected_path.push(&part);

                // We must only ever operate on a single component at a
                // time. RawComponents can't produce a component containing
                // "/", but this is load-bearing enough to re-check.
                if part.as_bytes().contains(&b'/') {
                    Err(ErrorImpl::PossibleBreakout {
                        description: "component of path resolution contains '/'".into(),
                    })?
                }

                part
            }
        };

        // Get our next element.
        let next = match syscalls::openat(current.as_fd(), &part, OpenFlags::O_PATH, 0) {
            Err(err) => {
                return Ok(PartialLookup::Partial {
                    handle: current,
                    remaining,
                    last_error: ErrorImpl::RawOsError {
                        operation: "open next component of resolution".into(),
                        source: err,
                    }
                    .into(),
                });
            }
            Ok(next) => next,
        };

        // Walking down is safe by definition, but ".." is where a racing
        // rename could have moved us (or the root) somewhere else entirely.
        if part.as_bytes() == b".." {
            check_current(procfs, next.as_fd(), root.as_fd(), &expected_path)
                .wrap("check next '..' component didn't escape")?;
        }

        let next_meta = next.stat().wrap("fstat of next component")?;

        // An ordinary dirent just becomes the new current fd.
        if utils::file_type(&next_meta) != FileType::Symlink {
            // We hit a non-symlink component, clear it from the symlink
            // stack.
            if let Some(ref mut stack) = symlink_stack {
                stack
                    .pop_part(&part)
                    .map_err(|err| ErrorImpl::BadSymlinkStack {
                        description: "walking into component".into(),
                        source: err,
                    })?;
            }
            current = Rc::new(next);
            continue;
        }

        // If this is the last component and the caller asked us not to
        // follow the trailing symlink, the link itself is the result.
        if remaining_components.is_empty() && no_follow_trailing {
            current = Rc::new(next);
            break;
        }

        // Don't continue walking if the caller asked for no symlinks.
        if rflags.contains(ResolverFlags::NO_SYMLINKS) {
            let last_error = Error::from(ErrorImpl::OsError {
                operation: "emulated symlink resolution".into(),
                source: IOError::from_raw_os_error(libc::ELOOP),
            })
            .with_wrap(|| {
                format!("component {part:?} is a symlink but symlink resolution is disabled")
            });
            return Ok(PartialLookup::Partial {
                handle: current,
                remaining,
                last_error,
            });
        }

        // We need a limit on the number of symlinks we traverse to avoid
        // hitting filesystem loops and DoSing.
        symlink_traversals += 1;
        if symlink_traversals > MAX_SYMLINK_TRAVERSALS {
            return Ok(PartialLookup::Partial {
                handle: current,
                remaining,
                last_error: ErrorImpl::SymlinkLoop {
                    description: format!(
                        "exceeded limit of {MAX_SYMLINK_TRAVERSALS} symlink traversals"
                    )
                    .into(),
                }
                .into(),
            });
        }

        let link_target =
            syscalls::readlinkat(&next, "").map_err(|err| ErrorImpl::RawOsError {
                operation: "readlink next symlink component".into(),
                source: err,
            })?;

        // Absolute symlinks on a filesystem that can contain magic-links
        // are almost certainly magic-links (procfs generates their targets
        // with d_path()), and resolving one in userspace would walk an
        // arbitrary kernel-controlled path. Refuse outright.
        if link_target.is_absolute()
            && next
                .is_magiclink_filesystem()
                .wrap("check if next is on a dangerous filesystem")?
        {
            Err(ErrorImpl::OsError {
                operation: "emulated RESOLVE_NO_MAGICLINKS".into(),
                source: IOError::from_raw_os_error(libc::ELOOP),
            })
            .wrap("walked into a potential magic-link")?
        }

        // Swap out the symlink component in the symlink stack with a new
        // entry for the link target.
        if let Some(ref mut stack) = symlink_stack {
            stack
                .swap_link(&part, (&current, remaining), link_target.clone())
                .map_err(|err| ErrorImpl::BadSymlinkStack {
                    description: "walking into symlink".into(),
                    source: err,
                })?;
        }

        // The symlink component is being replaced by its target.
        expected_path.pop();

        // Splice the link target into the front of the walk queue.
        link_target
            .raw_components()
            .prepend(&mut remaining_components);

        // Absolute symlinks reset the walk back to the root.
        if link_target.is_absolute() {
            current = Rc::clone(&root);
            expected_path = PathBuf::from("/");
        }
    }

    // Make sure the handle we ended up with is where we think it is.
    check_current(procfs, current.as_fd(), root.as_fd(), &expected_path)
        .wrap("check final handle didn't escape")?;

    Ok(PartialLookup::Complete(current))
}

/// Resolve as many components as possible in `path` within `root` through
/// user-space emulation.
pub(crate) fn resolve_partial(
    root: impl AsFd,
    path: impl AsRef<Path>,
    rflags: ResolverFlags,
    no_follow_trailing: bool,
) -> Result<PartialLookup<Rc<OwnedFd>>, Error> {
    // Every top-level lookup acquires its own procfs handle and drops it on
    // completion -- a long-lived procfs fd could be leaked into a container.
    let procfs = ProcfsHandle::new().wrap("acquire procfs handle for emulated lookup")?;

    // For partial lookups, we need a SymlinkStack to report partial results
    // in terms of the original path rather than an expanded symlink target,
    // matching openat2.
    let mut symlink_stack: SymlinkStack<OwnedFd> = SymlinkStack::new();

    match do_resolve(
        &procfs,
        root.as_fd(),
        path.as_ref(),
        rflags,
        no_follow_trailing,
        Some(&mut symlink_stack),
    ) {
        // For complete and error paths, just return what we got.
        ret @ Ok(PartialLookup::Complete(_)) => ret,
        err @ Err(_) => err,

        // The lookup failed part-way. If we were in the middle of a symlink
        // expansion, report the result from the context of the outermost
        // pending symlink instead.
        Ok(PartialLookup::Partial {
            handle,
            remaining,
            last_error,
        }) => match symlink_stack.pop_top_symlink() {
            Some((handle, remaining)) => Ok(PartialLookup::Partial {
                handle,
                remaining,
                last_error,
            }),
            None => Ok(PartialLookup::Partial {
                handle,
                remaining,
                last_error,
            }),
        },
    }
}

/// Resolve `path` within `root` through user-space emulation.
pub(crate) fn resolve(
    root: impl AsFd,
    path: impl AsRef<Path>,
    rflags: ResolverFlags,
    no_follow_trailing: bool,
) -> Result<OwnedFd, Error> {
    let procfs = ProcfsHandle::new().wrap("acquire procfs handle for emulated lookup")?;

    do_resolve(
        &procfs,
        root.as_fd(),
        path.as_ref(),
        rflags,
        no_follow_trailing,
        None,
    )
    .map(PartialLookup::<OwnedFd>::from)
    .and_then(OwnedFd::try_from)
}
