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

use crate::{
    error::{Error, ErrorExt, ErrorImpl},
    flags::OpenFlags,
    procfs::{ProcfsBase, ProcfsHandle},
    resolvers::{PartialLookup, Resolver},
    syscalls,
    utils::{self, FdExt, PathIterExt},
    Handle,
};

use std::{
    io::{Error as IOError, Read},
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, BorrowedFd, OwnedFd},
    },
    path::{Path, PathBuf},
};

use rustix::fs::FileType;

/// A handle to the root of a directory tree, within which all resolutions
/// are confined.
///
/// Untrusted paths resolved through a `Root` cannot escape it -- not
/// through symlinks (absolute or relative), not through `..`, and not
/// through an attacker concurrently renaming components of the path. The
/// one thing a `Root` cannot defend against is the root *itself* being
/// moved by an attacker, so never open a `Root` inside an
/// attacker-controlled directory.
///
/// # Errors
///
/// If an attack is detected during any `Root` operation, an error with one
/// of the attack-detection [`ErrorKind`]s is returned. The detection is
/// multi-layered: procfs-based path readbacks for the emulated resolver,
/// and in-kernel scoping (surfacing as `EXDEV`) for the `openat2(2)` one.
///
/// [`ErrorKind`]: crate::error::ErrorKind
#[derive(Debug)]
pub struct Root {
    inner: OwnedFd,
    /// Advisory name (the path by which the root was opened).
    name: PathBuf,
    pub(crate) resolver: Resolver,
}

impl AsFd for Root {
    /// Access the underlying root directory file descriptor.
    ///
    /// This is intended for tests and fd-passing; doing path operations on
    /// the raw fd defeats the purpose of this library.
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl From<Root> for OwnedFd {
    fn from(root: Root) -> Self {
        root.inner
    }
}

impl Root {
    /// Open a [`Root`] handle for the given directory path.
    ///
    /// The path need not be absolute or canonical, but it must not contain
    /// any `..` components (those would make the meaning of the root
    /// dependent on the current state of its ancestors, which is exactly
    /// the ambiguity this library exists to remove).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        if utils::contains_dotdot(path) {
            Err(ErrorImpl::UnsafeRoot { root: path.into() })?
        }

        let inner = syscalls::openat_follow(
            syscalls::CWD,
            path,
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
            0,
        )
        .map_err(|err| ErrorImpl::RawOsError {
            operation: "open root handle".into(),
            source: err,
        })?;

        Ok(Self {
            inner,
            name: path.into(),
            resolver: Resolver::default(),
        })
    }

    /// Construct a [`Root`] from an already-open directory handle.
    pub fn from_fd<Fd: Into<OwnedFd>>(fd: Fd) -> Result<Self, Error> {
        let inner = fd.into();

        let stat = inner.stat().wrap("verify root handle")?;
        if utils::file_type(&stat) != FileType::Directory {
            Err(ErrorImpl::InvalidArgument {
                name: "fd".into(),
                description: "root handle must be a directory".into(),
            })?
        }

        // Best-effort advisory name.
        let name = inner.as_unsafe_path_unchecked().unwrap_or_default();
        Ok(Self {
            inner,
            name,
            resolver: Resolver::default(),
        })
    }

    /// The advisory name of this root (the path by which it was opened).
    pub fn name(&self) -> &Path {
        &self.name
    }

    /// Create a copy of the root handle.
    pub fn try_clone(&self) -> Result<Self, Error> {
        let inner = self.inner.try_clone().map_err(|err| ErrorImpl::OsError {
            operation: "duplicate root fd".into(),
            source: err,
        })?;
        Ok(Self {
            inner,
            name: self.name.clone(),
            resolver: self.resolver,
        })
    }

    #[cfg(test)]
    pub(crate) fn set_backend(&mut self, backend: crate::resolvers::ResolverBackend) {
        self.resolver.backend = backend;
    }

    /// Apply additional [`ResolverFlags`] to every resolution done through
    /// this root.
    ///
    /// ```
    /// # use securejoin::{error::Error, flags::ResolverFlags, Root};
    /// # fn main() -> Result<(), Error> {
    /// // Resolutions through this root refuse all symlinks.
    /// let root = Root::open("/tmp")?.with_resolver_flags(ResolverFlags::NO_SYMLINKS);
    /// # let _ = root;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// [`ResolverFlags`]: crate::flags::ResolverFlags
    pub fn with_resolver_flags(mut self, flags: crate::flags::ResolverFlags) -> Self {
        self.resolver.flags = flags;
        self
    }

    /// Advisory name for a handle resolved at `subpath` below this root.
    fn handle_name(&self, subpath: &Path) -> PathBuf {
        let subpath = utils::lexical_clean(subpath);
        let subpath = match subpath.strip_prefix("/") {
            Ok(stripped) => stripped,
            Err(_) => subpath.as_path(),
        };
        if subpath.as_os_str() == "." || subpath.as_os_str().is_empty() {
            self.name.clone()
        } else {
            self.name.join(subpath)
        }
    }

    /// Resolve `path` within the root and return a [`Handle`] to the
    /// deepest component -- requiring the whole path to exist.
    ///
    /// All symlinks (including the trailing component) are followed, scoped
    /// to the root: absolute targets continue from the root, and `..` can
    /// never walk above it. An empty (or `/`) `path` returns a handle
    /// equivalent to the root itself.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<Handle, Error> {
        let path = path.as_ref();
        let fd = self.resolver.resolve(&self.inner, path, false)?;
        Ok(Handle::new(fd, self.handle_name(path)))
    }

    /// Like [`Root::resolve`], but if the trailing component is a symlink
    /// the returned [`Handle`] refers to the link itself rather than its
    /// target.
    pub fn resolve_nofollow(&self, path: impl AsRef<Path>) -> Result<Handle, Error> {
        let path = path.as_ref();
        let fd = self.resolver.resolve(&self.inner, path, true)?;
        Ok(Handle::new(fd, self.handle_name(path)))
    }

    pub(crate) fn resolve_partial(&self, path: &Path) -> Result<PartialLookup<OwnedFd>, Error> {
        self.resolver.resolve_partial(&self.inner, path, false)
    }

    /// Create a directory tree at `path` inside the root (like
    /// `mkdir -p`), returning a [`Handle`] to the deepest directory.
    ///
    /// `mode` may only contain the lower permission bits plus the sticky
    /// bit. The setuid and setgid bits are rejected with
    /// [`ErrorKind::InvalidMode`] because `mkdir(2)` silently ignores them.
    /// The effective mode of created directories is `mode` with the process
    /// umask applied, plus an inherited setgid bit below setgid parents
    /// (note that a default ACL on the parent also overrides the umask, and
    /// will be reported as an attack by the verification described below).
    ///
    /// Calling `mkdir_all` twice with the same arguments succeeds twice. A
    /// dangling symlink as the trailing component fails with `ENOTDIR`
    /// (part of the stable API -- callers rely on the exact errno).
    ///
    /// # Races
    ///
    /// Each created component is re-opened with `O_NOFOLLOW|O_DIRECTORY`
    /// and verified to be a directory with the owner and mode `mkdirat(2)`
    /// must have produced; a detected swap fails with
    /// [`ErrorKind::PossibleAttack`]. A concurrently deleted parent fails
    /// with one of the dead-inode kinds. Losing a `mkdirat(2)` race to
    /// someone else creating the same directory is not an error.
    ///
    /// [`ErrorKind::InvalidMode`]: crate::error::ErrorKind::InvalidMode
    /// [`ErrorKind::PossibleAttack`]: crate::error::ErrorKind::PossibleAttack
    pub fn mkdir_all(&self, path: impl AsRef<Path>, mode: u32) -> Result<Handle, Error> {
        let path = path.as_ref();

        // The mode may only contain the permission and sticky bits.
        // mkdir(2) silently ignores setuid and setgid, so accepting them
        // would create directories that do not match the request.
        if mode & !0o1777 != 0 {
            Err(ErrorImpl::InvalidMode { mode })?
        }

        // Resolve as much of the path as already exists.
        let (existing, remaining) = match self.resolve_partial(path)? {
            PartialLookup::Complete(handle) => (handle, PathBuf::new()),
            PartialLookup::Partial {
                handle,
                remaining,
                last_error,
            } => {
                if last_error.kind().errno() == Some(libc::ENOENT) {
                    (handle, remaining)
                } else {
                    return Err(last_error);
                }
            }
        };
        let mut current = existing;

        // A zero link count means the deepest component was deleted while
        // we were resolving it, which would make every mkdirat below fail
        // with a misleading error.
        let current_stat = current.stat().wrap("fstat deepest existing component")?;
        let current_is_dir = utils::file_type(&current_stat) == FileType::Directory;
        if current_stat.st_nlink == 0 {
            if current_is_dir {
                Err(ErrorImpl::InvalidDirectory {
                    description: "wandered into a deleted directory during resolution".into(),
                })?
            } else {
                Err(ErrorImpl::DeletedInode {
                    description: "resolution ended on a deleted file".into(),
                })?
            }
        }

        // The deepest existing component must be a directory we can create
        // the rest of the tree below.
        if !current_is_dir {
            Err(ErrorImpl::OsError {
                operation: "mkdir_all".into(),
                source: IOError::from_raw_os_error(libc::ENOTDIR),
            })
            .wrap("deepest existing component of subpath is not a directory")?
        }

        // Split off the components left to create. A ".." here cannot be
        // resolved (its meaning depends on directories that don't exist
        // yet), so it is reported as the path not existing.
        let mut parts = Vec::new();
        for part in remaining.raw_components() {
            match part.as_bytes() {
                b"" | b"." => continue,
                b".." => Err(ErrorImpl::OsError {
                    operation: "mkdir_all".into(),
                    source: IOError::from_raw_os_error(libc::ENOENT),
                })
                .wrap("yet-to-be-created subpath contains '..' components")?,
                _ => parts.push(part.to_os_string()),
            }
        }
        if parts.is_empty() {
            // Nothing left to create -- mkdir -p semantics, not an error.
            return Ok(Handle::new(current, self.handle_name(path)));
        }

        // What must newly created directories look like? mkdirat applies
        // the process umask, and a setgid parent propagates its group and
        // the setgid bit to children.
        let umask = process_umask();
        let expected_uid = syscalls::geteuid();

        for part in parts {
            let parent_stat = current.stat().wrap("fstat parent before mkdirat")?;
            let parent_setgid = parent_stat.st_mode & libc::S_ISGID != 0;

            if let Err(err) = syscalls::mkdirat(&current, &part, mode) {
                if err.root_cause().raw_os_error() != Some(libc::EEXIST) {
                    Err(ErrorImpl::RawOsError {
                        operation: "create next directory component".into(),
                        source: err,
                    })?
                }
                // A racing mkdir_all beat us to this component. That's fine
                // as long as what exists is really a directory (note that a
                // dangling symlink also gives EEXIST here, and then fails
                // the O_NOFOLLOW|O_DIRECTORY open below with ENOTDIR).
                current = syscalls::openat(
                    &current,
                    &part,
                    OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
                    0,
                )
                .map_err(|err| ErrorImpl::RawOsError {
                    operation: "open existing directory component".into(),
                    source: err,
                })?;
                continue;
            }

            // mkdirat(2) never follows a trailing symlink, and the
            // O_NOFOLLOW|O_DIRECTORY open means anything that isn't a
            // directory by now shows up as an error rather than being
            // walked through.
            let next = syscalls::openat(
                &current,
                &part,
                OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
                0,
            )
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "open newly created directory".into(),
                source: err,
            })?;

            // An attacker could still have swapped the new directory for a
            // different one between the mkdirat and the open. We cannot
            // prove the directory is the very inode we created, but we can
            // require it to be one our mkdirat could have produced.
            let next_stat = next.stat().wrap("fstat newly created directory")?;
            if next_stat.st_nlink == 0 {
                Err(ErrorImpl::InvalidDirectory {
                    description: "newly created directory was deleted".into(),
                })?
            }
            if next_stat.st_uid != expected_uid {
                Err(ErrorImpl::PossibleAttack {
                    description: format!(
                        "newly created directory has owner uid {}, expected {expected_uid}",
                        next_stat.st_uid,
                    )
                    .into(),
                })?
            }
            let expected_gid = if parent_setgid {
                parent_stat.st_gid
            } else {
                syscalls::getegid()
            };
            if next_stat.st_gid != expected_gid {
                Err(ErrorImpl::PossibleAttack {
                    description: format!(
                        "newly created directory has group gid {}, expected {expected_gid}",
                        next_stat.st_gid,
                    )
                    .into(),
                })?
            }
            if let Some(umask) = umask {
                let mut expected_mode = mode & !umask;
                if parent_setgid {
                    expected_mode |= libc::S_ISGID;
                }
                if next_stat.st_mode & 0o7777 != expected_mode {
                    Err(ErrorImpl::PossibleAttack {
                        description: format!(
                            "newly created directory has mode 0o{:o}, expected 0o{expected_mode:o}",
                            next_stat.st_mode & 0o7777,
                        )
                        .into(),
                    })?
                }
            }

            current = next;
        }

        Ok(Handle::new(current, self.handle_name(path)))
    }
}

/// Read the process umask from procfs (`Umask:` in `status`, Linux 4.7).
///
/// `umask(2)` can only read the umask by overwriting it, which is not safe
/// in multi-threaded programs, so procfs is the only race-free source. On
/// kernels without the field, `None` is returned and mode verification is
/// skipped.
fn process_umask() -> Option<u32> {
    let procfs = ProcfsHandle::new().ok()?;
    let mut status = String::new();
    procfs
        .open(ProcfsBase::ProcSelf, "status", OpenFlags::O_RDONLY)
        .ok()?
        .read_to_string(&mut status)
        .ok()?;
    let umask = status
        .lines()
        .find_map(|line| line.strip_prefix("Umask:"))?;
    u32::from_str_radix(umask.trim(), 8).ok()
}

/// Resolve `subpath` inside the directory tree rooted at `root` and return
/// a [`Handle`] to it. Shorthand for [`Root::open`] + [`Root::resolve`].
pub fn open_in_root(
    root: impl AsRef<Path>,
    subpath: impl AsRef<Path>,
) -> Result<Handle, Error> {
    Root::open(root)?.resolve(subpath)
}

/// Like [`open_in_root`], but with the root given as an already-open
/// directory handle.
pub fn open_at_in_root(rootfd: impl AsFd, subpath: impl AsRef<Path>) -> Result<Handle, Error> {
    let rootfd = rootfd
        .as_fd()
        .try_clone_to_owned()
        .map_err(|err| ErrorImpl::OsError {
            operation: "duplicate root fd".into(),
            source: err,
        })?;
    Root::from_fd(rootfd)?.resolve(subpath)
}

/// Create a directory tree at `subpath` inside the directory tree rooted at
/// `root`. Shorthand for [`Root::open`] + [`Root::mkdir_all`].
pub fn mkdir_all(
    root: impl AsRef<Path>,
    subpath: impl AsRef<Path>,
    mode: u32,
) -> Result<(), Error> {
    Root::open(root)?.mkdir_all(subpath, mode).map(drop)
}

/// Like [`mkdir_all`], but with the root given as an already-open directory
/// handle, returning a [`Handle`] to the deepest created directory.
pub fn mkdir_all_handle(
    rootfd: impl AsFd,
    subpath: impl AsRef<Path>,
    mode: u32,
) -> Result<Handle, Error> {
    let rootfd = rootfd
        .as_fd()
        .try_clone_to_owned()
        .map_err(|err| ErrorImpl::OsError {
            operation: "duplicate root fd".into(),
            source: err,
        })?;
    Root::from_fd(rootfd)?.mkdir_all(subpath, mode)
}
