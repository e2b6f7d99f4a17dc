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

//! Helpers to operate on `procfs` safely.
//!
//! securejoin itself depends on procfs (path readbacks through
//! `/proc/thread-self/fd` are what let the emulated resolver detect `..`
//! breakouts), which makes procfs a target: an attacker that can overmount
//! parts of `/proc` can spoof those readbacks. [`ProcfsHandle`] exists to
//! get a handle to procfs that is trustworthy -- ideally a brand-new private
//! procfs superblock that cannot have overmounts at all -- and to verify
//! every operation done through it.
//!
//! ```rust,no_run
//! # use securejoin::flags::OpenFlags;
//! # use securejoin::procfs::{ProcfsBase, ProcfsHandle};
//! let proc = ProcfsHandle::new()?;
//!
//! // Open a regular procfs file (never following magic-links).
//! let status = proc.open(ProcfsBase::ProcSelf, "status", OpenFlags::O_RDONLY)?;
//! # let _ = status;
//!
//! // Do a safe readlink.
//! let stdin_path = proc.readlink(ProcfsBase::ProcThreadSelf, "fd/0")?;
//! println!("stdin: {stdin_path:?}");
//! # Ok::<(), securejoin::error::Error>(())
//! ```
//!
//! Handles are intentionally **never cached**: every [`ProcfsHandle::new`]
//! call constructs a fresh handle and callers drop it when their operation
//! completes. A long-lived procfs file descriptor is exactly the kind of
//! thing that ends up leaked into a container.

use crate::{
    error::{Error, ErrorExt, ErrorImpl, ErrorKind},
    flags::{OpenFlags, ResolverFlags},
    resolvers::procfs::ProcfsResolver,
    syscalls,
    utils::{self, kernel_version, FdExt, RawProcfsRoot},
    Handle,
};

use std::{
    fs::File,
    marker::PhantomData,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use rustix::{
    fs::{self as rustix_fs, Access, AtFlags},
    mount::{FsMountFlags, FsOpenFlags, MountAttrFlags, OpenTreeFlags},
};

/// Indicate what base directory should be used when doing `/proc/...`
/// operations with a [`ProcfsHandle`].
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ProcfsBase {
    /// Use `/proc` itself.
    ///
    /// On a restricted (`subset=pid`) [`ProcfsHandle`] this transparently
    /// uses a temporary unrestricted handle for the operation, so handles
    /// returned for `ProcRoot` operations should be treated with extra care
    /// (do not leak them into containers).
    ProcRoot,

    /// Use `/proc/<pid>`.
    ///
    /// Note that this is inherently racy -- the process referenced by the
    /// PID may have died and the PID been recycled. It is only really safe
    /// for PID 1, your own PID/TID (use [`ProcSelf`] / [`ProcThreadSelf`]
    /// instead), and child processes you know have not been reaped.
    ///
    /// [`ProcSelf`]: Self::ProcSelf
    /// [`ProcThreadSelf`]: Self::ProcThreadSelf
    ProcPid(u32),

    /// Use `/proc/self`. For most programs, this is the standard choice.
    ProcSelf,

    /// Use `/proc/thread-self`.
    ///
    /// `/proc/thread-self` refers to whichever kernel task is *currently
    /// executing*, so anything derived from it is only meaningful while
    /// execution stays on the same thread. The public entry point
    /// ([`proc_thread_self`]) returns a [`ProcThreadSelfGuard`] to pin the
    /// using scope to one thread.
    ///
    /// `/proc/thread-self` was added in Linux 3.17; on older kernels
    /// `self/task/<tid>` is used, with a final fallback to `self` for procfs
    /// instances from a different PID namespace where the tid is not
    /// visible.
    ProcThreadSelf,
}

impl ProcfsBase {
    pub(crate) fn into_path(self, proc_rootfd: RawProcfsRoot<'_>) -> PathBuf {
        match self {
            Self::ProcRoot => PathBuf::from("."),
            Self::ProcSelf => PathBuf::from("self"),
            Self::ProcPid(pid) => PathBuf::from(pid.to_string()),
            Self::ProcThreadSelf => [
                // /proc/thread-self was added in Linux 3.17.
                PathBuf::from("thread-self"),
                // For pre-3.17 kernels, the fully-expanded form.
                PathBuf::from(format!("self/task/{}", syscalls::gettid())),
            ]
            .into_iter()
            // Take the first candidate that exists in this procfs instance.
            .find(|base| proc_rootfd.exists_unchecked(base).is_ok())
            // If the tid is not visible in this procfs (it belongs to a
            // different pid namespace), self is the closest approximation.
            .unwrap_or_else(|| PathBuf::from("self")),
        }
    }
}

/// Scope guard returned by [`proc_thread_self`].
///
/// Handles below `/proc/thread-self` are bound to the calling thread. The
/// guard is `!Send`, so holding it (as you must, for as long as you use the
/// handle) keeps the using scope from being moved to another thread by
/// work-stealing executors and similar machinery.
#[must_use = "the guard must be held for as long as the thread-self handle is in use"]
#[derive(Debug)]
pub struct ProcThreadSelfGuard {
    _not_send: PhantomData<*mut ()>,
}

impl ProcThreadSelfGuard {
    fn new() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

/// Whether this kernel has a usable (upstream) version of the new mount
/// API. A working probe is not enough: some distributions shipped broken
/// backports of the new mount API with severe performance problems, so a
/// kernel version of at least 5.2 is also required.
// MSRV(1.80): Use LazyLock.
static HAS_NEW_MOUNT_API: Lazy<bool> = Lazy::new(|| {
    let works = syscalls::open_tree(
        syscalls::BADFD,
        "/",
        OpenTreeFlags::OPEN_TREE_CLOEXEC,
    )
    .is_ok();
    works && kernel_version::is_gte!(5, 2)
});

/// Whether procfs supports the `subset=pid` mount option, probed by trying
/// to set it on a fresh (uninstantiated) procfs mount context.
// MSRV(1.80): Use LazyLock.
static HAS_PROCFS_SUBSET_PID: Lazy<bool> = Lazy::new(|| {
    if !*HAS_NEW_MOUNT_API {
        return false;
    }
    match syscalls::fsopen("proc", FsOpenFlags::FSOPEN_CLOEXEC) {
        Ok(sfd) => syscalls::fsconfig_set_string(&sfd, "subset", "pid").is_ok(),
        Err(_) => false,
    }
});

/// A verified handle to the root of a procfs mount.
///
/// Two variants exist: the default *restricted* handle (mounted with
/// `subset=pid` where supported, hiding all non-process information) and
/// the *unrestricted* one from [`ProcfsHandle::new_unmasked`]. Restricted
/// handles transparently upgrade for single [`ProcfsBase::ProcRoot`]
/// operations; that is the only place an unrestricted handle is used
/// without an explicit request.
#[derive(Debug)]
pub struct ProcfsHandle {
    inner: OwnedFd,
    /// Mount id of the procfs root, if the kernel can report it. Used to
    /// detect overmounts on paths we operate on.
    mnt_id: Option<u64>,
    /// Whether this procfs is restricted (`subset=pid` or `hidepid`).
    is_subset: bool,
    pub(crate) resolver: ProcfsResolver,
}

impl AsFd for ProcfsHandle {
    /// Access the underlying procfs root file descriptor.
    ///
    /// Take great care when operating on this directly -- anything opened
    /// through it without the [`ProcfsHandle`] methods is not protected
    /// against overmount attacks.
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl ProcfsHandle {
    // This is part of Linux's ABI.
    const PROC_ROOT_INO: u64 = 1;

    /// Create a new `fsopen(2)`-based [`ProcfsHandle`]. This handle is safe
    /// against racing attackers changing the mount table and is guaranteed
    /// to have no overmounts because it is a brand-new procfs.
    pub(crate) fn new_fsopen(subset: bool) -> Result<Self, Error> {
        if !*HAS_NEW_MOUNT_API {
            Err(ErrorImpl::NotSupported {
                feature: "fsopen".into(),
            })?
        }

        let sfd =
            syscalls::fsopen("proc", FsOpenFlags::FSOPEN_CLOEXEC).map_err(|err| {
                ErrorImpl::RawOsError {
                    operation: "create procfs superblock".into(),
                    source: err,
                }
            })?;

        if subset && *HAS_PROCFS_SUBSET_PID {
            // Failure to set hidepid= is not fatal, we only lose hardening.
            let _ = syscalls::fsconfig_set_string(&sfd, "hidepid", "ptraceable");
            let _ = syscalls::fsconfig_set_string(&sfd, "subset", "pid");
        }

        syscalls::fsconfig_create(&sfd).map_err(|err| ErrorImpl::RawOsError {
            operation: "instantiate procfs superblock".into(),
            source: err,
        })?;

        // The mount stays detached (it is never attached to the mount
        // tree) -- the anonymous mount fd is all we need.
        syscalls::fsmount(
            &sfd,
            FsMountFlags::FSMOUNT_CLOEXEC,
            MountAttrFlags::MOUNT_ATTR_NODEV
                | MountAttrFlags::MOUNT_ATTR_NOEXEC
                | MountAttrFlags::MOUNT_ATTR_NOSUID,
        )
        .map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "mount new private procfs".into(),
                source: err,
            }
            .into()
        })
        // NOTE: try_from_fd checks this is an actual procfs root.
        .and_then(Self::try_from_fd)
    }

    /// Create a new `open_tree(2)`-based [`ProcfsHandle`], a detached clone
    /// of the host's `/proc` mount. Without `AT_RECURSIVE` the clone cannot
    /// have overmounts; locked mounts (user namespaces) force the recursive
    /// variant.
    pub(crate) fn new_open_tree(flags: OpenTreeFlags) -> Result<Self, Error> {
        if !*HAS_NEW_MOUNT_API {
            Err(ErrorImpl::NotSupported {
                feature: "open_tree".into(),
            })?
        }

        syscalls::open_tree(
            syscalls::BADFD,
            "/proc",
            OpenTreeFlags::OPEN_TREE_CLONE | OpenTreeFlags::OPEN_TREE_CLOEXEC | flags,
        )
        .map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "create private /proc bind-mount".into(),
                source: err,
            }
            .into()
        })
        // NOTE: try_from_fd checks this is an actual procfs root.
        .and_then(Self::try_from_fd)
    }

    /// Create a plain `open(2)`-style [`ProcfsHandle`] from the host's
    /// `/proc`.
    ///
    /// This handle is NOT safe against racing attackers that can modify the
    /// mount table -- the mount-id checks detect static overmounts only.
    pub(crate) fn new_unsafe_open() -> Result<Self, Error> {
        syscalls::openat(
            syscalls::BADFD,
            "/proc",
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
            0,
        )
        .map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "open /proc handle".into(),
                source: err,
            }
            .into()
        })
        // NOTE: try_from_fd checks this is an actual procfs root.
        .and_then(Self::try_from_fd)
    }

    fn acquire(subset: bool) -> Result<Self, Error> {
        Self::new_fsopen(subset)
            .or_else(|_| Self::new_open_tree(OpenTreeFlags::empty()))
            .or_else(|_| Self::new_open_tree(OpenTreeFlags::AT_RECURSIVE))
            .or_else(|_| Self::new_unsafe_open())
            .wrap("get safe procfs handle")
    }

    /// Create a new, fresh handle to a safe `/proc`.
    ///
    /// Construction strategies are tried in order of decreasing safety: a
    /// private `fsopen(2)` procfs superblock (with `subset=pid` and
    /// `hidepid=ptraceable` where supported), a detached `open_tree(2)`
    /// clone of the host `/proc`, and finally a regular `open(2)` of the
    /// host `/proc`.
    ///
    /// Handles are never cached -- each call produces a fresh handle, to be
    /// dropped as soon as the caller's operation is done.
    pub fn new() -> Result<Self, Error> {
        Self::acquire(true)
    }

    /// Like [`ProcfsHandle::new`], but without requesting `subset=pid`.
    ///
    /// Only use this if you need to do repeated operations on global procfs
    /// files (`ProcfsBase::ProcRoot`). Leaking this file descriptor into
    /// a container is far more dangerous than leaking a restricted one.
    pub fn new_unmasked() -> Result<Self, Error> {
        Self::acquire(false)
    }

    /// Try to convert a regular file handle to a [`ProcfsHandle`]. This
    /// method will return an error if the file handle is not actually the
    /// root of a procfs mount.
    pub fn try_from_fd<Fd: Into<OwnedFd>>(inner: Fd) -> Result<Self, Error> {
        let inner = inner.into();

        // Make sure the file is actually a procfs root.
        verify_is_procfs_root(inner.as_fd()).with_wrap(|| {
            format!(
                "check if candidate procfs root fd {} is a procfs root",
                syscalls::FrozenFd::from(&inner),
            )
        })?;

        let mnt_id = utils::fetch_mnt_id(&inner, "").with_wrap(|| {
            format!(
                "get mount id for candidate procfs root fd {}",
                syscalls::FrozenFd::from(&inner),
            )
        })?;
        let resolver = ProcfsResolver::default();

        // Figure out if the mount is subset=pid or hidepid=. For hidepid we
        // check whether /proc/1 is resolvable -- if we cannot access the
        // init process then hidepid is masking things from us.
        let is_subset = [/* subset=pid */ "stat", /* hidepid=n */ "1"]
            .iter()
            .any(|&subpath| {
                syscalls::accessat(
                    inner.as_fd(),
                    subpath,
                    Access::EXISTS,
                    AtFlags::SYMLINK_NOFOLLOW,
                )
                .is_err()
            });

        Ok(Self {
            inner,
            mnt_id,
            is_subset,
            resolver,
        })
    }

    pub(crate) fn as_raw_procfs(&self) -> RawProcfsRoot<'_> {
        RawProcfsRoot::UnsafeFd(self.as_fd())
    }

    /// Whether this handle is restricted (`subset=pid` or `hidepid`).
    pub fn is_restricted(&self) -> bool {
        self.is_subset
    }

    /// Do a lookup inside the procfs, verifying the result landed on our
    /// procfs mount.
    fn openat_raw(
        &self,
        dirfd: BorrowedFd<'_>,
        subpath: &Path,
        oflags: OpenFlags,
    ) -> Result<OwnedFd, Error> {
        let fd = self
            .resolver
            .resolve(dirfd, subpath, oflags, ResolverFlags::empty())?;
        self.verify_same_procfs_mnt(&fd).with_wrap(|| {
            format!(
                "validate that procfs subpath fd {} is on the same procfs mount",
                syscalls::FrozenFd::from(&fd),
            )
        })?;
        Ok(fd)
    }

    /// Open the `ProcfsBase` directory itself.
    fn open_base(&self, base: ProcfsBase) -> Result<OwnedFd, Error> {
        self.openat_raw(
            self.as_fd(),
            &base.into_path(self.as_raw_procfs()),
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
        )
    }

    /// If this handle is restricted and the operation needs the procfs
    /// root, produce a temporary unrestricted handle to run it on instead.
    fn upgrade_for(&self, base: ProcfsBase) -> Result<Option<Self>, Error> {
        if !self.is_subset || base != ProcfsBase::ProcRoot {
            return Ok(None);
        }
        let unmasked =
            Self::new_unmasked().wrap("get unmasked procfs handle for ProcRoot operation")?;
        // If even the unmasked handle is restricted (the host /proc has
        // hidepid and we couldn't make a private mount), upgrading again
        // would loop -- use whatever we have.
        Ok(if unmasked.is_subset {
            None
        } else {
            Some(unmasked)
        })
    }

    /// Safely open a path inside `procfs`.
    ///
    /// The provided `subpath` is relative to the [`ProcfsBase`] and must
    /// not contain `..` components. This method *will not follow any
    /// magic-links*, and implies `O_NOFOLLOW` so trailing symlinks are not
    /// followed either (regular symlink components inside procfs are
    /// followed, scoped to the procfs mount). All mount-point crossings are
    /// rejected.
    ///
    /// If you need to open a magic-link (such as `thread-self/fd/<n>` or
    /// `self/exe`), use [`ProcfsHandle::open_follow`].
    pub fn open(
        &self,
        base: ProcfsBase,
        subpath: impl AsRef<Path>,
        oflags: impl Into<OpenFlags>,
    ) -> Result<File, Error> {
        let subpath = subpath.as_ref();
        let mut oflags = oflags.into();
        // Force-set O_NOFOLLOW.
        oflags.insert(OpenFlags::O_NOFOLLOW);

        if let Some(unmasked) = self.upgrade_for(base)? {
            return unmasked.open(base, subpath, oflags);
        }

        let fd = self.openat_raw(self.open_base(base)?.as_fd(), subpath, oflags)?;
        Ok(fd.into())
    }

    /// Safely open a *trailing* magic-link inside `procfs`.
    ///
    /// This behaves like [`ProcfsHandle::open`] except that the final
    /// component may be a magic-link, which is opened after verifying that
    /// no mount shadows the link itself. Magic-links as non-final
    /// components are still rejected, and a trailing `/` on `subpath`
    /// implies `O_DIRECTORY`.
    pub fn open_follow(
        &self,
        base: ProcfsBase,
        subpath: impl AsRef<Path>,
        oflags: impl Into<OpenFlags>,
    ) -> Result<File, Error> {
        let subpath = subpath.as_ref();
        let mut oflags = oflags.into();

        // Drop any trailing /-es.
        let (subpath, trailing_slash) = utils::path_strip_trailing_slash(subpath);
        if trailing_slash {
            // A trailing / implies we want O_DIRECTORY.
            oflags.insert(OpenFlags::O_DIRECTORY);
        }

        if let Some(unmasked) = self.upgrade_for(base)? {
            return unmasked.open_follow(base, subpath, oflags);
        }

        // If the target is not actually a magic-link, the regular resolver
        // can open it (including real symlinks), which is much safer. The
        // resolver reports a magic-link as ELOOP; any other error is final.
        match self.openat_raw(self.open_base(base)?.as_fd(), subpath, oflags) {
            Ok(fd) => return Ok(fd.into()),
            Err(err) => {
                // NOTE: An attacker could bind-mount a magic-link over a
                // regular symlink to force this ELOOP and then drop the
                // mount again -- only fsopen(2)-backed handles are immune
                // to mount races here.
                if err.kind() != ErrorKind::OsError(Some(libc::ELOOP)) {
                    return Err(err);
                }
            }
        }

        // Get a no-follow handle to the parent of the magic-link.
        let (parent, trailing) = utils::path_split(subpath);
        let trailing = trailing.ok_or_else(|| ErrorImpl::InvalidArgument {
            name: "subpath".into(),
            description: "open_follow path has no trailing component".into(),
        })?;

        let parentdir = self.openat_raw(
            self.open_base(base)?.as_fd(),
            parent,
            OpenFlags::O_PATH | OpenFlags::O_DIRECTORY,
        )?;

        // Detect if the magic-link we are about to open is shadowed by a
        // bind-mount. There is no "statfsat" so the filesystem type of the
        // link itself cannot be checked, but an attacker can construct any
        // magic-link they like within procfs anyway -- the mount id is the
        // meaningful check.
        self.check_subpath_overmount(&parentdir, trailing)
            .with_wrap(|| {
                format!(
                    "check that parent dir {} and {trailing:?} are on the same procfs mount",
                    syscalls::FrozenFd::from(&parentdir),
                )
            })?;

        syscalls::openat_follow(&parentdir, trailing, oflags, 0)
            .map(File::from)
            .map_err(|err| {
                ErrorImpl::RawOsError {
                    operation: "open final magic-link component".into(),
                    source: err,
                }
                .into()
            })
    }

    /// Safely read the contents of a symlink inside `procfs`.
    ///
    /// This is shorthand for opening the link with `O_PATH` (which verifies
    /// there is no overmount shadowing it) and reading the target through
    /// the handle, so all of the caveats of [`ProcfsHandle::open`] apply.
    pub fn readlink(
        &self,
        base: ProcfsBase,
        subpath: impl AsRef<Path>,
    ) -> Result<PathBuf, Error> {
        let link = self.open(base, subpath, OpenFlags::O_PATH)?;
        syscalls::readlinkat(&link, "").map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "read procfs magic-link".into(),
                source: err,
            }
            .into()
        })
    }

    /// Read the kernel's idea of the path `fd` refers to, through this
    /// procfs handle's `thread-self/fd/<n>` magic-link.
    pub(crate) fn readlink_fd(&self, fd: BorrowedFd<'_>) -> Result<PathBuf, Error> {
        self.readlink(
            ProcfsBase::ProcThreadSelf,
            format!("fd/{}", fd.as_raw_fd()),
        )
    }

    /// Verify that `(dirfd, name)` lies on this handle's procfs mount and
    /// is thus not shadowed by an overmount.
    pub fn check_subpath_overmount(
        &self,
        dirfd: impl AsFd,
        name: impl AsRef<Path>,
    ) -> Result<(), Error> {
        verify_same_mnt(self.mnt_id, dirfd, name)
    }

    fn verify_same_procfs_mnt(&self, fd: impl AsFd) -> Result<(), Error> {
        // Detect if the file we landed on is from a bind-mount.
        verify_same_mnt(self.mnt_id, &fd, "")?;
        // For pre-STATX_MNT_ID kernels the mount-id check is a no-op, and
        // the filesystem type is the only remaining signal. Attackers can
        // still bind-mount procfs files over procfs files there.
        verify_is_procfs(&fd)
    }

    /// Re-open `fd` through this procfs handle's `thread-self/fd/<n>`
    /// magic-link with the given flags (`O_CLOEXEC` is always set).
    pub(crate) fn reopen(&self, fd: BorrowedFd<'_>, oflags: OpenFlags) -> Result<OwnedFd, Error> {
        self.open_follow(
            ProcfsBase::ProcThreadSelf,
            format!("fd/{}", fd.as_raw_fd()),
            oflags,
        )
        .map(OwnedFd::from)
    }
}

pub(crate) fn verify_is_procfs(fd: impl AsFd) -> Result<(), Error> {
    let fs_type = syscalls::fstatfs(&fd)
        .map_err(|err| ErrorImpl::RawOsError {
            operation: "fstatfs candidate procfs handle".into(),
            source: err,
        })?
        .f_type;
    if fs_type != rustix_fs::PROC_SUPER_MAGIC {
        Err(ErrorImpl::UnsafeProcfs {
            description: format!(
                "fstype mismatch (f_type is 0x{fs_type:X}, not procfs 0x{:X})",
                rustix_fs::PROC_SUPER_MAGIC,
            )
            .into(),
        })?
    }
    Ok(())
}

pub(crate) fn verify_is_procfs_root(fd: impl AsFd) -> Result<(), Error> {
    let fd = fd.as_fd();

    // Make sure the file is actually on procfs.
    verify_is_procfs(fd)?;

    // And make sure it is the root of procfs. The root directory is
    // guaranteed to have an inode number of PROC_ROOT_INO -- if this check
    // ever stops working, it is a kernel regression.
    let ino = fd.stat().wrap("fstat candidate procfs root")?.st_ino;
    if ino != ProcfsHandle::PROC_ROOT_INO {
        Err(ErrorImpl::UnsafeProcfs {
            description: format!(
                "fd is not the root of a procfs mount (ino is 0x{ino:X}, not 0x{:X})",
                ProcfsHandle::PROC_ROOT_INO,
            )
            .into(),
        })?
    }

    Ok(())
}

pub(crate) fn verify_same_mnt(
    root_mnt_id: Option<u64>,
    dirfd: impl AsFd,
    path: impl AsRef<Path>,
) -> Result<(), Error> {
    let mnt_id = utils::fetch_mnt_id(&dirfd, path)?;
    match (root_mnt_id, mnt_id) {
        (Some(root_mnt_id), Some(mnt_id)) if root_mnt_id != mnt_id => {
            Err(ErrorImpl::UnsafeProcfs {
                description: format!(
                    "mount id mismatch (mnt_id is {mnt_id}, not procfs {root_mnt_id})",
                )
                .into(),
            })?
        }
        // Pre-STATX_MNT_ID kernels cannot tell us the mount id at all; the
        // caller's fs-magic checks are the only protection there.
        _ => Ok(()),
    }
}

/// Open a subpath below `/proc/self`, returning an `O_PATH` [`Handle`].
///
/// A fresh [`ProcfsHandle`] is constructed for (and dropped at the end of)
/// every call.
pub fn proc_self(subpath: impl AsRef<Path>) -> Result<Handle, Error> {
    let subpath = subpath.as_ref();
    let procfs = ProcfsHandle::new()?;
    let file = procfs.open(ProcfsBase::ProcSelf, subpath, OpenFlags::O_PATH)?;
    Ok(Handle::new(
        file.into(),
        PathBuf::from("/proc/self").join(subpath),
    ))
}

/// Open a subpath below `/proc/thread-self`, returning an `O_PATH`
/// [`Handle`] and a guard pinning the using scope to this thread.
///
/// The guard must be held until you are done with the handle (and anything
/// derived from it): `/proc/thread-self` describes whichever task is
/// currently executing, so moving to another thread rebinds what the handle
/// means.
pub fn proc_thread_self(
    subpath: impl AsRef<Path>,
) -> Result<(Handle, ProcThreadSelfGuard), Error> {
    let subpath = subpath.as_ref();
    // The guard exists before the handle, so the lookup below is already
    // thread-bound.
    let guard = ProcThreadSelfGuard::new();
    let procfs = ProcfsHandle::new()?;
    let file = procfs.open(ProcfsBase::ProcThreadSelf, subpath, OpenFlags::O_PATH)?;
    Ok((
        Handle::new(
            file.into(),
            PathBuf::from("/proc/thread-self").join(subpath),
        ),
        guard,
    ))
}

/// Open a subpath below `/proc/<pid>`, returning an `O_PATH` [`Handle`].
///
/// See [`ProcfsBase::ProcPid`] for the inherent PID-reuse caveats.
pub fn proc_pid(pid: u32, subpath: impl AsRef<Path>) -> Result<Handle, Error> {
    let subpath = subpath.as_ref();
    let procfs = ProcfsHandle::new()?;
    let file = procfs.open(ProcfsBase::ProcPid(pid), subpath, OpenFlags::O_PATH)?;
    Ok(Handle::new(
        file.into(),
        PathBuf::from(format!("/proc/{pid}")).join(subpath),
    ))
}

/// Open a subpath below `/proc` itself, returning an `O_PATH` [`Handle`].
///
/// Global procfs files are hidden from restricted handles, so this
/// internally uses an unrestricted handle for the single operation.
pub fn proc_root(subpath: impl AsRef<Path>) -> Result<Handle, Error> {
    let subpath = subpath.as_ref();
    let procfs = ProcfsHandle::new()?;
    let file = procfs.open(ProcfsBase::ProcRoot, subpath, OpenFlags::O_PATH)?;
    Ok(Handle::new(file.into(), PathBuf::from("/proc").join(subpath)))
}

/// Read the kernel's idea of the path `fd` currently refers to, via
/// `/proc/thread-self/fd/<n>`.
///
/// The returned path is the kernel's view at the time of the call and may
/// be stale by the time you look at it; treat it as advisory.
pub fn proc_self_fd_readlink(fd: impl AsFd) -> Result<PathBuf, Error> {
    ProcfsHandle::new()?.readlink_fd(fd.as_fd())
}
