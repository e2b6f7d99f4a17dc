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

//! Thin wrappers around the raw syscalls used by securejoin.
//!
//! Every wrapper takes a parent directory handle and a name (never a bare
//! path relative to the current working directory -- use [`BADFD`] to force
//! such lookups to fail), always sets `O_CLOEXEC`, and returns a structured
//! [`Error`] recording the syscall name and its arguments so that failures
//! deep inside a resolution are still debuggable after wrapping.

use crate::flags::OpenFlags;

use std::{
    ffi::{CString, OsString},
    fmt,
    io::Error as IOError,
    os::unix::{
        ffi::{OsStrExt, OsStringExt},
        io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    },
    path::{Path, PathBuf},
};

use rustix::{
    fs::{self as rustix_fs, Access, AtFlags, Mode, OFlags, ResolveFlags, Stat, StatFs, Statx,
         StatxFlags},
    io::Errno,
    mount::{FsMountFlags, FsOpenFlags, MountAttrFlags, OpenTreeFlags},
};

/// A file descriptor that is guaranteed to be invalid.
///
/// Passing this as the `dirfd` of any `*at(2)` syscall forces relative paths
/// to fail with `EBADF`, which is how we refuse to ever do lookups relative
/// to the current working directory.
// SAFETY: -EBADF is never a valid file descriptor, and the kernel rejects it
//         for every dirfd argument (it is not AT_FDCWD).
pub(crate) const BADFD: BorrowedFd<'static> =
    unsafe { BorrowedFd::borrow_raw(-libc::EBADF) };

/// `AT_FDCWD`, for the few places where cwd-relative lookups are wanted
/// (opening a user-provided root path).
pub(crate) use rustix_fs::CWD;

/// A snapshot of a file descriptor for error messages.
///
/// The kernel's idea of the fd's path is captured at construction time (best
/// effort, through the unverified `/proc/self/fd` -- this is only ever used
/// for diagnostics, never for safety decisions).
#[derive(Clone, Debug)]
pub(crate) struct FrozenFd(RawFd, Option<OsString>);

impl From<RawFd> for FrozenFd {
    fn from(fd: RawFd) -> Self {
        // readlink(/proc/self/fd/...) can fail (procfs may not be mounted);
        // the fd number alone is still useful.
        let path = readlinkat(CWD, format!("/proc/self/fd/{fd}"))
            .ok()
            .map(PathBuf::into_os_string);
        Self(fd, path)
    }
}

impl From<BorrowedFd<'_>> for FrozenFd {
    fn from(fd: BorrowedFd<'_>) -> Self {
        fd.as_raw_fd().into()
    }
}

impl<Fd: AsRawFd> From<&Fd> for FrozenFd {
    fn from(fd: &Fd) -> Self {
        fd.as_raw_fd().into()
    }
}

impl fmt::Display for FrozenFd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.1 {
            Some(path) => write!(f, "{} [{:?}]", self.0, path),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Structured error type for raw syscall failures.
#[derive(thiserror::Error, Debug)]
#[error("{name}({args}) failed")]
pub(crate) struct Error {
    name: &'static str,
    args: String,
    #[source]
    source: IOError,
}

impl Error {
    fn new(name: &'static str, args: String, source: IOError) -> Self {
        Self { name, args, source }
    }

    fn from_errno(name: &'static str, args: String, errno: Errno) -> Self {
        Self::new(name, args, IOError::from(errno))
    }

    /// Get the underlying [`IOError`] that caused the syscall failure.
    pub(crate) fn root_cause(&self) -> &IOError {
        &self.source
    }
}

/// `openat(2)`, following trailing symlinks.
///
/// `O_CLOEXEC` and `O_NOCTTY` are always applied.
pub(crate) fn openat_follow<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenFlags,
    mode: u32,
) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();
    let flags = flags | OpenFlags::O_CLOEXEC | OpenFlags::O_NOCTTY;

    rustix_fs::openat(
        dirfd,
        path,
        OFlags::from_bits_retain(flags.bits() as u32),
        Mode::from_bits_retain(mode),
    )
    .map_err(|errno| {
        Error::from_errno(
            "openat",
            format!("{}, {path:?}, {flags:?}, 0o{mode:o}", FrozenFd::from(dirfd)),
            errno,
        )
    })
}

/// `openat(2)`, not following trailing symlinks.
///
/// This is the default open primitive used by the resolvers -- `O_NOFOLLOW`
/// (as well as `O_CLOEXEC` and `O_NOCTTY`) is always applied.
pub(crate) fn openat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenFlags,
    mode: u32,
) -> Result<OwnedFd, Error> {
    openat_follow(dirfd, path, flags | OpenFlags::O_NOFOLLOW, mode)
}

/// Arguments for [`openat2_follow`], mirroring `struct open_how`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct OpenHow {
    pub flags: u64,
    pub mode: u64,
    pub resolve: u64,
}

/// `openat2(2)`.
///
/// `O_CLOEXEC` is always applied. The kernel returns `EAGAIN` if it detected
/// a rename or mount racing with a scoped resolution, so a bounded number of
/// retries are performed before giving up and returning the `EAGAIN`.
pub(crate) fn openat2_follow<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    how: OpenHow,
) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();

    #[cfg(feature = "_test_enosys_openat2")]
    {
        return Err(Error::from_errno(
            "openat2",
            format!("{}, {path:?}, {how:?}", FrozenFd::from(dirfd)),
            Errno::NOSYS,
        ));
    }

    #[cfg(not(feature = "_test_enosys_openat2"))]
    {
        let oflags = OFlags::from_bits_retain(how.flags as u32) | OFlags::CLOEXEC;
        let mode = Mode::from_bits_retain(how.mode as rustix_fs::RawMode);
        let resolve = ResolveFlags::from_bits_retain(how.resolve);

        let mut attempts_left = 4;
        loop {
            match rustix_fs::openat2(dirfd, path, oflags, mode, resolve) {
                Err(Errno::AGAIN) if attempts_left > 0 => attempts_left -= 1,
                res => {
                    return res.map_err(|errno| {
                        if errno == Errno::NOSYS {
                            openat2::record_failure();
                        }
                        Error::from_errno(
                            "openat2",
                            format!("{}, {path:?}, {how:?}", FrozenFd::from(dirfd)),
                            errno,
                        )
                    });
                }
            }
        }
    }
}

pub(crate) mod openat2 {
    //! Support probing for `openat2(2)`.

    use super::OpenHow;
    use crate::flags::OpenFlags;

    use std::sync::atomic::{AtomicBool, Ordering};

    use once_cell::sync::Lazy;

    /// Set whenever a real `openat2(2)` call came back with `ENOSYS`, so that
    /// later backend selection can skip it without issuing a probe syscall.
    static SAW_FAILURE: AtomicBool = AtomicBool::new(false);

    pub(super) fn record_failure() {
        SAW_FAILURE.store(true, Ordering::Relaxed);
    }

    /// Whether a previous `openat2(2)` call has ever failed with `ENOSYS`.
    ///
    /// Unlike [`openat2_is_not_supported`] this never issues a syscall, which
    /// makes it suitable for hot paths that just need a cheap hint.
    pub(crate) fn saw_openat2_failure() -> bool {
        SAW_FAILURE.load(Ordering::Relaxed)
    }

    // MSRV(1.80): Use LazyLock.
    static NOT_SUPPORTED: Lazy<bool> = Lazy::new(|| {
        // Benign probe: resolve "." beneath the cwd. Any result other than
        // ENOSYS (even an error) means the syscall exists.
        match super::openat2_follow(
            super::CWD,
            ".",
            OpenHow {
                flags: (OpenFlags::O_PATH | OpenFlags::O_DIRECTORY).bits() as u64,
                resolve: libc::RESOLVE_IN_ROOT,
                ..Default::default()
            },
        ) {
            Ok(_) => false,
            Err(err) => err.root_cause().raw_os_error() == Some(libc::ENOSYS),
        }
    });

    /// Memoized check for whether `openat2(2)` is supported on this system,
    /// evaluated at most once per process.
    pub(crate) fn openat2_is_not_supported() -> bool {
        *NOT_SUPPORTED || saw_openat2_failure()
    }
}

/// `readlinkat(2)` in its empty-path form.
///
/// Passing `""` as `path` reads the target of the symlink referenced by
/// `dirfd` itself (which must have been opened with `O_PATH|O_NOFOLLOW`),
/// avoiding a second lookup of the link's name. The buffer is grown until
/// the returned length is strictly smaller than its capacity, so truncated
/// targets are never returned.
pub(crate) fn readlinkat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
) -> Result<PathBuf, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();

    // NOTE: The error arguments here deliberately do not use FrozenFd --
    // FrozenFd's path snapshot is itself produced by this function, so a
    // failing readlinkat inside a FrozenFd would recurse forever.
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        Error::from_errno(
            "readlinkat",
            format!("{}, {path:?}", dirfd.as_raw_fd()),
            Errno::INVAL,
        )
    })?;

    let mut capacity = 128;
    loop {
        let mut buf = vec![0u8; capacity];
        // SAFETY: The buffer is valid for writes of its full length, and the
        //         kernel never writes more than the length we pass it.
        let len = unsafe {
            libc::readlinkat(
                dirfd.as_raw_fd(),
                c_path.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if len < 0 {
            return Err(Error::new(
                "readlinkat",
                format!("{}, {path:?}", dirfd.as_raw_fd()),
                IOError::last_os_error(),
            ));
        }
        let len = len as usize;
        if len < capacity {
            buf.truncate(len);
            return Ok(PathBuf::from(OsString::from_vec(buf)));
        }
        capacity *= 2;
    }
}

/// `fstat(2)`.
pub(crate) fn fstat<Fd: AsFd>(fd: Fd) -> Result<Stat, Error> {
    let fd = fd.as_fd();
    rustix_fs::fstat(fd)
        .map_err(|errno| Error::from_errno("fstat", format!("{}", FrozenFd::from(fd)), errno))
}

/// `fstatfs(2)`.
pub(crate) fn fstatfs<Fd: AsFd>(fd: Fd) -> Result<StatFs, Error> {
    let fd = fd.as_fd();
    rustix_fs::fstatfs(fd)
        .map_err(|errno| Error::from_errno("fstatfs", format!("{}", FrozenFd::from(fd)), errno))
}

/// `statx(2)`.
pub(crate) fn statx<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: AtFlags,
    mask: StatxFlags,
) -> Result<Statx, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();

    #[cfg(feature = "_test_enosys_statx")]
    {
        return Err(Error::from_errno(
            "statx",
            format!("{}, {path:?}, {flags:?}, {mask:?}", FrozenFd::from(dirfd)),
            Errno::NOSYS,
        ));
    }

    #[cfg(not(feature = "_test_enosys_statx"))]
    {
        rustix_fs::statx(dirfd, path, flags, mask).map_err(|errno| {
            Error::from_errno(
                "statx",
                format!("{}, {path:?}, {flags:?}, {mask:?}", FrozenFd::from(dirfd)),
                errno,
            )
        })
    }
}

/// `mkdirat(2)`.
pub(crate) fn mkdirat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    mode: u32,
) -> Result<(), Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();
    rustix_fs::mkdirat(dirfd, path, Mode::from_bits_retain(mode)).map_err(|errno| {
        Error::from_errno(
            "mkdirat",
            format!("{}, {path:?}, 0o{mode:o}", FrozenFd::from(dirfd)),
            errno,
        )
    })
}

/// `faccessat(2)`.
pub(crate) fn accessat<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    access: Access,
    flags: AtFlags,
) -> Result<(), Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();
    rustix_fs::accessat(dirfd, path, access, flags).map_err(|errno| {
        Error::from_errno(
            "faccessat",
            format!("{}, {path:?}, {access:?}, {flags:?}", FrozenFd::from(dirfd)),
            errno,
        )
    })
}

/// `fsopen(2)`.
pub(crate) fn fsopen(fstype: &str, flags: FsOpenFlags) -> Result<OwnedFd, Error> {
    rustix::mount::fsopen(fstype, flags)
        .map_err(|errno| Error::from_errno("fsopen", format!("{fstype:?}, {flags:?}"), errno))
}

/// `fsconfig(2)` with `FSCONFIG_SET_STRING`.
pub(crate) fn fsconfig_set_string<Fd: AsFd>(
    sfd: Fd,
    key: &str,
    value: &str,
) -> Result<(), Error> {
    let sfd = sfd.as_fd();
    rustix::mount::fsconfig_set_string(sfd, key, value).map_err(|errno| {
        Error::from_errno(
            "fsconfig",
            format!(
                "{}, FSCONFIG_SET_STRING, {key:?}, {value:?}",
                FrozenFd::from(sfd)
            ),
            errno,
        )
    })
}

/// `fsconfig(2)` with `FSCONFIG_CMD_CREATE`.
pub(crate) fn fsconfig_create<Fd: AsFd>(sfd: Fd) -> Result<(), Error> {
    let sfd = sfd.as_fd();
    rustix::mount::fsconfig_create(sfd).map_err(|errno| {
        Error::from_errno(
            "fsconfig",
            format!("{}, FSCONFIG_CMD_CREATE", FrozenFd::from(sfd)),
            errno,
        )
    })
}

/// `fsmount(2)`.
pub(crate) fn fsmount<Fd: AsFd>(
    sfd: Fd,
    flags: FsMountFlags,
    mount_attrs: MountAttrFlags,
) -> Result<OwnedFd, Error> {
    let sfd = sfd.as_fd();
    rustix::mount::fsmount(sfd, flags, mount_attrs).map_err(|errno| {
        Error::from_errno(
            "fsmount",
            format!("{}, {flags:?}, {mount_attrs:?}", FrozenFd::from(sfd)),
            errno,
        )
    })
}

/// `open_tree(2)`.
pub(crate) fn open_tree<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenTreeFlags,
) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();
    rustix::mount::open_tree(dirfd, path, flags).map_err(|errno| {
        Error::from_errno(
            "open_tree",
            format!("{}, {path:?}, {flags:?}", FrozenFd::from(dirfd)),
            errno,
        )
    })
}

/// `gettid(2)`.
pub(crate) fn gettid() -> libc::pid_t {
    rustix::thread::gettid().as_raw_nonzero().get()
}

/// `getpid(2)`.
#[cfg(test)]
pub(crate) fn getpid() -> libc::pid_t {
    rustix::process::getpid().as_raw_nonzero().get()
}

/// `geteuid(2)`.
pub(crate) fn geteuid() -> u32 {
    rustix::process::geteuid().as_raw()
}

/// `getegid(2)`.
pub(crate) fn getegid() -> u32 {
    rustix::process::getegid().as_raw()
}
