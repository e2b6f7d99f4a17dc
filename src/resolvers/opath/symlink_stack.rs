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

//! Bookkeeping for pending symlink expansions during an emulated walk.
//!
//! When the walk steps into a symlink, the remaining components of the link
//! target replace the link in the walk queue -- but a later partial result
//! must be reported in terms of the *original* path, and a `..` inside the
//! expanded target must not be allowed to silently cross the physical
//! location of the symlink itself. The stack records, for every link still
//! being expanded, where the link lived and how much of its target is left.

use crate::utils::PathIterExt;

use std::{
    collections::VecDeque,
    ffi::{OsStr, OsString},
    os::unix::io::AsFd,
    path::PathBuf,
    rc::Rc,
};

/// Errors returned by [`SymlinkStack`] operations.
///
/// Any of these indicate a bug in the resolver (the stack being driven out
/// of step with the walk), not a problem with the filesystem -- they are
/// surfaced to users as internal errors.
#[derive(thiserror::Error, Debug)]
pub(crate) enum SymlinkStackError {
    #[error("tried to pop part of an empty stack")]
    EmptyStack,

    #[error("tried to pop component {part:?} from an entry with no remaining link parts")]
    PopEmptyEntry { part: OsString },

    #[error("tried to pop component {part:?} but the top entry expects {expected:?}")]
    PopWrongPart { part: OsString, expected: OsString },

    #[error("stack was broken by an earlier invalid operation")]
    AlreadyBroken,
}

/// A single pending symlink expansion.
#[derive(Debug)]
struct SymlinkStackEntry<F: AsFd> {
    /// The directory the symlink lives in.
    dir: Rc<F>,
    /// The not-yet-walked suffix of the lookup at the time the symlink was
    /// hit (including the symlink component itself).
    remaining: PathBuf,
    /// The components of the link target that have not been walked yet. An
    /// empty list means this entry is tail-chained to the entry above it.
    link_unwalked: VecDeque<OsString>,
}

/// Stack of pending symlink expansions.
///
/// The stack is monotonic: once an operation has been rejected the stack is
/// *broken* and every further operation fails with
/// [`SymlinkStackError::AlreadyBroken`].
#[derive(Debug)]
pub(crate) struct SymlinkStack<F: AsFd>(Option<VecDeque<SymlinkStackEntry<F>>>);

impl<F: AsFd> Default for SymlinkStack<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: AsFd> SymlinkStack<F> {
    pub(crate) fn new() -> Self {
        Self(Some(VecDeque::new()))
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(&self.0, Some(stack) if stack.is_empty())
    }

    fn break_stack(&mut self) {
        // Dropping the entries closes their directory handles.
        self.0 = None;
    }

    /// Pop `part` from the top entry, without dropping entries that become
    /// empty (their lifetime may be shared with a tail-chained link).
    fn do_pop_part(&mut self, part: &OsStr) -> Result<(), SymlinkStackError> {
        let stack = self.0.as_mut().ok_or(SymlinkStackError::AlreadyBroken)?;

        // "." components never make it into link_unwalked.
        if part == "." {
            return Ok(());
        }

        match stack.back_mut() {
            None => Err(SymlinkStackError::EmptyStack),
            Some(entry) => match entry.link_unwalked.front() {
                None => Err(SymlinkStackError::PopEmptyEntry { part: part.into() }),
                Some(expected) if expected.as_os_str() != part => {
                    Err(SymlinkStackError::PopWrongPart {
                        part: part.into(),
                        expected: expected.clone(),
                    })
                }
                Some(_) => {
                    entry.link_unwalked.pop_front();
                    Ok(())
                }
            },
        }
    }

    /// Record that the walk consumed the non-symlink component `part`.
    ///
    /// Entries whose link target is now fully walked are dropped, together
    /// with any tail-chained entries below them. Popping a component from an
    /// empty stack is a no-op (the component came from the caller's own
    /// path, not from a link expansion).
    pub(crate) fn pop_part(&mut self, part: &OsStr) -> Result<(), SymlinkStackError> {
        match self.do_pop_part(part) {
            Ok(()) => (),
            Err(SymlinkStackError::EmptyStack) => return Ok(()),
            Err(err) => {
                self.break_stack();
                return Err(err);
            }
        }

        // Drop every entry from the top whose target is fully walked -- the
        // physical component we just consumed ends the whole tail-chain.
        if let Some(stack) = self.0.as_mut() {
            while matches!(stack.back(), Some(entry) if entry.link_unwalked.is_empty()) {
                stack.pop_back();
            }
        }
        Ok(())
    }

    /// Record that the walk hit the symlink component `part` (living in
    /// `dir`, with `remaining` left to walk) whose target is `link_target`.
    ///
    /// If we are currently inside another link's expansion, the symlink
    /// component itself is consumed from that entry first -- but the entry
    /// is kept even if it becomes empty, so that a chain of trailing
    /// symlinks shares its lifetime with the outermost link.
    pub(crate) fn swap_link(
        &mut self,
        part: &OsStr,
        (dir, remaining): (&Rc<F>, PathBuf),
        link_target: PathBuf,
    ) -> Result<(), SymlinkStackError> {
        match self.do_pop_part(part) {
            Ok(()) | Err(SymlinkStackError::EmptyStack) => (),
            Err(err) => {
                self.break_stack();
                return Err(err);
            }
        }

        let stack = self.0.as_mut().ok_or(SymlinkStackError::AlreadyBroken)?;
        let link_unwalked = link_target
            .raw_components()
            .filter(|part| !part.is_empty() && *part != OsStr::new("."))
            .map(OsStr::to_os_string)
            .collect();
        stack.push_back(SymlinkStackEntry {
            dir: Rc::clone(dir),
            remaining,
            link_unwalked,
        });
        Ok(())
    }

    /// Take the outermost pending symlink's `(dir, remaining)`, dropping the
    /// rest of the stack.
    ///
    /// A walk that ends part-way through one or more link expansions uses
    /// this to report its partial result in the context of the original
    /// path the caller gave us, not the expanded link target.
    pub(crate) fn pop_top_symlink(&mut self) -> Option<(Rc<F>, PathBuf)> {
        let stack = self.0.as_mut()?;
        let frame = stack.pop_front()?;
        stack.clear();
        Some((frame.dir, frame.remaining))
    }
}
