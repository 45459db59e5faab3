//! Redirect tables.
//!
//! A table is a set of (original, replacement) address pairs. Attaching
//! rewrites calls to `original` so they land on `replacement`; detaching
//! runs the identical scan with the pairwise-swapped table.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::types::VirtAddr;

/// One redirection: calls to `original` are rewritten to `replacement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    pub original: VirtAddr,
    pub replacement: VirtAddr,
}

/// A validated set of redirections.
///
/// All addresses across the table (both columns together) are pairwise
/// distinct. Lookups are therefore unambiguous, and the swapped table
/// is valid whenever the forward table is, which is what detaching
/// relies on.
#[derive(Debug, Clone)]
pub struct RedirectTable {
    entries: Vec<Redirect>,
}

impl RedirectTable {
    pub fn new(entries: Vec<Redirect>) -> Result<Self> {
        let mut seen = HashSet::new();
        for r in &entries {
            if !seen.insert(r.original) {
                return Err(Error::Table(format!("address {} appears twice", r.original)));
            }
            if !seen.insert(r.replacement) {
                return Err(Error::Table(format!("address {} appears twice", r.replacement)));
            }
        }
        Ok(Self { entries })
    }

    /// Build a table from raw (original, replacement) address pairs.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(original, replacement)| Redirect {
                    original: VirtAddr(original),
                    replacement: VirtAddr(replacement),
                })
                .collect(),
        )
    }

    /// The replacement for `target`, if `target` is one of the originals.
    pub fn replacement_for(&self, target: VirtAddr) -> Option<VirtAddr> {
        self.entries
            .iter()
            .find(|r| r.original == target)
            .map(|r| r.replacement)
    }

    /// The pairwise-swapped table that undoes this one.
    pub fn swapped(&self) -> RedirectTable {
        RedirectTable {
            entries: self
                .entries
                .iter()
                .map(|r| Redirect {
                    original: r.replacement,
                    replacement: r.original,
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[Redirect] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
