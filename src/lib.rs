//! rewire — call redirection for compiled module code.
//!
//! Scans the executable areas of a module for direct near calls whose
//! targets appear in a redirect table and rewrites their relative
//! displacements in place, so the calls land on replacement functions.
//! Running the identical scan with the pairwise-swapped table restores
//! the original targets to byte equality.
//!
//! # Module overview
//!
//! ## Engine
//!
//! - [`error`] — Error types used throughout the crate.
//! - [`types`] — Core types: `VirtAddr`, `PointerWidth`.
//! - [`decode`] — The instruction decoding capability and the iced-x86 adapter.
//! - [`region`] — Borrowed views over executable code areas.
//! - [`redirect`] — Validated original/replacement address tables.
//! - [`patch`] — Displacement rewriting for direct near calls.
//! - [`scan`] — The instruction-by-instruction area scanner.
//!
//! ## Module handling
//!
//! - [`module`] — The module directory capability (find, pin, regions).
//! - [`image`] — ELF images as patchable modules; the image directory.
//! - [`session`] — Attach/detach coordination and its state machine.

pub mod error;
pub mod types;
pub mod decode;
pub mod region;
pub mod redirect;
pub mod patch;
pub mod scan;
pub mod module;
pub mod image;
pub mod session;
