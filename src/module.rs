//! The module capability.
//!
//! The engine never consults a global module registry. Whoever hosts it
//! supplies a [`ModuleDirectory`], which resolves names to modules, pins
//! them against unloading, and hands out their code regions.

use crate::error::Result;
use crate::region::CodeRegion;

/// Opaque handle to a module within one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleId(pub usize);

/// The patchable code areas of one module.
///
/// Initialization code is present only while the module keeps it
/// around; the core area always exists.
pub struct ModuleRegions<'a> {
    pub init: Option<CodeRegion<'a>>,
    pub core: CodeRegion<'a>,
}

/// Source of modules: lookup, lifetime pinning, region access.
///
/// `pin` must guarantee the module and its code stay loaded until the
/// matching `unpin`.
pub trait ModuleDirectory {
    /// Resolve a module name.
    fn find(&self, name: &str) -> Option<ModuleId>;

    /// Prevent the module from unloading until `unpin`.
    fn pin(&mut self, id: ModuleId) -> Result<()>;

    /// Release one pin. Unbalanced unpins are ignored.
    fn unpin(&mut self, id: ModuleId);

    /// Borrow the module's code regions.
    fn regions(&mut self, id: ModuleId) -> Result<ModuleRegions<'_>>;
}
