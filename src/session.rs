//! The redirection coordinator.
//!
//! A `RedirectSession` owns one redirect table and drives the scanner
//! over a module's regions: `attach` rewrites matching calls to their
//! replacements, `detach` runs the identical scan with the swapped
//! table. Reversal works because a patched call's target is exactly the
//! replacement address, so the second pass finds it again.

use log::{info, warn};

use crate::decode::{IcedDecoder, InstructionDecoder};
use crate::error::{Error, Result};
use crate::module::{ModuleDirectory, ModuleRegions};
use crate::redirect::RedirectTable;
use crate::scan::{scan_region, ScanStats};
use crate::types::PointerWidth;

/// Whether the session's module currently carries the redirections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unpatched,
    Patched,
}

/// Per-area stats of one attach or detach.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub init: Option<ScanStats>,
    pub core: ScanStats,
}

impl ScanReport {
    /// Calls rewritten across all areas.
    pub fn patched(&self) -> usize {
        self.core.patched + self.init.as_ref().map_or(0, |s| s.patched)
    }

    /// True when every area was scanned to its end.
    pub fn completed(&self) -> bool {
        self.core.completed() && self.init.as_ref().map_or(true, |s| s.completed())
    }
}

pub struct RedirectSession<D = IcedDecoder> {
    table: RedirectTable,
    decoder: D,
    width: PointerWidth,
    state: SessionState,
}

impl RedirectSession<IcedDecoder> {
    /// Session over the default decoder.
    pub fn new(table: RedirectTable, width: PointerWidth) -> Self {
        Self::with_decoder(table, IcedDecoder::new(width), width)
    }

    /// Session that considers its module already patched, for undoing
    /// redirections applied earlier, possibly by another process.
    pub fn resume_attached(table: RedirectTable, width: PointerWidth) -> Self {
        let mut session = Self::new(table, width);
        session.state = SessionState::Patched;
        session
    }
}

impl<D: InstructionDecoder> RedirectSession<D> {
    pub fn with_decoder(table: RedirectTable, decoder: D, width: PointerWidth) -> Self {
        Self {
            table,
            decoder,
            width,
            state: SessionState::Unpatched,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn table(&self) -> &RedirectTable {
        &self.table
    }

    /// Rewrite matching calls in the module's areas.
    pub fn attach(&mut self, regions: &mut ModuleRegions<'_>) -> Result<ScanReport> {
        if self.state == SessionState::Patched {
            return Err(Error::AlreadyAttached);
        }
        let report = self.run(regions, &self.table);
        self.state = SessionState::Patched;
        Ok(report)
    }

    /// Undo the redirections with the swapped table.
    pub fn detach(&mut self, regions: &mut ModuleRegions<'_>) -> Result<ScanReport> {
        if self.state == SessionState::Unpatched {
            return Err(Error::NotAttached);
        }
        let swapped = self.table.swapped();
        let report = self.run(regions, &swapped);
        self.state = SessionState::Unpatched;
        Ok(report)
    }

    /// Find and pin `name` in the directory, then attach. The pin is
    /// held until `detach_module` so the module cannot go away under
    /// its patches.
    pub fn attach_module(
        &mut self,
        dir: &mut dyn ModuleDirectory,
        name: &str,
    ) -> Result<ScanReport> {
        if self.state == SessionState::Patched {
            return Err(Error::AlreadyAttached);
        }
        let id = match dir.find(name) {
            Some(id) => id,
            None => {
                warn!("module '{}' not found, nothing patched", name);
                return Err(Error::ModuleNotFound(name.to_string()));
            }
        };
        if let Err(e) = dir.pin(id) {
            warn!("could not pin module '{}', nothing patched", name);
            return Err(e);
        }
        let mut regions = match dir.regions(id) {
            Ok(r) => r,
            Err(e) => {
                dir.unpin(id);
                return Err(e);
            }
        };
        self.attach(&mut regions)
    }

    /// Undo a previous `attach_module` and release the pin. A module
    /// that has vanished from the directory is a lifecycle violation:
    /// detach must run against the module that was patched.
    pub fn detach_module(
        &mut self,
        dir: &mut dyn ModuleDirectory,
        name: &str,
    ) -> Result<ScanReport> {
        if self.state == SessionState::Unpatched {
            return Err(Error::NotAttached);
        }
        let id = match dir.find(name) {
            Some(id) => id,
            None => {
                warn!("module '{}' is gone, calls cannot be restored", name);
                return Err(Error::ModuleNotFound(name.to_string()));
            }
        };
        let mut regions = dir.regions(id)?;
        let report = self.detach(&mut regions)?;
        drop(regions);
        dir.unpin(id);
        Ok(report)
    }

    fn run(&self, regions: &mut ModuleRegions<'_>, table: &RedirectTable) -> ScanReport {
        let mut report = ScanReport::default();
        if let Some(init) = regions.init.as_mut() {
            info!("processing init area {}..{}", init.begin(), init.end());
            report.init = Some(scan_region(init, table, &self.decoder, self.width));
        }
        info!(
            "processing core area {}..{}",
            regions.core.begin(),
            regions.core.end()
        );
        report.core = scan_region(&mut regions.core, table, &self.decoder, self.width);
        report
    }
}
