//! The area scanner.
//!
//! Walks one code region instruction by instruction, delegating every
//! decoded instruction to the patch engine. Scanning is single-pass and
//! forward-only; instruction boundaries come from the decoder alone.

use log::warn;

use crate::decode::InstructionDecoder;
use crate::patch::{self, PatchOutcome};
use crate::redirect::RedirectTable;
use crate::region::CodeRegion;
use crate::types::{PointerWidth, VirtAddr};

/// Counters for one region scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Instructions decoded and handed to the patch engine.
    pub instructions: usize,
    /// Calls whose displacement was rewritten.
    pub patched: usize,
    /// Calls skipped because of an unusable displacement field.
    pub unsupported_width: usize,
    /// Calls skipped because the replacement is out of reach.
    pub out_of_range: usize,
    /// Zero-filled gaps skipped.
    pub zero_gaps: usize,
    /// The last instruction extended past the logical end.
    pub truncated: bool,
    /// Where decoding failed, if the scan abandoned the region.
    pub failed_at: Option<VirtAddr>,
}

impl ScanStats {
    /// True when the region was scanned to its end.
    pub fn completed(&self) -> bool {
        self.failed_at.is_none()
    }
}

/// Scan one region, rewriting every matching call in place.
///
/// A decode failure abandons the rest of the region (recorded in
/// `failed_at`); an instruction straddling the logical end is still
/// processed, then the scan stops.
pub fn scan_region<D: InstructionDecoder>(
    region: &mut CodeRegion<'_>,
    table: &RedirectTable,
    decoder: &D,
    width: PointerWidth,
) -> ScanStats {
    let mut stats = ScanStats::default();
    let base = region.begin();
    let text_len = region.text_len();
    let bytes = region.bytes_mut();

    let mut pos = 0usize;
    while pos < text_len {
        let addr = base + pos as u64;

        // pos < text_len <= bytes.len(), so the subtraction cannot
        // underflow and the comparison cannot overflow
        let insn = match decoder.decode(&bytes[pos..], addr) {
            Some(insn) if insn.len > 0 && insn.len <= bytes.len() - pos => insn,
            _ => {
                warn!("cannot decode instruction at {}, abandoning region", addr);
                stats.failed_at = Some(addr);
                break;
            }
        };

        if pos + insn.len > text_len {
            warn!(
                "instruction at {} runs {} byte(s) past the end of the region",
                addr,
                pos + insn.len - text_len
            );
            stats.truncated = true;
        }

        let insn_bytes = &mut bytes[pos..pos + insn.len];
        match patch::patch_call(&insn, insn_bytes, table, width) {
            PatchOutcome::Patched { .. } => stats.patched += 1,
            PatchOutcome::UnsupportedWidth(_) => stats.unsupported_width += 1,
            PatchOutcome::OutOfRange { .. } => stats.out_of_range += 1,
            PatchOutcome::NotACall | PatchOutcome::NoMatch => {}
        }
        stats.instructions += 1;

        if stats.truncated {
            break;
        }

        // Zero bytes decode as harmless two-byte adds; a run of them is
        // padding between functions. Skip past it so the walk does not
        // drift out of sync with real instruction boundaries.
        let all_zero = insn_bytes.iter().all(|&b| b == 0);
        pos += insn.len;
        if all_zero {
            stats.zero_gaps += 1;
            while pos < text_len && bytes[pos] == 0 {
                pos += 1;
            }
        }
    }

    stats
}
