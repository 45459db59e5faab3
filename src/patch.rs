//! The patch engine.
//!
//! Rewrites the displacement of direct near calls whose target appears
//! in the redirect table. One pair of routines handles both pointer
//! widths: 64-bit mode sign-extends the 32-bit displacement, 32-bit
//! mode adds it with unsigned wraparound.

use log::{info, warn};

use crate::decode::DecodedInstruction;
use crate::redirect::RedirectTable;
use crate::types::{PointerWidth, VirtAddr};

/// Opcode of the direct near call with a relative displacement.
pub const CALL_REL: u32 = 0xE8;

/// Displacement width the engine is able to rewrite.
pub const DISP_WIDTH: usize = 4;

/// What the engine did with one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Not a direct near call.
    NotACall,
    /// A relative call whose displacement field cannot be rewritten as
    /// a 4-byte value.
    UnsupportedWidth(usize),
    /// A call to a target outside the table.
    NoMatch,
    /// The replacement is not reachable with a 32-bit displacement from
    /// this call site; the instruction was left untouched.
    OutOfRange {
        target: VirtAddr,
        replacement: VirtAddr,
    },
    /// The displacement was rewritten.
    Patched { from: VirtAddr, to: VirtAddr },
}

/// Absolute target of a relative call.
///
/// `raw` is the 32-bit displacement as stored in the instruction,
/// relative to the end of the instruction.
pub fn call_target(width: PointerWidth, insn_addr: VirtAddr, insn_len: usize, raw: u32) -> VirtAddr {
    match width {
        PointerWidth::U64 => {
            let target = (insn_addr.addr() as i64)
                .wrapping_add(insn_len as i64)
                .wrapping_add(raw as i32 as i64);
            VirtAddr(target as u64)
        }
        PointerWidth::U32 => {
            let target = (insn_addr.addr() as u32)
                .wrapping_add(insn_len as u32)
                .wrapping_add(raw);
            VirtAddr(target as u64)
        }
    }
}

/// Displacement that makes a call at `insn_addr` land on `dest`.
///
/// Truncating: the result is exact only when `dest` is within reach of
/// a 32-bit displacement (always the case in 32-bit mode).
pub fn call_displacement(insn_addr: VirtAddr, insn_len: usize, dest: VirtAddr) -> u32 {
    dest.addr()
        .wrapping_sub(insn_addr.addr().wrapping_add(insn_len as u64)) as u32
}

/// Inspect one decoded instruction and rewrite its displacement in
/// place if it is a direct near call to an address in the table.
///
/// `insn_bytes` are the instruction's own bytes. Anything that is not
/// a rewritable matching call is left untouched.
pub fn patch_call(
    insn: &DecodedInstruction,
    insn_bytes: &mut [u8],
    table: &RedirectTable,
    width: PointerWidth,
) -> PatchOutcome {
    if insn.opcode != CALL_REL {
        return PatchOutcome::NotACall;
    }

    let disp = match insn.displacement {
        Some(d) if d.width == DISP_WIDTH => d,
        Some(d) => {
            warn!(
                "call at {} has a {}-byte displacement, leaving it alone",
                insn.addr, d.width
            );
            return PatchOutcome::UnsupportedWidth(d.width);
        }
        None => {
            warn!(
                "call at {} reports no displacement field, leaving it alone",
                insn.addr
            );
            return PatchOutcome::UnsupportedWidth(0);
        }
    };
    if disp.offset + DISP_WIDTH > insn_bytes.len() {
        warn!(
            "call at {} places its displacement outside the instruction, leaving it alone",
            insn.addr
        );
        return PatchOutcome::UnsupportedWidth(disp.width);
    }

    let field = &mut insn_bytes[disp.offset..disp.offset + DISP_WIDTH];
    let raw = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
    let target = call_target(width, insn.addr, insn.len, raw);

    let replacement = match table.replacement_for(target) {
        Some(r) => r,
        None => return PatchOutcome::NoMatch,
    };

    let new_raw = call_displacement(insn.addr, insn.len, replacement);
    // The patched call must land exactly on the replacement, or the
    // swapped-table pass could never find it again.
    if call_target(width, insn.addr, insn.len, new_raw) != replacement {
        warn!(
            "call at {}: replacement {} is out of displacement range, leaving it alone",
            insn.addr, replacement
        );
        return PatchOutcome::OutOfRange { target, replacement };
    }

    field.copy_from_slice(&new_raw.to_le_bytes());
    info!(
        "redirected call at {}: {} -> {} (displacement {:#010x} -> {:#010x})",
        insn.addr, target, replacement, raw, new_raw
    );
    PatchOutcome::Patched {
        from: target,
        to: replacement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Displacement;

    fn call_insn(addr: u64) -> DecodedInstruction {
        DecodedInstruction {
            addr: VirtAddr(addr),
            len: 5,
            opcode: CALL_REL,
            displacement: Some(Displacement { offset: 1, width: 4 }),
        }
    }

    #[test]
    fn target_sign_extends_in_64_bit_mode() {
        // displacement -5 from the end of a 5-byte call: lands on itself
        let t = call_target(PointerWidth::U64, VirtAddr(0x1000), 5, 0xFFFF_FFFB);
        assert_eq!(t, VirtAddr(0x1000));
    }

    #[test]
    fn target_forward_in_64_bit_mode() {
        let t = call_target(PointerWidth::U64, VirtAddr(0x1000), 5, 0xFFB);
        assert_eq!(t, VirtAddr(0x2000));
    }

    #[test]
    fn target_in_high_half_of_64_bit_space() {
        // a small backward displacement from a kernel-range address
        let t = call_target(
            PointerWidth::U64,
            VirtAddr(0xFFFF_FFFF_8100_0000),
            5,
            0xFFFF_F000,
        );
        assert_eq!(t, VirtAddr(0xFFFF_FFFF_80FF_F005));
    }

    #[test]
    fn target_wraps_in_32_bit_mode() {
        let t = call_target(PointerWidth::U32, VirtAddr(0xFFFF_FF00), 5, 0x200);
        assert_eq!(t, VirtAddr(0x105));
    }

    #[test]
    fn displacement_from_destination() {
        assert_eq!(call_displacement(VirtAddr(0x1000), 5, VirtAddr(0x2000)), 0xFFB);
        assert_eq!(
            call_displacement(VirtAddr(0x1000), 5, VirtAddr(0x1000)),
            0xFFFF_FFFB
        );
    }

    #[test]
    fn target_and_displacement_invert() {
        for &(addr, dest) in &[
            (0x1000u64, 0x2000u64),
            (0x2000, 0x1000),
            (0x40_0000, 0x40_0000 + 0x7FFF_0000),
            (0xFFFF_FFFF_8100_0000, 0xFFFF_FFFF_8000_0000),
        ] {
            let raw = call_displacement(VirtAddr(addr), 5, VirtAddr(dest));
            assert_eq!(
                call_target(PointerWidth::U64, VirtAddr(addr), 5, raw),
                VirtAddr(dest)
            );
        }
        for &(addr, dest) in &[(0x1000u64, 0x2000u64), (0xFFFF_FF00, 0x105)] {
            let raw = call_displacement(VirtAddr(addr), 5, VirtAddr(dest));
            assert_eq!(
                call_target(PointerWidth::U32, VirtAddr(addr), 5, raw),
                VirtAddr(dest)
            );
        }
    }

    #[test]
    fn patch_rewrites_matching_call() {
        // call 0x2000 encoded at 0x1000
        let mut bytes = [0xE8, 0xFB, 0x0F, 0x00, 0x00];
        let table = RedirectTable::from_pairs([(0x2000, 0x3000)]).unwrap();
        let out = patch_call(&call_insn(0x1000), &mut bytes, &table, PointerWidth::U64);
        assert_eq!(
            out,
            PatchOutcome::Patched {
                from: VirtAddr(0x2000),
                to: VirtAddr(0x3000)
            }
        );
        // 0x3000 - 0x1005 = 0x1FFB
        assert_eq!(bytes, [0xE8, 0xFB, 0x1F, 0x00, 0x00]);
    }

    #[test]
    fn patch_leaves_unmatched_call_alone() {
        let mut bytes = [0xE8, 0xFB, 0x0F, 0x00, 0x00];
        let table = RedirectTable::from_pairs([(0x9000, 0xA000)]).unwrap();
        let out = patch_call(&call_insn(0x1000), &mut bytes, &table, PointerWidth::U64);
        assert_eq!(out, PatchOutcome::NoMatch);
        assert_eq!(bytes, [0xE8, 0xFB, 0x0F, 0x00, 0x00]);
    }

    #[test]
    fn patch_leaves_non_call_alone() {
        let insn = DecodedInstruction {
            addr: VirtAddr(0x1000),
            len: 1,
            opcode: 0x90,
            displacement: None,
        };
        let mut bytes = [0x90];
        let table = RedirectTable::from_pairs([(0x2000, 0x3000)]).unwrap();
        let out = patch_call(&insn, &mut bytes, &table, PointerWidth::U64);
        assert_eq!(out, PatchOutcome::NotACall);
        assert_eq!(bytes, [0x90]);
    }

    #[test]
    fn patch_refuses_narrow_displacement() {
        // 66 E8 iw: a 2-byte displacement the engine must not touch
        let insn = DecodedInstruction {
            addr: VirtAddr(0x1000),
            len: 4,
            opcode: CALL_REL,
            displacement: Some(Displacement { offset: 2, width: 2 }),
        };
        let mut bytes = [0x66, 0xE8, 0x10, 0x00];
        let table = RedirectTable::from_pairs([(0x1014, 0x3000)]).unwrap();
        let out = patch_call(&insn, &mut bytes, &table, PointerWidth::U32);
        assert_eq!(out, PatchOutcome::UnsupportedWidth(2));
        assert_eq!(bytes, [0x66, 0xE8, 0x10, 0x00]);
    }

    #[test]
    fn patch_refuses_unreachable_replacement() {
        // replacement more than 2 GiB away from the call site
        let mut bytes = [0xE8, 0xFB, 0x0F, 0x00, 0x00];
        let table = RedirectTable::from_pairs([(0x2000, 0x2_0000_0000)]).unwrap();
        let out = patch_call(&call_insn(0x1000), &mut bytes, &table, PointerWidth::U64);
        assert_eq!(
            out,
            PatchOutcome::OutOfRange {
                target: VirtAddr(0x2000),
                replacement: VirtAddr(0x2_0000_0000)
            }
        );
        assert_eq!(bytes, [0xE8, 0xFB, 0x0F, 0x00, 0x00]);
    }

    #[test]
    fn patch_round_trips_with_swapped_table() {
        let original = [0xE8, 0xFB, 0x0F, 0x00, 0x00];
        let mut bytes = original;
        let table = RedirectTable::from_pairs([(0x2000, 0x3000)]).unwrap();

        patch_call(&call_insn(0x1000), &mut bytes, &table, PointerWidth::U64);
        assert_ne!(bytes, original);

        let out = patch_call(&call_insn(0x1000), &mut bytes, &table.swapped(), PointerWidth::U64);
        assert_eq!(
            out,
            PatchOutcome::Patched {
                from: VirtAddr(0x3000),
                to: VirtAddr(0x2000)
            }
        );
        assert_eq!(bytes, original);
    }
}
