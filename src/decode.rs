//! Instruction decoding capability.
//!
//! The engine never interprets operand bytes itself. It consumes three
//! facts about each instruction: its length, its primary opcode value,
//! and, for relative calls, where the embedded displacement field sits.
//! [`InstructionDecoder`] is the seam where a decoder plugs in;
//! [`IcedDecoder`] is the default, backed by iced-x86.

use iced_x86::{Code, Decoder, DecoderOptions, Instruction};

use crate::types::{PointerWidth, VirtAddr};

/// Location of the displacement field inside an instruction's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Displacement {
    /// Byte offset of the field from the start of the instruction.
    pub offset: usize,
    /// Width of the field in bytes.
    pub width: usize,
}

/// The facts the engine needs about one decoded instruction.
#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    /// Address the instruction was decoded at.
    pub addr: VirtAddr,
    /// Instruction length in bytes. Always nonzero.
    pub len: usize,
    /// Primary opcode value (0xE8 for a direct near call).
    pub opcode: u32,
    /// Displacement field of a relative call, if the instruction is one.
    pub displacement: Option<Displacement>,
}

/// A pluggable single-instruction decoder.
///
/// `bytes` starts at the instruction and extends to the end of the
/// physical buffer, which may run past the logical end of the region
/// being scanned. Returns `None` when the bytes cannot be decoded.
/// Implementations must never report a length past the end of `bytes`.
pub trait InstructionDecoder {
    fn decode(&self, bytes: &[u8], addr: VirtAddr) -> Option<DecodedInstruction>;
}

/// Default decoder backed by iced-x86.
pub struct IcedDecoder {
    width: PointerWidth,
}

impl IcedDecoder {
    pub fn new(width: PointerWidth) -> Self {
        Self { width }
    }
}

impl InstructionDecoder for IcedDecoder {
    fn decode(&self, bytes: &[u8], addr: VirtAddr) -> Option<DecodedInstruction> {
        let mut decoder =
            Decoder::with_ip(self.width.bitness(), bytes, addr.addr(), DecoderOptions::NONE);
        if !decoder.can_decode() {
            return None;
        }
        let mut insn = Instruction::default();
        decoder.decode_out(&mut insn);
        if insn.is_invalid() {
            return None;
        }

        let len = insn.len();
        // The displacement trails the E8 encoding, so its position is
        // fixed relative to the instruction end.
        let displacement = match insn.code() {
            Code::Call_rel32_64 | Code::Call_rel32_32 => Some(Displacement {
                offset: len - 4,
                width: 4,
            }),
            Code::Call_rel16 => Some(Displacement {
                offset: len - 2,
                width: 2,
            }),
            _ => None,
        };

        Some(DecodedInstruction {
            addr,
            len,
            opcode: insn.op_code().op_code(),
            displacement,
        })
    }
}
