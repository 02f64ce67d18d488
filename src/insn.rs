//! The eBPF instruction model and its byte encoder.
//!
//! Every eBPF instruction is an 8-byte little-endian record:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | opcode |dst|src |       offset (i16)       |        imm (i32)         |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! `BPF_LD | BPF_DW | BPF_IMM` (`lddw`, used to load a 64-bit immediate or a
//! map file descriptor) is the one exception: it occupies two consecutive
//! 8-byte slots, the second carrying the high 32 bits of the immediate in
//! its own `imm` field with every other field zeroed.

use crate::error::EncodingError;

pub const INSN_SIZE: usize = 8;

// Instruction classes (low 3 bits of opcode).
const BPF_LD: u8 = 0x00;
const BPF_LDX: u8 = 0x01;
const BPF_ST: u8 = 0x02;
const BPF_STX: u8 = 0x03;
const BPF_ALU: u8 = 0x04;
const BPF_JMP: u8 = 0x05;
const BPF_JMP32: u8 = 0x06;
const BPF_ALU64: u8 = 0x07;

// Size modifiers (bits 3-4) for LD/LDX/ST/STX.
const BPF_W: u8 = 0x00;
const BPF_H: u8 = 0x08;
const BPF_B: u8 = 0x10;
const BPF_DW: u8 = 0x18;

// Mode modifiers (bits 5-7) for LD/LDX/ST/STX.
const BPF_IMM: u8 = 0x00;
const BPF_ABS: u8 = 0x20;
const BPF_IND: u8 = 0x40;
const BPF_MEM: u8 = 0x60;
const BPF_ATOMIC: u8 = 0xc0;

// ALU/JMP op codes (bits 4-7).
const BPF_ADD: u8 = 0x00;
const BPF_SUB: u8 = 0x10;
const BPF_MUL: u8 = 0x20;
const BPF_DIV: u8 = 0x30;
const BPF_OR: u8 = 0x40;
const BPF_AND: u8 = 0x50;
const BPF_LSH: u8 = 0x60;
const BPF_RSH: u8 = 0x70;
const BPF_NEG: u8 = 0x80;
const BPF_MOD: u8 = 0x90;
const BPF_XOR: u8 = 0xa0;
const BPF_MOV: u8 = 0xb0;
const BPF_ARSH: u8 = 0xc0;
const BPF_END: u8 = 0xd0;

// Atomic sub-op, carried in the instruction's `imm` field rather than the
// opcode's ALU-op bits (`linux/bpf.h`'s BPF_ATOMIC convention reuses the
// ALU op encoding, then ORs in BPF_FETCH for the fetching variants).
const BPF_FETCH: i32 = 0x01;
const BPF_XCHG: i32 = 0xe0 | BPF_FETCH;
const BPF_CMPXCHG: i32 = 0xf0 | BPF_FETCH;

const BPF_JA: u8 = 0x00;
const BPF_JEQ: u8 = 0x10;
const BPF_JGT: u8 = 0x20;
const BPF_JGE: u8 = 0x30;
const BPF_JSET: u8 = 0x40;
const BPF_JNE: u8 = 0x50;
const BPF_JSGT: u8 = 0x60;
const BPF_JSGE: u8 = 0x70;
const BPF_CALL: u8 = 0x80;
const BPF_EXIT: u8 = 0x90;
const BPF_JLT: u8 = 0xa0;
const BPF_JLE: u8 = 0xb0;
const BPF_JSLT: u8 = 0xc0;
const BPF_JSLE: u8 = 0xd0;

// Source modifier (bit 3) for ALU/JMP.
const BPF_K: u8 = 0x00;
const BPF_X: u8 = 0x08;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(non_camel_case_types)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Or,
    And,
    Lsh,
    Rsh,
    Neg,
    Mod,
    Xor,
    Mov,
    Arsh,
}

impl AluOp {
    fn bits(self) -> u8 {
        match self {
            AluOp::Add => BPF_ADD,
            AluOp::Sub => BPF_SUB,
            AluOp::Mul => BPF_MUL,
            AluOp::Div => BPF_DIV,
            AluOp::Or => BPF_OR,
            AluOp::And => BPF_AND,
            AluOp::Lsh => BPF_LSH,
            AluOp::Rsh => BPF_RSH,
            AluOp::Neg => BPF_NEG,
            AluOp::Mod => BPF_MOD,
            AluOp::Xor => BPF_XOR,
            AluOp::Mov => BPF_MOV,
            AluOp::Arsh => BPF_ARSH,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum JumpOp {
    Ja,
    Jeq,
    Jgt,
    Jge,
    Jset,
    Jne,
    Jsgt,
    Jsge,
    Jlt,
    Jle,
    Jslt,
    Jsle,
    Call,
    Exit,
}

impl JumpOp {
    fn bits(self) -> u8 {
        match self {
            JumpOp::Ja => BPF_JA,
            JumpOp::Jeq => BPF_JEQ,
            JumpOp::Jgt => BPF_JGT,
            JumpOp::Jge => BPF_JGE,
            JumpOp::Jset => BPF_JSET,
            JumpOp::Jne => BPF_JNE,
            JumpOp::Jsgt => BPF_JSGT,
            JumpOp::Jsge => BPF_JSGE,
            JumpOp::Jlt => BPF_JLT,
            JumpOp::Jle => BPF_JLE,
            JumpOp::Jslt => BPF_JSLT,
            JumpOp::Jsle => BPF_JSLE,
            JumpOp::Call => BPF_CALL,
            JumpOp::Exit => BPF_EXIT,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Width {
    B,
    H,
    W,
    Dw,
}

impl Width {
    fn bits(self) -> u8 {
        match self {
            Width::B => BPF_B,
            Width::H => BPF_H,
            Width::W => BPF_W,
            Width::Dw => BPF_DW,
        }
    }
}

/// An atomic read-modify-write sub-operation, encoded in the instruction's
/// `imm` field. `Add`/`And`/`Or`/`Xor` reuse the ALU op byte and set
/// `BPF_FETCH` for the fetching form; `Xchg`/`CmpXchg` inherently fetch.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AtomicOp {
    Add { fetch: bool },
    And { fetch: bool },
    Or { fetch: bool },
    Xor { fetch: bool },
    Xchg,
    CmpXchg,
}

impl AtomicOp {
    fn imm(self) -> i32 {
        match self {
            AtomicOp::Add { fetch } => BPF_ADD as i32 | if fetch { BPF_FETCH } else { 0 },
            AtomicOp::And { fetch } => BPF_AND as i32 | if fetch { BPF_FETCH } else { 0 },
            AtomicOp::Or { fetch } => BPF_OR as i32 | if fetch { BPF_FETCH } else { 0 },
            AtomicOp::Xor { fetch } => BPF_XOR as i32 | if fetch { BPF_FETCH } else { 0 },
            AtomicOp::Xchg => BPF_XCHG,
            AtomicOp::CmpXchg => BPF_CMPXCHG,
        }
    }
}

/// A single resolved (post-label) instruction slot. `LoadImm64` expands to
/// two physical 8-byte records during encoding.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Insn {
    Alu64 { op: AluOp, dst: u8, src: Source },
    Alu32 { op: AluOp, dst: u8, src: Source },
    Endian { be: bool, width: Width, dst: u8 },
    Load { width: Width, dst: u8, src: u8, off: i16 },
    Store { width: Width, dst: u8, src: Source, off: i16 },
    Atomic { op: AtomicOp, width: Width, dst: u8, src: u8, off: i16 },
    LoadImm64 { dst: u8, imm: i64 },
    LoadMapFd { dst: u8, map_fd: i32 },
    Jump { op: JumpOp, dst: u8, src: Source, off: i16 },
    JumpAlways { off: i16 },
    Call { func_id: i32 },
    Exit,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Source {
    Reg(u8),
    Imm(i32),
}

fn check_reg(r: u8) -> Result<u8, EncodingError> {
    if r > 10 {
        Err(EncodingError::RegisterOutOfRange(r))
    } else {
        Ok(r)
    }
}

fn reg_byte(dst: u8, src: u8) -> u8 {
    (dst & 0x0f) | ((src & 0x0f) << 4)
}

/// Encode a list of already-label-resolved instructions into raw bytes.
/// Multi-slot instructions (`LoadImm64`/`LoadMapFd`) expand in place.
pub fn encode_all(insns: &[Insn]) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(insns.len() * INSN_SIZE);
    for insn in insns {
        encode_one(insn, &mut out)?;
    }
    Ok(out)
}

/// Number of 8-byte slots an instruction occupies once encoded — needed by
/// the assembler's pass 1 slot-counting pass before any bytes are emitted.
pub fn slots(insn: &Insn) -> usize {
    match insn {
        Insn::LoadImm64 { .. } | Insn::LoadMapFd { .. } => 2,
        _ => 1,
    }
}

fn push_record(out: &mut Vec<u8>, opcode: u8, dst: u8, src: u8, off: i16, imm: i32) {
    out.push(opcode);
    out.push(reg_byte(dst, src));
    out.extend_from_slice(&off.to_le_bytes());
    out.extend_from_slice(&imm.to_le_bytes());
}

fn encode_one(insn: &Insn, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    match *insn {
        Insn::Alu64 { op, dst, src } | Insn::Alu32 { op, dst, src } => {
            let dst = check_reg(dst)?;
            let class = if matches!(insn, Insn::Alu64 { .. }) {
                BPF_ALU64
            } else {
                BPF_ALU
            };
            match src {
                Source::Reg(r) => {
                    let r = check_reg(r)?;
                    push_record(out, class | op.bits() | BPF_X, dst, r, 0, 0);
                }
                Source::Imm(imm) => {
                    push_record(out, class | op.bits() | BPF_K, dst, 0, 0, imm);
                }
            }
        }
        Insn::Endian { be, width, dst } => {
            let dst = check_reg(dst)?;
            let imm = match width {
                Width::H => 16,
                Width::W => 32,
                Width::Dw => 64,
                Width::B => {
                    return Err(EncodingError::OperandForm {
                        expected: "h|w|dw endian width",
                        actual: "b",
                    })
                }
            };
            let class = if be { BPF_ALU64 } else { BPF_ALU };
            push_record(out, class | BPF_END, dst, 0, 0, imm);
        }
        Insn::Load { width, dst, src, off } => {
            let dst = check_reg(dst)?;
            let src = check_reg(src)?;
            push_record(out, BPF_LDX | width.bits() | BPF_MEM, dst, src, off, 0);
        }
        Insn::Store { width, dst, src, off } => {
            let dst = check_reg(dst)?;
            match src {
                Source::Reg(r) => {
                    let r = check_reg(r)?;
                    push_record(out, BPF_STX | width.bits() | BPF_MEM, dst, r, off, 0);
                }
                Source::Imm(imm) => {
                    push_record(out, BPF_ST | width.bits() | BPF_MEM, dst, 0, off, imm);
                }
            }
        }
        Insn::Atomic { op, width, dst, src, off } => {
            let dst = check_reg(dst)?;
            let src = check_reg(src)?;
            push_record(out, BPF_STX | width.bits() | BPF_ATOMIC, dst, src, off, op.imm());
        }
        Insn::LoadImm64 { dst, imm } => {
            let dst = check_reg(dst)?;
            let lo = imm as i32;
            let hi = (imm >> 32) as i32;
            push_record(out, BPF_LD | BPF_DW | BPF_IMM, dst, 0, 0, lo);
            push_record(out, 0, 0, 0, 0, hi);
        }
        Insn::LoadMapFd { dst, map_fd } => {
            let dst = check_reg(dst)?;
            // BPF_PSEUDO_MAP_FD = 1, carried in the src register field.
            push_record(out, BPF_LD | BPF_DW | BPF_IMM, dst, 1, 0, map_fd);
            push_record(out, 0, 0, 0, 0, 0);
        }
        Insn::Jump { op, dst, src, off } => {
            let dst = check_reg(dst)?;
            match src {
                Source::Reg(r) => {
                    let r = check_reg(r)?;
                    push_record(out, BPF_JMP | op.bits() | BPF_X, dst, r, off, 0);
                }
                Source::Imm(imm) => {
                    push_record(out, BPF_JMP | op.bits() | BPF_K, dst, 0, off, imm);
                }
            }
        }
        Insn::JumpAlways { off } => {
            push_record(out, BPF_JMP | BPF_JA, 0, 0, off, 0);
        }
        Insn::Call { func_id } => {
            push_record(out, BPF_JMP | BPF_CALL, 0, 0, 0, func_id);
        }
        Insn::Exit => {
            push_record(out, BPF_JMP | BPF_EXIT, 0, 0, 0, 0);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exit_is_single_zeroed_record_with_class_jmp_exit() {
        let bytes = encode_all(&[Insn::Exit]).unwrap();
        assert_eq!(bytes, vec![0x95, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn mov64_imm_matches_documented_encoding() {
        // r0 = 0 -> BPF_ALU64|BPF_MOV|BPF_K, dst=0, imm=0
        let bytes = encode_all(&[Insn::Alu64 {
            op: AluOp::Mov,
            dst: 0,
            src: Source::Imm(0),
        }])
        .unwrap();
        assert_eq!(bytes, vec![0xb7, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn lddw_emits_sixteen_bytes_across_two_slots() {
        let bytes = encode_all(&[Insn::LoadImm64 { dst: 0, imm: 0x1_0000_0002 }]).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..2], &[0x18, 0x00]);
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &1i32.to_le_bytes());
    }

    #[test]
    fn rejects_out_of_range_register() {
        let err = encode_all(&[Insn::Alu64 {
            op: AluOp::Mov,
            dst: 11,
            src: Source::Imm(1),
        }])
        .unwrap_err();
        assert!(matches!(err, EncodingError::RegisterOutOfRange(11)));
    }

    #[test]
    fn slot_counts_drive_label_math() {
        assert_eq!(slots(&Insn::Exit), 1);
        assert_eq!(slots(&Insn::LoadImm64 { dst: 0, imm: 0 }), 2);
    }

    #[test]
    fn atomic_add_encodes_fetch_bit_in_imm() {
        let bytes = encode_all(&[Insn::Atomic {
            op: AtomicOp::Add { fetch: false },
            width: Width::Dw,
            dst: 1,
            src: 2,
            off: 0,
        }])
        .unwrap();
        assert_eq!(bytes, vec![0xdb, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let bytes = encode_all(&[Insn::Atomic {
            op: AtomicOp::Add { fetch: true },
            width: Width::Dw,
            dst: 1,
            src: 2,
            off: 0,
        }])
        .unwrap();
        assert_eq!(bytes, vec![0xdb, 0x21, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn xchg_and_cmpxchg_use_their_own_imm_codes() {
        let bytes = encode_all(&[Insn::Atomic {
            op: AtomicOp::Xchg,
            width: Width::Dw,
            dst: 1,
            src: 2,
            off: 0,
        }])
        .unwrap();
        assert_eq!(&bytes[4..8], &(0xe0 | 0x01i32).to_le_bytes());

        let bytes = encode_all(&[Insn::Atomic {
            op: AtomicOp::CmpXchg,
            width: Width::Dw,
            dst: 1,
            src: 2,
            off: 0,
        }])
        .unwrap();
        assert_eq!(&bytes[4..8], &(0xf0 | 0x01i32).to_le_bytes());
    }
}
