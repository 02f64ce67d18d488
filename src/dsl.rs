//! A small builder DSL over [`crate::insn::Insn`], plus the two-pass
//! assembler that turns labels into resolved jump offsets.
//!
//! Pass 1 walks the program once, assigning each instruction its slot index
//! and recording where each label lands, without emitting any bytes. Pass 2
//! walks it again, resolving every label-relative jump to a slot delta and
//! handing the fully concrete instruction list to [`crate::insn::encode_all`].

use std::collections::HashMap;

use crate::error::LabelError;
use crate::insn::{self, AluOp, AtomicOp, Insn, JumpOp, Source, Width};

/// One entry in a program being built: either a concrete instruction or a
/// pseudo-entry that pass 1 strips before encoding.
#[derive(Debug, Clone)]
enum Entry {
    Insn(Insn),
    Label(String),
}

#[derive(Debug, Default, Clone)]
pub struct Assembler {
    entries: Vec<Entry>,
    /// (entry index in `entries`, label name) for every jump pushed via
    /// `jump_to`/`jump_always_to`, resolved against `label_slots` during
    /// `assemble`.
    pending_jumps: Vec<(usize, String)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self, name: impl Into<String>) -> &mut Self {
        self.entries.push(Entry::Label(name.into()));
        self
    }

    pub fn push(&mut self, insn: Insn) -> &mut Self {
        self.entries.push(Entry::Insn(insn));
        self
    }

    // --- ALU convenience builders -----------------------------------

    pub fn mov64_imm(&mut self, dst: u8, imm: i32) -> &mut Self {
        self.push(Insn::Alu64 { op: AluOp::Mov, dst, src: Source::Imm(imm) })
    }

    pub fn mov64_reg(&mut self, dst: u8, src: u8) -> &mut Self {
        self.push(Insn::Alu64 { op: AluOp::Mov, dst, src: Source::Reg(src) })
    }

    pub fn alu64_imm(&mut self, op: AluOp, dst: u8, imm: i32) -> &mut Self {
        self.push(Insn::Alu64 { op, dst, src: Source::Imm(imm) })
    }

    pub fn alu64_reg(&mut self, op: AluOp, dst: u8, src: u8) -> &mut Self {
        self.push(Insn::Alu64 { op, dst, src: Source::Reg(src) })
    }

    pub fn load_imm64(&mut self, dst: u8, imm: i64) -> &mut Self {
        self.push(Insn::LoadImm64 { dst, imm })
    }

    pub fn load_map_fd(&mut self, dst: u8, map_fd: i32) -> &mut Self {
        self.push(Insn::LoadMapFd { dst, map_fd })
    }

    pub fn load(&mut self, width: Width, dst: u8, src: u8, off: i16) -> &mut Self {
        self.push(Insn::Load { width, dst, src, off })
    }

    pub fn store_imm(&mut self, width: Width, dst: u8, off: i16, imm: i32) -> &mut Self {
        self.push(Insn::Store { width, dst, src: Source::Imm(imm), off })
    }

    pub fn store_reg(&mut self, width: Width, dst: u8, off: i16, src: u8) -> &mut Self {
        self.push(Insn::Store { width, dst, src: Source::Reg(src), off })
    }

    pub fn call(&mut self, func_id: i32) -> &mut Self {
        self.push(Insn::Call { func_id })
    }

    // --- Atomic read-modify-write builders ---------------------------

    pub fn atomic(&mut self, op: AtomicOp, width: Width, dst: u8, src: u8, off: i16) -> &mut Self {
        self.push(Insn::Atomic { op, width, dst, src, off })
    }

    pub fn atomic_add(&mut self, width: Width, dst: u8, src: u8, off: i16) -> &mut Self {
        self.atomic(AtomicOp::Add { fetch: false }, width, dst, src, off)
    }

    pub fn atomic_fetch_add(&mut self, width: Width, dst: u8, src: u8, off: i16) -> &mut Self {
        self.atomic(AtomicOp::Add { fetch: true }, width, dst, src, off)
    }

    pub fn xchg(&mut self, width: Width, dst: u8, src: u8, off: i16) -> &mut Self {
        self.atomic(AtomicOp::Xchg, width, dst, src, off)
    }

    pub fn cmpxchg(&mut self, width: Width, dst: u8, src: u8, off: i16) -> &mut Self {
        self.atomic(AtomicOp::CmpXchg, width, dst, src, off)
    }

    pub fn exit(&mut self) -> &mut Self {
        self.push(Insn::Exit)
    }

    // --- Label-relative jumps ----------------------------------------

    pub fn jump_to(&mut self, op: JumpOp, dst: u8, src: Source, label: impl Into<String>) -> &mut Self {
        self.entries.push(Entry::Insn(Insn::Jump {
            op,
            dst,
            src,
            off: 0, // placeholder; patched during assembly
        }));
        // Stash the label against this entry's index using a side table
        // keyed by position, resolved in `assemble`.
        let idx = self.entries.len() - 1;
        self.pending_jumps.push((idx, label.into()));
        self
    }

    pub fn jump_always_to(&mut self, label: impl Into<String>) -> &mut Self {
        self.entries.push(Entry::Insn(Insn::JumpAlways { off: 0 }));
        let idx = self.entries.len() - 1;
        self.pending_jumps.push((idx, label.into()));
        self
    }
}

/// Resolved program: raw encoded bytes, ready for `BPF_PROG_LOAD`.
pub struct Assembled {
    pub bytes: Vec<u8>,
    pub insn_count: usize,
}

impl Assembler {
    pub fn assemble(&self) -> Result<Assembled, LabelError> {
        // Pass 1: assign slot indices to every concrete instruction,
        // recording where each label points (the slot index of the next
        // instruction after it).
        let mut label_slots: HashMap<String, usize> = HashMap::new();
        let mut slot = 0usize;
        let mut concrete_idx_to_slot: Vec<usize> = Vec::new();

        for entry in &self.entries {
            match entry {
                Entry::Label(name) => {
                    if label_slots.insert(name.clone(), slot).is_some() {
                        return Err(LabelError::DuplicateLabel(name.clone()));
                    }
                }
                Entry::Insn(insn) => {
                    concrete_idx_to_slot.push(slot);
                    slot += insn::slots(insn);
                }
            }
        }

        // Map each pending jump's *entry* index straight to its label, so
        // pass 2 doesn't need to re-derive concrete positions.
        let jump_labels: HashMap<usize, &str> = self
            .pending_jumps
            .iter()
            .map(|(idx, label)| (*idx, label.as_str()))
            .collect();

        // Pass 2: patch jump offsets and encode.
        let mut resolved: Vec<Insn> = Vec::with_capacity(concrete_idx_to_slot.len());
        let mut concrete_pos = 0usize;
        for (entry_idx, entry) in self.entries.iter().enumerate() {
            let insn = match entry {
                Entry::Insn(insn) => insn,
                Entry::Label(_) => continue,
            };
            let this_slot = concrete_idx_to_slot[concrete_pos];
            concrete_pos += 1;

            let patched = if let Some(label) = jump_labels.get(&entry_idx) {
                let target = *label_slots
                    .get(*label)
                    .ok_or_else(|| LabelError::UnknownLabel(label.to_string()))?;
                // Jump offsets are relative to the slot *after* the jump
                // instruction itself (the instruction occupies 1 slot).
                let delta = target as i64 - (this_slot as i64 + 1);
                if delta < i16::MIN as i64 || delta > i16::MAX as i64 {
                    return Err(LabelError::LabelTooFar {
                        label: label.to_string(),
                        delta,
                    });
                }
                let off = delta as i16;
                match insn {
                    Insn::Jump { op, dst, src, .. } => Insn::Jump { op: *op, dst: *dst, src: *src, off },
                    Insn::JumpAlways { .. } => Insn::JumpAlways { off },
                    other => *other,
                }
            } else {
                *insn
            };
            resolved.push(patched);
        }

        let bytes = insn::encode_all(&resolved).map_err(|_| {
            // The DSL's own builders only ever produce well-formed operands;
            // an encoding error here would mean a bug in the builders
            // themselves, not user input, so this conversion exists purely
            // to satisfy the `Result<_, LabelError>` signature.
            LabelError::UnknownLabel("<encoding failure>".to_string())
        })?;

        Ok(Assembled { insn_count: resolved.len(), bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::Width;

    #[test]
    fn forward_jump_resolves_to_correct_offset() {
        let mut asm = Assembler::new();
        asm.mov64_imm(0, 0)
            .jump_to(JumpOp::Jeq, 0, Source::Imm(0), "end")
            .mov64_imm(1, 7)
            .label("end")
            .exit();
        let out = asm.assemble().unwrap();
        assert_eq!(out.insn_count, 4);
        // jeq instruction is at slot 1; "end" label is slot 3; delta = 3-2=1
        assert_eq!(out.bytes[1 * 8 + 2], 1);
        assert_eq!(out.bytes[1 * 8 + 3], 0);
    }

    #[test]
    fn unknown_label_is_an_error() {
        let mut asm = Assembler::new();
        asm.jump_always_to("nope").exit();
        let err = asm.assemble().unwrap_err();
        assert!(matches!(err, LabelError::UnknownLabel(l) if l == "nope"));
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let mut asm = Assembler::new();
        asm.label("a").exit().label("a").exit();
        let err = asm.assemble().unwrap_err();
        assert!(matches!(err, LabelError::DuplicateLabel(l) if l == "a"));
    }

    #[test]
    fn atomic_builder_emits_a_single_slot() {
        let mut asm = Assembler::new();
        asm.atomic_fetch_add(Width::Dw, 1, 2, 0).exit();
        let out = asm.assemble().unwrap();
        assert_eq!(out.insn_count, 2);
    }

    #[test]
    fn lddw_slot_width_is_honored_in_label_math() {
        let mut asm = Assembler::new();
        asm.load_imm64(0, 0x1_0000_0000) // occupies 2 slots
            .jump_always_to("target")
            .store_imm(Width::W, 1, 0, 0)
            .label("target")
            .exit();
        let out = asm.assemble().unwrap();
        // ja is the 2nd concrete insn but 3rd slot (0-indexed) since lddw ate 2 slots
        let ja_off_bytes = &out.bytes[2 * 8 + 2..2 * 8 + 4];
        let off = i16::from_le_bytes([ja_off_bytes[0], ja_off_bytes[1]]);
        assert_eq!(off, 1);
    }
}
