//! `struct __sk_buff` context layout (the subset `SCHED_CLS`/`SCHED_ACT`
//! programs are allowed to read) and TC builder helpers.

use crate::dsl::Assembler;
use crate::insn::Width;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TcContext;

impl TcContext {
    pub const LEN: i16 = 0;
    pub const PKT_TYPE: i16 = 4;
    pub const MARK: i16 = 8;
    pub const QUEUE_MAPPING: i16 = 12;
    pub const PROTOCOL: i16 = 16;
    pub const VLAN_PRESENT: i16 = 20;
    pub const VLAN_TCI: i16 = 24;
    pub const VLAN_PROTO: i16 = 28;
    pub const PRIORITY: i16 = 32;
    pub const INGRESS_IFINDEX: i16 = 36;
    pub const IFINDEX: i16 = 40;
    pub const TC_INDEX: i16 = 44;
    pub const DATA: i16 = 76;
    pub const DATA_END: i16 = 80;
}

pub fn load_data_pointers(asm: &mut Assembler, ctx_reg: u8, dst_data: u8, dst_end: u8) -> &mut Assembler {
    asm.load(Width::W, dst_data, ctx_reg, TcContext::DATA);
    asm.load(Width::W, dst_end, ctx_reg, TcContext::DATA_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_pair_is_contiguous() {
        assert_eq!(TcContext::DATA_END - TcContext::DATA, 4);
    }
}
