//! `struct xdp_md` context layout and XDP program builder helpers.

use crate::dsl::Assembler;
use crate::insn::Width;

/// Field offsets within `struct xdp_md` (`linux/bpf.h`): all four fields
/// are `__u32`, in declaration order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct XdpContext;

impl XdpContext {
    pub const DATA: i16 = 0;
    pub const DATA_END: i16 = 4;
    pub const DATA_META: i16 = 8;
    pub const INGRESS_IFINDEX: i16 = 12;
    pub const RX_QUEUE_INDEX: i16 = 16;
    pub const EGRESS_IFINDEX: i16 = 20;
}

/// Load `xdp_md.data`/`xdp_md.data_end` into `dst_data`/`dst_end`, the
/// standard prologue every XDP program that touches packet bytes needs
/// before any bounds-checked access.
pub fn load_data_pointers(asm: &mut Assembler, ctx_reg: u8, dst_data: u8, dst_end: u8) -> &mut Assembler {
    asm.load(Width::W, dst_data, ctx_reg, XdpContext::DATA);
    asm.load(Width::W, dst_end, ctx_reg, XdpContext::DATA_END)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_end_follows_data_by_one_word() {
        assert_eq!(XdpContext::DATA_END - XdpContext::DATA, 4);
    }
}
