// Classic BPF instruction classes, sizes, modes and jump conditions
// (linux/bpf_common.h), absent from the libc crate.

pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;

pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;

pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MSH: u16 = 0xa0;

pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JSET: u16 = 0x40;

pub const BPF_K: u16 = 0x00;
