// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Classic BPF and seccomp kernel ABI.
//!
//! See `include/uapi/linux/bpf_common.h`, `include/uapi/linux/filter.h`,
//! `include/uapi/linux/seccomp.h` and `include/uapi/linux/audit.h`.

use seccompiler::sock_filter;

// Instruction classes.
pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_ST: u16 = 0x02;
pub const BPF_STX: u16 = 0x03;
pub const BPF_ALU: u16 = 0x04;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;
pub const BPF_MISC: u16 = 0x07;

// ld/ldx sizes.
pub const BPF_W: u16 = 0x00;
pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;

// ld/ldx modes.
pub const BPF_IMM: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MEM: u16 = 0x60;
pub const BPF_LEN: u16 = 0x80;
pub const BPF_MSH: u16 = 0xa0;

// alu operations.
pub const BPF_ADD: u16 = 0x00;
pub const BPF_SUB: u16 = 0x10;
pub const BPF_MUL: u16 = 0x20;
pub const BPF_DIV: u16 = 0x30;
pub const BPF_OR: u16 = 0x40;
pub const BPF_AND: u16 = 0x50;
pub const BPF_LSH: u16 = 0x60;
pub const BPF_RSH: u16 = 0x70;
pub const BPF_NEG: u16 = 0x80;
pub const BPF_MOD: u16 = 0x90;
pub const BPF_XOR: u16 = 0xa0;

// jmp operations.
pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JGT: u16 = 0x20;
pub const BPF_JGE: u16 = 0x30;
pub const BPF_JSET: u16 = 0x40;

// Operand source.
pub const BPF_K: u16 = 0x00;
pub const BPF_X: u16 = 0x08;

// ret operand.
pub const BPF_A: u16 = 0x10;

// misc operations.
pub const BPF_TAX: u16 = 0x00;
pub const BPF_TXA: u16 = 0x80;

/// Maximum number of instructions in one program.
pub const BPF_MAXINSNS: usize = 4096;

/// Number of scratch memory words.
pub const BPF_MEMWORDS: u32 = 16;

/// Size of one serialized `struct sock_filter`, in bytes.
pub const INSN_SIZE: usize = 8;

/// Size of `struct seccomp_data`, in bytes.
pub const SECCOMP_DATA_SIZE: u32 = 64;

/// Offset of `seccomp_data::nr`.
pub const SECCOMP_DATA_NR: u32 = 0;
/// Offset of `seccomp_data::arch`.
pub const SECCOMP_DATA_ARCH: u32 = 4;
/// Offset of `seccomp_data::instruction_pointer`.
pub const SECCOMP_DATA_IP: u32 = 8;
/// Offset of `seccomp_data::args`.
pub const SECCOMP_DATA_ARGS: u32 = 16;

/// Offset of the low 32 bits of syscall argument `index`.
///
/// Both supported targets are little endian.
pub const fn seccomp_data_arg_lo(index: u32) -> u32 {
    SECCOMP_DATA_ARGS + index * 8
}

/// Offset of the high 32 bits of syscall argument `index`.
pub const fn seccomp_data_arg_hi(index: u32) -> u32 {
    seccomp_data_arg_lo(index) + 4
}

// Seccomp return actions.
pub const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
pub const SECCOMP_RET_KILL_THREAD: u32 = 0x0000_0000;
pub const SECCOMP_RET_KILL: u32 = SECCOMP_RET_KILL_THREAD;
pub const SECCOMP_RET_TRAP: u32 = 0x0003_0000;
pub const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
pub const SECCOMP_RET_USER_NOTIF: u32 = 0x7fc0_0000;
pub const SECCOMP_RET_TRACE: u32 = 0x7ff0_0000;
pub const SECCOMP_RET_LOG: u32 = 0x7ffc_0000;
pub const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

pub const SECCOMP_RET_ACTION_FULL: u32 = 0xffff_0000;
pub const SECCOMP_RET_DATA: u32 = 0x0000_ffff;

// Audit architecture identifiers.
const EM_386: u32 = 3;
const EM_X86_64: u32 = 62;
const EM_AARCH64: u32 = 183;
const AUDIT_ARCH_64BIT: u32 = 0x8000_0000;
const AUDIT_ARCH_LE: u32 = 0x4000_0000;

pub const AUDIT_ARCH_X86_64: u32 = EM_X86_64 | AUDIT_ARCH_64BIT | AUDIT_ARCH_LE;
pub const AUDIT_ARCH_I386: u32 = EM_386 | AUDIT_ARCH_LE;
pub const AUDIT_ARCH_AARCH64: u32 = EM_AARCH64 | AUDIT_ARCH_64BIT | AUDIT_ARCH_LE;

/// `ioctl` syscall number in the x86_64 table.
pub const NR_IOCTL_X86_64: u32 = 16;
/// `ioctl` syscall number in the i386 table.
pub const NR_IOCTL_I386: u32 = 54;

/// Terminal input injection ioctl command, from `asm-generic/ioctls.h`.
pub const TIOCSTI: u32 = 0x5412;

pub const EPERM: u32 = libc::EPERM as u32;

/// Build a non-jump instruction. Same as the `BPF_STMT` C macro.
pub const fn stmt(code: u16, k: u32) -> sock_filter {
    sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

/// Build a jump instruction. Same as the `BPF_JUMP` C macro.
pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

/// Instruction class, decoded from the low three opcode bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Ld,
    Ldx,
    St,
    Stx,
    Alu,
    Jmp,
    Ret,
    Misc,
}

impl Class {
    pub fn of(code: u16) -> Self {
        match code & 0x07 {
            BPF_LD => Self::Ld,
            BPF_LDX => Self::Ldx,
            BPF_ST => Self::St,
            BPF_STX => Self::Stx,
            BPF_ALU => Self::Alu,
            BPF_JMP => Self::Jmp,
            BPF_RET => Self::Ret,
            _ => Self::Misc,
        }
    }
}

pub const fn size(code: u16) -> u16 {
    code & 0x18
}

pub const fn mode(code: u16) -> u16 {
    code & 0xe0
}

pub const fn op(code: u16) -> u16 {
    code & 0xf0
}

pub const fn src(code: u16) -> u16 {
    code & 0x08
}

pub const fn rval(code: u16) -> u16 {
    code & 0x18
}

pub const fn miscop(code: u16) -> u16 {
    code & 0xf8
}

fn ret_name(k: u32) -> String {
    let data = k & SECCOMP_RET_DATA;
    match k & SECCOMP_RET_ACTION_FULL {
        SECCOMP_RET_KILL_PROCESS => "KILL_PROCESS".to_string(),
        SECCOMP_RET_KILL_THREAD => "KILL".to_string(),
        SECCOMP_RET_TRAP => "TRAP".to_string(),
        SECCOMP_RET_ERRNO => format!("ERRNO({data})"),
        SECCOMP_RET_USER_NOTIF => "USER_NOTIF".to_string(),
        SECCOMP_RET_TRACE => format!("TRACE({data})"),
        SECCOMP_RET_LOG => "LOG".to_string(),
        SECCOMP_RET_ALLOW => "ALLOW".to_string(),
        _ => format!("{k:#x}"),
    }
}

fn operand(code: u16, k: u32) -> String {
    if src(code) == BPF_X {
        "x".to_string()
    } else {
        format!("#{k:#x}")
    }
}

/// Human readable form of one instruction, in `bpf_dbg` style.
pub fn disasm(insn: &sock_filter) -> String {
    let code = insn.code;
    let k = insn.k;
    match Class::of(code) {
        Class::Ld | Class::Ldx => {
            let reg = if Class::of(code) == Class::Ld { "ld" } else { "ldx" };
            let sz = match size(code) {
                BPF_H => "h",
                BPF_B => "b",
                _ => "",
            };
            match mode(code) {
                BPF_IMM => format!("{reg}{sz} #{k:#x}"),
                BPF_ABS => format!("{reg}{sz} [{k}]"),
                BPF_IND => format!("{reg}{sz} [x + {k}]"),
                BPF_MEM => format!("{reg}{sz} M[{k}]"),
                BPF_LEN => format!("{reg}{sz} #len"),
                BPF_MSH => format!("{reg}{sz} 4*([{k}]&0xf)"),
                _ => format!("{reg}{sz} ??? {code:#06x}"),
            }
        }
        Class::St => format!("st M[{k}]"),
        Class::Stx => format!("stx M[{k}]"),
        Class::Alu => {
            let name = match op(code) {
                BPF_ADD => "add",
                BPF_SUB => "sub",
                BPF_MUL => "mul",
                BPF_DIV => "div",
                BPF_OR => "or",
                BPF_AND => "and",
                BPF_LSH => "lsh",
                BPF_RSH => "rsh",
                BPF_NEG => return "neg".to_string(),
                BPF_MOD => "mod",
                BPF_XOR => "xor",
                _ => "alu???",
            };
            format!("{name} {}", operand(code, k))
        }
        Class::Jmp => {
            let name = match op(code) {
                BPF_JA => return format!("ja +{k}"),
                BPF_JEQ => "jeq",
                BPF_JGT => "jgt",
                BPF_JGE => "jge",
                BPF_JSET => "jset",
                _ => "jmp???",
            };
            format!(
                "{name} {} jt {} jf {}",
                operand(code, k),
                insn.jt,
                insn.jf
            )
        }
        Class::Ret => match rval(code) {
            BPF_A => "ret a".to_string(),
            BPF_X => "ret x".to_string(),
            _ => format!("ret #{}", ret_name(k)),
        },
        Class::Misc => match miscop(code) {
            BPF_TAX => "tax".to_string(),
            BPF_TXA => "txa".to_string(),
            _ => format!("misc??? {code:#06x}"),
        },
    }
}


// vim: ts=4 sw=4 expandtab
