// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structural validation of seccomp BPF programs.
//!
//! This mirrors what the kernel does in `bpf_check_classic()` and
//! `seccomp_check_filter()` before it accepts a filter.

use crate::bpf::*;
use anyhow::{self as ah, format_err as err};
use seccompiler::sock_filter;

/// Opcodes the seccomp verifier permits.
const SECCOMP_OPCODES: [u16; 41] = [
    BPF_LD | BPF_W | BPF_ABS,
    BPF_LD | BPF_W | BPF_LEN,
    BPF_LDX | BPF_W | BPF_LEN,
    BPF_LD | BPF_IMM,
    BPF_LDX | BPF_IMM,
    BPF_LD | BPF_MEM,
    BPF_LDX | BPF_MEM,
    BPF_ST,
    BPF_STX,
    BPF_RET | BPF_K,
    BPF_RET | BPF_A,
    BPF_MISC | BPF_TAX,
    BPF_MISC | BPF_TXA,
    BPF_ALU | BPF_NEG,
    BPF_ALU | BPF_ADD | BPF_K,
    BPF_ALU | BPF_ADD | BPF_X,
    BPF_ALU | BPF_SUB | BPF_K,
    BPF_ALU | BPF_SUB | BPF_X,
    BPF_ALU | BPF_MUL | BPF_K,
    BPF_ALU | BPF_MUL | BPF_X,
    BPF_ALU | BPF_DIV | BPF_K,
    BPF_ALU | BPF_DIV | BPF_X,
    BPF_ALU | BPF_AND | BPF_K,
    BPF_ALU | BPF_AND | BPF_X,
    BPF_ALU | BPF_OR | BPF_K,
    BPF_ALU | BPF_OR | BPF_X,
    BPF_ALU | BPF_XOR | BPF_K,
    BPF_ALU | BPF_XOR | BPF_X,
    BPF_ALU | BPF_LSH | BPF_K,
    BPF_ALU | BPF_LSH | BPF_X,
    BPF_ALU | BPF_RSH | BPF_K,
    BPF_ALU | BPF_RSH | BPF_X,
    BPF_JMP | BPF_JA,
    BPF_JMP | BPF_JEQ | BPF_K,
    BPF_JMP | BPF_JEQ | BPF_X,
    BPF_JMP | BPF_JGE | BPF_K,
    BPF_JMP | BPF_JGE | BPF_X,
    BPF_JMP | BPF_JGT | BPF_K,
    BPF_JMP | BPF_JGT | BPF_X,
    BPF_JMP | BPF_JSET | BPF_K,
    BPF_JMP | BPF_JSET | BPF_X,
];

fn check_insn(pc: usize, insn: &sock_filter, len: usize) -> ah::Result<()> {
    let code = insn.code;
    let k = insn.k;

    if !SECCOMP_OPCODES.contains(&code) {
        return Err(err!("Instruction {pc}: Opcode {code:#06x} is not allowed in seccomp"));
    }

    match Class::of(code) {
        Class::Ld if mode(code) == BPF_ABS => {
            if k >= SECCOMP_DATA_SIZE || k & 3 != 0 {
                return Err(err!(
                    "Instruction {pc}: Load offset {k} is outside of seccomp_data or unaligned"
                ));
            }
        }
        Class::Ld | Class::Ldx if mode(code) == BPF_MEM => {
            if k >= BPF_MEMWORDS {
                return Err(err!("Instruction {pc}: Scratch memory index {k} out of range"));
            }
        }
        Class::St | Class::Stx => {
            if k >= BPF_MEMWORDS {
                return Err(err!("Instruction {pc}: Scratch memory index {k} out of range"));
            }
        }
        Class::Alu if src(code) == BPF_K => match op(code) {
            BPF_DIV if k == 0 => {
                return Err(err!("Instruction {pc}: Division by constant zero"));
            }
            BPF_LSH | BPF_RSH if k >= 32 => {
                return Err(err!("Instruction {pc}: Shift by {k} bits"));
            }
            _ => (),
        },
        Class::Jmp => {
            let remaining = len - pc - 1;
            if op(code) == BPF_JA {
                if k as usize >= remaining {
                    return Err(err!("Instruction {pc}: Jump target +{k} out of bounds"));
                }
            } else if insn.jt as usize >= remaining || insn.jf as usize >= remaining {
                return Err(err!(
                    "Instruction {pc}: Jump targets jt={} jf={} out of bounds",
                    insn.jt,
                    insn.jf
                ));
            }
        }
        _ => (),
    }
    Ok(())
}

/// Reject reads of scratch memory words that are not written on every path
/// leading to the read.
fn check_load_and_stores(prog: &[sock_filter]) -> ah::Result<()> {
    let mut masks = vec![u16::MAX; prog.len()];
    let mut memvalid: u16 = 0;
    for (pc, insn) in prog.iter().enumerate() {
        memvalid &= masks[pc];
        let code = insn.code;
        let k = insn.k;
        match Class::of(code) {
            Class::St | Class::Stx => memvalid |= 1_u16 << k,
            Class::Ld | Class::Ldx if mode(code) == BPF_MEM => {
                if memvalid & (1_u16 << k) == 0 {
                    return Err(err!(
                        "Instruction {pc}: Scratch memory M[{k}] is read before it is written"
                    ));
                }
            }
            Class::Jmp => {
                if op(code) == BPF_JA {
                    masks[pc + 1 + k as usize] &= memvalid;
                } else {
                    masks[pc + 1 + insn.jt as usize] &= memvalid;
                    masks[pc + 1 + insn.jf as usize] &= memvalid;
                }
                memvalid = u16::MAX;
            }
            _ => (),
        }
    }
    Ok(())
}

/// Check that `prog` is a structurally valid seccomp filter program.
pub fn check(prog: &[sock_filter]) -> ah::Result<()> {
    if prog.is_empty() {
        return Err(err!("Filter program is empty"));
    }
    if prog.len() > BPF_MAXINSNS {
        return Err(err!(
            "Filter program has {} instructions. Maximum is {BPF_MAXINSNS}",
            prog.len()
        ));
    }
    for (pc, insn) in prog.iter().enumerate() {
        check_insn(pc, insn, prog.len())?;
    }
    check_load_and_stores(prog)?;

    let last = &prog[prog.len() - 1];
    if Class::of(last.code) != Class::Ret {
        return Err(err!("Filter program does not end with a return instruction"));
    }
    Ok(())
}


// vim: ts=4 sw=4 expandtab
