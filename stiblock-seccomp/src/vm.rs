// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Evaluation of seccomp filter programs in the `bpfvm` classic BPF VM.
//!
//! Runs a program against a synthetic syscall entry, so that a filter can be
//! verified without handing it to the kernel.

use crate::{bpf::*, check::check};
use anyhow::{self as ah, Context as _};
use bpfvm::{
    seccomp::SeccompReturn,
    vm::{self, BpfVM},
};
use seccompiler::sock_filter;

/// Syscall entry context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SeccompData {
    pub nr: i32,
    pub arch: u32,
    pub instruction_pointer: u64,
    pub args: [u64; 6],
}

impl SeccompData {
    pub fn new(arch: u32, nr: u32, args: [u64; 6]) -> Self {
        Self {
            nr: nr as i32,
            arch,
            instruction_pointer: 0,
            args,
        }
    }

    /// The kernel's `struct seccomp_data`, as seen by `BPF_ABS` loads.
    pub fn to_raw(&self) -> libc::seccomp_data {
        libc::seccomp_data {
            nr: self.nr,
            arch: self.arch,
            instruction_pointer: self.instruction_pointer,
            args: self.args,
        }
    }
}

/// Decoded seccomp filter return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    KillProcess,
    KillThread,
    Errno(u16),
    Allow,
    /// Trap, trace, log and user notification actions. The raw return value.
    Other(u32),
}

impl Verdict {
    pub fn is_kill(&self) -> bool {
        matches!(self, Self::KillProcess | Self::KillThread)
    }
}

impl From<SeccompReturn> for Verdict {
    fn from(ret: SeccompReturn) -> Self {
        match ret {
            SeccompReturn::Allow => Self::Allow,
            SeccompReturn::Errno(errno) => Self::Errno(errno as u16),
            other => {
                let raw: u32 = other.into();
                match raw & SECCOMP_RET_ACTION_FULL {
                    SECCOMP_RET_KILL_PROCESS => Self::KillProcess,
                    SECCOMP_RET_KILL_THREAD => Self::KillThread,
                    _ => Self::Other(raw),
                }
            }
        }
    }
}

impl From<u32> for Verdict {
    fn from(ret: u32) -> Self {
        // The kernel treats unknown actions as KILL_PROCESS.
        SeccompReturn::try_from(ret).map_or(Self::KillProcess, Self::from)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Self::KillProcess => write!(f, "KILL_PROCESS"),
            Self::KillThread => write!(f, "KILL"),
            Self::Errno(errno) => write!(f, "ERRNO({errno})"),
            Self::Allow => write!(f, "ALLOW"),
            Self::Other(raw) => write!(f, "{raw:#010x}"),
        }
    }
}

/// Run the filter program `prog` against the syscall entry `data`
/// and return the raw filter return value.
///
/// The program is checked with [check] first.
pub fn run(prog: &[sock_filter], data: &SeccompData) -> ah::Result<u32> {
    check(prog)?;
    let insns: Vec<libc::sock_filter> = prog
        .iter()
        .map(|insn| libc::sock_filter {
            code: insn.code,
            jt: insn.jt,
            jf: insn.jf,
            k: insn.k,
        })
        .collect();
    let raw = data.to_raw();
    let ret: u32 = BpfVM::new(&insns)
        .context("Load filter into BPF VM")?
        .run(vm::any_to_data(&raw))
        .context("Run filter in BPF VM")?;
    Ok(ret)
}

#[cfg(test)]
mod test {
    use super::*;

    fn data(nr: u32) -> SeccompData {
        SeccompData::new(AUDIT_ARCH_X86_64, nr, [0; 6])
    }

    fn ret_a() -> sock_filter {
        stmt(BPF_RET | BPF_A, 0)
    }

    #[test]
    fn test_data_layout() {
        let mut d = SeccompData::new(0x1122_3344, 7, [0; 6]);
        d.instruction_pointer = 0xdead_beef_cafe;
        d.args[1] = 0xaaaa_bbbb_0000_5412;
        for (off, expected) in [
            (SECCOMP_DATA_NR, 7),
            (SECCOMP_DATA_ARCH, 0x1122_3344),
            (SECCOMP_DATA_IP, 0xbeef_cafe),
            (seccomp_data_arg_lo(1), 0x5412),
            (seccomp_data_arg_hi(1), 0xaaaa_bbbb),
        ] {
            let prog = [stmt(BPF_LD | BPF_W | BPF_ABS, off), ret_a()];
            assert_eq!(run(&prog, &d).unwrap(), expected, "offset {off}");
        }
    }

    #[test]
    fn test_verdict_decode() {
        assert_eq!(Verdict::from(SECCOMP_RET_ALLOW), Verdict::Allow);
        assert_eq!(Verdict::from(SECCOMP_RET_ERRNO | EPERM), Verdict::Errno(1));
        assert_eq!(Verdict::from(SECCOMP_RET_KILL_THREAD), Verdict::KillThread);
        assert_eq!(Verdict::from(SECCOMP_RET_KILL_PROCESS), Verdict::KillProcess);
        assert!(matches!(Verdict::from(SECCOMP_RET_TRACE | 5), Verdict::Other(_)));
        assert!(Verdict::KillThread.is_kill());
        assert!(Verdict::KillProcess.is_kill());
        assert!(!Verdict::Errno(1).is_kill());
    }

    #[test]
    fn test_jumps() {
        let prog = [
            stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR),
            jump(BPF_JMP | BPF_JGE | BPF_K, 100, 0, 1),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_ERRNO | 100),
            jump(BPF_JMP | BPF_JSET | BPF_K, 1, 1, 0),
            stmt(BPF_JMP | BPF_JA, 1),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_LOG),
            stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW),
        ];
        assert_eq!(run(&prog, &data(100)).unwrap(), SECCOMP_RET_ERRNO | 100);
        assert_eq!(run(&prog, &data(3)).unwrap(), SECCOMP_RET_LOG);
        assert_eq!(run(&prog, &data(2)).unwrap(), SECCOMP_RET_ALLOW);
    }

    #[test]
    fn test_alu() {
        let prog = [
            stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR),
            stmt(BPF_ALU | BPF_MUL | BPF_K, 3),
            stmt(BPF_ALU | BPF_ADD | BPF_K, 64),
            stmt(BPF_ALU | BPF_OR | BPF_K, SECCOMP_RET_ERRNO),
            ret_a(),
        ];
        assert_eq!(run(&prog, &data(5)).unwrap(), SECCOMP_RET_ERRNO | (15 + 64));
    }

    #[test]
    fn test_rejects_invalid_program() {
        let prog = [jump(BPF_JMP | BPF_JEQ | BPF_K, 0, 5, 5)];
        assert!(run(&prog, &data(0)).is_err());
    }
}

// vim: ts=4 sw=4 expandtab
