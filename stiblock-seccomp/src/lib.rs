// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Seccomp filter that blocks `ioctl(TIOCSTI)` terminal input injection.
//!
//! The filter is available in two flavors:
//!
//! - A hand assembled program that checks for the x86_64 and i386
//!   syscall ABIs ([Filter::block_tiocsti]).
//! - A program generated by `seccompiler` for x86_64
//!   ([Filter::compile], feature `compile`).
//!
//! Both return `EPERM` for `ioctl(fd, TIOCSTI, ...)` and allow everything else.

#![forbid(unsafe_code)]

#[cfg(not(any(target_os = "linux", target_os = "android")))]
std::compile_error!("stiblock-seccomp does not support non-Linux platforms.");

pub mod bpf;
pub mod check;
pub mod literal;
pub mod probe;
pub mod vm;

use crate::{
    bpf::*,
    probe::{Arch, Mismatch},
    vm::{SeccompData, Verdict},
};
use anyhow::{self as ah, format_err as err};
use seccompiler::{sock_filter, BpfProgram};

#[cfg(feature = "compile")]
use anyhow::Context as _;
#[cfg(feature = "compile")]
use seccompiler::{
    SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule,
    TargetArch,
};
#[cfg(feature = "compile")]
use std::{collections::BTreeMap, fs::write, path::Path};

/// File name of the precompiled hand assembled filter in `OUT_DIR`.
pub const PRECOMPILED_BLOCK_TIOCSTI: &str = "seccomp_block_tiocsti.bpf";

/// File name of the precompiled `seccompiler` filter in `OUT_DIR`.
/// The file is empty, if the target architecture is not supported.
pub const PRECOMPILED_FILTER: &str = "seccomp_filter.bpf";

/// The hand assembled TIOCSTI blocking program.
#[rustfmt::skip]
pub const BLOCK_TIOCSTI: [sock_filter; 12] = [
    /*  0 */ stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_ARCH),
    /*  1 */ jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH_X86_64, 2, 0),
    /*  2 */ jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH_I386, 3, 0),
    // Same action as the seccompiler arch mismatch.
    /*  3 */ stmt(BPF_RET | BPF_K, SECCOMP_RET_KILL_PROCESS),
    // x86_64
    /*  4 */ stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR),
    /*  5 */ jump(BPF_JMP | BPF_JEQ | BPF_K, NR_IOCTL_X86_64, 2, 4),
    // i386
    /*  6 */ stmt(BPF_LD | BPF_W | BPF_ABS, SECCOMP_DATA_NR),
    /*  7 */ jump(BPF_JMP | BPF_JEQ | BPF_K, NR_IOCTL_I386, 0, 2),
    // ioctl: The kernel truncates the command to 32 bits.
    /*  8 */ stmt(BPF_LD | BPF_W | BPF_ABS, seccomp_data_arg_lo(1)),
    /*  9 */ jump(BPF_JMP | BPF_JEQ | BPF_K, TIOCSTI, 1, 0),
    /* 10 */ stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW),
    /* 11 */ stmt(BPF_RET | BPF_K, SECCOMP_RET_ERRNO | EPERM),
];

/// Filter generation strategy.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Strategy {
    /// Hand assembled program (default).
    #[default]
    Direct,

    /// Program generated by `seccompiler`.
    Compile,
}

impl Strategy {
    /// Identifier of the generated byte string assignment.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "SECCOMP_BLOCK_TIOCSTI",
            Self::Compile => "SECCOMP_FILTER",
        }
    }

    /// Reverse of [Strategy::name].
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Direct, Self::Compile]
            .into_iter()
            .find(|s| s.name() == name)
    }

    /// The syscall ABIs the generated program handles.
    pub fn archs(&self) -> &'static [Arch] {
        match self {
            Self::Direct => &[Arch::X86_64, Arch::I386],
            Self::Compile => &[Arch::X86_64],
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Compile => write!(f, "compile"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = ah::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().trim() {
            "direct" => Ok(Self::Direct),
            "compile" => Ok(Self::Compile),
            other => Err(err!(
                "Strategy '{other}' is not valid. Valid values are: direct, compile."
            )),
        }
    }
}

/// A seccomp filter program.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter(BpfProgram);

impl Filter {
    /// The hand assembled TIOCSTI blocking filter.
    pub fn block_tiocsti() -> Self {
        Self(BLOCK_TIOCSTI.to_vec())
    }

    /// Generate the filter with the given strategy.
    pub fn generate(strategy: Strategy) -> ah::Result<Self> {
        match strategy {
            Strategy::Direct => Ok(Self::block_tiocsti()),
            #[cfg(feature = "compile")]
            Strategy::Compile => Self::compile(),
            #[cfg(not(feature = "compile"))]
            Strategy::Compile => Err(err!(
                "stiblock-seccomp has been built without the 'compile' feature"
            )),
        }
    }

    pub fn instructions(&self) -> &[sock_filter] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Simple serialization into the kernel's `struct sock_filter` array layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.0.len() * INSN_SIZE);
        for insn in &self.0 {
            raw.extend_from_slice(&insn.code.to_le_bytes());
            raw.push(insn.jt);
            raw.push(insn.jf);
            raw.extend_from_slice(&insn.k.to_le_bytes());
        }
        raw
    }

    /// Simple de-serialization of [Filter::serialize] output.
    pub fn deserialize(raw: &[u8]) -> ah::Result<Self> {
        if raw.len() % INSN_SIZE != 0 {
            return Err(err!(
                "Filter size {} is not a multiple of the instruction size {INSN_SIZE}",
                raw.len()
            ));
        }
        let bpf = raw
            .chunks_exact(INSN_SIZE)
            .map(|c| sock_filter {
                code: u16::from_le_bytes([c[0], c[1]]),
                jt: c[2],
                jf: c[3],
                k: u32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            })
            .collect();
        Ok(Self(bpf))
    }

    /// Check whether the kernel would accept this program.
    pub fn check(&self) -> ah::Result<()> {
        check::check(&self.0)
    }

    /// Evaluate the program for one syscall entry.
    pub fn evaluate(&self, data: &SeccompData) -> ah::Result<Verdict> {
        Ok(vm::run(&self.0, data)?.into())
    }

    /// Run the [probe] set for `arch`. Returns the failed probes.
    pub fn probe(&self, arch: Arch) -> ah::Result<Vec<Mismatch>> {
        probe::run_cases(&self.0, arch)
    }

    /// Compile the filter with `seccompiler` for x86_64.
    ///
    /// The result does not depend on the build host.
    #[cfg(feature = "compile")]
    pub fn compile() -> ah::Result<Self> {
        Self::compile_for_arch("x86_64")
    }

    #[cfg(feature = "compile")]
    pub fn compile_for_arch(arch: &str) -> ah::Result<Self> {
        let target: TargetArch = arch.try_into().context("Unsupported CPU ARCH")?;
        if arch != "x86_64" {
            return Err(err!(
                "Unsupported CPU ARCH: The TIOCSTI filter is only defined for x86_64"
            ));
        }

        let cond = SeccompCondition::new(
            1,
            SeccompCmpArgLen::Dword,
            SeccompCmpOp::Eq,
            TIOCSTI.into(),
        )
        .context("Create ioctl command condition")?;
        let rule = SeccompRule::new(vec![cond]).context("Add ioctl(TIOCSTI) rule")?;
        let rules: BTreeMap<i64, Vec<SeccompRule>> =
            [(i64::from(NR_IOCTL_X86_64), vec![rule])].into();

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::Allow,
            SeccompAction::Errno(EPERM),
            target,
        )
        .context("Create seccomp filter")?;

        let filter: BpfProgram = filter.try_into().context("Seccomp to BPF")?;
        check::check(&filter).context("Check compiled seccomp filter")?;

        Ok(Self(filter))
    }

    /// Write both filters into the build script output directory `out_dir`.
    ///
    /// `arch` is the build target architecture.
    /// See [PRECOMPILED_BLOCK_TIOCSTI] and [PRECOMPILED_FILTER].
    #[cfg(feature = "compile")]
    pub fn precompile(arch: &str, out_dir: &Path) -> ah::Result<()> {
        write(
            out_dir.join(PRECOMPILED_BLOCK_TIOCSTI),
            Self::block_tiocsti().serialize(),
        )
        .context("Write hand assembled seccomp filter")?;

        let compiled = if arch == "x86_64" {
            Self::compile_for_arch(arch)?.serialize()
        } else {
            vec![]
        };
        write(out_dir.join(PRECOMPILED_FILTER), compiled).context("Write seccomp filter")?;
        Ok(())
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        for (pc, insn) in self.0.iter().enumerate() {
            writeln!(f, "{pc:4}: {}", disasm(insn))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::FOREIGN_ARCHS;

    #[test]
    fn test_block_tiocsti_layout() {
        let filter = Filter::block_tiocsti();
        filter.check().unwrap();
        assert_eq!(filter.len(), 12);

        let first = &filter.instructions()[0];
        assert_eq!(first.code, BPF_LD | BPF_W | BPF_ABS);
        assert_eq!(first.k, SECCOMP_DATA_ARCH);

        let last = &filter.instructions()[11];
        assert_eq!(last.code, BPF_RET | BPF_K);
        assert_eq!(last.k, SECCOMP_RET_ERRNO | EPERM);
    }

    #[test]
    fn test_block_tiocsti_jump_targets() {
        let insns = Filter::block_tiocsti().0;
        let target = |pc: usize, off: u8| pc + 1 + off as usize;
        // Known architecture → syscall number check.
        assert_eq!(target(1, insns[1].jt), 4);
        assert_eq!(target(2, insns[2].jt), 6);
        assert_eq!(target(2, insns[2].jf), 3);
        // ioctl → argument check, others → allow.
        assert_eq!(target(5, insns[5].jt), 8);
        assert_eq!(target(5, insns[5].jf), 10);
        assert_eq!(target(7, insns[7].jt), 8);
        assert_eq!(target(7, insns[7].jf), 10);
        // TIOCSTI → errno.
        assert_eq!(target(9, insns[9].jt), 11);
        assert_eq!(target(9, insns[9].jf), 10);
    }

    #[test]
    fn test_block_tiocsti_probes() {
        let filter = Filter::block_tiocsti();
        for arch in Strategy::Direct.archs() {
            let mismatches = filter.probe(*arch).unwrap();
            assert!(mismatches.is_empty(), "{mismatches:?}");
        }
    }

    #[test]
    fn test_block_tiocsti_fail_closed() {
        let filter = Filter::block_tiocsti();
        // Sweep the arch value space with a stride, plus all neighbours
        // of the two known values.
        let mut archs: Vec<u32> = (0..=0xffff).map(|i| i * 0x1_0001).collect();
        for known in [AUDIT_ARCH_X86_64, AUDIT_ARCH_I386] {
            archs.extend((known - 64)..known);
            archs.extend((known + 1)..(known + 64));
        }
        archs.extend(FOREIGN_ARCHS);
        for arch in archs {
            if arch == AUDIT_ARCH_X86_64 || arch == AUDIT_ARCH_I386 {
                continue;
            }
            for nr in [0, 1, NR_IOCTL_X86_64, NR_IOCTL_I386] {
                let data = SeccompData::new(arch, nr, [0, TIOCSTI.into(), 0, 0, 0, 0]);
                let verdict = filter.evaluate(&data).unwrap();
                assert_eq!(verdict, Verdict::KillProcess, "arch {arch:#x}");
            }
        }
    }

    #[test]
    fn test_block_tiocsti_bytes() {
        let raw = Filter::block_tiocsti().serialize();
        assert_eq!(raw.len(), 12 * INSN_SIZE);
        assert_eq!(raw[..8], [0x20, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00]);
        assert_eq!(raw[8..16], [0x15, 0x00, 0x02, 0x00, 0x3e, 0x00, 0x00, 0xc0]);
        assert_eq!(raw[88..], [0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x05, 0x00]);
    }

    #[test]
    fn test_filter_serialize() {
        let filter = Filter::block_tiocsti();
        let filter2 = Filter::deserialize(&filter.serialize()).unwrap();
        assert_eq!(filter, filter2);

        assert!(Filter::deserialize(&[0; 7]).is_err());
        assert!(Filter::deserialize(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_literal_roundtrip() {
        let filter = Filter::block_tiocsti();
        let line = literal::render(Strategy::Direct.name(), &filter.serialize());
        assert!(line.starts_with("SECCOMP_BLOCK_TIOCSTI = b'\\x20\\x00\\x00\\x00\\x04"));
        assert!(line.ends_with("\\x05\\x00'\n"));
        assert_eq!(line.matches('\n').count(), 1);

        let (name, raw) = literal::parse(&line).unwrap();
        assert_eq!(Strategy::from_name(&name), Some(Strategy::Direct));
        let decoded = Filter::deserialize(&raw).unwrap();
        decoded.check().unwrap();
        assert_eq!(decoded, filter);
    }

    #[test]
    fn test_strategy() {
        assert_eq!("direct".parse::<Strategy>().unwrap(), Strategy::Direct);
        assert_eq!(" Compile".parse::<Strategy>().unwrap(), Strategy::Compile);
        assert!("libseccomp".parse::<Strategy>().is_err());
        assert_eq!(Strategy::from_name("SECCOMP_FILTER"), Some(Strategy::Compile));
        assert_eq!(Strategy::from_name("FOO"), None);
        assert_eq!(Strategy::default(), Strategy::Direct);
    }

    #[test]
    fn test_disasm() {
        let text = Filter::block_tiocsti().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], "   0: ld [4]");
        assert_eq!(lines[9], "   9: jeq #0x5412 jt 1 jf 0");
        assert_eq!(lines[11], "  11: ret #ERRNO(1)");
    }

    #[test]
    #[cfg(feature = "compile")]
    fn test_compile() {
        let filter = Filter::compile().unwrap();
        filter.check().unwrap();
        let mismatches = filter.probe(Arch::X86_64).unwrap();
        assert!(mismatches.is_empty(), "{mismatches:?}");

        // seccompiler only knows one ABI per program.
        let args = [0, TIOCSTI.into(), 0, 0, 0, 0];
        let i386 = SeccompData::new(AUDIT_ARCH_I386, NR_IOCTL_I386, args);
        assert!(filter.evaluate(&i386).unwrap().is_kill());
    }

    #[test]
    #[cfg(feature = "compile")]
    fn test_compile_matches_direct() {
        let direct = Filter::block_tiocsti();
        let compiled = Filter::generate(Strategy::Compile).unwrap();
        for probe in probe::cases(Arch::X86_64) {
            let a = direct.evaluate(&probe.data).unwrap();
            let b = compiled.evaluate(&probe.data).unwrap();
            assert_eq!(a, b, "{}", probe.name);
        }
    }

    #[test]
    #[cfg(feature = "compile")]
    fn test_compile_idempotent() {
        let a = Filter::compile().unwrap().serialize();
        let b = Filter::compile().unwrap().serialize();
        assert_eq!(a, b);
    }

    #[test]
    #[cfg(feature = "compile")]
    fn test_compile_unsupported_arch() {
        assert!(Filter::compile_for_arch("aarch64").is_err());
        assert!(Filter::compile_for_arch("sparc").is_err());
    }

    #[test]
    #[cfg(feature = "compile")]
    fn test_precompile() {
        let dir = std::env::temp_dir().join(format!("stiblock-precompile-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        Filter::precompile("x86_64", &dir).unwrap();
        let direct = std::fs::read(dir.join(PRECOMPILED_BLOCK_TIOCSTI)).unwrap();
        assert_eq!(direct, Filter::block_tiocsti().serialize());
        let compiled = std::fs::read(dir.join(PRECOMPILED_FILTER)).unwrap();
        assert_eq!(compiled, Filter::compile().unwrap().serialize());

        Filter::precompile("aarch64", &dir).unwrap();
        assert!(std::fs::read(dir.join(PRECOMPILED_FILTER)).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

// vim: ts=4 sw=4 expandtab
