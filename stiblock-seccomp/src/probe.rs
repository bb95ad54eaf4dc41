// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fixed set of syscall entries with known expected verdicts.

use crate::{
    bpf::*,
    vm::{run, SeccompData, Verdict},
};
use anyhow as ah;
use seccompiler::sock_filter;

/// The syscall ABIs the TIOCSTI filter knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    I386,
}

impl Arch {
    pub fn audit_arch(&self) -> u32 {
        match self {
            Self::X86_64 => AUDIT_ARCH_X86_64,
            Self::I386 => AUDIT_ARCH_I386,
        }
    }

    pub fn nr_ioctl(&self) -> u32 {
        match self {
            Self::X86_64 => NR_IOCTL_X86_64,
            Self::I386 => NR_IOCTL_I386,
        }
    }

    /// A syscall that is not `ioctl`: `write`.
    fn nr_other(&self) -> u32 {
        match self {
            Self::X86_64 => 1,
            Self::I386 => 4,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::I386 => write!(f, "i386"),
        }
    }
}

/// Expected outcome of a probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    Kill,
    Allow,
    Errno(u16),
}

impl Expect {
    pub fn accepts(&self, verdict: Verdict) -> bool {
        match self {
            Self::Kill => verdict.is_kill(),
            Self::Allow => verdict == Verdict::Allow,
            Self::Errno(errno) => verdict == Verdict::Errno(*errno),
        }
    }
}

impl std::fmt::Display for Expect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Self::Kill => write!(f, "KILL"),
            Self::Allow => write!(f, "ALLOW"),
            Self::Errno(errno) => write!(f, "ERRNO({errno})"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Probe {
    pub name: String,
    pub data: SeccompData,
    pub expect: Expect,
}

#[derive(Clone, Debug)]
pub struct Mismatch {
    pub probe: Probe,
    pub verdict: Verdict,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{}: expected {}, got {}",
            self.probe.name, self.probe.expect, self.verdict
        )
    }
}

/// Architecture values that neither target uses.
pub const FOREIGN_ARCHS: [u32; 6] = [
    0,
    AUDIT_ARCH_AARCH64,
    AUDIT_ARCH_X86_64 & !0x8000_0000,
    AUDIT_ARCH_I386 | 0x8000_0000,
    AUDIT_ARCH_X86_64 + 1,
    u32::MAX,
];

fn probe(name: String, arch: u32, nr: u32, arg1: u64, expect: Expect) -> Probe {
    let args = [0, arg1, 0x3333_3333, 0, 0, 0];
    Probe {
        name,
        data: SeccompData::new(arch, nr, args),
        expect,
    }
}

/// The probe set for `arch`, plus the foreign architecture probes.
pub fn cases(arch: Arch) -> Vec<Probe> {
    let audit = arch.audit_arch();
    let ioctl = arch.nr_ioctl();
    let eperm = Expect::Errno(EPERM as u16);
    let tiocsti = TIOCSTI as u64;

    let mut cases = vec![
        probe(format!("{arch} ioctl(TIOCSTI)"), audit, ioctl, tiocsti, eperm),
        probe(
            format!("{arch} ioctl(TIOCSTI | high bits)"),
            audit,
            ioctl,
            0xffff_ffff_0000_0000 | tiocsti,
            eperm,
        ),
        probe(format!("{arch} ioctl(TIOCGWINSZ)"), audit, ioctl, 0x5413, Expect::Allow),
        probe(format!("{arch} ioctl(0)"), audit, ioctl, 0, Expect::Allow),
        probe(
            format!("{arch} write(TIOCSTI)"),
            audit,
            arch.nr_other(),
            tiocsti,
            Expect::Allow,
        ),
        probe(format!("{arch} nr 0"), audit, 0, 0, Expect::Allow),
    ];
    for foreign in FOREIGN_ARCHS {
        cases.push(probe(
            format!("arch {foreign:#010x} ioctl(TIOCSTI)"),
            foreign,
            ioctl,
            tiocsti,
            Expect::Kill,
        ));
        cases.push(probe(
            format!("arch {foreign:#010x} nr {}", arch.nr_other()),
            foreign,
            arch.nr_other(),
            0,
            Expect::Kill,
        ));
    }
    cases
}

/// Evaluate `prog` against all [cases] for `arch`.
/// Returns the probes whose verdict did not match.
pub fn run_cases(prog: &[sock_filter], arch: Arch) -> ah::Result<Vec<Mismatch>> {
    let mut mismatches = vec![];
    for probe in cases(arch) {
        let verdict: Verdict = run(prog, &probe.data)?.into();
        if !probe.expect.accepts(verdict) {
            mismatches.push(Mismatch { probe, verdict });
        }
    }
    Ok(mismatches)
}

// vim: ts=4 sw=4 expandtab
