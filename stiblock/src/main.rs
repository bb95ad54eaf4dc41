// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![forbid(unsafe_code)]

use anyhow::{self as ah, format_err as err, Context as _};
use clap::Parser;
use stiblock_seccomp::{literal, Filter, Strategy};
use std::{
    fs::{read_to_string, write},
    io::{stdout, Write as _},
    path::{Path, PathBuf},
};

/// Parse and validate the `--name` option.
fn parse_name(name: &str) -> ah::Result<String> {
    if literal::is_identifier(name) {
        Ok(name.to_string())
    } else {
        Err(err!("'{name}' is not a valid identifier"))
    }
}

/// Generate a seccomp BPF filter that blocks ioctl(TIOCSTI)
/// and print it as a byte string constant.
#[derive(Parser, Debug)]
struct Opts {
    /// Filter generation strategy.
    ///
    /// - direct: Hand assembled filter for the x86_64 and i386 syscall ABIs.
    ///   The constant is named SECCOMP_BLOCK_TIOCSTI.
    ///
    /// - compile: Filter generated by seccompiler for x86_64.
    ///   The constant is named SECCOMP_FILTER.
    #[arg(long, short, default_value = "direct")]
    strategy: Strategy,

    /// Override the name of the generated constant.
    #[arg(long, value_parser = parse_name)]
    name: Option<String>,

    /// Write the output to this file instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Write the raw BPF program bytes instead of a byte string constant.
    #[arg(long, conflicts_with = "name")]
    raw: bool,

    /// Verify a previously generated constant.
    ///
    /// Reads the file, decodes the byte string constant in it
    /// and runs the structural checks and the probe syscalls against it.
    /// All generation options are ignored.
    #[arg(long, conflicts_with_all = ["name", "output", "raw"])]
    verify: Option<PathBuf>,

    /// Print the filter disassembly to stderr.
    #[arg(long)]
    disasm: bool,

    /// Show detailed information about what happens internally.
    #[arg(long)]
    verbose: bool,

    /// Show version information and exit.
    #[arg(long, short = 'v')]
    version: bool,
}

fn write_output(path: Option<&Path>, data: &[u8]) -> ah::Result<()> {
    if let Some(path) = path {
        write(path, data).context("Write output file")
    } else {
        let mut stdout = stdout().lock();
        stdout.write_all(data).context("Write to stdout")?;
        stdout.flush().context("Flush stdout")
    }
}

fn run_generate(opts: &Opts) -> ah::Result<()> {
    if opts.verbose {
        eprintln!("Strategy: {}", opts.strategy);
    }

    let filter = Filter::generate(opts.strategy).context("Generate seccomp filter")?;
    filter.check().context("Check seccomp filter")?;

    if opts.verbose {
        eprintln!(
            "Filter: {} instructions, {} bytes",
            filter.len(),
            filter.len() * stiblock_seccomp::bpf::INSN_SIZE
        );
    }
    if opts.disasm {
        eprint!("{filter}");
    }

    // Everything is rendered before the first byte is written.
    let raw = filter.serialize();
    let out = if opts.raw {
        raw
    } else {
        let name = opts.name.as_deref().unwrap_or(opts.strategy.name());
        literal::render(name, &raw).into_bytes()
    };
    write_output(opts.output.as_deref(), &out)
}

fn run_verify(path: &Path, opts: &Opts) -> ah::Result<()> {
    let text = read_to_string(path).context("Read constant file")?;
    let line = text
        .lines()
        .find(|l| l.contains(" = b'"))
        .ok_or_else(|| err!("No byte string constant found in '{}'", path.display()))?;
    let (name, raw) = literal::parse(line).context("Parse byte string constant")?;
    let filter = Filter::deserialize(&raw).context("Decode BPF program")?;
    filter.check().context("Check seccomp filter")?;

    if opts.disasm {
        eprint!("{filter}");
    }

    // Unknown names get the strictest probe set.
    let strategy = Strategy::from_name(&name).unwrap_or_default();
    let mut failed = 0;
    for arch in strategy.archs() {
        let mismatches = filter.probe(*arch).context("Run probes")?;
        if opts.verbose {
            eprintln!("{arch}: {} probe mismatches", mismatches.len());
        }
        for m in &mismatches {
            eprintln!("FAILED: {m}");
        }
        failed += mismatches.len();
    }
    if failed > 0 {
        return Err(err!("{name}: {failed} probes failed."));
    }

    println!("{name}: {} instructions, all probes passed.", filter.len());
    Ok(())
}

fn main() -> ah::Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("stiblock version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if let Some(path) = &opts.verify {
        run_verify(path, &opts)
    } else {
        run_generate(&opts)
    }
}

// vim: ts=4 sw=4 expandtab
