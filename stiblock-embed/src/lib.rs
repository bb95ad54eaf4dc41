// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The TIOCSTI blocking seccomp filters, precompiled at build time.
//!
//! A host program hands these bytes to its sandbox
//! (for example `bwrap --seccomp FD`) without linking a seccomp compiler.

#![forbid(unsafe_code)]

use anyhow::{self as ah, format_err as err, Context as _};
use stiblock_seccomp::{literal, Filter, Strategy};

/// Hand assembled filter for the x86_64 and i386 syscall ABIs.
pub const SECCOMP_BLOCK_TIOCSTI: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/seccomp_block_tiocsti.bpf"));

/// `seccompiler` generated filter.
/// Empty, if the build target is not x86_64.
pub const SECCOMP_FILTER: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/seccomp_filter.bpf"));

/// Raw program bytes for `strategy`.
pub fn filter_bytes(strategy: Strategy) -> ah::Result<&'static [u8]> {
    // See build.rs for the filter definition.
    let raw = match strategy {
        Strategy::Direct => SECCOMP_BLOCK_TIOCSTI,
        Strategy::Compile => SECCOMP_FILTER,
    };
    if raw.is_empty() {
        return Err(err!(
            "No precompiled '{strategy}' seccomp filter available for this target"
        ));
    }
    Ok(raw)
}

/// The decoded and checked filter for `strategy`.
pub fn filter(strategy: Strategy) -> ah::Result<Filter> {
    let filter = Filter::deserialize(filter_bytes(strategy)?).context("Decode seccomp filter")?;
    filter.check().context("Check seccomp filter")?;
    Ok(filter)
}

/// The filter for `strategy` as a byte string constant assignment.
pub fn assignment(strategy: Strategy) -> ah::Result<String> {
    Ok(literal::render(strategy.name(), filter_bytes(strategy)?))
}


// vim: ts=4 sw=4 expandtab
