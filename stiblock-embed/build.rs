// -*- coding: utf-8 -*-
//
// Copyright (C) 2024 Michael Büsch <m@bues.ch>
//
// Licensed under the Apache License version 2.0
// or the MIT license, at your option.
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![forbid(unsafe_code)]

use build_target::target_arch;
use std::path::Path;
use stiblock_seccomp::Filter;

fn main() {
    let arch = target_arch().expect("Failed to get build target architecture");
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR is not set");

    // Precompile the seccomp filters.
    Filter::precompile(arch.as_str(), Path::new(&out_dir))
        .expect("Failed to precompile seccomp BPF");

    println!("cargo:rerun-if-changed=build.rs");
}

// vim: ts=4 sw=4 expandtab
