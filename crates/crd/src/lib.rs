// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Custom resource definitions for the compliance operator

pub mod keys;
pub mod v1_alpha1;

pub use v1_alpha1::*;
