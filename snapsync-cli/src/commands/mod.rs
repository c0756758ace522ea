// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod master;
pub mod signal;
pub mod status;
pub mod trigger;
pub mod validate;
pub mod worker;
