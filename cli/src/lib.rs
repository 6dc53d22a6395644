// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bootstrap helpers for the `intelli-gateway` binary, split out of
//! `main.rs` so the wiring can be exercised without a real `TcpListener`.

pub mod bootstrap;
