// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface that translates external requests into application service
//! calls. No business logic lives here — all real work is delegated to
//! `crate::application` and `crate::infrastructure`.

pub mod api;
