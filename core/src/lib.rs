// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # intelli-gateway-core
//!
//! Domain, application, infrastructure, and presentation layers for the
//! Intelli Agent Gateway: a localhost HTTP service that mediates between
//! LLM-driven agents and a set of privileged tools.
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← HTTP API (axum)
//!     ↓
//! application/    ← Supervisor pipeline, scheduler, auth, rate limiting, ...
//!     ↓
//! domain/         ← ToolCall, Approval, Manifest, User, ScheduledTask, ...
//!     ↓
//! infrastructure/ ← sandbox pool/worker, approval bus, audit sink, config
//! ```
//!
//! The Supervisor ([`application::supervisor::Supervisor`]) is the single
//! entry point for tool execution: every call, whether arriving live over
//! HTTP or replayed by the scheduler, passes through the same nine-stage
//! pipeline.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
