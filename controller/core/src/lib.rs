// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Flotilla controller core
//!
//! Fleet controller for remote runner daemons: agent registry, health
//! monitoring, layered configuration resolution and audited streamed
//! execution.
//!
//! # Architecture
//!
//! - **domain** — entities, events and repository contracts
//! - **application** — registry, health monitor, config resolver, exec
//!   dispatcher, update triggers
//! - **infrastructure** — PostgreSQL and in-memory repositories, event
//!   buses, the runner HTTP client
//! - **presentation** — axum HTTP API and SSE streams

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
