// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Schema mapping, storage adapters, connection pools and logging.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Concrete technology behind the domain ports

pub mod db;
pub mod repositories;
pub mod schema;
pub mod telemetry;
