// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Aggregates, their self-description and the repository port.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Storage-agnostic entities and persistence contracts

pub mod agent;
pub mod conversation;
pub mod entity;
pub mod repository;
