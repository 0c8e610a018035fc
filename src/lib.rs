// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custody Server - Custodial Wallets with Guardian Recovery
//!
//! Custodial EVM wallets whose ownership can be transferred by a threshold of
//! guardians when the owner loses access.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum) and OpenAPI docs
//! - `auth` - Password hashing, session tokens, TOTP, request extractors
//! - `services` - Business logic (auth, OAuth, 2FA, wallets, guardians, recovery, notifications)
//! - `storage` - JSON document storage, redb index, audit log
//! - `reaper` - Background expiry of stale recoveries

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod reaper;
pub mod services;
pub mod state;
pub mod storage;
