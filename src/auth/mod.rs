// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Password login, session tokens and second factors for the custody API.
//!
//! ## Auth Flow
//!
//! 1. Client logs in with email + password (or OAuth)
//! 2. Server creates a session and returns:
//!    - an HS256 access token (`sub`, `sid`, `role`), also set as the
//!      `access_token` cookie
//!    - a rotating refresh token `<session_id>.<secret>` (`refresh_token` cookie)
//! 3. Requests send `Authorization: Bearer <token>` or the cookie; the
//!    extractor verifies the token and that the session is still active
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - Refresh secrets and SMS codes are stored as keyed hashes only
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;
pub mod password;
pub mod roles;
pub mod tokens;
pub mod totp;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, ClientInfo, ACCESS_COOKIE, REFRESH_COOKIE};
pub use roles::Role;
pub use tokens::TokenManager;
