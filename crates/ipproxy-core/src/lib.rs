// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Core types, errors, and configuration shared by the proxy engine and CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::{PasswordSource, PasswordSupplier, ProxyConfig};
pub use error::ProxyError;
pub use types::*;
