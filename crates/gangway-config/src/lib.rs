// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Gangway gateway.
//!
//! Layered TOML loading via Figment (defaults, system, user, local, env)
//! plus post-deserialization validation.

pub mod loader;
pub mod model;
pub mod validation;

pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::GangwayConfig;
pub use validation::{ConfigError, load_and_validate, render_errors, validate_config};
