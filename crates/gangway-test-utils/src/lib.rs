// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Gangway integration tests.
//!
//! `MockBackend` replays scripted unified-event sequences and drives the
//! installed tool hooks the way a real agent runtime would, enabling fast,
//! CI-runnable tests without external processes.

pub mod mock_backend;
pub mod status_collector;

pub use mock_backend::{MockBackend, MockObservations, ScriptStep};
pub use status_collector::StatusCollector;
