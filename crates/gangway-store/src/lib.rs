// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flat-file state persistence for the Gangway gateway.
//!
//! There is no database by design: session snapshots, pending forms, and
//! restart hand-off state live as JSON/markdown files in known directories.
//! Corruption-sensitive files go through write-tmp-then-rename.

pub mod atomic;
pub mod forms;
pub mod restart;
pub mod snapshot;

pub use atomic::{read_json, write_atomic, write_json_atomic};
pub use forms::{FormStore, PendingForm};
pub use restart::{FileRestartStore, PendingSteeringCarryover, RestartMarker};
pub use snapshot::{SessionSnapshot, SnapshotStore};
