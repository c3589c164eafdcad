// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hooks module - application lifecycle hook execution.

pub mod job;
pub mod kubernetes;
pub mod mock;
pub mod orchestrator;
mod traits;

pub use kubernetes::KubeHooks;
pub use mock::MockHooks;
pub use orchestrator::{WaitPolicy, cleanup_app_hook, run_app_hook, wait_with_reconnect};
pub use traits::*;
