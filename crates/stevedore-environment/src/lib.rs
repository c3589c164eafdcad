// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stevedore Environment - Application Hooks on Kubernetes
//!
//! This crate runs the lifecycle hooks declared in application manifests.
//! A hook is a Kubernetes Job; the crate renders it from the manifest,
//! launches it, follows its logs and waits for it to finish, resuming the
//! wait when the connection to the cluster drops.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 stevedore-hook (binary)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      run_app_hook                           │
//! │  ┌─────────────┐   ┌─────────────────┐   ┌──────────────┐   │
//! │  │   start     │──►│ wait (resumes   │   │ log stream   │   │
//! │  │             │   │ on lost conn.)  │   │ (child task) │   │
//! │  └─────────────┘   └─────────────────┘   └──────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ AppHooks
//!               ┌───────────────┴───────────────┐
//!               ▼                               ▼
//!    ┌─────────────────────┐         ┌─────────────────────┐
//!    │ KubeHooks           │         │ MockHooks           │
//!    │ (batch/v1 Jobs,     │         │ (in-memory, tests)  │
//!    │  pod diff logging)  │         │                     │
//!    └─────────────────────┘         └─────────────────────┘
//! ```
//!
//! # Hook Lifecycle
//!
//! | State | Entered when |
//! |-------|--------------|
//! | Starting | `start_app_hook` creates the Job |
//! | Running | The Job exists; logs stream concurrently |
//! | Succeeded | The Job reports a `Complete` condition |
//! | Failed | The Job reports a `Failed` condition |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the environment variables read by
//! the binary.

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Lifecycle hook execution.
pub mod hooks;

/// Pod snapshot comparison.
pub mod pod_diff;

pub use config::Config;
pub use hooks::{AppHooks, HookError, HookRef, HookRequest, run_app_hook};
