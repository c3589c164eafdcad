// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for stevedore-environment tests.
//!
//! Provides an application store with hooks declared and a log sink that can
//! be inspected after `run_app_hook` returns.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use serde_json::json;
use stevedore_core::manifest::Hook;
use stevedore_core::memory::MemoryBackend;
use stevedore_core::package::Labels;
use stevedore_core::{HookType, Locator, Manifest};
use tokio::io::AsyncWrite;

/// Locator of the test application.
pub fn app() -> Locator {
    "example.com/sample:0.0.1".parse().unwrap()
}

/// A hook job running a single container.
pub fn hook_job() -> Hook {
    Hook {
        job: json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "spec": {
                        "containers": [{
                            "name": "hook",
                            "image": "quay.io/example/hook:1.0",
                            "command": ["/bin/sh", "-c", "echo done"]
                        }]
                    }
                }
            }
        }),
    }
}

/// A store holding the test application with the given hooks declared.
pub async fn backend_with_hooks(hooks: &[HookType]) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    let mut manifest = Manifest::new(&app());
    for hook in hooks {
        manifest.hooks.insert(*hook, hook_job());
    }
    backend
        .insert_app(&manifest, b"bundle".to_vec(), Labels::new())
        .await
        .unwrap();
    backend
}

/// In-memory log sink shared with the test.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.data.lock().unwrap()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
