// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for dependency resolution.

mod common;

use std::collections::HashSet;

use common::*;
use stevedore_core::{Dependencies, Error, Resolver};

fn package_names(deps: &Dependencies) -> Vec<String> {
    deps.packages.iter().map(|p| p.locator.to_string()).collect()
}

fn app_names(deps: &Dependencies) -> Vec<String> {
    deps.apps.iter().map(|a| a.package.to_string()).collect()
}

// ============================================================================
// Concrete scenarios
// ============================================================================

#[tokio::test]
async fn test_runtime_package_of_dependency_is_resolved() {
    let ctx = TestContext::new();
    ctx.add_package("gravitational.io/gravity:0.0.1", b"gravity").await;
    ctx.add_package("gravitational.io/planet:0.0.1", b"planet").await;
    ctx.add_app(
        AppSpec::new("gravitational.io/app-dep:0.0.1")
            .package("gravitational.io/gravity:0.0.1")
            .runtime("gravitational.io/planet:0.0.1"),
    )
    .await;
    let sample = ctx
        .add_app(AppSpec::new("gravitational.io/sample:0.0.1").app("gravitational.io/app-dep:0.0.1"))
        .await;

    let deps = Resolver::new(&ctx.src_services()).resolve(&sample).await.unwrap();

    assert_eq!(app_names(&deps), vec!["gravitational.io/app-dep:0.0.1"]);
    assert_eq!(
        package_names(&deps),
        vec!["gravitational.io/gravity:0.0.1", "gravitational.io/planet:0.0.1"]
    );
}

#[tokio::test]
async fn test_runtime_package_override() {
    let ctx = TestContext::new();
    ctx.add_package("example.com/planet:1.0.0", b"r1").await;
    ctx.add_package("example.com/planet:2.0.0", b"r2").await;
    ctx.add_app(AppSpec::new("example.com/b:1.0.0").runtime("example.com/planet:1.0.0"))
        .await;
    ctx.add_app(
        AppSpec::new("example.com/a:1.0.0")
            .app("example.com/b:1.0.0")
            .runtime("example.com/planet:2.0.0"),
    )
    .await;

    let deps = Resolver::new(&ctx.src_services())
        .resolve_locator(&loc("example.com/a:1.0.0"))
        .await
        .unwrap();

    assert!(deps.has_package(&loc("example.com/planet:2.0.0")));
    assert!(!deps.has_package(&loc("example.com/planet:1.0.0")));
    assert_eq!(
        deps.packages.last().map(|p| p.locator.clone()),
        Some(loc("example.com/planet:2.0.0"))
    );
}

// ============================================================================
// Properties
// ============================================================================

/// A layered graph with shared leaves, a base chain and a diamond.
async fn layered_graph(ctx: &TestContext) {
    for i in 0..4 {
        ctx.add_package(&format!("example.com/pkg-{}:1.0.0", i), b"p").await;
    }
    ctx.add_package("example.com/runtime:1.0.0", b"r").await;

    ctx.add_app(AppSpec::new("example.com/leaf:1.0.0").package("example.com/pkg-0:1.0.0"))
        .await;
    ctx.add_app(
        AppSpec::new("example.com/base:1.0.0")
            .package("example.com/pkg-1:1.0.0")
            .app("example.com/leaf:1.0.0")
            .runtime("example.com/runtime:1.0.0"),
    )
    .await;
    ctx.add_app(
        AppSpec::new("example.com/mid-a:1.0.0")
            .package("example.com/pkg-2:1.0.0")
            .package("example.com/pkg-0:1.0.0")
            .app("example.com/leaf:1.0.0"),
    )
    .await;
    ctx.add_app(
        AppSpec::new("example.com/mid-b:1.0.0")
            .package("example.com/pkg-3:1.0.0")
            .base("example.com/base:1.0.0")
            .app("example.com/mid-a:1.0.0"),
    )
    .await;
    ctx.add_app(
        AppSpec::new("example.com/top:1.0.0")
            .base("example.com/base:1.0.0")
            .app("example.com/mid-b:1.0.0")
            .app("example.com/mid-a:1.0.0"),
    )
    .await;
}

#[tokio::test]
async fn test_no_duplicates() {
    let ctx = TestContext::new();
    layered_graph(&ctx).await;

    let deps = Resolver::new(&ctx.src_services())
        .resolve_locator(&loc("example.com/top:1.0.0"))
        .await
        .unwrap();

    let packages = package_names(&deps);
    let unique: HashSet<_> = packages.iter().collect();
    assert_eq!(unique.len(), packages.len(), "duplicate packages: {:?}", packages);

    let apps = app_names(&deps);
    let unique: HashSet<_> = apps.iter().collect();
    assert_eq!(unique.len(), apps.len(), "duplicate apps: {:?}", apps);
    assert_eq!(apps.len(), 4);
    assert_eq!(packages.len(), 5);
}

#[tokio::test]
async fn test_dependencies_precede_dependents() {
    let ctx = TestContext::new();
    layered_graph(&ctx).await;

    let deps = Resolver::new(&ctx.src_services())
        .resolve_locator(&loc("example.com/top:1.0.0"))
        .await
        .unwrap();

    let position = |name: &str| {
        deps.apps
            .iter()
            .position(|a| a.package == loc(name))
            .unwrap_or_else(|| panic!("{} missing", name))
    };
    for app in &deps.apps {
        for dep in app.manifest.app_dependencies() {
            assert!(
                position(&dep.to_string()) < position(&app.package.to_string()),
                "{} must precede {}",
                dep,
                app.package
            );
        }
    }
    assert_eq!(position("example.com/leaf:1.0.0"), 0);
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let ctx = TestContext::new();
    layered_graph(&ctx).await;
    let resolver = Resolver::new(&ctx.src_services());

    let first = resolver.resolve_locator(&loc("example.com/top:1.0.0")).await.unwrap();
    for _ in 0..5 {
        let next = resolver.resolve_locator(&loc("example.com/top:1.0.0")).await.unwrap();
        let a: HashSet<_> = first.locators().into_iter().collect();
        let b: HashSet<_> = next.locators().into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(
            first.runtime_package().map(|p| p.locator.clone()),
            next.runtime_package().map(|p| p.locator.clone())
        );
    }
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_missing_package_aborts_resolution() {
    let ctx = TestContext::new();
    ctx.add_app(AppSpec::new("example.com/top:1.0.0").package("example.com/absent:1.0.0"))
        .await;

    let err = Resolver::new(&ctx.src_services())
        .resolve_locator(&loc("example.com/top:1.0.0"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("example.com/absent:1.0.0"));
}

#[tokio::test]
async fn test_cycle_through_base_is_rejected() {
    let ctx = TestContext::new();
    ctx.add_app(AppSpec::new("example.com/a:1.0.0").base("example.com/b:1.0.0"))
        .await;
    ctx.add_app(AppSpec::new("example.com/b:1.0.0").app("example.com/a:1.0.0"))
        .await;

    let err = Resolver::new(&ctx.src_services())
        .resolve_locator(&loc("example.com/a:1.0.0"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DependencyCycle(ref l) if *l == loc("example.com/a:1.0.0")));
}
