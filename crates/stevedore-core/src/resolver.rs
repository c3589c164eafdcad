// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transitive dependency resolution.
//!
//! Walks an application's manifest and, recursively, the manifests of every
//! application it depends on, producing a deduplicated [`Dependencies`] set:
//!
//! - dependencies precede their dependents (post-order);
//! - the `base` application is visited before sibling dependencies;
//! - the top-level application is not part of the result;
//! - the runtime package is chosen by the application finished last, which is
//!   the top-level one, and is the last element of `packages`.
//!
//! Applications fetched during the walk live in an arena indexed by locator.
//! The walk keeps an on-stack set, so a dependency cycle (including an
//! application naming itself) is rejected with [`Error::DependencyCycle`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::manifest::{Extensions, Feature};
use crate::package::{Application, PackageEnvelope};
use crate::service::{AppService, PackageService, ServicePair};

/// Resolved dependencies of an application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    /// Required packages, runtime package last.
    pub packages: Vec<PackageEnvelope>,
    /// Required applications, dependencies before dependents.
    pub apps: Vec<Application>,
    runtime_package: Option<Locator>,
}

impl Dependencies {
    /// The resolved runtime package, if any application declared one.
    pub fn runtime_package(&self) -> Option<&PackageEnvelope> {
        let runtime = self.runtime_package.as_ref()?;
        self.packages.iter().rev().find(|p| &p.locator == runtime)
    }

    /// Locators of all packages followed by all applications.
    pub fn locators(&self) -> Vec<Locator> {
        self.packages
            .iter()
            .map(|p| p.locator.clone())
            .chain(self.apps.iter().map(|a| a.package.clone()))
            .collect()
    }

    /// Whether the package is part of the set.
    pub fn has_package(&self, locator: &Locator) -> bool {
        self.packages.iter().any(|p| &p.locator == locator)
    }

    /// Whether the application is part of the set.
    pub fn has_app(&self, locator: &Locator) -> bool {
        self.apps.iter().any(|a| &a.package == locator)
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.apps.is_empty()
    }
}

/// Applications that are only pulled in when a cluster feature is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalDependencies {
    entries: Vec<(String, Feature)>,
}

impl Default for OptionalDependencies {
    fn default() -> Self {
        Self::new()
            .with("logging-app", Feature::Logs)
            .with("monitoring-app", Feature::Monitoring)
            .with("tiller-app", Feature::Catalog)
            .with("ingress-app", Feature::Ingress)
    }
}

impl OptionalDependencies {
    /// An empty list: every declared dependency is required.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Tie the application `name` to `feature`.
    pub fn with(mut self, name: impl Into<String>, feature: Feature) -> Self {
        self.entries.push((name.into(), feature));
        self
    }

    /// Names of applications whose feature the extensions switch off.
    pub fn excluded(&self, extensions: &Extensions) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|(_, feature)| !extensions.is_enabled(*feature))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Computes [`Dependencies`] through the package and application services.
#[derive(Clone)]
pub struct Resolver {
    packages: Arc<dyn PackageService>,
    apps: Arc<dyn AppService>,
    optional: OptionalDependencies,
}

impl Resolver {
    /// Create a resolver reading from `services`, with no optional dependencies.
    pub fn new(services: &ServicePair) -> Self {
        Self {
            packages: services.packages.clone(),
            apps: services.apps.clone(),
            optional: OptionalDependencies::new(),
        }
    }

    /// Skip optional dependencies the top-level manifest switches off.
    pub fn with_optional_dependencies(mut self, optional: OptionalDependencies) -> Self {
        self.optional = optional;
        self
    }

    /// Fetch the application and resolve its dependencies.
    pub async fn resolve_locator(&self, locator: &Locator) -> Result<Dependencies> {
        let app = self
            .apps
            .get_app(locator)
            .await
            .map_err(|e| e.wrap(format!("failed to fetch application {}", locator)))?;
        self.resolve(&app).await
    }

    /// Resolve the dependencies of `app`.
    pub async fn resolve(&self, app: &Application) -> Result<Dependencies> {
        let excluded = self.optional.excluded(&app.manifest.extensions);
        let mut walk = Walk::new(app.clone(), excluded);
        walk.run(self.apps.as_ref()).await?;

        let mut deps = Dependencies::default();
        for locator in &walk.package_order {
            deps.packages.push(self.read_envelope(locator).await?);
        }

        if let Some(runtime) = walk.runtime.take() {
            if let Some(pos) = deps.packages.iter().position(|p| p.locator == runtime) {
                let envelope = deps.packages.remove(pos);
                deps.packages.push(envelope);
            } else {
                deps.packages.push(self.read_envelope(&runtime).await?);
            }
            deps.runtime_package = Some(runtime);
        }

        deps.apps = walk.into_apps();

        info!(
            app = %app.package,
            packages = deps.packages.len(),
            apps = deps.apps.len(),
            runtime = ?deps.runtime_package.as_ref().map(ToString::to_string),
            "Resolved dependencies"
        );
        Ok(deps)
    }

    async fn read_envelope(&self, locator: &Locator) -> Result<PackageEnvelope> {
        self.packages
            .read_package_envelope(locator)
            .await
            .map_err(|e| e.wrap(format!("failed to read package {}", locator)))
    }
}

struct Frame {
    app: usize,
    deps: Vec<Locator>,
    next: usize,
}

/// State of one depth-first walk.
struct Walk {
    arena: Vec<Application>,
    index: HashMap<Locator, usize>,
    visited_packages: HashSet<Locator>,
    visited_apps: HashSet<Locator>,
    on_stack: HashSet<Locator>,
    package_order: Vec<Locator>,
    app_order: Vec<usize>,
    runtime: Option<Locator>,
    excluded: HashSet<String>,
}

impl Walk {
    fn new(root: Application, excluded: HashSet<String>) -> Self {
        let mut index = HashMap::new();
        index.insert(root.package.clone(), 0);
        Self {
            arena: vec![root],
            index,
            visited_packages: HashSet::new(),
            visited_apps: HashSet::new(),
            on_stack: HashSet::new(),
            package_order: Vec::new(),
            app_order: Vec::new(),
            runtime: None,
            excluded,
        }
    }

    async fn run(&mut self, apps: &dyn AppService) -> Result<()> {
        let mut stack = vec![self.enter(0)];

        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.deps.len() {
                let dep = frame.deps[frame.next].clone();
                frame.next += 1;
                let parent = frame.app;

                if self.on_stack.contains(&dep) {
                    return Err(Error::DependencyCycle(dep));
                }
                if self.visited_apps.contains(&dep) {
                    continue;
                }

                let idx = match self.index.get(&dep) {
                    Some(idx) => *idx,
                    None => {
                        let app = apps.get_app(&dep).await.map_err(|e| {
                            e.wrap(format!(
                                "failed to fetch dependency {} of {}",
                                dep, self.arena[parent].package
                            ))
                        })?;
                        self.arena.push(app);
                        self.index.insert(dep, self.arena.len() - 1);
                        self.arena.len() - 1
                    }
                };
                let child = self.enter(idx);
                stack.push(child);
                continue;
            }

            let app = frame.app;
            stack.pop();
            self.leave(app);
        }
        Ok(())
    }

    fn enter(&mut self, idx: usize) -> Frame {
        let app = &self.arena[idx];
        let manifest = &app.manifest;
        self.on_stack.insert(app.package.clone());

        let packages = manifest
            .dependencies
            .packages()
            .iter()
            .cloned()
            .chain(manifest.node_profiles.runtime_packages());
        for package in packages {
            if self.visited_packages.insert(package.clone()) {
                self.package_order.push(package);
            }
        }

        let deps: Vec<Locator> = manifest
            .app_dependencies()
            .into_iter()
            .filter(|dep| {
                let skip = self.excluded.contains(&dep.name);
                if skip {
                    debug!(app = %app.package, dependency = %dep, "Skipping disabled optional dependency");
                }
                !skip
            })
            .collect();

        Frame {
            app: idx,
            deps,
            next: 0,
        }
    }

    fn leave(&mut self, idx: usize) {
        let app = &self.arena[idx];
        self.on_stack.remove(&app.package);
        if let Some(runtime) = app.manifest.default_runtime_package() {
            self.runtime = Some(runtime.clone());
        }
        if idx != 0 {
            self.visited_apps.insert(app.package.clone());
            self.app_order.push(idx);
        }
    }

    fn into_apps(self) -> Vec<Application> {
        let mut arena: Vec<Option<Application>> = self.arena.into_iter().map(Some).collect();
        self.app_order
            .into_iter()
            .filter_map(|idx| arena[idx].take())
            .collect()
    }
}
