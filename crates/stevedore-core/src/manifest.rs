// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application manifest.
//!
//! The manifest is the read-only description of an application: what it depends
//! on, which runtime package its nodes boot from, and which lifecycle hooks it
//! ships. Manifests are stored as JSON next to the application package.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::locator::Locator;

/// Kind of application described by a manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestKind {
    /// A regular application installed on an existing cluster.
    #[default]
    Application,
    /// A cluster image bundling the runtime and system applications.
    Bundle,
    /// A cluster image installed in-place on existing nodes.
    Cluster,
    /// A runtime application providing the base cluster services.
    Runtime,
}

/// Name and version of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Repository the application is published to.
    pub repository: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub resource_version: semver::Version,
}

/// Direct dependencies declared by a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDependencies {
    /// Packages required by the application.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Locator>,
    /// Applications required by the application.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<Locator>,
}

impl ManifestDependencies {
    /// Direct package dependencies.
    pub fn packages(&self) -> &[Locator] {
        &self.packages
    }

    /// Direct application dependencies.
    pub fn apps(&self) -> &[Locator] {
        &self.apps
    }
}

/// A class of cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProfile {
    /// Profile name, e.g. `master` or `worker`.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Runtime package nodes of this profile boot from, if it differs from the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_package: Option<Locator>,
}

/// The node profiles of a cluster image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeProfiles(pub Vec<NodeProfile>);

impl NodeProfiles {
    /// Runtime packages explicitly requested by profiles, without duplicates.
    pub fn runtime_packages(&self) -> Vec<Locator> {
        let mut packages: Vec<Locator> = Vec::new();
        for profile in &self.0 {
            if let Some(runtime) = &profile.runtime_package
                && !packages.contains(runtime)
            {
                packages.push(runtime.clone());
            }
        }
        packages
    }

    /// Whether no profiles are declared.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cluster-wide system settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemOptions {
    /// The runtime package nodes boot from unless a profile overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_package: Option<Locator>,
}

/// Lifecycle events an application can attach a hook to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    /// Application installation.
    Install,
    /// After installation completed.
    PostInstall,
    /// Application removal.
    Uninstall,
    /// Application update.
    Update,
    /// After update completed.
    PostUpdate,
    /// Update rollback.
    Rollback,
    /// After rollback completed.
    PostRollback,
    /// Health status check.
    Status,
    /// Application information dump.
    Info,
    /// Before a node is added.
    NodeAdding,
    /// After a node was added.
    NodeAdded,
    /// Before a node is removed.
    NodeRemoving,
    /// After a node was removed.
    NodeRemoved,
    /// Overlay network installation.
    NetworkInstall,
    /// Overlay network update.
    NetworkUpdate,
    /// Overlay network rollback.
    NetworkRollback,
    /// Cluster infrastructure provisioning.
    ClusterProvision,
    /// Cluster infrastructure teardown.
    ClusterDeprovision,
    /// Node infrastructure provisioning.
    NodesProvision,
    /// Node infrastructure teardown.
    NodesDeprovision,
    /// Before the application is started.
    BeforeStart,
    /// Application start.
    Start,
    /// Application stop.
    Stop,
    /// Debug report collection.
    Dump,
    /// Data backup.
    Backup,
    /// Data restore.
    Restore,
}

impl HookType {
    /// Every hook type, in declaration order.
    pub const ALL: [HookType; 26] = [
        HookType::Install,
        HookType::PostInstall,
        HookType::Uninstall,
        HookType::Update,
        HookType::PostUpdate,
        HookType::Rollback,
        HookType::PostRollback,
        HookType::Status,
        HookType::Info,
        HookType::NodeAdding,
        HookType::NodeAdded,
        HookType::NodeRemoving,
        HookType::NodeRemoved,
        HookType::NetworkInstall,
        HookType::NetworkUpdate,
        HookType::NetworkRollback,
        HookType::ClusterProvision,
        HookType::ClusterDeprovision,
        HookType::NodesProvision,
        HookType::NodesDeprovision,
        HookType::BeforeStart,
        HookType::Start,
        HookType::Stop,
        HookType::Dump,
        HookType::Backup,
        HookType::Restore,
    ];

    /// The snake_case name used in manifests and job labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::Install => "install",
            HookType::PostInstall => "post_install",
            HookType::Uninstall => "uninstall",
            HookType::Update => "update",
            HookType::PostUpdate => "post_update",
            HookType::Rollback => "rollback",
            HookType::PostRollback => "post_rollback",
            HookType::Status => "status",
            HookType::Info => "info",
            HookType::NodeAdding => "node_adding",
            HookType::NodeAdded => "node_added",
            HookType::NodeRemoving => "node_removing",
            HookType::NodeRemoved => "node_removed",
            HookType::NetworkInstall => "network_install",
            HookType::NetworkUpdate => "network_update",
            HookType::NetworkRollback => "network_rollback",
            HookType::ClusterProvision => "cluster_provision",
            HookType::ClusterDeprovision => "cluster_deprovision",
            HookType::NodesProvision => "nodes_provision",
            HookType::NodesDeprovision => "nodes_deprovision",
            HookType::BeforeStart => "before_start",
            HookType::Start => "start",
            HookType::Stop => "stop",
            HookType::Dump => "dump",
            HookType::Backup => "backup",
            HookType::Restore => "restore",
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::BadParameter("missing hook type".to_string()));
        }
        HookType::ALL
            .iter()
            .find(|h| h.as_str() == s)
            .copied()
            .ok_or_else(|| Error::BadParameter(format!("unknown hook type {:?}", s)))
    }
}

/// A lifecycle hook: a Kubernetes Job specification run when the event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// The `batch/v1` Job resource, kept as raw JSON.
    pub job: serde_json::Value,
}

/// Optional cluster features an application may switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Log forwarding.
    Logs,
    /// Metrics collection.
    Monitoring,
    /// Application catalog.
    Catalog,
    /// Ingress controller.
    Ingress,
}

/// An on/off switch for a [`Feature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    /// Whether the feature is enabled.
    pub enabled: bool,
}

/// Feature switches of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extensions {
    /// Log forwarding, on by default.
    pub logs: Toggle,
    /// Monitoring, on by default.
    pub monitoring: Toggle,
    /// Application catalog, on by default.
    pub catalog: Toggle,
    /// Ingress, off unless requested.
    pub ingress: Toggle,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            logs: Toggle { enabled: true },
            monitoring: Toggle { enabled: true },
            catalog: Toggle { enabled: true },
            ingress: Toggle { enabled: false },
        }
    }
}

impl Extensions {
    /// Whether the given feature is enabled.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Logs => self.logs.enabled,
            Feature::Monitoring => self.monitoring.enabled,
            Feature::Catalog => self.catalog.enabled,
            Feature::Ingress => self.ingress.enabled,
        }
    }
}

/// Application manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Kind of application.
    #[serde(default)]
    pub kind: ManifestKind,
    /// Name and version.
    pub metadata: Metadata,
    /// Application this one inherits from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Locator>,
    /// Direct dependencies.
    #[serde(default)]
    pub dependencies: ManifestDependencies,
    /// Node profiles.
    #[serde(default, skip_serializing_if = "NodeProfiles::is_empty")]
    pub node_profiles: NodeProfiles,
    /// System options.
    #[serde(default)]
    pub system_options: SystemOptions,
    /// Lifecycle hooks keyed by event.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<HookType, Hook>,
    /// Feature switches.
    #[serde(default)]
    pub extensions: Extensions,
}

impl Manifest {
    /// Create an empty manifest for the given locator.
    pub fn new(locator: &Locator) -> Self {
        Self {
            kind: ManifestKind::default(),
            metadata: Metadata {
                repository: locator.repository.clone(),
                name: locator.name.clone(),
                resource_version: locator.version.clone(),
            },
            base: None,
            dependencies: ManifestDependencies::default(),
            node_profiles: NodeProfiles::default(),
            system_options: SystemOptions::default(),
            hooks: BTreeMap::new(),
            extensions: Extensions::default(),
        }
    }

    /// Parse a manifest from its JSON encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the manifest as JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// The locator of the application this manifest describes.
    pub fn locator(&self) -> Locator {
        Locator {
            repository: self.metadata.repository.clone(),
            name: self.metadata.name.clone(),
            version: self.metadata.resource_version.clone(),
        }
    }

    /// The application this one inherits from.
    pub fn base(&self) -> Option<&Locator> {
        self.base.as_ref()
    }

    /// The runtime package declared for the whole cluster.
    pub fn default_runtime_package(&self) -> Option<&Locator> {
        self.system_options.runtime_package.as_ref()
    }

    /// The hook registered for the given event.
    pub fn hook(&self, hook: HookType) -> Option<&Hook> {
        self.hooks.get(&hook)
    }

    /// Direct application dependencies with the base application first.
    pub fn app_dependencies(&self) -> Vec<Locator> {
        let mut apps = Vec::with_capacity(self.dependencies.apps.len() + 1);
        if let Some(base) = &self.base {
            apps.push(base.clone());
        }
        for app in &self.dependencies.apps {
            if !apps.contains(app) {
                apps.push(app.clone());
            }
        }
        apps
    }
}
