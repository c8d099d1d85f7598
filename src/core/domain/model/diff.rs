//! Classifies the difference between a desired and a recorded
//! specification into a change plan.

use crate::core::domain::{
    model::container::{ContainerSpec, render_option_map},
    value_object::{DiskSpec, NetSpec},
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// How a changed field can be applied.
///
/// The order matters: a plan's severity is the maximum kind across its
/// changes, and anything reaching `ForcesReplace` turns the whole update
/// into a destroy-and-recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Values are semantically equal.
    Unchanged,
    /// The API can apply this to the existing container.
    UpdateInPlace,
    /// The container must be destroyed and recreated.
    ForcesReplace,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unchanged => "unchanged",
            Self::UpdateInPlace => "update_in_place",
            Self::ForcesReplace => "forces_replace",
        };
        f.write_str(s)
    }
}

/// One field-level difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Field path (`"memory"`, `"disks.rootfs"`, `"networks.net0"`).
    pub field: String,
    pub kind: ChangeKind,
    /// Recorded value, rendered for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    /// Desired value, rendered for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

/// The ordered set of differences between desired and recorded state.
///
/// Only actual differences appear; a container that matches its
/// specification produces an empty plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangePlan {
    changes: Vec<FieldChange>,
}

impl ChangePlan {
    /// Returns the field-level changes in a deterministic order.
    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    /// Returns `true` when nothing differs.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the aggregate severity: the maximum kind across all
    /// changes, `Unchanged` for an empty plan.
    #[must_use]
    pub fn severity(&self) -> ChangeKind {
        self.changes
            .iter()
            .map(|c| c.kind)
            .max()
            .unwrap_or(ChangeKind::Unchanged)
    }

    /// Returns `true` when applying this plan means destroy-and-recreate.
    #[must_use]
    pub fn requires_replace(&self) -> bool {
        self.severity() == ChangeKind::ForcesReplace
    }

    /// Renders the plan as a JSON document for the orchestration engine.
    #[must_use]
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::json!({
            "severity": self.severity(),
            "requires_replace": self.requires_replace(),
            "changes": self.changes,
        })
    }

    fn push(&mut self, field: &str, kind: ChangeKind, old: Option<String>, new: Option<String>) {
        self.changes.push(FieldChange {
            field: field.to_string(),
            kind,
            old,
            new,
        });
    }
}

/// How a change to each scalar field applies. Disks and networks are
/// classified structurally in `plan`; `password` is write-only and
/// `start_on_create` only affects creation, so neither ever diffs.
const FIELD_POLICY: &[(&str, ChangeKind)] = &[
    ("node", ChangeKind::ForcesReplace),
    ("vm_id", ChangeKind::ForcesReplace),
    ("ostemplate", ChangeKind::ForcesReplace),
    ("unprivileged", ChangeKind::ForcesReplace),
    ("ssh_public_keys", ChangeKind::ForcesReplace),
    ("hostname", ChangeKind::UpdateInPlace),
    ("cores", ChangeKind::UpdateInPlace),
    ("memory", ChangeKind::UpdateInPlace),
    ("swap", ChangeKind::UpdateInPlace),
    ("features", ChangeKind::UpdateInPlace),
    ("onboot", ChangeKind::UpdateInPlace),
    ("startup", ChangeKind::UpdateInPlace),
];

fn classify(field: &str) -> ChangeKind {
    FIELD_POLICY
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, kind)| *kind)
        .unwrap_or(ChangeKind::ForcesReplace)
}

/// Computes the change plan between a desired specification and the
/// recorded one. Pure: no remote calls, no clock, no side effects.
pub fn plan(desired: &ContainerSpec, recorded: &ContainerSpec) -> ChangePlan {
    let mut plan = ChangePlan::default();

    compare_scalar(&mut plan, "node", &recorded.node, &desired.node);
    compare_scalar(&mut plan, "vm_id", &recorded.vm_id, &desired.vm_id);
    compare_option(&mut plan, "ostemplate", &recorded.ostemplate, &desired.ostemplate);
    compare_scalar(
        &mut plan,
        "unprivileged",
        &recorded.unprivileged,
        &desired.unprivileged,
    );
    compare_option(
        &mut plan,
        "ssh_public_keys",
        &recorded.ssh_public_keys,
        &desired.ssh_public_keys,
    );
    compare_option(&mut plan, "hostname", &recorded.hostname, &desired.hostname);
    compare_scalar(&mut plan, "cores", &recorded.cores, &desired.cores);
    compare_scalar(&mut plan, "memory", &recorded.memory, &desired.memory);
    compare_scalar(&mut plan, "swap", &recorded.swap, &desired.swap);

    if desired.features != recorded.features {
        plan.push(
            "features",
            classify("features"),
            (!recorded.features.is_empty()).then(|| render_option_map(&recorded.features)),
            (!desired.features.is_empty()).then(|| render_option_map(&desired.features)),
        );
    }
    compare_option(&mut plan, "onboot", &recorded.onboot, &desired.onboot);
    compare_option(&mut plan, "startup", &recorded.startup, &desired.startup);

    compare_disks(&mut plan, desired, recorded);
    compare_networks(&mut plan, desired, recorded);

    plan
}

fn compare_scalar<T: PartialEq + ToString>(
    plan: &mut ChangePlan,
    field: &str,
    recorded: &T,
    desired: &T,
) {
    if recorded != desired {
        plan.push(
            field,
            classify(field),
            Some(recorded.to_string()),
            Some(desired.to_string()),
        );
    }
}

fn compare_option<T: PartialEq + ToString>(
    plan: &mut ChangePlan,
    field: &str,
    recorded: &Option<T>,
    desired: &Option<T>,
) {
    if recorded != desired {
        plan.push(
            field,
            classify(field),
            recorded.as_ref().map(ToString::to_string),
            desired.as_ref().map(ToString::to_string),
        );
    }
}

/// Disk changes: adding or removing a mount and any shrink or storage
/// move forces a replace; growing a disk on its storage resizes in
/// place. Sizes compare numerically, so `"8"` and `"8.0"` are the same
/// disk.
fn compare_disks(plan: &mut ChangePlan, desired: &ContainerSpec, recorded: &ContainerSpec) {
    let mounts: BTreeSet<&String> = recorded.disks.keys().chain(desired.disks.keys()).collect();
    for mount in mounts {
        let field = format!("disks.{mount}");
        match (recorded.disks.get(mount), desired.disks.get(mount)) {
            (Some(old), None) => {
                plan.push(&field, ChangeKind::ForcesReplace, Some(old.clone()), None);
            }
            (None, Some(new)) => {
                plan.push(&field, ChangeKind::ForcesReplace, None, Some(new.clone()));
            }
            (Some(old), Some(new)) => {
                let kind = match (DiskSpec::parse(old), DiskSpec::parse(new)) {
                    (Ok(recorded_disk), Ok(desired_disk)) => {
                        if recorded_disk == desired_disk {
                            continue;
                        } else if recorded_disk.storage() != desired_disk.storage()
                            || desired_disk.size_bytes() < recorded_disk.size_bytes()
                        {
                            ChangeKind::ForcesReplace
                        } else {
                            ChangeKind::UpdateInPlace
                        }
                    }
                    // An unparseable recorded value cannot be resized
                    // with confidence.
                    _ if old == new => continue,
                    _ => ChangeKind::ForcesReplace,
                };
                plan.push(&field, kind, Some(old.clone()), Some(new.clone()));
            }
            (None, None) => {}
        }
    }
}

/// Network changes always apply in place: the API reconfigures, adds and
/// deletes interfaces on a running container. Option strings compare as
/// parsed maps, so option order never produces a change.
fn compare_networks(plan: &mut ChangePlan, desired: &ContainerSpec, recorded: &ContainerSpec) {
    let slots: BTreeSet<&String> = recorded
        .networks
        .keys()
        .chain(desired.networks.keys())
        .collect();
    for slot in slots {
        let field = format!("networks.{slot}");
        match (recorded.networks.get(slot), desired.networks.get(slot)) {
            (Some(old), None) => {
                plan.push(&field, ChangeKind::UpdateInPlace, Some(old.clone()), None);
            }
            (None, Some(new)) => {
                plan.push(&field, ChangeKind::UpdateInPlace, None, Some(new.clone()));
            }
            (Some(old), Some(new)) => {
                let equal = match (NetSpec::parse(old), NetSpec::parse(new)) {
                    (Ok(recorded_net), Ok(desired_net)) => recorded_net == desired_net,
                    _ => old == new,
                };
                if !equal {
                    plan.push(
                        &field,
                        ChangeKind::UpdateInPlace,
                        Some(old.clone()),
                        Some(new.clone()),
                    );
                }
            }
            (None, None) => {}
        }
    }
}
