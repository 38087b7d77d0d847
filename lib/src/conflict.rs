// Copyright 2023 The Subvert Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Tree conflict descriptors and their serialized form.
//!
//! Tree conflicts are keyed on the parent directory: the parent's ACTUAL
//! row carries a skeleton-serialized map from victim basename to
//! descriptor in its `tree_conflict_data` column.

use std::collections::BTreeMap;

use crate::node::NodeKind;
use crate::skel::{Skel, SkelError};

/// The operation that was in progress when the conflict was raised.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConflictOperation {
    Update,
    Switch,
    Merge,
}

impl ConflictOperation {
    fn token(self) -> &'static str {
        match self {
            ConflictOperation::Update => "update",
            ConflictOperation::Switch => "switch",
            ConflictOperation::Merge => "merge",
        }
    }

    fn from_token(token: &str) -> Option<ConflictOperation> {
        match token {
            "update" => Some(ConflictOperation::Update),
            "switch" => Some(ConflictOperation::Switch),
            "merge" => Some(ConflictOperation::Merge),
            _ => None,
        }
    }
}

/// What the incoming change tried to do to the victim.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConflictAction {
    Edited,
    Added,
    Deleted,
    Replaced,
}

impl ConflictAction {
    fn token(self) -> &'static str {
        match self {
            ConflictAction::Edited => "edited",
            ConflictAction::Added => "added",
            ConflictAction::Deleted => "deleted",
            ConflictAction::Replaced => "replaced",
        }
    }

    fn from_token(token: &str) -> Option<ConflictAction> {
        match token {
            "edited" => Some(ConflictAction::Edited),
            "added" => Some(ConflictAction::Added),
            "deleted" => Some(ConflictAction::Deleted),
            "replaced" => Some(ConflictAction::Replaced),
            _ => None,
        }
    }
}

/// Why the local side could not accept the incoming change.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConflictReason {
    Edited,
    Obstructed,
    Deleted,
    Missing,
    Unversioned,
    Added,
}

impl ConflictReason {
    fn token(self) -> &'static str {
        match self {
            ConflictReason::Edited => "edited",
            ConflictReason::Obstructed => "obstructed",
            ConflictReason::Deleted => "deleted",
            ConflictReason::Missing => "missing",
            ConflictReason::Unversioned => "unversioned",
            ConflictReason::Added => "added",
        }
    }

    fn from_token(token: &str) -> Option<ConflictReason> {
        match token {
            "edited" => Some(ConflictReason::Edited),
            "obstructed" => Some(ConflictReason::Obstructed),
            "deleted" => Some(ConflictReason::Deleted),
            "missing" => Some(ConflictReason::Missing),
            "unversioned" => Some(ConflictReason::Unversioned),
            "added" => Some(ConflictReason::Added),
            _ => None,
        }
    }
}

/// One side of the merge/update that raised the conflict.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConflictVersion {
    pub repos_root_url: String,
    pub peg_revision: i64,
    pub repos_relpath: String,
    pub node_kind: NodeKind,
}

/// A structural conflict on one victim, as stored on the victim's parent
/// directory.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TreeConflict {
    pub victim_basename: String,
    pub node_kind: NodeKind,
    pub operation: ConflictOperation,
    pub action: ConflictAction,
    pub reason: ConflictReason,
    pub src_left_version: Option<ConflictVersion>,
    pub src_right_version: Option<ConflictVersion>,
}

fn version_to_skel(version: &Option<ConflictVersion>) -> Skel {
    match version {
        None => Skel::list(vec![]),
        Some(v) => Skel::list(vec![
            Skel::atom(&b"version"[..]),
            Skel::atom(v.repos_root_url.as_bytes()),
            Skel::atom(v.peg_revision.to_string().as_bytes()),
            Skel::atom(v.repos_relpath.as_bytes()),
            Skel::atom(v.node_kind.token().as_bytes()),
        ]),
    }
}

fn version_from_skel(skel: &Skel) -> Result<Option<ConflictVersion>, SkelError> {
    let items = skel.as_list()?;
    if items.is_empty() {
        return Ok(None);
    }
    if items.len() != 5 || items[0].as_str()? != "version" {
        return Err(SkelError::Malformed(0));
    }
    let peg_revision = items[2]
        .as_str()?
        .parse()
        .map_err(|_| SkelError::Malformed(0))?;
    let node_kind = NodeKind::from_token(items[4].as_str()?)
        .ok_or(SkelError::Malformed(0))?;
    Ok(Some(ConflictVersion {
        repos_root_url: items[1].as_str()?.to_owned(),
        peg_revision,
        repos_relpath: items[3].as_str()?.to_owned(),
        node_kind,
    }))
}

fn conflict_to_skel(conflict: &TreeConflict) -> Skel {
    Skel::list(vec![
        Skel::atom(&b"conflict"[..]),
        Skel::atom(conflict.victim_basename.as_bytes()),
        Skel::atom(conflict.node_kind.token().as_bytes()),
        Skel::atom(conflict.operation.token().as_bytes()),
        Skel::atom(conflict.action.token().as_bytes()),
        Skel::atom(conflict.reason.token().as_bytes()),
        version_to_skel(&conflict.src_left_version),
        version_to_skel(&conflict.src_right_version),
    ])
}

fn conflict_from_skel(skel: &Skel) -> Result<TreeConflict, SkelError> {
    let items = skel.as_list()?;
    if items.len() != 8 || items[0].as_str()? != "conflict" {
        return Err(SkelError::Malformed(0));
    }
    let node_kind = NodeKind::from_token(items[2].as_str()?)
        .ok_or(SkelError::Malformed(0))?;
    let operation = ConflictOperation::from_token(items[3].as_str()?)
        .ok_or(SkelError::Malformed(0))?;
    let action = ConflictAction::from_token(items[4].as_str()?)
        .ok_or(SkelError::Malformed(0))?;
    let reason = ConflictReason::from_token(items[5].as_str()?)
        .ok_or(SkelError::Malformed(0))?;
    Ok(TreeConflict {
        victim_basename: items[1].as_str()?.to_owned(),
        node_kind,
        operation,
        action,
        reason,
        src_left_version: version_from_skel(&items[6])?,
        src_right_version: version_from_skel(&items[7])?,
    })
}

/// Serializes a victim map. An empty map serializes to the empty string.
pub fn write_tree_conflicts(
    conflicts: &BTreeMap<String, TreeConflict>,
) -> String {
    if conflicts.is_empty() {
        return String::new();
    }
    let items = conflicts.values().map(conflict_to_skel).collect();
    // All atoms are token or path strings, so the serialization is UTF-8.
    String::from_utf8(Skel::List(items).unparse())
        .expect("tree conflict serialization produced non-UTF-8 data")
}

/// Parses the `tree_conflict_data` column. The empty string (and NULL,
/// handled by callers) means no conflicts.
pub fn read_tree_conflicts(
    data: &str,
) -> Result<BTreeMap<String, TreeConflict>, SkelError> {
    if data.is_empty() {
        return Ok(BTreeMap::new());
    }
    let skel = Skel::parse(data.as_bytes())?;
    let mut conflicts = BTreeMap::new();
    for item in skel.as_list()? {
        let conflict = conflict_from_skel(item)?;
        conflicts.insert(conflict.victim_basename.clone(), conflict);
    }
    Ok(conflicts)
}
