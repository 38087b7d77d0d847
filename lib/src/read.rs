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

//! The read path: joining BASE, WORKING and ACTUAL into effective node
//! state, and the two upward scans that reconstruct where an addition or
//! deletion operation was rooted.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use rusqlite::params;
use rusqlite::OptionalExtension;

use crate::base::{parse_checksum_column, select_props_column};
use crate::checksum::Checksum;
use crate::conflict::read_tree_conflicts;
use crate::locks::LockInfo;
use crate::node::{effective_status, Depth, NodeKind, Presence, Status};
use crate::relpath::{join_relpath, relpath_basename, RelPath};
use crate::sqlite::{self, Stmt};
use crate::wc_db::{
    actual_node_row, base_node_row, fetch_repos_info, scan_upwards_for_repos,
    working_node_row, DbError, DbResult, WcDb,
};

/// The combined state of one node, as computed from its BASE, WORKING and
/// ACTUAL rows by [`WcDb::read_info`].
#[derive(Debug)]
pub struct Info {
    pub status: Status,
    pub kind: NodeKind,
    pub revision: Option<i64>,
    /// `None` while WORKING is present; the caller scans upwards for the
    /// operation root to learn the eventual repository location.
    pub repos_relpath: Option<String>,
    pub repos_root_url: Option<String>,
    pub repos_uuid: Option<String>,
    pub changed_rev: Option<i64>,
    pub changed_date: Option<i64>,
    pub changed_author: Option<String>,
    pub last_mod_time: Option<i64>,
    pub depth: Depth,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub target: Option<String>,
    pub changelist: Option<String>,
    pub original_repos_relpath: Option<String>,
    pub original_root_url: Option<String>,
    pub original_uuid: Option<String>,
    pub original_revision: Option<i64>,
    /// A BASE row exists underneath the WORKING row.
    pub base_shadowed: bool,
    pub conflicted: bool,
    pub lock: Option<LockInfo>,
}

/// Where and how an added/copied/moved node entered the WORKING tree, per
/// [`WcDb::scan_addition`].
#[derive(Debug)]
pub struct AdditionInfo {
    /// `Added`, `Copied` or `MovedHere`.
    pub status: Status,
    /// The root of the add/copy/move operation.
    pub op_root_abspath: PathBuf,
    /// The repository location this node will have after commit.
    pub repos_relpath: String,
    pub repos_root_url: String,
    pub repos_uuid: String,
    pub original_repos_relpath: Option<String>,
    pub original_root_url: Option<String>,
    pub original_uuid: Option<String>,
    pub original_revision: Option<i64>,
}

/// The roots of the deletion that covers a node, per
/// [`WcDb::scan_deletion`].
#[derive(Debug, Default)]
pub struct DeletionInfo {
    /// Topmost ancestor whose BASE tree is deleted or replaced by this
    /// operation.
    pub base_del_abspath: Option<PathBuf>,
    /// The deleted BASE tree is shadowed by a replacement.
    pub base_replaced: bool,
    /// Where the topmost deleted node was moved to, if this deletion is
    /// one half of a move.
    pub moved_to_abspath: Option<PathBuf>,
    /// Root of the subtree deletion within the WORKING tree.
    pub work_del_abspath: Option<PathBuf>,
}

impl WcDb {
    /// Reads everything the engine knows about one path: the effective
    /// status from the layering rule, the column values with WORKING
    /// taking precedence over BASE, the changelist and conflict state from
    /// ACTUAL, and the repository lock if one is recorded.
    pub fn read_info(&self, local_abspath: &Path) -> DbResult<Info> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let mut info = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let wc_id = parsed.wcroot.wc_id();
            let base =
                base_node_row(&sdb.conn, wc_id, &parsed.relpath, true)?;
            let working =
                working_node_row(&sdb.conn, wc_id, &parsed.relpath)?;
            let actual =
                actual_node_row(&sdb.conn, wc_id, &parsed.relpath)?;

            if base.is_none() && working.is_none() {
                // A row in ACTUAL_NODE must never exist without a
                // corresponding BASE or WORKING node.
                return Err(if actual.is_some() {
                    DbError::Corrupt(format!(
                        "corrupt data for '{}'",
                        local_abspath.display()
                    ))
                } else {
                    DbError::PathNotFound(local_abspath.to_path_buf())
                });
            }

            // absent/excluded BASE rows do not take WORKING overrides.
            debug_assert!(
                working.is_none()
                    || base.as_ref().map_or(true, |b| !matches!(
                        b.presence,
                        Presence::Absent | Presence::Excluded
                    ))
            );

            let status = effective_status(
                base.as_ref().map(|b| (b.presence, b.kind)),
                working.as_ref().map(|w| (w.presence, w.kind)),
            );
            let node_kind = match &working {
                Some(w) => w.kind,
                None => base.as_ref().map(|b| b.kind).unwrap_or(NodeKind::Unknown),
            };
            let kind = if node_kind == NodeKind::Subdir {
                NodeKind::Dir
            } else {
                node_kind
            };

            let have_work = working.is_some();
            let (repos_root_url, repos_uuid) = match &base {
                // While WORKING is present the repository location depends
                // on an ancestor; the caller scans upwards for it.
                Some(b) if !have_work => match b.repos_id {
                    Some(repos_id) => {
                        let (root, uuid) =
                            fetch_repos_info(&sdb.conn, repos_id)?;
                        (Some(root), Some(uuid))
                    }
                    None => (None, None),
                },
                _ => (None, None),
            };

            let depth_word = match (&working, &base) {
                (Some(w), _) => w.depth.clone(),
                (None, Some(b)) => b.depth.clone(),
                (None, None) => None,
            };
            let depth = if kind == NodeKind::Dir {
                depth_word
                    .as_deref()
                    .map(Depth::from_word)
                    .unwrap_or(Depth::Unknown)
            } else {
                Depth::Unknown
            };

            let raw_checksum = match (&working, &base) {
                (Some(w), _) => w.checksum.clone(),
                (None, Some(b)) => b.checksum.clone(),
                (None, None) => None,
            };
            let checksum = if kind == NodeKind::File {
                parse_checksum_column(raw_checksum.as_deref(), local_abspath)?
            } else {
                None
            };

            let (original_root_url, original_uuid) = match working
                .as_ref()
                .and_then(|w| w.copyfrom_repos_id)
            {
                Some(copyfrom_repos_id) => {
                    let (root, uuid) =
                        fetch_repos_info(&sdb.conn, copyfrom_repos_id)?;
                    (Some(root), Some(uuid))
                }
                None => (None, None),
            };

            let conflicted = actual
                .as_ref()
                .is_some_and(|a| a.has_text_or_prop_conflict());

            Info {
                status,
                kind,
                revision: match &working {
                    Some(_) => None,
                    None => base.as_ref().and_then(|b| b.revision),
                },
                repos_relpath: match &working {
                    Some(_) => None,
                    None => base.as_ref().and_then(|b| b.repos_relpath.clone()),
                },
                repos_root_url,
                repos_uuid,
                changed_rev: match &working {
                    Some(w) => w.changed_rev,
                    None => base.as_ref().and_then(|b| b.changed_rev),
                },
                changed_date: match &working {
                    Some(w) => w.changed_date,
                    None => base.as_ref().and_then(|b| b.changed_date),
                },
                changed_author: match &working {
                    Some(w) => w.changed_author.clone(),
                    None => {
                        base.as_ref().and_then(|b| b.changed_author.clone())
                    }
                },
                last_mod_time: match &working {
                    Some(w) => w.last_mod_time,
                    None => base.as_ref().and_then(|b| b.last_mod_time),
                },
                depth,
                checksum,
                translated_size: match &working {
                    Some(w) => w.translated_size,
                    None => base.as_ref().and_then(|b| b.translated_size),
                },
                target: if kind == NodeKind::Symlink {
                    match &working {
                        Some(w) => w.target.clone(),
                        None => base.as_ref().and_then(|b| b.target.clone()),
                    }
                } else {
                    None
                },
                changelist: actual
                    .as_ref()
                    .and_then(|a| a.changelist.clone()),
                original_repos_relpath: working
                    .as_ref()
                    .and_then(|w| w.copyfrom_repos_path.clone()),
                original_root_url,
                original_uuid,
                original_revision: working
                    .as_ref()
                    .and_then(|w| w.copyfrom_revision),
                base_shadowed: base.is_some() && have_work,
                conflicted,
                lock: base.and_then(|b| b.lock),
            }
        };

        // Finally, check for a tree conflict recorded on the parent. This
        // reopens statements, so it runs after the database borrow above
        // is released.
        if !info.conflicted {
            info.conflicted =
                self.op_read_tree_conflict(local_abspath)?.is_some();
        }
        Ok(info)
    }

    /// The effective properties of a node: the ACTUAL override when one is
    /// recorded, otherwise the pristine properties.
    pub fn read_props(
        &self,
        local_abspath: &Path,
    ) -> DbResult<BTreeMap<String, String>> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            if let Some(Some(blob)) = select_props_column(
                &sdb.conn,
                Stmt::SelectActualProps,
                parsed.wcroot.wc_id(),
                &parsed.relpath,
            )? {
                return Ok(sqlite::props_from_blob(Some(&blob))?
                    .unwrap_or_default());
            }
        }
        self.read_pristine_props(local_abspath)
    }

    /// One effective property by name.
    pub fn read_prop(
        &self,
        local_abspath: &Path,
        propname: &str,
    ) -> DbResult<Option<String>> {
        let mut props = self.read_props(local_abspath)?;
        Ok(props.remove(propname))
    }

    /// The properties a node had before local modification: WORKING's if
    /// recorded (copied/moved nodes carry their source properties),
    /// otherwise BASE's.
    pub fn read_pristine_props(
        &self,
        local_abspath: &Path,
    ) -> DbResult<BTreeMap<String, String>> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let have_working = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            match select_props_column(
                &sdb.conn,
                Stmt::SelectWorkingProps,
                parsed.wcroot.wc_id(),
                &parsed.relpath,
            )? {
                Some(Some(blob)) => {
                    return Ok(sqlite::props_from_blob(Some(&blob))?
                        .unwrap_or_default());
                }
                Some(None) => true,
                None => false,
            }
        };
        match self.base_get_props(local_abspath) {
            Ok(props) => Ok(props),
            // A WORKING-only node has no pristine properties at all.
            Err(DbError::PathNotFound(_)) if have_working => {
                Ok(BTreeMap::new())
            }
            Err(err) => Err(err),
        }
    }

    /// The basenames of all children a directory has in BASE or WORKING.
    pub fn read_children(
        &self,
        local_abspath: &Path,
    ) -> DbResult<Vec<String>> {
        self.gather_children(local_abspath, false)
    }

    pub(crate) fn gather_children(
        &self,
        local_abspath: &Path,
        base_only: bool,
    ) -> DbResult<Vec<String>> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let cacheable = !base_only
            && self.handle_abspath(parsed.handle) == local_abspath;
        if cacheable {
            if let Some(children) = self.cached_children(parsed.handle) {
                return Ok(children);
            }
        }

        let children = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let stmt = if base_only {
                Stmt::SelectBaseNodeChildren
            } else {
                Stmt::SelectWorkingChildren
            };
            let mut stmt = sqlite::prepare(&sdb.conn, stmt)?;
            let rows = stmt.query_map(
                params![parsed.wcroot.wc_id(), parsed.relpath.as_str()],
                |row| row.get::<_, String>(0),
            )?;
            rows.map_ok(|child_relpath| {
                relpath_basename(&child_relpath).to_owned()
            })
            .collect::<Result<Vec<_>, _>>()?
        };

        if cacheable {
            self.cache_children(parsed.handle, children.clone());
        }
        Ok(children)
    }

    /// The node's kind, with `allow_missing` turning `path_not_found`
    /// into `Unknown`.
    pub fn read_kind(
        &self,
        local_abspath: &Path,
        allow_missing: bool,
    ) -> DbResult<NodeKind> {
        match self.read_info(local_abspath) {
            Ok(info) => Ok(info.kind),
            Err(DbError::PathNotFound(_)) if allow_missing => {
                Ok(NodeKind::Unknown)
            }
            Err(err) => Err(err),
        }
    }

    /// Whether the node is hidden from ordinary traversal: no WORKING
    /// layer, and a BASE presence that carries no content.
    pub fn node_hidden(&self, local_abspath: &Path) -> DbResult<bool> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let have_working = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            working_node_row(
                &sdb.conn,
                parsed.wcroot.wc_id(),
                &parsed.relpath,
            )?
            .is_some()
        };
        if have_working {
            return Ok(false);
        }
        let base = self.base_get_info(local_abspath)?;
        Ok(matches!(
            base.status,
            Status::Absent | Status::NotPresent | Status::Excluded
        ))
    }

    /// The basenames of all conflicted children of a directory: victims
    /// of text/property conflicts in ACTUAL rows, unioned with tree
    /// conflict victims recorded on the directory itself.
    pub fn read_conflict_victims(
        &self,
        local_abspath: &Path,
    ) -> DbResult<Vec<String>> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let wc_id = parsed.wcroot.wc_id();

        let mut found = BTreeSet::new();

        let mut stmt =
            sqlite::prepare(&sdb.conn, Stmt::SelectActualConflictVictims)?;
        let rows = stmt.query_map(
            params![wc_id, parsed.relpath.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        for child_relpath in rows {
            found.insert(relpath_basename(&child_relpath?).to_owned());
        }

        let tree_conflict_data = sqlite::prepare(
            &sdb.conn,
            Stmt::SelectActualTreeConflict,
        )?
        .query_row(params![wc_id, parsed.relpath.as_str()], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
        if let Some(data) = tree_conflict_data {
            let conflicts = read_tree_conflicts(&data)
                .map_err(|err| DbError::Corrupt(err.to_string()))?;
            found.extend(conflicts.into_keys());
        }

        Ok(found.into_iter().collect())
    }

    /// The repository location of a BASE node, resolving inherited
    /// repository information from the nearest recorded ancestor.
    pub fn scan_base_repos(
        &self,
        local_abspath: &Path,
    ) -> DbResult<(String, String, String)> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let (repos_id, repos_relpath) = scan_upwards_for_repos(
            &sdb.conn,
            parsed.wcroot.wc_id(),
            &parsed.relpath,
            local_abspath,
        )?;
        let (root_url, uuid) = fetch_repos_info(&sdb.conn, repos_id)?;
        Ok((repos_relpath, root_url, uuid))
    }

    /// Climbs the WORKING tree to find how a node got added: the
    /// operation root, whether it was a plain addition, a copy or a move
    /// destination, and the repository location the node will have. The
    /// starting node must be present (`normal`) in WORKING.
    pub fn scan_addition(
        &self,
        local_abspath: &Path,
    ) -> DbResult<AdditionInfo> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let wc_id = parsed.wcroot.wc_id();
        let sdb_cell = parsed.wcroot.sdb()?;

        let mut current = parsed.relpath.clone();
        let mut build_relpath = String::new();
        let mut child: Option<RelPath> = None;
        let mut op_root: Option<RelPath> = None;
        let mut status = Status::Added;
        let mut found_info = false;
        let mut original_repos_relpath = None;
        let mut original_root_url = None;
        let mut original_uuid = None;
        let mut original_revision = None;
        let mut past_root = false;

        loop {
            let row = if past_root {
                None
            } else {
                let sdb = sdb_cell.borrow();
                working_node_row(&sdb.conn, wc_id, &current)?
            };

            let Some(row) = row else {
                if child.is_none() {
                    return Err(DbError::PathNotFound(
                        local_abspath.to_path_buf(),
                    ));
                }
                // We fell off the top of the WORKING tree. If no copy or
                // move source was found on the way, the child we just left
                // is the root of a plain addition.
                if op_root.is_none() {
                    op_root = child.clone();
                }
                break;
            };

            if child.is_none() {
                // The starting node must exist normally.
                if row.presence != Presence::Normal {
                    return Err(DbError::PathUnexpectedStatus {
                        path: local_abspath.to_path_buf(),
                        expected: "added",
                    });
                }
            }

            // We want the operation closest to the start node; operations
            // on its ancestors are ignored once one is found.
            if !found_info && row.presence == Presence::Normal {
                if let Some(copyfrom_repos_id) = row.copyfrom_repos_id {
                    status = if row.moved_here {
                        Status::MovedHere
                    } else {
                        Status::Copied
                    };
                    op_root = Some(current.clone());
                    original_repos_relpath = row.copyfrom_repos_path.clone();
                    let (root, uuid) = {
                        let sdb = sdb_cell.borrow();
                        fetch_repos_info(&sdb.conn, copyfrom_repos_id)?
                    };
                    original_root_url = Some(root);
                    original_uuid = Some(uuid);
                    original_revision = row.copyfrom_revision;
                    found_info = true;
                }
            }

            // Track what we are stripping off as we climb; the repository
            // location of the start node is an ancestor's plus this
            // suffix.
            build_relpath =
                join_relpath(current.basename(), &build_relpath);

            child = Some(current.clone());
            match current.parent() {
                Some(parent) => current = parent,
                None => past_root = true,
            }
        }

        // CURRENT now names a BASE node; its repository location plus the
        // accumulated suffix is the start node's eventual location.
        let (repos_relpath, repos_root_url, repos_uuid) = {
            let sdb = sdb_cell.borrow();
            let (repos_id, base_relpath) = scan_upwards_for_repos(
                &sdb.conn,
                wc_id,
                &current,
                local_abspath,
            )?;
            let (root, uuid) = fetch_repos_info(&sdb.conn, repos_id)?;
            (join_relpath(&base_relpath, &build_relpath), root, uuid)
        };

        let op_root = op_root.expect("scan ended without an operation root");
        Ok(AdditionInfo {
            status,
            op_root_abspath: op_root.to_fs_path(parsed.wcroot.abspath()),
            repos_relpath,
            repos_root_url,
            repos_uuid,
            original_repos_relpath,
            original_root_url,
            original_uuid,
            original_revision,
        })
    }

    /// Climbs the WORKING tree from a deleted node to find the roots of
    /// the deletion: where the BASE tree was deleted or replaced, where
    /// the WORKING subtree deletion starts, and the move destination when
    /// the deletion is one half of a move. The starting node must be
    /// deleted (`not-present` or `base-deleted`) in WORKING.
    pub fn scan_deletion(
        &self,
        local_abspath: &Path,
    ) -> DbResult<DeletionInfo> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let wc_id = parsed.wcroot.wc_id();
        let sdb_cell = parsed.wcroot.sdb()?;
        let wcroot_abspath = parsed.wcroot.abspath().to_path_buf();

        let mut info = DeletionInfo::default();
        let mut current = parsed.relpath.clone();
        let mut child: Option<RelPath> = None;
        // Initialized to something that cannot denote an interesting
        // parent/child transition.
        let mut child_presence = Presence::BaseDeleted;
        let mut child_has_base = false;
        let mut found_moved_to = false;
        let mut past_root = false;

        loop {
            let row = if past_root {
                None
            } else {
                let sdb = sdb_cell.borrow();
                let result = sqlite::prepare(&sdb.conn, Stmt::SelectDeletionInfo)?
                    .query_row(params![wc_id, current.as_str()], |row| {
                        Ok((
                            row.get::<_, Option<String>>("base_presence")?,
                            sqlite::row_presence(row, "work_presence")?,
                            row.get::<_, Option<String>>("moved_to")?,
                        ))
                    })
                    .optional()?;
                result
            };

            let Some((base_presence, work_presence, moved_to)) = row else {
                // There had better be a row for the starting node.
                if child.is_none() {
                    return Err(DbError::PathNotFound(
                        local_abspath.to_path_buf(),
                    ));
                }
                // No row means no WORKING node: we fell off the top of the
                // WORKING tree. The child cannot be not-present, as that
                // would imply the root of the added subtree was deleted.
                debug_assert!(child_presence != Presence::NotPresent);

                // A child with a BASE row and no deeper root found yet is
                // the root of the deleted/replaced BASE tree.
                if child_has_base && info.base_del_abspath.is_none() {
                    if let Some(child) = &child {
                        info.base_del_abspath =
                            Some(child.to_fs_path(&wcroot_abspath));
                    }
                }
                break;
            };

            let base_presence = base_presence
                .as_deref()
                .map(|token| {
                    sqlite::presence_from_token(token).map_err(|_| {
                        DbError::Corrupt(format!(
                            "unexpected BASE presence on '{}'",
                            current.as_str()
                        ))
                    })
                })
                .transpose()?;

            if child.is_none()
                && work_presence != Presence::NotPresent
                && work_presence != Presence::BaseDeleted
            {
                return Err(DbError::PathUnexpectedStatus {
                    path: local_abspath.to_path_buf(),
                    expected: "deleted",
                });
            }
            debug_assert!(matches!(
                work_presence,
                Presence::Normal | Presence::NotPresent | Presence::BaseDeleted
            ));

            if let Some(base_presence) = base_presence {
                // A not-present BASE row is a bookkeeping tombstone, not a
                // real node that may have been deleted; it is ignored
                // here. A present BASE underneath a WORKING layer that is
                // not the delete-shadow itself means a replacement.
                debug_assert!(matches!(
                    base_presence,
                    Presence::Normal | Presence::NotPresent
                ));
                if base_presence == Presence::Normal
                    && work_presence != Presence::BaseDeleted
                {
                    info.base_replaced = true;
                }
            }

            // Only the nearest moved-to ancestor counts.
            if !found_moved_to {
                if let Some(moved_to) = moved_to {
                    debug_assert!(base_presence.is_some());
                    found_moved_to = true;
                    // This row is definitionally the base-delete root.
                    info.base_del_abspath =
                        Some(current.to_fs_path(&wcroot_abspath));
                    info.moved_to_abspath = Some(
                        RelPath::from_internal_string(&moved_to)
                            .to_fs_path(&wcroot_abspath),
                    );
                }
            }

            if work_presence == Presence::Normal
                && child_presence == Presence::NotPresent
            {
                // Parent is present but the child was deleted: the child
                // roots a deletion within the WORKING tree.
                if let Some(child) = &child {
                    info.work_del_abspath =
                        Some(child.to_fs_path(&wcroot_abspath));
                }
            }

            child = Some(current.clone());
            child_presence = work_presence;
            child_has_base = base_presence.is_some();
            match current.parent() {
                Some(parent) => current = parent,
                None => past_root = true,
            }
        }

        Ok(info)
    }
}
