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

//! Mutations of the ACTUAL layer: property overrides, changelists,
//! conflict markers and their resolution. The `op_` entry points that
//! manipulate the WORKING layer (`op_copy`, `op_delete`, …) are reserved
//! in this engine revision and fail fast.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::params;
use rusqlite::OptionalExtension;

use crate::conflict::{read_tree_conflicts, write_tree_conflicts, TreeConflict};
use crate::sqlite::{self, Stmt};
use crate::wc_db::{DbError, DbResult, WcDb};

impl WcDb {
    /// Sets (or clears, with `None`) the ACTUAL property override of a
    /// node. Clearing leaves the ACTUAL row in place with a NULL column; a
    /// later sweep may reclaim rows that carry nothing else.
    pub fn op_set_props(
        &self,
        local_abspath: &Path,
        props: Option<&BTreeMap<String, String>>,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let mut sdb = parsed.wcroot.sdb()?.borrow_mut();
        let wc_id = parsed.wcroot.wc_id();
        let blob = sqlite::props_to_blob(props);
        sdb.with_transaction(|tx| {
            let affected = sqlite::prepare(tx, Stmt::UpdateActualProps)?
                .execute(params![
                    wc_id,
                    parsed.relpath.as_str(),
                    blob.as_deref(),
                ])?;
            if affected == 1 {
                return Ok(());
            }
            // No ACTUAL row yet; insert one carrying only the properties.
            let parent_relpath = parsed
                .relpath
                .parent()
                .map(|parent| parent.as_str().to_owned());
            sqlite::prepare(tx, Stmt::InsertActualProps)?.execute(params![
                wc_id,
                parsed.relpath.as_str(),
                parent_relpath,
                blob.as_deref(),
            ])?;
            Ok(())
        })
    }

    /// Assigns the node to a changelist, or removes it from its
    /// changelist with `None`. Removing a node that is in no changelist
    /// is a no-op.
    pub fn op_set_changelist(
        &self,
        local_abspath: &Path,
        changelist: Option<&str>,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let mut sdb = parsed.wcroot.sdb()?.borrow_mut();
            let wc_id = parsed.wcroot.wc_id();
            sdb.with_transaction(|tx| {
                let existing: Option<Option<String>> =
                    sqlite::prepare(tx, Stmt::SelectActualNode)?
                        .query_row(
                            params![wc_id, parsed.relpath.as_str()],
                            |row| row.get("changelist"),
                        )
                        .optional()?;

                match existing {
                    None => {
                        // Only insert an ACTUAL row if we are not trying
                        // to remove a nonexistent changelist.
                        if changelist.is_none() {
                            return Ok(());
                        }
                        let parent_relpath = parsed
                            .relpath
                            .parent()
                            .map(|parent| parent.as_str().to_owned());
                        sqlite::prepare(tx, Stmt::InsertActualChangelist)?
                            .execute(params![
                                wc_id,
                                parsed.relpath.as_str(),
                                changelist,
                                parent_relpath,
                            ])?;
                    }
                    Some(existing) => {
                        if existing.as_deref() == changelist {
                            return Ok(());
                        }
                        sqlite::prepare(tx, Stmt::UpdateActualChangelist)?
                            .execute(params![
                                wc_id,
                                parsed.relpath.as_str(),
                                changelist,
                            ])?;
                    }
                }
                Ok(())
            })?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Clears conflict markers on a node. Text and property conflicts are
    /// cleared by two separate statements; a crash in between leaves a
    /// valid, partially-resolved state and a rerun converges. Tree
    /// conflict resolution is reserved in this engine revision.
    pub fn op_mark_resolved(
        &self,
        local_abspath: &Path,
        resolved_text: bool,
        resolved_props: bool,
        resolved_tree: bool,
    ) -> DbResult<()> {
        if resolved_tree {
            return Err(DbError::NotImplemented(
                "op_mark_resolved(resolved_tree)",
            ));
        }
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            let wc_id = parsed.wcroot.wc_id();
            if resolved_text {
                sqlite::prepare(&sdb.conn, Stmt::ClearTextConflict)?
                    .execute(params![wc_id, parsed.relpath.as_str()])?;
            }
            if resolved_props {
                sqlite::prepare(&sdb.conn, Stmt::ClearPropsConflict)?
                    .execute(params![wc_id, parsed.relpath.as_str()])?;
            }
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Records, replaces or removes (`None`) the tree conflict on a node.
    /// The conflict is stored in the serialized victim map on the
    /// *parent* directory's ACTUAL row.
    pub fn op_set_tree_conflict(
        &self,
        local_abspath: &Path,
        tree_conflict: Option<&TreeConflict>,
    ) -> DbResult<()> {
        let parent_abspath = local_abspath.parent().ok_or_else(|| {
            DbError::NotWorkingCopy(local_abspath.to_path_buf())
        })?;
        let victim_basename = local_abspath
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let parsed = self.parse_local_abspath(parent_abspath)?;
        {
            let mut sdb = parsed.wcroot.sdb()?.borrow_mut();
            let wc_id = parsed.wcroot.wc_id();
            sdb.with_transaction(|tx| {
                let existing: Option<Option<String>> =
                    sqlite::prepare(tx, Stmt::SelectActualNode)?
                        .query_row(
                            params![wc_id, parsed.relpath.as_str()],
                            |row| row.get("tree_conflict_data"),
                        )
                        .optional()?;
                let have_row = existing.is_some();

                let mut conflicts = match existing.flatten() {
                    Some(data) => read_tree_conflicts(&data)
                        .map_err(|err| DbError::Corrupt(err.to_string()))?,
                    None => BTreeMap::new(),
                };

                match tree_conflict {
                    Some(conflict) => {
                        conflicts.insert(
                            victim_basename.clone(),
                            conflict.clone(),
                        );
                    }
                    None => {
                        conflicts.remove(&victim_basename);
                    }
                }

                if conflicts.is_empty() && !have_row {
                    // Removing conflict information that does not even
                    // exist; nothing to rewrite.
                    return Ok(());
                }

                let data = write_tree_conflicts(&conflicts);
                if have_row {
                    sqlite::prepare(tx, Stmt::UpdateActualTreeConflicts)?
                        .execute(params![
                            wc_id,
                            parsed.relpath.as_str(),
                            data,
                        ])?;
                } else {
                    let parent_relpath = parsed
                        .relpath
                        .parent()
                        .map(|parent| parent.as_str().to_owned());
                    sqlite::prepare(tx, Stmt::InsertActualTreeConflicts)?
                        .execute(params![
                            wc_id,
                            parsed.relpath.as_str(),
                            data,
                            parent_relpath,
                        ])?;
                }
                Ok(())
            })?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Reads the tree conflict recorded for a node on its parent
    /// directory. Asking about the working copy root (or any path whose
    /// parent is outside every working copy) yields `None`.
    pub fn op_read_tree_conflict(
        &self,
        local_abspath: &Path,
    ) -> DbResult<Option<TreeConflict>> {
        let Some(parent_abspath) = local_abspath.parent() else {
            return Ok(None);
        };
        let parsed = match self.parse_local_abspath(parent_abspath) {
            Ok(parsed) => parsed,
            // We walked off the top of a working copy.
            Err(DbError::NotWorkingCopy(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let sdb = parsed.wcroot.sdb()?.borrow();
        let tree_conflict_data: Option<Option<String>> =
            sqlite::prepare(&sdb.conn, Stmt::SelectActualNode)?
                .query_row(
                    params![parsed.wcroot.wc_id(), parsed.relpath.as_str()],
                    |row| row.get("tree_conflict_data"),
                )
                .optional()?;

        let Some(Some(data)) = tree_conflict_data else {
            // No ACTUAL node or no conflict info: no problem.
            return Ok(None);
        };

        let mut conflicts = read_tree_conflicts(&data)
            .map_err(|err| DbError::Corrupt(err.to_string()))?;
        let victim_basename = local_abspath
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(conflicts.remove(&victim_basename))
    }

    /// Records the on-disk timestamp of the BASE text, used to cheaply
    /// detect unmodified files.
    pub fn op_set_last_mod_time(
        &self,
        local_abspath: &Path,
        last_mod_time: i64,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            sqlite::prepare(&sdb.conn, Stmt::UpdateBaseLastModTime)?
                .execute(params![
                    parsed.wcroot.wc_id(),
                    parsed.relpath.as_str(),
                    last_mod_time,
                ])?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    // The WORKING-layer operations below are reserved for a later engine
    // revision; callers fail fast rather than observing half-defined
    // behavior.

    pub fn op_copy(
        &self,
        _src_abspath: &Path,
        _dst_abspath: &Path,
    ) -> DbResult<()> {
        Err(DbError::NotImplemented("op_copy"))
    }

    pub fn op_copy_url(
        &self,
        _local_abspath: &Path,
        _copyfrom_repos_relpath: &str,
        _copyfrom_revision: i64,
    ) -> DbResult<()> {
        Err(DbError::NotImplemented("op_copy_url"))
    }

    pub fn op_add_directory(&self, _local_abspath: &Path) -> DbResult<()> {
        Err(DbError::NotImplemented("op_add_directory"))
    }

    pub fn op_add_file(&self, _local_abspath: &Path) -> DbResult<()> {
        Err(DbError::NotImplemented("op_add_file"))
    }

    pub fn op_add_symlink(
        &self,
        _local_abspath: &Path,
        _target: &str,
    ) -> DbResult<()> {
        Err(DbError::NotImplemented("op_add_symlink"))
    }

    pub fn op_delete(&self, _local_abspath: &Path) -> DbResult<()> {
        Err(DbError::NotImplemented("op_delete"))
    }

    pub fn op_move(
        &self,
        _src_abspath: &Path,
        _dst_abspath: &Path,
    ) -> DbResult<()> {
        Err(DbError::NotImplemented("op_move"))
    }

    pub fn op_modified(&self, _local_abspath: &Path) -> DbResult<()> {
        Err(DbError::NotImplemented("op_modified"))
    }

    pub fn op_mark_conflict(&self, _local_abspath: &Path) -> DbResult<()> {
        Err(DbError::NotImplemented("op_mark_conflict"))
    }

    pub fn op_revert(&self, _local_abspath: &Path) -> DbResult<()> {
        Err(DbError::NotImplemented("op_revert"))
    }
}
