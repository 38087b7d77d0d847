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

//! The working-copy side of commit and relocate: folding WORKING and
//! ACTUAL state into a new BASE after the server accepted a commit, and
//! rewriting repository ids after a repository root URL change.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::checksum::Checksum;
use crate::node::{NodeKind, Presence};
use crate::relpath::{join_relpath, RelPath};
use crate::sqlite::{self, Stmt};
use crate::wc_db::{
    actual_node_row, base_node_row, create_repos_id, fetch_repos_info,
    scan_upwards_for_repos, working_node_row, DbError, DbResult, WcDb,
};

/// Resolves the repository coordinates a node will have in its new BASE
/// row. An existing BASE row with repository information wins; otherwise
/// the ancestry supplies it and the node's own basename is joined on.
fn determine_repos_info(
    conn: &Connection,
    wc_id: i64,
    local_relpath: &RelPath,
    local_abspath: &Path,
) -> DbResult<(i64, String)> {
    let base = base_node_row(conn, wc_id, local_relpath, false)?;
    if let Some(base) = &base {
        if let Some(repos_id) = base.repos_id {
            let repos_relpath =
                base.repos_relpath.clone().ok_or_else(|| {
                    DbError::Corrupt(format!(
                        "BASE row for '{}' has a repos_id but no \
                         repos_relpath",
                        local_relpath.as_str()
                    ))
                })?;
            return Ok((repos_id, repos_relpath));
        }
    }

    // The node is being added: the parent's ancestry must supply the
    // repository, and this node extends the parent's location by its own
    // name.
    let name = local_relpath.basename().to_owned();
    let parent = local_relpath.parent().unwrap_or_else(RelPath::root);
    let (repos_id, parent_repos_relpath) =
        scan_upwards_for_repos(conn, wc_id, &parent, local_abspath)?;
    Ok((repos_id, join_relpath(&parent_repos_relpath, &name)))
}

struct CommitArgs<'a> {
    wc_id: i64,
    local_relpath: &'a RelPath,
    local_abspath: &'a Path,
    new_revision: i64,
    new_date: Option<i64>,
    new_author: Option<&'a str>,
    new_checksum: Option<&'a Checksum>,
    new_dav_cache: Option<&'a BTreeMap<String, String>>,
    keep_changelist: bool,
    repos_id: i64,
    repos_relpath: &'a str,
}

fn commit_node(conn: &Connection, cb: &CommitArgs<'_>) -> DbResult<()> {
    let base = base_node_row(conn, cb.wc_id, cb.local_relpath, false)?;
    let working = working_node_row(conn, cb.wc_id, cb.local_relpath)?;
    let actual = actual_node_row(conn, cb.wc_id, cb.local_relpath)?;

    if base.is_none() && working.is_none() {
        return Err(DbError::PathNotFound(cb.local_abspath.to_path_buf()));
    }

    // The new node's kind is whatever WORKING says, or what BASE has.
    let new_kind = match (&working, &base) {
        (Some(w), _) => w.kind,
        (None, Some(b)) => b.kind,
        (None, None) => unreachable!(),
    };

    let new_depth = if new_kind == NodeKind::Dir {
        match (&working, &base) {
            (Some(w), _) => w.depth.clone(),
            (None, Some(b)) => b.depth.clone(),
            (None, None) => None,
        }
    } else {
        None
    };

    if let Some(base) = &base {
        if let Some(repos_id) = base.repos_id {
            // A commit cannot change the repository coordinates.
            debug_assert_eq!(repos_id, cb.repos_id);
            debug_assert_eq!(
                base.repos_relpath.as_deref(),
                Some(cb.repos_relpath)
            );
        }
    }

    // The new properties: ACTUAL overrides WORKING overrides BASE. The
    // blob is passed through verbatim rather than deserialized and
    // reserialized.
    let prop_blob = actual
        .as_ref()
        .and_then(|a| a.properties.clone())
        .or_else(|| working.as_ref().and_then(|w| w.properties.clone()))
        .or_else(|| base.as_ref().and_then(|b| b.properties.clone()));

    let changelist = if cb.keep_changelist {
        actual.as_ref().and_then(|a| a.changelist.clone())
    } else {
        None
    };

    // The stored byte count of the committed text comes from the pristine
    // store entry for the new checksum.
    let translated_size: Option<i64> = match cb.new_checksum {
        Some(checksum) => sqlite::prepare(conn, Stmt::SelectPristine)?
            .query_row(params![checksum.to_string()], |row| row.get("size"))
            .optional()?,
        None => None,
    };

    // The symlink target survives the commit.
    let target = if new_kind == NodeKind::Symlink {
        match (&working, &base) {
            (Some(w), _) => w.target.clone(),
            (None, Some(b)) => b.target.clone(),
            (None, None) => None,
        }
    } else {
        None
    };

    let parent_relpath = cb
        .local_relpath
        .parent()
        .map(|parent| parent.as_str().to_owned());

    // Write the new BASE row with all the new information.
    sqlite::prepare(conn, Stmt::ApplyChangesToBase)?.execute(params![
        cb.wc_id,
        cb.local_relpath.as_str(),
        parent_relpath,
        Presence::Normal.token(),
        new_kind.token(),
        cb.new_revision,
        cb.new_date.filter(|date| *date > 0),
        cb.new_author,
        prop_blob,
        cb.repos_id,
        cb.repos_relpath,
        sqlite::checksum_to_text(cb.new_checksum),
        translated_size,
        new_depth,
        target,
        sqlite::props_to_blob(cb.new_dav_cache),
    ])?;

    if working.is_some() {
        // The WORKING state has become the new base.
        sqlite::prepare(conn, Stmt::DeleteWorkingNode)?
            .execute(params![cb.wc_id, cb.local_relpath.as_str()])?;
    }

    if actual.is_some() {
        if let Some(changelist) = changelist {
            // The user asked to keep the changelist: replace the ACTUAL
            // row with the basic keys and the changelist alone.
            sqlite::prepare(conn, Stmt::ResetActualWithChangelist)?
                .execute(params![
                    cb.wc_id,
                    cb.local_relpath.as_str(),
                    cb.local_relpath
                        .parent()
                        .map(|parent| parent.as_str().to_owned()),
                    changelist,
                ])?;
        } else {
            sqlite::prepare(conn, Stmt::DeleteActualNode)?
                .execute(params![cb.wc_id, cb.local_relpath.as_str()])?;
        }
    }

    Ok(())
}

impl WcDb {
    /// Records that a commit of this node succeeded: the WORKING state
    /// becomes the new BASE at `new_revision`, and the ACTUAL row is
    /// discarded (or reduced to its changelist when `keep_changelist` is
    /// set). The expected-children set of a committed directory is
    /// recorded by the following update walk, not here.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, new_dav_cache))]
    pub fn global_commit(
        &self,
        local_abspath: &Path,
        new_revision: i64,
        new_date: Option<i64>,
        new_author: Option<&str>,
        new_checksum: Option<&Checksum>,
        new_children: Option<&[String]>,
        new_dav_cache: Option<&BTreeMap<String, String>>,
        keep_changelist: bool,
    ) -> DbResult<()> {
        debug_assert!(new_revision >= 0);
        // A text checksum and a directory child list are mutually
        // exclusive.
        debug_assert!(new_checksum.is_none() || new_children.is_none());

        let parsed = self.parse_local_abspath(local_abspath)?;
        let wc_id = parsed.wcroot.wc_id();
        {
            let mut sdb = parsed.wcroot.sdb()?.borrow_mut();
            let (repos_id, repos_relpath) = determine_repos_info(
                &sdb.conn,
                wc_id,
                &parsed.relpath,
                local_abspath,
            )?;
            let cb = CommitArgs {
                wc_id,
                local_relpath: &parsed.relpath,
                local_abspath,
                new_revision,
                new_date,
                new_author,
                new_checksum,
                new_dav_cache,
                keep_changelist,
                repos_id,
                repos_relpath: &repos_relpath,
            };
            sdb.with_transaction(|tx| commit_node(tx, &cb))?;
        }

        // We thoroughly rearranged this node's rows; toss the caches.
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Points the working copy at a repository reachable under a new root
    /// URL: interns the new repository row and rewrites every reference
    /// to the old one below `local_dir_abspath`, clearing DAV caches as
    /// their URLs are now stale. Under the single-database layout one
    /// transaction covers everything; otherwise each subdirectory is
    /// relocated in turn.
    #[instrument(skip(self))]
    pub fn global_relocate(
        &self,
        local_dir_abspath: &Path,
        repos_root_url: &str,
        single_db: bool,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_dir_abspath)?;
        let wc_id = parsed.wcroot.wc_id();

        // The relocation affects all children through the repos-id
        // inheritance mechanism: only rows carrying an explicit repos_id
        // (and lock rows, keyed by repository location) need rewriting.
        let base_info = {
            let sdb = parsed.wcroot.sdb()?.borrow();
            match base_node_row(&sdb.conn, wc_id, &parsed.relpath, false)? {
                Some(_) => {
                    let (old_repos_id, repos_relpath) =
                        scan_upwards_for_repos(
                            &sdb.conn,
                            wc_id,
                            &parsed.relpath,
                            local_dir_abspath,
                        )?;
                    let (_, uuid) =
                        fetch_repos_info(&sdb.conn, old_repos_id)?;
                    Some((old_repos_id, repos_relpath, uuid))
                }
                None => None,
            }
        };
        // With no BASE node the uuid comes from the addition's copy
        // source ancestry.
        let (have_base, old_repos_id, repos_relpath, uuid) = match base_info {
            Some((id, relpath, uuid)) => (true, id, relpath, uuid),
            None => {
                let addition = self.scan_addition(local_dir_abspath)?;
                (false, 0, String::new(), addition.repos_uuid)
            }
        };

        {
            let mut sdb = parsed.wcroot.sdb()?.borrow_mut();
            sdb.with_transaction(|tx| {
                let new_repos_id =
                    create_repos_id(tx, repos_root_url, &uuid)?;
                let like_arg =
                    sqlite::descendants_like_pattern(parsed.relpath.as_str());

                sqlite::prepare(
                    tx,
                    Stmt::UpdateWorkingRecursiveCopyfromRepo,
                )?
                .execute(params![
                    wc_id,
                    parsed.relpath.as_str(),
                    like_arg,
                    new_repos_id,
                ])?;

                if have_base {
                    // Purge the DAV caches of any BASE rows that have
                    // them; they embed the old URL.
                    sqlite::prepare(tx, Stmt::ClearBaseRecursiveDavCache)?
                        .execute(params![
                            wc_id,
                            parsed.relpath.as_str(),
                            like_arg,
                        ])?;

                    sqlite::prepare(tx, Stmt::UpdateBaseRecursiveRepo)?
                        .execute(params![
                            wc_id,
                            parsed.relpath.as_str(),
                            like_arg,
                            new_repos_id,
                        ])?;

                    // Locks are keyed by repository location, not by
                    // working copy path.
                    let lock_like =
                        sqlite::descendants_like_pattern(&repos_relpath);
                    sqlite::prepare(tx, Stmt::UpdateLockReposId)?.execute(
                        params![
                            old_repos_id,
                            repos_relpath,
                            lock_like,
                            new_repos_id,
                        ],
                    )?;
                }
                Ok(())
            })?;
        }

        if !single_db {
            // Without a centralized store each subdirectory holds its own
            // metadata; relocate them one by one.
            let children = self.read_children(local_dir_abspath)?;
            for child in children {
                let child_abspath = local_dir_abspath.join(&child);
                let kind = self.read_kind(&child_abspath, true)?;
                if kind != NodeKind::Dir {
                    continue;
                }
                self.global_relocate(
                    &child_abspath,
                    repos_root_url,
                    single_db,
                )?;
            }
        }

        self.flush_entries(&parsed);
        Ok(())
    }
}
