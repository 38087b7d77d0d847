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

//! Operations on the BASE tree: the rows recording what the repository
//! said exists at a given revision. Update and checkout insert these rows;
//! commit rewrites them through [`WcDb::global_commit`].

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::params;
use rusqlite::Connection;

use crate::checksum::Checksum;
use crate::locks::LockInfo;
use crate::node::{effective_status, Depth, NodeKind, Presence, Status};
use crate::relpath::RelPath;
use crate::sqlite::{self, Stmt};
use crate::wc_db::{
    base_node_row, create_repos_id, fetch_repos_info, DbError, DbResult, WcDb,
};

/// Everything needed to insert one BASE row (plus, for directories, the
/// `incomplete` placeholder rows for the expected children).
struct InsertBaseNode<'a> {
    wc_id: i64,
    local_relpath: RelPath,
    repos_id: i64,
    repos_relpath: &'a str,
    presence: Presence,
    kind: NodeKind,
    revision: i64,
    props: Option<&'a BTreeMap<String, String>>,
    changed_rev: Option<i64>,
    changed_date: Option<i64>,
    changed_author: Option<&'a str>,
    depth: Option<Depth>,
    checksum: Option<&'a Checksum>,
    translated_size: Option<i64>,
    target: Option<&'a str>,
    children: Option<&'a [String]>,
}

impl InsertBaseNode<'_> {
    fn insert(&self, conn: &Connection) -> DbResult<()> {
        let parent_relpath = self
            .local_relpath
            .parent()
            .map(|parent| parent.as_str().to_owned());
        sqlite::prepare(conn, Stmt::InsertBaseNode)?.execute(params![
            self.wc_id,
            self.local_relpath.as_str(),
            self.repos_id,
            self.repos_relpath,
            parent_relpath,
            self.presence.token(),
            self.kind.token(),
            self.revision,
            sqlite::props_to_blob(self.props),
            self.changed_rev,
            self.changed_date,
            self.changed_author,
            self.depth.map(Depth::to_word),
            sqlite::checksum_to_text(self.checksum),
            self.translated_size,
            self.target,
        ])?;

        if self.kind == NodeKind::Dir {
            if let Some(children) = self.children {
                // Materialize the expected-children set before any content
                // arrives. Existing rows are left alone; old children may
                // stick around even if they are gone in this revision.
                let mut stmt =
                    sqlite::prepare(conn, Stmt::InsertBaseNodeIncomplete)?;
                for name in children {
                    stmt.execute(params![
                        self.wc_id,
                        self.local_relpath.join(name).as_str(),
                        self.local_relpath.as_str(),
                        self.revision,
                    ])?;
                }
            }
        }
        Ok(())
    }
}

/// What [`WcDb::base_get_info`] reports about a BASE row.
#[derive(Debug)]
pub struct BaseInfo {
    pub status: Status,
    pub kind: NodeKind,
    pub revision: Option<i64>,
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
    pub lock: Option<LockInfo>,
}

pub(crate) fn parse_checksum_column(
    raw: Option<&str>,
    local_abspath: &Path,
) -> DbResult<Option<Checksum>> {
    match raw {
        None => Ok(None),
        Some(text) => Checksum::parse(text).map(Some).map_err(|_| {
            DbError::Corrupt(format!(
                "the node '{}' has a corrupt checksum value",
                local_abspath.display()
            ))
        }),
    }
}

impl WcDb {
    /// Inserts a BASE directory row. When `children` is given, a
    /// placeholder row with `incomplete` presence is inserted for each
    /// child inside the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn base_add_directory(
        &self,
        local_abspath: &Path,
        repos_relpath: &str,
        repos_root_url: &str,
        repos_uuid: &str,
        revision: i64,
        props: &BTreeMap<String, String>,
        changed_rev: Option<i64>,
        changed_date: Option<i64>,
        changed_author: Option<&str>,
        children: &[String],
        depth: Depth,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?;
        {
            let mut sdb = sdb.borrow_mut();
            let repos_id =
                create_repos_id(&sdb.conn, repos_root_url, repos_uuid)?;
            let ibb = InsertBaseNode {
                wc_id: parsed.wcroot.wc_id(),
                local_relpath: parsed.relpath.clone(),
                repos_id,
                repos_relpath,
                presence: Presence::Normal,
                kind: NodeKind::Dir,
                revision,
                props: Some(props),
                changed_rev,
                changed_date,
                changed_author,
                depth: Some(depth),
                checksum: None,
                translated_size: None,
                target: None,
                children: Some(children),
            };
            sdb.with_transaction(|tx| ibb.insert(tx))?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Inserts a BASE file row.
    #[allow(clippy::too_many_arguments)]
    pub fn base_add_file(
        &self,
        local_abspath: &Path,
        repos_relpath: &str,
        repos_root_url: &str,
        repos_uuid: &str,
        revision: i64,
        props: &BTreeMap<String, String>,
        changed_rev: Option<i64>,
        changed_date: Option<i64>,
        changed_author: Option<&str>,
        checksum: &Checksum,
        translated_size: Option<i64>,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?;
        {
            let sdb = sdb.borrow();
            let repos_id =
                create_repos_id(&sdb.conn, repos_root_url, repos_uuid)?;
            let ibb = InsertBaseNode {
                wc_id: parsed.wcroot.wc_id(),
                local_relpath: parsed.relpath.clone(),
                repos_id,
                repos_relpath,
                presence: Presence::Normal,
                kind: NodeKind::File,
                revision,
                props: Some(props),
                changed_rev,
                changed_date,
                changed_author,
                depth: None,
                checksum: Some(checksum),
                translated_size,
                target: None,
                children: None,
            };
            ibb.insert(&sdb.conn)?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Inserts a BASE symlink row.
    #[allow(clippy::too_many_arguments)]
    pub fn base_add_symlink(
        &self,
        local_abspath: &Path,
        repos_relpath: &str,
        repos_root_url: &str,
        repos_uuid: &str,
        revision: i64,
        props: &BTreeMap<String, String>,
        changed_rev: Option<i64>,
        changed_date: Option<i64>,
        changed_author: Option<&str>,
        target: &str,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?;
        {
            let sdb = sdb.borrow();
            let repos_id =
                create_repos_id(&sdb.conn, repos_root_url, repos_uuid)?;
            let ibb = InsertBaseNode {
                wc_id: parsed.wcroot.wc_id(),
                local_relpath: parsed.relpath.clone(),
                repos_id,
                repos_relpath,
                presence: Presence::Normal,
                kind: NodeKind::Symlink,
                revision,
                props: Some(props),
                changed_rev,
                changed_date,
                changed_author,
                depth: None,
                checksum: None,
                translated_size: None,
                target: Some(target),
                children: None,
            };
            ibb.insert(&sdb.conn)?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Inserts a BASE row for a node that exists in the repository but has
    /// no content here: `absent` (authorization), `excluded` (user
    /// choice), or `not-present` (tombstone).
    #[allow(clippy::too_many_arguments)]
    pub fn base_add_absent_node(
        &self,
        local_abspath: &Path,
        repos_relpath: &str,
        repos_root_url: &str,
        repos_uuid: &str,
        revision: i64,
        kind: NodeKind,
        presence: Presence,
    ) -> DbResult<()> {
        debug_assert!(matches!(
            presence,
            Presence::Absent | Presence::Excluded | Presence::NotPresent
        ));
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?;
        {
            let sdb = sdb.borrow();
            let repos_id =
                create_repos_id(&sdb.conn, repos_root_url, repos_uuid)?;
            let ibb = InsertBaseNode {
                wc_id: parsed.wcroot.wc_id(),
                local_relpath: parsed.relpath.clone(),
                repos_id,
                repos_relpath,
                presence,
                kind,
                revision,
                props: None,
                changed_rev: None,
                changed_date: None,
                changed_author: None,
                depth: None,
                checksum: None,
                translated_size: None,
                target: None,
                children: None,
            };
            ibb.insert(&sdb.conn)?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Removes the BASE row for a path.
    pub fn base_remove(&self, local_abspath: &Path) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        {
            let sdb = parsed.wcroot.sdb()?.borrow();
            sqlite::prepare(&sdb.conn, Stmt::DeleteBaseNode)?.execute(
                params![parsed.wcroot.wc_id(), parsed.relpath.as_str()],
            )?;
        }
        self.flush_entries(&parsed);
        Ok(())
    }

    /// Reads the BASE row for a path, ignoring any WORKING or ACTUAL
    /// overlay.
    pub fn base_get_info(&self, local_abspath: &Path) -> DbResult<BaseInfo> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let row = base_node_row(
            &sdb.conn,
            parsed.wcroot.wc_id(),
            &parsed.relpath,
            true,
        )?
        .ok_or_else(|| {
            DbError::PathNotFound(local_abspath.to_path_buf())
        })?;

        let status = effective_status(Some((row.presence, row.kind)), None);
        let kind = if row.kind == NodeKind::Subdir {
            NodeKind::Dir
        } else {
            row.kind
        };
        let (repos_root_url, repos_uuid) = match row.repos_id {
            Some(repos_id) => {
                let (root, uuid) = fetch_repos_info(&sdb.conn, repos_id)?;
                (Some(root), Some(uuid))
            }
            None => (None, None),
        };
        let depth = if kind == NodeKind::Dir {
            row.depth
                .as_deref()
                .map(Depth::from_word)
                .unwrap_or(Depth::Unknown)
        } else {
            Depth::Unknown
        };
        let checksum = if kind == NodeKind::File {
            parse_checksum_column(row.checksum.as_deref(), local_abspath)?
        } else {
            None
        };
        let target = if kind == NodeKind::Symlink {
            row.target
        } else {
            None
        };

        Ok(BaseInfo {
            status,
            kind,
            revision: row.revision,
            repos_relpath: row.repos_relpath,
            repos_root_url,
            repos_uuid,
            changed_rev: row.changed_rev,
            changed_date: row.changed_date,
            changed_author: row.changed_author,
            last_mod_time: row.last_mod_time,
            depth,
            checksum,
            translated_size: row.translated_size,
            target,
            lock: row.lock,
        })
    }

    /// The properties of the BASE row. A NULL column reads as an empty
    /// map; a missing row is `path_not_found`.
    pub fn base_get_props(
        &self,
        local_abspath: &Path,
    ) -> DbResult<BTreeMap<String, String>> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let blob = select_props_column(
            &sdb.conn,
            Stmt::SelectBaseProps,
            parsed.wcroot.wc_id(),
            &parsed.relpath,
        )?
        .ok_or_else(|| DbError::PathNotFound(local_abspath.to_path_buf()))?;
        Ok(sqlite::props_from_blob(blob.as_deref())?.unwrap_or_default())
    }

    pub fn base_get_prop(
        &self,
        local_abspath: &Path,
        propname: &str,
    ) -> DbResult<Option<String>> {
        let mut props = self.base_get_props(local_abspath)?;
        Ok(props.remove(propname))
    }

    /// The basenames of the BASE children of a directory.
    pub fn base_get_children(
        &self,
        local_abspath: &Path,
    ) -> DbResult<Vec<String>> {
        self.gather_children(local_abspath, true)
    }

    /// Replaces the DAV cache attached to the BASE row.
    pub fn base_set_dav_cache(
        &self,
        local_abspath: &Path,
        props: &BTreeMap<String, String>,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        sqlite::prepare(&sdb.conn, Stmt::UpdateBaseDavCache)?.execute(
            params![
                parsed.wcroot.wc_id(),
                parsed.relpath.as_str(),
                sqlite::props_to_blob(Some(props)),
            ],
        )?;
        Ok(())
    }

    /// The DAV cache attached to the BASE row, `None` when the column is
    /// NULL.
    pub fn base_get_dav_cache(
        &self,
        local_abspath: &Path,
    ) -> DbResult<Option<BTreeMap<String, String>>> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let blob = select_props_column(
            &sdb.conn,
            Stmt::SelectBaseDavCache,
            parsed.wcroot.wc_id(),
            &parsed.relpath,
        )?
        .ok_or_else(|| DbError::PathNotFound(local_abspath.to_path_buf()))?;
        sqlite::props_from_blob(blob.as_deref())
    }

    /// Interns `(repos_root_url, uuid)` in the repository registry of the
    /// working copy owning `local_abspath` and returns the id.
    pub fn repos_ensure(
        &self,
        local_abspath: &Path,
        repos_root_url: &str,
        repos_uuid: &str,
    ) -> DbResult<i64> {
        let parsed = self.parse_local_abspath(local_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        create_repos_id(&sdb.conn, repos_root_url, repos_uuid)
    }
}

/// Fetches a single BLOB properties column for a `(wc_id, relpath)` pair.
/// Outer `None` means no row; inner `None` means a NULL column.
pub(crate) fn select_props_column(
    conn: &Connection,
    stmt: Stmt,
    wc_id: i64,
    local_relpath: &RelPath,
) -> DbResult<Option<Option<Vec<u8>>>> {
    use rusqlite::OptionalExtension;
    Ok(sqlite::prepare(conn, stmt)?
        .query_row(params![wc_id, local_relpath.as_str()], |row| row.get(0))
        .optional()?)
}
