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

//! Thin typed facade over the embedded SQL engine: the statements
//! catalogue, transactions, schema version access, and the binding/column
//! conventions for checksums, tokens and skeleton-serialized properties.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{CachedStatement, Connection, OpenFlags, Transaction};

use crate::checksum::Checksum;
use crate::node::{NodeKind, Presence};
use crate::skel;
use crate::wc_db::{DbError, DbResult};

/// How a database file may be opened. Handles are cached and shared
/// between readers and writers, so resolution always opens read-write;
/// creation is reserved for `init`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Mode {
    ReadWrite,
    RwCreate,
}

/// The statements catalogue. Each statement is prepared once per
/// connection (through the prepared-statement cache) and is identified at
/// call sites by its catalogue name rather than inline SQL.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Stmt {
    SelectBaseNode,
    SelectBaseNodeWithLock,
    SelectWorkingNode,
    SelectActualNode,
    SelectRepository,
    SelectRepositoryById,
    InsertRepository,
    InsertWcroot,
    SelectWcrootNull,
    InsertBaseNode,
    InsertBaseNodeIncomplete,
    InsertWorkingNode,
    DeleteBaseNode,
    DeleteWorkingNode,
    DeleteActualNode,
    SelectBaseNodeChildren,
    SelectWorkingChildren,
    SelectBaseProps,
    SelectWorkingProps,
    SelectActualProps,
    UpdateActualProps,
    InsertActualProps,
    SelectBaseDavCache,
    UpdateBaseDavCache,
    UpdateBaseLastModTime,
    SelectDeletionInfo,
    ApplyChangesToBase,
    ResetActualWithChangelist,
    InsertActualChangelist,
    UpdateActualChangelist,
    UpdateActualTreeConflicts,
    InsertActualTreeConflicts,
    ClearTextConflict,
    ClearPropsConflict,
    SelectActualConflictVictims,
    SelectActualTreeConflict,
    InsertLock,
    DeleteLock,
    UpdateLockReposId,
    UpdateBaseRecursiveRepo,
    UpdateWorkingRecursiveCopyfromRepo,
    ClearBaseRecursiveDavCache,
    SelectWorkingIsFile,
    SelectBaseIsFile,
    InsertPristine,
    SelectPristine,
    LookForWork,
    InsertWorkItem,
    SelectWorkItem,
    DeleteWorkItem,
    InsertWcLock,
    SelectWcLock,
    DeleteWcLock,
}

impl Stmt {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Stmt::SelectBaseNode => {
                "SELECT repos_id, repos_relpath, presence, kind, revnum, \
                 checksum, translated_size, changed_rev, changed_date, \
                 changed_author, depth, symlink_target, last_mod_time, \
                 properties, dav_cache \
                 FROM BASE_NODE WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectBaseNodeWithLock => {
                "SELECT BASE_NODE.repos_id AS repos_id, \
                 BASE_NODE.repos_relpath AS repos_relpath, \
                 presence, kind, revnum, \
                 checksum, translated_size, changed_rev, changed_date, \
                 changed_author, depth, symlink_target, last_mod_time, \
                 properties, dav_cache, \
                 lock_token, lock_owner, lock_comment, lock_date \
                 FROM BASE_NODE \
                 LEFT OUTER JOIN LOCK \
                 ON BASE_NODE.repos_id = LOCK.repos_id \
                 AND BASE_NODE.repos_relpath = LOCK.repos_relpath \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectWorkingNode => {
                "SELECT presence, kind, checksum, translated_size, \
                 changed_rev, changed_date, changed_author, depth, \
                 symlink_target, copyfrom_repos_id, copyfrom_repos_path, \
                 copyfrom_revnum, moved_here, moved_to, last_mod_time, \
                 properties \
                 FROM WORKING_NODE WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectActualNode => {
                "SELECT prop_reject, changelist, conflict_old, conflict_new, \
                 conflict_working, tree_conflict_data, properties \
                 FROM ACTUAL_NODE WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectRepository => {
                "SELECT id, uuid FROM REPOSITORY WHERE root = ?1"
            }
            Stmt::SelectRepositoryById => {
                "SELECT root, uuid FROM REPOSITORY WHERE id = ?1"
            }
            Stmt::InsertRepository => {
                "INSERT INTO REPOSITORY (root, uuid) VALUES (?1, ?2)"
            }
            Stmt::InsertWcroot => {
                "INSERT INTO WCROOT (local_abspath) VALUES (NULL)"
            }
            Stmt::SelectWcrootNull => {
                "SELECT id FROM WCROOT WHERE local_abspath IS NULL"
            }
            Stmt::InsertBaseNode => {
                "INSERT OR REPLACE INTO BASE_NODE (wc_id, local_relpath, \
                 repos_id, repos_relpath, parent_relpath, presence, kind, \
                 revnum, properties, changed_rev, changed_date, \
                 changed_author, depth, checksum, translated_size, \
                 symlink_target) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16)"
            }
            Stmt::InsertBaseNodeIncomplete => {
                "INSERT OR IGNORE INTO BASE_NODE (wc_id, local_relpath, \
                 parent_relpath, presence, kind, revnum) \
                 VALUES (?1, ?2, ?3, 'incomplete', 'unknown', ?4)"
            }
            Stmt::InsertWorkingNode => {
                "INSERT OR REPLACE INTO WORKING_NODE (wc_id, local_relpath, \
                 parent_relpath, presence, kind, checksum, translated_size, \
                 changed_rev, changed_date, changed_author, depth, \
                 symlink_target, copyfrom_repos_id, copyfrom_repos_path, \
                 copyfrom_revnum, moved_here, moved_to, properties) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16, ?17, ?18)"
            }
            Stmt::DeleteBaseNode => {
                "DELETE FROM BASE_NODE WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::DeleteWorkingNode => {
                "DELETE FROM WORKING_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::DeleteActualNode => {
                "DELETE FROM ACTUAL_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectBaseNodeChildren => {
                "SELECT local_relpath FROM BASE_NODE \
                 WHERE wc_id = ?1 AND parent_relpath = ?2"
            }
            Stmt::SelectWorkingChildren => {
                "SELECT local_relpath FROM BASE_NODE \
                 WHERE wc_id = ?1 AND parent_relpath = ?2 \
                 UNION \
                 SELECT local_relpath FROM WORKING_NODE \
                 WHERE wc_id = ?1 AND parent_relpath = ?2"
            }
            Stmt::SelectBaseProps => {
                "SELECT properties FROM BASE_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectWorkingProps => {
                "SELECT properties FROM WORKING_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectActualProps => {
                "SELECT properties FROM ACTUAL_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::UpdateActualProps => {
                "UPDATE ACTUAL_NODE SET properties = ?3 \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::InsertActualProps => {
                "INSERT INTO ACTUAL_NODE (wc_id, local_relpath, \
                 parent_relpath, properties) VALUES (?1, ?2, ?3, ?4)"
            }
            Stmt::SelectBaseDavCache => {
                "SELECT dav_cache FROM BASE_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::UpdateBaseDavCache => {
                "UPDATE BASE_NODE SET dav_cache = ?3 \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::UpdateBaseLastModTime => {
                "UPDATE BASE_NODE SET last_mod_time = ?3 \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectDeletionInfo => {
                "SELECT BASE_NODE.presence AS base_presence, \
                 WORKING_NODE.presence AS work_presence, \
                 WORKING_NODE.moved_to AS moved_to \
                 FROM WORKING_NODE \
                 LEFT OUTER JOIN BASE_NODE \
                 ON BASE_NODE.wc_id = WORKING_NODE.wc_id \
                 AND BASE_NODE.local_relpath = WORKING_NODE.local_relpath \
                 WHERE WORKING_NODE.wc_id = ?1 \
                 AND WORKING_NODE.local_relpath = ?2"
            }
            Stmt::ApplyChangesToBase => {
                "INSERT OR REPLACE INTO BASE_NODE (wc_id, local_relpath, \
                 parent_relpath, presence, kind, revnum, changed_rev, \
                 changed_date, changed_author, properties, repos_id, \
                 repos_relpath, checksum, translated_size, depth, \
                 symlink_target, dav_cache) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9, ?10, ?11, \
                 ?12, ?13, ?14, ?15, ?16)"
            }
            Stmt::ResetActualWithChangelist => {
                "INSERT OR REPLACE INTO ACTUAL_NODE (wc_id, local_relpath, \
                 parent_relpath, changelist) VALUES (?1, ?2, ?3, ?4)"
            }
            Stmt::InsertActualChangelist => {
                "INSERT INTO ACTUAL_NODE (wc_id, local_relpath, changelist, \
                 parent_relpath) VALUES (?1, ?2, ?3, ?4)"
            }
            Stmt::UpdateActualChangelist => {
                "UPDATE ACTUAL_NODE SET changelist = ?3 \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::UpdateActualTreeConflicts => {
                "UPDATE ACTUAL_NODE SET tree_conflict_data = ?3 \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::InsertActualTreeConflicts => {
                "INSERT INTO ACTUAL_NODE (wc_id, local_relpath, \
                 tree_conflict_data, parent_relpath) VALUES (?1, ?2, ?3, ?4)"
            }
            Stmt::ClearTextConflict => {
                "UPDATE ACTUAL_NODE SET conflict_old = NULL, \
                 conflict_new = NULL, conflict_working = NULL \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::ClearPropsConflict => {
                "UPDATE ACTUAL_NODE SET prop_reject = NULL \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectActualConflictVictims => {
                "SELECT local_relpath FROM ACTUAL_NODE \
                 WHERE wc_id = ?1 AND parent_relpath = ?2 \
                 AND NOT (prop_reject IS NULL AND conflict_old IS NULL \
                 AND conflict_new IS NULL AND conflict_working IS NULL)"
            }
            Stmt::SelectActualTreeConflict => {
                "SELECT tree_conflict_data FROM ACTUAL_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2 \
                 AND tree_conflict_data IS NOT NULL"
            }
            Stmt::InsertLock => {
                "INSERT OR REPLACE INTO LOCK (repos_id, repos_relpath, \
                 lock_token, lock_owner, lock_comment, lock_date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
            Stmt::DeleteLock => {
                "DELETE FROM LOCK \
                 WHERE repos_id = ?1 AND repos_relpath = ?2"
            }
            Stmt::UpdateLockReposId => {
                "UPDATE LOCK SET repos_id = ?4 \
                 WHERE repos_id = ?1 AND (repos_relpath = ?2 \
                 OR repos_relpath LIKE ?3 ESCAPE '#')"
            }
            Stmt::UpdateBaseRecursiveRepo => {
                "UPDATE BASE_NODE SET repos_id = ?4 \
                 WHERE repos_id IS NOT NULL AND wc_id = ?1 \
                 AND (local_relpath = ?2 \
                 OR local_relpath LIKE ?3 ESCAPE '#')"
            }
            Stmt::UpdateWorkingRecursiveCopyfromRepo => {
                "UPDATE WORKING_NODE SET copyfrom_repos_id = ?4 \
                 WHERE copyfrom_repos_id IS NOT NULL AND wc_id = ?1 \
                 AND (local_relpath = ?2 \
                 OR local_relpath LIKE ?3 ESCAPE '#')"
            }
            Stmt::ClearBaseRecursiveDavCache => {
                "UPDATE BASE_NODE SET dav_cache = NULL \
                 WHERE dav_cache IS NOT NULL AND wc_id = ?1 \
                 AND (local_relpath = ?2 \
                 OR local_relpath LIKE ?3 ESCAPE '#')"
            }
            Stmt::SelectWorkingIsFile => {
                "SELECT kind = 'file' FROM WORKING_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::SelectBaseIsFile => {
                "SELECT kind = 'file' FROM BASE_NODE \
                 WHERE wc_id = ?1 AND local_relpath = ?2"
            }
            Stmt::InsertPristine => {
                "INSERT OR IGNORE INTO PRISTINE (checksum, size, refcount) \
                 VALUES (?1, ?2, 1)"
            }
            Stmt::SelectPristine => {
                "SELECT size, refcount FROM PRISTINE WHERE checksum = ?1"
            }
            Stmt::LookForWork => "SELECT id FROM WORK_QUEUE LIMIT 1",
            Stmt::InsertWorkItem => {
                "INSERT INTO WORK_QUEUE (work) VALUES (?1)"
            }
            Stmt::SelectWorkItem => {
                "SELECT id, work FROM WORK_QUEUE ORDER BY id LIMIT 1"
            }
            Stmt::DeleteWorkItem => "DELETE FROM WORK_QUEUE WHERE id = ?1",
            Stmt::InsertWcLock => {
                "INSERT INTO WC_LOCK (wc_id, local_dir_relpath) \
                 VALUES (?1, ?2)"
            }
            Stmt::SelectWcLock => {
                "SELECT 1 FROM WC_LOCK \
                 WHERE wc_id = ?1 AND local_dir_relpath = ?2"
            }
            Stmt::DeleteWcLock => {
                "DELETE FROM WC_LOCK \
                 WHERE wc_id = ?1 AND local_dir_relpath = ?2"
            }
        }
    }
}

/// Prepares a catalogue statement against `conn`, reusing the compiled
/// form when the statement was prepared before.
pub(crate) fn prepare(
    conn: &Connection,
    stmt: Stmt,
) -> rusqlite::Result<CachedStatement<'_>> {
    conn.prepare_cached(stmt.sql())
}

/// One open database file. The engine keeps one per working copy root.
pub(crate) struct Sdb {
    pub(crate) conn: Connection,
}

impl Sdb {
    pub(crate) fn open(path: &Path, mode: Mode) -> rusqlite::Result<Sdb> {
        let flags = match mode {
            Mode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
            Mode::RwCreate => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
            }
        } | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        // Other processes may hold the file lock for the duration of their
        // own transactions.
        conn.busy_timeout(Duration::from_secs(10))?;
        Ok(Sdb { conn })
    }

    pub(crate) fn schema_version(&self) -> rusqlite::Result<i32> {
        self.conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
    }

    /// Runs `f` inside a transaction: committed when `f` succeeds, rolled
    /// back when it propagates a failure.
    pub(crate) fn with_transaction<T>(
        &mut self,
        f: impl FnOnce(&Transaction) -> DbResult<T>,
    ) -> DbResult<T> {
        let tx = self.conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

pub(crate) fn set_schema_version(
    conn: &Connection,
    version: i32,
) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}

/// Binding form of a property map: `None` stays NULL, `Some` becomes the
/// skeleton blob.
pub(crate) fn props_to_blob(
    props: Option<&BTreeMap<String, String>>,
) -> Option<Vec<u8>> {
    props.map(skel::write_proplist)
}

pub(crate) fn props_from_blob(
    blob: Option<&[u8]>,
) -> DbResult<Option<BTreeMap<String, String>>> {
    match blob {
        None => Ok(None),
        Some(data) => skel::parse_proplist(data)
            .map(Some)
            .map_err(|err| DbError::Corrupt(err.to_string())),
    }
}

/// Binding form of a checksum: its canonical string.
pub(crate) fn checksum_to_text(checksum: Option<&Checksum>) -> Option<String> {
    checksum.map(|c| c.to_string())
}

pub(crate) fn checksum_from_text(
    text: Option<&str>,
) -> DbResult<Option<Checksum>> {
    match text {
        None => Ok(None),
        Some(s) => Checksum::parse(s)
            .map(Some)
            .map_err(|err| DbError::Corrupt(err.to_string())),
    }
}

pub(crate) fn presence_from_token(token: &str) -> DbResult<Presence> {
    Presence::from_token(token).ok_or_else(|| {
        DbError::Corrupt(format!("unknown presence token '{token}'"))
    })
}

pub(crate) fn kind_from_token(token: &str) -> DbResult<NodeKind> {
    NodeKind::from_token(token).ok_or_else(|| {
        DbError::Corrupt(format!("unknown node kind token '{token}'"))
    })
}

fn token_conversion_err(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

/// Reads a presence token column within a row-mapping closure.
pub(crate) fn row_presence(
    row: &rusqlite::Row<'_>,
    column: &str,
) -> rusqlite::Result<Presence> {
    let token: String = row.get(column)?;
    Presence::from_token(&token).ok_or_else(|| {
        token_conversion_err(format!("unknown presence token '{token}'"))
    })
}

/// Reads a node kind token column within a row-mapping closure.
pub(crate) fn row_kind(
    row: &rusqlite::Row<'_>,
    column: &str,
) -> rusqlite::Result<NodeKind> {
    let token: String = row.get(column)?;
    NodeKind::from_token(&token).ok_or_else(|| {
        token_conversion_err(format!("unknown node kind token '{token}'"))
    })
}

/// Escapes a string for use as a LIKE pattern with `ESCAPE '#'`.
pub(crate) fn escape_like(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '%' || c == '_' || c == '#' {
            result.push('#');
        }
        result.push(c);
    }
    result
}

/// The LIKE pattern matching everything strictly below `relpath`.
pub(crate) fn descendants_like_pattern(relpath: &str) -> String {
    if relpath.is_empty() {
        "%".to_owned()
    } else {
        format!("{}/%", escape_like(relpath))
    }
}
