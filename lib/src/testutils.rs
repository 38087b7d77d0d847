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

//! Helpers for this crate's tests.
//!
//! Besides the usual scaffolding (temp dirs, a ready-made checkout) this
//! module writes WORKING_NODE rows directly. The public `op_` entry
//! points that would create them (`op_copy`, `op_delete`, …) are reserved
//! in this engine revision, but the scan and commit operations over
//! WORKING rows still need exercising.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::params;
use tempfile::TempDir;

use crate::checksum::{Checksum, ChecksumKind};
use crate::node::{Depth, NodeKind, Presence};
use crate::sqlite::{self, Stmt};
use crate::wc_db::{create_repos_id, DbConfig, DbResult, OpenMode, WcDb};

pub const REPOS_ROOT_URL: &str = "http://x/";
pub const REPOS_UUID: &str = "U";

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("subvert-test-")
        .tempdir()
        .unwrap()
}

pub fn empty_db() -> WcDb {
    WcDb::open(OpenMode::ReadWrite, DbConfig::default(), true, false)
}

/// Creates a working copy of `trunk` at revision 7 under `root` and
/// returns an engine that knows about it.
pub fn simple_checkout(root: &Path) -> WcDb {
    let db = empty_db();
    db.init(root, "trunk", REPOS_ROOT_URL, REPOS_UUID, 7, Depth::Infinity)
        .unwrap();
    db
}

/// The checksum of the empty text, in the default pristine kind.
pub fn empty_text_checksum() -> Checksum {
    Checksum::of_bytes(ChecksumKind::Sha1, b"")
}

/// Adds a plain BASE file row the way a checkout would, with empty
/// properties and revision 7 metadata.
pub fn add_base_file(db: &WcDb, root: &Path, name: &str) {
    db.base_add_file(
        &root.join(name),
        &format!("trunk/{name}"),
        REPOS_ROOT_URL,
        REPOS_UUID,
        7,
        &BTreeMap::new(),
        Some(7),
        Some(0),
        Some("bob"),
        &empty_text_checksum(),
        Some(0),
    )
    .unwrap();
}

/// The copy/move source recorded on a WORKING row.
pub struct Copyfrom<'a> {
    pub repos_relpath: &'a str,
    pub revision: i64,
    pub moved_here: bool,
}

/// Writes one WORKING_NODE row directly, standing in for the reserved
/// `op_*` mutations.
pub fn insert_working_node(
    db: &WcDb,
    local_abspath: &Path,
    presence: Presence,
    kind: NodeKind,
    copyfrom: Option<Copyfrom<'_>>,
    moved_to: Option<&str>,
    props: Option<&BTreeMap<String, String>>,
) -> DbResult<()> {
    let parsed = db.parse_local_abspath(local_abspath)?;
    {
        let sdb = parsed.wcroot.sdb()?.borrow();
        let copyfrom_repos_id = match &copyfrom {
            Some(_) => Some(create_repos_id(
                &sdb.conn,
                REPOS_ROOT_URL,
                REPOS_UUID,
            )?),
            None => None,
        };
        sqlite::prepare(&sdb.conn, Stmt::InsertWorkingNode)?.execute(
            params![
                parsed.wcroot.wc_id(),
                parsed.relpath.as_str(),
                parsed.relpath.parent().map(|p| p.as_str().to_owned()),
                presence.token(),
                kind.token(),
                Option::<String>::None, // checksum
                Option::<i64>::None,    // translated_size
                Option::<i64>::None,    // changed_rev
                Option::<i64>::None,    // changed_date
                Option::<String>::None, // changed_author
                if kind == NodeKind::Dir {
                    Some(Depth::Infinity.to_word())
                } else {
                    None
                },
                Option::<String>::None, // symlink_target
                copyfrom_repos_id,
                copyfrom.as_ref().map(|c| c.repos_relpath.to_owned()),
                copyfrom.as_ref().map(|c| c.revision),
                copyfrom.as_ref().map(|c| c.moved_here).unwrap_or(false),
                moved_to,
                sqlite::props_to_blob(props),
            ],
        )?;
    }
    db.flush_entries(&parsed);
    Ok(())
}

/// Marks a text conflict on a node's ACTUAL row, creating the row when
/// necessary, the way a merge would after writing its conflict files.
pub fn set_text_conflict(
    db: &WcDb,
    local_abspath: &Path,
    conflict_old: &str,
    conflict_new: &str,
    conflict_working: &str,
) -> DbResult<()> {
    let parsed = db.parse_local_abspath(local_abspath)?;
    let sdb = parsed.wcroot.sdb()?.borrow();
    let affected = sdb.conn.execute(
        "UPDATE ACTUAL_NODE SET conflict_old = ?3, conflict_new = ?4, \
         conflict_working = ?5 WHERE wc_id = ?1 AND local_relpath = ?2",
        params![
            parsed.wcroot.wc_id(),
            parsed.relpath.as_str(),
            conflict_old,
            conflict_new,
            conflict_working,
        ],
    )?;
    if affected == 0 {
        sdb.conn.execute(
            "INSERT INTO ACTUAL_NODE (wc_id, local_relpath, \
             parent_relpath, conflict_old, conflict_new, conflict_working) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                parsed.wcroot.wc_id(),
                parsed.relpath.as_str(),
                parsed.relpath.parent().map(|p| p.as_str().to_owned()),
                conflict_old,
                conflict_new,
                conflict_working,
            ],
        )?;
    }
    Ok(())
}

/// Overrides the schema version marker, for exercising the format gate.
pub fn set_schema_version(root: &Path, version: i32) {
    let conn = rusqlite::Connection::open(
        root.join(crate::wc_db::ADMIN_DIR).join("wc.db"),
    )
    .unwrap();
    conn.pragma_update(None, "user_version", version).unwrap();
}

/// Creates a working copy whose database genuinely has the schema of an
/// older `format`, for exercising the upgrade ladder.
pub fn init_checkout_at_format(root: &Path, format: i32) {
    use crate::wc_db::ADMIN_DIR;
    let admin_dir = root.join(ADMIN_DIR);
    for dir in [
        admin_dir.clone(),
        admin_dir.join("pristine"),
        admin_dir.join("tmp"),
    ] {
        std::fs::create_dir_all(dir).unwrap();
    }
    let mut conn =
        rusqlite::Connection::open(admin_dir.join("wc.db")).unwrap();
    crate::schema::create_schema_to(&mut conn, format).unwrap();
    let repos_id = create_repos_id(&conn, REPOS_ROOT_URL, REPOS_UUID).unwrap();
    sqlite::prepare(&conn, Stmt::InsertWcroot)
        .unwrap()
        .execute([])
        .unwrap();
    let wc_id = conn.last_insert_rowid();
    sqlite::prepare(&conn, Stmt::InsertBaseNode)
        .unwrap()
        .execute(params![
            wc_id,
            "",
            repos_id,
            "trunk",
            Option::<String>::None,
            Presence::Normal.token(),
            NodeKind::Dir.token(),
            7,
            Option::<Vec<u8>>::None,
            Option::<i64>::None,
            Option::<i64>::None,
            Option::<String>::None,
            Depth::Infinity.to_word(),
            Option::<String>::None,
            Option::<i64>::None,
            Option::<String>::None,
        ])
        .unwrap();
}

/// Marks a property-reject file on a node's ACTUAL row, creating the row
/// when necessary.
pub fn set_prop_reject(
    db: &WcDb,
    local_abspath: &Path,
    prop_reject: &str,
) -> DbResult<()> {
    let parsed = db.parse_local_abspath(local_abspath)?;
    let sdb = parsed.wcroot.sdb()?.borrow();
    let affected = sdb.conn.execute(
        "UPDATE ACTUAL_NODE SET prop_reject = ?3 \
         WHERE wc_id = ?1 AND local_relpath = ?2",
        params![
            parsed.wcroot.wc_id(),
            parsed.relpath.as_str(),
            prop_reject,
        ],
    )?;
    if affected == 0 {
        sdb.conn.execute(
            "INSERT INTO ACTUAL_NODE (wc_id, local_relpath, \
             parent_relpath, prop_reject) VALUES (?1, ?2, ?3, ?4)",
            params![
                parsed.wcroot.wc_id(),
                parsed.relpath.as_str(),
                parsed.relpath.parent().map(|p| p.as_str().to_owned()),
                prop_reject,
            ],
        )?;
    }
    Ok(())
}
