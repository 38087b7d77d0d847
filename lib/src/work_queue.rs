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

//! The persisted work queue: serialized deferred filesystem operations
//! that must be replayed after a crash before the metadata can be
//! trusted again. Items are opaque skeletons to the engine; the callers
//! that enqueue them know how to run them.

use std::path::Path;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;

use crate::skel::Skel;
use crate::sqlite::{self, Stmt};
use crate::wc_db::{DbError, DbResult, WcDb};

/// Fails with `cleanup_required` when the queue holds any item: a
/// previous operation never finished, so the metadata cannot be used
/// until the queue is replayed.
pub(crate) fn verify_no_work(
    conn: &Connection,
    wcroot_abspath: &Path,
) -> DbResult<()> {
    let have_work = sqlite::prepare(conn, Stmt::LookForWork)?
        .query_row([], |row| row.get::<_, i64>(0))
        .optional()?
        .is_some();
    if have_work {
        return Err(DbError::CleanupRequired(wcroot_abspath.to_path_buf()));
    }
    Ok(())
}

impl WcDb {
    /// Appends a work item to the queue of the working copy owning
    /// `wri_abspath`.
    pub fn wq_add(
        &self,
        wri_abspath: &Path,
        work_item: &Skel,
    ) -> DbResult<()> {
        let parsed = self.parse_local_abspath(wri_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        sqlite::prepare(&sdb.conn, Stmt::InsertWorkItem)?
            .execute(params![work_item.unparse()])?;
        Ok(())
    }

    /// Returns the pending item with the lowest id, or `None` when the
    /// queue is empty. The item stays queued until
    /// [`WcDb::wq_completed`] confirms it ran.
    pub fn wq_fetch(
        &self,
        wri_abspath: &Path,
    ) -> DbResult<Option<(u64, Skel)>> {
        let parsed = self.parse_local_abspath(wri_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        let row = sqlite::prepare(&sdb.conn, Stmt::SelectWorkItem)?
            .query_row([], |row| {
                Ok((row.get::<_, i64>("id")?, row.get::<_, Vec<u8>>("work")?))
            })
            .optional()?;
        match row {
            None => Ok(None),
            Some((id, work)) => {
                let skel = Skel::parse(&work).map_err(|err| {
                    DbError::Corrupt(format!(
                        "malformed work queue item {id}: {err}"
                    ))
                })?;
                Ok(Some((id as u64, skel)))
            }
        }
    }

    /// Removes a completed item from the queue.
    pub fn wq_completed(&self, wri_abspath: &Path, id: u64) -> DbResult<()> {
        debug_assert!(id != 0);
        let parsed = self.parse_local_abspath(wri_abspath)?;
        let sdb = parsed.wcroot.sdb()?.borrow();
        sqlite::prepare(&sdb.conn, Stmt::DeleteWorkItem)?
            .execute(params![id as i64])?;
        Ok(())
    }
}
