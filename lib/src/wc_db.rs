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

//! The working copy metadata engine.
//!
//! [`WcDb`] owns everything the engine knows about the working copies it
//! has touched: a registry of open database handles keyed by checkout
//! root, and a never-evicted cache of directory handles used to resolve
//! absolute paths to `(wcroot, relpath)` pairs. The engine is strictly
//! single-threaded; the interior `RefCell` state makes the type neither
//! `Send` nor `Sync`, which matches the intended use of one engine
//! instance per thread of control.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::params;
use rusqlite::OptionalExtension;
use thiserror::Error;
use tracing::instrument;

use crate::checksum::{Checksum, ChecksumKind};
use crate::file_util::read_version_file;
use crate::locks::LockInfo;
use crate::node::{NodeKind, Presence};
use crate::relpath::{join_relpath, RelPath};
use crate::schema;
use crate::sqlite::{self, Mode, Sdb, Stmt};
use crate::work_queue;

/// Name of the administrative subdirectory in a working copy root.
pub const ADMIN_DIR: &str = ".svt";

/// The database file inside the administrative directory.
pub(crate) const SDB_FILE: &str = "wc.db";

/// Reserved name for staging a future in-place schema migration. Nothing
/// writes it in this format; the name is claimed so old clients never
/// mistake leftovers for a live database.
#[allow(dead_code)]
pub(crate) const SDB_UPGRADE_FILE: &str = "wc.db.upgrade";

/// Pristine text storage below the administrative directory.
pub(crate) const PRISTINE_DIR: &str = "pristine";

/// Tempfile staging area below the administrative directory.
pub(crate) const TEMP_DIR: &str = "tmp";

// Marker files of the legacy pre-relational layout.
const ADM_ENTRIES: &str = "entries";
const ADM_FORMAT: &str = "format";

const UNKNOWN_WC_ID: i64 = -1;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("'{}' is not a working copy", .0.display())]
    NotWorkingCopy(PathBuf),
    #[error("The node '{}' was not found", .0.display())]
    PathNotFound(PathBuf),
    #[error("Working copy database corrupt: {0}")]
    Corrupt(String),
    #[error("{message}")]
    UnsupportedFormat {
        path: PathBuf,
        format: i32,
        message: String,
    },
    #[error("'{}' is missing or not a working copy directory", .0.display())]
    Missing(PathBuf),
    #[error(
        "Working copy '{}' requires cleanup: the work queue is not empty",
        .0.display()
    )]
    CleanupRequired(PathBuf),
    #[error("Working copy '{}' locked", .0.display())]
    Locked(PathBuf),
    #[error(
        "Checksum kind '{}' does not match the working copy kind '{}'",
        .found.token(), .expected.token()
    )]
    BadChecksumKind {
        expected: ChecksumKind,
        found: ChecksumKind,
    },
    #[error("Pristine text '{0}' not present")]
    ChecksumUnknown(Checksum),
    #[error("Expected node '{}' to be {}", .path.display(), .expected)]
    PathUnexpectedStatus {
        path: PathBuf,
        expected: &'static str,
    },
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    #[error("Working copy database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("{}: {}", .message, .path.display())]
    Io {
        message: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DbError {
    pub(crate) fn io(
        message: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> DbError {
        DbError::Io {
            message,
            path: path.into(),
            source,
        }
    }

    fn format_too_old(path: &Path, format: i32) -> DbError {
        DbError::UnsupportedFormat {
            path: path.to_path_buf(),
            format,
            message: format!(
                "Working copy format of '{}' is too old ({}); please check \
                 out your working copy again",
                path.display(),
                format
            ),
        }
    }

    fn format_too_new(path: &Path, format: i32) -> DbError {
        DbError::UnsupportedFormat {
            path: path.to_path_buf(),
            format,
            message: format!(
                "This client is too old to work with the working copy at \
                 '{}' (format {}); you need a newer client",
                path.display(),
                format
            ),
        }
    }

    fn upgrade_required(path: &Path, format: i32) -> DbError {
        DbError::UnsupportedFormat {
            path: path.to_path_buf(),
            format,
            message: format!(
                "The working copy at '{}' is at format {} and must be \
                 upgraded before it can be used",
                path.display(),
                format
            ),
        }
    }
}

/// How the engine was opened. The engine currently opens every database
/// read-write because handles are cached and shared between readers and
/// writers; the mode is recorded for future use.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Engine configuration. All configuration arrives here; the engine reads
/// no environment variables.
#[derive(Clone, Debug, Default)]
pub struct DbConfig {
    /// The digest kind this working copy addresses pristine content by.
    pub pristine_checksum_kind: ChecksumKind,
}

/// One open working copy root: the root path, its database handle and the
/// `wc_id` of its WCROOT row. For a legacy (pre-relational) root there is
/// no database and every operation fails until the working copy is
/// upgraded.
pub(crate) struct WcRoot {
    abspath: PathBuf,
    sdb: Option<RefCell<Sdb>>,
    wc_id: i64,
    format: i32,
}

impl WcRoot {
    pub(crate) fn abspath(&self) -> &Path {
        &self.abspath
    }

    pub(crate) fn wc_id(&self) -> i64 {
        self.wc_id
    }

    /// The database handle, or `unsupported_format` for a legacy root.
    pub(crate) fn sdb(&self) -> DbResult<&RefCell<Sdb>> {
        self.sdb.as_ref().ok_or_else(|| {
            DbError::upgrade_required(&self.abspath, self.format)
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub(crate) struct DirHandleId(usize);

/// Cached state for one directory the engine has resolved. Parent links
/// are arena indices, not owning pointers.
struct DirHandle {
    local_abspath: PathBuf,
    wcroot: Option<Arc<WcRoot>>,
    parent: Option<DirHandleId>,
    /// A directory sits where the parent's metadata expects a file. Only
    /// recorded; queries against the path go through the parent's rows.
    #[allow(dead_code)]
    obstructed_file: bool,
    /// This engine instance holds the advisory wc-lock here.
    locked: bool,
    /// Snapshot of this directory's child basenames, invalidated by every
    /// mutation under the directory.
    children_cache: Option<Vec<String>>,
}

#[derive(Default)]
struct DirPool {
    handles: Vec<DirHandle>,
    by_path: HashMap<PathBuf, DirHandleId>,
    wcroots: HashMap<PathBuf, Arc<WcRoot>>,
}

impl DirPool {
    fn get(&self, path: &Path) -> Option<DirHandleId> {
        self.by_path.get(path).copied()
    }

    fn get_or_create(&mut self, path: &Path) -> DirHandleId {
        if let Some(id) = self.get(path) {
            return id;
        }
        let id = DirHandleId(self.handles.len());
        self.handles.push(DirHandle {
            local_abspath: path.to_path_buf(),
            wcroot: None,
            parent: None,
            obstructed_file: false,
            locked: false,
            children_cache: None,
        });
        self.by_path.insert(path.to_path_buf(), id);
        id
    }

    fn wcroot_of(&self, id: DirHandleId) -> Option<Arc<WcRoot>> {
        self.handles[id.0].wcroot.clone()
    }
}

/// A resolved path: the directory handle that owns it, the working copy
/// root, and the path relative to that root.
pub(crate) struct ParsedPath {
    pub(crate) handle: DirHandleId,
    pub(crate) wcroot: Arc<WcRoot>,
    pub(crate) relpath: RelPath,
}

pub struct WcDb {
    #[allow(dead_code)]
    mode: OpenMode,
    config: DbConfig,
    auto_upgrade: bool,
    enforce_empty_wq: bool,
    state: RefCell<DirPool>,
}

impl WcDb {
    /// Creates an engine instance. No databases are opened until paths are
    /// first resolved through it.
    pub fn open(
        mode: OpenMode,
        config: DbConfig,
        auto_upgrade: bool,
        enforce_empty_wq: bool,
    ) -> WcDb {
        WcDb {
            mode,
            config,
            auto_upgrade,
            enforce_empty_wq,
            state: RefCell::new(DirPool::default()),
        }
    }

    pub(crate) fn pristine_checksum_kind(&self) -> ChecksumKind {
        self.config.pristine_checksum_kind
    }

    /// Creates a new working copy database under `local_abspath` with a
    /// single BASE directory row for the root. The row is `incomplete`
    /// when `initial_rev` is positive, awaiting population by the first
    /// update.
    pub fn init(
        &self,
        local_abspath: &Path,
        repos_relpath: &str,
        repos_root_url: &str,
        repos_uuid: &str,
        initial_rev: i64,
        depth: crate::node::Depth,
    ) -> DbResult<()> {
        debug_assert!(local_abspath.is_absolute());
        debug_assert!(matches!(
            depth,
            crate::node::Depth::Empty
                | crate::node::Depth::Files
                | crate::node::Depth::Immediates
                | crate::node::Depth::Infinity
        ));

        let admin_dir = local_abspath.join(ADMIN_DIR);
        for dir in [
            admin_dir.clone(),
            admin_dir.join(PRISTINE_DIR),
            admin_dir.join(TEMP_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|err| {
                DbError::io("failed to create administrative area", &dir, err)
            })?;
        }

        let mut sdb = Sdb::open(&admin_dir.join(SDB_FILE), Mode::RwCreate)?;
        schema::create_schema(&mut sdb.conn)?;

        let (repos_id, wc_id) = {
            let repos_id =
                create_repos_id(&sdb.conn, repos_root_url, repos_uuid)?;
            sqlite::prepare(&sdb.conn, Stmt::InsertWcroot)?.execute([])?;
            (repos_id, sdb.conn.last_insert_rowid())
        };

        let presence = if initial_rev > 0 {
            Presence::Incomplete
        } else {
            Presence::Normal
        };
        sqlite::prepare(&sdb.conn, Stmt::InsertBaseNode)?.execute(params![
            wc_id,
            "",
            repos_id,
            repos_relpath,
            Option::<String>::None, // the root has no parent
            presence.token(),
            NodeKind::Dir.token(),
            initial_rev,
            Option::<Vec<u8>>::None,
            Option::<i64>::None,
            Option::<i64>::None,
            Option::<String>::None,
            depth.to_word(),
            Option::<String>::None,
            Option::<i64>::None,
            Option::<String>::None,
        ])?;

        let wcroot = Arc::new(WcRoot {
            abspath: local_abspath.to_path_buf(),
            sdb: Some(RefCell::new(sdb)),
            wc_id,
            format: schema::FORMAT_CURRENT,
        });
        let mut state = self.state.borrow_mut();
        state
            .wcroots
            .insert(local_abspath.to_path_buf(), wcroot.clone());
        let handle = state.get_or_create(local_abspath);
        state.handles[handle.0].wcroot = Some(wcroot);
        Ok(())
    }

    /// Wraps a freshly opened database in a [`WcRoot`], enforcing the
    /// format gate and running the upgrade ladder and the empty-work-queue
    /// check as configured. The root is registered so later resolutions
    /// reuse the handle.
    fn create_wcroot(
        &self,
        wcroot_abspath: &Path,
        sdb: Option<Sdb>,
        observed_format: i32,
        wc_id: i64,
    ) -> DbResult<Arc<WcRoot>> {
        if let Some(existing) =
            self.state.borrow().wcroots.get(wcroot_abspath)
        {
            return Ok(existing.clone());
        }

        let mut format = observed_format;
        if format < schema::FORMAT_OLDEST {
            return Err(DbError::format_too_old(wcroot_abspath, format));
        }
        if format > schema::FORMAT_CURRENT {
            return Err(DbError::format_too_new(wcroot_abspath, format));
        }

        let sdb = match sdb {
            None => {
                // A legacy marker-file working copy. It can be registered,
                // but nothing can be read from it until it is upgraded.
                None
            }
            Some(mut sdb) => {
                if format < schema::FORMAT_BASELINE {
                    return Err(DbError::upgrade_required(
                        wcroot_abspath,
                        format,
                    ));
                }
                if format < schema::FORMAT_CURRENT {
                    if !self.auto_upgrade {
                        return Err(DbError::upgrade_required(
                            wcroot_abspath,
                            format,
                        ));
                    }
                    format = schema::upgrade(&mut sdb.conn, format)?;
                }
                // A non-empty work queue means a previous operation never
                // finished; the metadata cannot be trusted until the queue
                // has been replayed.
                if format >= schema::FORMAT_HAS_WORK_QUEUE
                    && self.enforce_empty_wq
                {
                    work_queue::verify_no_work(&sdb.conn, wcroot_abspath)?;
                }
                Some(RefCell::new(sdb))
            }
        };

        let wcroot = Arc::new(WcRoot {
            abspath: wcroot_abspath.to_path_buf(),
            sdb,
            wc_id,
            format,
        });
        self.state
            .borrow_mut()
            .wcroots
            .insert(wcroot_abspath.to_path_buf(), wcroot.clone());
        Ok(wcroot)
    }

    /// Resolves an absolute path to the working copy root that owns it and
    /// the path relative to that root, climbing ancestor directories until
    /// a database (or a legacy marker, or the filesystem root) is found.
    /// Every directory touched along the way is cached for the lifetime of
    /// the engine.
    #[instrument(skip(self))]
    pub(crate) fn parse_local_abspath(
        &self,
        original_abspath: &Path,
    ) -> DbResult<ParsedPath> {
        debug_assert!(original_abspath.is_absolute());

        // The lucky case: resolved before, return before any I/O.
        {
            let state = self.state.borrow();
            if let Some(id) = state.get(original_abspath) {
                if let Some(wcroot) = state.wcroot_of(id) {
                    let relpath =
                        relpath_under(&wcroot.abspath, original_abspath);
                    return Ok(ParsedPath {
                        handle: id,
                        wcroot,
                        relpath,
                    });
                }
            }
        }

        let on_disk = match fs::symlink_metadata(original_abspath) {
            Ok(metadata) if metadata.is_dir() => OnDisk::Dir,
            Ok(_) => OnDisk::NotDir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                OnDisk::Nothing
            }
            Err(err) => {
                return Err(DbError::io(
                    "failed to examine path",
                    original_abspath,
                    err,
                ))
            }
        };

        let mut build_relpath = String::new();
        // If the original path is not on disk we do not know how many
        // ancestors must be climbed before content appears, so the legacy
        // marker check must run on every level rather than only the first.
        let mut always_check = false;
        let mut obstruction_possible = false;

        let target_dir: PathBuf = if on_disk == OnDisk::Dir {
            // The path may have been *intended* as a file with a directory
            // sitting in its place; the parent's metadata decides, after
            // the handle is built.
            obstruction_possible = true;
            original_abspath.to_path_buf()
        } else {
            // Not a directory, so it cannot contain an administrative
            // area. Strip the basename, remember it for the final relpath.
            let parent = original_abspath.parent().ok_or_else(|| {
                DbError::NotWorkingCopy(original_abspath.to_path_buf())
            })?;
            build_relpath =
                path_component_str(original_abspath.file_name());
            let state = self.state.borrow();
            if let Some(id) = state.get(parent) {
                if let Some(wcroot) = state.wcroot_of(id) {
                    let relpath = relpath_under(&wcroot.abspath, parent)
                        .join(&build_relpath);
                    return Ok(ParsedPath {
                        handle: id,
                        wcroot,
                        relpath,
                    });
                }
            }
            if on_disk == OnDisk::Nothing {
                always_check = true;
            }
            parent.to_path_buf()
        };

        // Climb towards the filesystem root looking for the database.
        let mut current = target_dir.clone();
        let mut moved_upwards = false;
        let mut found_handle: Option<DirHandleId> = None;
        let mut opened: Option<(Sdb, i32)> = None;
        let mut legacy_format = 0;
        loop {
            match try_open_admin_db(&current)? {
                Some((sdb, format)) => {
                    opened = Some((sdb, format));
                    break;
                }
                None => {}
            }

            if !moved_upwards || always_check {
                if let Some(format) = legacy_wc_format(&current)? {
                    legacy_format = format;
                    break;
                }
            }

            let Some(parent) = current.parent() else {
                // Hit the filesystem root without finding a wcroot.
                return Err(DbError::NotWorkingCopy(
                    original_abspath.to_path_buf(),
                ));
            };
            current = parent.to_path_buf();
            moved_upwards = true;

            // A directory in place of a file can only obstruct when the
            // found root is the directory itself.
            obstruction_possible = false;

            let state = self.state.borrow();
            if let Some(id) = state.get(&current) {
                if state.handles[id.0].wcroot.is_some() {
                    found_handle = Some(id);
                    break;
                }
            }
        }

        let wcroot = if let Some(found) = found_handle {
            // An ancestor is already resolved; every directory in between
            // shares its wcroot.
            self.state
                .borrow()
                .wcroot_of(found)
                .expect("found handle lost its wcroot")
        } else if legacy_format == 0 {
            let (sdb, format) = opened.expect("climb ended without database");
            let wc_id = fetch_wc_id(&sdb.conn).map_err(|err| match err {
                DbError::Corrupt(message) => DbError::Corrupt(format!(
                    "{} (for '{}')",
                    message,
                    original_abspath.display()
                )),
                other => other,
            })?;
            self.create_wcroot(&current, Some(sdb), format, wc_id)?
        } else {
            obstruction_possible = false;
            self.create_wcroot(&current, None, legacy_format, UNKNOWN_WC_ID)?
        };

        let dir_relpath = relpath_under(&wcroot.abspath, &target_dir);
        let relpath = dir_relpath.join(&build_relpath);

        let handle = {
            let mut state = self.state.borrow_mut();
            let handle = state.get_or_create(&target_dir);
            if state.handles[handle.0].wcroot.is_none() {
                state.handles[handle.0].wcroot = Some(wcroot.clone());
            }
            handle
        };

        // A (versioned) directory may be obstructing what the parent
        // records as a file.
        if obstruction_possible {
            debug_assert!(!moved_upwards);
            if let Some(parsed) = self.check_file_obstruction(
                handle,
                &target_dir,
                &wcroot,
            )? {
                return Ok(parsed);
            }
        }

        // Create handles for every ancestor between the target and the
        // discovery point, all sharing the wcroot found above.
        if moved_upwards {
            let mut state = self.state.borrow_mut();
            let mut child = handle;
            loop {
                if Some(child) == found_handle
                    || state.handles[child.0].local_abspath == current
                {
                    break;
                }
                let parent_path = match state.handles[child.0]
                    .local_abspath
                    .parent()
                {
                    Some(parent) => parent.to_path_buf(),
                    None => break,
                };
                let parent_id = state.get_or_create(&parent_path);
                if state.handles[parent_id.0].wcroot.is_none() {
                    state.handles[parent_id.0].wcroot = Some(wcroot.clone());
                }
                state.handles[child.0].parent = Some(parent_id);
                child = parent_id;
            }
        }

        Ok(ParsedPath {
            handle,
            wcroot,
            relpath,
        })
    }

    /// The obstruction check: `dir_abspath` resolved to its own root, but
    /// the parent working copy may record a *file* at that name. If it
    /// does, the caller gets the parent's handle and the file's relpath.
    fn check_file_obstruction(
        &self,
        dir_handle: DirHandleId,
        dir_abspath: &Path,
        dir_wcroot: &Arc<WcRoot>,
    ) -> DbResult<Option<ParsedPath>> {
        if dir_abspath != dir_wcroot.abspath() {
            // The directory lives inside its wcroot; nothing above it can
            // be describing this path as a file.
            return Ok(None);
        }
        let parsed_parent = match self.navigate_to_parent(dir_handle) {
            Ok(parsed) => parsed,
            // No parent working copy, so no obstruction.
            Err(DbError::NotWorkingCopy(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        if Arc::ptr_eq(&parsed_parent.wcroot, dir_wcroot) {
            return Ok(None);
        }

        let lookfor_relpath = parsed_parent
            .relpath
            .join(&path_component_str(dir_abspath.file_name()));
        let obstructed = {
            let sdb = parsed_parent.wcroot.sdb()?.borrow();
            determine_obstructed_file(
                &sdb.conn,
                parsed_parent.wcroot.wc_id(),
                &lookfor_relpath,
            )?
        };
        if !obstructed {
            return Ok(None);
        }

        self.state.borrow_mut().handles[dir_handle.0].obstructed_file = true;
        Ok(Some(ParsedPath {
            handle: parsed_parent.handle,
            wcroot: parsed_parent.wcroot,
            relpath: lookfor_relpath,
        }))
    }

    /// Resolves the parent directory of a handle, reusing the cached link
    /// when one exists and recording it otherwise, for cheap repeated
    /// upward traversals.
    pub(crate) fn navigate_to_parent(
        &self,
        handle: DirHandleId,
    ) -> DbResult<ParsedPath> {
        let parent_abspath = {
            let state = self.state.borrow();
            if let Some(parent) = state.handles[handle.0].parent {
                if let Some(wcroot) = state.wcroot_of(parent) {
                    let relpath = relpath_under(
                        &wcroot.abspath,
                        &state.handles[parent.0].local_abspath,
                    );
                    return Ok(ParsedPath {
                        handle: parent,
                        wcroot,
                        relpath,
                    });
                }
            }
            match state.handles[handle.0].local_abspath.parent() {
                Some(parent) => parent.to_path_buf(),
                None => {
                    return Err(DbError::NotWorkingCopy(
                        state.handles[handle.0].local_abspath.clone(),
                    ))
                }
            }
        };
        let parsed = self.parse_local_abspath(&parent_abspath)?;
        self.state.borrow_mut().handles[handle.0].parent =
            Some(parsed.handle);
        Ok(parsed)
    }

    pub(crate) fn handle_abspath(&self, handle: DirHandleId) -> PathBuf {
        self.state.borrow().handles[handle.0].local_abspath.clone()
    }

    /// Drops the cached children snapshot of the directory owning the
    /// mutated node (and of the directory itself, for directory targets).
    pub(crate) fn flush_entries(&self, parsed: &ParsedPath) {
        let mut state = self.state.borrow_mut();
        state.handles[parsed.handle.0].children_cache = None;
        let dir_abspath =
            state.handles[parsed.handle.0].local_abspath.clone();
        if let Some(parent) = dir_abspath.parent() {
            if let Some(parent_id) = state.get(parent) {
                state.handles[parent_id.0].children_cache = None;
            }
        }
    }

    pub(crate) fn cached_children(
        &self,
        handle: DirHandleId,
    ) -> Option<Vec<String>> {
        self.state.borrow().handles[handle.0].children_cache.clone()
    }

    pub(crate) fn cache_children(
        &self,
        handle: DirHandleId,
        children: Vec<String>,
    ) {
        self.state.borrow_mut().handles[handle.0].children_cache =
            Some(children);
    }

    pub(crate) fn handle_locked(&self, handle: DirHandleId) -> bool {
        self.state.borrow().handles[handle.0].locked
    }

    pub(crate) fn set_handle_locked(
        &self,
        handle: DirHandleId,
        locked: bool,
    ) {
        self.state.borrow_mut().handles[handle.0].locked = locked;
    }

    /// Marks this engine instance as owner of the wc-lock on
    /// `local_dir_abspath` without touching the database.
    pub fn mark_locked(&self, local_dir_abspath: &Path) -> DbResult<()> {
        let parsed = self.parse_local_abspath(local_dir_abspath)?;
        self.set_handle_locked(parsed.handle, true);
        Ok(())
    }

    /// Whether this engine instance holds the wc-lock on
    /// `local_dir_abspath` (in-memory state only).
    pub fn own_lock(&self, local_dir_abspath: &Path) -> DbResult<bool> {
        let parsed = self.parse_local_abspath(local_dir_abspath)?;
        Ok(self.handle_locked(parsed.handle))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OnDisk {
    Dir,
    NotDir,
    Nothing,
}

fn path_component_str(name: Option<&std::ffi::OsStr>) -> String {
    name.map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The path of `abspath` relative to `root`, as an internal-form relpath.
/// `abspath` must be `root` or live below it.
pub(crate) fn relpath_under(root: &Path, abspath: &Path) -> RelPath {
    let mut relpath = RelPath::root();
    if let Ok(suffix) = abspath.strip_prefix(root) {
        for component in suffix.components() {
            relpath =
                relpath.join(&component.as_os_str().to_string_lossy());
        }
    }
    relpath
}

/// Attempts to open `<dir>/.svt/wc.db`. A missing or unreadable-as-SQLite
/// file reads as "no working copy here" so the resolver keeps climbing;
/// other failures propagate.
fn try_open_admin_db(dir: &Path) -> DbResult<Option<(Sdb, i32)>> {
    let db_path = dir.join(ADMIN_DIR).join(SDB_FILE);
    let sdb = match Sdb::open(&db_path, Mode::ReadWrite) {
        Ok(sdb) => sdb,
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::CannotOpen =>
        {
            return Ok(None)
        }
        Err(err) => return Err(err.into()),
    };
    match sdb.schema_version() {
        Ok(format) => Ok(Some((sdb, format))),
        // Not readable as a database; treat as not a working copy while
        // climbing.
        Err(_) => Ok(None),
    }
}

/// Reads the format of a legacy marker-file working copy, `None` when the
/// directory carries no markers.
fn legacy_wc_format(dir: &Path) -> DbResult<Option<i32>> {
    for marker in [ADM_ENTRIES, ADM_FORMAT] {
        let path = dir.join(ADMIN_DIR).join(marker);
        match read_version_file(&path) {
            Ok(Some(version)) => return Ok(Some(version)),
            Ok(None) => {}
            Err(err) => {
                return Err(DbError::io(
                    "failed to read legacy format marker",
                    path,
                    err,
                ))
            }
        }
    }
    Ok(None)
}

/// The filesystem has a directory where `local_relpath` points. Consults
/// the metadata for whether a *file* was supposed to be there.
fn determine_obstructed_file(
    conn: &rusqlite::Connection,
    wc_id: i64,
    local_relpath: &RelPath,
) -> DbResult<bool> {
    for stmt in [Stmt::SelectWorkingIsFile, Stmt::SelectBaseIsFile] {
        let result = sqlite::prepare(conn, stmt)?
            .query_row(params![wc_id, local_relpath.as_str()], |row| {
                row.get::<_, bool>(0)
            })
            .optional()?;
        if let Some(is_file) = result {
            return Ok(is_file);
        }
    }
    Ok(false)
}

pub(crate) fn fetch_wc_id(conn: &rusqlite::Connection) -> DbResult<i64> {
    sqlite::prepare(conn, Stmt::SelectWcrootNull)?
        .query_row([], |row| row.get(0))
        .optional()?
        .ok_or_else(|| DbError::Corrupt("missing a row in WCROOT".to_owned()))
}

/// Fetches `(root_url, uuid)` for a repository id. The id came out of a
/// node row, so a missing repository row is corruption.
pub(crate) fn fetch_repos_info(
    conn: &rusqlite::Connection,
    repos_id: i64,
) -> DbResult<(String, String)> {
    sqlite::prepare(conn, Stmt::SelectRepositoryById)?
        .query_row(params![repos_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?
        .ok_or_else(|| {
            DbError::Corrupt(format!(
                "no REPOSITORY table entry for id '{repos_id}'"
            ))
        })
}

/// Returns the repository id for `(root_url, uuid)`, interning a new row
/// when the pair has not been seen. Two racing writers may both attempt
/// the insert; the loser of the race retries the select once and adopts
/// the winner's row.
pub(crate) fn create_repos_id(
    conn: &rusqlite::Connection,
    repos_root_url: &str,
    repos_uuid: &str,
) -> DbResult<i64> {
    let select = |conn: &rusqlite::Connection| -> DbResult<Option<i64>> {
        Ok(sqlite::prepare(conn, Stmt::SelectRepository)?
            .query_row(params![repos_root_url], |row| row.get(0))
            .optional()?)
    };

    if let Some(repos_id) = select(conn)? {
        return Ok(repos_id);
    }

    match sqlite::prepare(conn, Stmt::InsertRepository)?
        .execute(params![repos_root_url, repos_uuid])
    {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            select(conn)?.ok_or_else(|| {
                DbError::Corrupt(format!(
                    "repository row for '{repos_root_url}' vanished"
                ))
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Walks from `local_relpath` upward through BASE rows until one carries
/// repository information, then joins the stripped path segments back on.
pub(crate) fn scan_upwards_for_repos(
    conn: &rusqlite::Connection,
    wc_id: i64,
    local_relpath: &RelPath,
    local_abspath: &Path,
) -> DbResult<(i64, String)> {
    let mut current = local_relpath.clone();
    let mut relpath_suffix = String::new();

    loop {
        let row = sqlite::prepare(conn, Stmt::SelectBaseNode)?
            .query_row(params![wc_id, current.as_str()], |row| {
                Ok((
                    row.get::<_, Option<i64>>("repos_id")?,
                    row.get::<_, Option<String>>("repos_relpath")?,
                ))
            })
            .optional()?;

        let Some((repos_id, repos_relpath)) = row else {
            // If we moved upwards at least once, or we are looking at the
            // root of this wcroot, then something is wrong.
            if !relpath_suffix.is_empty() || local_relpath.is_root() {
                return Err(DbError::Corrupt(format!(
                    "parent(s) of '{}' should have been present",
                    local_relpath.as_str()
                )));
            }
            return Err(DbError::PathNotFound(local_abspath.to_path_buf()));
        };

        if let Some(repos_id) = repos_id {
            // If one is non-NULL, then so should the other be.
            let repos_relpath = repos_relpath.ok_or_else(|| {
                DbError::Corrupt(format!(
                    "BASE row for '{}' has a repos_id but no repos_relpath",
                    current.as_str()
                ))
            })?;
            return Ok((
                repos_id,
                join_relpath(&repos_relpath, &relpath_suffix),
            ));
        }

        let Some((parent, basename)) = current.split() else {
            // Scanned all the way up without finding the information.
            return Err(DbError::Corrupt(format!(
                "parent(s) of '{}' should have repository information",
                local_relpath.as_str()
            )));
        };
        relpath_suffix = join_relpath(basename, &relpath_suffix);
        current = parent;
    }
}

// Row snapshots of the three per-node tables, shared by the read and
// write paths.

pub(crate) struct BaseNodeRow {
    pub(crate) repos_id: Option<i64>,
    pub(crate) repos_relpath: Option<String>,
    pub(crate) presence: Presence,
    pub(crate) kind: NodeKind,
    pub(crate) revision: Option<i64>,
    pub(crate) checksum: Option<String>,
    pub(crate) translated_size: Option<i64>,
    pub(crate) changed_rev: Option<i64>,
    pub(crate) changed_date: Option<i64>,
    pub(crate) changed_author: Option<String>,
    pub(crate) depth: Option<String>,
    pub(crate) target: Option<String>,
    pub(crate) last_mod_time: Option<i64>,
    pub(crate) properties: Option<Vec<u8>>,
    pub(crate) lock: Option<LockInfo>,
}

pub(crate) struct WorkingNodeRow {
    pub(crate) presence: Presence,
    pub(crate) kind: NodeKind,
    pub(crate) checksum: Option<String>,
    pub(crate) translated_size: Option<i64>,
    pub(crate) changed_rev: Option<i64>,
    pub(crate) changed_date: Option<i64>,
    pub(crate) changed_author: Option<String>,
    pub(crate) depth: Option<String>,
    pub(crate) target: Option<String>,
    pub(crate) copyfrom_repos_id: Option<i64>,
    pub(crate) copyfrom_repos_path: Option<String>,
    pub(crate) copyfrom_revision: Option<i64>,
    pub(crate) moved_here: bool,
    pub(crate) last_mod_time: Option<i64>,
    pub(crate) properties: Option<Vec<u8>>,
}

pub(crate) struct ActualNodeRow {
    pub(crate) prop_reject: Option<String>,
    pub(crate) changelist: Option<String>,
    pub(crate) conflict_old: Option<String>,
    pub(crate) conflict_new: Option<String>,
    pub(crate) conflict_working: Option<String>,
    pub(crate) properties: Option<Vec<u8>>,
}

impl ActualNodeRow {
    pub(crate) fn has_text_or_prop_conflict(&self) -> bool {
        self.prop_reject.is_some()
            || self.conflict_old.is_some()
            || self.conflict_new.is_some()
            || self.conflict_working.is_some()
    }
}

pub(crate) fn base_node_row(
    conn: &rusqlite::Connection,
    wc_id: i64,
    local_relpath: &RelPath,
    with_lock: bool,
) -> DbResult<Option<BaseNodeRow>> {
    let stmt = if with_lock {
        Stmt::SelectBaseNodeWithLock
    } else {
        Stmt::SelectBaseNode
    };
    let row = sqlite::prepare(conn, stmt)?
        .query_row(params![wc_id, local_relpath.as_str()], |row| {
            Ok(BaseNodeRow {
                repos_id: row.get("repos_id")?,
                repos_relpath: row.get("repos_relpath")?,
                presence: sqlite::row_presence(row, "presence")?,
                kind: sqlite::row_kind(row, "kind")?,
                revision: row.get("revnum")?,
                checksum: row.get("checksum")?,
                translated_size: row.get("translated_size")?,
                changed_rev: row.get("changed_rev")?,
                changed_date: row.get("changed_date")?,
                changed_author: row.get("changed_author")?,
                depth: row.get("depth")?,
                target: row.get("symlink_target")?,
                last_mod_time: row.get("last_mod_time")?,
                properties: row.get("properties")?,
                lock: if with_lock {
                    row.get::<_, Option<String>>("lock_token")?.map(
                        |token| {
                            Ok::<_, rusqlite::Error>(LockInfo {
                                token,
                                owner: row.get("lock_owner")?,
                                comment: row.get("lock_comment")?,
                                date: row.get("lock_date")?,
                            })
                        },
                    )
                    .transpose()?
                } else {
                    None
                },
            })
        })
        .optional()?;
    Ok(row)
}

pub(crate) fn working_node_row(
    conn: &rusqlite::Connection,
    wc_id: i64,
    local_relpath: &RelPath,
) -> DbResult<Option<WorkingNodeRow>> {
    let row = sqlite::prepare(conn, Stmt::SelectWorkingNode)?
        .query_row(params![wc_id, local_relpath.as_str()], |row| {
            Ok(WorkingNodeRow {
                presence: sqlite::row_presence(row, "presence")?,
                kind: sqlite::row_kind(row, "kind")?,
                checksum: row.get("checksum")?,
                translated_size: row.get("translated_size")?,
                changed_rev: row.get("changed_rev")?,
                changed_date: row.get("changed_date")?,
                changed_author: row.get("changed_author")?,
                depth: row.get("depth")?,
                target: row.get("symlink_target")?,
                copyfrom_repos_id: row.get("copyfrom_repos_id")?,
                copyfrom_repos_path: row.get("copyfrom_repos_path")?,
                copyfrom_revision: row.get("copyfrom_revnum")?,
                moved_here: row
                    .get::<_, Option<bool>>("moved_here")?
                    .unwrap_or(false),
                last_mod_time: row.get("last_mod_time")?,
                properties: row.get("properties")?,
            })
        })
        .optional()?;
    Ok(row)
}

pub(crate) fn actual_node_row(
    conn: &rusqlite::Connection,
    wc_id: i64,
    local_relpath: &RelPath,
) -> DbResult<Option<ActualNodeRow>> {
    let row = sqlite::prepare(conn, Stmt::SelectActualNode)?
        .query_row(params![wc_id, local_relpath.as_str()], |row| {
            Ok(ActualNodeRow {
                prop_reject: row.get("prop_reject")?,
                changelist: row.get("changelist")?,
                conflict_old: row.get("conflict_old")?,
                conflict_new: row.get("conflict_new")?,
                conflict_working: row.get("conflict_working")?,
                properties: row.get("properties")?,
            })
        })
        .optional()?;
    Ok(row)
}
