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

use std::fmt::{Debug, Error, Formatter};
use std::path::{Path, PathBuf};

/// A path relative to a working copy root, in internal form: components
/// separated by '/', no leading or trailing slash. The root itself is the
/// empty string. This is the form stored in the `local_relpath` and
/// `parent_relpath` database columns.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelPath {
    value: String,
}

impl Debug for RelPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        f.write_fmt(format_args!("{:?}", &self.value))
    }
}

impl RelPath {
    pub fn root() -> Self {
        RelPath {
            value: String::new(),
        }
    }

    /// The full string form used internally and in the database, not for
    /// presenting to users (where we may want the platform's separator).
    pub fn from_internal_string(value: &str) -> Self {
        debug_assert!(!value.starts_with('/'));
        debug_assert!(!value.ends_with('/'));
        RelPath {
            value: value.to_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    /// The final component, or "" for the root.
    pub fn basename(&self) -> &str {
        match self.value.rfind('/') {
            None => &self.value,
            Some(i) => &self.value[i + 1..],
        }
    }

    pub fn parent(&self) -> Option<RelPath> {
        if self.is_root() {
            return None;
        }
        match self.value.rfind('/') {
            None => Some(RelPath::root()),
            Some(i) => Some(RelPath {
                value: self.value[..i].to_owned(),
            }),
        }
    }

    /// Splits off the final component. Returns `None` for the root.
    pub fn split(&self) -> Option<(RelPath, &str)> {
        self.parent().map(|parent| (parent, self.basename()))
    }

    /// Joins `entry` onto this path. `entry` may itself contain multiple
    /// components; joining "" returns this path unchanged.
    pub fn join(&self, entry: &str) -> RelPath {
        debug_assert!(!entry.starts_with('/'));
        debug_assert!(!entry.ends_with('/'));
        if entry.is_empty() {
            return self.clone();
        }
        if self.is_root() {
            RelPath {
                value: entry.to_owned(),
            }
        } else {
            RelPath {
                value: format!("{}/{}", self.value, entry),
            }
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.value.split('/').filter(|c| !c.is_empty())
    }

    /// Whether `other` is this path or lives below it.
    pub fn contains(&self, other: &RelPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.value == self.value
            || (other.value.starts_with(&self.value)
                && other.value.as_bytes()[self.value.len()] == b'/')
    }

    /// The filesystem path of this node below `root`.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        if self.is_root() {
            root.to_path_buf()
        } else {
            let mut result = root.to_path_buf();
            for component in self.components() {
                result.push(component);
            }
            result
        }
    }
}

impl From<&str> for RelPath {
    fn from(value: &str) -> Self {
        RelPath::from_internal_string(value)
    }
}

/// Joins two internal-form relpath strings.
pub fn join_relpath(base: &str, entry: &str) -> String {
    if base.is_empty() {
        entry.to_owned()
    } else if entry.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{entry}")
    }
}

/// The final component of an internal-form relpath string.
pub fn relpath_basename(relpath: &str) -> &str {
    match relpath.rfind('/') {
        None => relpath,
        Some(i) => &relpath[i + 1..],
    }
}

/// The parent of an internal-form relpath string ("" for a single
/// component).
pub fn relpath_dirname(relpath: &str) -> &str {
    match relpath.rfind('/') {
        None => "",
        Some(i) => &relpath[..i],
    }
}
