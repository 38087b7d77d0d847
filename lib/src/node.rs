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

//! The node model shared by all three layers: node kinds, row presences,
//! checkout depths, and the effective status computed from the layering
//! precedence rule.

/// What kind of object a node row describes. `Subdir` is a legacy marker
/// ("the parent holds a stub row for a child directory owning its own
/// database") and is folded to `Dir` at read time.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum NodeKind {
    File,
    Dir,
    Symlink,
    Subdir,
    Unknown,
}

impl NodeKind {
    pub fn token(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
            NodeKind::Symlink => "symlink",
            NodeKind::Subdir => "subdir",
            NodeKind::Unknown => "unknown",
        }
    }

    pub fn from_token(token: &str) -> Option<NodeKind> {
        match token {
            "file" => Some(NodeKind::File),
            "dir" => Some(NodeKind::Dir),
            "symlink" => Some(NodeKind::Symlink),
            "subdir" => Some(NodeKind::Subdir),
            "unknown" => Some(NodeKind::Unknown),
            _ => None,
        }
    }
}

/// The lifecycle token stored on a BASE or WORKING row. We only decode
/// presence values from the database; these are a subset of all the status
/// values.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Presence {
    /// Real content is present.
    Normal,
    /// Exists server-side but the user lacks authorization.
    Absent,
    /// The user excluded it from the checkout.
    Excluded,
    /// Known to not exist at this revision (tombstone).
    NotPresent,
    /// Placeholder awaiting population.
    Incomplete,
    /// A BASE row shadowed by a WORKING delete.
    BaseDeleted,
}

impl Presence {
    pub fn token(self) -> &'static str {
        match self {
            Presence::Normal => "normal",
            Presence::Absent => "absent",
            Presence::Excluded => "excluded",
            Presence::NotPresent => "not-present",
            Presence::Incomplete => "incomplete",
            Presence::BaseDeleted => "base-deleted",
        }
    }

    pub fn from_token(token: &str) -> Option<Presence> {
        match token {
            "normal" => Some(Presence::Normal),
            "absent" => Some(Presence::Absent),
            "excluded" => Some(Presence::Excluded),
            "not-present" => Some(Presence::NotPresent),
            "incomplete" => Some(Presence::Incomplete),
            "base-deleted" => Some(Presence::BaseDeleted),
            _ => None,
        }
    }
}

/// The checkout depth recorded on directory rows.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Depth {
    Unknown,
    Exclude,
    Empty,
    Files,
    Immediates,
    Infinity,
}

impl Depth {
    pub fn to_word(self) -> &'static str {
        match self {
            Depth::Unknown => "unknown",
            Depth::Exclude => "exclude",
            Depth::Empty => "empty",
            Depth::Files => "files",
            Depth::Immediates => "immediates",
            Depth::Infinity => "infinity",
        }
    }

    pub fn from_word(word: &str) -> Depth {
        match word {
            "exclude" => Depth::Exclude,
            "empty" => Depth::Empty,
            "files" => Depth::Files,
            "immediates" => Depth::Immediates,
            "infinity" => Depth::Infinity,
            _ => Depth::Unknown,
        }
    }
}

/// The effective state of a node as reported by the read operations. This
/// is a superset of [`Presence`]: the WORKING layer turns row presences
/// into `Added`/`Deleted`, and the scan operations refine `Added` into
/// `Copied`/`MovedHere`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Status {
    Normal,
    Added,
    MovedHere,
    Copied,
    Deleted,
    Obstructed,
    ObstructedAdd,
    ObstructedDelete,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
}

/// Computes the effective status of a node from its BASE and WORKING rows.
/// WORKING overrides BASE; the legacy `subdir` kind maps the result into
/// the obstructed family. At least one of the two rows must be present.
pub fn effective_status(
    base: Option<(Presence, NodeKind)>,
    working: Option<(Presence, NodeKind)>,
) -> Status {
    if let Some((presence, kind)) = working {
        debug_assert!(matches!(
            presence,
            Presence::Normal
                | Presence::NotPresent
                | Presence::BaseDeleted
                | Presence::Incomplete
        ));
        return match presence {
            Presence::Incomplete => Status::Incomplete,
            Presence::NotPresent | Presence::BaseDeleted => {
                // The caller should scan upwards to detect whether this
                // deletion is a move-away or a plain delete. A subdir kind
                // means the child's own data is obstructed.
                if kind == NodeKind::Subdir {
                    Status::ObstructedDelete
                } else {
                    Status::Deleted
                }
            }
            _ => {
                // The caller should scan upwards to detect whether this
                // addition is a plain add, a copy, or a move destination.
                if kind == NodeKind::Subdir {
                    Status::ObstructedAdd
                } else {
                    Status::Added
                }
            }
        };
    }

    let (presence, kind) = base.expect("node has neither BASE nor WORKING row");
    match presence {
        Presence::Normal => {
            if kind == NodeKind::Subdir {
                // We should have read a row from the child's own database;
                // the child directory is missing or carries its own state.
                Status::Obstructed
            } else {
                Status::Normal
            }
        }
        Presence::Absent => Status::Absent,
        Presence::Excluded => Status::Excluded,
        Presence::NotPresent => Status::NotPresent,
        Presence::Incomplete => Status::Incomplete,
        Presence::BaseDeleted => Status::Deleted,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn tokens_round_trip() {
        for kind in [
            NodeKind::File,
            NodeKind::Dir,
            NodeKind::Symlink,
            NodeKind::Subdir,
            NodeKind::Unknown,
        ] {
            assert_eq!(NodeKind::from_token(kind.token()), Some(kind));
        }
        for presence in [
            Presence::Normal,
            Presence::Absent,
            Presence::Excluded,
            Presence::NotPresent,
            Presence::Incomplete,
            Presence::BaseDeleted,
        ] {
            assert_eq!(Presence::from_token(presence.token()), Some(presence));
        }
        assert_eq!(NodeKind::from_token("directory"), None);
        assert_eq!(Presence::from_token("not_present"), None);
    }

    #[test]
    fn depth_words() {
        assert_eq!(Depth::from_word("infinity"), Depth::Infinity);
        assert_eq!(Depth::from_word(Depth::Files.to_word()), Depth::Files);
        assert_eq!(Depth::from_word("bogus"), Depth::Unknown);
    }

    #[test_case(Presence::Normal, Status::Normal)]
    #[test_case(Presence::Absent, Status::Absent)]
    #[test_case(Presence::Excluded, Status::Excluded)]
    #[test_case(Presence::NotPresent, Status::NotPresent)]
    #[test_case(Presence::Incomplete, Status::Incomplete)]
    fn base_only(presence: Presence, expected: Status) {
        assert_eq!(
            effective_status(Some((presence, NodeKind::File)), None),
            expected
        );
    }

    #[test_case(Presence::Normal, Status::Added)]
    #[test_case(Presence::NotPresent, Status::Deleted)]
    #[test_case(Presence::BaseDeleted, Status::Deleted)]
    #[test_case(Presence::Incomplete, Status::Incomplete)]
    fn working_overrides_base(presence: Presence, expected: Status) {
        assert_eq!(
            effective_status(
                Some((Presence::Normal, NodeKind::File)),
                Some((presence, NodeKind::File)),
            ),
            expected
        );
    }

    #[test]
    fn subdir_folds_to_obstructed() {
        assert_eq!(
            effective_status(Some((Presence::Normal, NodeKind::Subdir)), None),
            Status::Obstructed
        );
        assert_eq!(
            effective_status(None, Some((Presence::Normal, NodeKind::Subdir))),
            Status::ObstructedAdd
        );
        assert_eq!(
            effective_status(
                Some((Presence::Normal, NodeKind::Subdir)),
                Some((Presence::NotPresent, NodeKind::Subdir)),
            ),
            Status::ObstructedDelete
        );
    }
}
