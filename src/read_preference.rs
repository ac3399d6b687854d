//! Read preference: which members of a deployment are eligible to serve a read, and in what
//! order of preference.

use std::{collections::BTreeMap, time::Duration};

use crate::error::{Error, Result};

/// A set of tag key/value pairs a server's descriptor must contain (as a subset) to be eligible.
/// An empty tag set matches any server.
pub type TagSet = BTreeMap<String, String>;

/// The minimum acceptable `maxStalenessSeconds` the driver will enforce: below this, the
/// heartbeat interval dominates staleness measurement error and the guarantee becomes
/// meaningless.
pub const SMALLEST_MAX_STALENESS_SECONDS: u64 = 90;

/// Which members of a replica set (or which mongos behind a sharded cluster) are eligible to
/// serve a read, and the tag-set/staleness constraints narrowing that set further.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadPreference {
    /// Only the primary. The default; does not support tag sets or staleness.
    Primary,
    /// The primary if available, falling back to a secondary.
    PrimaryPreferred {
        /// Tag sets tried in order; the first that matches at least one server is used.
        tag_sets: Option<Vec<TagSet>>,
        /// Maximum acceptable staleness.
        max_staleness: Option<Duration>,
    },
    /// Any available secondary.
    Secondary {
        /// Tag sets tried in order.
        tag_sets: Option<Vec<TagSet>>,
        /// Maximum acceptable staleness.
        max_staleness: Option<Duration>,
    },
    /// A secondary if available, falling back to the primary.
    SecondaryPreferred {
        /// Tag sets tried in order.
        tag_sets: Option<Vec<TagSet>>,
        /// Maximum acceptable staleness.
        max_staleness: Option<Duration>,
    },
    /// Any member, chosen purely by the latency window.
    Nearest {
        /// Tag sets tried in order.
        tag_sets: Option<Vec<TagSet>>,
        /// Maximum acceptable staleness.
        max_staleness: Option<Duration>,
    },
}

impl ReadPreference {
    pub(crate) fn from_parts(
        mode: &str,
        tag_sets: Option<Vec<TagSet>>,
        max_staleness: Option<Duration>,
    ) -> Result<Self> {
        let pref = match mode.to_ascii_lowercase().as_str() {
            "primary" => {
                if tag_sets.is_some() || max_staleness.is_some() {
                    return Err(Error::invalid_argument(
                        "primary read preference does not support tag sets or max staleness",
                    ));
                }
                ReadPreference::Primary
            }
            "primarypreferred" => ReadPreference::PrimaryPreferred {
                tag_sets,
                max_staleness,
            },
            "secondary" => ReadPreference::Secondary {
                tag_sets: Some(tag_sets.unwrap_or_else(|| vec![TagSet::new()])),
                max_staleness,
            },
            "secondarypreferred" => ReadPreference::SecondaryPreferred {
                tag_sets,
                max_staleness,
            },
            "nearest" => ReadPreference::Nearest {
                tag_sets,
                max_staleness,
            },
            other => {
                return Err(Error::invalid_argument(format!(
                    "unrecognized read preference mode: {}",
                    other
                )))
            }
        };
        pref.validate()?;
        Ok(pref)
    }

    fn validate(&self) -> Result<()> {
        if let Some(staleness) = self.max_staleness() {
            if staleness.as_secs() < SMALLEST_MAX_STALENESS_SECONDS {
                return Err(Error::invalid_argument(format!(
                    "maxStalenessSeconds must be at least {}",
                    SMALLEST_MAX_STALENESS_SECONDS
                )));
            }
        }
        Ok(())
    }

    /// Whether this mode can ever select the primary.
    pub fn allows_primary(&self) -> bool {
        matches!(
            self,
            ReadPreference::Primary | ReadPreference::PrimaryPreferred { .. }
        )
    }

    /// The configured tag sets, if any.
    pub fn tag_sets(&self) -> Option<&[TagSet]> {
        match self {
            ReadPreference::Primary => None,
            ReadPreference::PrimaryPreferred { tag_sets, .. }
            | ReadPreference::Secondary { tag_sets, .. }
            | ReadPreference::SecondaryPreferred { tag_sets, .. }
            | ReadPreference::Nearest { tag_sets, .. } => tag_sets.as_deref(),
        }
    }

    /// The configured max staleness, if any.
    pub fn max_staleness(&self) -> Option<Duration> {
        match self {
            ReadPreference::Primary => None,
            ReadPreference::PrimaryPreferred { max_staleness, .. }
            | ReadPreference::Secondary { max_staleness, .. }
            | ReadPreference::SecondaryPreferred { max_staleness, .. }
            | ReadPreference::Nearest { max_staleness, .. } => *max_staleness,
        }
    }
}

/// A criteria passed per-operation to override the client's default read preference, or to
/// pin the operation to a specific address (used by cursor getMore/killCursors, which must
/// target the server that owns the cursor).
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionCriteria {
    /// Select using a read preference.
    ReadPreference(ReadPreference),
    /// Select a single, already-known server address, bypassing the selection algorithm
    /// entirely.
    PinnedAddress(crate::options::ServerAddress),
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(pref: ReadPreference) -> Self {
        SelectionCriteria::ReadPreference(pref)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secondary_defaults_to_empty_tag_set() {
        let pref = ReadPreference::from_parts("secondary", None, None).unwrap();
        assert_eq!(pref.tag_sets(), Some(&[TagSet::new()][..]));
    }

    #[test]
    fn primary_rejects_tag_sets() {
        let err = ReadPreference::from_parts("primary", Some(vec![TagSet::new()]), None);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_too_small_max_staleness() {
        let err = ReadPreference::from_parts("nearest", None, Some(Duration::from_secs(1)));
        assert!(err.is_err());
    }
}
