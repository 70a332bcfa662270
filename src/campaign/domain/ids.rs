//! Identifier newtypes for campaign records and their external collaborators.
//!
//! Store-assigned identifiers wrap the `BIGSERIAL` primary keys. The value
//! `0` denotes a record that has not been persisted yet; every persisted row
//! carries a positive, ascending identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wraps a raw identifier value.
            #[must_use]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn into_inner(self) -> $inner {
                self.0
            }

            /// Returns `true` when the identifier refers to an unsaved record.
            #[must_use]
            pub const fn is_unset(self) -> bool {
                self.0 == 0
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a campaign.
    CampaignId(i64)
);
numeric_id!(
    /// Identifier of a patch set.
    PatchSetId(i64)
);
numeric_id!(
    /// Identifier of a single patch inside a patch set.
    PatchId(i64)
);
numeric_id!(
    /// Identifier of a changeset tracked on an external code host.
    ChangesetId(i64)
);
numeric_id!(
    /// Identifier of an observed changeset event.
    ChangesetEventId(i64)
);
numeric_id!(
    /// Identifier of a changeset publication job.
    ChangesetJobId(i64)
);
numeric_id!(
    /// Identifier of a repository owned by the repository service.
    RepoId(i32)
);
numeric_id!(
    /// Identifier of a user owned by the account service.
    UserId(i32)
);
numeric_id!(
    /// Identifier of an organization owned by the account service.
    OrgId(i32)
);
