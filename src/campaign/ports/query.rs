//! Lookup options, list filters, and keyset pagination.
//!
//! Every option struct composes its populated fields with AND; a default
//! (empty) struct matches every row.

use crate::campaign::domain::{
    Campaign, CampaignId, CampaignState, Changeset, ChangesetCheckState, ChangesetEvent,
    ChangesetEventId, ChangesetEventKey, ChangesetId, ChangesetJob, ChangesetJobId,
    ChangesetReviewState, ChangesetState, ExternalServiceType, PatchId, PatchSetId, RepoId,
};

/// Page size used when a request leaves the limit at zero.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Keyset pagination window over ascending identifiers.
///
/// `cursor` is the first identifier to include (`0` starts at the
/// beginning). `limit` of `0` selects [`DEFAULT_LIST_LIMIT`]; a negative
/// limit disables paging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// First identifier to include.
    pub cursor: i64,
    /// Maximum number of rows to return.
    pub limit: i64,
}

impl PageRequest {
    /// Requests the first `limit` rows.
    #[must_use]
    pub const fn first(limit: i64) -> Self {
        Self { cursor: 0, limit }
    }

    /// Requests `limit` rows starting at `cursor`.
    #[must_use]
    pub const fn starting_at(cursor: i64, limit: i64) -> Self {
        Self { cursor, limit }
    }

    /// Requests every row in one page.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            cursor: 0,
            limit: -1,
        }
    }

    /// Returns the number of rows a page holds, or `None` when unbounded.
    #[must_use]
    pub const fn page_size(self) -> Option<i64> {
        match self.limit {
            0 => Some(DEFAULT_LIST_LIMIT),
            limit if limit < 0 => None,
            limit => Some(limit),
        }
    }

    /// Returns how many rows to fetch: one more than the page holds, so the
    /// surplus row can become the next cursor.
    #[must_use]
    pub const fn fetch_limit(self) -> Option<i64> {
        match self.page_size() {
            Some(size) => Some(size.saturating_add(1)),
            None => None,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Rows in ascending identifier order.
    pub items: Vec<T>,
    /// Cursor of the following page, `None` on the last page.
    pub next: Option<i64>,
}

impl<T> Page<T> {
    /// Builds a page from rows fetched with [`PageRequest::fetch_limit`].
    ///
    /// When the surplus row is present it is removed and its identifier
    /// becomes the next cursor.
    pub fn from_overfetch(
        mut rows: Vec<T>,
        request: PageRequest,
        id_of: impl Fn(&T) -> i64,
    ) -> Self {
        let overfetched = request
            .fetch_limit()
            .and_then(|fetch| usize::try_from(fetch).ok())
            .is_some_and(|fetch| rows.len() == fetch);
        let next = if overfetched {
            rows.pop().map(|surplus| id_of(&surplus))
        } else {
            None
        };
        Self { items: rows, next }
    }

    /// Returns `true` when another page follows.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Filter for listing and counting campaigns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignFilter {
    /// Only campaigns containing this changeset.
    pub changeset_id: Option<ChangesetId>,
    /// Open/closed restriction.
    pub state: CampaignState,
    /// Only campaigns with (`true`) or without (`false`) a patch set.
    pub has_patch_set: Option<bool>,
}

impl CampaignFilter {
    /// Returns `true` when the campaign passes every populated predicate.
    #[must_use]
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.changeset_id
            .is_none_or(|id| campaign.changeset_ids.contains(&id))
            && self.state.admits(campaign)
            && self
                .has_patch_set
                .is_none_or(|wanted| campaign.has_patch_set() == wanted)
    }
}

/// Options selecting a single campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetCampaignOpts {
    /// Campaign identifier.
    pub id: Option<CampaignId>,
    /// Patch set the campaign publishes.
    pub patch_set_id: Option<PatchSetId>,
}

impl GetCampaignOpts {
    /// Selects a campaign by identifier.
    #[must_use]
    pub const fn by_id(id: CampaignId) -> Self {
        Self {
            id: Some(id),
            patch_set_id: None,
        }
    }

    /// Returns `true` when the campaign passes every populated predicate.
    #[must_use]
    pub fn matches(&self, campaign: &Campaign) -> bool {
        self.id.is_none_or(|id| campaign.id == id)
            && self
                .patch_set_id
                .is_none_or(|id| campaign.patch_set_id == Some(id))
    }
}

/// Filter for listing and counting patches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchFilter {
    /// Only patches of this patch set.
    pub patch_set_id: Option<PatchSetId>,
    /// Only patches with a non-empty diff.
    pub only_with_diff: bool,
    /// Only patches not yet published as a changeset in this campaign.
    pub only_unpublished_in_campaign: Option<CampaignId>,
}

/// Host-side identity of a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalChangesetRef {
    /// Identifier on the code host.
    pub external_id: String,
    /// Code host.
    pub service_type: ExternalServiceType,
}

/// Head branches of one repository on one code host.
///
/// Webhooks identify a changeset only by its head branch; this selects the
/// changesets they refer to. Empty refs never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetHeadRefs {
    /// Repository the changesets target.
    pub repo_id: RepoId,
    /// Code host the webhook came from.
    pub service_type: ExternalServiceType,
    /// Head branches named by the webhook.
    pub refs: Vec<String>,
}

impl ChangesetHeadRefs {
    /// Returns the non-empty refs.
    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.refs
            .iter()
            .map(String::as_str)
            .filter(|branch| !branch.is_empty())
    }

    /// Returns `true` when the changeset's head branch is one of the refs.
    #[must_use]
    pub fn matches(&self, changeset: &Changeset) -> bool {
        changeset.repo_id == self.repo_id
            && changeset.external_service_type() == self.service_type
            && self
                .branches()
                .any(|branch| branch == changeset.external_branch)
    }
}

/// Options selecting a single changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChangesetOpts {
    /// Changeset identifier.
    pub id: Option<ChangesetId>,
    /// Repository the changeset targets.
    pub repo_id: Option<RepoId>,
    /// Identity on the code host.
    pub external: Option<ExternalChangesetRef>,
}

impl GetChangesetOpts {
    /// Selects a changeset by identifier.
    #[must_use]
    pub const fn by_id(id: ChangesetId) -> Self {
        Self {
            id: Some(id),
            repo_id: None,
            external: None,
        }
    }

    /// Returns `true` when the changeset passes every populated predicate.
    #[must_use]
    pub fn matches(&self, changeset: &Changeset) -> bool {
        self.id.is_none_or(|id| changeset.id == id)
            && self.repo_id.is_none_or(|id| changeset.repo_id == id)
            && self.external.as_ref().is_none_or(|external| {
                changeset.external_id == external.external_id
                    && changeset.external_service_type() == external.service_type
            })
    }
}

/// Filter for listing and counting changesets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetFilter {
    /// Only changesets belonging to this campaign.
    pub campaign_id: Option<CampaignId>,
    /// Only these changesets; empty means no restriction.
    pub ids: Vec<ChangesetId>,
    /// Exclude changesets the code host reported as deleted.
    pub without_deleted: bool,
    /// Only changesets in this host state.
    pub external_state: Option<ChangesetState>,
    /// Only changesets with this review verdict.
    pub external_review_state: Option<ChangesetReviewState>,
    /// Only changesets with this CI verdict.
    pub external_check_state: Option<ChangesetCheckState>,
}

impl ChangesetFilter {
    /// Returns `true` when the changeset passes every populated predicate.
    #[must_use]
    pub fn matches(&self, changeset: &Changeset) -> bool {
        self.campaign_id
            .is_none_or(|id| changeset.campaign_ids.contains(&id))
            && (self.ids.is_empty() || self.ids.contains(&changeset.id))
            && !(self.without_deleted && changeset.is_deleted())
            && self
                .external_state
                .is_none_or(|state| changeset.external_state == Some(state))
            && self
                .external_review_state
                .is_none_or(|state| changeset.external_review_state == Some(state))
            && self
                .external_check_state
                .is_none_or(|state| changeset.external_check_state == Some(state))
    }
}

/// Options selecting a single changeset event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChangesetEventOpts {
    /// Event identifier.
    pub id: Option<ChangesetEventId>,
    /// Natural key of the event.
    pub key: Option<ChangesetEventKey>,
}

impl GetChangesetEventOpts {
    /// Returns `true` when the event passes every populated predicate.
    #[must_use]
    pub fn matches(&self, event: &ChangesetEvent) -> bool {
        self.id.is_none_or(|id| event.id == id)
            && self.key.as_ref().is_none_or(|key| {
                event.changeset_id == key.changeset_id
                    && event.kind == key.kind
                    && event.key == key.key
            })
    }
}

/// Filter for listing and counting changeset events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesetEventFilter {
    /// Only events of these changesets; empty means no restriction.
    pub changeset_ids: Vec<ChangesetId>,
}

impl ChangesetEventFilter {
    /// Returns `true` when the event passes every populated predicate.
    #[must_use]
    pub fn matches(&self, event: &ChangesetEvent) -> bool {
        self.changeset_ids.is_empty() || self.changeset_ids.contains(&event.changeset_id)
    }
}

/// Options selecting a single changeset job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetChangesetJobOpts {
    /// Job identifier.
    pub id: Option<ChangesetJobId>,
    /// Campaign the job publishes.
    pub campaign_id: Option<CampaignId>,
    /// Patch the job publishes.
    pub patch_id: Option<PatchId>,
    /// Changeset the job produced.
    pub changeset_id: Option<ChangesetId>,
}

impl GetChangesetJobOpts {
    /// Selects a job by identifier.
    #[must_use]
    pub const fn by_id(id: ChangesetJobId) -> Self {
        Self {
            id: Some(id),
            campaign_id: None,
            patch_id: None,
            changeset_id: None,
        }
    }

    /// Returns `true` when the job passes every populated predicate.
    #[must_use]
    pub fn matches(&self, job: &ChangesetJob) -> bool {
        self.id.is_none_or(|id| job.id == id)
            && self.campaign_id.is_none_or(|id| job.campaign_id == id)
            && self.patch_id.is_none_or(|id| job.patch_id == id)
            && self
                .changeset_id
                .is_none_or(|id| job.changeset_id == Some(id))
    }
}

/// Filter for listing and counting changeset jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangesetJobFilter {
    /// Only jobs of this campaign.
    pub campaign_id: Option<CampaignId>,
    /// Only jobs whose campaign publishes this patch set.
    pub patch_set_id: Option<PatchSetId>,
}
