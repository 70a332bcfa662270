//! Diesel schema for campaign coordination persistence.

diesel::table! {
    /// Computed patch sets awaiting attachment to a campaign.
    patch_sets (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// User that computed the patch set.
        user_id -> Int4,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Campaigns and their namespace ownership.
    campaigns (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// Display name.
        name -> Text,
        /// Free-form description.
        description -> Text,
        /// Branch the published changesets are pushed to.
        branch -> Nullable<Text>,
        /// User that created the campaign.
        author_id -> Int4,
        /// Owning user namespace, exclusive with `namespace_org_id`.
        namespace_user_id -> Nullable<Int4>,
        /// Owning organization namespace, exclusive with `namespace_user_id`.
        namespace_org_id -> Nullable<Int4>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
        /// Attached changesets as a JSON object keyed by id.
        changeset_ids -> Jsonb,
        /// Patch set being published.
        patch_set_id -> Nullable<Int8>,
        /// Closing timestamp.
        closed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Per-repository diffs of a patch set.
    patches (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// Owning patch set.
        patch_set_id -> Int8,
        /// Target repository.
        repo_id -> Int4,
        /// Commit the diff applies to.
        rev -> Text,
        /// Ref the published changeset targets.
        base_ref -> Text,
        /// Unified diff.
        diff -> Text,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Pull or merge requests on external code hosts.
    changesets (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// Target repository.
        repo_id -> Int4,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
        /// Host-specific payload.
        metadata -> Jsonb,
        /// Owning campaigns as a JSON object keyed by id.
        campaign_ids -> Jsonb,
        /// Identifier on the code host.
        external_id -> Text,
        /// Code host discriminator for `metadata`.
        external_service_type -> Text,
        /// Head branch on the code host.
        external_branch -> Text,
        /// Deletion time reported by the code host.
        external_deleted_at -> Nullable<Timestamptz>,
        /// Last modification reported by the code host.
        external_updated_at -> Nullable<Timestamptz>,
        /// Lifecycle state on the code host.
        external_state -> Nullable<Text>,
        /// Review verdict on the code host.
        external_review_state -> Nullable<Text>,
        /// CI verdict on the code host.
        external_check_state -> Nullable<Text>,
    }
}

diesel::table! {
    /// Events observed on changesets.
    changeset_events (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// Owning changeset.
        changeset_id -> Int8,
        /// Event kind and discriminator for `metadata`.
        kind -> Text,
        /// Host-provided key.
        key -> Text,
        /// First time the store saw the event.
        created_at -> Timestamptz,
        /// Last time the store wrote the event.
        updated_at -> Timestamptz,
        /// Kind-specific payload.
        metadata -> Jsonb,
    }
}

diesel::table! {
    /// Jobs publishing patches as changesets.
    changeset_jobs (id) {
        /// Store-assigned identifier.
        id -> Int8,
        /// Campaign being published.
        campaign_id -> Int8,
        /// Patch being published.
        patch_id -> Int8,
        /// Changeset produced by the job.
        changeset_id -> Nullable<Int8>,
        /// Branch pushed to the code host.
        branch -> Text,
        /// Failure message of the last attempt.
        error -> Nullable<Text>,
        /// Claim timestamp; NULL while pending.
        started_at -> Nullable<Timestamptz>,
        /// Completion timestamp.
        finished_at -> Nullable<Timestamptz>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(patches -> patch_sets (patch_set_id));
diesel::joinable!(campaigns -> patch_sets (patch_set_id));
diesel::joinable!(changeset_events -> changesets (changeset_id));
diesel::joinable!(changeset_jobs -> campaigns (campaign_id));
diesel::joinable!(changeset_jobs -> patches (patch_id));
diesel::joinable!(changeset_jobs -> changesets (changeset_id));

diesel::allow_tables_to_appear_in_same_query!(
    patch_sets,
    campaigns,
    patches,
    changesets,
    changeset_events,
    changeset_jobs,
);
