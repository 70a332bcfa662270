//! Aggregate job progress computed in the database.

use crate::campaign::{
    domain::{BackgroundProcessStatus, CampaignId},
    ports::{StoreError, StoreResult},
};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Array, Bool, Int8, Nullable, Text};

#[derive(QueryableByName)]
struct StatusRow {
    #[diesel(sql_type = Bool)]
    canceled: bool,
    #[diesel(sql_type = Int8)]
    total: i64,
    #[diesel(sql_type = Int8)]
    pending: i64,
    #[diesel(sql_type = Int8)]
    completed: i64,
    #[diesel(sql_type = Nullable<Array<Text>>)]
    errors: Option<Vec<String>>,
}

pub(super) fn campaign_status(
    conn: &mut PgConnection,
    campaign_id: CampaignId,
) -> StoreResult<BackgroundProcessStatus> {
    // Campaign jobs cannot be canceled; the column keeps the row shape
    // shared with other background processes.
    let row = diesel::sql_query(concat!(
        "SELECT false AS canceled, ",
        "COUNT(*) AS total, ",
        "COUNT(*) FILTER (WHERE finished_at IS NULL) AS pending, ",
        "COUNT(*) FILTER (WHERE finished_at IS NOT NULL) AS completed, ",
        "array_agg(error ORDER BY id) FILTER (WHERE error != '') AS errors ",
        "FROM changeset_jobs WHERE campaign_id = $1",
    ))
    .bind::<Int8, _>(campaign_id.into_inner())
    .get_result::<StatusRow>(conn)
    .map_err(StoreError::persistence)?;

    Ok(BackgroundProcessStatus {
        canceled: row.canceled,
        total: row.total,
        pending: row.pending,
        completed: row.completed,
        process_errors: row.errors.unwrap_or_default(),
    })
}
