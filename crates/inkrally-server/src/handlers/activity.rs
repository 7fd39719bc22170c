//! Word-count ingest: detail records, daily totals, live sprint scores,
//! and the analytics projections.

use chrono::{NaiveDate, TimeZone};
use inkrally_protocol::message::{DetailEntry, Response, Status};
use inkrally_protocol::Push;

use crate::db;
use crate::server_state::ServerState;
use crate::session::AuthedUser;
use crate::store::{self, StoreError};

/// Client-supplied `local_date` is trusted only within this window around
/// the server's current date; bad clocks fall back to the derived date.
const LOCAL_DATE_WINDOW_DAYS: i64 = 2;

/// Analytics heatmap depth.
const ANALYTICS_WINDOW_DAYS: u64 = 365;

/// Detail view depth.
const DETAIL_LIMIT: i64 = 20;

/// An all-zero delta is dropped without a reply; clients treat sync as
/// fire-and-forget.
pub fn sync_data(
    state: &ServerState,
    user: &AuthedUser,
    increment: i64,
    duration: i64,
    timestamp: Option<i64>,
    local_date: Option<&str>,
) -> Result<Option<Response>, StoreError> {
    if increment <= 0 && duration <= 0 {
        return Ok(None);
    }

    let now = store::timestamp_now();
    let end_time = timestamp.unwrap_or(now);
    let report_date = bin_date(local_date, end_time, now);

    let sprint_push = {
        let mut conn = db::lock(&state.db);
        let tx = conn.transaction()?;
        store::insert_detail_record(&tx, user.user_id, increment, duration, "client_sync", end_time)?;
        store::upsert_daily_report(&tx, user.user_id, &report_date, increment)?;

        // A positive delta inside an active sprint also moves the room's
        // live score; non-positive deltas never touch it.
        let mut sprint_group = None;
        if increment > 0 {
            if let Some(group_id) = store::membership_group_of(&tx, user.user_id)? {
                if let Some(group) = store::group_by_id(&tx, group_id)? {
                    if group.sprint_active {
                        store::upsert_sprint_score(&tx, group_id, user.user_id, increment)?;
                        sprint_group = Some(group_id);
                    }
                }
            }
        }
        tx.commit()?;

        match sprint_group {
            Some(group_id) => Some((group_id, store::member_ids(&conn, group_id)?)),
            None => None,
        }
    };

    if let Some((group_id, member_ids)) = sprint_push {
        state
            .registry
            .send_many(&member_ids, &Push::SprintStatusPush { group_id });
    }

    Ok(Some(Response::generic(Status::Ok, Some("Synced".into()))))
}

pub fn get_analytics(state: &ServerState, user: &AuthedUser) -> Result<Response, StoreError> {
    let today = chrono::Local::now().date_naive();
    let since = today
        .checked_sub_days(chrono::Days::new(ANALYTICS_WINDOW_DAYS))
        .unwrap_or(today)
        .format("%Y-%m-%d")
        .to_string();

    let conn = db::lock(&state.db);
    let heatmap = store::heatmap_since(&conn, user.user_id, &since)?
        .into_iter()
        .collect();
    Ok(Response::Analytics { heatmap })
}

pub fn get_details(state: &ServerState, user: &AuthedUser) -> Result<Response, StoreError> {
    let conn = db::lock(&state.db);
    let data = store::recent_details(&conn, user.user_id, DETAIL_LIMIT)?
        .into_iter()
        .map(|row| DetailEntry {
            time: format_minute(row.end_time),
            increment: row.word_increment,
            duration: row.duration_seconds,
        })
        .collect();
    Ok(Response::Details { data })
}

// ---------------------------------------------------------------------------
// Date binning
// ---------------------------------------------------------------------------

/// Pick the daily-report bin: the client's `local_date` when plausible
/// (multi-timezone clients), else the date derived from the record time.
fn bin_date(local_date: Option<&str>, end_time: i64, now: i64) -> String {
    if let Some(raw) = local_date {
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            let today = date_of(now);
            if (date - today).num_days().abs() <= LOCAL_DATE_WINDOW_DAYS {
                return date.format("%Y-%m-%d").to_string();
            }
            tracing::debug!(
                supplied = raw,
                "local_date outside the accepted window, using derived date"
            );
        }
    }
    date_of(end_time).format("%Y-%m-%d").to_string()
}

fn date_of(ts: i64) -> NaiveDate {
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_else(|| chrono::Local::now().date_naive())
}

fn format_minute(ts: i64) -> String {
    chrono::Local
        .timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}
