use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

// ── Users ──────────────────────────────────────────────────────────

/// A row of `dim_users`. Dates are `YYYY-MM-DD` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub user_id: String,
    pub niche: Option<String>,
    pub attribution: Option<String>,
    pub country: Option<String>,
    pub ideal_user_status: Option<String>,
    pub stan_customer_status: Option<String>,
    pub stan_goal_multiple_choice: Option<String>,
    pub total_gmv_in_first_30d_binned: Option<String>,
    pub count_unique_store_visits_in_first_30d_binned: Option<String>,
    pub trial_date_key: String,
    pub live_date_key: Option<String>,
    pub customer_date_key: Option<String>,
    pub churn_date_key: Option<String>,
}

pub fn upsert_user(conn: &Connection, user: &UserRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO dim_users (
            user_id, niche, attribution, country, ideal_user_status,
            stan_customer_status, stan_goal_multiple_choice,
            total_gmv_in_first_30d_binned, count_unique_store_visits_in_first_30d_binned,
            trial_date_key, live_date_key, customer_date_key, churn_date_key
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(user_id) DO UPDATE SET
           niche = excluded.niche,
           attribution = excluded.attribution,
           country = excluded.country,
           ideal_user_status = excluded.ideal_user_status,
           stan_customer_status = excluded.stan_customer_status,
           stan_goal_multiple_choice = excluded.stan_goal_multiple_choice,
           total_gmv_in_first_30d_binned = excluded.total_gmv_in_first_30d_binned,
           count_unique_store_visits_in_first_30d_binned = excluded.count_unique_store_visits_in_first_30d_binned,
           trial_date_key = excluded.trial_date_key,
           live_date_key = excluded.live_date_key,
           customer_date_key = excluded.customer_date_key,
           churn_date_key = excluded.churn_date_key",
        params![
            user.user_id,
            user.niche,
            user.attribution,
            user.country,
            user.ideal_user_status,
            user.stan_customer_status,
            user.stan_goal_multiple_choice,
            user.total_gmv_in_first_30d_binned,
            user.count_unique_store_visits_in_first_30d_binned,
            user.trial_date_key,
            user.live_date_key,
            user.customer_date_key,
            user.churn_date_key,
        ],
    )?;
    Ok(())
}

pub fn count_users(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM dim_users", [], |row| row.get(0))
}

// ── Activity ───────────────────────────────────────────────────────

/// A day of activity for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityRecord {
    pub user_id: String,
    pub date_key: String,
    pub store_visits: i64,
    pub leads: i64,
    pub referrals: i64,
    pub gmv: f64,
}

/// Insert a day of activity, replacing any earlier counts for that day.
pub fn upsert_activity(conn: &Connection, activity: &ActivityRecord) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO fact_user_activity (user_id, date_key, store_visits, leads, referrals, gmv)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id, date_key) DO UPDATE SET
           store_visits = excluded.store_visits,
           leads = excluded.leads,
           referrals = excluded.referrals,
           gmv = excluded.gmv",
        params![
            activity.user_id,
            activity.date_key,
            activity.store_visits,
            activity.leads,
            activity.referrals,
            activity.gmv,
        ],
    )?;
    Ok(())
}

// ── Import ─────────────────────────────────────────────────────────

/// Contents of a JSON import file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseImport {
    pub users: Vec<UserRecord>,
    pub activity: Vec<ActivityRecord>,
}

/// Load an import in one transaction: users first, so activity can
/// reference them.
pub fn import(conn: &mut Connection, data: &WarehouseImport) -> Result<(usize, usize), rusqlite::Error> {
    let tx = conn.transaction()?;
    for user in &data.users {
        upsert_user(&tx, user)?;
    }
    for activity in &data.activity {
        upsert_activity(&tx, activity)?;
    }
    tx.commit()?;
    Ok((data.users.len(), data.activity.len()))
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
pub(crate) fn user(id: &str, niche: &str, trial: &str) -> UserRecord {
    UserRecord {
        user_id: id.to_string(),
        niche: Some(niche.to_string()),
        country: Some("US".to_string()),
        trial_date_key: trial.to_string(),
        ..Default::default()
    }
}
