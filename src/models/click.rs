use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Click {
    pub id: i64,
    pub link_id: i64,
    pub clicked_at: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub country: String,
    pub region: String,
    pub city: String,
}

#[derive(Debug, Clone)]
pub struct NewClick {
    pub link_id: i64,
    pub clicked_at: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub country: String,
    pub region: String,
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct CountryStat {
    pub country: String,
    pub count: i64,
}

/// Per-link statistics, recomputed from click events on every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickStats {
    pub total_clicks: i64,
    pub unique_ips: i64,
    pub top_countries: Vec<CountryStat>,
    pub recent_clicks: Vec<Click>,
}
