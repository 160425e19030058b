//! `GET /api/search/`: unified full-text search across word-level and
//! recording-metadata FTS5 indexes.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::{SearchFilters, SearchResult};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    /// FTS5's own tokenizer already tolerates partial-word prefixes; this
    /// flag is accepted for client compatibility but doesn't change the
    /// query plan.
    #[serde(default)]
    pub fuzzy: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<SearchResult>>> {
    if query.q.trim().is_empty() {
        return Err(AppError::BadInput("q must not be empty".to_string()));
    }

    let filters = SearchFilters {
        start_date: query.start_date,
        end_date: query.end_date,
        limit: query.limit.unwrap_or(50),
    };

    let results = state.db.search(&query.q, &filters).map_err(AppError::Internal)?;
    Ok(Json(results))
}
