// src/football/mod.rs
//! Logical football data requests.
//!
//! Thin typed wrappers that translate "today's fixtures", "predictions for
//! fixture X" and friends into endpoint + params and route them through the
//! shared [`Governor`]. Live data is requested with high priority.

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::api::{params, Governor, Invalidation, Priority, RequestOptions, RequestParams};
use crate::error::GovernorResult;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct FootballApi {
    governor: Governor,
}

impl FootballApi {
    pub fn new(governor: Governor) -> Self {
        Self { governor }
    }

    async fn get(&self, endpoint: &str, params: RequestParams, priority: Priority) -> GovernorResult<Arc<Value>> {
        self.governor
            .request(endpoint, &params, RequestOptions::with_priority(priority))
            .await
    }

    pub async fn fixtures_by_date(&self, date: NaiveDate) -> GovernorResult<Arc<Value>> {
        let date = date.format(DATE_FORMAT).to_string();
        self.get("/fixtures", params([("date", date)]), Priority::Normal).await
    }

    pub async fn todays_fixtures(&self) -> GovernorResult<Arc<Value>> {
        self.fixtures_by_date(Utc::now().date_naive()).await
    }

    pub async fn live_fixtures(&self) -> GovernorResult<Arc<Value>> {
        self.get("/fixtures", params([("live", "all")]), Priority::High).await
    }

    pub async fn fixture(&self, fixture_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/fixtures", params([("id", fixture_id)]), Priority::Normal).await
    }

    pub async fn head_to_head(&self, home: u64, away: u64, last: Option<u32>) -> GovernorResult<Arc<Value>> {
        let mut p = params([("h2h", format!("{}-{}", home, away))]);
        if let Some(last) = last {
            p.insert("last".to_string(), last.to_string());
        }
        self.get("/fixtures/headtohead", p, Priority::Normal).await
    }

    pub async fn predictions(&self, fixture_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/predictions", params([("fixture", fixture_id)]), Priority::Normal).await
    }

    pub async fn fixture_statistics(&self, fixture_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/fixtures/statistics", params([("fixture", fixture_id)]), Priority::Normal)
            .await
    }

    pub async fn fixture_events(&self, fixture_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/fixtures/events", params([("fixture", fixture_id)]), Priority::Normal).await
    }

    pub async fn fixture_lineups(&self, fixture_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/fixtures/lineups", params([("fixture", fixture_id)]), Priority::Normal).await
    }

    pub async fn odds(&self, fixture_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/odds", params([("fixture", fixture_id)]), Priority::Normal).await
    }

    pub async fn standings(&self, league: u32, season: u16) -> GovernorResult<Arc<Value>> {
        self.get(
            "/standings",
            params([("league", league.to_string()), ("season", season.to_string())]),
            Priority::Normal,
        )
        .await
    }

    pub async fn team(&self, team_id: u64) -> GovernorResult<Arc<Value>> {
        self.get("/teams", params([("id", team_id)]), Priority::Normal).await
    }

    pub async fn team_statistics(&self, league: u32, season: u16, team_id: u64) -> GovernorResult<Arc<Value>> {
        self.get(
            "/teams/statistics",
            params([
                ("league", league.to_string()),
                ("season", season.to_string()),
                ("team", team_id.to_string()),
            ]),
            Priority::Normal,
        )
        .await
    }

    pub async fn leagues(&self, country: Option<&str>) -> GovernorResult<Arc<Value>> {
        let mut p = params([("current", "true")]);
        if let Some(country) = country {
            p.insert("country".to_string(), country.to_string());
        }
        self.get("/leagues", p, Priority::Normal).await
    }

    pub async fn players(&self, team_id: u64, season: u16, page: Option<u32>) -> GovernorResult<Arc<Value>> {
        let mut p = params([("team", team_id.to_string()), ("season", season.to_string())]);
        if let Some(page) = page {
            p.insert("page".to_string(), page.to_string());
        }
        self.get("/players", p, Priority::Normal).await
    }

    pub async fn top_scorers(&self, league: u32, season: u16) -> GovernorResult<Arc<Value>> {
        self.get(
            "/players/topscorers",
            params([("league", league.to_string()), ("season", season.to_string())]),
            Priority::Normal,
        )
        .await
    }

    /// User-triggered refresh: drops every cached response.
    pub fn force_refresh(&self) -> usize {
        self.governor.invalidate(Invalidation::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{cache_key, Upstream};
    use crate::config::GovernorConfig;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUpstream {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn fetch(&self, endpoint: &str, params: &RequestParams) -> GovernorResult<Value> {
            let key = cache_key(endpoint, params);
            self.seen.lock().unwrap().push(key.clone());
            Ok(json!({ "get": key, "errors": [], "response": [] }))
        }
    }

    fn api() -> (FootballApi, Arc<RecordingUpstream>) {
        let upstream = Arc::new(RecordingUpstream::default());
        let config = GovernorConfig {
            min_request_interval_ms: 0,
            ..GovernorConfig::default()
        };
        let governor = Governor::new(config, upstream.clone()).unwrap();
        (FootballApi::new(governor), upstream)
    }

    #[tokio::test]
    async fn test_logical_requests_map_to_endpoints() {
        let (api, upstream) = api();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        api.fixtures_by_date(date).await.unwrap();
        api.live_fixtures().await.unwrap();
        api.head_to_head(33, 34, Some(5)).await.unwrap();
        api.predictions(1035037).await.unwrap();
        api.standings(39, 2023).await.unwrap();
        api.team_statistics(39, 2023, 33).await.unwrap();
        api.players(33, 2023, None).await.unwrap();

        let seen = upstream.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "/fixtures?date=2024-01-15",
                "/fixtures?live=all",
                "/fixtures/headtohead?h2h=33-34&last=5",
                "/predictions?fixture=1035037",
                "/standings?league=39&season=2023",
                "/teams/statistics?league=39&season=2023&team=33",
                "/players?season=2023&team=33",
            ]
        );
    }

    #[tokio::test]
    async fn test_force_refresh_refetches() {
        let (api, upstream) = api();

        api.odds(42).await.unwrap();
        api.odds(42).await.unwrap();
        assert_eq!(api.force_refresh(), 1);
        api.odds(42).await.unwrap();

        assert_eq!(upstream.seen.lock().unwrap().len(), 2);
    }
}
