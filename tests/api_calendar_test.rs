//! Integration tests for the calendar API endpoints

mod test_utils;

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use serial_test::serial;
    use tower::util::ServiceExt;

    use kazador_sync::api::public::calendar::SyncRunSummary;

    use crate::test_utils::{
        FakeCalendar, FakeConnector, body_to_string, seed_source, test_app, test_db,
    };

    fn sync_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .body(Body::empty())
            .unwrap()
    }

    /// Tests a manual sync run returns the run summary
    #[tokio::test]
    #[serial]
    async fn it_runs_sync_and_returns_summary() {
        let test = test_db().await;
        let first = seed_source(&test.db, "src-a", "user-1").await;
        let second = seed_source(&test.db, "src-b", "user-1").await;
        let calendar = FakeCalendar::new();
        calendar.remote_upsert(json!({
            "id": "evt_1",
            "summary": "Radio session",
            "start": {"dateTime": "2025-03-04T10:00:00Z"},
            "end": {"dateTime": "2025-03-04T11:00:00Z"}
        }));
        let connector = FakeConnector::with(&first.account.id, &calendar);
        let app = test_app(&test.db, connector);

        let response = app.oneshot(sync_request("/api/calendar/sync")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_to_string(response.into_body()).await;
        let summary: SyncRunSummary = serde_json::from_str(&body).unwrap();
        assert_eq!(summary.sources_processed, 2);
        assert_eq!(summary.pulled_inserted, 1);
        // No calendar is registered for the second account
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].source_id, second.source.id);
    }

    /// Tests limiting a manual sync run to one source
    #[tokio::test]
    #[serial]
    async fn it_runs_sync_for_one_source() {
        let test = test_db().await;
        let first = seed_source(&test.db, "src-a", "user-1").await;
        seed_source(&test.db, "src-b", "user-1").await;
        let calendar = FakeCalendar::new();
        let app = test_app(&test.db, FakeConnector::with(&first.account.id, &calendar));

        let response = app
            .oneshot(sync_request("/api/calendar/sync?source_id=src-a"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_to_string(response.into_body()).await;
        assert!(body.contains("\"sources_processed\":1"));
        assert!(body.contains("\"errors\":[]"));
    }

    /// Tests syncing an unknown source returns 404
    #[tokio::test]
    #[serial]
    async fn it_returns_404_for_unknown_source() {
        let test = test_db().await;
        let app = test_app(&test.db, FakeConnector::default());

        let response = app
            .oneshot(sync_request("/api/calendar/sync?source_id=missing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Tests calendar sync returns 405 for GET request
    #[tokio::test]
    #[serial]
    async fn it_returns_405_for_get_request() {
        let test = test_db().await;
        let app = test_app(&test.db, FakeConnector::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
