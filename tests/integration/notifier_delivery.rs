//! Alert delivery through the notification service

use std::collections::HashMap;

use tally::config::{AppConfig, parse_monitor_config};
use tally::notifier::{EmailNotifier, Notifier, NotifierContext, mailer_for};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::MONITOR_CONFIG;

fn config(api: Option<String>) -> AppConfig {
    AppConfig::from_lookup(|var| match var {
        "TALLY_ENVIRONMENT" => Some("Staging".to_string()),
        "TALLY_SERVICE_NAME" => Some("billing".to_string()),
        "TALLY_STORAGE" => Some("memory".to_string()),
        "NOTIFICATION_API" => api.clone(),
        "NOTIFICATION_SECRET" => Some("s3cret".to_string()),
        _ => None,
    })
    .unwrap()
}

fn breach() -> HashMap<String, String> {
    HashMap::from([(
        "count".to_string(),
        "http.response.500 has exceeded threshold by 2.000 in staging".to_string(),
    )])
}

#[tokio::test]
async fn test_configured_service_receives_rendered_alert() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/notify"))
        .and(header("authorization", "Bearer s3cret"))
        .and(body_json(serde_json::json!({
            "subject": "http.response.500 error limit exceeded in billing",
            "body": "billing\nSLA breached in staging\nhttp.response.500 has exceeded threshold by 2.000 in staging\n",
            "recipients": ["ops@example.com"]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = config(Some(format!("{}/api/notify", mock_server.uri())));
    let monitors = parse_monitor_config(MONITOR_CONFIG, &config.service_name).unwrap();
    let mailer = mailer_for(&config).unwrap();

    let mut notifier = EmailNotifier::new(
        mailer,
        &monitors[0].triggers[0],
        &NotifierContext::from(&config),
    );

    notifier.send(&breach()).await.unwrap();
    // Still inside the suppression window
    notifier.send(&breach()).await.unwrap();
}

#[tokio::test]
async fn test_rejection_surfaces_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = config(Some(mock_server.uri()));
    let monitors = parse_monitor_config(MONITOR_CONFIG, &config.service_name).unwrap();
    let mut notifier = EmailNotifier::new(
        mailer_for(&config).unwrap(),
        &monitors[0].triggers[0],
        &NotifierContext::from(&config),
    );

    let err = notifier.send(&breach()).await.unwrap_err();
    assert_eq!(err.to_string(), "notification rejected with status 503");
}

#[tokio::test]
async fn test_without_service_alerts_are_logged() {
    let config = config(None);
    let monitors = parse_monitor_config(MONITOR_CONFIG, &config.service_name).unwrap();
    let mut notifier = EmailNotifier::new(
        mailer_for(&config).unwrap(),
        &monitors[0].triggers[1],
        &NotifierContext::from(&config),
    );

    assert!(notifier.send(&breach()).await.is_ok());
}
