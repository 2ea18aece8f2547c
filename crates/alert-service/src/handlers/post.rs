//! Post handler: HTTP POSTs the event JSON to a URL.

use std::collections::HashMap;

use alert_core::{Event, Handler};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::error;

use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostHandlerConfig {
    pub url: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

pub struct PostHandler {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HashMap<String, String>,
}

impl PostHandler {
    pub fn new(config: PostHandlerConfig) -> Result<Self, ServiceError> {
        let url = reqwest::Url::parse(&config.url)
            .map_err(|err| ServiceError::InvalidConfig(format!("invalid post url: {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            headers: config.headers,
        })
    }

    async fn post(&self, event: &Event) -> anyhow::Result<()> {
        let mut request = self.client.post(self.url.clone()).json(&event.alert_data());
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Handler for PostHandler {
    async fn handle(&self, event: &Event) {
        if let Err(err) = self.post(event).await {
            error!(
                url = %self.url,
                event = %event.state.id,
                error = %err,
                "post handler failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_core::{EventState, Level};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> Event {
        Event::new(
            "t",
            EventState {
                id: "e1".to_string(),
                message: "boom".to_string(),
                level: Level::Critical,
                ..EventState::default()
            },
        )
    }

    #[tokio::test]
    async fn test_posts_alert_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alert"))
            .and(header("x-token", "secret"))
            .and(body_partial_json(serde_json::json!({
                "id": "e1",
                "level": "CRITICAL",
                "message": "boom",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let handler = PostHandler::new(PostHandlerConfig {
            url: format!("{}/alert", server.uri()),
            headers: [("x-token".to_string(), "secret".to_string())].into(),
        })
        .unwrap();
        handler.handle(&event()).await;
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = PostHandler::new(PostHandlerConfig {
            url: "not a url".to_string(),
            headers: HashMap::new(),
        });
        assert!(matches!(result, Err(ServiceError::InvalidConfig(_))));
    }
}
