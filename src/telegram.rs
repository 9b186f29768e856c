use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const API_URL: &str = "https://api.telegram.org";

const PARSE_MODE: &str = "MarkdownV2";

/// What kind of failure Telegram reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Bot is not allowed to post (not an admin, kicked, ...).
    Forbidden,
    /// Malformed request, usually broken markup.
    BadRequest,
    RateLimited,
    Other,
}

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("telegram API error {code}: {description}")]
    Api {
        code: u16,
        description: String,
        retry_after: Option<u64>,
    },
}

impl From<reqwest::Error> for TelegramError {
    // request urls carry the bot token
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

impl TelegramError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Api { code: 403, .. } => FailureKind::Forbidden,
            Self::Api { code: 400, .. } => FailureKind::BadRequest,
            Self::Api { code: 429, .. } => FailureKind::RateLimited,
            _ => FailureKind::Other,
        }
    }
}

/// Chat the posts end up in.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), TelegramError>;

    async fn send_photo(&self, url: &str, caption: &str) -> Result<(), TelegramError>;

    async fn send_video(&self, url: &str, caption: &str) -> Result<(), TelegramError>;
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
}

#[derive(Serialize)]
struct SendVideo<'a> {
    chat_id: &'a str,
    video: &'a str,
    caption: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct TelegramErrorResponse {
    description: String,
    error_code: u16,
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Bot API client bound to one chat.
pub struct TelegramClient {
    token: String,
    chat_id: String,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            token,
            chat_id,
            api_url: API_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn call<T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<(), TelegramError> {
        let res = self
            .client
            .post(format!("{}/bot{}/{}", self.api_url, self.token, method))
            .json(body)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            debug!(method, "telegram call succeeded");
            return Ok(());
        }

        let text = res.text().await.unwrap_or_default();
        let tgres = serde_json::from_str(&text).unwrap_or_else(|_| TelegramErrorResponse {
            error_code: status.as_u16(),
            description: status
                .canonical_reason()
                .unwrap_or("(reddit2tg) Internal Error")
                .into(),
            parameters: None,
        });

        let retry_after = tgres.parameters.and_then(|p| p.retry_after);
        if status == StatusCode::TOO_MANY_REQUESTS {
            debug!(method, ?retry_after, "telegram asked to slow down");
        }

        Err(TelegramError::Api {
            code: tgres.error_code,
            description: tgres.description,
            retry_after,
        })
    }
}

#[async_trait]
impl Destination for TelegramClient {
    async fn send_message(&self, text: &str) -> Result<(), TelegramError> {
        self.call("sendMessage", &SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: PARSE_MODE,
        })
        .await
    }

    async fn send_photo(&self, url: &str, caption: &str) -> Result<(), TelegramError> {
        self.call("sendPhoto", &SendPhoto {
            chat_id: &self.chat_id,
            photo: url,
            caption,
            parse_mode: PARSE_MODE,
        })
        .await
    }

    async fn send_video(&self, url: &str, caption: &str) -> Result<(), TelegramError> {
        self.call("sendVideo", &SendVideo {
            chat_id: &self.chat_id,
            video: url,
            caption,
            parse_mode: PARSE_MODE,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> TelegramClient {
        TelegramClient::new("42:secret".into(), "@foxes".into()).with_api_url(server.uri())
    }

    #[tokio::test]
    async fn sends_markdown_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot42:secret/sendMessage"))
            .and(body_json(json!({
                "chat_id": "@foxes",
                "text": "*hi*",
                "parse_mode": "MarkdownV2",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_message("*hi*").await.unwrap();
    }

    #[tokio::test]
    async fn sends_video_with_caption() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot42:secret/sendVideo"))
            .and(body_json(json!({
                "chat_id": "@foxes",
                "video": "https://v.redd.it/x.mp4",
                "caption": "*fox*",
                "parse_mode": "MarkdownV2",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": {} })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_video("https://v.redd.it/x.mp4", "*fox*").await.unwrap();
    }

    #[tokio::test]
    async fn classifies_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot is not a member of the channel chat",
            })))
            .mount(&server)
            .await;

        let err = client(&server).send_photo("https://i.redd.it/a.jpg", "x").await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::Forbidden);
        assert!(err.to_string().contains("not a member"));
    }

    #[tokio::test]
    async fn classifies_rate_limit_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 7",
                "parameters": { "retry_after": 7 },
            })))
            .mount(&server)
            .await;

        let err = client(&server).send_message("x").await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::RateLimited);
        assert!(matches!(err, TelegramError::Api { retry_after: Some(7), .. }));
    }

    #[tokio::test]
    async fn non_json_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("<html>bad</html>"))
            .mount(&server)
            .await;

        let err = client(&server).send_message("x").await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::BadRequest);
    }

    #[tokio::test]
    async fn transport_error_hides_token() {
        // nothing listens on the discard port
        let tg = TelegramClient::new("42:SECRETTOKEN".into(), "@foxes".into())
            .with_api_url("http://127.0.0.1:9");

        let err = tg.send_message("x").await.unwrap_err();

        assert!(matches!(err, TelegramError::Http(_)));
        assert_eq!(err.kind(), FailureKind::Other);
        assert!(!err.to_string().contains("SECRETTOKEN"));
        assert!(!format!("{err:?}").contains("SECRETTOKEN"));
    }

    #[test]
    fn other_codes() {
        let err = TelegramError::Api {
            code: 502,
            description: "Bad Gateway".into(),
            retry_after: None,
        };

        assert_eq!(err.kind(), FailureKind::Other);
    }
}
