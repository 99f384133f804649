use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::OllamaConfig,
    error::AppError,
    models::chat::{ChatMessage, Generated, ModelStatus, Usage},
    services::{
        endpoint,
        relay::{ChatModel, ModelEvent, ModelRequest, ModelStream},
    },
};

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: Arc<Url>,
    default_model: Arc<str>,
    keep_alive: Arc<str>,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build model client: {err}")))?;
        Ok(Self {
            http,
            base_url: Arc::new(config.base_url.clone()),
            default_model: config.model.as_str().into(),
            keep_alive: config.keep_alive.as_str().into(),
            timeout: config.timeout,
        })
    }

    /// Builds a request against the configured defaults, overriding model and keep-alive when given.
    pub fn request(
        &self,
        messages: Vec<ChatMessage>,
        model: Option<String>,
        keep_alive: Option<String>,
    ) -> ModelRequest {
        ModelRequest {
            model: model.unwrap_or_else(|| self.default_model.to_string()),
            messages,
            keep_alive: keep_alive.unwrap_or_else(|| self.keep_alive.to_string()),
        }
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        endpoint(&self.base_url, path)
    }

    /// One-shot generation constrained to JSON, optionally to a JSON schema.
    pub async fn generate_structured(
        &self,
        messages: Vec<ChatMessage>,
        model: Option<String>,
        schema: Option<Value>,
    ) -> Result<Generated, AppError> {
        let request = self.request(messages, model, None);
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            keep_alive: &request.keep_alive,
            format: Some(schema.unwrap_or_else(|| Value::String("json".into()))),
        };
        let response = self
            .http
            .post(self.url("/api/chat")?)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(upstream_status(status, &detail));
        }
        let reply: ChatReply = response
            .json()
            .await
            .map_err(|err| AppError::upstream(format!("model server sent an unexpected reply: {err}")))?;
        if let Some(error) = reply.error {
            return Err(AppError::upstream(format!("model server error: {error}")));
        }

        let content = reply.message.map(|m| m.content).unwrap_or_default();
        let result = serde_json::from_str(&content).unwrap_or(Value::String(content));
        Ok(Generated {
            result,
            usage: Usage {
                prompt_tokens: reply.prompt_eval_count,
                completion_tokens: reply.eval_count,
                total_duration_ms: reply.total_duration / 1_000_000,
            },
        })
    }

    /// Installed models; an unreachable server reports `running: false` instead of failing.
    pub async fn status(&self) -> ModelStatus {
        let models = match self.fetch_models().await {
            Ok(models) => Some(models),
            Err(err) => {
                debug!("model server not reachable: {err}");
                None
            }
        };
        let running = models.is_some();
        let models = models.unwrap_or_default();
        ModelStatus {
            running,
            model_count: models.len(),
            models,
            default_model: self.default_model.to_string(),
        }
    }

    async fn fetch_models(&self) -> Result<Vec<String>, AppError> {
        let response = self
            .http
            .get(self.url("/api/tags")?)
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let tags: TagsReply = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn stream_chat(&self, request: ModelRequest) -> Result<ModelStream, AppError> {
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            keep_alive: &request.keep_alive,
            format: None,
        };
        debug!(model = %request.model, turns = request.messages.len(), "opening model stream");
        let send = self.http.post(self.url("/api/chat")?).json(&body).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                AppError::upstream(format!(
                    "model server did not answer within {}s",
                    self.timeout.as_secs()
                ))
            })??;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(upstream_status(status, &detail));
        }
        Ok(ndjson_events(response.bytes_stream(), self.timeout))
    }
}

fn upstream_status(status: reqwest::StatusCode, body: &str) -> AppError {
    let detail = serde_json::from_str::<ErrorReply>(body)
        .map(|reply| reply.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    warn!(%status, "model server refused request: {detail}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AppError::RateLimited(format!("model server: {detail}"));
    }
    AppError::upstream(format!("model server answered {status}: {detail}"))
}

/// Turns Ollama's newline-delimited JSON into model events.
///
/// The stream ends after the first `done` line. Anything else that ends it (transport
/// error, a malformed line, an `error` line, EOF or `idle` elapsing without data) yields
/// a final `Err`.
pub fn ndjson_events<S>(bytes: S, idle: Duration) -> ModelStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = match tokio::time::timeout(idle, bytes.next()).await {
                Err(_) => {
                    yield Err(AppError::upstream(format!(
                        "model server sent nothing for {}s", idle.as_secs()
                    )));
                    return;
                }
                Ok(Some(Err(err))) => {
                    yield Err(AppError::upstream(format!("model stream interrupted: {err}")));
                    return;
                }
                Ok(Some(Ok(chunk))) => chunk,
                Ok(None) => {
                    // a final line may arrive without its newline
                    let rest = std::mem::take(&mut buffer);
                    match decode_line(&rest) {
                        Ok(events) => {
                            let mut finished = false;
                            for event in events {
                                finished |= matches!(event, ModelEvent::Done { .. });
                                yield Ok(event);
                            }
                            if !finished {
                                yield Err(AppError::upstream(
                                    "model server closed the stream before completing",
                                ));
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                        }
                    }
                    return;
                }
            };

            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                match decode_line(&line) {
                    Ok(events) => {
                        for event in events {
                            let done = matches!(event, ModelEvent::Done { .. });
                            yield Ok(event);
                            if done {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }
    })
}

fn decode_line(line: &[u8]) -> Result<Vec<ModelEvent>, AppError> {
    let line = std::str::from_utf8(line)
        .map_err(|err| AppError::upstream(format!("model stream is not UTF-8: {err}")))?
        .trim();
    if line.is_empty() {
        return Ok(Vec::new());
    }
    let chunk: ChatReply = serde_json::from_str(line)
        .map_err(|err| AppError::upstream(format!("malformed model stream line: {err}")))?;
    if let Some(error) = chunk.error {
        return Err(AppError::upstream(format!("model server error: {error}")));
    }

    let mut events = Vec::new();
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(ModelEvent::Token(message.content));
        }
    }
    if chunk.done {
        events.push(ModelEvent::Done {
            reason: chunk.done_reason,
        });
    }
    Ok(events)
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    keep_alive: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    total_duration: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::test_support::{dead_url, serve};

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = reqwest::Result<Bytes>> + Send {
        stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn drain(stream: ModelStream) -> (Vec<ModelEvent>, Option<AppError>) {
        let mut events = Vec::new();
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => events.push(event),
                Err(err) => return (events, Some(err)),
            }
        }
        (events, None)
    }

    fn client(base_url: Url) -> OllamaClient {
        OllamaClient::new(&OllamaConfig {
            base_url,
            ..OllamaConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let bytes = chunks(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel",
            "lo\"},\"done\":false}\n{\"message\":{\"content\":\" world\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
        ]);
        let (events, err) = drain(ndjson_events(bytes, Duration::from_secs(5))).await;
        assert!(err.is_none());
        assert_eq!(
            events,
            vec![
                ModelEvent::Token("Hello".into()),
                ModelEvent::Token(" world".into()),
                ModelEvent::Done {
                    reason: Some("stop".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn nothing_is_read_past_done() {
        let bytes = chunks(&[
            "{\"message\":{\"content\":\"hi\"},\"done\":true}\n",
            "{\"message\":{\"content\":\"late\"},\"done\":false}\n",
        ]);
        let (events, err) = drain(ndjson_events(bytes, Duration::from_secs(5))).await;
        assert!(err.is_none());
        assert_eq!(
            events,
            vec![
                ModelEvent::Token("hi".into()),
                ModelEvent::Done { reason: None }
            ]
        );
    }

    #[tokio::test]
    async fn closing_without_done_is_an_error() {
        let bytes = chunks(&["{\"message\":{\"content\":\"Par\"},\"done\":false}\n"]);
        let (events, err) = drain(ndjson_events(bytes, Duration::from_secs(5))).await;
        assert_eq!(events, vec![ModelEvent::Token("Par".into())]);
        assert!(matches!(err, Some(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn error_lines_and_garbage_end_the_stream() {
        let bytes = chunks(&["{\"error\":\"model 'nope' not found\"}\n"]);
        let (events, err) = drain(ndjson_events(bytes, Duration::from_secs(5))).await;
        assert!(events.is_empty());
        let err = err.unwrap();
        assert!(err.to_string().contains("model 'nope' not found"));

        let bytes = chunks(&["not json\n"]);
        let (_, err) = drain(ndjson_events(bytes, Duration::from_secs(5))).await;
        assert!(matches!(err, Some(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn a_silent_server_times_out() {
        let bytes = stream::pending::<reqwest::Result<Bytes>>();
        let (events, err) = drain(ndjson_events(bytes, Duration::from_secs(30))).await;
        assert!(events.is_empty());
        assert!(matches!(err, Some(AppError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn streams_chat_from_a_live_server() {
        let body = "{\"message\":{\"content\":\"Bon\"},\"done\":false}\n\
                    {\"message\":{\"content\":\"jour\"},\"done\":false}\n\
                    {\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n";
        let router = Router::new().route(
            "/api/chat",
            post(move |Json(request): Json<Value>| async move {
                assert_eq!(request["stream"], json!(true));
                assert_eq!(request["model"], json!("mistral"));
                assert_eq!(request["messages"][0]["role"], json!("user"));
                body
            }),
        );
        let client = client(serve(router).await);
        let request = client.request(
            vec![ChatMessage::user("Say hello in French")],
            Some("mistral".into()),
            None,
        );
        assert_eq!(request.keep_alive, "5m");

        let (events, err) = drain(client.stream_chat(request).await.unwrap()).await;
        assert!(err.is_none());
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ModelEvent::Token("Bon".into()));
    }

    #[tokio::test]
    async fn base_url_path_prefix_is_kept() {
        let body = "{\"message\":{\"content\":\"ok\"},\"done\":true}\n";
        let router = Router::new()
            .route("/ollama/api/chat", post(move || async move { body }))
            .route(
                "/ollama/api/tags",
                get(|| async { Json(json!({"models": [{"name": "llama3"}]})) }),
            );
        let base = serve(router).await.join("/ollama/").unwrap();
        let client = client(base);

        let request = client.request(vec![ChatMessage::user("hi")], None, None);
        let (events, err) = drain(client.stream_chat(request).await.unwrap()).await;
        assert!(err.is_none());
        assert_eq!(events[0], ModelEvent::Token("ok".into()));
        assert!(client.status().await.running);
    }

    #[tokio::test]
    async fn a_server_that_never_answers_times_out() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ""
            }),
        );
        let client = OllamaClient::new(&OllamaConfig {
            base_url: serve(router).await,
            timeout: Duration::from_millis(200),
            ..OllamaConfig::default()
        })
        .unwrap();

        let started = std::time::Instant::now();
        let err = client
            .stream_chat(client.request(vec![ChatMessage::user("hi")], None, None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn refused_or_unreachable_servers_are_upstream_errors() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": "model \"ghost\" not found"})),
                )
            }),
        );
        let client_a = client(serve(router).await);
        let err = client_a
            .stream_chat(client_a.request(vec![ChatMessage::user("hi")], None, None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
        assert!(err.to_string().contains("ghost"));

        let client_b = client(dead_url().await);
        let err = client_b
            .stream_chat(client_b.request(vec![ChatMessage::user("hi")], None, None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn structured_generation_parses_content_and_usage() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(request): Json<Value>| async move {
                assert_eq!(request["stream"], json!(false));
                let content = if request["format"] == json!("json") {
                    "{\"days\": 3}"
                } else {
                    "not json at all"
                };
                Json(json!({
                    "message": {"role": "assistant", "content": content},
                    "done": true,
                    "prompt_eval_count": 12,
                    "eval_count": 34,
                    "total_duration": 2_500_000_000u64,
                }))
            }),
        );
        let client = client(serve(router).await);

        let generated = client
            .generate_structured(vec![ChatMessage::user("plan")], None, None)
            .await
            .unwrap();
        assert_eq!(generated.result, json!({"days": 3}));
        assert_eq!(
            generated.usage,
            Usage {
                prompt_tokens: 12,
                completion_tokens: 34,
                total_duration_ms: 2500,
            }
        );

        let schema = json!({"type": "object"});
        let generated = client
            .generate_structured(vec![ChatMessage::user("plan")], None, Some(schema))
            .await
            .unwrap();
        assert_eq!(generated.result, json!("not json at all"));
    }

    #[tokio::test]
    async fn status_lists_models_or_reports_not_running() {
        let router = Router::new().route(
            "/api/tags",
            get(|| async {
                Json(json!({"models": [{"name": "llama3:latest"}, {"name": "mistral:7b"}]}))
            }),
        );
        let status = client(serve(router).await).status().await;
        assert!(status.running);
        assert_eq!(status.model_count, 2);
        assert_eq!(status.models, vec!["llama3:latest", "mistral:7b"]);

        let status = client(dead_url().await).status().await;
        assert!(!status.running);
        assert!(status.models.is_empty());
        assert_eq!(status.default_model, "llama3");
    }
}
