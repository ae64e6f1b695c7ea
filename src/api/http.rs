use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ApiBackend, ApiEndpoint, JobHandle, PollStatus, SubmitRequest};
use crate::error::{ErrorKind, ProviderError};
use crate::transcribe::Transcript;

/// Submit response; field names vary between backends.
///
/// Spellings that some backends send side by side are separate fields, since serde rejects an
/// alias that collides with its primary name in the same body.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<String>,

    #[serde(default, alias = "jobId")]
    job_id: Option<String>,

    #[serde(default, alias = "queuePosition")]
    queue_position: Option<u32>,

    #[serde(default, alias = "estimatedTime", alias = "eta_seconds")]
    estimated_wait_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,

    #[serde(default)]
    transcript: Option<String>,

    #[serde(default)]
    text: Option<String>,

    #[serde(default, alias = "transcriptUrl")]
    transcript_url: Option<String>,

    #[serde(default)]
    language: Option<String>,

    #[serde(default, alias = "queuePosition")]
    queue_position: Option<u32>,

    #[serde(default, alias = "estimatedTime", alias = "eta_seconds")]
    estimated_wait_seconds: Option<u32>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    reason: Option<String>,
}

impl SubmitResponse {
    fn job_id(self) -> Option<String> {
        self.job_id.or(self.id)
    }
}

impl StatusResponse {
    fn failure_reason(&mut self) -> Option<String> {
        self.error.take().or_else(|| self.message.take()).or_else(|| self.reason.take())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireStatus {
    Completed,
    Failed,
    Pending,
}

fn wire_status(status: &str) -> WireStatus {
    match status.trim().to_ascii_uppercase().as_str() {
        "COMPLETE" | "COMPLETED" | "SUCCEEDED" | "SUCCESS" | "DONE" => WireStatus::Completed,
        "FAILED" | "ERROR" => WireStatus::Failed,
        _ => WireStatus::Pending,
    }
}

/// reqwest client for a submit/poll transcription API
pub struct HttpApiClient {
    client: Client,
    endpoint: ApiEndpoint,
}

impl HttpApiClient {
    pub fn new(endpoint: ApiEndpoint) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .user_agent(concat!("shortform-transcriptor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn status_url(&self, job_id: &str) -> String {
        let path = self
            .endpoint
            .status_path
            .replace("{job_id}", &urlencoding::encode(job_id));
        self.url(&path)
    }

    fn authorize(builder: RequestBuilder, credential: Option<&str>) -> RequestBuilder {
        match credential {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Map non-success statuses to provider errors, keeping a body snippet
    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), &body))
    }

    async fn fetch_transcript(&self, url: &str, credential: Option<&str>) -> Result<String, ProviderError> {
        debug!(url, "fetching transcript body");
        let response = Self::authorize(self.client.get(url), credential).send().await?;
        let response = Self::check(response).await?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ApiBackend for HttpApiClient {
    async fn health(&self) -> Result<bool, ProviderError> {
        let Some(path) = &self.endpoint.health_path else {
            return Ok(true);
        };
        let response = self.client.get(self.url(path)).send().await?;
        Ok(response.status().is_success())
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<JobHandle, ProviderError> {
        let builder = self
            .client
            .post(self.url(&self.endpoint.submit_path))
            .json(&json!({ "url": request.url, "tier": request.tier }));
        let response = Self::authorize(builder, request.credential.as_deref()).send().await?;
        let response = Self::check(response).await?;
        let body: SubmitResponse = response.json().await?;
        let queue_position = body.queue_position;
        let eta_seconds = body.estimated_wait_seconds;

        Ok(JobHandle {
            job_id: body.job_id().unwrap_or_default(),
            queue_position,
            eta_seconds,
        })
    }

    async fn poll(&self, job: &JobHandle, credential: Option<&str>) -> Result<PollStatus, ProviderError> {
        let response = Self::authorize(self.client.get(self.status_url(&job.job_id)), credential)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: StatusResponse = response.json().await?;
        status_from_wire(body, |url| async move { self.fetch_transcript(&url, credential).await }).await
    }
}

async fn status_from_wire<F, Fut>(mut body: StatusResponse, fetch: F) -> Result<PollStatus, ProviderError>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<String, ProviderError>>,
{
    match wire_status(&body.status) {
        WireStatus::Pending => Ok(PollStatus::Pending {
            queue_position: body.queue_position,
            eta_seconds: body.estimated_wait_seconds,
        }),
        WireStatus::Failed => Ok(PollStatus::Failed(
            body.failure_reason()
                .unwrap_or_else(|| format!("job reported {}", body.status)),
        )),
        WireStatus::Completed => {
            let inline = body.transcript.filter(|t| !t.trim().is_empty()).or(body.text);
            let text = match (inline, body.transcript_url.as_deref()) {
                (Some(text), _) if !text.trim().is_empty() => text,
                (_, Some(url)) => fetch(url.to_string()).await?,
                _ => {
                    return Err(ProviderError::new(
                        ErrorKind::Unknown,
                        "job completed without transcript text or url",
                    ))
                }
            };
            Ok(PollStatus::Succeeded(Transcript {
                text,
                language: body.language,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(json: &str) -> StatusResponse {
        serde_json::from_str(json).unwrap()
    }

    async fn no_fetch(_url: String) -> Result<String, ProviderError> {
        panic!("transcript url should not be fetched")
    }

    #[test]
    fn test_submit_accepts_id_aliases() {
        for body in [
            r#"{"id":"a1"}"#,
            r#"{"job_id":"a1","estimated_wait_seconds":12}"#,
            r#"{"jobId":"a1","estimatedTime":12,"status":"queued","url":"x"}"#,
        ] {
            let parsed: SubmitResponse = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.job_id().as_deref(), Some("a1"));
        }
        // Both spellings in one body
        let parsed: SubmitResponse = serde_json::from_str(r#"{"id":"a1","job_id":"a1"}"#).unwrap();
        assert_eq!(parsed.job_id().as_deref(), Some("a1"));
        let parsed: SubmitResponse = serde_json::from_str(r#"{"jobId":"a1","estimatedTime":12}"#).unwrap();
        assert_eq!(parsed.estimated_wait_seconds, Some(12));
    }

    #[test]
    fn test_wire_status_is_case_insensitive() {
        assert_eq!(wire_status("completed"), WireStatus::Completed);
        assert_eq!(wire_status("Done"), WireStatus::Completed);
        assert_eq!(wire_status("ERROR"), WireStatus::Failed);
        assert_eq!(wire_status("processing"), WireStatus::Pending);
        assert_eq!(wire_status(""), WireStatus::Pending);
    }

    #[tokio::test]
    async fn test_completed_with_inline_text() {
        let body = status(r#"{"status":"COMPLETED","transcript":"hello world","language":"en"}"#);
        let result = status_from_wire(body, no_fetch).await.unwrap();
        assert_eq!(
            result,
            PollStatus::Succeeded(Transcript {
                text: "hello world".into(),
                language: Some("en".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_completed_with_transcript_url() {
        let body = status(r#"{"status":"done","transcript_url":"https://cdn.example/t.txt"}"#);
        let result = status_from_wire(body, |url| {
            async move {
                assert_eq!(url, "https://cdn.example/t.txt");
                Ok("fetched text".to_string())
            }
        })
        .await
        .unwrap();
        assert_eq!(result, PollStatus::Succeeded(Transcript::new("fetched text")));
    }

    #[tokio::test]
    async fn test_failed_carries_reason() {
        let body = status(r#"{"status":"failed","message":"Subtitles Not Available"}"#);
        let result = status_from_wire(body, no_fetch).await.unwrap();
        assert_eq!(result, PollStatus::Failed("Subtitles Not Available".into()));
    }

    #[tokio::test]
    async fn test_failed_body_with_error_and_message() {
        let body: StatusResponse = serde_json::from_str(
            r#"{"status":"FAILED","error":"Subtitles Not Available","message":"job failed"}"#,
        )
        .expect("a body carrying both error and message should parse");
        let result = status_from_wire(body, no_fetch).await.unwrap();
        assert_eq!(result, PollStatus::Failed("Subtitles Not Available".into()));
    }

    #[tokio::test]
    async fn test_completed_with_both_text_fields() {
        let body = status(r#"{"status":"completed","transcript":"","text":"from text field"}"#);
        let result = status_from_wire(body, no_fetch).await.unwrap();
        assert_eq!(result, PollStatus::Succeeded(Transcript::new("from text field")));
    }

    #[tokio::test]
    async fn test_pending_carries_queue_info() {
        let body = status(r#"{"status":"queued","queuePosition":3,"estimatedTime":40}"#);
        let result = status_from_wire(body, no_fetch).await.unwrap();
        assert_eq!(
            result,
            PollStatus::Pending {
                queue_position: Some(3),
                eta_seconds: Some(40),
            }
        );
    }

    #[test]
    fn test_status_url_substitutes_job_id() {
        let client = HttpApiClient::new(ApiEndpoint::new("https://api.example.com/")).unwrap();
        assert_eq!(
            client.status_url("job 1"),
            "https://api.example.com/ttt/status/job%201"
        );
        assert_eq!(
            client.url("/ttt/transcribe"),
            "https://api.example.com/ttt/transcribe"
        );
    }
}
