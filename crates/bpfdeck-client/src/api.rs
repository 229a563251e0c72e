use crate::error::ClientError;
use async_trait::async_trait;
use bpfdeck_core::{
    ActionReply, LifecycleRequest, ProgramInventory, StartUserspaceBody, StreamKind,
    UserspaceProgramList, UserspaceStatus,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Remote control API of the instrumentation host.
///
/// Action calls resolve to the server's `message` (if any); a non-success
/// status or an `error` field becomes `ClientError::Operation`.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn inventory(&self) -> Result<ProgramInventory, ClientError>;

    async fn submit(&self, request: &LifecycleRequest) -> Result<Option<String>, ClientError>;

    /// Full batch of lines the server currently knows for `stream`.
    async fn stream_batch(&self, stream: StreamKind) -> Result<Vec<String>, ClientError>;

    async fn stop_collection(&self) -> Result<Option<String>, ClientError>;

    async fn start_userspace(
        &self,
        body: &StartUserspaceBody,
    ) -> Result<Option<String>, ClientError>;

    async fn stop_userspace(&self) -> Result<Option<String>, ClientError>;

    async fn userspace_programs(&self) -> Result<Vec<String>, ClientError>;

    async fn userspace_status(&self) -> Result<UserspaceStatus, ClientError>;

    async fn dump(&self, stream: StreamKind) -> Result<Vec<u8>, ClientError>;
}

pub struct HttpControlApi {
    client: Client,
    base_url: String,
}

impl HttpControlApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport(format!("failed to build HTTP client: {err}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_action(&self, path: &str, body: Option<&Value>) -> Result<Option<String>, ClientError> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(path, status = status.as_u16(), "control_api_reply");
        action_outcome(status, &text)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, ClientError> {
        let response = self.client.get(self.url(path)).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(path, status = status.as_u16(), "control_api_reply");
        let body = parse_get_body(status, &text, what)?;
        serde_json::from_value(body)
            .map_err(|err| ClientError::Transport(format!("malformed {what} response: {err}")))
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn inventory(&self) -> Result<ProgramInventory, ClientError> {
        self.get_json("/api/programs", "programs").await
    }

    async fn submit(&self, request: &LifecycleRequest) -> Result<Option<String>, ClientError> {
        self.post_action(request.endpoint(), Some(&request.body()))
            .await
    }

    async fn stream_batch(&self, stream: StreamKind) -> Result<Vec<String>, ClientError> {
        let body: Value = self.get_json(stream.endpoint(), stream.title()).await?;
        stream.parse_batch(&body).map_err(ClientError::Operation)
    }

    async fn stop_collection(&self) -> Result<Option<String>, ClientError> {
        self.post_action("/api/stop_collection", None).await
    }

    async fn start_userspace(
        &self,
        body: &StartUserspaceBody,
    ) -> Result<Option<String>, ClientError> {
        let body = serde_json::to_value(body)
            .map_err(|err| ClientError::Transport(format!("failed to encode request: {err}")))?;
        self.post_action("/api/start_userspace", Some(&body)).await
    }

    async fn stop_userspace(&self) -> Result<Option<String>, ClientError> {
        self.post_action("/api/stop_userspace", None).await
    }

    async fn userspace_programs(&self) -> Result<Vec<String>, ClientError> {
        let list: UserspaceProgramList = self
            .get_json("/api/userspace_programs", "userspace programs")
            .await?;
        Ok(list.programs)
    }

    async fn userspace_status(&self) -> Result<UserspaceStatus, ClientError> {
        self.get_json("/api/userspace_status", "userspace status")
            .await
    }

    async fn dump(&self, stream: StreamKind) -> Result<Vec<u8>, ClientError> {
        let response = self.client.get(self.url(stream.dump_endpoint())).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::Operation(format!(
                "Failed to dump {}: {}",
                stream.title(),
                failure_detail(status, &text)
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Normalizes an action endpoint reply.
pub fn action_outcome(status: StatusCode, text: &str) -> Result<Option<String>, ClientError> {
    let reply = match serde_json::from_str::<ActionReply>(text) {
        Ok(reply) => reply,
        Err(_) if !status.is_success() => {
            return Err(ClientError::Operation(failure_detail(status, text)));
        }
        Err(err) => {
            return Err(ClientError::Transport(format!(
                "malformed action response: {err}"
            )));
        }
    };
    if !status.is_success() || reply.error.is_some() {
        return Err(ClientError::Operation(reply.failure_text()));
    }
    Ok(reply.message.filter(|message| !message.trim().is_empty()))
}

fn parse_get_body(status: StatusCode, text: &str, what: &str) -> Result<Value, ClientError> {
    let parsed = serde_json::from_str::<Value>(text);
    if !status.is_success() {
        let detail = parsed
            .ok()
            .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| failure_detail(status, text));
        return Err(ClientError::Operation(format!(
            "Failed to fetch {what}: {detail}"
        )));
    }
    let body = parsed
        .map_err(|err| ClientError::Transport(format!("malformed {what} response: {err}")))?;
    if let Some(err) = body.get("error").and_then(Value::as_str) {
        return Err(ClientError::Operation(format!("Failed to fetch {what}: {err}")));
    }
    Ok(body)
}

fn failure_detail(status: StatusCode, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        status.to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_outcome_returns_server_message() {
        let outcome = action_outcome(StatusCode::OK, r#"{"message": "Program loaded at /sys/fs/bpf/x"}"#)
            .expect("success");
        assert_eq!(outcome.as_deref(), Some("Program loaded at /sys/fs/bpf/x"));
        assert_eq!(action_outcome(StatusCode::OK, "{}").expect("success"), None);
    }

    #[test]
    fn error_field_wins_even_on_success_status() {
        let err = action_outcome(StatusCode::OK, r#"{"error": "Attach failed: busy"}"#)
            .expect_err("error field");
        assert!(matches!(err, ClientError::Operation(ref msg) if msg == "Attach failed: busy"));
    }

    #[test]
    fn non_success_status_uses_body_message() {
        let err = action_outcome(
            StatusCode::NOT_FOUND,
            r#"{"error": "Pin path not found: /sys/fs/bpf/gone"}"#,
        )
        .expect_err("404");
        assert_eq!(err.to_string(), "Pin path not found: /sys/fs/bpf/gone");

        let err = action_outcome(StatusCode::BAD_GATEWAY, "").expect_err("502");
        assert!(matches!(err, ClientError::Operation(ref msg) if msg.contains("502")));

        let err = action_outcome(StatusCode::INTERNAL_SERVER_ERROR, "{}").expect_err("500");
        assert_eq!(err.to_string(), "Unknown error");
    }

    #[test]
    fn malformed_success_body_is_transport_error() {
        let err = action_outcome(StatusCode::OK, "<html>").expect_err("html");
        assert!(err.is_transport());
    }

    #[test]
    fn get_body_surfaces_error_field() {
        let err = parse_get_body(StatusCode::OK, r#"{"error": "Failed to list programs"}"#, "programs")
            .expect_err("error body");
        assert_eq!(err.to_string(), "Failed to fetch programs: Failed to list programs");
        let err = parse_get_body(StatusCode::INTERNAL_SERVER_ERROR, "boom", "programs")
            .expect_err("500");
        assert_eq!(err.to_string(), "Failed to fetch programs: boom");
    }

    #[test]
    fn base_url_is_normalized() {
        let api = HttpControlApi::new("http://127.0.0.1:5000/", Duration::from_secs(1))
            .expect("client");
        assert_eq!(api.url("/api/programs"), "http://127.0.0.1:5000/api/programs");
    }
}
