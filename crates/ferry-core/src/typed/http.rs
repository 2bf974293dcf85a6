//! HttpTask - 外部 HTTP エンドポイントを呼び出すタスク
//!
//! # 呼び出し規約
//! - `U-Task-Id` / `U-Task-Token` ヘッダーでタスク ID と単回トークンを渡す
//! - 相手側は `{"code": 0, "message": "..."}` を返す。code != 0 は失敗扱い
//! - 相手側はコールバック時にトークンを検証する（`app::callback`）

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::task::{RunContext, Task};
use crate::domain::{TaskError, TaskMeta};

pub const TASK_ID_HEADER: &str = "U-Task-Id";
pub const TASK_TOKEN_HEADER: &str = "U-Task-Token";

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Reply contract of the called endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpReply {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpTask {
    #[serde(flatten)]
    pub meta: TaskMeta,
    #[serde(default)]
    pub url: String,
    /// GET | POST (anything else is sent as GET).
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
}

impl HttpTask {
    pub fn get(app_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            meta: TaskMeta {
                app_id: app_id.into(),
                ..TaskMeta::default()
            },
            url: url.into(),
            method: "GET".into(),
            ..Self::default()
        }
    }

    pub fn post(app_id: impl Into<String>, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".into(),
            body: body.into(),
            ..Self::get(app_id, url)
        }
    }

    pub fn with_expect_time(mut self, expect_time: i64) -> Self {
        self.meta.expect_time = expect_time;
        self
    }

    fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    async fn call(&self, ctx: &RunContext) -> Result<String, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(ctx.remaining())
            .build()?;

        let request = if self.is_post() {
            let content_type = if self.content_type.is_empty() {
                DEFAULT_CONTENT_TYPE
            } else {
                self.content_type.as_str()
            };
            client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(self.body.clone())
        } else {
            client.get(&self.url)
        };

        request
            .header(TASK_ID_HEADER, ctx.task_id().to_string())
            .header(TASK_TOKEN_HEADER, ctx.token())
            .send()
            .await?
            .text()
            .await
    }
}

#[async_trait]
impl Task for HttpTask {
    const TYPE: &'static str = "http";

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TaskMeta {
        &mut self.meta
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.meta.app_id.is_empty() {
            return Err(TaskError::Validation("app_id".into()));
        }
        if self.url.is_empty() {
            return Err(TaskError::Validation("url".into()));
        }
        Ok(())
    }

    fn content(&self) -> String {
        serde_json::json!({
            "url": self.url,
            "method": self.method,
            "body": self.body,
            "content_type": self.content_type,
            "expect_time": self.meta.expect_time,
        })
        .to_string()
    }

    async fn run(&mut self, ctx: &RunContext) -> Result<String, TaskError> {
        tracing::debug!(task_id = %self.meta.id, url = %self.url, "http task run");
        let started = Instant::now();
        let response = self.call(ctx).await;
        let exec_ms = started.elapsed().as_millis() as u64;

        let body = match response {
            Ok(body) => body,
            Err(e) => {
                self.meta.record_failure(None, e.to_string(), exec_ms);
                return Err(TaskError::execution(e.to_string()));
            }
        };

        let reply: HttpReply = match serde_json::from_str(&body) {
            Ok(reply) => reply,
            Err(e) => {
                let message = format!("malformed reply: {e}");
                self.meta.record_failure(Some(body), message.clone(), exec_ms);
                return Err(TaskError::execution(message));
            }
        };

        if reply.code != 0 {
            let message = format!("code={} error={}", reply.code, reply.message);
            self.meta.record_failure(Some(body), message.clone(), exec_ms);
            return Err(TaskError::execution(message));
        }

        self.meta.record_success(body.clone(), exec_ms);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, TaskId};
    use std::time::Duration;
    use ulid::Ulid;

    fn ctx_for(task: &HttpTask) -> RunContext {
        RunContext::new(
            task.meta.id,
            "secret-token",
            tokio::time::Instant::now() + Duration::from_secs(5),
        )
    }

    fn initialized(mut task: HttpTask) -> HttpTask {
        task.meta.init("p1", TaskId::from_ulid(Ulid::new()), 1_000);
        task
    }

    #[test]
    fn validate_requires_app_id_and_url() {
        let err = HttpTask::get("", "http://x").validate().unwrap_err();
        assert_eq!(err.to_string(), "incorrect parameter: app_id");
        let err = HttpTask::get("app", "").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(HttpTask::get("app", "http://x").validate().is_ok());
    }

    #[test]
    fn submission_json_fills_defaults() {
        let task: HttpTask = serde_json::from_str(
            r#"{"app_id":"billing","url":"http://x/cb","method":"POST","body":"{}","expect_time":10}"#,
        )
        .unwrap();
        assert_eq!(task.meta.app_id, "billing");
        assert_eq!(task.meta.expect_time, 10);
        assert_eq!(task.meta.times, 0);
        assert!(task.meta.id.is_nil());
        assert!(task.is_post());
    }

    #[tokio::test]
    async fn post_sends_token_headers_and_accepts_code_zero() {
        let mut server = mockito::Server::new_async().await;
        let mut task = initialized(HttpTask::post(
            "billing",
            format!("{}/callback", server.url()),
            r#"{"order":1}"#,
        ));
        let mock = server
            .mock("POST", "/callback")
            .match_header("u-task-id", task.meta.id.to_string().as_str())
            .match_header("u-task-token", "secret-token")
            .match_header("content-type", DEFAULT_CONTENT_TYPE)
            .match_body(r#"{"order":1}"#)
            .with_status(200)
            .with_body(r#"{"code":0,"message":"ok"}"#)
            .create_async()
            .await;

        let ctx = ctx_for(&task);
        let result = task.run(&ctx).await.unwrap();

        mock.assert_async().await;
        assert!(result.contains("\"code\":0"));
        assert!(task.meta.last.is_success());
        assert_eq!(task.meta.last.result.as_deref(), Some(result.as_str()));
    }

    #[tokio::test]
    async fn non_zero_code_is_an_execution_error() {
        let mut server = mockito::Server::new_async().await;
        let mut task = initialized(HttpTask::get("billing", format!("{}/cb", server.url())));
        let _mock = server
            .mock("GET", "/cb")
            .with_status(200)
            .with_body(r#"{"code":3,"message":"busy"}"#)
            .create_async()
            .await;

        let ctx = ctx_for(&task);
        let err = task.run(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.to_string(), "code=3 error=busy");
        assert_eq!(task.meta.last.error.as_deref(), Some("code=3 error=busy"));
        assert!(task.meta.last.result.is_some());
    }

    #[tokio::test]
    async fn malformed_reply_is_an_execution_error() {
        let mut server = mockito::Server::new_async().await;
        let mut task = initialized(HttpTask::get("billing", format!("{}/cb", server.url())));
        let _mock = server
            .mock("GET", "/cb")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let ctx = ctx_for(&task);
        let err = task.run(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("malformed reply"));
        assert!(!task.meta.last.is_success());
    }
}
