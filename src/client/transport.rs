use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use taskboard_common::{Project, ReorderRequest, Task, TaskStatus, User};
use thiserror::Error;

/// Why a call to the board server failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Server calls the optimistic client depends on.
/// Real implementation: `HttpTransport`. Tests use scripted doubles.
#[async_trait]
pub trait TaskTransport: Send + Sync + 'static {
    async fn list_tasks(&self, project_id: &str) -> Result<Vec<Task>, TransportError>;

    async fn reorder(&self, project_id: &str, req: &ReorderRequest) -> Result<Task, TransportError>;

    async fn delete_task(&self, project_id: &str, task_id: &str) -> Result<(), TransportError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct SessionBody {
    user: User,
    token: String,
}

/// JSON-over-HTTP transport speaking the board server's API.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, TransportError> {
        let resp = check(builder.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    /// Create an account and keep its session token for later calls.
    pub async fn register(
        &mut self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<User, TransportError> {
        let body = serde_json::json!({"email": email, "name": name, "password": password});
        let session: SessionBody =
            Self::send(self.request(Method::POST, "/api/auth/register").json(&body)).await?;
        self.token = Some(session.token);
        Ok(session.user)
    }

    /// Start a session and keep its token for later calls.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<User, TransportError> {
        let body = serde_json::json!({"email": email, "password": password});
        let session: SessionBody =
            Self::send(self.request(Method::POST, "/api/auth/login").json(&body)).await?;
        self.token = Some(session.token);
        Ok(session.user)
    }

    pub async fn create_project(&self, name: &str) -> Result<Project, TransportError> {
        let body = serde_json::json!({"name": name});
        Self::send(self.request(Method::POST, "/api/projects").json(&body)).await
    }

    pub async fn create_task(
        &self,
        project_id: &str,
        title: &str,
        status: TaskStatus,
    ) -> Result<Task, TransportError> {
        let body = serde_json::json!({"title": title, "status": status});
        let path = format!("/api/projects/{}/tasks", project_id);
        Self::send(self.request(Method::POST, &path).json(&body)).await
    }
}

/// Turn a non-success response into `TransportError::Status`, using the
/// server's `{"error": ...}` message when there is one.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl TaskTransport for HttpTransport {
    async fn list_tasks(&self, project_id: &str) -> Result<Vec<Task>, TransportError> {
        let path = format!("/api/projects/{}/tasks", project_id);
        Self::send(self.request(Method::GET, &path)).await
    }

    async fn reorder(&self, project_id: &str, req: &ReorderRequest) -> Result<Task, TransportError> {
        let path = format!("/api/projects/{}/tasks/reorder", project_id);
        Self::send(self.request(Method::POST, &path).json(req)).await
    }

    async fn delete_task(&self, project_id: &str, task_id: &str) -> Result<(), TransportError> {
        let path = format!("/api/projects/{}/tasks/{}", project_id, task_id);
        check(self.request(Method::DELETE, &path).send().await?).await?;
        Ok(())
    }
}
