use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::{RouterError, RouterResult};

use super::{EndpointResolver, ListenerEndpoint, Scheme};

/// Credential scope that allows launching compute tasks.
///
/// Only routes that declare a role get one, and [`TaskInvoker::run_task`]
/// cannot be called without it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRole {
    pub name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

/// One "run a task" request against a compute pool.
#[derive(Clone, Debug, PartialEq)]
pub struct RunTask {
    pub cluster: String,
    pub task_definition: String,
}

/// Identifiers of the launched work, in launch order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TaskRunResult {
    #[serde(rename = "tasks")]
    pub task_ids: Vec<String>,
}

#[async_trait]
pub trait TaskInvoker: Send + Sync {
    /// Launches one task run and returns as soon as the launch call completes.
    async fn run_task(
        &self,
        role: &ExecutionRole,
        request: &RunTask,
    ) -> RouterResult<TaskRunResult>;
}

/// Talks to a task pool API over HTTP.
///
/// `POST /clusters/{cluster}/tasks` with the role's bearer token.
pub struct HttpTaskInvoker {
    client: reqwest::Client,
    endpoint: ListenerEndpoint,
    scheme: Scheme,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskBody<'a> {
    cluster: &'a str,
    task_definition: &'a str,
    count: u32,
    role: &'a str,
    policies: &'a [String],
}

#[derive(Deserialize)]
struct RunTaskReply {
    #[serde(default)]
    tasks: Vec<JsonValue>,
    #[serde(default)]
    failures: Vec<JsonValue>,
}

impl HttpTaskInvoker {
    pub fn new(client: reqwest::Client, endpoint: ListenerEndpoint, scheme: Scheme) -> Self {
        Self {
            client,
            endpoint,
            scheme,
        }
    }
}

/// Task entries are either bare ids or objects carrying `taskArn`.
fn task_id(task: &JsonValue) -> Option<String> {
    match task {
        JsonValue::String(id) => Some(id.clone()),
        JsonValue::Object(fields) => fields
            .get("taskArn")
            .or_else(|| fields.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn parse_reply(pool: &str, reply: RunTaskReply) -> RouterResult<TaskRunResult> {
    if reply.tasks.is_empty() {
        let detail = if reply.failures.is_empty() {
            "no tasks were launched".to_string()
        } else {
            JsonValue::Array(reply.failures).to_string()
        };
        return Err(RouterError::upstream(pool, detail));
    }

    let task_ids = reply
        .tasks
        .iter()
        .map(|t| {
            task_id(t)
                .ok_or_else(|| RouterError::upstream(pool, format!("malformed task entry {t}")))
        })
        .collect::<RouterResult<Vec<_>>>()?;

    Ok(TaskRunResult { task_ids })
}

#[async_trait]
impl TaskInvoker for HttpTaskInvoker {
    async fn run_task(
        &self,
        role: &ExecutionRole,
        request: &RunTask,
    ) -> RouterResult<TaskRunResult> {
        let pool = self.endpoint.name();
        let endpoint = self.endpoint.resolve()?;
        let url = self
            .scheme
            .url(&endpoint, &format!("/clusters/{}/tasks", request.cluster));

        let body = RunTaskBody {
            cluster: &request.cluster,
            task_definition: &request.task_definition,
            count: 1,
            role: &role.name,
            policies: &role.policies,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(token) = &role.token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| RouterError::upstream(pool, e).at(&endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(RouterError::UpstreamUnavailable {
                upstream: pool.to_string(),
                endpoint: Some(endpoint),
                status: Some(status.as_u16()),
                detail,
            });
        }

        let reply: RunTaskReply = resp
            .json()
            .await
            .map_err(|e| RouterError::upstream(pool, e).at(&endpoint))?;

        parse_reply(pool, reply).map_err(|e| e.at(&endpoint))
    }
}
