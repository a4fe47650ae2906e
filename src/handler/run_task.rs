use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use serde_yaml::Value as YamlValue;

use crate::{
    backend::task::{ExecutionRole, RunTask, TaskInvoker},
    core::{RouterError, RouterResult},
    metrics::TASK_LAUNCHES,
    router::{Request, ResponseEnvelope},
};

use super::{Collaborators, RouteHandler};

pub const HANDLER_NAME: &str = "run_task";

#[derive(Serialize)]
struct RunTaskReply<'a> {
    success: bool,
    tasks: &'a [String],
}

/// Launches one task per request. Holds the only [`ExecutionRole`] in the router.
pub struct RunTaskHandler {
    invoker: Arc<dyn TaskInvoker>,
    request: RunTask,
    role: ExecutionRole,
}

pub fn create_run_task_handler(
    collaborators: &Collaborators,
    _cfg: YamlValue,
    role: Option<ExecutionRole>,
) -> RouterResult<Arc<dyn RouteHandler>> {
    let role = role.ok_or_else(|| {
        RouterError::Configuration("run_task handler requires an execution role".to_string())
    })?;
    let (invoker, request) = collaborators.tasks.clone().ok_or_else(|| {
        RouterError::Configuration("run_task handler requires a task pool".to_string())
    })?;

    log::info!(
        "Route role '{}' may launch '{}' on cluster '{}'",
        role.name,
        request.task_definition,
        request.cluster
    );

    Ok(Arc::new(RunTaskHandler {
        invoker,
        request,
        role,
    }))
}

#[async_trait]
impl RouteHandler for RunTaskHandler {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn serve(&self, _request: &Request) -> RouterResult<ResponseEnvelope> {
        let result = self.invoker.run_task(&self.role, &self.request).await?;
        log::info!(
            "Launched {} task(s) on '{}': {:?}",
            result.task_ids.len(),
            self.request.cluster,
            result.task_ids
        );
        TASK_LAUNCHES
            .with_label_values(&[self.request.cluster.as_str()])
            .inc_by(result.task_ids.len() as u64);

        ResponseEnvelope::json(
            StatusCode::OK,
            &RunTaskReply {
                success: true,
                tasks: &result.task_ids,
            },
        )
    }
}
