//! Persistent instance lifecycle.
//!
//! Instances are long-lived sandboxes that keep their filesystem and
//! processes between commands. They back [`ExecutionMode::Persistent`]
//! executions and must be stopped or deleted explicitly.

use crate::client::{not_found_as_resource, resource_path, BouvetClient};
use crate::error::Result;
use crate::request::{build_request, ExecutionIntent, ExecutionMode};
use crate::retry::retry_with_policy;
use crate::types::{ExecutionResult, Instance, InstanceRequest, ListResponse};
use reqwest::Method;

const INSTANCES_PATH: &str = "/api/v1/instances";

/// Resources given to instances started by [`BouvetClient::create_dev_env`].
const DEV_ENV_CPU_CORES: u32 = 2;
const DEV_ENV_MEMORY_MB: u32 = 2048;

impl BouvetClient {
    /// Start a persistent instance.
    pub async fn create_instance(&self, request: InstanceRequest) -> Result<Instance> {
        let transport = self.transport();
        let request = &request;
        let instance: Instance = retry_with_policy("create_instance", self.retry_policy(), |_| async move {
            transport
                .send_json(transport.request(Method::POST, INSTANCES_PATH).json(request))
                .await
        })
        .await
        .map_err(|e| match &request.snapshot_id {
            Some(snapshot_id) => not_found_as_resource(e, "snapshot", snapshot_id),
            None => e,
        })?;
        tracing::info!(
            instance_id = %instance.id,
            image = %request.image,
            status = %instance.status,
            "Instance created"
        );
        Ok(instance)
    }

    /// Start a named development instance with 2 cores and 2 GiB of memory.
    ///
    /// Returns the instance id.
    pub async fn create_dev_env(&self, name: &str, image: &str) -> Result<String> {
        let instance = self
            .create_instance(
                InstanceRequest::new(image)
                    .name(name)
                    .cpu_cores(DEV_ENV_CPU_CORES)
                    .memory_mb(DEV_ENV_MEMORY_MB),
            )
            .await?;
        Ok(instance.id)
    }

    /// List active instances.
    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        let transport = self.transport();
        let list: ListResponse<Instance> = retry_with_policy("list_instances", self.retry_policy(), |_| async move {
            transport
                .send_json(transport.request(Method::GET, INSTANCES_PATH))
                .await
        })
        .await?;
        Ok(list.into_vec())
    }

    /// Fetch one instance.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SdkError::Resource`] if the platform does not know the id.
    pub async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let path = resource_path(INSTANCES_PATH, instance_id, "")?;
        let transport = self.transport();
        let path = path.as_str();
        retry_with_policy("get_instance", self.retry_policy(), |_| async move {
            transport.send_json(transport.request(Method::GET, path)).await
        })
        .await
        .map_err(|e| not_found_as_resource(e, "instance", instance_id))
    }

    /// Run a command inside a running instance.
    ///
    /// The intent is sent in persistent mode whatever mode it carries, and
    /// is retried and counted in the metrics like [`Self::execute`]. No
    /// cache key is derived, since output depends on the instance's state;
    /// an explicit key on the intent is still sent.
    pub async fn exec_in_instance(
        &self,
        instance_id: &str,
        intent: ExecutionIntent,
    ) -> Result<ExecutionResult> {
        let path = resource_path(INSTANCES_PATH, instance_id, "/exec")?;
        let explicit_key = intent.cache_key.is_some();
        let mut request = build_request(intent.mode(ExecutionMode::Persistent), self.config());
        if !explicit_key {
            request.cache_key = None;
        }
        self.dispatch("exec_in_instance", &path, request, self.retry_policy())
            .await
            .map_err(|e| not_found_as_resource(e, "instance", instance_id))
    }

    /// Stop an instance. Its state is discarded unless snapshotted first.
    pub async fn stop_instance(&self, instance_id: &str) -> Result<()> {
        self.end_instance("stop_instance", Method::POST, instance_id, "/stop")
            .await?;
        tracing::info!(instance_id, "Instance stopped");
        Ok(())
    }

    /// Delete an instance record.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.end_instance("delete_instance", Method::DELETE, instance_id, "")
            .await?;
        tracing::debug!(instance_id, "Instance deleted");
        Ok(())
    }

    async fn end_instance(
        &self,
        operation: &'static str,
        method: Method,
        instance_id: &str,
        suffix: &str,
    ) -> Result<()> {
        let path = resource_path(INSTANCES_PATH, instance_id, suffix)?;
        let transport = self.transport();
        let path = path.as_str();
        let method = &method;
        let timeout = self.config().request_timeout;
        retry_with_policy(operation, self.retry_policy(), |_| async move {
            transport
                .send(transport.request(method.clone(), path), timeout)
                .await
                .map(drop)
        })
        .await
        .map_err(|e| not_found_as_resource(e, "instance", instance_id))
    }
}
