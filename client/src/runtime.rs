//! Client runtime: the state API plus runtime passthroughs

use cloudrt_core::{
    BackendFault, BindingEvent, ClientConfig, CloudRuntimesError, DataContent,
    InvokeBindingRequest, Metadata, RuntimeReply, RuntimeRequest, RuntimeTransport,
    RuntimesResult,
};
use cloudrt_state::{CallContext, StateClient};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const JSON_CONTENT_TYPE: &str = "application/json";

fn require(field: &str, value: &str) -> RuntimesResult<()> {
    if value.is_empty() {
        return Err(CloudRuntimesError::InvalidArgument(format!("{} is empty", field)));
    }
    Ok(())
}

fn unexpected(call: &str, reply: &RuntimeReply) -> CloudRuntimesError {
    CloudRuntimesError::Internal(format!("unexpected reply to {}: {:?}", call, reply))
}

/// Client for a cloud-runtimes sidecar
pub struct CloudRuntimesClient {
    config: ClientConfig,
    state: StateClient,
    runtime: Arc<dyn RuntimeTransport>,
    auth_token: RwLock<Option<String>>,
    closed: AtomicBool,
}

impl CloudRuntimesClient {
    pub fn new(config: ClientConfig, state: StateClient, runtime: Arc<dyn RuntimeTransport>) -> Self {
        let auth_token = config.sidecar.api_token.clone();
        state.set_auth_token(auth_token.clone());
        info!(name = %config.name, sidecar = %config.sidecar.address, "Client created");

        Self {
            config,
            state,
            runtime,
            auth_token: RwLock::new(auth_token),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_open(&self) -> RuntimesResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CloudRuntimesError::ClientClosed);
        }
        Ok(())
    }

    /// The state API
    pub fn state(&self) -> RuntimesResult<&StateClient> {
        self.ensure_open()?;
        Ok(&self.state)
    }

    async fn call(&self, ctx: &CallContext, request: RuntimeRequest) -> RuntimesResult<RuntimeReply> {
        self.ensure_open()?;

        let ctx = ctx.clone().or_timeout(self.config.sidecar.request_timeout());
        let mut headers = ctx.headers().clone();
        if headers.auth_token.is_none() {
            headers.auth_token = self.auth_token.read().clone();
        }

        let result = ctx
            .run(async { Ok::<_, CloudRuntimesError>(self.runtime.call(request, &headers).await) })
            .await?;

        result.map_err(|fault: BackendFault| {
            warn!(error = %fault, "Runtime call failed");
            CloudRuntimesError::RuntimeUnavailable(fault.to_string())
        })
    }

    // ============ Invocation ============

    pub async fn invoke_method(
        &self,
        ctx: &CallContext,
        app_id: &str,
        method: &str,
        verb: &str,
    ) -> RuntimesResult<Vec<u8>> {
        self.invoke(ctx, app_id, method, verb, None).await
    }

    pub async fn invoke_method_with_content(
        &self,
        ctx: &CallContext,
        app_id: &str,
        method: &str,
        verb: &str,
        content: DataContent,
    ) -> RuntimesResult<Vec<u8>> {
        self.invoke(ctx, app_id, method, verb, Some(content)).await
    }

    /// Invoke with `content` encoded as JSON
    pub async fn invoke_method_with_custom_content<T: Serialize + ?Sized>(
        &self,
        ctx: &CallContext,
        app_id: &str,
        method: &str,
        verb: &str,
        content_type: &str,
        content: &T,
    ) -> RuntimesResult<Vec<u8>> {
        let content = DataContent {
            data: serde_json::to_vec(content)?,
            content_type: content_type.to_string(),
        };
        self.invoke(ctx, app_id, method, verb, Some(content)).await
    }

    async fn invoke(
        &self,
        ctx: &CallContext,
        app_id: &str,
        method: &str,
        verb: &str,
        content: Option<DataContent>,
    ) -> RuntimesResult<Vec<u8>> {
        require("app id", app_id)?;
        require("method", method)?;
        debug!(app_id = %app_id, method = %method, verb = %verb, "Invoking method");

        let request = RuntimeRequest::InvokeMethod {
            app_id: app_id.to_string(),
            method: method.to_string(),
            verb: verb.to_string(),
            content,
        };
        match self.call(ctx, request).await? {
            RuntimeReply::Data(data) => Ok(data),
            RuntimeReply::Empty => Ok(Vec::new()),
            other => Err(unexpected("invoke", &other)),
        }
    }

    // ============ Bindings ============

    /// Invoke a binding and return its reply
    pub async fn invoke_binding(
        &self,
        ctx: &CallContext,
        request: InvokeBindingRequest,
    ) -> RuntimesResult<BindingEvent> {
        match self.binding(ctx, request, true).await? {
            RuntimeReply::Binding(event) => Ok(event),
            RuntimeReply::Empty => Ok(BindingEvent::default()),
            other => Err(unexpected("binding", &other)),
        }
    }

    /// Invoke a binding, discarding any reply
    pub async fn invoke_output_binding(
        &self,
        ctx: &CallContext,
        request: InvokeBindingRequest,
    ) -> RuntimesResult<()> {
        self.binding(ctx, request, false).await.map(|_| ())
    }

    async fn binding(
        &self,
        ctx: &CallContext,
        request: InvokeBindingRequest,
        expect_reply: bool,
    ) -> RuntimesResult<RuntimeReply> {
        require("binding name", &request.name)?;
        require("binding operation", &request.operation)?;
        debug!(binding = %request.name, operation = %request.operation, "Invoking binding");

        self.call(ctx, RuntimeRequest::InvokeBinding { request, expect_reply })
            .await
    }

    // ============ Pub/Sub ============

    pub async fn publish_event(
        &self,
        ctx: &CallContext,
        pubsub_name: &str,
        topic: &str,
        data: Vec<u8>,
    ) -> RuntimesResult<()> {
        self.publish(ctx, pubsub_name, topic, data, None).await
    }

    /// Publish `content` encoded as JSON
    pub async fn publish_event_from_custom_content<T: Serialize + ?Sized>(
        &self,
        ctx: &CallContext,
        pubsub_name: &str,
        topic: &str,
        content: &T,
    ) -> RuntimesResult<()> {
        let data = serde_json::to_vec(content)?;
        self.publish(ctx, pubsub_name, topic, data, Some(JSON_CONTENT_TYPE.to_string()))
            .await
    }

    async fn publish(
        &self,
        ctx: &CallContext,
        pubsub_name: &str,
        topic: &str,
        data: Vec<u8>,
        content_type: Option<String>,
    ) -> RuntimesResult<()> {
        require("pubsub name", pubsub_name)?;
        require("topic", topic)?;
        debug!(pubsub = %pubsub_name, topic = %topic, size = data.len(), "Publishing event");

        let request = RuntimeRequest::PublishEvent {
            pubsub_name: pubsub_name.to_string(),
            topic: topic.to_string(),
            data,
            content_type,
        };
        self.call(ctx, request).await.map(|_| ())
    }

    // ============ Secrets ============

    pub async fn get_secret(
        &self,
        ctx: &CallContext,
        store_name: &str,
        key: &str,
        metadata: Metadata,
    ) -> RuntimesResult<HashMap<String, String>> {
        require("secret store name", store_name)?;
        require("secret key", key)?;

        let request = RuntimeRequest::GetSecret {
            store_name: store_name.to_string(),
            key: key.to_string(),
            metadata,
        };
        match self.call(ctx, request).await? {
            RuntimeReply::Secret(secret) => Ok(secret),
            RuntimeReply::Empty => Ok(HashMap::new()),
            other => Err(unexpected("get secret", &other)),
        }
    }

    pub async fn get_bulk_secret(
        &self,
        ctx: &CallContext,
        store_name: &str,
        metadata: Metadata,
    ) -> RuntimesResult<HashMap<String, HashMap<String, String>>> {
        require("secret store name", store_name)?;

        let request = RuntimeRequest::GetBulkSecret {
            store_name: store_name.to_string(),
            metadata,
        };
        match self.call(ctx, request).await? {
            RuntimeReply::BulkSecret(secrets) => Ok(secrets),
            RuntimeReply::Empty => Ok(HashMap::new()),
            other => Err(unexpected("get bulk secret", &other)),
        }
    }

    // ============ Trace & auth ============

    /// Attach a trace id to an outgoing context
    pub fn with_trace_id(&self, ctx: &CallContext, trace_id: &str) -> CallContext {
        ctx.clone().trace_id(trace_id)
    }

    /// Token sent with every later request, state calls included
    pub fn with_auth_token(&self, token: &str) {
        let token = Some(token.to_string()).filter(|t| !t.is_empty());
        *self.auth_token.write() = token.clone();
        self.state.set_auth_token(token);
    }

    // ============ Lifecycle ============

    /// Ask the sidecar to shut down
    pub async fn shutdown(&self, ctx: &CallContext) -> RuntimesResult<()> {
        info!(sidecar = %self.config.sidecar.address, "Requesting sidecar shutdown");
        self.call(ctx, RuntimeRequest::Shutdown).await.map(|_| ())
    }

    /// Release the client; every later call fails with `ClientClosed`
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(name = %self.config.name, "Client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
