//! Client builder

use crate::runtime::CloudRuntimesClient;
use async_trait::async_trait;
use cloudrt_core::{
    BackendFault, CallHeaders, ClientConfig, RuntimeReply, RuntimeRequest, RuntimeTransport,
    RuntimesResult, StateTransport,
};
use cloudrt_state::{MemoryTransport, StateClient};
use std::sync::Arc;

/// Runtime transport used when none is configured; every call faults
struct DetachedRuntime {
    address: String,
}

#[async_trait]
impl RuntimeTransport for DetachedRuntime {
    async fn call(
        &self,
        _request: RuntimeRequest,
        _headers: &CallHeaders,
    ) -> Result<RuntimeReply, BackendFault> {
        Err(BackendFault::unavailable(format!(
            "no runtime transport connected to {}",
            self.address
        )))
    }
}

/// Builder for `CloudRuntimesClient`
///
/// Without a state transport the client keeps state in memory, with the
/// configured default store registered.
pub struct ClientBuilder {
    config: ClientConfig,
    state_transport: Option<Arc<dyn StateTransport>>,
    runtime_transport: Option<Arc<dyn RuntimeTransport>>,
    auth_token: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            state_transport: None,
            runtime_transport: None,
            auth_token: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn sidecar_addr(mut self, addr: &str) -> Self {
        self.config.sidecar.address = addr.to_string();
        self
    }

    pub fn state_transport(mut self, transport: Arc<dyn StateTransport>) -> Self {
        self.state_transport = Some(transport);
        self
    }

    pub fn runtime_transport(mut self, transport: Arc<dyn RuntimeTransport>) -> Self {
        self.runtime_transport = Some(transport);
        self
    }

    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    pub fn build(mut self) -> RuntimesResult<CloudRuntimesClient> {
        if let Some(token) = self.auth_token.take() {
            self.config.sidecar.api_token = Some(token);
        }
        self.config.validate()?;

        let state_transport = self.state_transport.unwrap_or_else(|| {
            Arc::new(MemoryTransport::new().with_store(&self.config.state.default_store))
        });
        let runtime_transport = self.runtime_transport.unwrap_or_else(|| {
            Arc::new(DetachedRuntime {
                address: self.config.sidecar.address.clone(),
            })
        });

        let state = StateClient::with_config(state_transport, &self.config.state)
            .with_request_timeout(self.config.sidecar.request_timeout());

        Ok(CloudRuntimesClient::new(self.config, state, runtime_transport))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudrt_core::CloudRuntimesError;
    use cloudrt_state::CallContext;

    #[tokio::test]
    async fn test_default_build_serves_default_store() {
        let client = ClientBuilder::new().name("test-client").build().unwrap();
        assert_eq!(client.config().name, "test-client");

        let ctx = CallContext::background();
        let state = client.state().unwrap();
        state.save_state(&ctx, "statestore", "k", b"v".to_vec(), &[]).await.unwrap();
        assert_eq!(state.get_state(&ctx, "statestore", "k").await.unwrap().value, b"v");
    }

    #[tokio::test]
    async fn test_detached_runtime_is_unavailable() {
        let client = ClientBuilder::new().sidecar_addr("10.0.0.1:50001").build().unwrap();
        let err = client
            .invoke_method(&CallContext::background(), "app", "ping", "GET")
            .await
            .unwrap_err();
        match err {
            CloudRuntimesError::RuntimeUnavailable(reason) => assert!(reason.contains("10.0.0.1")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ClientConfig::default();
        config.state.max_bulk_parallelism = 0;
        assert!(matches!(
            ClientBuilder::new().config(config).build(),
            Err(CloudRuntimesError::ConfigError(_))
        ));
    }

    #[test]
    fn test_auth_token_applied() {
        let client = ClientBuilder::new().auth_token("abc").build().unwrap();
        assert_eq!(client.config().sidecar.api_token.as_deref(), Some("abc"));
    }
}
