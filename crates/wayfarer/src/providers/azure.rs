//! Azure OpenAI deployments, addressed by deployment name and api version.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Embedder, Provider, Usage};
use super::configs::AzureProviderConfig;
use super::utils::{
    create_request, get_openai_usage, handle_response, openai_embeddings,
    openai_response_to_message,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub struct AzureProvider {
    client: Client,
    config: AzureProviderConfig,
}

impl AzureProvider {
    pub fn new(config: AzureProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn deployment_url(&self, deployment: &str, route: &str) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/openai/deployments/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            deployment,
            route
        ))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    async fn post(&self, url: Url, payload: Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        handle_response(&payload, response).await
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn model(&self) -> &str {
        &self.config.deployment
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        // The deployment in the url selects the model
        let payload = create_request(
            None,
            system,
            messages,
            tools,
            self.config.temperature,
            self.config.max_tokens,
        )?;

        let url = self.deployment_url(&self.config.deployment, "chat/completions")?;
        let response = self.post(url, payload).await?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("Azure OpenAI API error: {}", error));
        }

        let message = openai_response_to_message(response.clone())?;
        let usage = get_openai_usage(&response)?;
        Ok((message, usage))
    }
}

#[async_trait]
impl Embedder for AzureProvider {
    fn embedding_model(&self) -> &str {
        self.config.embedding_deployment.as_deref().unwrap_or_default()
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let deployment = self
            .config
            .embedding_deployment
            .as_deref()
            .ok_or_else(|| anyhow!("No embedding deployment configured"))?;

        let url = self.deployment_url(deployment, "embeddings")?;
        let response = self.post(url, json!({"input": inputs})).await?;
        openai_embeddings(&response)
    }
}
