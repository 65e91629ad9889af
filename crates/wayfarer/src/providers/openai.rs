use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Embedder, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    create_request, get_openai_usage, handle_response, openai_embeddings,
    openai_response_to_message,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/v1/{}", self.config.host.trim_end_matches('/'), route)
    }

    async fn post(&self, route: &str, payload: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(route))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        handle_response(&payload, response).await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = create_request(
            Some(&self.config.model),
            system,
            messages,
            tools,
            self.config.temperature,
            self.config.max_tokens,
        )?;

        let response = self.post("chat/completions", payload).await?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let message = openai_response_to_message(response.clone())?;
        let usage = get_openai_usage(&response)?;

        Ok((message, usage))
    }
}

#[async_trait]
impl Embedder for OpenAiProvider {
    fn embedding_model(&self) -> &str {
        self.config.embedding_model.as_deref().unwrap_or_default()
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .config
            .embedding_model
            .as_deref()
            .ok_or_else(|| anyhow!("No embedding model configured"))?;

        let response = self
            .post("embeddings", json!({"model": model, "input": inputs}))
            .await?;
        openai_embeddings(&response)
    }
}
