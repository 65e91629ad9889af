use super::{
    azure::AzureProvider, base::Provider, configs::ProviderConfig, openai::OpenAiProvider,
};
use crate::retrieval::Ranking;
use anyhow::Result;
use std::sync::Arc;

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Azure(azure_config) => Ok(Arc::new(AzureProvider::new(azure_config)?)),
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
    }
}

/// How the retrieval index ranks chunks: by embeddings when the provider has an
/// embedding model configured, by BM25 otherwise
pub fn get_ranking(config: ProviderConfig) -> Result<Ranking> {
    match config {
        ProviderConfig::Azure(azure_config) if azure_config.embedding_deployment.is_some() => {
            Ok(Ranking::Semantic(Arc::new(AzureProvider::new(azure_config)?)))
        }
        ProviderConfig::OpenAi(openai_config) if openai_config.embedding_model.is_some() => {
            Ok(Ranking::Semantic(Arc::new(OpenAiProvider::new(openai_config)?)))
        }
        _ => Ok(Ranking::Lexical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::AzureProviderConfig;

    fn azure(embedding_deployment: Option<&str>) -> ProviderConfig {
        ProviderConfig::Azure(AzureProviderConfig {
            endpoint: "https://example.openai.azure.com".to_string(),
            api_key: "key".to_string(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-02-01".to_string(),
            temperature: None,
            max_tokens: None,
            embedding_deployment: embedding_deployment.map(str::to_string),
        })
    }

    #[test]
    fn test_ranking_follows_embedding_deployment() -> Result<()> {
        assert_eq!(get_ranking(azure(None))?.identity(), "bm25");
        assert_eq!(
            get_ranking(azure(Some("text-embedding-3-small")))?.identity(),
            "embedding:text-embedding-3-small"
        );
        Ok(())
    }
}
