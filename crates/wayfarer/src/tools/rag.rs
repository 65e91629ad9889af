use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::string_arg;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::tool::{ParameterType, Tool, ToolParameter};
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::registry::ToolHandler;
use crate::retrieval::{DocumentIndex, Ranking};

const RAG_SYSTEM: &str = "You are a helpful AI assistant.";
const UPDATE_CONTEXT: &str = "UPDATE CONTEXT";

pub struct RagSettings {
    pub index_dir: PathBuf,
    pub collection: String,
    pub chunk_tokens: usize,
    pub n_results: usize,
}

/// Answers a question from the chunks of a document most relevant to it
pub struct RagTool {
    provider: Arc<dyn Provider>,
    ranking: Ranking,
    settings: RagSettings,
    default_document: PathBuf,
}

impl RagTool {
    pub fn new<P: Into<PathBuf>>(
        provider: Arc<dyn Provider>,
        ranking: Ranking,
        settings: RagSettings,
        default_document: P,
    ) -> Self {
        Self {
            provider,
            ranking,
            settings,
            default_document: default_document.into(),
        }
    }

    pub fn tool() -> Tool {
        Tool::new(
            "rag_on_document",
            "Answer a question using the most relevant sections of a text document, by default the file the scraped websites were stored in",
            vec![
                ToolParameter::required(
                    "query",
                    ParameterType::String,
                    "The question to answer from the document",
                ),
                ToolParameter::optional(
                    "document",
                    ParameterType::String,
                    "Path of the document, defaults to the scrape file",
                ),
            ],
        )
    }

    pub async fn answer(&self, query: &str, document: PathBuf) -> AgentResult<String> {
        let mut index = DocumentIndex::open(
            &self.settings.index_dir,
            &self.settings.collection,
            self.ranking.clone(),
            self.settings.chunk_tokens,
        )
        .await
        .map_err(execution_error)?;
        index
            .upsert_document(&document)
            .await
            .map_err(execution_error)?;

        // Ranked once, over this document's chunks only; when the model asks for
        // more context it gets the next page
        let ranked = index
            .query(query, &document, index.len())
            .await
            .map_err(execution_error)?;
        let page_size = self.settings.n_results.max(1);
        let pages: Vec<Vec<String>> = if ranked.is_empty() {
            vec![Vec::new()]
        } else {
            ranked
                .chunks(page_size)
                .map(|page| page.iter().map(|c| c.text.clone()).collect())
                .collect()
        };

        info!(query, document = %document.display(), chunks = ranked.len(), "answering from document");
        let mut answer = String::new();
        for (attempt, chunks) in pages.into_iter().enumerate() {
            let prompt = load_prompt_file(
                "rag_qa.md",
                &json!({ "question": query, "chunks": chunks }),
            )
            .map_err(|e| AgentError::Internal(e.to_string()))?;

            let (reply, _) = self
                .provider
                .complete(RAG_SYSTEM, &[Message::executor().with_text(prompt)], &[])
                .await
                .map_err(execution_error)?;
            answer = reply.text();
            if !answer.contains(UPDATE_CONTEXT) {
                break;
            }
            debug!(attempt, "model asked for more context");
        }
        Ok(answer)
    }
}

fn execution_error(e: anyhow::Error) -> AgentError {
    AgentError::ExecutionError(e.to_string())
}

#[async_trait]
impl ToolHandler for RagTool {
    async fn call(&self, arguments: Value) -> AgentResult<Vec<Content>> {
        let query = string_arg(&arguments, "query")?;
        let document = arguments
            .get("document")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_document.clone());

        let answer = self.answer(query, document).await?;
        Ok(vec![Content::text(answer)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    fn rag(provider: Arc<MockProvider>, dir: &std::path::Path, document: PathBuf) -> RagTool {
        RagTool::new(
            provider,
            Ranking::Lexical,
            RagSettings {
                index_dir: dir.join("index"),
                collection: "tourist_places".to_string(),
                chunk_tokens: 6,
                n_results: 1,
            },
            document,
        )
    }

    #[tokio::test]
    async fn test_answers_from_default_document() -> AgentResult<()> {
        let dir = tempfile::tempdir()?;
        let document = dir.path().join("scrape.txt");
        tokio::fs::write(&document, "Baga beach has water sports").await?;
        let provider = Arc::new(MockProvider::new(vec![
            Message::requester().with_text("Water sports at Baga beach")
        ]));

        let tool = rag(provider.clone(), dir.path(), document);
        let result = tool.call(json!({"query": "water sports?", "document": ""})).await?;

        assert_eq!(result, vec![Content::text("Water sports at Baga beach")]);
        assert_eq!(provider.calls(), 1);
        assert!(dir
            .path()
            .join("index")
            .join("tourist_places")
            .join("collection.json")
            .exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_context_moves_to_next_chunks() -> AgentResult<()> {
        let dir = tempfile::tempdir()?;
        let document = dir.path().join("scrape.txt");
        tokio::fs::write(
            &document,
            "hiking trails canyon rim\nbeach resorts seafood sunsets",
        )
        .await?;
        let provider = Arc::new(MockProvider::new(vec![
            Message::requester().with_text("UPDATE CONTEXT"),
            Message::requester().with_text("Try the seafood"),
        ]));

        let tool = rag(provider.clone(), dir.path(), document);
        let result = tool.call(json!({"query": "hiking"})).await?;

        assert_eq!(result, vec![Content::text("Try the seafood")]);
        assert_eq!(provider.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_earlier_documents_stay_out_of_the_answer() -> AgentResult<()> {
        let dir = tempfile::tempdir()?;
        let earlier = dir.path().join("earlier.txt");
        let current = dir.path().join("current.txt");
        tokio::fs::write(&earlier, "Manali hotels near the snow line").await?;
        tokio::fs::write(&current, "Goa hotels near Baga beach").await?;
        let provider = Arc::new(MockProvider::new(vec![
            Message::requester().with_text("Manali"),
            Message::requester().with_text("Baga"),
        ]));

        // Both documents land in the same collection
        let tool = rag(provider.clone(), dir.path(), current.clone());
        tool.call(json!({"query": "hotels", "document": earlier.display().to_string()}))
            .await?;
        let result = tool.call(json!({"query": "hotels"})).await?;

        assert_eq!(result, vec![Content::text("Baga")]);
        let prompts = provider.prompts();
        assert!(prompts[0].contains("Manali"));
        assert!(prompts[1].contains("Baga"));
        assert!(!prompts[1].contains("Manali"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_document_is_an_error() -> AgentResult<()> {
        let dir = tempfile::tempdir()?;
        let provider = Arc::new(MockProvider::new(vec![]));
        let tool = rag(provider.clone(), dir.path(), dir.path().join("absent.txt"));

        let err = tool.call(json!({"query": "anything"})).await.unwrap_err();
        assert!(matches!(err, AgentError::ExecutionError(_)));
        assert_eq!(provider.calls(), 0);
        Ok(())
    }
}
