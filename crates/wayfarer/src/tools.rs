pub mod rag;
pub mod scrape;
pub mod search;
pub mod weather;

use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::config::ToolSettings;
use crate::errors::{AgentError, AgentResult};
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::registry::{ToolBinding, ToolRegistry};
use crate::retrieval::Ranking;

use rag::{RagSettings, RagTool};
use scrape::VisitWebsiteTool;
use search::{BingSearch, DuckDuckGoSearch, SearchBackend, WebSearchTool};
use weather::WeatherTool;

pub const PLANNER: &str = "Planner_Agent";
pub const USER_PROXY: &str = "user_proxy";
pub const WEB_SURFER: &str = "web_surfer";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Wayfarer/0.1)";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> AgentResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| AgentError::Internal(format!("Failed to build http client: {}", e)))
}

pub(crate) fn string_arg<'a>(arguments: &'a Value, name: &str) -> AgentResult<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidParameters(format!("The {} must be a string", name)))
}

/// Everything the trip tools need, built once at startup
pub struct Toolbox {
    pub provider: Arc<dyn Provider>,
    pub ranking: Ranking,
    pub settings: ToolSettings,
    /// The scrape file shared by `visit_website` and `rag_on_document`
    pub corpus: PathBuf,
}

impl Toolbox {
    fn search_backend(&self) -> AgentResult<Arc<dyn SearchBackend>> {
        match self.settings.bing_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Ok(Arc::new(BingSearch::new(&self.settings.bing_url, key)?)),
            None => Ok(Arc::new(DuckDuckGoSearch::new(&self.settings.duckduckgo_url)?)),
        }
    }

    /// The web surfer's own registry, where it both requests and runs `visit_website`
    pub fn surfer_registry(&self) -> AgentResult<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            VisitWebsiteTool::tool(),
            Arc::new(VisitWebsiteTool::new(&self.corpus)?),
            ToolBinding::new(WEB_SURFER, WEB_SURFER),
        )?;
        Ok(registry)
    }

    /// The planner's tools, executed on its behalf by the user proxy
    pub fn planner_registry(&self) -> AgentResult<ToolRegistry> {
        let binding = || ToolBinding::new(PLANNER, USER_PROXY);
        let mut registry = ToolRegistry::new();

        registry.register(
            WeatherTool::tool(),
            Arc::new(WeatherTool::new(
                &self.settings.forecast_url,
                &self.settings.geocode_url,
            )?),
            binding(),
        )?;

        let surfer_prompt = load_prompt_file("web_surfer.md", &serde_json::json!({}))
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        let surfer = Agent::new(WEB_SURFER, surfer_prompt, self.provider.clone());
        registry.register(
            WebSearchTool::tool(),
            Arc::new(WebSearchTool::new(
                self.search_backend()?,
                surfer,
                Arc::new(self.surfer_registry()?),
                self.settings.search_max_turns,
            )),
            binding(),
        )?;

        registry.register(
            VisitWebsiteTool::tool(),
            Arc::new(VisitWebsiteTool::new(&self.corpus)?),
            binding(),
        )?;

        registry.register(
            RagTool::tool(),
            Arc::new(RagTool::new(
                self.provider.clone(),
                self.ranking.clone(),
                RagSettings {
                    index_dir: self.settings.index_dir.clone(),
                    collection: self.settings.collection.clone(),
                    chunk_tokens: self.settings.chunk_tokens,
                    n_results: self.settings.n_results,
                },
                &self.corpus,
            )),
            binding(),
        )?;

        Ok(registry)
    }
}
