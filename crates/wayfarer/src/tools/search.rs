//! Web search: a raw results client plus the `bing_search` tool, which hands
//! the results to a web surfer agent in a short nested conversation.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{http_client, string_arg};
use crate::agent::Agent;
use crate::conversation::{Conversation, ConversationConfig, SummaryMethod};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{ParameterType, Tool, ToolParameter};
use crate::prompt_template::load_prompt_file;
use crate::registry::{ToolHandler, ToolRegistry};

const RESULT_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> AgentResult<Vec<SearchResult>>;
}

/// Bing Web Search v7
pub struct BingSearch {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct BingResponse {
    #[serde(rename = "webPages")]
    web_pages: Option<BingWebPages>,
}

#[derive(Deserialize)]
struct BingWebPages {
    value: Vec<BingPage>,
}

#[derive(Deserialize)]
struct BingPage {
    name: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

impl BingSearch {
    pub fn new<B: Into<String>, K: Into<String>>(base_url: B, api_key: K) -> AgentResult<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SearchBackend for BingSearch {
    async fn search(&self, query: &str) -> AgentResult<Vec<SearchResult>> {
        let count = RESULT_COUNT.to_string();
        let response = self
            .client
            .get(format!("{}/v7.0/search", self.base_url))
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "bing search failed");
            return Err(AgentError::ExecutionError(format!(
                "Bing search failed with status {}",
                response.status()
            )));
        }

        let body: BingResponse = response.json().await?;
        Ok(body
            .web_pages
            .map(|pages| pages.value)
            .unwrap_or_default()
            .into_iter()
            .map(|page| SearchResult {
                title: page.name,
                url: page.url,
                snippet: page.snippet,
            })
            .collect())
    }
}

/// DuckDuckGo's HTML results page, used when no Bing key is configured
pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
}

impl DuckDuckGoSearch {
    pub fn new<B: Into<String>>(base_url: B) -> AgentResult<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> AgentResult<Vec<SearchResult>> {
        let url = format!(
            "{}/html/?q={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "duckduckgo search failed");
            return Err(AgentError::ExecutionError(format!(
                "Search failed with status {}",
                response.status()
            )));
        }
        let html = response.text().await?;
        Ok(parse_duckduckgo(&html, RESULT_COUNT))
    }
}

fn selector(css: &str) -> AgentResult<Selector> {
    Selector::parse(css)
        .map_err(|e| AgentError::Internal(format!("Invalid selector {}: {:?}", css, e)))
}

fn element_text(element: Option<scraper::ElementRef<'_>>) -> String {
    element
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Results from a DuckDuckGo HTML page, skipping entries without a title
pub fn parse_duckduckgo(html: &str, limit: usize) -> Vec<SearchResult> {
    let (Ok(body), Ok(title), Ok(snippet), Ok(url)) = (
        selector(".result__body"),
        selector(".result__a"),
        selector(".result__snippet"),
        selector(".result__url"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&body)
        .filter_map(|result| {
            let title_text = element_text(result.select(&title).next());
            if title_text.is_empty() {
                return None;
            }
            let shown_url = element_text(result.select(&url).next());
            let link = result
                .select(&title)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string);
            Some(SearchResult {
                title: title_text,
                url: if shown_url.is_empty() {
                    link.unwrap_or_default()
                } else {
                    with_scheme(&shown_url)
                },
                snippet: element_text(result.select(&snippet).next()),
            })
        })
        .take(limit)
        .collect()
}

fn with_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// The `bing_search` tool. Runs the query, then lets the web surfer pick and visit
/// the useful results before summarizing them.
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    surfer: Agent,
    registry: Arc<ToolRegistry>,
    max_turns: usize,
}

impl WebSearchTool {
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        surfer: Agent,
        registry: Arc<ToolRegistry>,
        max_turns: usize,
    ) -> Self {
        Self {
            backend,
            surfer,
            registry,
            max_turns,
        }
    }

    pub fn tool() -> Tool {
        Tool::new(
            "bing_search",
            "Search the web for travel information and return a summary of the relevant websites and their urls",
            vec![ToolParameter::required(
                "query",
                ParameterType::String,
                "The search query",
            )],
        )
    }
}

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn call(&self, arguments: Value) -> AgentResult<Vec<Content>> {
        let query = string_arg(&arguments, "query")?;
        info!(query, "searching the web");
        let results = self.backend.search(query).await?;

        let prompt = load_prompt_file(
            "web_search.md",
            &json!({ "query": query, "results": results }),
        )
        .map_err(|e| AgentError::Internal(e.to_string()))?;

        let chat = Conversation::new(
            self.surfer.clone(),
            self.surfer.name(),
            self.registry.clone(),
            ConversationConfig {
                max_turns: self.max_turns,
                summary_method: SummaryMethod::ReflectionWithLlm,
                default_auto_reply: String::new(),
            },
        )
        .run(&prompt)
        .await
        .map_err(|e| AgentError::ExecutionError(format!("Web surfer failed: {}", e)))?;

        Ok(vec![Content::text(chat.summary)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::providers::mock::MockProvider;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DDG_PAGE: &str = r#"
<div class="result results_links">
  <div class="links_main result__body">
    <h2 class="result__title"><a class="result__a" href="https://duckduckgo.com/l/?uddg=goa">Goa Tourism &amp; Travel</a></h2>
    <a class="result__url" href="https://duckduckgo.com/l/?uddg=goa"> www.goa-tourism.com/beaches </a>
    <a class="result__snippet">Official guide to beaches, forts &amp; festivals.</a>
  </div>
</div>
<div class="result">
  <div class="links_main result__body">
    <h2 class="result__title"><a class="result__a" href="https://example.org/hotels">Hotels in Goa</a></h2>
    <a class="result__snippet">Stay near Baga beach.</a>
  </div>
</div>
<div class="result"><div class="result__body"><span>ad without title</span></div></div>
"#;

    #[test]
    fn test_parse_duckduckgo_results() {
        let results = parse_duckduckgo(DDG_PAGE, 5);
        assert_eq!(
            results,
            vec![
                SearchResult {
                    title: "Goa Tourism & Travel".into(),
                    url: "https://www.goa-tourism.com/beaches".into(),
                    snippet: "Official guide to beaches, forts & festivals.".into(),
                },
                SearchResult {
                    title: "Hotels in Goa".into(),
                    url: "https://example.org/hotels".into(),
                    snippet: "Stay near Baga beach.".into(),
                },
            ]
        );
        assert_eq!(parse_duckduckgo(DDG_PAGE, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_bing_search_sends_key() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7.0/search"))
            .and(query_param("q", "goa hotels"))
            .and(header("Ocp-Apim-Subscription-Key", "bing-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "webPages": {"value": [
                    {"name": "Goa hotels", "url": "https://hotels.example/goa", "snippet": "Beach resorts"}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let bing = BingSearch::new(server.uri(), "bing-key")?;
        let results = bing.search("goa hotels").await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://hotels.example/goa");
        Ok(())
    }

    #[tokio::test]
    async fn test_bing_without_pages_is_empty() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7.0/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_type": "SearchResponse"})))
            .mount(&server)
            .await;

        let bing = BingSearch::new(server.uri(), "bing-key")?;
        assert!(bing.search("nothing").await?.is_empty());
        Ok(())
    }

    struct FixedResults;

    #[async_trait]
    impl SearchBackend for FixedResults {
        async fn search(&self, _query: &str) -> AgentResult<Vec<SearchResult>> {
            Ok(vec![SearchResult {
                title: "Goa beaches".into(),
                url: "https://beaches.example/goa".into(),
                snippet: "Top ten beaches".into(),
            }])
        }
    }

    #[tokio::test]
    async fn test_search_tool_returns_surfer_summary() -> AgentResult<()> {
        let provider = Arc::new(MockProvider::new(vec![
            Message::requester().with_text("https://beaches.example/goa lists the beaches"),
            Message::requester().with_text("still looking"),
            Message::requester().with_text("Goa beaches: https://beaches.example/goa"),
        ]));
        let surfer = Agent::new("web_surfer", "surf", provider.clone());
        let tool = WebSearchTool::new(
            Arc::new(FixedResults),
            surfer,
            Arc::new(ToolRegistry::new()),
            2,
        );

        let result = tool.call(json!({"query": "goa beaches"})).await?;

        assert_eq!(
            result,
            vec![Content::text("Goa beaches: https://beaches.example/goa")]
        );
        // Two surfer turns and one reflection
        assert_eq!(provider.calls(), 3);
        Ok(())
    }
}
