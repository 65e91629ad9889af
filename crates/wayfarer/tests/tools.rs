use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wayfarer::agent::Agent;
use wayfarer::config::ToolSettings;
use wayfarer::conversation::{Conversation, ConversationConfig, SummaryMethod, TerminationReason};
use wayfarer::errors::AgentError;
use wayfarer::models::message::Message;
use wayfarer::models::tool::{Tool, ToolCall};
use wayfarer::providers::base::{Embedder, Provider, Usage};
use wayfarer::registry::ToolHandler;
use wayfarer::retrieval::{DocumentIndex, Ranking};
use wayfarer::tools::scrape::VisitWebsiteTool;
use wayfarer::tools::weather::WeatherTool;
use wayfarer::tools::{Toolbox, PLANNER, USER_PROXY};

/// Replays a fixed list of replies
struct ScriptedProvider {
    replies: Mutex<Vec<Message>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.is_empty() {
            Message::requester().with_text("TERMINATE")
        } else {
            replies.remove(0)
        };
        Ok((reply, Usage::new(Some(1), Some(1), Some(2))))
    }
}

/// Embeds text as word lengths and counts how many texts were embedded
struct CountingEmbedder {
    embedded: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn embedding_model(&self) -> &str {
        "word-lengths"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(inputs.len(), Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; 16];
                for word in text.split_whitespace() {
                    vector[word.len() % 16] += 1.0;
                }
                vector
            })
            .collect())
    }
}

fn tool_settings(server: &str, index_dir: PathBuf) -> ToolSettings {
    ToolSettings {
        index_dir,
        collection: "tourist_places".to_string(),
        n_results: 2,
        chunk_tokens: 1000,
        bing_api_key: None,
        forecast_url: server.to_string(),
        geocode_url: server.to_string(),
        bing_url: server.to_string(),
        duckduckgo_url: server.to_string(),
        search_max_turns: 2,
        corpus_path: None,
    }
}

#[tokio::test]
async fn test_scrape_batch_records_failures_inline() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/beaches"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<p>Calangute beach</p><p>Baga beach</p>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/forts"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Fort Aguada</p>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let output = dir.path().join("scrape.txt");
    let tool = VisitWebsiteTool::new(&output)?;
    let urls = vec![
        format!("{}/beaches", server.uri()),
        format!("{}/broken", server.uri()),
        format!("{}/forts", server.uri()),
    ];

    let report = tool.scrape(&urls, &output).await?;
    assert_eq!((report.scraped, report.failed), (2, 1));

    let content = std::fs::read_to_string(&output)?;
    let sections: Vec<&str> = content
        .split("URL: ")
        .filter(|s| !s.is_empty())
        .collect();
    assert_eq!(sections.len(), 3);
    assert_eq!(content.lines().filter(|l| l.starts_with("URL: ")).count(), 3);

    let failures: Vec<&&str> = sections.iter().filter(|s| s.contains("\nError: ")).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with(&format!("{}/broken\nError: ", server.uri())));

    assert!(sections[0].contains(&"=".repeat(80)));
    assert!(sections[0].contains("Calangute beach\nBaga beach"));
    assert!(sections[2].contains("Fort Aguada"));
    Ok(())
}

#[tokio::test]
async fn test_known_destination_skips_geocoder() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"lat": "1.0", "lon": "2.0"}])),
        )
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "15.2993"))
        .and(query_param("longitude", "74.124"))
        .and(query_param("daily", "temperature_2m_max,precipitation_sum"))
        .and(query_param("timezone", "auto"))
        .and(query_param("start_date", "2024-11-16"))
        .and(query_param("end_date", "2024-11-16"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"daily":{"time":["2024-11-16"],"temperature_2m_max":[33.1],"precipitation_sum":[0.0]}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let tool = WeatherTool::new(server.uri(), server.uri())?;
    assert_eq!(tool.coordinates("Goa").await?, (15.2993, 74.1240));

    let result = tool
        .call(json!({"destination": "Goa", "date": "2024-11-16"}))
        .await?;
    assert!(result[0].as_text().unwrap().contains("temperature_2m_max"));
    Ok(())
}

#[tokio::test]
async fn test_indexing_same_document_twice_adds_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let document = dir.path().join("scrape.txt");
    std::fs::write(
        &document,
        "URL: https://goa.example\nBeaches and forts of North Goa.\n\nURL: https://hotels.example\nResorts near Baga.\n",
    )?;
    let embedder = Arc::new(CountingEmbedder {
        embedded: AtomicUsize::new(0),
    });
    let ranking = Ranking::Semantic(embedder.clone());
    let index_dir = dir.path().join("index");

    let mut first =
        DocumentIndex::open(&index_dir, "tourist_places", ranking.clone(), 1000).await?;
    let added = first.upsert_document(&document).await?;
    assert!(added > 0);
    let ids: Vec<String> = first.chunks().iter().map(|c| c.id.clone()).collect();
    let embedded = embedder.embedded.load(Ordering::SeqCst);
    assert_eq!(embedded, added);
    drop(first);

    let mut second = DocumentIndex::open(&index_dir, "tourist_places", ranking, 1000).await?;
    assert_eq!(second.upsert_document(&document).await?, 0);
    let again: Vec<String> = second.chunks().iter().map(|c| c.id.clone()).collect();

    assert_eq!(ids, again);
    assert_eq!(embedder.embedded.load(Ordering::SeqCst), embedded);
    Ok(())
}

#[tokio::test]
async fn test_planner_conversation_uses_weather_tool() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "15.2993"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"daily":{"precipitation_sum":[0.0]}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::new(vec![
        Message::requester()
            .with_text("Thought: check the weather")
            .with_tool_request(
                "call_1",
                Ok(ToolCall::new(
                    "get_weather_info",
                    json!({"destination": "Goa", "date": "2024-11-16"}),
                )),
            ),
        Message::requester().with_tool_request(
            "call_2",
            Ok(ToolCall::new("get_weather_info", json!({"destination": "Goa"}))),
        ),
        Message::requester().with_text("Final Answer: dry and hot, pack light.\nTERMINATE"),
    ]));
    let toolbox = Toolbox {
        provider: provider.clone(),
        ranking: Ranking::Lexical,
        settings: tool_settings(&server.uri(), dir.path().join("index")),
        corpus: dir.path().join("scrape.txt"),
    };
    let registry = Arc::new(toolbox.planner_registry()?);

    let result = Conversation::new(
        Agent::new(PLANNER, "plan trips", provider),
        USER_PROXY,
        registry,
        ConversationConfig {
            max_turns: 10,
            summary_method: SummaryMethod::LastMessage,
            default_auto_reply: String::new(),
        },
    )
    .run("Plan a trip to Goa")
    .await?;

    assert_eq!(result.reason, TerminationReason::Sentinel);
    assert_eq!(result.turns, 3);
    assert_eq!(result.usage.total_tokens, Some(6));
    assert_eq!(result.summary, "Final Answer: dry and hot, pack light.");

    let first = result.messages[2].tool_responses()[0];
    assert!(first.observation().contains("precipitation_sum"));

    // The second call misses its date and is rejected before any request is sent
    let second = result.messages[4].tool_responses()[0];
    assert!(matches!(second.tool_result, Err(AgentError::InvalidParameters(_))));
    Ok(())
}
