use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::http_client;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{ParameterType, Tool, ToolParameter};
use crate::registry::ToolHandler;

/// Outcome of one scrape batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeReport {
    pub output: PathBuf,
    pub scraped: usize,
    pub failed: usize,
}

impl ScrapeReport {
    pub fn notice(&self) -> String {
        format!(
            "Scraped {} of {} urls into {} ({} failed)",
            self.scraped,
            self.scraped + self.failed,
            self.output.display(),
            self.failed
        )
    }
}

/// Fetches pages and appends their paragraph text to the scrape file
pub struct VisitWebsiteTool {
    client: Client,
    default_output: PathBuf,
}

impl VisitWebsiteTool {
    pub fn new<P: Into<PathBuf>>(default_output: P) -> AgentResult<Self> {
        Ok(Self {
            client: http_client()?,
            default_output: default_output.into(),
        })
    }

    pub fn tool() -> Tool {
        Tool::new(
            "visit_website",
            "Scrape the paragraph text of a list of website urls and append it to a text file for later retrieval",
            vec![
                ToolParameter::required(
                    "urls",
                    ParameterType::StringArray,
                    "The urls of the websites to scrape",
                ),
                ToolParameter::optional(
                    "output_file",
                    ParameterType::String,
                    "The file to append the scraped content to, defaults to the session scrape file",
                ),
            ],
        )
    }

    pub fn default_output(&self) -> &Path {
        &self.default_output
    }

    /// Scrape every url into `output`. A failing url is recorded in the file and the batch continues.
    pub async fn scrape(&self, urls: &[String], output: &Path) -> AgentResult<ScrapeReport> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .await?;

        let mut failed = 0;
        for url in urls {
            let section = match self.fetch_paragraphs(url).await {
                Ok(text) => format!("URL: {}\n{}\n{}\n\n", url, "=".repeat(80), text),
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to scrape");
                    failed += 1;
                    format!("URL: {}\nError: {}\n\n", url, e)
                }
            };
            file.write_all(section.as_bytes()).await?;
        }
        file.flush().await?;

        let report = ScrapeReport {
            output: output.to_path_buf(),
            scraped: urls.len() - failed,
            failed,
        };
        info!(output = %output.display(), scraped = report.scraped, failed, "scrape finished");
        Ok(report)
    }

    async fn fetch_paragraphs(&self, url: &str) -> Result<String, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let html = response.text().await?;
        Ok(extract_paragraphs(&html))
    }
}

/// The text of every `<p>` element, one per line
pub fn extract_paragraphs(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("p") else {
        return String::new();
    };
    document
        .select(&selector)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn urls_arg(arguments: &Value) -> AgentResult<Vec<String>> {
    let urls: Vec<String> = match arguments.get("urls") {
        // A single url is accepted as well as a list
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    AgentError::InvalidParameters("Every url must be a string".into())
                })
            })
            .collect::<AgentResult<_>>()?,
        _ => {
            return Err(AgentError::InvalidParameters(
                "The urls parameter must be a list of strings".into(),
            ))
        }
    };
    if urls.is_empty() {
        return Err(AgentError::InvalidParameters(
            "At least one url must be provided".into(),
        ));
    }
    Ok(urls)
}

#[async_trait]
impl ToolHandler for VisitWebsiteTool {
    async fn call(&self, arguments: Value) -> AgentResult<Vec<Content>> {
        let urls = urls_arg(&arguments)?;
        let output = arguments
            .get("output_file")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_output.clone());

        let report = self.scrape(&urls, &output).await?;
        Ok(vec![Content::text(report.notice())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_paragraphs() {
        let html = "<html><body><h1>Goa</h1><p>Beaches &amp; forts.</p><div><p> Spice farms </p></div><p></p></body></html>";
        assert_eq!(extract_paragraphs(html), "Beaches & forts.\nSpice farms");
    }

    #[test]
    fn test_urls_argument_forms() {
        assert_eq!(
            urls_arg(&json!({"urls": "https://a.example"})).unwrap(),
            vec!["https://a.example"]
        );
        assert!(urls_arg(&json!({"urls": []})).is_err());
        assert!(urls_arg(&json!({"urls": [1, 2]})).is_err());
    }

    #[tokio::test]
    async fn test_results_are_appended() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/goa"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Sunny beaches</p>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("scrape.txt");
        tokio::fs::write(&output, "existing\n").await?;

        let tool = VisitWebsiteTool::new(&output)?;
        let result = tool
            .call(json!({"urls": [format!("{}/goa", server.uri())]}))
            .await?;

        let content = tokio::fs::read_to_string(&output).await?;
        assert!(content.starts_with("existing\n"));
        assert!(content.contains(&format!(
            "URL: {}/goa\n{}\nSunny beaches\n\n",
            server.uri(),
            "=".repeat(80)
        )));
        assert!(result[0].as_text().unwrap().contains("(0 failed)"));
        Ok(())
    }
}
