//! PubMed article search over NCBI E-utilities
//!
//! Three hops: `esearch` resolves the query to PMIDs, `esummary` returns
//! article metadata for those ids as JSON, and `efetch` returns the
//! abstracts as PubMed XML.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, ToolmuxError};
use crate::fetch::{FetchRequest, Fetcher};
use crate::tools::{LocalTool, ToolBox, ToolSpec};

/// E-utilities base URL
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Title used when the summary has none
pub const NO_TITLE: &str = "No title available";

/// Abstract used when efetch has none for an article
pub const NO_ABSTRACT: &str = "No abstract available";

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub pmid: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub doi: Option<String>,
    pub publication_date: Option<String>,
    pub journal: Option<String>,
    pub url: String,
}

/// Search parameters; mirrors the tool's input schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_sort")]
    pub sort: String,
    /// Restrict to the last N days
    #[serde(default)]
    pub date_range: Option<String>,
}

fn default_max_results() -> u32 {
    10
}

fn default_sort() -> String {
    "relevance".to_string()
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: default_max_results(),
            sort: default_sort(),
            date_range: None,
        }
    }
}

#[derive(Clone)]
pub struct PubMedClient {
    fetcher: Fetcher,
    base_url: String,
}

impl PubMedClient {
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_base_url(fetcher, EUTILS_BASE_URL)
    }

    pub fn with_base_url(fetcher: Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Search, summarize and attach abstracts; an empty id list short-circuits
    /// without further requests. A failed abstract fetch leaves the default text.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<Article>> {
        log::info!("Searching PubMed for: {}", request.query);

        let pmids = self.search_ids(request).await?;
        if pmids.is_empty() {
            log::info!("PubMed search for '{}' matched nothing", request.query);
            return Ok(Vec::new());
        }

        let summary = FetchRequest::get(format!("{}/esummary.fcgi", self.base_url))
            .param("db", "pubmed")
            .param("id", pmids.join(","))
            .param("retmode", "json");
        let body: Value = self.fetcher.get(&summary).await?.json()?;
        let mut articles = parse_summaries(&body, &pmids);

        let mut abstracts = self.fetch_abstracts(&pmids).await;
        for article in &mut articles {
            if let Some(text) = abstracts.remove(&article.pmid) {
                article.abstract_text = text;
            }
        }
        log::info!("PubMed search for '{}' returned {} articles", request.query, articles.len());
        Ok(articles)
    }

    async fn fetch_abstracts(&self, pmids: &[String]) -> HashMap<String, String> {
        let request = FetchRequest::get(format!("{}/efetch.fcgi", self.base_url))
            .param("db", "pubmed")
            .param("id", pmids.join(","))
            .param("rettype", "abstract")
            .param("retmode", "xml");

        let response = match self.fetcher.get(&request).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("efetch failed, articles keep the default abstract: {}", e);
                return HashMap::new();
            }
        };
        parse_abstracts(&response.body).unwrap_or_else(|e| {
            log::warn!("Cannot parse efetch XML: {}", e);
            HashMap::new()
        })
    }

    async fn search_ids(&self, request: &SearchRequest) -> Result<Vec<String>> {
        let mut search = FetchRequest::get(format!("{}/esearch.fcgi", self.base_url))
            .param("db", "pubmed")
            .param("term", &request.query)
            .param("retmax", request.max_results)
            .param("retmode", "json")
            .param("sort", &request.sort);
        if let Some(days) = &request.date_range {
            search = search.param("datetype", "pdat").param("reldate", days);
        }

        let body: Value = self.fetcher.get(&search).await?.json()?;
        Ok(body
            .pointer("/esearchresult/idlist")
            .and_then(|ids| ids.as_array())
            .map(|ids| ids.iter().filter_map(|id| id.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }
}

/// Articles in PMID order; ids missing from the summary are skipped
fn parse_summaries(body: &Value, pmids: &[String]) -> Vec<Article> {
    let Some(result) = body.get("result") else {
        log::warn!("esummary response has no result object");
        return Vec::new();
    };

    pmids
        .iter()
        .filter_map(|pmid| match result.get(pmid) {
            Some(entry) if entry.get("error").is_none() => Some(parse_article(pmid, entry)),
            _ => {
                log::warn!("No summary for PMID {}", pmid);
                None
            }
        })
        .collect()
}

/// PMID -> abstract text from a `PubmedArticleSet` document.
///
/// Structured abstracts have several `AbstractText` sections; they are joined
/// with blank lines, each prefixed by its `Label` when present. Articles
/// without an abstract are left out.
fn parse_abstracts(xml: &str) -> std::result::Result<HashMap<String, String>, roxmltree::Error> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(xml, options)?;

    let mut abstracts = HashMap::new();
    for article in doc.descendants().filter(|n| n.has_tag_name("PubmedArticle")) {
        let Some(citation) = child(article, "MedlineCitation") else {
            continue;
        };
        let Some(pmid) = child(citation, "PMID").and_then(|n| n.text()).map(str::trim) else {
            continue;
        };
        let Some(abstract_node) = child(citation, "Article").and_then(|n| child(n, "Abstract")) else {
            continue;
        };

        let sections: Vec<String> = abstract_node
            .children()
            .filter(|n| n.has_tag_name("AbstractText"))
            .filter_map(|section| {
                // Inline markup (<i>, <sup>) splits the text into several nodes
                let text: String = section.descendants().filter(|n| n.is_text()).filter_map(|n| n.text()).collect();
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(match section.attribute("Label") {
                    Some(label) => format!("{}: {}", label, text),
                    None => text.to_string(),
                })
            })
            .collect();

        if !sections.is_empty() {
            abstracts.insert(pmid.to_string(), sections.join("\n\n"));
        }
    }
    Ok(abstracts)
}

fn child<'a, 'input>(node: roxmltree::Node<'a, 'input>, name: &str) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn parse_article(pmid: &str, entry: &Value) -> Article {
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let authors: Vec<String> = entry
        .get("authors")
        .and_then(|a| a.as_array())
        .map(|list| {
            list.iter()
                .filter(|a| a.get("authtype").and_then(|t| t.as_str()).is_none_or(|t| t == "Author"))
                .filter_map(|a| a.get("name").and_then(|n| n.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let doi = entry
        .get("articleids")
        .and_then(|ids| ids.as_array())
        .and_then(|ids| {
            ids.iter()
                .find(|id| id.get("idtype").and_then(|t| t.as_str()) == Some("doi"))
                .and_then(|id| id.get("value").and_then(|v| v.as_str()))
                .map(String::from)
        });

    Article {
        pmid: pmid.to_string(),
        title: text("title").unwrap_or_else(|| NO_TITLE.to_string()),
        abstract_text: NO_ABSTRACT.to_string(),
        authors,
        doi,
        publication_date: text("pubdate"),
        journal: text("fulljournalname").or_else(|| text("source")),
        url: format!("https://pubmed.ncbi.nlm.nih.gov/{}", pmid),
    }
}

struct SearchTool {
    client: PubMedClient,
}

#[async_trait]
impl LocalTool for SearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "search_pubmed",
            "Search the PubMed database of biomedical literature. Returns title, abstract, authors, DOI, \
             publication date, journal and link for each matching article.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "PubMed search term" },
                "max_results": { "type": "integer", "description": "Maximum number of articles", "default": 10 },
                "sort": {
                    "type": "string",
                    "enum": ["relevance", "pub_date", "Author", "JournalName"],
                    "default": "relevance"
                },
                "date_range": {
                    "type": ["string", "null"],
                    "description": "Only articles published in the last N days"
                }
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let request: SearchRequest = serde_json::from_value(arguments).map_err(|e| {
            log::warn!("search_pubmed: cannot decode arguments: {}", e);
            ToolmuxError::InvalidArguments {
                tool: "search_pubmed".to_string(),
                fields: vec!["arguments".to_string()],
            }
        })?;
        let articles = self.client.search(&request).await?;
        Ok(serde_json::to_value(articles)?)
    }
}

/// `search_pubmed`
pub fn toolbox(fetcher: Fetcher) -> ToolBox {
    ToolBox::new("pubmed").with_tool(Arc::new(SearchTool {
        client: PubMedClient::new(fetcher),
    }))
}
