//! ICD-10-CM code lookup against the NIH clinical tables API

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Result, ToolmuxError};
use crate::fetch::{FetchError, FetchRequest, Fetcher};
use crate::tools::{LocalTool, ToolBox, ToolSpec};

/// NIH clinical tables ICD-10-CM search endpoint
pub const ICD10_SEARCH_URL: &str = "https://clinicaltables.nlm.nih.gov/api/icd10cm/v3/search";

/// Default number of results for the advanced lookup
pub const DEFAULT_MAX_LIST: u64 = 7;

/// Upper bound the API accepts for `maxList`
const MAX_LIST_LIMIT: u64 = 500;

const QUERY_HINT: &str = "The query input string will be used to match to entries in NIH's database, so use \
the minimal amount of text while retaining the intended meaning to avoid being overly specific and dropping \
relevant entries.";

/// Thin client over the search endpoint
#[derive(Clone)]
pub struct Icd10Client {
    fetcher: Fetcher,
    base_url: String,
}

impl Icd10Client {
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_base_url(fetcher, ICD10_SEARCH_URL)
    }

    pub fn with_base_url(fetcher: Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Search codes; returns `[code, name]` pairs in API order
    pub async fn search(&self, query: &str, max_list: Option<u64>) -> Result<Vec<(String, String)>> {
        let mut request = FetchRequest::get(&self.base_url)
            .param("sf", "code,name")
            .param("terms", query);
        if let Some(max) = max_list {
            request = request.param("maxList", max);
        }

        log::info!("Querying NIH ICD-10 for: {} (max {:?})", query, max_list);
        let response = self.fetcher.get(&request).await?;
        let body: Value = response.json()?;
        let pairs = parse_pairs(&body).map_err(|message| FetchError::Decode {
            url: response.url.clone(),
            message,
        })?;
        log::info!("ICD-10 query returned {} codes", pairs.len());
        Ok(pairs)
    }
}

/// Element 3 of the response is a list of `[code, name]`; absent or null means no matches
fn parse_pairs(body: &Value) -> std::result::Result<Vec<(String, String)>, String> {
    let Some(top) = body.as_array() else {
        return Err("expected a JSON array".to_string());
    };
    let rows = match top.get(3) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(rows)) => rows,
        Some(other) => return Err(format!("element 3 is not a list: {}", other)),
    };

    rows.iter()
        .map(|row| match row.as_array().map(|r| r.as_slice()) {
            Some([code, name, ..]) => Ok((
                code.as_str().unwrap_or_default().to_string(),
                name.as_str().unwrap_or_default().to_string(),
            )),
            _ => Err(format!("malformed code row: {}", row)),
        })
        .collect()
}

fn query_arg(arguments: &Value) -> Result<String> {
    arguments
        .get("query")
        .and_then(|q| q.as_str())
        .map(String::from)
        .ok_or_else(|| ToolmuxError::InvalidArguments {
            tool: "icd10".to_string(),
            fields: vec!["query".to_string()],
        })
}

struct BasicLookup {
    client: Icd10Client,
}

#[async_trait]
impl LocalTool for BasicLookup {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_icd10_code_basic",
            format!(
                "Search the National Institute of Health (NIH) database on International Classification of \
                 Diseases (ICD) 10 codes for specified conditions. {}",
                QUERY_HINT
            ),
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Condition to look up" }
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let query = query_arg(&arguments)?;
        let pairs = self.client.search(&query, None).await?;
        Ok(serde_json::to_value(pairs)?)
    }
}

struct AdvancedLookup {
    client: Icd10Client,
}

#[async_trait]
impl LocalTool for AdvancedLookup {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "get_icd10_code_advanced",
            format!(
                "Search the National Institute of Health (NIH) database on International Classification of \
                 Diseases (ICD) 10 codes for specified conditions. {} The max_list input integer determines how \
                 many results are retrieved from the database, with a default of {}.",
                QUERY_HINT, DEFAULT_MAX_LIST
            ),
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Condition to look up" },
                "max_list": { "type": "integer", "description": "Maximum number of results", "default": DEFAULT_MAX_LIST }
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let query = query_arg(&arguments)?;
        let max_list = arguments
            .get("max_list")
            .and_then(|m| m.as_f64())
            .map(|m| (m.max(1.0) as u64).min(MAX_LIST_LIMIT))
            .unwrap_or(DEFAULT_MAX_LIST);
        let pairs = self.client.search(&query, Some(max_list)).await?;
        Ok(serde_json::to_value(pairs)?)
    }
}

/// `get_icd10_code_basic` and `get_icd10_code_advanced`
pub fn toolbox(fetcher: Fetcher) -> ToolBox {
    let client = Icd10Client::new(fetcher);
    ToolBox::new("icd10")
        .with_tool(Arc::new(BasicLookup { client: client.clone() }))
        .with_tool(Arc::new(AdvancedLookup { client }))
}
