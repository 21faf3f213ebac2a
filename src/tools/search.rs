//! 搜索工具：DuckDuckGo Instant Answer API
//!
//! 输入为查询字符串或 {"query": "...", "num_results": N}；返回 {results: [{title, snippet}]}。
//! 网络错误原样上抛，由执行层按可重试错误处理。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{input_as_str, Tool};

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com/";
const DEFAULT_NUM_RESULTS: usize = 5;

/// 网络搜索工具
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "使用搜索引擎检索网络信息，返回标题与摘要列表"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["search".to_string(), "web".to_string(), "research".to_string()]
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let (query, num_results) = match &input {
            Value::Object(map) => (
                map.get("query").map(input_as_str).unwrap_or_default(),
                map.get("num_results")
                    .and_then(|v| v.as_u64())
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_NUM_RESULTS),
            ),
            other => (input_as_str(other), DEFAULT_NUM_RESULTS),
        };
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err("empty search query".to_string());
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("no_redirect", "1"),
            ])
            .send()
            .await
            .map_err(|e| format!("search request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("search http status {}", response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("search response parse failed: {}", e))?;

        let mut results = Vec::new();
        if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str()) {
            if !abstract_text.is_empty() {
                results.push(json!({
                    "title": body.get("Heading").and_then(|v| v.as_str()).unwrap_or(&query),
                    "snippet": abstract_text,
                }));
            }
        }
        if let Some(topics) = body.get("RelatedTopics").and_then(|v| v.as_array()) {
            for topic in topics {
                if results.len() >= num_results {
                    break;
                }
                if let Some(text) = topic.get("Text").and_then(|v| v.as_str()) {
                    let title = topic
                        .get("FirstURL")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    results.push(json!({"title": title, "snippet": text}));
                }
            }
        }

        Ok(json!({"query": query, "results": results, "count": results.len()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_empty_query() {
        let tool = WebSearchTool::default();
        assert!(tool.execute(json!("")).await.is_err());
        assert!(tool.execute(json!({"query": "  "})).await.is_err());
    }
}
