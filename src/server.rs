use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::errors::{create_error_response, format_user_error, RelationError};
use crate::relationship_analyzer::RelationshipType;
use crate::service::RelationService;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

struct ToolInfo {
    description: String,
    input_schema: Value,
}

/// JSON-RPC 2.0 tool server over stdio.
///
/// Reads newline-delimited requests from stdin and writes one response
/// per line to stdout; logs go to stderr so the protocol stream stays
/// clean. Each tool wraps one [`RelationService`] operation.
pub struct ToolServer {
    service: Arc<RelationService>,
}

impl ToolServer {
    pub fn new(service: Arc<RelationService>) -> Self {
        Self { service }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        let mut stdout = tokio::io::stdout();

        info!(
            "Tool server listening on stdio ({} tools)",
            self.tool_definitions().len()
        );

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => {
                    // Notifications get no response.
                    if request.id.is_none() {
                        debug!("Ignoring notification: {}", request.method);
                        continue;
                    }
                    self.handle_request(request).await
                }
                Err(e) => error_response(-32700, &format!("Parse error: {}", e), None),
            };

            let serialized = serde_json::to_string(&response)?;
            stdout.write_all(serialized.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        info!("Stdin closed, shutting down");
        Ok(())
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => success_response(
                json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {
                        "name": self.service.config().server.name,
                        "version": self.service.config().server.version,
                    },
                    "capabilities": { "tools": {} },
                }),
                id,
            ),

            "tools/list" => {
                let tools: Vec<Value> = self
                    .tool_definitions()
                    .into_iter()
                    .map(|(name, info)| {
                        json!({
                            "name": name,
                            "description": info.description,
                            "inputSchema": info.input_schema,
                        })
                    })
                    .collect();
                success_response(json!({ "tools": tools }), id)
            }

            "tools/call" => {
                let params = request.params.unwrap_or_else(|| json!({}));
                let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                    return error_response(-32602, "Missing tool name", id);
                };
                let args = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                match self.call_tool(name, &args).await {
                    Ok(result) => {
                        let text = serde_json::to_string_pretty(&result)
                            .unwrap_or_else(|_| result.to_string());
                        success_response(
                            json!({ "content": [{ "type": "text", "text": text }] }),
                            id,
                        )
                    }
                    Err(e) => {
                        warn!("Tool {} failed: {}", name, e);
                        let code = if e.is_client_error() { -32602 } else { -32000 };
                        JsonRpcResponse {
                            jsonrpc: "2.0".to_string(),
                            result: None,
                            error: Some(JsonRpcError {
                                code,
                                message: format_user_error(&e),
                                data: Some(create_error_response(&e)),
                            }),
                            id,
                        }
                    }
                }
            }

            other => error_response(-32601, &format!("Method not found: {}", other), id),
        }
    }

    async fn call_tool(&self, name: &str, args: &Value) -> crate::errors::Result<Value> {
        match name {
            "store_content" => {
                let text = required_str(args, "text")?;
                let source = required_str(args, "source")?;
                let (item, categorization) = self
                    .service
                    .store_content(
                        text.to_string(),
                        source.to_string(),
                        metadata_arg(args),
                        optional_str(args, "category"),
                    )
                    .await?;
                Ok(json!({ "item": item, "categorization": categorization }))
            }

            "get_content" => {
                let id = required_str(args, "content_id")?;
                let item = self
                    .service
                    .get_content(id)
                    .await?
                    .ok_or_else(|| RelationError::NotFound(id.to_string()))?;
                Ok(json!({ "item": item }))
            }

            "update_content" => {
                let id = required_str(args, "content_id")?;
                let new_metadata = args
                    .get("metadata")
                    .and_then(|v| v.as_object())
                    .map(|_| metadata_arg(args));
                let item = self
                    .service
                    .update_content(id, optional_str(args, "text"), new_metadata)
                    .await?;
                Ok(json!({ "item": item }))
            }

            "delete_content" => {
                let id = required_str(args, "content_id")?;
                let edges_removed = self.service.delete_content(id).await?;
                Ok(json!({ "deleted": true, "edges_removed": edges_removed }))
            }

            "search_content" => {
                let query = required_str(args, "query")?;
                let category = optional_str(args, "category");
                let page = optional_usize(args, "page").unwrap_or(1);
                let page_size = optional_usize(args, "page_size").unwrap_or(0);
                let results = self
                    .service
                    .search(query, category.as_deref(), page, page_size)
                    .await?;
                Ok(serde_json::to_value(results)?)
            }

            "suggest_category" => {
                let text = required_str(args, "text")?;
                let source = required_str(args, "source")?;
                let suggestions = self.service.suggest_category(text, source);
                Ok(json!({ "suggestions": suggestions }))
            }

            "analyze_relationships" => {
                let id = required_str(args, "content_id")?;
                let rel_type = match optional_str(args, "relationship_type") {
                    Some(raw) => Some(RelationshipType::parse(&raw).ok_or_else(|| {
                        RelationError::Validation(vec![format!(
                            "unknown relationship type '{}'",
                            raw
                        )])
                    })?),
                    None => None,
                };
                let edges = self.service.analyze_relationships(id, rel_type).await?;
                let count = edges.len();
                Ok(json!({ "relationships": edges, "count": count }))
            }

            "impact_analysis" => {
                let description = required_str(args, "change_description")?;
                let categories: Option<Vec<String>> =
                    args.get("categories").and_then(|v| v.as_array()).map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    });
                let impacted = self
                    .service
                    .impact_analysis(
                        description,
                        categories.as_deref(),
                        optional_usize(args, "max_depth"),
                    )
                    .await?;
                let count = impacted.len();
                Ok(json!({ "impacted": impacted, "count": count }))
            }

            "detect_conflicts" => {
                let report = self.service.detect_conflicts().await?;
                Ok(serde_json::to_value(report)?)
            }

            "get_statistics" => {
                let statistics = self.service.statistics().await?;
                Ok(serde_json::to_value(statistics)?)
            }

            "health_check" => {
                let health = self.service.health().await?;
                Ok(serde_json::to_value(health)?)
            }

            other => Err(RelationError::Validation(vec![format!(
                "unknown tool '{}'",
                other
            )])),
        }
    }

    fn tool_definitions(&self) -> Vec<(&'static str, ToolInfo)> {
        vec![
            ("store_content", ToolInfo {
                description: "Store a content item: validate, categorize, embed, and index it"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "Content body to index" },
                        "source": { "type": "string", "description": "Origin system, e.g. confluence, jira, github, intercom" },
                        "category": { "type": "string", "description": "Explicit category (validated); categorized automatically when omitted" },
                        "metadata": { "type": "object", "description": "Key/value metadata; category-required fields are backfilled with defaults" }
                    },
                    "required": ["text", "source"]
                }),
            }),
            ("get_content", ToolInfo {
                description: "Fetch a stored content item by id".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content_id": { "type": "string", "description": "Content item id" }
                    },
                    "required": ["content_id"]
                }),
            }),
            ("update_content", ToolInfo {
                description: "Update a content item; a text change re-embeds it and recomputes its relationships"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content_id": { "type": "string", "description": "Content item id" },
                        "text": { "type": "string", "description": "Replacement text" },
                        "metadata": { "type": "object", "description": "Metadata entries to merge" }
                    },
                    "required": ["content_id"]
                }),
            }),
            ("delete_content", ToolInfo {
                description: "Delete a content item with its embedding and every relationship edge referencing it"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content_id": { "type": "string", "description": "Content item id" }
                    },
                    "required": ["content_id"]
                }),
            }),
            ("search_content", ToolInfo {
                description: "Similarity search over stored content with stable pagination".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search text" },
                        "category": { "type": "string", "description": "Restrict results to one category" },
                        "page": { "type": "integer", "description": "1-based page number (default: 1)" },
                        "page_size": { "type": "integer", "description": "Results per page (default: configured)" }
                    },
                    "required": ["query"]
                }),
            }),
            ("suggest_category", ToolInfo {
                description: "Advisory ranking of every configured category for a text and source"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "Content body" },
                        "source": { "type": "string", "description": "Origin system" }
                    },
                    "required": ["text", "source"]
                }),
            }),
            ("analyze_relationships", ToolInfo {
                description: "Discover typed relationship edges from a content item to similar items"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content_id": { "type": "string", "description": "Content item id" },
                        "relationship_type": {
                            "type": "string",
                            "enum": ["implements", "documents", "requires", "affects", "depends", "conflicts"],
                            "description": "Restrict analysis to one relationship type (default: all configured types)"
                        }
                    },
                    "required": ["content_id"]
                }),
            }),
            ("impact_analysis", ToolInfo {
                description: "Rank the items a change description would impact, following relationship chains"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "change_description": { "type": "string", "description": "What is changing" },
                        "categories": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Categories to seed from (default: all)"
                        },
                        "max_depth": { "type": "integer", "description": "Relationship traversal depth (default: configured)" }
                    },
                    "required": ["change_description"]
                }),
            }),
            ("detect_conflicts", ToolInfo {
                description: "Scan the relationship graph for bidirectional type mismatches, circular dependencies, and content contradictions"
                    .to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            }),
            ("get_statistics", ToolInfo {
                description: "Content and edge counts, backend connectivity, embedding health, and operation timings"
                    .to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            }),
            ("health_check", ToolInfo {
                description: "Storage and embedding backend health, including whether mock embeddings are active"
                    .to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            }),
        ]
    }
}

fn success_response(result: Value, id: Option<Value>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: Some(result),
        error: None,
        id,
    }
}

fn error_response(code: i32, message: &str, id: Option<Value>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_string(),
            data: None,
        }),
        id,
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> crate::errors::Result<&'a str> {
    args.get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            RelationError::Validation(vec![format!("missing required field '{}'", field)])
        })
}

fn optional_str(args: &Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn optional_usize(args: &Value, field: &str) -> Option<usize> {
    args.get(field).and_then(|v| v.as_u64()).map(|v| v as usize)
}

fn metadata_arg(args: &Value) -> HashMap<String, String> {
    args.get("metadata")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn server() -> ToolServer {
        let mut config = Config::default();
        config.embedding.api_key_env = "EMBEDDING_TEST_KEY_UNSET".to_string();
        config.embedding.dimensions = 128;
        ToolServer::new(Arc::new(RelationService::new(config).await.unwrap()))
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(params),
            id: Some(json!(1)),
        }
    }

    #[tokio::test]
    async fn test_tools_list_exposes_every_operation() {
        let server = server().await;
        let response = server.handle_request(request("tools/list", json!({}))).await;

        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();

        for expected in [
            "store_content",
            "get_content",
            "update_content",
            "delete_content",
            "search_content",
            "suggest_category",
            "analyze_relationships",
            "impact_analysis",
            "detect_conflicts",
            "get_statistics",
            "health_check",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
    }

    #[tokio::test]
    async fn test_store_and_get_round_trip() {
        let server = server().await;

        let stored = server
            .call_tool(
                "store_content",
                &json!({
                    "text": "A setup guide covering the documentation workflow",
                    "source": "confluence",
                }),
            )
            .await
            .unwrap();
        let id = stored["item"]["id"].as_str().unwrap();

        let fetched = server
            .call_tool("get_content", &json!({ "content_id": id }))
            .await
            .unwrap();
        assert_eq!(fetched["item"]["id"], stored["item"]["id"]);
        assert_eq!(fetched["item"]["category"], "knowledge");
    }

    #[tokio::test]
    async fn test_missing_required_field_is_validation_error() {
        let server = server().await;
        let err = server
            .call_tool("store_content", &json!({ "source": "confluence" }))
            .await
            .unwrap_err();

        assert!(matches!(err, RelationError::Validation(_)));
        assert!(err.violations()[0].contains("'text'"));
    }

    #[tokio::test]
    async fn test_get_missing_content_is_not_found() {
        let server = server().await;
        let err = server
            .call_tool("get_content", &json!({ "content_id": "ghost" }))
            .await
            .unwrap_err();
        assert!(matches!(err, RelationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_method_returns_error_code() {
        let server = server().await;
        let response = server
            .handle_request(request("resources/list", json!({})))
            .await;

        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_tool_error_carries_violation_payload() {
        let server = server().await;
        let response = server
            .handle_request(request(
                "tools/call",
                json!({
                    "name": "analyze_relationships",
                    "arguments": { "content_id": "x", "relationship_type": "romances" }
                }),
            ))
            .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        let data = error.data.unwrap();
        assert_eq!(data["error"]["type"], "validation");
    }

    #[tokio::test]
    async fn test_empty_search_returns_zero_shape() {
        let server = server().await;
        let result = server
            .call_tool("search_content", &json!({ "query": "nothing stored yet" }))
            .await
            .unwrap();

        assert_eq!(result["total_results"], 0);
        assert_eq!(result["total_pages"], 0);
        assert_eq!(result["results"].as_array().unwrap().len(), 0);
    }
}
