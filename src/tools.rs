//! Tool-call front end: JSON-RPC 2.0 with `initialize`, `tools/list` and
//! `tools/call`, transport-agnostic.
//!
//! `any2md-mcp` feeds it newline-delimited requests from stdin; the HTTP
//! server mounts it at `POST /mcp`. Both share [`handle_rpc`].

use crate::error::ConvertError;
use crate::options::OptionOverrides;
use crate::output::ErrorDetail;
use crate::request::{DocumentFormat, FileContent, FileEntry, NormalizedRequest, RawRequest};
use crate::service::ConversionService;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Response for a line that is not valid JSON-RPC.
    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::err(Value::Null, PARSE_ERROR, format!("Parse error: {detail}"))
    }
}

/// Handle one request. Notifications (no `id`) get no response.
pub async fn handle_rpc(service: &ConversionService, request: RpcRequest) -> Option<RpcResponse> {
    debug!("Received request: method={}", request.method);
    let Some(id) = request.id else {
        debug!("Notification '{}' acknowledged", request.method);
        return None;
    };

    let response = match request.method.as_str() {
        "initialize" => RpcResponse::ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                },
                "capabilities": { "tools": {} }
            }),
        ),
        "ping" => RpcResponse::ok(id, json!({})),
        "tools/list" => RpcResponse::ok(id, json!({ "tools": list_tools() })),
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Some(RpcResponse::err(id, INVALID_PARAMS, "missing tool name"));
            };
            if !TOOL_NAMES.contains(&name) {
                return Some(RpcResponse::err(id, INVALID_PARAMS, format!("Unknown tool: {name}")));
            }
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            info!("Calling tool: {}", name);

            let (payload, is_error) = match call_tool(service, name, arguments).await {
                Ok(value) => (value, false),
                Err(e) => {
                    warn!("Tool {} failed: {}", name, e);
                    (json!({ "error": ErrorDetail::from(&e) }), true)
                }
            };
            RpcResponse::ok(
                id,
                json!({
                    "content": [{
                        "type": "text",
                        "text": serde_json::to_string_pretty(&payload).unwrap_or_default()
                    }],
                    "isError": is_error
                }),
            )
        }
        other => RpcResponse::err(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    };
    Some(response)
}

// ── Tools ────────────────────────────────────────────────────────────────

const TOOL_NAMES: [&str; 7] = [
    "convert_pdf_to_markdown",
    "convert_word_to_markdown",
    "convert_excel_to_markdown",
    "batch_convert_documents",
    "analyze_document",
    "validate_document",
    "get_system_status",
];

fn option_properties() -> Value {
    json!({
        "output_format": { "type": "string", "enum": ["markdown", "html", "json"], "default": "markdown" },
        "extract_images": { "type": "boolean", "default": true },
        "remove_header_footer": { "type": "boolean", "default": true },
        "include_content": { "type": "boolean", "default": true },
        "paginate_output": { "type": "boolean", "default": true },
        "start_page": { "type": "integer", "minimum": 0 },
        "end_page": { "type": "integer", "description": "Exclusive" },
        "languages": {
            "description": "\"auto\", a comma-separated list, or an array of codes",
            "oneOf": [{ "type": "string" }, { "type": "array", "items": { "type": "string" } }]
        },
        "preserve_formatting": { "type": "boolean", "default": true },
        "include_formulas": { "type": "boolean", "default": true },
        "sheet_names": { "type": "array", "items": { "type": "string" } },
        "images_mandatory": { "type": "boolean", "default": false }
    })
}

fn file_schema(default_name: &str, with_options: bool) -> Value {
    let mut properties = json!({
        "file_content": { "type": "string", "description": "Base64 encoded document (data: URIs accepted)" },
        "filename": { "type": "string", "default": default_name }
    });
    if with_options {
        if let (Some(map), Value::Object(opts)) = (properties.as_object_mut(), option_properties()) {
            map.extend(opts);
        }
    }
    json!({ "type": "object", "properties": properties, "required": ["file_content"] })
}

/// Tool definitions for `tools/list`.
pub fn list_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "convert_pdf_to_markdown",
            "description": "Convert a PDF document to Markdown, HTML or JSON",
            "inputSchema": file_schema("document.pdf", true)
        }),
        json!({
            "name": "convert_word_to_markdown",
            "description": "Convert a Word (.docx) document to Markdown, HTML or JSON",
            "inputSchema": file_schema("document.docx", true)
        }),
        json!({
            "name": "convert_excel_to_markdown",
            "description": "Convert an Excel workbook (.xlsx, .xls) to Markdown tables",
            "inputSchema": file_schema("workbook.xlsx", true)
        }),
        json!({
            "name": "batch_convert_documents",
            "description": "Convert several documents of any supported type concurrently",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "documents": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "filename": { "type": "string" },
                                "file_content": { "type": "string" },
                                "options": { "type": "object", "properties": option_properties() }
                            },
                            "required": ["filename", "file_content"]
                        }
                    },
                    "global_options": {
                        "type": "object",
                        "properties": option_properties()
                    },
                    "max_concurrent": { "type": "integer", "minimum": 1 }
                },
                "required": ["documents"]
            }
        }),
        json!({
            "name": "analyze_document",
            "description": "Report page, sheet and image structure without converting",
            "inputSchema": file_schema("document.pdf", false)
        }),
        json!({
            "name": "validate_document",
            "description": "Check type, encoding and size of a document without converting",
            "inputSchema": file_schema("document.pdf", false)
        }),
        json!({
            "name": "get_system_status",
            "description": "Service version, uptime, active jobs and supported formats",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

#[derive(Debug, Deserialize)]
struct FileArgs {
    filename: Option<String>,
    #[serde(alias = "content")]
    file_content: Option<FileContent>,
    #[serde(flatten)]
    options: OptionOverrides,
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    #[serde(alias = "files")]
    documents: Vec<FileEntry>,
    #[serde(default)]
    global_options: OptionOverrides,
    max_concurrent: Option<usize>,
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T, ConvertError> {
    serde_json::from_value(arguments).map_err(|e| ConvertError::validation("arguments", e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ConvertError> {
    serde_json::to_value(value).map_err(|e| ConvertError::Internal(e.to_string()))
}

/// Run one tool. Failures come back as [`ConvertError`]s for the caller to
/// report; conversion failures inside a successful call are `error` results.
pub async fn call_tool(
    service: &ConversionService,
    name: &str,
    arguments: Value,
) -> Result<Value, ConvertError> {
    match name {
        "convert_pdf_to_markdown" => {
            convert_family(service, arguments, "document.pdf", &[DocumentFormat::Pdf]).await
        }
        "convert_word_to_markdown" => {
            convert_family(service, arguments, "document.docx", &[DocumentFormat::Docx]).await
        }
        "convert_excel_to_markdown" => {
            convert_family(
                service,
                arguments,
                "workbook.xlsx",
                &[DocumentFormat::Xlsx, DocumentFormat::Xls],
            )
            .await
        }
        "batch_convert_documents" => {
            let args: BatchArgs = parse_args(arguments)?;
            let request = RawRequest::Batch {
                files: args.documents,
                global_options: args.global_options,
            };
            let entries = match service.normalize(request)? {
                NormalizedRequest::Batch(entries) => entries,
                NormalizedRequest::Single(job) => vec![Ok(job)],
            };
            to_value(&service.convert_batch(entries, args.max_concurrent).await)
        }
        "analyze_document" => {
            let args: FileArgs = parse_args(arguments)?;
            let filename = args.filename.unwrap_or_else(|| "document.pdf".to_string());
            let content = args
                .file_content
                .ok_or_else(|| ConvertError::validation("file_content", "is required"))?;
            to_value(&service.inspect(&filename, &content).await?)
        }
        "validate_document" => {
            let args: FileArgs = parse_args(arguments)?;
            to_value(&service.validate(args.filename.as_deref(), args.file_content.as_ref()))
        }
        "get_system_status" => to_value(&service.status()),
        other => Err(ConvertError::validation("name", format!("unknown tool '{other}'"))),
    }
}

async fn convert_family(
    service: &ConversionService,
    arguments: Value,
    default_name: &str,
    accepted: &[DocumentFormat],
) -> Result<Value, ConvertError> {
    let args: FileArgs = parse_args(arguments)?;
    let filename = args.filename.unwrap_or_else(|| default_name.to_string());
    let format = DocumentFormat::from_filename(&filename)?;
    if !accepted.contains(&format) {
        let expected: Vec<&str> = accepted.iter().map(|f| f.extension()).collect();
        return Err(ConvertError::validation(
            "filename",
            format!("expected a {} file, got '{}'", expected.join(" or "), filename),
        ));
    }
    let request = RawRequest::Single {
        filename: Some(filename),
        content: args.file_content,
        options: args.options,
    };
    to_value(&service.convert(request).await?)
}
