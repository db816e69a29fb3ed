//! Minimal HTTP front end.
//!
//! Serves routes that exercise the warning pipeline end to end:
//!
//! - `GET /_settings?keys=a,b` reads each key through the settings registry;
//!   deprecated keys add a `Warning` header.
//! - `GET|POST /_cluster/deprecated_settings` is the deprecated form of the
//!   same lookup. Every call warns about the endpoint itself, and naming the
//!   keys under `deprecated_settings` instead of `settings` warns about the
//!   field. Keys come from a JSON body or from the query string.
//! - `GET /<index>[,<index>...]/_search` scatters one sub-request per index;
//!   every index raises its own deprecation and all of them roll up into the
//!   single response.

use crate::emitter::DeprecationLogger;
use crate::error::Result;
use crate::fanout::{scatter_gather, ShardHandler, ShardTarget};
use crate::pipeline::{WarnedResponse, WarningPipeline};
use crate::settings::{Settings, SettingsRegistry};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::form_urlencoded;

/// Message raised by every index a search touches.
pub const DEPRECATED_QUERY_TEMPLATE: &str = "[{}] index was searched with a deprecated query";

/// Path of the deprecated settings lookup.
pub const DEPRECATED_SETTINGS_PATH: &str = "/_cluster/deprecated_settings";

/// Raised by every call to [`DEPRECATED_SETTINGS_PATH`].
pub const DEPRECATED_ENDPOINT: &str =
    "[/_cluster/deprecated_settings] endpoint is deprecated. use [/_settings] instead";

/// Raised when keys are sent under the `deprecated_settings` field.
pub const DEPRECATED_USAGE: &str =
    "[deprecated_settings] usage is deprecated. use [settings] instead";

/// Upper bound on the request line plus headers.
const MAX_HEAD_BYTES: u64 = 16 * 1024;

/// Upper bound on a request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// HTTP front end for the warning pipeline.
pub struct WarningServer {
    pipeline: Arc<WarningPipeline>,
    settings: Settings,
    registry: SettingsRegistry,
    search: Arc<SearchShards>,
    rest: DeprecationLogger,
}

impl WarningServer {
    pub fn new(
        pipeline: Arc<WarningPipeline>,
        settings: Settings,
        registry: SettingsRegistry,
    ) -> Self {
        let settings = settings.with_logger(pipeline.logger("settings"));
        let search = Arc::new(SearchShards {
            logger: pipeline.logger("query"),
        });
        let rest = pipeline.logger("rest");
        Self {
            pipeline,
            settings,
            registry,
            search,
            rest,
        }
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(socket).await {
                    warn!(peer = %peer, error = %e, "Connection failed");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> io::Result<()> {
        let mut reader = BufReader::new(socket);

        let head = match read_head(&mut reader).await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed request");
                let body = json!({ "error": e.to_string() });
                return write_response(reader.into_inner(), 400, &[], &body).await;
            }
        };
        debug!(method = %head.method, target = %head.target, "Handling request");

        if head.content_length > MAX_BODY_BYTES {
            let body = json!({ "error": "request body too large" });
            return write_response(reader.into_inner(), 413, &[], &body).await;
        }
        let mut body = vec![0; head.content_length];
        reader.read_exact(&mut body).await?;

        match self.route(&head.method, &head.target, &body).await {
            Ok(response) => {
                let (status, body) = response.body;
                write_response(reader.into_inner(), status, &response.headers, &body).await
            }
            Err(e) => {
                warn!(error = %e, "Request could not be served");
                let body = json!({ "error": e.to_string() });
                write_response(reader.into_inner(), 500, &[], &body).await
            }
        }
    }

    /// Serve one request, returning status, body, and warning headers.
    pub async fn route(
        &self,
        method: &str,
        target: &str,
        body: &[u8],
    ) -> Result<WarnedResponse<(u16, Value)>> {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        if path == DEPRECATED_SETTINGS_PATH && (method == "GET" || method == "POST") {
            return self
                .pipeline
                .handle(async move {
                    self.rest.deprecated_text(DEPRECATED_ENDPOINT);
                    match SettingsRequest::parse(query, body) {
                        Ok(request) => {
                            if request.deprecated_field {
                                self.rest.deprecated_text(DEPRECATED_USAGE);
                            }
                            (200, self.read_settings(&request.keys))
                        }
                        Err(reason) => (400, json!({ "error": reason })),
                    }
                })
                .await;
        }

        if method != "GET" {
            return self
                .pipeline
                .handle(async { (405, json!({ "error": "method not allowed" })) })
                .await;
        }

        if path == "/_settings" {
            let keys = query_param(query, "keys")
                .map(|keys| split_keys(&keys))
                .unwrap_or_default();
            return self
                .pipeline
                .handle(async move { (200, self.read_settings(&keys)) })
                .await;
        }

        if let Some(indices) = path
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix("/_search"))
        {
            let targets: Vec<ShardTarget> = indices
                .split(',')
                .filter(|i| !i.is_empty())
                .map(|index| ShardTarget::new(index, 0))
                .collect();
            let search = Arc::clone(&self.search);
            return self
                .pipeline
                .handle(async move { search_response(scatter_gather(search, targets).await) })
                .await;
        }

        self.pipeline
            .handle(async { (404, json!({ "error": "not found" })) })
            .await
    }

    fn read_settings(&self, keys: &[String]) -> Value {
        let mut out = Map::new();
        for key in keys {
            let value = self
                .registry
                .access(&self.settings, key)
                .map_or(Value::Null, |v| Value::String(v.to_string()));
            out.insert(key.clone(), value);
        }
        Value::Object(out)
    }
}

/// Body accepted by the deprecated settings endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsBody {
    #[serde(default)]
    settings: Vec<String>,
    deprecated_settings: Option<Vec<String>>,
}

#[derive(Debug)]
struct SettingsRequest {
    keys: Vec<String>,
    deprecated_field: bool,
}

impl SettingsRequest {
    fn parse(query: &str, body: &[u8]) -> std::result::Result<Self, String> {
        let fields = if body.iter().all(u8::is_ascii_whitespace) {
            SettingsBody {
                settings: query_param(query, "settings")
                    .map(|keys| split_keys(&keys))
                    .unwrap_or_default(),
                deprecated_settings: query_param(query, "deprecated_settings")
                    .map(|keys| split_keys(&keys)),
            }
        } else {
            serde_json::from_slice(body).map_err(|e| format!("invalid request body: {}", e))?
        };

        let deprecated_field = fields.deprecated_settings.is_some();
        let mut keys = fields.settings;
        keys.extend(fields.deprecated_settings.unwrap_or_default());
        Ok(Self {
            keys,
            deprecated_field,
        })
    }
}

/// Shard handler behind the `_search` route.
struct SearchShards {
    logger: DeprecationLogger,
}

#[async_trait]
impl ShardHandler for SearchShards {
    async fn handle(&self, target: &ShardTarget) -> Result<Value> {
        self.logger
            .deprecated(DEPRECATED_QUERY_TEMPLATE, &[&target.index]);
        Ok(json!({ "index": target.index, "hits": 0 }))
    }
}

fn search_response(outcomes: Vec<crate::fanout::ShardOutcome>) -> (u16, Value) {
    let total = outcomes.len();
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    let hits: Vec<Value> = outcomes
        .into_iter()
        .filter_map(|o| o.result.ok())
        .collect();
    (
        200,
        json!({
            "_shards": { "total": total, "successful": total - failed, "failed": failed },
            "results": hits,
        }),
    )
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    content_length: usize,
}

/// Read the request line and headers, at most [`MAX_HEAD_BYTES`] in total.
async fn read_head<R>(reader: &mut R) -> io::Result<RequestHead>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = (&mut *reader).take(MAX_HEAD_BYTES);

    let mut request_line = String::new();
    read_head_line(&mut head, &mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0;
    let mut line = String::new();
    loop {
        line.clear();
        if read_head_line(&mut head, &mut line).await? == 0 || line.trim_end().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid_data("invalid Content-Length"))?;
            }
        }
    }

    Ok(RequestHead {
        method,
        target,
        content_length,
    })
}

async fn read_head_line<R>(reader: &mut R, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let n = reader.read_line(line).await?;
    if n > 0 && !line.ends_with('\n') {
        return Err(invalid_data("request head too large or truncated"));
    }
    Ok(n)
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

async fn write_response(
    mut socket: TcpStream,
    status: u16,
    headers: &[(String, String)],
    body: &Value,
) -> io::Result<()> {
    socket
        .write_all(render_http(status, headers, body).as_bytes())
        .await?;
    socket.shutdown().await
}

fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

/// Render a complete HTTP/1.1 response.
pub fn render_http(status: u16, headers: &[(String, String)], body: &Value) -> String {
    let body = body.to_string();
    let mut response = format!("HTTP/1.1 {} {}\r\n", status, status_text(status));
    response.push_str("Content-Type: application/json\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    response
}
