//! Outbound HTTP requests to an allow-list of hosts.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Method;
use serde_json::{json, Map, Value};
use url::Url;

use crate::tools::{req_str, Tool, ToolError, ToolResult};

const MAX_REDIRECTS: usize = 10;

/// `*.example.com` entries match any subdomain.
fn host_allowed(allowed_hosts: &[String], url: &Url) -> bool {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    allowed_hosts.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(suffix) => host.ends_with(&format!(".{suffix}")),
            None => host == pattern,
        }
    })
}

/// Follow a redirect only while every hop stays on an allowed host.
fn redirect_policy(allowed_hosts: Arc<Vec<String>>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        let url = attempt.url();
        if !matches!(url.scheme(), "http" | "https") || !host_allowed(&allowed_hosts, url) {
            let target = url.to_string();
            return attempt.error(format!("redirect to {target} is not in the allowed list"));
        }
        attempt.follow()
    })
}

pub struct ApiRequestTool {
    http: reqwest::Client,
    allowed_hosts: Arc<Vec<String>>,
}

impl ApiRequestTool {
    pub fn new(allowed_hosts: Vec<String>) -> Result<Self, ToolError> {
        let allowed_hosts = Arc::new(allowed_hosts);
        let http = reqwest::Client::builder()
            .redirect(redirect_policy(allowed_hosts.clone()))
            .build()
            .map_err(|e| ToolError::Failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            allowed_hosts,
        })
    }

    /// Parse the URL and make sure its host is allowed.
    pub fn check_url(&self, raw: &str) -> Result<Url, ToolError> {
        let url = Url::parse(raw)
            .map_err(|e| ToolError::InvalidArgument(format!("Invalid URL {raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidArgument(format!(
                "Unsupported scheme: {}",
                url.scheme()
            )));
        }
        if !host_allowed(&self.allowed_hosts, &url) {
            return Err(ToolError::AccessDenied(format!(
                "host {} is not in the allowed list",
                url.host_str().unwrap_or_default()
            )));
        }
        Ok(url)
    }
}

fn string_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Tool for ApiRequestTool {
    fn name(&self) -> &str {
        "api_request"
    }

    fn description(&self) -> &str {
        "Make HTTP API requests"
    }

    fn category(&self) -> &str {
        "web"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"]
                },
                "url": {"type": "string", "description": "API endpoint URL"},
                "headers": {"type": "object", "description": "Request headers"},
                "params": {"type": "object", "description": "Query parameters"},
                "json_data": {"description": "JSON body data"},
                "data": {"type": "object", "description": "Form data"}
            },
            "required": ["method", "url"]
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        let method = match req_str(args, "method")?.to_ascii_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => {
                return Err(ToolError::InvalidArgument(format!(
                    "Unsupported method: {other}"
                )))
            }
        };
        let url = self.check_url(req_str(args, "url")?)?;

        let mut request = self
            .http
            .request(method, url)
            .timeout(self.timeout())
            .query(&string_pairs(args.get("params")));
        for (name, value) in string_pairs(args.get("headers")) {
            request = request.header(name, value);
        }
        if let Some(body) = args.get("json_data").filter(|v| !v.is_null()) {
            request = request.json(body);
        } else if args.get("data").is_some_and(Value::is_object) {
            request = request.form(&string_pairs(args.get("data")));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("request failed: {e}")))?;
        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
                )
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to read body: {e}")))?;
        let content = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        let data = json!({
            "status_code": status.as_u16(),
            "headers": headers,
            "content": content,
        });
        if status.is_success() {
            Ok(ToolResult::success(data))
        } else {
            Ok(ToolResult::partial(data, format!("HTTP {}", status.as_u16())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_host_allow_list() {
        let tool = ApiRequestTool::new(vec!["api.example.com".into(), "*.internal.net".into()]).unwrap();
        assert!(tool.check_url("https://api.example.com/v1").is_ok());
        assert!(tool.check_url("http://svc.internal.net/x").is_ok());
        assert!(tool.check_url("http://internal.net/x").is_err());
        assert!(tool.check_url("http://evil.com").is_err());
        assert!(tool.check_url("ftp://api.example.com").is_err());
        assert!(tool.check_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_request_against_mock() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(GET).path("/items").query_param("page", "2");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"items": [1, 2]}));
        }).await;

        let tool = ApiRequestTool::new(vec!["127.0.0.1".into(), "localhost".into()]).unwrap();
        let args = json!({
            "method": "get",
            "url": server.url("/items"),
            "params": {"page": 2}
        });
        let result = tool.execute(args.as_object().unwrap()).await.unwrap();
        mock.assert_async().await;
        assert!(result.is_success());
        assert_eq!(result.data["status_code"], 200);
        assert_eq!(result.data["content"]["items"], json!([1, 2]));
    }

    #[tokio::test]
    async fn test_non_success_is_partial() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(DELETE).path("/gone");
            then.status(404).body("missing");
        }).await;

        let tool = ApiRequestTool::new(vec!["127.0.0.1".into(), "localhost".into()]).unwrap();
        let args = json!({"method": "DELETE", "url": server.url("/gone")});
        let result = tool.execute(args.as_object().unwrap()).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("HTTP 404"));
        assert_eq!(result.data["content"], "missing");
    }

    #[tokio::test]
    async fn test_redirects_stay_on_allowed_hosts() {
        let server = MockServer::start_async().await;
        let elsewhere = format!("http://localhost:{}/secret", server.port());
        let hop = server.mock_async(|when, then| {
            when.method(GET).path("/hop");
            then.status(302).header("location", "/final");
        }).await;
        let fin = server.mock_async(|when, then| {
            when.method(GET).path("/final");
            then.status(200).body("done");
        }).await;
        let escape = server.mock_async(|when, then| {
            when.method(GET).path("/escape");
            then.status(302).header("location", elsewhere.as_str());
        }).await;
        let secret = server.mock_async(|when, then| {
            when.method(GET).path("/secret");
            then.status(200).body("leaked");
        }).await;

        // Only the literal address is allowed, so "localhost" is a different host.
        let tool = ApiRequestTool::new(vec!["127.0.0.1".into()]).unwrap();

        let args = json!({"method": "GET", "url": server.url("/hop")});
        let result = tool.execute(args.as_object().unwrap()).await.unwrap();
        hop.assert_async().await;
        fin.assert_async().await;
        assert_eq!(result.data["content"], "done");

        let args = json!({"method": "GET", "url": server.url("/escape")});
        let err = tool.execute(args.as_object().unwrap()).await.unwrap_err();
        escape.assert_async().await;
        secret.assert_hits_async(0).await;
        assert!(matches!(err, ToolError::Failed(_)));
    }
}
