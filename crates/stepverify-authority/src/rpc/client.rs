use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AuthorityError, Result};

#[derive(Debug, Serialize)]
struct JsonRequestBody<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: Value,
}

#[derive(Debug, Deserialize)]
struct JsonResponseBody {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Blocking JSON-RPC client for an Ethereum node.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn rpc_request<D: DeserializeOwned>(&self, method: &str, params: Value) -> Result<D> {
        let body = JsonRequestBody {
            jsonrpc: "2.0",
            method,
            params,
            id: json!(1),
        };
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| self.classify(method, e))?;
        let body: JsonResponseBody = response
            .json()
            .map_err(|e| AuthorityError::Decode(format!("{method}: {e}")))?;

        debug!(method, "rpc response: {:?}", body.result);

        match body.error {
            None => serde_json::from_value(body.result)
                .map_err(|e| AuthorityError::Decode(format!("{method}: {e}"))),
            Some(error) => Err(AuthorityError::JsonRpc {
                code: error.code,
                message: error.message,
            }),
        }
    }

    fn classify(&self, method: &str, err: reqwest::Error) -> AuthorityError {
        if err.is_timeout() {
            AuthorityError::Timeout {
                what: method.to_string(),
                after: self.timeout,
            }
        } else {
            AuthorityError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn silent_node_is_a_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let client = RpcClient::new(url, Duration::from_millis(100)).unwrap();

        let err = client
            .rpc_request::<Value>("eth_blockNumber", json!([]))
            .unwrap_err();
        assert!(matches!(err, AuthorityError::Timeout { .. }), "{err}");
        assert!(err.is_transport());
        drop(listener);
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        drop(listener);
        let client = RpcClient::new(url, Duration::from_millis(500)).unwrap();

        let err = client
            .rpc_request::<Value>("eth_blockNumber", json!([]))
            .unwrap_err();
        assert!(err.is_transport(), "{err}");
    }
}
