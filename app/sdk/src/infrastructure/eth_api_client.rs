//! EIP-1474 规范的 JSON-RPC 客户端实现
//!
//! 位于基础设施层，实现 `ChainClient` 端口，通过 HTTP 调用远端节点。

use crate::domain::chain_types::{
    block_number_param, hex_bytes, Block, CallRequest, Transaction, TransactionReceipt,
};
use crate::domain::errors::{Result, RpcError, SdkError};
use crate::infrastructure::chain_client::{ChainClient, Dialer};
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256, U64};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// JSON-RPC 请求结构
#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

/// JSON-RPC 响应结构
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    /// 区分 `"result": null`（Some(Null)）和字段缺失（None）
    #[serde(default, deserialize_with = "deserialize_present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 错误结构
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// 以太坊 JSON-RPC 客户端
///
/// - reqwest 内部连接池复用 TCP 连接
/// - 原子递增的请求 ID 避免锁竞争
#[derive(Debug)]
pub struct EthApiClient {
    /// HTTP 客户端
    client: Client,
    /// 远端 RPC 端点 URL
    rpc_url: String,
    /// 请求 ID 计数器(原子递增)
    request_id: Arc<AtomicU64>,
}

impl EthApiClient {
    /// 创建新的 JSON-RPC 客户端
    ///
    /// # 参数
    /// - `rpc_url`: 远端 RPC 端点 URL (例如: "https://node.fibochain.org")
    /// - `timeout`: 单次请求超时
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SdkError::DialFailed(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// 发送 JSON-RPC 请求，返回原始 result
    async fn send_request(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        tracing::trace!(method, id, "发送 JSON-RPC 请求");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RpcError::HttpStatus(response.status().as_u16()));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(error) = rpc_response.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_response.result.ok_or(RpcError::MissingResult)
    }

    /// 请求并反序列化 result；`null` 按类型的反序列化规则处理
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.send_request(method, params).await?;
        serde_json::from_value(value).map_err(|e| SdkError::Rpc(RpcError::Serialization(e)))
    }

    async fn request_bytes(&self, method: &str, params: Value) -> Result<Vec<u8>> {
        let data: String = self.request(method, params).await?;
        hex_bytes::decode(&data).map_err(|e| SdkError::Rpc(RpcError::Decode(e.to_string())))
    }
}

#[async_trait]
impl ChainClient for EthApiClient {
    async fn block_number(&self) -> Result<u64> {
        let n: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(n.as_u64())
    }

    async fn chain_id(&self) -> Result<u64> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    async fn balance_at(&self, address: Address) -> Result<U256> {
        self.request("eth_getBalance", json!([address, "latest"])).await
    }

    async fn pending_nonce_at(&self, address: Address) -> Result<u64> {
        let nonce: U64 = self
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(nonce.as_u64())
    }

    async fn suggest_gas_price(&self) -> Result<U256> {
        self.request("eth_gasPrice", json!([])).await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64> {
        let gas: U64 = self.request("eth_estimateGas", json!([call])).await?;
        Ok(gas.as_u64())
    }

    async fn call(&self, call: &CallRequest) -> Result<Vec<u8>> {
        self.request_bytes("eth_call", json!([call, "latest"])).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256> {
        let raw_hex = format!("0x{}", hex::encode(raw));
        let value = self
            .send_request("eth_sendRawTransaction", json!([raw_hex]))
            .await
            .map_err(SdkError::Submit)?;
        serde_json::from_value(value).map_err(|e| SdkError::Submit(RpcError::Serialization(e)))
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", json!([hash])).await
    }

    async fn transaction_by_hash(&self, hash: H256) -> Result<Option<Transaction>> {
        self.request("eth_getTransactionByHash", json!([hash])).await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        self.request(
            "eth_getBlockByNumber",
            json!([block_number_param(number), true]),
        )
        .await
    }

    async fn block_by_hash(&self, hash: H256) -> Result<Option<Block>> {
        self.request("eth_getBlockByHash", json!([hash, true])).await
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>> {
        self.request_bytes("eth_getCode", json!([address, "latest"]))
            .await
    }
}

/// HTTP 连接工厂
///
/// 每次拨号创建一个新的 `EthApiClient`，并在超时时间内用 eth_chainId 探测节点可达。
#[derive(Debug, Clone)]
pub struct HttpDialer {
    endpoint: String,
    timeout: Duration,
    expected_chain_id: Option<u64>,
}

impl HttpDialer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            expected_chain_id: None,
        }
    }

    /// 拨号时校验节点的 chain id，不一致只记录警告
    pub fn expect_chain_id(mut self, chain_id: u64) -> Self {
        self.expected_chain_id = Some(chain_id);
        self
    }
}

#[async_trait]
impl Dialer for HttpDialer {
    type Conn = EthApiClient;

    async fn dial(&self) -> Result<EthApiClient> {
        let client = EthApiClient::new(&self.endpoint, self.timeout)?;

        let chain_id = tokio::time::timeout(self.timeout, client.chain_id())
            .await
            .map_err(|_| SdkError::DialFailed(format!("{}: 连接超时", self.endpoint)))?
            .map_err(|e| SdkError::DialFailed(format!("{}: {}", self.endpoint, e)))?;

        if let Some(expected) = self.expected_chain_id {
            if expected != chain_id {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    expected,
                    actual = chain_id,
                    "节点 chain id 与配置不一致"
                );
            }
        }

        tracing::debug!(endpoint = %self.endpoint, chain_id, "已连接节点");
        Ok(client)
    }
}
