//! 链节点访问端口（Port）
//!
//! 服务层只依赖这里的 trait，具体实现可以是 HTTP JSON-RPC 客户端，
//! 也可以是测试用的内存模拟节点。遵循整洁架构的依赖倒置原则。

use crate::domain::chain_types::{Block, CallRequest, Transaction, TransactionReceipt};
use crate::domain::errors::Result;
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};

/// 节点客户端：SDK 需要的 JSON-RPC 方法子集
///
/// 所有方法都是单次请求，不做重试；确认等待和扫块的重试策略在服务层实现。
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// eth_blockNumber - 当前最新区块号
    async fn block_number(&self) -> Result<u64>;

    /// eth_chainId
    async fn chain_id(&self) -> Result<u64>;

    /// eth_getBalance(addr, "latest")
    async fn balance_at(&self, address: Address) -> Result<U256>;

    /// eth_getTransactionCount(addr, "pending")
    async fn pending_nonce_at(&self, address: Address) -> Result<u64>;

    /// eth_gasPrice - 节点建议的 gas 价格
    async fn suggest_gas_price(&self) -> Result<U256>;

    /// eth_estimateGas
    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64>;

    /// eth_call(call, "latest")
    async fn call(&self, call: &CallRequest) -> Result<Vec<u8>>;

    /// eth_sendRawTransaction - 返回节点计算的交易哈希
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256>;

    /// eth_getTransactionReceipt；未打包时返回 None
    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>>;

    /// eth_getTransactionByHash
    async fn transaction_by_hash(&self, hash: H256) -> Result<Option<Transaction>>;

    /// eth_getBlockByNumber(n, true)
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>>;

    /// eth_getBlockByHash(h, true)
    async fn block_by_hash(&self, hash: H256) -> Result<Option<Block>>;

    /// eth_getCode(addr, "latest")
    async fn code_at(&self, address: Address) -> Result<Vec<u8>>;

    /// 释放底层资源；连接被连接池销毁时调用（可能在 Drop 中调用，不能阻塞）
    fn close(&self) {}
}

/// 建立新连接的工厂
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: ChainClient + 'static;

    /// 建立一个新的节点连接；失败时返回 `SdkError::DialFailed`
    async fn dial(&self) -> Result<Self::Conn>;
}
