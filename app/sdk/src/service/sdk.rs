//! SDK 门面
//!
//! 调用方只需要这一个入口：连接池生命周期、链上查询、各类转账、扫块。
//! 每个公开方法都可以被多个任务并发调用，连接池和检查点存储是唯一的共享状态。

use crate::config::SdkConfig;
use crate::domain::address::{parse_address, parse_contract_address};
use crate::domain::amount::TokenAmount;
use crate::domain::chain_types::{Block, Transaction, TransactionReceipt};
use crate::domain::context::CallContext;
use crate::domain::errors::{Result, SdkError};
use crate::domain::tx_types::{DecodedTransaction, NoncePolicy, SendRequest};
use crate::infrastructure::chain_client::{ChainClient, Dialer};
use crate::infrastructure::checkpoint_store::{CheckpointStore, FileCheckpointStore};
use crate::infrastructure::erc20;
use crate::infrastructure::eth_api_client::HttpDialer;
use crate::infrastructure::pool::ConnectionPool;
use crate::service::confirmation::TransferReceipt;
use crate::service::scanner::{BlockScanner, TxHandler};
use crate::service::transfer::TransferService;
use ethereum_types::H256;
use std::sync::Arc;
use std::time::Duration;

fn parse_hash(s: &str) -> Result<H256> {
    let body = s.trim().trim_start_matches("0x");
    if body.len() != 64 {
        return Err(SdkError::Decode(format!("invalid hash: {}", s)));
    }
    let bytes = hex::decode(body).map_err(|e| SdkError::Decode(format!("invalid hash: {}", e)))?;
    Ok(H256::from_slice(&bytes))
}

/// 链 SDK
pub struct ChainSdk<D: Dialer = HttpDialer> {
    config: SdkConfig,
    pool: ConnectionPool<D>,
    transfers: TransferService<D>,
}

impl ChainSdk<HttpDialer> {
    /// 按配置连接节点并预热连接池（拨号失败的连接跳过，之后按需新建）
    pub async fn connect(config: SdkConfig) -> Result<Self> {
        config.validate()?;
        let dialer =
            HttpDialer::new(&config.endpoint, config.dial_timeout()).expect_chain_id(config.chain_id);
        let sdk = Self::with_dialer(config, dialer);
        let warmed = sdk.pool.prewarm().await;
        tracing::info!(
            endpoint = %sdk.config.endpoint,
            warmed,
            capacity = sdk.pool.capacity(),
            "SDK 已初始化"
        );
        Ok(sdk)
    }
}

impl<D: Dialer> ChainSdk<D> {
    /// 使用自定义连接工厂，不预热
    pub fn with_dialer(config: SdkConfig, dialer: D) -> Self {
        let pool = ConnectionPool::new(dialer, config.pool_size);
        let transfers = TransferService::new(pool.clone(), &config);
        Self {
            config,
            pool,
            transfers,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.pool
    }

    /// 关闭连接池；之后新建连接的操作返回 `PoolClosed`
    pub fn close(&self) {
        self.pool.close();
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 最新区块号
    pub async fn block_number(&self) -> Result<u64> {
        let conn = self.pool.acquire().await?;
        conn.block_number().await
    }

    /// 原生币余额
    pub async fn get_balance(&self, address: &str) -> Result<TokenAmount> {
        let address = parse_address(address)?;
        let conn = self.pool.acquire().await?;
        let raw = conn.balance_at(address).await?;
        tracing::debug!(address = ?address, balance = %raw, "查询余额");
        Ok(TokenAmount::new(raw, self.config.native_decimals))
    }

    pub async fn get_pending_nonce(&self, address: &str) -> Result<u64> {
        let address = parse_address(address)?;
        let conn = self.pool.acquire().await?;
        conn.pending_nonce_at(address).await
    }

    /// 代币余额及精度
    pub async fn get_token_balance(&self, address: &str, contract: &str) -> Result<TokenAmount> {
        let address = parse_address(address)?;
        let contract = parse_contract_address(Some(contract))?;
        let conn = self.pool.acquire().await?;
        let amount = erc20::token_balance(&*conn, contract, address).await?;
        tracing::debug!(address = ?address, contract = ?contract, balance = %amount, "查询代币余额");
        Ok(amount)
    }

    pub async fn get_token_symbol(&self, contract: &str) -> Result<String> {
        let contract = parse_contract_address(Some(contract))?;
        let conn = self.pool.acquire().await?;
        erc20::symbol(&*conn, contract).await
    }

    /// 地址上有代码即为合约
    pub async fn is_contract(&self, address: &str) -> Result<bool> {
        let address = parse_address(address)?;
        let conn = self.pool.acquire().await?;
        Ok(!conn.code_at(address).await?.is_empty())
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
        let hash = parse_hash(hash)?;
        let conn = self.pool.acquire().await?;
        conn.transaction_by_hash(hash).await
    }

    pub async fn get_receipt_by_hash(&self, hash: &str) -> Result<Option<TransactionReceipt>> {
        let hash = parse_hash(hash)?;
        let conn = self.pool.acquire().await?;
        conn.transaction_receipt(hash).await
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        let hash = parse_hash(hash)?;
        let conn = self.pool.acquire().await?;
        conn.block_by_hash(hash).await
    }

    // ========================================================================
    // 转账
    // ========================================================================

    /// 通用入口：提交并等待确认
    pub async fn send(&self, ctx: &CallContext, request: &SendRequest) -> Result<TransferReceipt> {
        self.transfers.send_sync(ctx, request).await
    }

    /// 通用入口：提交后立即返回
    pub async fn submit(&self, request: &SendRequest) -> Result<H256> {
        self.transfers.send_async(request).await
    }

    /// 原生币转账，等待确认
    pub async fn send_sync(
        &self,
        ctx: &CallContext,
        private_key: &str,
        to: &str,
        amount: &str,
    ) -> Result<TransferReceipt> {
        self.send(ctx, &SendRequest::native(private_key, to, amount))
            .await
    }

    /// 原生币转账，不等待；`nonce` 为 0 时使用 pending nonce
    pub async fn send_async(&self, private_key: &str, to: &str, amount: &str, nonce: u64) -> Result<H256> {
        let request =
            SendRequest::native(private_key, to, amount).with_nonce(NoncePolicy::Explicit(nonce));
        self.submit(&request).await
    }

    /// 代币转账，等待确认
    pub async fn send_contract_sync(
        &self,
        ctx: &CallContext,
        private_key: &str,
        to: &str,
        amount: &str,
        contract: &str,
    ) -> Result<TransferReceipt> {
        self.send(ctx, &SendRequest::token(private_key, to, amount, contract))
            .await
    }

    /// 代币转账，使用必须指定且不小于 pending nonce 的 nonce，等待确认
    pub async fn send_contract_sync_with_nonce(
        &self,
        ctx: &CallContext,
        private_key: &str,
        to: &str,
        amount: &str,
        contract: &str,
        nonce: u64,
    ) -> Result<TransferReceipt> {
        let request = SendRequest::token(private_key, to, amount, contract)
            .with_nonce(NoncePolicy::Guarded(nonce));
        self.send(ctx, &request).await
    }

    /// 代币转账，不等待；`nonce` 为 0 时使用 pending nonce
    pub async fn send_contract_async(
        &self,
        private_key: &str,
        to: &str,
        amount: &str,
        contract: &str,
        nonce: u64,
    ) -> Result<H256> {
        let request = SendRequest::token(private_key, to, amount, contract)
            .with_nonce(NoncePolicy::Explicit(nonce));
        self.submit(&request).await
    }

    /// 向合约发送已编码的调用数据，等待确认
    pub async fn send_contract_input_data_sync(
        &self,
        ctx: &CallContext,
        private_key: &str,
        contract: &str,
        data: Vec<u8>,
    ) -> Result<TransferReceipt> {
        self.send(ctx, &SendRequest::raw_call(private_key, contract, data))
            .await
    }

    /// 提交已签名的原始交易并等待确认，返回收据和解码后的交易
    pub async fn send_raw_transaction(
        &self,
        ctx: &CallContext,
        raw_hex: &str,
    ) -> Result<(TransferReceipt, DecodedTransaction)> {
        self.transfers.send_raw_sync(ctx, raw_hex).await
    }

    /// 提交已签名的原始交易，不等待
    pub async fn send_raw_transaction_async(&self, raw_hex: &str) -> Result<(H256, DecodedTransaction)> {
        self.transfers.send_raw_async(raw_hex).await
    }

    // ========================================================================
    // 扫块
    // ========================================================================

    /// 使用指定检查点存储构建扫描器
    pub fn scanner<S, H>(&self, store: Arc<S>, start_height: u64, handler: H) -> Result<BlockScanner<D, S, H>>
    where
        S: CheckpointStore,
        H: TxHandler,
    {
        BlockScanner::new(
            self.pool.clone(),
            store,
            handler,
            start_height,
            self.config.scan.block_delay(),
        )
    }

    /// 从 `start_height` 开始扫块，检查点写入配置的目录；上下文取消后返回
    pub async fn start_scan<H>(
        &self,
        ctx: &CallContext,
        start_height: u64,
        poll_interval: Duration,
        handler: H,
    ) -> Result<()>
    where
        H: TxHandler,
    {
        if start_height < 1 {
            return Err(SdkError::InvalidStartHeight);
        }
        let store = Arc::new(FileCheckpointStore::open(&self.config.checkpoint_dir).await?);
        let scanner = self.scanner(store, start_height, handler)?;
        scanner.run(ctx, poll_interval).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock_chain::{MockChainClient, MockDialer};
    use ethereum_types::U256;

    const ADDR: &str = "0xffa27ebf4278105425b6D211F3557e2D3433F9A7";

    fn sdk() -> (ChainSdk<MockDialer>, MockDialer) {
        let dialer = MockDialer::new(MockChainClient::new());
        (ChainSdk::with_dialer(SdkConfig::default(), dialer.clone()), dialer)
    }

    #[test]
    fn test_parse_hash() {
        let hash = parse_hash("0x0000000000000000000000000000000000000000000000000000000000000abc").unwrap();
        assert_eq!(hash, H256::from_low_u64_be(0xabc));
        assert!(parse_hash("0x1234").is_err());
    }

    #[tokio::test]
    async fn test_get_balance_uses_native_decimals() {
        let (sdk, dialer) = sdk();
        dialer
            .chain()
            .set_balance(parse_address(ADDR).unwrap(), U256::from(2_500_000_000_000_000_000u64));

        let balance = sdk.get_balance(ADDR).await.unwrap();
        assert_eq!(balance.to_string(), "2.5");
        assert_eq!(balance.decimals, 18);
    }

    #[tokio::test]
    async fn test_is_contract() {
        let (sdk, dialer) = sdk();
        let address = parse_address(ADDR).unwrap();
        assert!(!sdk.is_contract(ADDR).await.unwrap());

        dialer.chain().set_code(address, vec![0x60, 0x80]);
        assert!(sdk.is_contract(ADDR).await.unwrap());
    }

    #[tokio::test]
    async fn test_queries_reject_bad_input_without_dialing() {
        let (sdk, dialer) = sdk();
        assert!(matches!(sdk.get_balance("0x12").await, Err(SdkError::InvalidAddress(_))));
        assert!(matches!(
            sdk.get_token_symbol("").await,
            Err(SdkError::ContractAddressRequired)
        ));
        assert!(matches!(sdk.get_block_by_hash("xyz").await, Err(SdkError::Decode(_))));
        assert_eq!(dialer.dial_count(), 0);
    }

    #[tokio::test]
    async fn test_input_data_requires_contract() {
        let (sdk, dialer) = sdk();
        let key = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let err = sdk
            .send_contract_input_data_sync(&CallContext::background(), key, "", vec![1, 2])
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::ContractAddressRequired));
        assert_eq!(dialer.dial_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_sdk() {
        let (sdk, _) = sdk();
        sdk.close();
        assert!(matches!(sdk.get_pending_nonce(ADDR).await, Err(SdkError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_start_scan_rejects_zero_height() {
        let (sdk, _) = sdk();
        let handler = |_: &Transaction, _: &Block| -> anyhow::Result<()> { Ok(()) };
        let err = sdk
            .start_scan(&CallContext::background(), 0, Duration::from_secs(1), handler)
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidStartHeight));
    }
}
