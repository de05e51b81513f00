//! 模拟链节点
//!
//! 内存实现的 `ChainClient`，用于测试和开发。克隆出的实例共享同一份状态，
//! 因此 `MockDialer` 拨出的每个连接看到的都是同一条链。

use crate::domain::chain_types::{Block, CallRequest, Transaction, TransactionReceipt};
use crate::domain::errors::{Result, RpcError, SdkError};
use crate::domain::tx_types::{decode_raw_transaction, DecodedTransaction};
use crate::infrastructure::chain_client::{ChainClient, Dialer};
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256, U64};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// 收据查询的脚本化返回
#[derive(Debug, Clone)]
pub enum ReceiptStep {
    /// 节点返回 null
    NotFound,
    /// 查询出错
    Error,
    Found(TransactionReceipt),
}

struct MockState {
    head: u64,
    chain_id: u64,
    gas_price: U256,
    estimate_gas: u64,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    code: HashMap<Address, Vec<u8>>,
    call_responses: HashMap<(Address, [u8; 4]), Vec<u8>>,
    blocks: BTreeMap<u64, Block>,
    failing_blocks: HashSet<u64>,
    transactions: HashMap<H256, Transaction>,
    receipts: HashMap<H256, TransactionReceipt>,
    receipt_scripts: HashMap<H256, VecDeque<ReceiptStep>>,
    auto_mine: bool,
    send_error: Option<String>,
    sent: Vec<DecodedTransaction>,
    receipt_queries: usize,
    block_queries: Vec<u64>,
}

/// 模拟的内存链节点（支持 Clone，共享状态）
#[derive(Clone)]
pub struct MockChainClient {
    state: Arc<Mutex<MockState>>,
    closed: Arc<AtomicUsize>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                head: 0,
                chain_id: 12306,
                gas_price: U256::from(1_000_000_000u64),
                estimate_gas: 60_000,
                balances: HashMap::new(),
                nonces: HashMap::new(),
                code: HashMap::new(),
                call_responses: HashMap::new(),
                blocks: BTreeMap::new(),
                failing_blocks: HashSet::new(),
                transactions: HashMap::new(),
                receipts: HashMap::new(),
                receipt_scripts: HashMap::new(),
                auto_mine: true,
                send_error: None,
                sent: Vec::new(),
                receipt_queries: 0,
                block_queries: Vec::new(),
            })),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state().chain_id = chain_id;
    }

    pub fn set_gas_price(&self, gas_price: U256) {
        self.state().gas_price = gas_price;
    }

    pub fn set_estimate_gas(&self, gas: u64) {
        self.state().estimate_gas = gas;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.state().nonces.insert(address, nonce);
    }

    pub fn set_code(&self, address: Address, code: Vec<u8>) {
        self.state().code.insert(address, code);
    }

    /// 设置 eth_call 返回值，按合约地址和 4 字节选择器匹配
    pub fn set_call_response(&self, contract: Address, selector: [u8; 4], response: Vec<u8>) {
        self.state()
            .call_responses
            .insert((contract, selector), response);
    }

    /// 添加区块，同时登记其中的交易
    pub fn add_block(&self, block: Block) {
        let mut state = self.state();
        for tx in &block.transactions {
            state.transactions.insert(tx.hash, tx.clone());
        }
        let number = block.number();
        state.blocks.insert(number, block);
        if number > state.head {
            state.head = number;
        }
    }

    /// 指定区块的查询返回错误
    pub fn fail_block(&self, number: u64) {
        self.state().failing_blocks.insert(number);
    }

    pub fn heal_block(&self, number: u64) {
        self.state().failing_blocks.remove(&number);
    }

    pub fn add_transaction(&self, tx: Transaction) {
        self.state().transactions.insert(tx.hash, tx);
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        self.state()
            .receipts
            .insert(receipt.transaction_hash, receipt);
    }

    /// 按顺序返回脚本中的结果，脚本用完后回落到已登记的收据
    pub fn script_receipts(&self, hash: H256, steps: Vec<ReceiptStep>) {
        self.state().receipt_scripts.insert(hash, steps.into());
    }

    /// 发送交易后是否立即生成成功收据（默认开启）
    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.state().auto_mine = auto_mine;
    }

    /// eth_sendRawTransaction 返回节点错误
    pub fn fail_send(&self, message: &str) {
        self.state().send_error = Some(message.to_string());
    }

    /// 已提交的交易（按提交顺序）
    pub fn sent_transactions(&self) -> Vec<DecodedTransaction> {
        self.state().sent.clone()
    }

    pub fn receipt_queries(&self) -> usize {
        self.state().receipt_queries
    }

    /// 按查询顺序记录的区块号
    pub fn block_queries(&self) -> Vec<u64> {
        self.state().block_queries.clone()
    }

    /// 被连接池销毁的次数
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// 构造测试区块，哈希由区块号派生
    pub fn make_block(number: u64, transactions: Vec<Transaction>) -> Block {
        Block {
            number: U64::from(number),
            hash: H256::from_low_u64_be(0xb000 + number),
            parent_hash: H256::from_low_u64_be(0xb000 + number.saturating_sub(1)),
            transactions,
            ..Default::default()
        }
    }

    /// 构造测试交易
    pub fn make_transaction(hash: u64, from: Address, to: Address, value: U256) -> Transaction {
        Transaction {
            hash: H256::from_low_u64_be(hash),
            from,
            to: Some(to),
            value,
            gas: U256::from(21000),
            ..Default::default()
        }
    }

    /// 成功收据
    pub fn success_receipt(hash: H256, block_number: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(block_number)),
            status: Some(U64::one()),
            ..Default::default()
        }
    }

    /// 回滚收据
    pub fn failed_receipt(hash: H256, block_number: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(U64::from(block_number)),
            status: Some(U64::zero()),
            ..Default::default()
        }
    }
}

fn node_error(message: &str) -> SdkError {
    SdkError::Rpc(RpcError::Rpc {
        code: -32000,
        message: message.to_string(),
    })
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.state().head)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.state().chain_id)
    }

    async fn balance_at(&self, address: Address) -> Result<U256> {
        Ok(self.state().balances.get(&address).copied().unwrap_or_default())
    }

    async fn pending_nonce_at(&self, address: Address) -> Result<u64> {
        Ok(self.state().nonces.get(&address).copied().unwrap_or_default())
    }

    async fn suggest_gas_price(&self) -> Result<U256> {
        Ok(self.state().gas_price)
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<u64> {
        Ok(self.state().estimate_gas)
    }

    async fn call(&self, call: &CallRequest) -> Result<Vec<u8>> {
        let data = call.data.as_deref().unwrap_or_default();
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| node_error("execution reverted"))?;
        self.state()
            .call_responses
            .get(&(call.to, selector))
            .cloned()
            .ok_or_else(|| node_error("execution reverted"))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256> {
        let mut state = self.state();
        if let Some(message) = &state.send_error {
            return Err(SdkError::Submit(RpcError::Rpc {
                code: -32000,
                message: message.clone(),
            }));
        }

        let decoded = decode_raw_transaction(raw)
            .map_err(|e| SdkError::Submit(RpcError::Decode(e.to_string())))?;
        let hash = decoded.hash();
        if state.auto_mine {
            let block = state.head + 1;
            state
                .receipts
                .insert(hash, Self::success_receipt(hash, block));
        }
        state.sent.push(decoded);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        let mut state = self.state();
        state.receipt_queries += 1;

        if let Some(step) = state.receipt_scripts.get_mut(&hash).and_then(|s| s.pop_front()) {
            return match step {
                ReceiptStep::NotFound => Ok(None),
                ReceiptStep::Error => Err(node_error("receipt lookup failed")),
                ReceiptStep::Found(receipt) => Ok(Some(receipt)),
            };
        }
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn transaction_by_hash(&self, hash: H256) -> Result<Option<Transaction>> {
        Ok(self.state().transactions.get(&hash).cloned())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let mut state = self.state();
        state.block_queries.push(number);
        if state.failing_blocks.contains(&number) {
            return Err(node_error("block lookup failed"));
        }
        Ok(state.blocks.get(&number).cloned())
    }

    async fn block_by_hash(&self, hash: H256) -> Result<Option<Block>> {
        Ok(self
            .state()
            .blocks
            .values()
            .find(|b| b.hash == hash)
            .cloned())
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>> {
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 模拟连接工厂：每次拨号返回共享状态的 `MockChainClient`
#[derive(Clone)]
pub struct MockDialer {
    template: MockChainClient,
    dials: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl MockDialer {
    pub fn new(template: MockChainClient) -> Self {
        Self {
            template,
            dials: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn chain(&self) -> &MockChainClient {
        &self.template
    }

    pub fn fail_dials(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// 成功建立的连接数
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.template.close_count()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    type Conn = MockChainClient;

    async fn dial(&self) -> Result<MockChainClient> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SdkError::DialFailed("mock: connection refused".to_string()));
        }
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(self.template.clone())
    }
}
