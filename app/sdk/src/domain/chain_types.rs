//! 节点 JSON-RPC 返回的链上数据结构（符合 EIP-1474）
//!
//! 客户端侧的反序列化比节点侧宽松：合并后节点不再返回的字段
//! （totalDifficulty、uncles 等）都不强制要求。

use ethereum_types::{Address, Bloom, H256, U256, U64};
use serde::{Deserialize, Serialize};

/// 以太坊区块（`eth_getBlockByNumber(n, true)` 的完整交易形式）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: U64,                      // 区块号
    pub hash: H256,                       // 区块哈希
    pub parent_hash: H256,                // 父区块哈希
    #[serde(default)]
    pub miner: Address,                   // 出块地址
    #[serde(default)]
    pub gas_limit: U256,                  // Gas 限制
    #[serde(default)]
    pub gas_used: U256,                   // 已使用 Gas
    #[serde(default)]
    pub timestamp: U256,                  // 时间戳
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,   // EIP-1559 base fee
    #[serde(default)]
    pub transactions: Vec<Transaction>,   // 交易列表（按区块内顺序）
}

impl Block {
    pub fn number(&self) -> u64 {
        self.number.as_u64()
    }
}

/// 以太坊交易
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,                       // 交易哈希
    pub nonce: U256,                      // 发送方交易序号
    #[serde(default)]
    pub block_hash: Option<H256>,         // 所属区块哈希（pending 时为空）
    #[serde(default)]
    pub block_number: Option<U64>,        // 所属区块号（pending 时为空）
    #[serde(default)]
    pub transaction_index: Option<U64>,   // 区块中的交易索引
    pub from: Address,                    // 发送方地址
    #[serde(default)]
    pub to: Option<Address>,              // 接收方地址（合约创建时为 None）
    pub value: U256,                      // 转账金额（wei）
    #[serde(default)]
    pub gas_price: Option<U256>,          // Gas 价格
    pub gas: U256,                        // Gas 限制
    #[serde(default, with = "hex_bytes")]
    pub input: Vec<u8>,                   // 输入数据
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<U64>,             // EIP-2718 交易类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<U64>,
    #[serde(default)]
    pub v: U64,                           // 签名 v 值
    #[serde(default)]
    pub r: U256,                          // 签名 r 值
    #[serde(default)]
    pub s: U256,                          // 签名 s 值
}

impl Transaction {
    /// 尚未打包进区块
    pub fn is_pending(&self) -> bool {
        self.block_number.is_none()
    }
}

/// 交易收据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,            // 交易哈希
    #[serde(default)]
    pub transaction_index: U64,            // 交易索引
    #[serde(default)]
    pub block_hash: Option<H256>,          // 区块哈希
    #[serde(default)]
    pub block_number: Option<U64>,         // 区块号
    #[serde(default)]
    pub from: Address,                     // 发送方地址
    #[serde(default)]
    pub to: Option<Address>,               // 接收方地址
    #[serde(default)]
    pub cumulative_gas_used: U256,         // 累计使用的 Gas
    #[serde(default)]
    pub gas_used: Option<U256>,            // 本交易使用的 Gas
    #[serde(default)]
    pub contract_address: Option<Address>, // 合约地址（如果是合约创建）
    #[serde(default)]
    pub logs: Vec<Log>,                    // 日志列表
    #[serde(default)]
    pub logs_bloom: Bloom,                 // 日志布隆过滤器
    #[serde(default)]
    pub status: Option<U64>,               // 交易状态（1=成功，0=失败，EIP-658）
}

impl TransactionReceipt {
    /// 状态为 1
    pub fn is_success(&self) -> bool {
        self.status == Some(U64::one())
    }

    /// 状态为 0（已回滚）
    pub fn is_failed(&self) -> bool {
        self.status == Some(U64::zero())
    }
}

/// 事件日志
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,                 // 合约地址
    #[serde(default)]
    pub topics: Vec<H256>,                // 日志主题
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,                    // 日志数据
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
    #[serde(default)]
    pub log_index: Option<U64>,
    #[serde(default)]
    pub removed: bool,                    // 是否因链重组被移除
}

/// `eth_call` / `eth_estimateGas` 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,            // 发送方地址（可选）
    pub to: Address,                      // 目标地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,                 // Gas 限制（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,          // Gas 价格（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,              // 转账金额（可选）
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_data")]
    pub data: Option<Vec<u8>>,            // 调用数据（可选）
}

impl CallRequest {
    pub fn new(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// 区块号参数的十六进制格式
pub fn block_number_param(number: u64) -> String {
    format!("0x{:x}", number)
}

/// 自定义序列化模块：处理十六进制字符串和必需字节数组的转换
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(data)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        decode(&s).map_err(serde::de::Error::custom)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
        let s = s.trim_start_matches("0x");
        if s.is_empty() {
            Ok(vec![])
        } else {
            hex::decode(s)
        }
    }
}

/// 自定义序列化模块：处理十六进制字符串和可选字节数组的转换
mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            Some(bytes) => serializer.serialize_str(&format!("0x{}", hex::encode(bytes))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => super::hex_bytes::decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
