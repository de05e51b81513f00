//! 交易领域类型：待签名交易、已签名交易、原始交易解码、转账请求
//!
//! 参考 geth core/types/transaction.go、transaction_signing.go
//! - EIP-155: https://eips.ethereum.org/EIPS/eip-155
//! - EIP-1559 / EIP-2718: 类型化交易信封

use crate::domain::address::{parse_address, parse_contract_address};
use crate::domain::amount::DecimalAmount;
use crate::domain::chain_types::{Block, Transaction};
use crate::domain::errors::{Result, SdkError};
use chrono::{DateTime, Utc};
use ethereum_types::{Address, H256, U256, U64};
use rlp::{Decodable, DecoderError, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

fn keccak256(bytes: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(bytes))
}

fn append_to(stream: &mut RlpStream, to: &Option<Address>) {
    // to 字段：None 表示合约创建，编码为空字节
    match to {
        Some(addr) => stream.append(addr),
        None => stream.append_empty_data(),
    };
}

fn decode_to(rlp: &Rlp, index: usize) -> std::result::Result<Option<Address>, DecoderError> {
    let to_bytes: Vec<u8> = rlp.val_at(index)?;
    if to_bytes.is_empty() {
        Ok(None)
    } else if to_bytes.len() == 20 {
        Ok(Some(Address::from_slice(&to_bytes)))
    } else {
        Err(DecoderError::Custom("Invalid address length"))
    }
}

// ============================================================================
// Legacy 交易（EIP-155 签名）
// ============================================================================

/// 待签名的 legacy 交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
}

/// secp256k1 签名（v 已按 EIP-155 编码）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSignature {
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl PreparedTransaction {
    /// 交易总费用上限 gas_price * gas_limit
    pub fn gas_cost(&self) -> U256 {
        self.gas_price.saturating_mul(U256::from(self.gas_limit))
    }

    fn rlp_append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        append_to(stream, &self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// EIP-155 签名哈希：keccak256(rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]))
    pub fn signing_hash(&self, chain_id: u64) -> H256 {
        let mut stream = RlpStream::new_list(9);
        self.rlp_append_fields(&mut stream);
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak256(&stream.out())
    }

    /// EIP-155 之前的签名哈希（v = 27/28）
    fn homestead_signing_hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(6);
        self.rlp_append_fields(&mut stream);
        keccak256(&stream.out())
    }

    pub fn into_signed(self, signature: TxSignature) -> SignedTransaction {
        SignedTransaction {
            tx: self,
            signature,
        }
    }
}

/// 已签名的 legacy 交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: PreparedTransaction,
    pub signature: TxSignature,
}

impl SignedTransaction {
    /// RLP 编码后的原始交易，用于 eth_sendRawTransaction
    pub fn raw(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.tx.rlp_append_fields(&mut stream);
        stream.append(&self.signature.v);
        stream.append(&self.signature.r);
        stream.append(&self.signature.s);
        stream.out().to_vec()
    }

    /// 交易哈希 keccak256(rlp(signed tx))
    pub fn hash(&self) -> H256 {
        keccak256(&self.raw())
    }

    /// 从 v 中还原 chain id；EIP-155 之前的签名返回 None
    pub fn chain_id(&self) -> Option<u64> {
        match self.signature.v {
            27 | 28 => None,
            v if v >= 35 => Some((v - 35) / 2),
            _ => None,
        }
    }

    /// 签名对应的哈希和 recovery id
    pub fn recovery_parts(&self) -> Option<(H256, u8)> {
        match self.chain_id() {
            Some(chain_id) => {
                let recid = (self.signature.v - 35 - chain_id * 2) as u8;
                Some((self.tx.signing_hash(chain_id), recid))
            }
            None if matches!(self.signature.v, 27 | 28) => {
                Some((self.tx.homestead_signing_hash(), (self.signature.v - 27) as u8))
            }
            None => None,
        }
    }
}

impl Decodable for SignedTransaction {
    fn decode(rlp: &Rlp) -> std::result::Result<Self, DecoderError> {
        // rlp([nonce, gasPrice, gas, to, value, data, v, r, s])
        if rlp.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        let tx = PreparedTransaction {
            nonce: rlp.val_at(0)?,
            gas_price: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            to: decode_to(rlp, 3)?,
            value: rlp.val_at(4)?,
            data: rlp.val_at(5)?,
        };
        let signature = TxSignature {
            v: rlp.val_at(6)?,
            r: rlp.val_at(7)?,
            s: rlp.val_at(8)?,
        };
        Ok(Self { tx, signature })
    }
}

// ============================================================================
// EIP-1559 交易（仅解码，用于转发预签名交易）
// ============================================================================

/// EIP-1559 交易类型 (Type 2)
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicFeeTx {
    /// 链ID，防止重放攻击
    pub chain_id: U64,
    /// 账户nonce
    pub nonce: U64,
    /// 最大优先费用（小费）
    pub max_priority_fee_per_gas: U256,
    /// 最大费用（base fee + priority fee）
    pub max_fee_per_gas: U256,
    /// Gas限制
    pub gas_limit: U64,
    /// 接收地址（None表示合约创建）
    pub to: Option<Address>,
    /// 转账金额
    pub value: U256,
    /// 交易数据/合约输入
    pub data: Vec<u8>,
    /// 访问列表 (EIP-2930)
    pub access_list: Vec<AccessListItem>,
    /// ECDSA签名 v值 (y parity)
    pub v: U64,
    /// ECDSA签名 r值
    pub r: U256,
    /// ECDSA签名 s值
    pub s: U256,
}

/// EIP-2930 访问列表项
#[derive(Debug, Clone, PartialEq)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<H256>,
}

impl DynamicFeeTx {
    /// 交易类型ID (EIP-1559)
    pub const TRANSACTION_TYPE: u8 = 2;

    fn rlp_append_payload(&self, stream: &mut RlpStream) {
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        append_to(stream, &self.to);
        stream.append(&self.value);
        stream.append(&self.data);

        stream.begin_list(self.access_list.len());
        for item in &self.access_list {
            stream.begin_list(2);
            stream.append(&item.address);
            stream.begin_list(item.storage_keys.len());
            for key in &item.storage_keys {
                stream.append(key);
            }
        }
    }

    fn typed(rlp_encoded: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(rlp_encoded.len() + 1);
        bytes.push(Self::TRANSACTION_TYPE);
        bytes.extend_from_slice(rlp_encoded);
        bytes
    }

    /// hash = keccak256(0x02 || rlp([... 12 个字段]))
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(12);
        self.rlp_append_payload(&mut stream);
        stream.append(&self.v);
        stream.append(&self.r);
        stream.append(&self.s);
        keccak256(&Self::typed(&stream.out()))
    }

    /// 签名哈希 keccak256(0x02 || rlp([... 9 个字段]))
    pub fn signing_hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(9);
        self.rlp_append_payload(&mut stream);
        keccak256(&Self::typed(&stream.out()))
    }
}

impl Decodable for DynamicFeeTx {
    fn decode(rlp: &Rlp) -> std::result::Result<Self, DecoderError> {
        // rlp([chain_id, nonce, max_priority_fee_per_gas, max_fee_per_gas,
        //      gas_limit, to, value, data, access_list, v, r, s])
        if rlp.item_count()? != 12 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        let access_list_rlp = rlp.at(8)?;
        let mut access_list = Vec::new();
        for i in 0..access_list_rlp.item_count()? {
            access_list.push(access_list_rlp.val_at(i)?);
        }

        Ok(DynamicFeeTx {
            chain_id: rlp.val_at(0)?,
            nonce: rlp.val_at(1)?,
            max_priority_fee_per_gas: rlp.val_at(2)?,
            max_fee_per_gas: rlp.val_at(3)?,
            gas_limit: rlp.val_at(4)?,
            to: decode_to(rlp, 5)?,
            value: rlp.val_at(6)?,
            data: rlp.val_at(7)?,
            access_list,
            v: rlp.val_at(9)?,
            r: rlp.val_at(10)?,
            s: rlp.val_at(11)?,
        })
    }
}

impl Decodable for AccessListItem {
    fn decode(rlp: &Rlp) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        let storage_keys_rlp = rlp.at(1)?;
        let mut storage_keys = Vec::new();
        for i in 0..storage_keys_rlp.item_count()? {
            storage_keys.push(storage_keys_rlp.val_at(i)?);
        }

        Ok(AccessListItem {
            address: rlp.val_at(0)?,
            storage_keys,
        })
    }
}

// ============================================================================
// 原始交易解码
// ============================================================================

/// 解码后的预签名交易
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedTransaction {
    Legacy(SignedTransaction),
    DynamicFee(DynamicFeeTx),
}

impl DecodedTransaction {
    pub fn hash(&self) -> H256 {
        match self {
            Self::Legacy(tx) => tx.hash(),
            Self::DynamicFee(tx) => tx.hash(),
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.tx.nonce,
            Self::DynamicFee(tx) => tx.nonce.low_u64(),
        }
    }

    pub fn to(&self) -> Option<Address> {
        match self {
            Self::Legacy(tx) => tx.tx.to,
            Self::DynamicFee(tx) => tx.to,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            Self::Legacy(tx) => tx.tx.value,
            Self::DynamicFee(tx) => tx.value,
        }
    }

    /// 签名哈希、recovery id、r、s
    pub fn signature_parts(&self) -> Option<(H256, u8, U256, U256)> {
        match self {
            Self::Legacy(tx) => tx
                .recovery_parts()
                .map(|(hash, recid)| (hash, recid, tx.signature.r, tx.signature.s)),
            Self::DynamicFee(tx) => {
                let recid = tx.v.low_u64();
                (recid <= 1).then(|| (tx.signing_hash(), recid as u8, tx.r, tx.s))
            }
        }
    }
}

/// 解码十六进制原始交易（可带 0x 前缀）
pub fn decode_raw_transaction_hex(raw_hex: &str) -> Result<(Vec<u8>, DecodedTransaction)> {
    let raw = hex::decode(raw_hex.trim().trim_start_matches("0x"))
        .map_err(|e| SdkError::Decode(format!("invalid hex: {}", e)))?;
    let decoded = decode_raw_transaction(&raw)?;
    Ok((raw, decoded))
}

/// 从原始字节解码交易
///
/// - 首字节 >= 0xc0：legacy RLP 列表
/// - 0x02 || rlp([...])：EIP-1559
pub fn decode_raw_transaction(raw_tx: &[u8]) -> Result<DecodedTransaction> {
    let first = *raw_tx
        .first()
        .ok_or_else(|| SdkError::Decode("Empty transaction data".to_string()))?;

    match first {
        0xc0..=0xff => rlp::decode::<SignedTransaction>(raw_tx)
            .map(DecodedTransaction::Legacy)
            .map_err(|e| SdkError::Decode(format!("RLP decode failed: {}", e))),
        DynamicFeeTx::TRANSACTION_TYPE => rlp::decode::<DynamicFeeTx>(&raw_tx[1..])
            .map(DecodedTransaction::DynamicFee)
            .map_err(|e| SdkError::Decode(format!("RLP decode failed: {}", e))),
        other => Err(SdkError::Decode(format!(
            "Transaction type {} not supported",
            other
        ))),
    }
}

// ============================================================================
// 转账请求
// ============================================================================

/// nonce 取值策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoncePolicy {
    /// 使用节点返回的 pending nonce
    #[default]
    Pending,
    /// 指定 nonce；0 视为未指定
    Explicit(u64),
    /// 必须指定非零 nonce，且不能小于节点当前的 pending nonce
    Guarded(u64),
}

impl NoncePolicy {
    /// 显式指定的非零 nonce
    pub fn explicit(&self) -> Option<u64> {
        match *self {
            Self::Pending => None,
            Self::Explicit(n) | Self::Guarded(n) => (n != 0).then_some(n),
        }
    }
}

/// 调用方输入的交易负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// 链原生币转账
    Native { amount: String },
    /// ERC-20 代币转账
    Token {
        amount: String,
        contract: Option<String>,
    },
    /// 直接发送已编码的合约调用数据，接收方即合约地址
    RawCall { data: Vec<u8> },
}

/// 转账请求（未校验）
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// 发送方私钥（十六进制，可带 0x）
    pub private_key: String,
    /// 接收方地址；RawCall 时为合约地址
    pub recipient: String,
    pub payload: Payload,
    pub nonce: NoncePolicy,
}

impl SendRequest {
    pub fn native(private_key: &str, recipient: &str, amount: &str) -> Self {
        Self {
            private_key: private_key.to_string(),
            recipient: recipient.to_string(),
            payload: Payload::Native {
                amount: amount.to_string(),
            },
            nonce: NoncePolicy::Pending,
        }
    }

    pub fn token(private_key: &str, recipient: &str, amount: &str, contract: &str) -> Self {
        Self {
            private_key: private_key.to_string(),
            recipient: recipient.to_string(),
            payload: Payload::Token {
                amount: amount.to_string(),
                contract: Some(contract.to_string()),
            },
            nonce: NoncePolicy::Pending,
        }
    }

    pub fn raw_call(private_key: &str, contract: &str, data: Vec<u8>) -> Self {
        Self {
            private_key: private_key.to_string(),
            recipient: contract.to_string(),
            payload: Payload::RawCall { data },
            nonce: NoncePolicy::Pending,
        }
    }

    pub fn with_nonce(mut self, nonce: NoncePolicy) -> Self {
        self.nonce = nonce;
        self
    }

    /// 网络调用之前的输入校验
    ///
    /// 顺序：接收地址 -> 合约地址 -> nonce -> 金额
    ///
    /// 合约调用的接收方就是合约本身，为空时返回 `ContractAddressRequired`。
    pub fn validate(&self) -> Result<TransferKind> {
        let kind = match &self.payload {
            Payload::Native { amount } => {
                let to = parse_address(&self.recipient)?;
                self.check_nonce()?;
                TransferKind::Native {
                    to,
                    amount: amount.parse()?,
                }
            }
            Payload::Token { amount, contract } => {
                let to = parse_address(&self.recipient)?;
                let contract = parse_contract_address(contract.as_deref())?;
                self.check_nonce()?;
                TransferKind::Token {
                    contract,
                    to,
                    amount: amount.parse()?,
                }
            }
            Payload::RawCall { data } => {
                let contract = parse_contract_address(Some(&self.recipient))?;
                self.check_nonce()?;
                TransferKind::RawCall {
                    contract,
                    data: data.clone(),
                }
            }
        };
        Ok(kind)
    }

    fn check_nonce(&self) -> Result<()> {
        match self.nonce {
            NoncePolicy::Guarded(0) => Err(SdkError::NonceRequired),
            _ => Ok(()),
        }
    }
}

/// 已校验的转账类型，统一的构建流程按此分派
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    Native { to: Address, amount: DecimalAmount },
    Token {
        contract: Address,
        to: Address,
        amount: DecimalAmount,
    },
    RawCall { contract: Address, data: Vec<u8> },
}

impl TransferKind {
    /// 交易的 to 字段（代币和合约调用发往合约地址）
    pub fn tx_to(&self) -> Address {
        match self {
            Self::Native { to, .. } => *to,
            Self::Token { contract, .. } | Self::RawCall { contract, .. } => *contract,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Native { .. } => "native",
            Self::Token { .. } => "token",
            Self::RawCall { .. } => "raw_call",
        }
    }
}

// ============================================================================
// 扫块失败记录
// ============================================================================

/// 业务回调处理失败的交易记录，只追加，不会自动重放
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTxRecord {
    pub from: Address,
    pub hash: H256,
    pub value: U256,
    pub to: Option<Address>,
    pub nonce: U256,
    #[serde(with = "crate::domain::chain_types::hex_bytes")]
    pub data: Vec<u8>,
    pub block_height: u64,
    /// 回调返回的错误信息
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

impl FailedTxRecord {
    pub fn new(tx: &Transaction, block: &Block, error: impl ToString) -> Self {
        Self {
            from: tx.from,
            hash: tx.hash,
            value: tx.value,
            to: tx.to,
            nonce: tx.nonce,
            data: tx.input.clone(),
            block_height: block.number(),
            error: error.to_string(),
            recorded_at: Utc::now(),
        }
    }
}
