//! secp256k1 私钥签名
//!
//! 私钥只在签名期间使用，不写日志、不出现在错误信息中。

use crate::domain::address::address_from_public_key;
use crate::domain::errors::{Result, SdkError};
use crate::domain::tx_types::{DecodedTransaction, PreparedTransaction, SignedTransaction, TxSignature};
use ethereum_types::{Address, H256, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// 交易签名接口
pub trait TransactionSigner: Send + Sync {
    /// 签名方地址
    fn address(&self) -> Address;

    /// 按 EIP-155 签名 legacy 交易
    fn sign_transaction(&self, tx: PreparedTransaction, chain_id: u64) -> Result<SignedTransaction>;
}

/// 持有私钥的本地签名器
pub struct PrivateKeySigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for PrivateKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn verifying_key_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // 去掉 0x04 前缀
    address_from_public_key(&point.as_bytes()[1..])
}

impl PrivateKeySigner {
    /// 从十六进制私钥构造，可带 0x 前缀
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let body = private_key.trim();
        let body = body.strip_prefix("0x").unwrap_or(body);
        if body.len() != 64 {
            return Err(SdkError::InvalidPrivateKey);
        }
        let bytes = hex::decode(body).map_err(|_| SdkError::InvalidPrivateKey)?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| SdkError::InvalidPrivateKey)?;
        let address = verifying_key_address(key.verifying_key());
        Ok(Self { key, address })
    }

    /// 随机生成新私钥
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let address = verifying_key_address(key.verifying_key());
        Self { key, address }
    }

    /// 私钥十六进制（不带 0x）
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    fn sign_hash(&self, hash: H256) -> Result<(Signature, RecoveryId)> {
        self.key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|e| SdkError::Signing(e.to_string()))
    }
}

/// v = recid + chain_id * 2 + 35
fn eip155_v(recid: RecoveryId, chain_id: u64) -> Result<u64> {
    chain_id
        .checked_mul(2)
        .and_then(|v| v.checked_add(35 + recid.to_byte() as u64))
        .ok_or_else(|| SdkError::Signing(format!("chain id 过大: {}", chain_id)))
}

impl TransactionSigner for PrivateKeySigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_transaction(&self, tx: PreparedTransaction, chain_id: u64) -> Result<SignedTransaction> {
        let hash = tx.signing_hash(chain_id);
        let (signature, recid) = self.sign_hash(hash)?;

        let (r, s) = signature.split_bytes();
        let v = eip155_v(recid, chain_id)?;
        Ok(tx.into_signed(TxSignature {
            v,
            r: U256::from_big_endian(&r),
            s: U256::from_big_endian(&s),
        }))
    }
}

/// 新生成的密钥对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    /// 私钥十六进制（不带 0x）
    pub private_key: String,
    pub address: Address,
}

/// 生成随机密钥对
pub fn generate_key() -> GeneratedKey {
    let signer = PrivateKeySigner::random();
    GeneratedKey {
        private_key: signer.private_key_hex(),
        address: signer.address,
    }
}

/// 从签名中恢复发送方地址
pub fn recover_sender(tx: &DecodedTransaction) -> Result<Address> {
    let (hash, recid, r, s) = tx
        .signature_parts()
        .ok_or_else(|| SdkError::Decode("invalid signature v".to_string()))?;

    let mut rs = [0u8; 64];
    r.to_big_endian(&mut rs[..32]);
    s.to_big_endian(&mut rs[32..]);

    let signature =
        Signature::from_slice(&rs).map_err(|e| SdkError::Decode(format!("invalid signature: {}", e)))?;
    let recid = RecoveryId::from_byte(recid)
        .ok_or_else(|| SdkError::Decode("invalid recovery id".to_string()))?;
    let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &signature, recid)
        .map_err(|e| SdkError::Decode(format!("recover failed: {}", e)))?;
    Ok(verifying_key_address(&key))
}
