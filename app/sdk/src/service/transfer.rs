//! 转账交易构建与提交
//!
//! 原生币转账、代币转账、合约调用数据共用同一条流水线，按 `TransferKind` 分派：
//!
//! 1. 输入校验（地址、合约地址、nonce、金额），不访问网络
//! 2. 由私钥推导发送方地址
//! 3. Guarded nonce：不能小于节点当前的 pending nonce
//! 4. 代币转账：检查代币余额
//! 5. 查询原生币余额、gas 价格；代币和合约调用通过 eth_estimateGas 估算 gas 上限
//! 6. 检查余额是否足够支付 gas（原生币转账还要加上转账金额）
//! 7. 确定 nonce：显式指定的非零值，否则使用 pending nonce
//! 8. EIP-155 签名并提交
//!
//! 同步接口在提交后交给 `ConfirmationWaiter` 等待确认。

use crate::config::SdkConfig;
use crate::domain::chain_types::CallRequest;
use crate::domain::context::CallContext;
use crate::domain::errors::{Result, SdkError};
use crate::domain::tx_types::{
    decode_raw_transaction_hex, DecodedTransaction, NoncePolicy, PreparedTransaction, SendRequest,
    TransferKind,
};
use crate::infrastructure::chain_client::{ChainClient, Dialer};
use crate::infrastructure::erc20;
use crate::infrastructure::pool::ConnectionPool;
use crate::infrastructure::signer::{recover_sender, PrivateKeySigner, TransactionSigner};
use crate::service::confirmation::{ConfirmationWaiter, TransferReceipt};
use ethereum_types::{Address, H256, U256};

/// 检查原生币余额是否足够
///
/// - `balance <= gas_cost` -> `InsufficientGas`
/// - 原生币转账时 `balance <= gas_cost + amount` -> `InsufficientGasPlusAmount`
pub fn check_funds(balance: U256, gas_cost: U256, amount: Option<U256>) -> Result<()> {
    if balance <= gas_cost {
        return Err(SdkError::InsufficientGas { balance, gas_cost });
    }
    if let Some(amount) = amount {
        if balance <= gas_cost.saturating_add(amount) {
            return Err(SdkError::InsufficientGasPlusAmount {
                balance,
                gas_cost,
                amount,
            });
        }
    }
    Ok(())
}

/// 交易构建参数（值、数据、gas 上限）
struct Payload {
    value: U256,
    data: Vec<u8>,
    gas_limit: u64,
    /// 原生币转账金额，参与余额检查
    native_amount: Option<U256>,
}

/// 转账服务
pub struct TransferService<D: Dialer> {
    pool: ConnectionPool<D>,
    waiter: ConfirmationWaiter,
    chain_id: u64,
    native_decimals: u8,
    native_gas_limit: u64,
}

impl<D: Dialer> TransferService<D> {
    pub fn new(pool: ConnectionPool<D>, config: &SdkConfig) -> Self {
        Self {
            pool,
            waiter: ConfirmationWaiter::new(&config.confirmation),
            chain_id: config.chain_id,
            native_decimals: config.native_decimals,
            native_gas_limit: config.native_gas_limit,
        }
    }

    /// 提交后立即返回交易哈希
    pub async fn send_async(&self, request: &SendRequest) -> Result<H256> {
        let (kind, signer) = Self::validate(request)?;
        let conn = self.pool.acquire().await?;
        self.submit(&*conn, &kind, &signer, request.nonce).await
    }

    /// 提交并等待确认
    pub async fn send_sync(&self, ctx: &CallContext, request: &SendRequest) -> Result<TransferReceipt> {
        let (kind, signer) = Self::validate(request)?;
        let conn = self.pool.acquire().await?;
        let hash = self.submit(&*conn, &kind, &signer, request.nonce).await?;
        let status = self.waiter.wait(ctx, &*conn, hash).await?;
        Ok(TransferReceipt { hash, status })
    }

    /// 提交已签名的原始交易（十六进制），不等待确认；同时返回解码后的交易
    pub async fn send_raw_async(&self, raw_hex: &str) -> Result<(H256, DecodedTransaction)> {
        let (raw, decoded) = Self::decode_raw(raw_hex)?;
        let conn = self.pool.acquire().await?;
        let hash = Self::submit_raw(&*conn, &raw).await?;
        Ok((hash, decoded))
    }

    /// 提交已签名的原始交易并等待确认
    pub async fn send_raw_sync(
        &self,
        ctx: &CallContext,
        raw_hex: &str,
    ) -> Result<(TransferReceipt, DecodedTransaction)> {
        let (raw, decoded) = Self::decode_raw(raw_hex)?;
        let conn = self.pool.acquire().await?;
        let hash = Self::submit_raw(&*conn, &raw).await?;
        let status = self.waiter.wait(ctx, &*conn, hash).await?;
        Ok((TransferReceipt { hash, status }, decoded))
    }

    /// 网络调用之前的校验：请求参数 + 私钥
    fn validate(request: &SendRequest) -> Result<(TransferKind, PrivateKeySigner)> {
        let kind = request.validate()?;
        let signer = PrivateKeySigner::from_hex(&request.private_key)?;
        Ok((kind, signer))
    }

    async fn submit<C>(
        &self,
        conn: &C,
        kind: &TransferKind,
        signer: &PrivateKeySigner,
        nonce_policy: NoncePolicy,
    ) -> Result<H256>
    where
        C: ChainClient + ?Sized,
    {
        let from = signer.address();

        if let NoncePolicy::Guarded(given) = nonce_policy {
            let pending = conn.pending_nonce_at(from).await?;
            if given < pending {
                tracing::warn!(from = ?from, given, pending, "指定的 nonce 小于 pending nonce");
                return Err(SdkError::NonceTooSmall { given, pending });
            }
        }

        let payload = self.build_payload(conn, kind, from).await?;

        let balance = conn.balance_at(from).await?;
        let gas_price = conn.suggest_gas_price().await?;
        let gas_cost = gas_price.saturating_mul(U256::from(payload.gas_limit));
        check_funds(balance, gas_cost, payload.native_amount)?;

        let nonce = match nonce_policy.explicit() {
            Some(nonce) => nonce,
            None => conn.pending_nonce_at(from).await?,
        };

        let tx = PreparedTransaction {
            nonce,
            gas_price,
            gas_limit: payload.gas_limit,
            to: Some(kind.tx_to()),
            value: payload.value,
            data: payload.data,
        };
        let signed = signer.sign_transaction(tx, self.chain_id)?;
        let local_hash = signed.hash();

        let hash = conn.send_raw_transaction(&signed.raw()).await?;
        if hash != local_hash {
            tracing::debug!(tx_hash = ?hash, local_hash = ?local_hash, "节点返回的哈希与本地计算不一致");
        }

        tracing::info!(
            tx_hash = ?hash,
            kind = kind.label(),
            from = ?from,
            nonce,
            gas_limit = signed.tx.gas_limit,
            "交易已提交"
        );
        Ok(hash)
    }

    async fn build_payload<C>(&self, conn: &C, kind: &TransferKind, from: Address) -> Result<Payload>
    where
        C: ChainClient + ?Sized,
    {
        match kind {
            TransferKind::Native { amount, .. } => {
                let value = amount.to_base_units(self.native_decimals)?;
                Ok(Payload {
                    value,
                    data: Vec::new(),
                    gas_limit: self.native_gas_limit,
                    native_amount: Some(value),
                })
            }
            TransferKind::Token {
                contract,
                to,
                amount,
            } => {
                let decimals = erc20::decimals(conn, *contract).await?;
                let units = amount.to_base_units(decimals)?;
                let token_balance = erc20::balance_of(conn, *contract, from).await?;
                if token_balance < units {
                    return Err(SdkError::InsufficientTokenBalance {
                        balance: token_balance,
                        amount: units,
                    });
                }

                let data = erc20::encode_transfer(*to, units);
                let gas_limit = conn
                    .estimate_gas(&CallRequest::new(*contract, data.clone()).from(from))
                    .await?;
                Ok(Payload {
                    value: U256::zero(),
                    data,
                    gas_limit,
                    native_amount: None,
                })
            }
            TransferKind::RawCall { contract, data } => {
                let gas_limit = conn
                    .estimate_gas(&CallRequest::new(*contract, data.clone()).from(from))
                    .await?;
                Ok(Payload {
                    value: U256::zero(),
                    data: data.clone(),
                    gas_limit,
                    native_amount: None,
                })
            }
        }
    }

    fn decode_raw(raw_hex: &str) -> Result<(Vec<u8>, DecodedTransaction)> {
        let (raw, decoded) = decode_raw_transaction_hex(raw_hex)?;
        match recover_sender(&decoded) {
            Ok(from) => tracing::debug!(
                tx_hash = ?decoded.hash(),
                from = ?from,
                nonce = decoded.nonce(),
                "解码原始交易"
            ),
            Err(e) => tracing::debug!(tx_hash = ?decoded.hash(), error = %e, "无法恢复发送方"),
        }
        Ok((raw, decoded))
    }

    async fn submit_raw<C>(conn: &C, raw: &[u8]) -> Result<H256>
    where
        C: ChainClient + ?Sized,
    {
        let hash = conn.send_raw_transaction(raw).await?;
        tracing::info!(tx_hash = ?hash, "原始交易已提交");
        Ok(hash)
    }
}
