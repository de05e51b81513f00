//! ERC-20 ABI 编解码与只读查询（alloy `sol!` 宏生成）

use crate::domain::amount::TokenAmount;
use crate::domain::chain_types::CallRequest;
use crate::domain::errors::{Result, SdkError};
use crate::infrastructure::chain_client::ChainClient;
use alloy_sol_types::{sol, SolCall};
use ethereum_types::{Address, U256};

sol! {
    /// ERC-20 代币接口
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function transfer(address to, uint256 amount) external returns (bool success);
        function symbol() external view returns (string symbol);
        function decimals() external view returns (uint8 decimals);
    }
}

fn to_alloy_address(address: Address) -> alloy_primitives::Address {
    alloy_primitives::Address::from_slice(address.as_bytes())
}

fn to_alloy_u256(value: U256) -> alloy_primitives::U256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    alloy_primitives::U256::from_be_bytes(buf)
}

fn from_alloy_u256(value: alloy_primitives::U256) -> U256 {
    U256::from_big_endian(&value.to_be_bytes::<32>())
}

/// transfer(address,uint256) 调用数据
pub fn encode_transfer(to: Address, amount: U256) -> Vec<u8> {
    IERC20::transferCall {
        to: to_alloy_address(to),
        amount: to_alloy_u256(amount),
    }
    .abi_encode()
}

pub fn encode_balance_of(owner: Address) -> Vec<u8> {
    IERC20::balanceOfCall {
        owner: to_alloy_address(owner),
    }
    .abi_encode()
}

pub fn decode_balance_of(data: &[u8]) -> Result<U256> {
    let ret = IERC20::balanceOfCall::abi_decode_returns(data, true)
        .map_err(|e| SdkError::Abi(format!("balanceOf: {}", e)))?;
    Ok(from_alloy_u256(ret.balance))
}

pub fn encode_decimals() -> Vec<u8> {
    IERC20::decimalsCall {}.abi_encode()
}

pub fn decode_decimals(data: &[u8]) -> Result<u8> {
    let ret = IERC20::decimalsCall::abi_decode_returns(data, true)
        .map_err(|e| SdkError::Abi(format!("decimals: {}", e)))?;
    Ok(ret.decimals)
}

pub fn encode_symbol() -> Vec<u8> {
    IERC20::symbolCall {}.abi_encode()
}

/// 解码 symbol()，兼容早期返回 bytes32 的代币
pub fn decode_symbol(data: &[u8]) -> Result<String> {
    match IERC20::symbolCall::abi_decode_returns(data, true) {
        Ok(ret) => Ok(ret.symbol),
        Err(_) if data.len() == 32 => {
            let end = data.iter().position(|b| *b == 0).unwrap_or(32);
            String::from_utf8(data[..end].to_vec())
                .map_err(|e| SdkError::Abi(format!("symbol: {}", e)))
        }
        Err(e) => Err(SdkError::Abi(format!("symbol: {}", e))),
    }
}

/// 查询代币余额（最小单位）
pub async fn balance_of<C>(client: &C, contract: Address, owner: Address) -> Result<U256>
where
    C: ChainClient + ?Sized,
{
    let data = client
        .call(&CallRequest::new(contract, encode_balance_of(owner)))
        .await?;
    decode_balance_of(&data)
}

pub async fn decimals<C>(client: &C, contract: Address) -> Result<u8>
where
    C: ChainClient + ?Sized,
{
    let data = client.call(&CallRequest::new(contract, encode_decimals())).await?;
    decode_decimals(&data)
}

pub async fn symbol<C>(client: &C, contract: Address) -> Result<String>
where
    C: ChainClient + ?Sized,
{
    let data = client.call(&CallRequest::new(contract, encode_symbol())).await?;
    decode_symbol(&data)
}

/// 查询余额和精度
pub async fn token_balance<C>(client: &C, contract: Address, owner: Address) -> Result<TokenAmount>
where
    C: ChainClient + ?Sized,
{
    let raw = balance_of(client, contract, owner).await?;
    let decimals = decimals(client, contract).await?;
    Ok(TokenAmount::new(raw, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u64) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data[24..].copy_from_slice(&value.to_be_bytes());
        data
    }

    #[test]
    fn test_encode_transfer() {
        let to = Address::from_low_u64_be(0xabcd);
        let encoded = encode_transfer(to, U256::from(1000u64));
        // 4 字节选择器 + 32 字节地址 + 32 字节金额
        assert_eq!(encoded.len(), 68);
        // transfer(address,uint256) = 0xa9059cbb
        assert_eq!(&encoded[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&encoded[16..36], to.as_bytes());
        assert_eq!(&encoded[36..], &word(1000)[..]);
    }

    #[test]
    fn test_selectors() {
        assert_eq!(&encode_balance_of(Address::zero())[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(encode_decimals(), vec![0x31, 0x3c, 0xe5, 0x67]);
        assert_eq!(encode_symbol(), vec![0x95, 0xd8, 0x9b, 0x41]);
    }

    #[test]
    fn test_decode_returns() {
        assert_eq!(decode_balance_of(&word(1000)).unwrap(), U256::from(1000));
        assert_eq!(decode_decimals(&word(6)).unwrap(), 6);
        assert!(matches!(decode_balance_of(&[1, 2, 3]), Err(SdkError::Abi(_))));
    }

    #[test]
    fn test_decode_symbol() {
        // offset + length + "FIBO" padded
        let mut data = word(32);
        data.extend(word(4));
        let mut text = b"FIBO".to_vec();
        text.resize(32, 0);
        data.extend(text);
        assert_eq!(decode_symbol(&data).unwrap(), "FIBO");

        let mut bytes32 = b"MKR".to_vec();
        bytes32.resize(32, 0);
        assert_eq!(decode_symbol(&bytes32).unwrap(), "MKR");
    }

    #[test]
    fn test_u256_conversion() {
        let value = U256::from_dec_str("123456789012345678901234567890").unwrap();
        assert_eq!(from_alloy_u256(to_alloy_u256(value)), value);
    }
}
