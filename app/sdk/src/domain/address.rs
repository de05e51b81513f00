//! 十六进制地址编解码
//!
//! 校验规则与 go-ethereum `common.IsHexAddress` 一致：可选 `0x` 前缀 + 40 个十六进制字符，
//! 不校验大小写校验和。显示时输出 EIP-55 校验和格式。

use crate::domain::errors::{Result, SdkError};
use ethereum_types::Address;
use sha3::{Digest, Keccak256};

/// 地址长度（字节）
pub const ADDRESS_LENGTH: usize = 20;

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// 判断是否为合法的十六进制地址
pub fn is_hex_address(s: &str) -> bool {
    let body = strip_hex_prefix(s);
    body.len() == ADDRESS_LENGTH * 2 && body.bytes().all(|b| b.is_ascii_hexdigit())
}

/// 解析十六进制地址
pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    if !is_hex_address(trimmed) {
        return Err(SdkError::InvalidAddress(s.to_string()));
    }
    let bytes =
        hex::decode(strip_hex_prefix(trimmed)).map_err(|_| SdkError::InvalidAddress(s.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// 解析可选的合约地址，空字符串视为未提供
pub fn parse_contract_address(s: Option<&str>) -> Result<Address> {
    match s.map(str::trim) {
        None | Some("") => Err(SdkError::ContractAddressRequired),
        Some(addr) => parse_address(addr),
    }
}

/// EIP-55 校验和格式
///
/// 参考: https://eips.ethereum.org/EIPS/eip-55
pub fn to_checksum(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        // 第 i 个字符对应哈希的第 i 个半字节
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// 由公钥（去掉 0x04 前缀的 64 字节）推导地址
pub fn address_from_public_key(uncompressed: &[u8]) -> Address {
    let hash = Keccak256::digest(uncompressed);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hex_address() {
        assert!(is_hex_address("0xEC5449e1719a4f3555Ef71A98706BDBbFbaCA2C5"));
        assert!(is_hex_address("EC5449e1719a4f3555Ef71A98706BDBbFbaCA2C5"));
        assert!(!is_hex_address("0xEC5449e1719a4f3555Ef71A98706BDBbFbaCA2C"));
        assert!(!is_hex_address("0xZC5449e1719a4f3555Ef71A98706BDBbFbaCA2C5"));
        assert!(!is_hex_address(""));
    }

    #[test]
    fn test_parse_address_round_trips_checksum() {
        let addr = parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(to_checksum(&addr), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

        let addr = parse_address("FB6916095CA1DF60BB79CE92CE3EA74C37C5D359").unwrap();
        assert_eq!(to_checksum(&addr), "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359");
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        let err = parse_address("fb1a32ynct3nf8n2400wx5cwp4ah0a6egk9lzq2dl").unwrap_err();
        assert!(matches!(err, SdkError::InvalidAddress(_)));
    }

    #[test]
    fn test_parse_contract_address() {
        assert!(matches!(
            parse_contract_address(None),
            Err(SdkError::ContractAddressRequired)
        ));
        assert!(matches!(
            parse_contract_address(Some("  ")),
            Err(SdkError::ContractAddressRequired)
        ));
        assert!(matches!(
            parse_contract_address(Some("0x1234")),
            Err(SdkError::InvalidAddress(_))
        ));
        assert!(parse_contract_address(Some("0x398dFf6e65a950470D84647fAdE72E350f5d7Cd2")).is_ok());
    }
}
