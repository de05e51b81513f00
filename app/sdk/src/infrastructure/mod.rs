pub mod chain_client;
pub mod checkpoint_store;
pub mod erc20;
pub mod eth_api_client;
pub mod mock_chain;
pub mod pool;
pub mod signer;
