pub mod address;
pub mod amount;
pub mod chain_types;
pub mod context;
pub mod errors;
pub mod tx_types;
