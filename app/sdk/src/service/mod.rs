//! 服务层：转账、确认等待、扫块，以及对外的 SDK 门面

pub mod confirmation;
pub mod scanner;
pub mod sdk;
pub mod transfer;
