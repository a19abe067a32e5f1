pub mod codec;
pub mod commands;
pub mod mapper;
pub mod models;
pub mod reader;
pub mod sink;
pub mod storage;

pub use commands::TransferOrchestrator;
pub use models::*;
