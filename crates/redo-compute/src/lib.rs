pub mod buffer_pool;
pub mod engine;
pub mod transaction;

pub use buffer_pool::BufferPool;
pub use engine::ComputeEngine;
pub use transaction::MiniTransaction;
