// Chunk Transfer Engine
// 分块并发传输引擎核心库
//
// 大负载在客户端与远端之间按固定大小分片搬运：并发受预算约束，
// 每个分片独立重试并校验完整性，乱序完成后按索引重组。

// 配置模块
pub mod config;

// 错误类型
pub mod error;

// 内容哈希
pub mod hasher;

// 传输层抽象
pub mod transport;

// 分片规划
pub mod planner;

// 分片 worker（重试 + 哈希校验）
pub mod worker;

// 传输调度器
pub mod scheduler;

// 进度聚合
pub mod progress;

// 结果组装器
pub mod assembler;

// 传输引擎（调用方入口）
pub mod engine;

// 日志配置
pub mod logging;

// 导出常用类型
pub use config::{
    TransferConfig, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENT_CHUNKS, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_DELAY_MS,
};
pub use error::{AggregateTransferError, ChunkFailure, TransferError};
pub use planner::{plan_chunks, FileChunk};
pub use progress::{ChunkCounts, TransferProgress};
pub use transport::{HttpTransport, Method, Transport, TransportRequest, TransportResponse};

pub use assembler::ResultAssembler;
pub use engine::TransferEngine;
pub use scheduler::{TransferScheduler, TransferState};
pub use worker::{ChunkOp, ChunkOutput, ChunkWorker};
