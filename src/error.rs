// 错误类型定义
//
// 错误分层：
// - 单次尝试级：Transport / HashMismatch（可重试，由 ChunkWorker 内部消化）
// - 分片级：ChunkExhausted（该分片重试耗尽，不影响其他分片）
// - 传输级：Aggregate（调度结束后汇总所有失败分片，唯一对外暴露的失败形态）
// - 契约级：InvalidConfiguration / IncompleteTransfer（立即失败，不重试）

use std::ops::Range;
use thiserror::Error;

/// 传输错误
#[derive(Debug, Error)]
pub enum TransferError {
    /// 配置无效（分片大小、并发数、续传偏移等），在任何网络活动前立即暴露
    #[error("配置无效: {0}")]
    InvalidConfiguration(String),

    /// 单次网络操作失败（可重试）
    #[error("传输操作失败: {0}")]
    Transport(String),

    /// 分片哈希校验失败（视同网络错误，可重试）
    #[error("分片 #{index} 哈希校验失败: 期望 {expected}, 实际 {actual}")]
    HashMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    /// 单个分片重试耗尽（仅该分片终结，不中断其他分片）
    #[error("分片 #{index} ({chunk_id}) 共尝试 {attempts} 次后仍失败: {last_error}")]
    ChunkExhausted {
        index: usize,
        chunk_id: String,
        /// 总尝试次数（首次 + 重试）
        attempts: u32,
        last_error: String,
    },

    /// 聚合传输错误：调度结束时存在失败分片
    #[error(transparent)]
    Aggregate(#[from] AggregateTransferError),

    /// 结果组装器在全部分片完成前被调用（契约违反）
    #[error("传输未完成: 已完成 {completed}/{total} 个分片，无法组装结果")]
    IncompleteTransfer { completed: usize, total: usize },

    /// 传输已被取消
    #[error("传输已被取消")]
    Cancelled,
}

/// 单个失败分片的记录
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    /// 分片 ID（由字节范围派生，重试间保持稳定）
    pub chunk_id: String,
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
    /// 最后一次错误信息
    pub last_error: String,
}

/// 聚合传输错误
///
/// 枚举本次传输中所有重试耗尽的分片，是失败传输对调用方暴露的唯一错误。
/// 已完成的分片不会回滚；调用方可通过 `earliest_failed_offset` 重新定位
/// `resume_offset` 以便续传，或仅重传失败的字节范围。
#[derive(Debug, Error)]
#[error("传输失败: {} 个分片重试耗尽 [{}]", .failures.len(), .failures.iter().map(|f| f.chunk_id.as_str()).collect::<Vec<_>>().join(", "))]
pub struct AggregateTransferError {
    /// 所有失败分片（按索引升序）
    pub failures: Vec<ChunkFailure>,
}

impl AggregateTransferError {
    /// 最早失败分片的起始偏移
    ///
    /// 下载失败后，将 `resume_offset` 设为该值即可跳过已完成前缀继续传输
    pub fn earliest_failed_offset(&self) -> Option<u64> {
        self.failures.iter().map(|f| f.range.start).min()
    }

    /// 失败分片的 ID 列表
    pub fn failed_chunk_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.chunk_id.as_str()).collect()
    }
}

impl TransferError {
    /// 是否为可重试错误（单次尝试级）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Transport(_) | TransferError::HashMismatch { .. }
        )
    }
}
