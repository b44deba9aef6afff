// 进度聚合
//
// 进度完全由 TransferState 按需派生，从不缓存过期值；
// 可与进行中的传输并发调用（快照在状态锁内读取）

use crate::scheduler::TransferState;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 分片计数快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkCounts {
    /// 分片总数
    pub total: usize,
    /// 已完成
    pub completed: usize,
    /// 已失败
    pub failed: usize,
    /// 进行中
    pub in_progress: usize,
}

/// 传输进度快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    /// 已传输字节数
    pub bytes_transferred: u64,
    /// 本次传输需要搬运的总字节数
    pub total_bytes: u64,
    /// 速度 (bytes/s)
    pub speed: u64,
    /// 预计剩余秒数；速度为 0 时无法估计
    pub eta_seconds: Option<f64>,
    /// 分片计数
    pub chunks: ChunkCounts,
    /// 快照时间 (Unix timestamp, 毫秒)
    pub captured_at: i64,
}

/// 生成进度快照
///
/// `elapsed <= 0` 视为速度 0，避免除零；速度为 0 时 ETA 不可知
pub fn snapshot(state: &TransferState) -> TransferProgress {
    let elapsed = state.started_at.elapsed().as_secs_f64();
    let speed = if elapsed > 0.0 {
        state.bytes_transferred as f64 / elapsed
    } else {
        0.0
    };

    let remaining = state.total_bytes.saturating_sub(state.bytes_transferred);
    let eta_seconds = if speed > 0.0 {
        Some(remaining as f64 / speed)
    } else {
        None
    };

    TransferProgress {
        bytes_transferred: state.bytes_transferred,
        total_bytes: state.total_bytes,
        speed: speed as u64,
        eta_seconds,
        chunks: ChunkCounts {
            total: state.chunks.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            in_progress: state.active.len(),
        },
        captured_at: Utc::now().timestamp_millis(),
    }
}
