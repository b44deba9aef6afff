// 传输配置
//
// 配置在传输开始时一次性提供，整个传输生命周期内不可变

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认分片大小: 1MB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// 默认并发分片数
pub const DEFAULT_CONCURRENT_CHUNKS: usize = 3;

/// 默认重试次数
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// 默认重试延迟（毫秒）
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 分片大小（字节），必须 > 0
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 最大并发分片数，必须 >= 1
    #[serde(default = "default_concurrent_chunks")]
    pub concurrent_chunks: usize,
    /// 单个分片的最大重试次数（0 表示失败后不重试）
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// 重试间隔（毫秒），固定延迟
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 是否校验分片哈希（仅下载生效）
    #[serde(default = "default_validate_hash")]
    pub validate_hash: bool,
    /// 续传起始偏移（字节，仅下载生效），调用方需自行记录已落盘的字节数
    #[serde(default)]
    pub resume_offset: u64,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_concurrent_chunks() -> usize {
    DEFAULT_CONCURRENT_CHUNKS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_validate_hash() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrent_chunks: DEFAULT_CONCURRENT_CHUNKS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            validate_hash: true,
            resume_offset: 0,
        }
    }
}

impl TransferConfig {
    /// 校验配置合法性
    ///
    /// 配置错误立即暴露，不进入任何网络活动
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk_size 必须大于 0".to_string(),
            ));
        }
        if self.concurrent_chunks == 0 {
            return Err(TransferError::InvalidConfiguration(
                "concurrent_chunks 必须大于等于 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 重试间隔
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
