// 分片规划
//
// 纯函数：给定总大小、分片大小和续传偏移，产出有序、无间隙、不重叠的
// 字节范围划分。相同输入必然产出相同分片列表（含 ID），重试期间 ID 稳定。

use crate::config::TransferConfig;
use crate::error::TransferError;
use std::ops::Range;
use tracing::debug;

/// 分片信息
///
/// 每次传输由规划器一次性创建，不跨传输复用；
/// `retries` 仅由持有该分片的 worker 修改，其余字段不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// 分片 ID，由字节范围确定性派生，重试间保持稳定
    pub id: String,
    /// 分片索引（start / chunk_size 整除）
    pub index: usize,
    /// 字节范围（end 不含）
    pub range: Range<u64>,
    /// 期望哈希（规划时已知的话；下载时服务端也可在响应头中补充）
    pub expected_hash: Option<String>,
    /// 重试次数
    pub retries: u32,
}

impl FileChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self {
            id: format!("chunk-{}-{}", range.start, range.end),
            index,
            range,
            expected_hash: None,
            retries: 0,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 规划分片列表
///
/// 从 `resume_offset` 开始，按 `chunk_size` 步长切分 `[resume_offset, total_size)`，
/// 最后一个分片允许不足 `chunk_size`
///
/// # 参数
/// * `total_size` - 负载总大小（字节）
/// * `config` - 传输配置
///
/// # 返回
/// 按索引升序的分片列表；`resume_offset == total_size` 时为空列表（传输已完成）
pub fn plan_chunks(total_size: u64, config: &TransferConfig) -> Result<Vec<FileChunk>, TransferError> {
    config.validate()?;

    if config.resume_offset > total_size {
        return Err(TransferError::InvalidConfiguration(format!(
            "resume_offset ({}) 超过总大小 ({})",
            config.resume_offset, total_size
        )));
    }

    let chunk_size = config.chunk_size;
    let mut chunks = Vec::new();
    let mut start = config.resume_offset;

    while start < total_size {
        let end = std::cmp::min(start + chunk_size, total_size);
        let index = (start / chunk_size) as usize;
        chunks.push(FileChunk::new(index, start..end));
        start = end;
    }

    debug!(
        "分片规划完成: 总大小={} bytes, 续传偏移={}, 分片大小={}, 分片数量={}",
        total_size,
        config.resume_offset,
        chunk_size,
        chunks.len()
    );

    Ok(chunks)
}
