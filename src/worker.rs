// 分片 worker
//
// 负责单个分片的传输尝试：一次网络调用 + 可选哈希校验，外层包一个
// 有界重试循环（固定延迟）。调度器本身从不重试——重试完全在 worker 内部，
// 调度器只区分"worker 成功"与"worker 重试耗尽"。

use crate::error::TransferError;
use crate::hasher::sha256_hex;
use crate::planner::FileChunk;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 一次分片操作的产出
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    /// 下载得到的分片字节（上传时为 None）
    pub body: Option<Vec<u8>>,
    /// 服务端随响应提供的期望哈希（如有）
    pub server_hash: Option<String>,
}

impl ChunkOutput {
    /// 上传成功，无本地产出
    pub fn uploaded() -> Self {
        Self {
            body: None,
            server_hash: None,
        }
    }

    /// 下载成功，携带分片字节与可选的服务端哈希
    pub fn downloaded(body: Vec<u8>, server_hash: Option<String>) -> Self {
        Self {
            body: Some(body),
            server_hash,
        }
    }
}

/// 单次分片传输操作
///
/// 上传/下载各自实现一次；worker 不关心方向，只关心成功与否
#[async_trait]
pub trait ChunkOp: Send + Sync {
    async fn execute(&self, chunk: &FileChunk) -> Result<ChunkOutput, TransferError>;
}

/// 分片 worker
#[derive(Debug, Clone)]
pub struct ChunkWorker {
    /// 最大重试次数（0 表示失败后不重试）
    retry_attempts: u32,
    /// 重试间隔（固定延迟）
    retry_delay: Duration,
    /// 是否校验下载分片的哈希
    validate_hash: bool,
    /// 取消令牌：观察到取消后不得开始新的重试
    cancel_token: CancellationToken,
}

impl ChunkWorker {
    pub fn new(
        retry_attempts: u32,
        retry_delay: Duration,
        validate_hash: bool,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            retry_attempts,
            retry_delay,
            validate_hash,
            cancel_token,
        }
    }

    /// 运行单个分片直至成功或重试耗尽
    ///
    /// # 返回
    /// - `Ok(Some(bytes))` - 下载成功，携带分片字节
    /// - `Ok(None)` - 上传成功
    /// - `Err(ChunkExhausted)` - 重试耗尽，附带最后一次错误
    /// - `Err(Cancelled)` - 在尝试间隙观察到取消
    pub async fn run(
        &self,
        chunk: &mut FileChunk,
        op: &dyn ChunkOp,
    ) -> Result<Option<Vec<u8>>, TransferError> {
        loop {
            if self.cancel_token.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let attempt_error = match op.execute(chunk).await {
                Ok(output) => match self.verify(chunk, output) {
                    Ok(body) => {
                        debug!(
                            "分片 #{} ({}) 传输成功, 重试次数={}",
                            chunk.index, chunk.id, chunk.retries
                        );
                        return Ok(body);
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            chunk.retries += 1;

            if chunk.retries > self.retry_attempts {
                warn!(
                    "分片 #{} ({}) 重试耗尽: 共尝试 {} 次, 最后错误: {}",
                    chunk.index, chunk.id, chunk.retries, attempt_error
                );
                return Err(TransferError::ChunkExhausted {
                    index: chunk.index,
                    chunk_id: chunk.id.clone(),
                    attempts: chunk.retries,
                    last_error: attempt_error.to_string(),
                });
            }

            debug!(
                "分片 #{} 第 {}/{} 次重试, {}ms 后发起: {}",
                chunk.index,
                chunk.retries,
                self.retry_attempts,
                self.retry_delay.as_millis(),
                attempt_error
            );

            // 等待重试间隔；期间观察到取消则立即结束，绝不开始新的重试
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    return Err(TransferError::Cancelled);
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// 校验一次成功尝试的产出
    ///
    /// 哈希不匹配视同网络错误（可重试）；期望哈希取分片规划值，
    /// 其次取服务端响应值，两者都没有时跳过校验
    fn verify(
        &self,
        chunk: &FileChunk,
        output: ChunkOutput,
    ) -> Result<Option<Vec<u8>>, TransferError> {
        let Some(body) = output.body else {
            // 上传方向：无本地产出，无需校验
            return Ok(None);
        };

        if self.validate_hash {
            let expected = chunk.expected_hash.clone().or(output.server_hash);
            if let Some(expected) = expected {
                let actual = sha256_hex(&body);
                if !actual.eq_ignore_ascii_case(&expected) {
                    return Err(TransferError::HashMismatch {
                        index: chunk.index,
                        expected,
                        actual,
                    });
                }
            }
        }

        Ok(Some(body))
    }
}
