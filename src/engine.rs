// 传输引擎
//
// 调用方入口：upload / download / progress / cancel。
// 引擎把方向差异收敛为两个 ChunkOp 实现（上传切片发送、下载范围请求），
// 其余一律交给同一套 规划 -> 调度 -> worker -> 组装 流水线。
//
// 取消策略：协作式收尾。cancel() 后不再启动新分片，在途分片允许跑到
// 下一个结算点，重试绝不会在观察到取消之后开始。

use crate::assembler::ResultAssembler;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::hasher::sha256_hex;
use crate::planner::{plan_chunks, FileChunk};
use crate::progress::{self, TransferProgress};
use crate::scheduler::{TransferScheduler, TransferState};
use crate::transport::{
    Method, Transport, TransportRequest, HEADER_CHUNK_COUNT, HEADER_CHUNK_HASH,
    HEADER_CHUNK_INDEX, HEADER_CONTENT_LENGTH,
};
use crate::worker::{ChunkOp, ChunkOutput, ChunkWorker};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// 当前（或最近一次）传输的句柄
struct ActiveTransfer {
    state: Arc<Mutex<TransferState>>,
    cancel_token: CancellationToken,
}

/// 传输引擎
pub struct TransferEngine {
    /// 传输协作方（抽象边界，引擎不感知连接池/TLS/DNS）
    transport: Arc<dyn Transport>,
    /// 传输配置，引擎生命周期内不可变
    config: TransferConfig,
    /// 当前传输句柄，供进度查询与取消
    current: RwLock<Option<ActiveTransfer>>,
}

impl TransferEngine {
    pub fn new(transport: Arc<dyn Transport>, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            current: RwLock::new(None),
        }
    }

    /// 分片上传
    ///
    /// 每个分片的请求附带 `x-chunk-index` / `x-chunk-count` 元数据头，
    /// 请求体为该分片的字节范围；`validate_hash` 开启时附带本地摘要头。
    /// 上传不支持续传偏移，`resume_offset` 被忽略。
    ///
    /// # 返回
    /// `Ok(())` 全部分片上传成功；失败时返回聚合错误，枚举所有失败范围
    pub async fn upload(
        &self,
        target: &str,
        payload: Vec<u8>,
        headers: &HashMap<String, String>,
    ) -> Result<(), TransferError> {
        self.config.validate()?;

        // resume_offset 仅下载生效
        let mut config = self.config.clone();
        config.resume_offset = 0;

        let total_size = payload.len() as u64;
        let chunks = plan_chunks(total_size, &config)?;
        let transfer_id = Uuid::new_v4();

        info!(
            "[{}] 开始上传: target={}, 总大小={} bytes, 分片数量={}, 并发={}",
            transfer_id,
            target,
            total_size,
            chunks.len(),
            config.concurrent_chunks
        );

        let op = Arc::new(UploadOp {
            transport: self.transport.clone(),
            target: target.to_string(),
            headers: headers.clone(),
            payload: Arc::new(payload),
            total_chunks: chunks.len(),
            attach_hash: config.validate_hash,
        });

        self.run_transfer(chunks, op, None).await?;
        info!("[{}] ✅ 上传完成: {} bytes", transfer_id, total_size);
        Ok(())
    }

    /// 分片下载（支持续传）
    ///
    /// 先通过一次 HEAD 探测总大小，再从 `resume_offset` 规划分片；
    /// 各分片以标准 Range 请求头获取，乱序完成后按索引组装。
    ///
    /// # 返回
    /// 组装完成的字节（`resume_offset` 之后的部分）；
    /// `resume_offset == 总大小` 时立即返回空结果
    pub async fn download(
        &self,
        source: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<u8>, TransferError> {
        self.config.validate()?;

        let total_size = self.probe_total_size(source, headers).await?;
        let chunks = plan_chunks(total_size, &self.config)?;
        let transfer_id = Uuid::new_v4();

        info!(
            "[{}] 开始下载: source={}, 总大小={} bytes, 续传偏移={}, 分片数量={}",
            transfer_id,
            source,
            total_size,
            self.config.resume_offset,
            chunks.len()
        );

        let assembler = Arc::new(ResultAssembler::for_chunks(&chunks));
        let op = Arc::new(DownloadOp {
            transport: self.transport.clone(),
            source: source.to_string(),
            headers: headers.clone(),
        });

        self.run_transfer(chunks, op, Some(assembler.clone()))
            .await?;

        let result = assembler.assemble()?;
        info!("[{}] ✅ 下载完成: {} bytes", transfer_id, result.len());
        Ok(result)
    }

    /// 当前（或最近一次）传输的进度快照
    ///
    /// 按需从传输状态派生，可与进行中的传输并发调用
    pub async fn progress(&self) -> Option<TransferProgress> {
        let current = self.current.read().await;
        let active = current.as_ref()?;
        let state = active.state.lock().await;
        Some(progress::snapshot(&state))
    }

    /// 取消当前传输（协作式收尾）
    pub async fn cancel(&self) {
        if let Some(active) = self.current.read().await.as_ref() {
            info!("收到取消信号，停止启动新分片");
            active.cancel_token.cancel();
        }
    }

    /// 统一的传输执行路径：注册状态句柄 -> 构建 worker -> 交给调度器
    async fn run_transfer(
        &self,
        chunks: Vec<FileChunk>,
        op: Arc<dyn ChunkOp>,
        assembler: Option<Arc<ResultAssembler>>,
    ) -> Result<(), TransferError> {
        let cancel_token = CancellationToken::new();
        let state = Arc::new(Mutex::new(TransferState::new(chunks)));

        {
            let mut current = self.current.write().await;
            *current = Some(ActiveTransfer {
                state: state.clone(),
                cancel_token: cancel_token.clone(),
            });
        }

        let worker = ChunkWorker::new(
            self.config.retry_attempts,
            self.config.retry_delay(),
            self.config.validate_hash,
            cancel_token.clone(),
        );
        let scheduler = TransferScheduler::new(self.config.concurrent_chunks, cancel_token);
        scheduler.run(state, worker, op, assembler).await
    }

    /// 通过 HEAD 请求探测文件总大小
    async fn probe_total_size(
        &self,
        source: &str,
        headers: &HashMap<String, String>,
    ) -> Result<u64, TransferError> {
        let req = TransportRequest::new(Method::Head, source).with_headers(headers);
        let resp = self.transport.send(req).await?;

        if !resp.success {
            return Err(TransferError::Transport(format!(
                "探测文件大小失败: {}",
                source
            )));
        }

        let total = resp
            .header(HEADER_CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                TransferError::Transport("响应缺少有效的 content-length".to_string())
            })?;

        debug!("探测到文件总大小: {} bytes", total);
        Ok(total)
    }
}

/// 上传方向的分片操作
struct UploadOp {
    transport: Arc<dyn Transport>,
    target: String,
    headers: HashMap<String, String>,
    /// 完整负载，各分片按范围切片发送
    payload: Arc<Vec<u8>>,
    total_chunks: usize,
    attach_hash: bool,
}

#[async_trait]
impl ChunkOp for UploadOp {
    async fn execute(&self, chunk: &FileChunk) -> Result<ChunkOutput, TransferError> {
        let body = self.payload[chunk.range.start as usize..chunk.range.end as usize].to_vec();

        let mut req = TransportRequest::new(Method::Put, &self.target)
            .with_headers(&self.headers)
            .with_header(HEADER_CHUNK_INDEX, chunk.index.to_string())
            .with_header(HEADER_CHUNK_COUNT, self.total_chunks.to_string());

        if self.attach_hash {
            req = req.with_header(HEADER_CHUNK_HASH, sha256_hex(&body));
        }

        let resp = self.transport.send(req.with_body(body)).await?;
        if !resp.success {
            return Err(TransferError::Transport(format!(
                "上传分片 #{} 被服务端拒绝",
                chunk.index
            )));
        }
        Ok(ChunkOutput::uploaded())
    }
}

/// 下载方向的分片操作
struct DownloadOp {
    transport: Arc<dyn Transport>,
    source: String,
    headers: HashMap<String, String>,
}

#[async_trait]
impl ChunkOp for DownloadOp {
    async fn execute(&self, chunk: &FileChunk) -> Result<ChunkOutput, TransferError> {
        let req = TransportRequest::new(Method::Get, &self.source)
            .with_headers(&self.headers)
            .with_range(chunk.range.clone());

        let resp = self.transport.send(req).await?;
        if !resp.success {
            return Err(TransferError::Transport(format!(
                "下载分片 #{} 范围请求被拒绝",
                chunk.index
            )));
        }
        if resp.body.len() as u64 != chunk.size() {
            // 长度不符视同网络错误，进入重试
            return Err(TransferError::Transport(format!(
                "下载分片 #{} 长度不符: 期望 {} bytes, 实际 {} bytes",
                chunk.index,
                chunk.size(),
                resp.body.len()
            )));
        }

        let server_hash = resp.header(HEADER_CHUNK_HASH).map(str::to_string);
        Ok(ChunkOutput::downloaded(resp.body, server_hash))
    }
}
