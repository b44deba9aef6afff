// 传输调度器
//
// 持有并发预算，把每个分片驱动到 completed 或 failed。
// 事件驱动调度：worker 结算经由 mpsc 通道回到唯一的调度循环，
// 每次结算触发下一轮启动决策，不做轮询。
// TransferState 的全部变更都发生在这个循环里（单写者纪律），
// 进度快照在锁内读取，保证观察到一致的集合。

use crate::assembler::ResultAssembler;
use crate::error::{AggregateTransferError, ChunkFailure, TransferError};
use crate::planner::FileChunk;
use crate::worker::{ChunkOp, ChunkWorker};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 传输状态
///
/// 由调度器独占写入；不变量：active / completed / failed(索引) 两两不相交，
/// 其并集单调增长直至覆盖全部分片（或因取消提前终止）。
/// `bytes_transferred` 只增不减，每个完成分片恰好累加一次其大小。
#[derive(Debug)]
pub struct TransferState {
    /// 有序分片列表（结算时回填 retries）
    pub chunks: Vec<FileChunk>,
    /// 进行中的分片索引
    pub active: HashSet<usize>,
    /// 已完成的分片索引
    pub completed: HashSet<usize>,
    /// 已失败的分片记录（按结算顺序，汇总时按索引排序）
    pub failed: Vec<ChunkFailure>,
    /// 已传输字节数
    pub bytes_transferred: u64,
    /// 本次传输需要搬运的总字节数（规划分片大小之和，不含续传已有前缀）
    pub total_bytes: u64,
    /// 开始时间
    pub started_at: Instant,
}

impl TransferState {
    pub fn new(chunks: Vec<FileChunk>) -> Self {
        let total_bytes = chunks.iter().map(|c| c.size()).sum();
        Self {
            chunks,
            active: HashSet::new(),
            completed: HashSet::new(),
            failed: Vec::new(),
            bytes_transferred: 0,
            total_bytes,
            started_at: Instant::now(),
        }
    }

    /// 失败分片的索引集合
    pub fn failed_indexes(&self) -> HashSet<usize> {
        self.failed.iter().map(|f| f.index).collect()
    }
}

/// 一次 worker 结算
struct ChunkSettlement {
    /// 回传的分片（携带最终 retries）
    chunk: FileChunk,
    /// worker 结果：Ok(Some) 下载成功 / Ok(None) 上传成功 / Err 终结失败或取消
    result: Result<Option<Vec<u8>>, TransferError>,
}

/// 传输调度器
pub struct TransferScheduler {
    /// 并发预算：同时在途的分片数上限
    concurrent_chunks: usize,
    /// 取消令牌：观察到取消后不再启动新分片，在途分片协作式收尾
    cancel_token: CancellationToken,
}

impl TransferScheduler {
    pub fn new(concurrent_chunks: usize, cancel_token: CancellationToken) -> Self {
        Self {
            concurrent_chunks,
            cancel_token,
        }
    }

    /// 驱动传输直至全部分片结算完毕
    ///
    /// 启动顺序严格按索引升序；完成顺序不受约束。
    /// 终止条件：待启动队列与在途集合同时为空。
    ///
    /// # 返回
    /// - `Ok(())` - 全部分片完成
    /// - `Err(Aggregate)` - 存在重试耗尽的分片，枚举全部失败范围；已完成分片不回滚
    /// - `Err(Cancelled)` - 取消导致提前终止
    pub async fn run(
        &self,
        state: Arc<Mutex<TransferState>>,
        worker: ChunkWorker,
        op: Arc<dyn ChunkOp>,
        assembler: Option<Arc<ResultAssembler>>,
    ) -> Result<(), TransferError> {
        let mut pending: VecDeque<FileChunk> = {
            let s = state.lock().await;
            s.chunks.iter().cloned().collect()
        };
        let total = pending.len();

        if total == 0 {
            // 续传偏移等于总大小：传输立即完成
            info!("无待传分片，传输立即完成");
            return Ok(());
        }

        info!(
            "调度开始: 分片数量={}, 并发上限={}",
            total, self.concurrent_chunks
        );

        let (tx, mut rx) = mpsc::channel::<ChunkSettlement>(self.concurrent_chunks.max(1));
        let mut in_flight = 0usize;

        loop {
            // 启动循环：填满并发预算，按索引升序弹出待传分片
            while in_flight < self.concurrent_chunks
                && !pending.is_empty()
                && !self.cancel_token.is_cancelled()
            {
                let chunk = pending.pop_front().unwrap_or_else(|| unreachable!());
                {
                    let mut s = state.lock().await;
                    s.active.insert(chunk.index);
                }
                in_flight += 1;

                debug!(
                    "启动分片 #{} ({}), 在途 {}/{}",
                    chunk.index, chunk.id, in_flight, self.concurrent_chunks
                );

                let tx = tx.clone();
                let worker = worker.clone();
                let op = op.clone();
                tokio::spawn(async move {
                    let mut chunk = chunk;
                    let result = worker.run(&mut chunk, op.as_ref()).await;
                    // 结算回到唯一的调度循环；接收端先退出只可能发生在循环终止后
                    let _ = tx.send(ChunkSettlement { chunk, result }).await;
                });
            }

            if in_flight == 0 {
                // 待启动为空（或已取消）且无在途分片
                break;
            }

            // 事件驱动：等待一次结算，触发下一轮启动决策
            let Some(settlement) = rx.recv().await else {
                break;
            };
            in_flight -= 1;
            self.settle(&state, assembler.as_deref(), settlement).await;
        }

        self.conclude(&state, total).await
    }

    /// 处理一次 worker 结算（唯一的状态写入点）
    async fn settle(
        &self,
        state: &Arc<Mutex<TransferState>>,
        assembler: Option<&ResultAssembler>,
        settlement: ChunkSettlement,
    ) {
        let index = settlement.chunk.index;
        let mut s = state.lock().await;
        s.active.remove(&index);

        // 回填重试计数，便于事后观测
        if let Some(meta) = s.chunks.iter_mut().find(|c| c.index == index) {
            meta.retries = settlement.chunk.retries;
        }

        match settlement.result {
            Ok(body) => {
                s.completed.insert(index);
                s.bytes_transferred += settlement.chunk.size();
                debug!(
                    "分片 #{} 完成, 进度 {}/{} 分片, {} bytes",
                    index,
                    s.completed.len(),
                    s.chunks.len(),
                    s.bytes_transferred
                );
                // 下载方向：按索引写入结果槽位（与完成顺序无关）
                if let (Some(assembler), Some(bytes)) = (assembler, body) {
                    assembler.write_slot(index, bytes);
                }
            }
            Err(TransferError::Cancelled) => {
                // 取消结算：既不记 completed 也不记 failed，由 run 统一上报
                debug!("分片 #{} 因取消而结束", index);
            }
            Err(e) => {
                let last_error = match &e {
                    TransferError::ChunkExhausted { last_error, .. } => last_error.clone(),
                    other => other.to_string(),
                };
                warn!("分片 #{} ({}) 终结失败: {}", index, settlement.chunk.id, e);
                s.failed.push(ChunkFailure {
                    chunk_id: settlement.chunk.id.clone(),
                    index,
                    range: settlement.chunk.range.clone(),
                    last_error,
                });
            }
        }
    }

    /// 汇总终态
    async fn conclude(
        &self,
        state: &Arc<Mutex<TransferState>>,
        total: usize,
    ) -> Result<(), TransferError> {
        let s = state.lock().await;

        if self.cancel_token.is_cancelled() && s.completed.len() + s.failed.len() < total {
            warn!(
                "传输被取消: 已完成 {}/{} 分片",
                s.completed.len(),
                total
            );
            return Err(TransferError::Cancelled);
        }

        if !s.failed.is_empty() {
            let mut failures = s.failed.clone();
            failures.sort_by_key(|f| f.index);
            error!(
                "传输失败: {}/{} 分片重试耗尽",
                failures.len(),
                total
            );
            return Err(AggregateTransferError { failures }.into());
        }

        info!(
            "✅ 调度完成: {} 分片全部完成, 共 {} bytes",
            total, s.bytes_transferred
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{ChunkOp, ChunkOutput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 可配置失败分片的模拟操作，同时追踪并发峰值
    struct TestOp {
        /// 永久失败的分片索引
        failing: HashSet<usize>,
        /// 每分片的下载产出（None 表示上传方向）
        produce_body: bool,
        current: AtomicUsize,
        peak: AtomicUsize,
        launched: AtomicUsize,
    }

    impl TestOp {
        fn new(failing: impl IntoIterator<Item = usize>, produce_body: bool) -> Self {
            Self {
                failing: failing.into_iter().collect(),
                produce_body,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                launched: AtomicUsize::new(0),
            }
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChunkOp for TestOp {
        async fn execute(&self, chunk: &FileChunk) -> Result<ChunkOutput, TransferError> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            // 模拟网络耗时，保证并发窗口真实重叠
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&chunk.index) {
                return Err(TransferError::Transport(format!(
                    "分片 #{} 模拟网络故障",
                    chunk.index
                )));
            }
            if self.produce_body {
                // 用索引填充内容，便于校验组装顺序
                Ok(ChunkOutput::downloaded(
                    vec![chunk.index as u8; chunk.size() as usize],
                    None,
                ))
            } else {
                Ok(ChunkOutput::uploaded())
            }
        }
    }

    fn chunks_of(total_size: u64, chunk_size: u64) -> Vec<FileChunk> {
        let config = crate::config::TransferConfig {
            chunk_size,
            ..Default::default()
        };
        crate::planner::plan_chunks(total_size, &config).unwrap()
    }

    fn worker(retry_attempts: u32, token: &CancellationToken) -> ChunkWorker {
        ChunkWorker::new(
            retry_attempts,
            Duration::from_millis(1),
            false,
            token.clone(),
        )
    }

    async fn run_with(
        chunks: Vec<FileChunk>,
        op: Arc<TestOp>,
        concurrent: usize,
        retry_attempts: u32,
        assembler: Option<Arc<ResultAssembler>>,
    ) -> (Result<(), TransferError>, Arc<Mutex<TransferState>>) {
        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(TransferState::new(chunks)));
        let scheduler = TransferScheduler::new(concurrent, token.clone());
        let result = scheduler
            .run(
                state.clone(),
                worker(retry_attempts, &token),
                op,
                assembler,
            )
            .await;
        (result, state)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound_never_exceeded() {
        let chunks = chunks_of(100, 10); // 10 个分片
        let op = Arc::new(TestOp::new([], false));
        let (result, _) = run_with(chunks, op.clone(), 3, 0, None).await;

        assert!(result.is_ok());
        assert!(op.peak() <= 3, "并发峰值 {} 超过预算 3", op.peak());
        // 并发预算确实被用上（不是串行执行）
        assert!(op.peak() >= 2);
    }

    #[tokio::test]
    async fn test_all_chunks_settle_and_bytes_accounted() {
        let chunks = chunks_of(25, 10); // 10, 10, 5
        let op = Arc::new(TestOp::new([], false));
        let (result, state) = run_with(chunks, op, 2, 0, None).await;

        assert!(result.is_ok());
        let s = state.lock().await;
        assert_eq!(s.completed.len(), 3);
        assert!(s.failed.is_empty());
        assert!(s.active.is_empty());
        assert_eq!(s.bytes_transferred, 25);
        assert_eq!(s.total_bytes, 25);
    }

    #[tokio::test]
    async fn test_single_failing_chunk_yields_aggregate() {
        // 并发 2，5 个分片，#2 始终失败 -> 仅 #2 进入聚合错误，其余全部完成
        let chunks = chunks_of(50, 10);
        let op = Arc::new(TestOp::new([2], false));
        let (result, state) = run_with(chunks, op, 2, 1, None).await;

        let err = result.unwrap_err();
        match err {
            TransferError::Aggregate(agg) => {
                assert_eq!(agg.failures.len(), 1);
                assert_eq!(agg.failures[0].index, 2);
                assert_eq!(agg.failures[0].chunk_id, "chunk-20-30");
                assert_eq!(agg.earliest_failed_offset(), Some(20));
            }
            other => panic!("期望 Aggregate, 实际 {:?}", other),
        }

        let s = state.lock().await;
        assert_eq!(s.completed, HashSet::from([0, 1, 3, 4]));
        assert_eq!(s.failed_indexes(), HashSet::from([2]));
        // 已完成分片不回滚，字节数只计完成分片
        assert_eq!(s.bytes_transferred, 40);
    }

    #[tokio::test]
    async fn test_sets_disjoint_and_union_complete() {
        let chunks = chunks_of(70, 10);
        let op = Arc::new(TestOp::new([1, 4], false));
        let (result, state) = run_with(chunks, op, 3, 0, None).await;

        assert!(result.is_err());
        let s = state.lock().await;
        let failed = s.failed_indexes();
        // 两两不相交
        assert!(s.completed.is_disjoint(&failed));
        assert!(s.active.is_empty());
        // 并集覆盖全部分片
        let mut union: HashSet<usize> = s.completed.clone();
        union.extend(&failed);
        assert_eq!(union.len(), s.chunks.len());
        // bytes_transferred == 完成分片大小之和
        let expected: u64 = s
            .chunks
            .iter()
            .filter(|c| s.completed.contains(&c.index))
            .map(|c| c.size())
            .sum();
        assert_eq!(s.bytes_transferred, expected);
    }

    #[tokio::test]
    async fn test_zero_chunks_completes_immediately() {
        let op = Arc::new(TestOp::new([], false));
        let (result, state) = run_with(vec![], op.clone(), 3, 0, None).await;

        assert!(result.is_ok());
        let s = state.lock().await;
        assert_eq!(s.bytes_transferred, 0);
        assert_eq!(op.launched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_bytes_slotted_by_index() {
        let chunks = chunks_of(25, 10);
        let assembler = Arc::new(ResultAssembler::for_chunks(&chunks));
        let op = Arc::new(TestOp::new([], true));
        let (result, _) = run_with(chunks, op, 3, 0, Some(assembler.clone())).await;

        assert!(result.is_ok());
        let assembled = assembler.assemble().unwrap();
        let mut expected = vec![0u8; 10];
        expected.extend(vec![1u8; 10]);
        expected.extend(vec![2u8; 5]);
        assert_eq!(assembled, expected);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_launches() {
        // 大量分片 + 立即取消：不应启动全部分片
        let chunks = chunks_of(200, 10); // 20 个分片
        let op = Arc::new(TestOp::new([], false));
        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(TransferState::new(chunks)));

        let handle = {
            let state = state.clone();
            let op = op.clone();
            let worker = worker(0, &token);
            let token = token.clone();
            tokio::spawn(async move {
                TransferScheduler::new(2, token)
                    .run(state, worker, op, None)
                    .await
            })
        };

        // 等第一批分片进入在途后取消
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));

        // 协作式收尾：已在途的分片允许跑完，但远未启动全部 20 个
        let launched = op.launched.load(Ordering::SeqCst);
        assert!(launched < 20, "取消后仍启动了 {} 个分片", launched);

        let s = state.lock().await;
        assert!(s.active.is_empty());
        assert!(s.completed.len() < 20);
    }
}
