// 传输层抽象
//
// 引擎之上的一切（分片规划、调度、重试、组装）只依赖 Transport trait：
// 一次逻辑操作 = 发送字节、接收字节（给定方法/请求头/字节范围）。
// 连接池、TLS、DNS 等协议细节全部属于 Transport 实现内部，引擎不感知。

use crate::error::TransferError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;
use tracing::debug;

/// 分片索引请求头（上传时附带）
pub const HEADER_CHUNK_INDEX: &str = "x-chunk-index";

/// 分片总数请求头（上传时附带）
pub const HEADER_CHUNK_COUNT: &str = "x-chunk-count";

/// 分片哈希请求头（上传时附带本地摘要；下载时服务端可返回期望摘要）
pub const HEADER_CHUNK_HASH: &str = "x-chunk-hash";

/// 内容长度响应头（下载前探测文件总大小）
pub const HEADER_CONTENT_LENGTH: &str = "content-length";

/// 默认单次请求超时（秒）
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Head,
}

/// 传输请求
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// 请求方法
    pub method: Method,
    /// 目标 URL
    pub url: String,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// 字节范围（下载分片时设置，转换为标准 Range 请求头）
    pub range: Option<Range<u64>>,
    /// 请求体（上传分片时设置）
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            range: None,
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        for (k, v) in headers {
            self.headers.insert(k.to_ascii_lowercase(), v.clone());
        }
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// 传输响应
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// 状态是否表示成功（2xx，含 206 Partial Content）
    pub success: bool,
    /// 响应体
    pub body: Vec<u8>,
    /// 响应头（键统一小写）
    pub headers: HashMap<String, String>,
}

impl TransportResponse {
    /// 按名称读取响应头（不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

/// 传输协作方契约
///
/// 实现方负责一次完整的请求往返；超时由实现方自行持有，
/// 超时失败与网络失败在上层被同等对待（进入重试循环）
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransferError>;
}

/// 基于 reqwest 的 HTTP 传输实现
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// 创建 HTTP 传输（默认 30 秒请求超时）
    pub fn new() -> Result<Self, TransferError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// 创建 HTTP 传输并指定单次请求超时
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransferError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransferError::Transport(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransferError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Head => self.client.head(&request.url),
        };

        // 标准 Range 请求头，期望服务端遵守 Partial Content 语义
        if let Some(range) = &request.range {
            builder = builder.header(
                "Range",
                format!("bytes={}-{}", range.start, range.end - 1),
            );
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransferError::Transport(format!("发送HTTP请求失败: {}", e)))?;

        let status = resp.status();
        let success = status.is_success() || status.as_u16() == 206;

        debug!("HTTP {:?} {} -> {}", request.method, request.url, status);

        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        // 流式读取响应体
        let mut stream = resp.bytes_stream();
        let mut body = Vec::new();
        while let Some(piece) = stream.next().await {
            let piece =
                piece.map_err(|e| TransferError::Transport(format!("读取数据流失败: {}", e)))?;
            body.extend_from_slice(&piece);
        }

        Ok(TransportResponse {
            success,
            body,
            headers,
        })
    }
}
