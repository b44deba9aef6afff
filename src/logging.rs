//! 日志系统配置
//!
//! 库本身只通过 tracing 打点；这里提供给二进制/集成测试使用的
//! 控制台订阅器初始化入口。RUST_LOG 环境变量优先于传入级别。

use anyhow::{Context, Result};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// 初始化控制台日志
///
/// # 参数
/// * `level` - 过滤表达式，如 "info" 或 "warn,chunk_transfer_engine=debug"
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("解析日志级别失败")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .try_init()
        .map_err(|e| anyhow::anyhow!("初始化日志订阅器失败: {}", e))?;

    Ok(())
}
