/// CLI Interface Module
///
/// 主节点的命令行入口：解析参数、初始化日志、组建集群
/// （远端worker或本地模式）、启动客户端服务。

use crate::dispatch::Master;
use crate::error::{EngineError, Result};
use crate::local::LocalCluster;
use crate::server;
use crate::worker::{WorkerChannel, WorkerClient};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// 主节点命令行配置
#[derive(Parser, Debug, Clone)]
#[command(name = "rdd-engine")]
#[command(version = "0.1.0")]
#[command(about = "RDD式分布式计算引擎主节点", long_about = None)]
pub struct CliConfig {
    /// 客户端监听地址
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// 客户端监听端口
    #[arg(short, long, default_value_t = 8421)]
    pub port: u16,

    /// 远端worker地址列表（host:port，逗号分隔）；缺省为本地模式
    #[arg(short, long)]
    pub workers: Option<String>,

    /// 本地模式worker数量（0表示自动检测CPU核心数）
    #[arg(short = 'n', long, default_value_t = 0)]
    pub local_workers: usize,

    /// 日志级别
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// 仅显示配置不启动服务（用于调试）
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

/// 命令行入口
pub async fn run() {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    tracing::info!("主节点启动");
    tracing::info!("配置: {:?}", config);

    let mode = match &config.workers {
        Some(list) => format!("网络模式 ({} worker)", list.split(',').count()),
        None => {
            let count = effective_local_workers(&config);
            format!("本地模式 ({} worker)", count)
        }
    };

    println!("========================================");
    println!("  RDD计算引擎主节点 v0.1.0");
    println!("========================================");
    println!("监听地址:     {}:{}", config.host, config.port);
    println!("运行模式:     {}", mode);
    println!("日志级别:     {}", config.log_level);
    println!("========================================");

    if config.dry_run {
        println!("\nDry-run 模式 - 不启动服务");
        return;
    }

    let master = match build_master(&config).await {
        Ok(master) => master,
        Err(e) => {
            tracing::error!(error = %e, "集群初始化失败");
            return;
        }
    };

    let addr = SocketAddr::new(config.host, config.port);
    if let Err(e) = server::run_server(addr, Arc::new(master)).await {
        tracing::error!(error = %e, "服务异常退出");
    }
}

fn effective_local_workers(config: &CliConfig) -> usize {
    if config.local_workers == 0 {
        num_cpus::get()
    } else {
        config.local_workers
    }
}

/// 按配置组建主节点
async fn build_master(config: &CliConfig) -> Result<Master> {
    match &config.workers {
        Some(list) => {
            let mut workers: Vec<Arc<dyn WorkerChannel>> = Vec::new();
            for (id, addr) in list.split(',').filter(|s| !s.trim().is_empty()).enumerate() {
                let client = WorkerClient::connect(id, addr.trim()).await?;
                workers.push(Arc::new(client));
            }
            if workers.is_empty() {
                return Err(EngineError::Planning("empty worker list".to_string()));
            }
            Ok(Master::new(workers))
        }
        None => {
            let count = effective_local_workers(config);
            tracing::info!(workers = count, "本地模式");
            Ok(LocalCluster::new(count).into_master())
        }
    }
}

/// 初始化日志系统
fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_config_default() {
        let config = CliConfig::parse_from(["rdd-engine"]);
        assert_eq!(config.port, 8421);
        assert!(config.workers.is_none());
        assert_eq!(config.local_workers, 0);
        assert_eq!(config.log_level, "info");
        assert!(!config.dry_run);
    }

    #[test]
    fn test_cli_config_custom() {
        let config = CliConfig::parse_from([
            "rdd-engine",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--workers",
            "10.0.0.1:7000,10.0.0.2:7000",
            "--log-level",
            "debug",
            "--dry-run",
        ]);

        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.workers.as_deref(),
            Some("10.0.0.1:7000,10.0.0.2:7000")
        );
        assert_eq!(config.log_level, "debug");
        assert!(config.dry_run);
    }

    #[test]
    fn test_cli_config_short_flags() {
        let config = CliConfig::parse_from(["rdd-engine", "-H", "192.168.1.1", "-p", "7000", "-n", "4"]);
        assert_eq!(config.host.to_string(), "192.168.1.1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.local_workers, 4);
    }

    #[tokio::test]
    async fn test_build_master_local_mode() {
        let config = CliConfig::parse_from(["rdd-engine", "-n", "3"]);
        let master = build_master(&config).await.unwrap();
        assert_eq!(master.worker_count(), 3);
    }
}
