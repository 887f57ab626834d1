/// 主节点对客户端的网络前端
///
/// 客户端经长度前缀帧发JSON命令：解析一棵请求树，或解析后把产物
/// 移交给命名缓存。每条连接独立处理，一问一答。

use crate::dispatch::{Master, Resolved};
use crate::protocol::Request;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// 客户端命令
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum ClientCommand {
    /// 解析请求树，返回分区句柄或归约值
    Resolve { request: Request },
    /// 解析请求树并把产物移交给命名缓存（供后续loadCache引用）
    Cache { name: String, request: Request },
}

/// 分区句柄的对外形式
#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionRef {
    pub worker: usize,
    pub id: String,
}

/// 客户端回复
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ClientReply {
    Partitions { partitions: Vec<PartitionRef> },
    Value { value: serde_json::Value },
    Cached { name: String, count: usize },
    Error { message: String },
}

/// 启动网络服务
pub async fn run_server(addr: SocketAddr, master: Arc<Master>) -> crate::error::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "主节点开始监听");

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "接受新连接");
        let master = master.clone();
        tokio::spawn(async move {
            handle_connection(stream, master).await;
        });
    }
}

/// 处理单个客户端连接
async fn handle_connection(stream: TcpStream, master: Arc<Master>) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(result) = framed.next().await {
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "连接读取失败");
                break;
            }
        };

        let reply = match serde_json::from_slice::<ClientCommand>(&bytes) {
            Ok(command) => execute_command(&master, command).await,
            Err(e) => ClientReply::Error {
                message: format!("无法解析的请求: {}", e),
            },
        };

        let encoded = match serde_json::to_vec(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "回复编码失败");
                break;
            }
        };
        if framed.send(encoded.into()).await.is_err() {
            tracing::warn!("发送回复失败");
            break;
        }
    }
    tracing::info!("连接已关闭");
}

async fn execute_command(master: &Master, command: ClientCommand) -> ClientReply {
    match command {
        ClientCommand::Resolve { request } => match master.process_request(&request).await {
            Ok(Resolved::Partitions(partitions)) => ClientReply::Partitions {
                partitions: partitions
                    .iter()
                    .map(|partition| PartitionRef {
                        worker: partition.worker.worker_id(),
                        id: partition.id.clone(),
                    })
                    .collect(),
            },
            Ok(Resolved::Value(value)) => ClientReply::Value { value },
            Err(e) => ClientReply::Error {
                message: e.to_string(),
            },
        },

        ClientCommand::Cache { name, request } => match master.process_request(&request).await {
            Ok(Resolved::Partitions(partitions)) => {
                let count = partitions.len();
                // 顶替下来的旧条目就地释放
                if let Some(displaced) = master.store_cache(&name, partitions) {
                    if let Err(e) = master.release(&displaced).await {
                        return ClientReply::Error {
                            message: e.to_string(),
                        };
                    }
                }
                ClientReply::Cached { name, count }
            }
            Ok(Resolved::Value(_)) => ClientReply::Error {
                message: "a reduced value cannot be cached".to_string(),
            },
            Err(e) => ClientReply::Error {
                message: e.to_string(),
            },
        },
    }
}
