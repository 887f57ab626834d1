/// worker请求通道
///
/// `WorkerChannel` 是主节点与单个worker之间的类型化请求通道：提交一个
/// 带标签的请求，等待匹配的回复。每次提交对应一个逻辑上挂起的请求，
/// 允许多个处理器并发提交。
///
/// `WorkerClient` 是网络实现：一个连接任务独占帧化的TCP流和
/// tag→oneshot 的挂起表，调用方经mpsc提交。测试与本地模式用
/// `LocalWorker`（见 `local` 模块）替换同一trait。

use crate::error::{EngineError, Result};
use crate::protocol::{ReplyFrame, RequestFrame, WorkerReply, WorkerRpc};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// 到一个worker的类型化请求通道
#[async_trait]
pub trait WorkerChannel: Send + Sync {
    /// 主节点worker列表中的稳定编号（分组与放置顺序用）
    fn worker_id(&self) -> usize;

    /// 提交请求并等待回复
    async fn process_request(&self, rpc: WorkerRpc) -> Result<WorkerReply>;
}

type Pending = oneshot::Sender<Result<WorkerReply>>;

/// 网络worker客户端
///
/// 句柄可廉价克隆；所有克隆共享同一条连接任务。
#[derive(Clone)]
pub struct WorkerClient {
    id: usize,
    tx: mpsc::UnboundedSender<(WorkerRpc, Pending)>,
}

impl WorkerClient {
    /// 连接到worker的监听地址
    pub async fn connect(id: usize, addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tracing::info!(worker = id, %addr, "已连接worker");
        Ok(Self::spawn(id, stream))
    }

    /// 在任意双向流上启动客户端（测试用内存流也可）
    pub fn spawn<S>(id: usize, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        tokio::spawn(connection_task(id, framed, rx));
        Self { id, tx }
    }
}

#[async_trait]
impl WorkerChannel for WorkerClient {
    fn worker_id(&self) -> usize {
        self.id
    }

    async fn process_request(&self, rpc: WorkerRpc) -> Result<WorkerReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((rpc, reply_tx))
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// 连接任务：独占流与挂起表，出站分配tag，入站按tag匹配回调用方
async fn connection_task<S>(
    worker_id: usize,
    mut framed: Framed<S, LengthDelimitedCodec>,
    mut rx: mpsc::UnboundedReceiver<(WorkerRpc, Pending)>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut next_tag: u64 = 1;
    let mut commands_open = true;

    loop {
        if !commands_open && pending.is_empty() {
            break;
        }

        tokio::select! {
            cmd = rx.recv(), if commands_open => {
                match cmd {
                    Some((rpc, reply_tx)) => {
                        let tag = next_tag;
                        next_tag += 1;
                        let frame = RequestFrame { tag, rpc };
                        match serde_json::to_vec(&frame) {
                            Ok(bytes) => {
                                if let Err(e) = framed.send(bytes.into()).await {
                                    let _ = reply_tx.send(Err(EngineError::Transport(e)));
                                    break;
                                }
                                pending.insert(tag, reply_tx);
                            }
                            Err(e) => {
                                let _ = reply_tx.send(Err(EngineError::Json(e)));
                            }
                        }
                    }
                    // 所有客户端句柄已析构；把剩余回复收完再退出
                    None => commands_open = false,
                }
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(bytes)) => match serde_json::from_slice::<ReplyFrame>(&bytes) {
                        Ok(reply) => {
                            match pending.remove(&reply.tag) {
                                Some(reply_tx) => {
                                    let result = reply.result.map_err(EngineError::Worker);
                                    let _ = reply_tx.send(result);
                                }
                                None => {
                                    tracing::warn!(worker = worker_id, tag = reply.tag, "收到未知标签的回复");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(worker = worker_id, error = %e, "worker回复帧无法解析，断开连接");
                            break;
                        }
                    },
                    Some(Err(e)) => {
                        tracing::warn!(worker = worker_id, error = %e, "worker连接读取失败");
                        break;
                    }
                    None => {
                        tracing::info!(worker = worker_id, "worker连接已关闭");
                        break;
                    }
                }
            }
        }
    }

    // 连接终止后，所有仍挂起的请求一律失败
    for (_, reply_tx) in pending.drain() {
        let _ = reply_tx.send(Err(EngineError::ChannelClosed));
    }
}
