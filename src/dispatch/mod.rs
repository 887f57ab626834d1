/// 请求调度器
///
/// `Master` 持有worker通道列表和分区缓存，`process_request` 把请求树
/// 递归解析成分区列表（reduce解析成单值）。枚举match就是kind→处理器
/// 的那张表。解析不做缓存：同一请求解析两次就执行两次流水线。
///
/// 释放策略（所有非叶子处理器一致）：本级RPC的回复全部收到之后，
/// 对消费掉的输入分区按worker分组发RELEASE，等释放屏障完成再返回。
/// 子请求是loadCache时完全不释放——句柄归缓存所有。

mod create;
mod map_reduce;
mod shuffle;

use crate::error::{EngineError, Result};
use crate::metrics::METRICS;
use crate::partition::{group_by_worker, Partition};
use crate::protocol::{Request, WorkerReply, WorkerRpc};
use crate::worker::WorkerChannel;
use futures::future::{self, BoxFuture};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 一次解析的产物：分区列表，或reduce的最终值
#[derive(Debug)]
pub enum Resolved {
    Partitions(Vec<Partition>),
    Value(Value),
}

impl Resolved {
    pub fn into_partitions(self) -> Result<Vec<Partition>> {
        match self {
            Resolved::Partitions(partitions) => Ok(partitions),
            Resolved::Value(_) => Err(EngineError::Planning(
                "expected a partition list, got a reduced value".to_string(),
            )),
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Resolved::Value(value) => Ok(value),
            Resolved::Partitions(_) => Err(EngineError::Planning(
                "expected a reduced value, got a partition list".to_string(),
            )),
        }
    }
}

/// 主节点上下文
///
/// worker列表在构造后不再变动；缓存表持有归属缓存的分区句柄。
pub struct Master {
    workers: Vec<Arc<dyn WorkerChannel>>,
    cache: RwLock<HashMap<String, Vec<Partition>>>,
}

impl Master {
    pub fn new(workers: Vec<Arc<dyn WorkerChannel>>) -> Self {
        Self {
            workers,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn workers(&self) -> &[Arc<dyn WorkerChannel>] {
        &self.workers
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 递归解析一棵请求树
    pub fn process_request<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Resolved>> {
        Box::pin(async move {
            METRICS
                .requests_total
                .with_label_values(&[request.kind()])
                .inc();
            tracing::debug!(kind = request.kind(), "解析请求");

            match request {
                Request::CreateRdd {
                    num_partitions,
                    creator,
                    args,
                    type_tag,
                } => create::create_rdd(self, *num_partitions, creator, args, type_tag)
                    .await
                    .map(Resolved::Partitions),

                Request::Map { sub_request, func } => map_reduce::map(self, sub_request, func)
                    .await
                    .map(Resolved::Partitions),

                Request::Reduce {
                    sub_request,
                    partition_func,
                    final_func,
                } => map_reduce::reduce(self, sub_request, partition_func, final_func)
                    .await
                    .map(Resolved::Value),

                Request::Repartition {
                    sub_request,
                    num_partitions,
                    partition_func,
                } => shuffle::repartition(self, sub_request, *num_partitions, partition_func)
                    .await
                    .map(Resolved::Partitions),

                Request::Coalesce {
                    sub_request,
                    num_partitions,
                } => shuffle::coalesce(self, sub_request, *num_partitions)
                    .await
                    .map(Resolved::Partitions),

                Request::LoadCache { name } => self.load_cache(name).map(Resolved::Partitions),
            }
        })
    }

    /// 取缓存持有的分区句柄（克隆；调用方不得释放）
    fn load_cache(&self, name: &str) -> Result<Vec<Partition>> {
        self.cache
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Planning(format!("unknown cache entry '{}'", name)))
    }

    /// 把一组分区移交给缓存；返回被顶替的旧条目（调用方决定是否释放）
    pub fn store_cache(&self, name: &str, partitions: Vec<Partition>) -> Option<Vec<Partition>> {
        tracing::info!(name, count = partitions.len(), "缓存分区");
        self.cache.write().insert(name.to_string(), partitions)
    }

    /// 发一个RPC并计数
    pub(crate) async fn call(
        &self,
        worker: &Arc<dyn WorkerChannel>,
        rpc: WorkerRpc,
    ) -> Result<WorkerReply> {
        METRICS
            .worker_rpcs_total
            .with_label_values(&[rpc.name()])
            .inc();
        worker.process_request(rpc).await
    }

    /// 标准释放策略：子请求输出归缓存所有时跳过，否则全部释放
    pub(crate) async fn release_consumed(
        &self,
        sub_request: &Request,
        partitions: &[Partition],
    ) -> Result<()> {
        if sub_request.is_cache_owned() {
            tracing::debug!("子请求输出归缓存所有，跳过释放");
            return Ok(());
        }
        self.release(partitions).await
    }

    /// 按worker分组释放一批分区，等待全部确认
    pub async fn release(&self, partitions: &[Partition]) -> Result<()> {
        if partitions.is_empty() {
            return Ok(());
        }
        let records = group_by_worker(partitions);
        let calls = records.iter().map(|record| async move {
            self.call(
                &record.worker,
                WorkerRpc::Release {
                    ids: record.ids.clone(),
                },
            )
            .await?
            .into_ack()
        });
        future::try_join_all(calls).await?;

        METRICS
            .partitions_released_total
            .inc_by(partitions.len() as u64);
        METRICS.live_partitions.sub(partitions.len() as i64);
        Ok(())
    }

    pub(crate) fn note_created(&self, count: usize) {
        METRICS.partitions_created_total.inc_by(count as u64);
        METRICS.live_partitions.add(count as i64);
    }
}
