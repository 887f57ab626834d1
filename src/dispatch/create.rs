/// createRDD处理器
///
/// 物化 N 个初始分区：按均衡轮转算出每个worker的份额，并行发
/// CREATE_PARTITION，把返回的id按worker编号顺序拼接。结果列表的顺序
/// 与 args 的顺序一致。

use super::Master;
use crate::error::{EngineError, Result};
use crate::funcs::SerializedFunc;
use crate::partition::Partition;
use crate::placement;
use crate::protocol::WorkerRpc;
use futures::future;
use serde_json::Value;

pub(super) async fn create_rdd(
    master: &Master,
    num_partitions: Option<usize>,
    creator: &SerializedFunc,
    args: &[Value],
    type_tag: &str,
) -> Result<Vec<Partition>> {
    let workers = master.workers();
    let total = num_partitions.unwrap_or(workers.len());
    let shares = placement::shares(total, workers.len());
    tracing::debug!(
        partitions = total,
        workers = workers.len(),
        "createRDD放置"
    );

    let mut calls = Vec::new();
    let mut offset = 0usize;
    for (worker, &share) in workers.iter().zip(&shares) {
        if share == 0 {
            continue;
        }
        // 主节点不校验args长度；短缺由worker端报错经RPC暴露
        let slice: Vec<Value> = args.iter().skip(offset).take(share).cloned().collect();
        offset += share;

        let rpc = WorkerRpc::CreatePartition {
            type_tag: type_tag.to_string(),
            creator: creator.clone(),
            count: share,
            args: slice,
        };
        calls.push(async move {
            let ids = master.call(worker, rpc).await?.into_ids()?;
            if ids.len() != share {
                return Err(EngineError::LengthMismatch {
                    expected: share,
                    got: ids.len(),
                });
            }
            Ok::<_, EngineError>(
                ids.into_iter()
                    .map(|id| Partition::new(worker.clone(), id))
                    .collect::<Vec<_>>(),
            )
        });
    }

    let per_worker = future::try_join_all(calls).await?;
    let partitions: Vec<Partition> = per_worker.into_iter().flatten().collect();
    master.note_created(partitions.len());
    Ok(partitions)
}
