/// map / reduce处理器
///
/// 单级逐分区变换。两者共享同一骨架：解析子请求、按worker分组、
/// 并行发RPC、用原始下标把结果散射回原位、按标准策略释放输入。
/// 区别在于worker的回复：map返回新分区id（与输入同宿主），reduce
/// 返回每个分区的归约值，主节点随后本地重建finalFunc做跨分区归约。

use super::Master;
use crate::error::{EngineError, Result};
use crate::funcs::{FuncRegistry, SerializedFunc};
use crate::partition::{group_by_worker, Partition};
use crate::protocol::{Request, WorkerRpc};
use futures::future;
use serde_json::Value;

pub(super) async fn map(
    master: &Master,
    sub_request: &Request,
    func: &SerializedFunc,
) -> Result<Vec<Partition>> {
    let inputs = master
        .process_request(sub_request)
        .await?
        .into_partitions()?;
    let records = group_by_worker(&inputs);

    let calls = records.iter().map(|record| {
        let rpc = WorkerRpc::Map {
            func: func.clone(),
            ids: record.ids.clone(),
        };
        async move {
            let ids = master.call(&record.worker, rpc).await?.into_ids()?;
            if ids.len() != record.ids.len() {
                return Err(EngineError::LengthMismatch {
                    expected: record.ids.len(),
                    got: ids.len(),
                });
            }
            Ok::<_, EngineError>(ids)
        }
    });
    let per_record = future::try_join_all(calls).await?;

    // 散射回原始顺序；映射产物与其输入同宿主
    let mut slots: Vec<Option<Partition>> = Vec::with_capacity(inputs.len());
    slots.resize_with(inputs.len(), || None);
    for (record, ids) in records.iter().zip(per_record) {
        for (&index, id) in record.indices.iter().zip(ids) {
            slots[index] = Some(Partition::new(inputs[index].worker.clone(), id));
        }
    }
    let outputs: Vec<Partition> = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EngineError::Planning("task records do not cover the input".to_string()))?;

    master.note_created(outputs.len());
    master.release_consumed(sub_request, &inputs).await?;
    Ok(outputs)
}

pub(super) async fn reduce(
    master: &Master,
    sub_request: &Request,
    partition_func: &SerializedFunc,
    final_func: &SerializedFunc,
) -> Result<Value> {
    let inputs = master
        .process_request(sub_request)
        .await?
        .into_partitions()?;
    let records = group_by_worker(&inputs);

    let calls = records.iter().map(|record| {
        let rpc = WorkerRpc::Reduce {
            func: partition_func.clone(),
            ids: record.ids.clone(),
        };
        async move {
            let values = master.call(&record.worker, rpc).await?.into_values()?;
            if values.len() != record.ids.len() {
                return Err(EngineError::LengthMismatch {
                    expected: record.ids.len(),
                    got: values.len(),
                });
            }
            Ok::<_, EngineError>(values)
        }
    });
    let per_record = future::try_join_all(calls).await?;

    let mut slots: Vec<Option<Value>> = Vec::with_capacity(inputs.len());
    slots.resize_with(inputs.len(), || None);
    for (record, values) in records.iter().zip(per_record) {
        for (&index, value) in record.indices.iter().zip(values) {
            slots[index] = Some(value);
        }
    }
    let values: Vec<Value> = slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EngineError::Planning("task records do not cover the input".to_string()))?;

    master.release_consumed(sub_request, &inputs).await?;

    // finalFunc是唯一在主节点本地重建的函数
    let final_fn = FuncRegistry::global().materialize_reduce(final_func)?;
    final_fn(&values)
}
