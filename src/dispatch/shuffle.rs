/// repartition / coalesce处理器：两阶段 slice/join shuffle
///
/// 阶段一（slice）：每个源worker对自己的每个分区切出 P 份碎片，
/// 返回源主序的碎片表（空切片为None）。repartition按键函数路由，
/// coalesce按预检计数算出的连续区间指派表切片。
///
/// 转置：源主序 → 目的主序，滤掉None。主节点不检查碎片内容。
///
/// 阶段二（join）：目的分区按均衡轮转分给worker，每个接收worker
/// 拿到自己那段目的列的碎片，合并出新分区。返回列表按目的分区号
/// `[0, P)` 索引。
///
/// 两道屏障（slice、join）任一分支失败都立即中止处理器；已产出的
/// 碎片或目的分区留在worker上，本层不做补偿释放。

use super::Master;
use crate::error::{EngineError, Result};
use crate::funcs::{self, SerializedFunc};
use crate::partition::{group_by_worker, Partition};
use crate::placement;
use crate::protocol::{Piece, Request, WorkerRpc};
use futures::future;
use serde_json::Value;

pub(super) async fn repartition(
    master: &Master,
    sub_request: &Request,
    num_partitions: Option<usize>,
    partition_func: &SerializedFunc,
) -> Result<Vec<Partition>> {
    let inputs = master
        .process_request(sub_request)
        .await?
        .into_partitions()?;
    let dest_count = num_partitions.unwrap_or(master.worker_count());

    // 把用户的键函数嵌进路由切片器
    let slicer = funcs::key_slicer(dest_count, partition_func)?;
    let table = slice_phase(master, &inputs, dest_count, &slicer, None).await?;
    master.release_consumed(sub_request, &inputs).await?;

    let columns = transpose(table, dest_count);
    join_phase(master, columns).await
}

pub(super) async fn coalesce(
    master: &Master,
    sub_request: &Request,
    num_partitions: Option<usize>,
) -> Result<Vec<Partition>> {
    let inputs = master
        .process_request(sub_request)
        .await?
        .into_partitions()?;
    let dest_count = num_partitions.unwrap_or(master.worker_count());

    // 预检：逐分区计数，决定连续切片边界
    let counts = preflight_counts(master, &inputs).await?;
    let plan = build_plan(&counts, dest_count);
    let mut args = Vec::with_capacity(plan.len());
    for assignments in &plan {
        args.push(serde_json::to_value(assignments)?);
    }

    let slicer = funcs::range_slicer(dest_count)?;
    let table = slice_phase(master, &inputs, dest_count, &slicer, Some(&args)).await?;
    master.release_consumed(sub_request, &inputs).await?;

    let columns = transpose(table, dest_count);
    join_phase(master, columns).await
}

/// 阶段一：对每个源worker发REPARTITION_SLICE，按源分区原始顺序回填碎片表
///
/// `args` 与 `inputs` 平行（coalesce的指派表）；repartition传None，
/// RPC里带空列表。
async fn slice_phase(
    master: &Master,
    inputs: &[Partition],
    dest_count: usize,
    slicer: &SerializedFunc,
    args: Option<&[Value]>,
) -> Result<Vec<Vec<Option<Piece>>>> {
    let records = group_by_worker(inputs);

    let calls = records.iter().map(|record| {
        // 指派表按该worker的原始下标投影
        let rpc_args: Vec<Value> = match args {
            Some(all) => record
                .indices
                .iter()
                .map(|&index| all[index].clone())
                .collect(),
            None => Vec::new(),
        };
        let rpc = WorkerRpc::RepartitionSlice {
            ids: record.ids.clone(),
            num_partitions: dest_count,
            partition_func: slicer.clone(),
            args: rpc_args,
        };
        async move {
            let rows = master.call(&record.worker, rpc).await?.into_pieces()?;
            if rows.len() != record.ids.len() {
                return Err(EngineError::LengthMismatch {
                    expected: record.ids.len(),
                    got: rows.len(),
                });
            }
            for row in &rows {
                if row.len() != dest_count {
                    return Err(EngineError::LengthMismatch {
                        expected: dest_count,
                        got: row.len(),
                    });
                }
            }
            Ok::<_, EngineError>(rows)
        }
    });
    let per_record = future::try_join_all(calls).await?;

    let mut slots: Vec<Option<Vec<Option<Piece>>>> = Vec::with_capacity(inputs.len());
    slots.resize_with(inputs.len(), || None);
    for (record, rows) in records.iter().zip(per_record) {
        for (&index, row) in record.indices.iter().zip(rows) {
            slots[index] = Some(row);
        }
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EngineError::Planning("task records do not cover the input".to_string()))
}

/// 源主序碎片表 → 目的主序，滤掉空槽
fn transpose(table: Vec<Vec<Option<Piece>>>, dest_count: usize) -> Vec<Vec<Piece>> {
    let mut columns: Vec<Vec<Piece>> = (0..dest_count).map(|_| Vec::new()).collect();
    for row in table {
        for (dest, cell) in row.into_iter().enumerate() {
            if let Some(piece) = cell {
                columns[dest].push(piece);
            }
        }
    }
    columns
}

/// 阶段二：目的分区按均衡轮转放置，接收worker合并自己那段目的列
async fn join_phase(master: &Master, columns: Vec<Vec<Piece>>) -> Result<Vec<Partition>> {
    let dest_count = columns.len();
    let workers = master.workers();
    let shares = placement::shares(dest_count, workers.len());

    let mut calls = Vec::new();
    let mut offset = 0usize;
    for (worker, &share) in workers.iter().zip(&shares) {
        if share == 0 {
            continue;
        }
        let chunk: Vec<Vec<Piece>> = columns[offset..offset + share].to_vec();
        offset += share;

        let rpc = WorkerRpc::RepartitionJoin { pieces: chunk };
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

/// 预检：逐分区计数（内建长度归约），按原始顺序返回
async fn preflight_counts(master: &Master, inputs: &[Partition]) -> Result<Vec<usize>> {
    let records = group_by_worker(inputs);
    let count_func = funcs::count_reducer()?;

    let calls = records.iter().map(|record| {
        let rpc = WorkerRpc::Reduce {
            func: count_func.clone(),
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

    let mut slots: Vec<Option<usize>> = vec![None; inputs.len()];
    for (record, values) in records.iter().zip(per_record) {
        for (&index, value) in record.indices.iter().zip(values) {
            let count = value.as_u64().ok_or_else(|| {
                EngineError::Worker("count reducer returned a non-integer".to_string())
            })?;
            slots[index] = Some(count as usize);
        }
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EngineError::Planning("task records do not cover the input".to_string()))
}

/// 连续切片计划
///
/// 目的分区 d 的配额是 `each + (1 if d < rest)`，其中
/// `rest = T mod P`，`each = (T - rest) / P`，T为总项数。按原始顺序
/// 走一遍输入分区，维护 `(next_dest, need)`，把每个分区切成若干
/// `(dest, start, len)` 指派，全局序不变。
fn build_plan(counts: &[usize], dest_count: usize) -> Vec<Vec<(usize, usize, usize)>> {
    let total: usize = counts.iter().sum();
    let (each, rest) = if dest_count == 0 {
        (0, 0)
    } else {
        let rest = total % dest_count;
        ((total - rest) / dest_count, rest)
    };
    let quota = |dest: usize| each + usize::from(dest < rest);

    let mut next_dest = 0usize;
    let mut need = if dest_count == 0 { 0 } else { quota(0) };
    let mut plan = Vec::with_capacity(counts.len());

    for &count in counts {
        let mut assignments = Vec::new();
        let mut remaining = count;
        let mut cursor = 0usize;
        while remaining > 0 {
            // 跳过配额为零的目的分区
            while need == 0 && next_dest + 1 < dest_count {
                next_dest += 1;
                need = quota(next_dest);
            }
            let take = need.min(remaining);
            if take == 0 {
                break;
            }
            assignments.push((next_dest, cursor, take));
            need -= take;
            remaining -= take;
            cursor += take;
            if need == 0 && next_dest + 1 < dest_count {
                next_dest += 1;
                need = quota(next_dest);
            }
        }
        plan.push(assignments);
    }
    plan
}
