/// 分区句柄与按worker分组
///
/// `Partition` 是远端分区的不透明句柄：宿主worker + worker分配的id。
/// 从worker返回之时起存活，到对应的release被确认为止。任一时刻恰有
/// 一个分区列表持有某个存活句柄；处理器消费完子请求的分区后，就对
/// 释放它们负责（loadCache的输出除外，那归缓存所有）。

use crate::worker::WorkerChannel;
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::sync::Arc;

/// 远端分区的不透明句柄
pub struct Partition {
    /// 宿主worker的请求通道
    pub worker: Arc<dyn WorkerChannel>,
    /// worker内唯一的分区id
    pub id: String,
}

impl Partition {
    pub fn new(worker: Arc<dyn WorkerChannel>, id: String) -> Self {
        Self { worker, id }
    }
}

impl Clone for Partition {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            id: self.id.clone(),
        }
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("worker", &self.worker.worker_id())
            .field("id", &self.id)
            .finish()
    }
}

/// 一个worker上的一批分区，以及它们在输入列表里的原始下标
///
/// ids 与 indices 等长；所有记录的 indices 拼起来是 `[0, n)` 的一个
/// 排列。主节点据此对每个worker发一次批量RPC，再用 indices 把结果
/// 散射回原始位置。
pub struct TaskRecord {
    pub worker: Arc<dyn WorkerChannel>,
    pub ids: Vec<String>,
    pub indices: SmallVec<[usize; 8]>,
}

/// 按worker亲和性重排分区列表
///
/// 每个出现过的worker恰好一条记录，顺序取其在输入中首次出现的顺序；
/// 记录内保持输入顺序。
pub fn group_by_worker(partitions: &[Partition]) -> Vec<TaskRecord> {
    let mut records: Vec<TaskRecord> = Vec::new();
    for (index, partition) in partitions.iter().enumerate() {
        let worker_id = partition.worker.worker_id();
        match records
            .iter_mut()
            .find(|record| record.worker.worker_id() == worker_id)
        {
            Some(record) => {
                record.ids.push(partition.id.clone());
                record.indices.push(index);
            }
            None => records.push(TaskRecord {
                worker: partition.worker.clone(),
                ids: vec![partition.id.clone()],
                indices: smallvec![index],
            }),
        }
    }
    records
}
