/// 本地执行模式
///
/// `LocalWorker` 在主节点进程内实现worker通道：分区是内存里的
/// `Vec<Value>`，函数经共享的 `FuncRegistry` 重建。shuffle切片阶段把
/// 每份碎片寄存到进程级的 `PieceStore`（本地模式的"文件"），返回
/// `Piece::File` 键；join阶段按键取走。
///
/// 既是产品形态（单机模式），也是集成测试的基座。

use crate::dispatch::Master;
use crate::error::{EngineError, Result};
use crate::funcs::FuncRegistry;
use crate::protocol::{Piece, WorkerReply, WorkerRpc};
use crate::worker::WorkerChannel;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 进程级碎片存放处
///
/// 本地模式里扮演文件系统：切片阶段写入，join阶段取走（取走即删）。
#[derive(Default)]
pub struct PieceStore {
    inner: Mutex<HashMap<String, Vec<Value>>>,
}

impl PieceStore {
    fn put(&self, payload: Vec<Value>) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let key = format!("piece-{}", suffix);
        self.inner.lock().insert(key.clone(), payload);
        key
    }

    fn take(&self, key: &str) -> Result<Vec<Value>> {
        self.inner
            .lock()
            .remove(key)
            .ok_or_else(|| EngineError::Worker(format!("missing piece file '{}'", key)))
    }

    /// 尚未被join取走的碎片数
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 进程内worker
pub struct LocalWorker {
    id: usize,
    partitions: Mutex<HashMap<String, Vec<Value>>>,
    pieces: Arc<PieceStore>,
    next_partition: AtomicU64,
}

impl LocalWorker {
    pub fn new(id: usize, pieces: Arc<PieceStore>) -> Self {
        Self {
            id,
            partitions: Mutex::new(HashMap::new()),
            pieces,
            next_partition: AtomicU64::new(1),
        }
    }

    fn fresh_id(&self) -> String {
        let seq = self.next_partition.fetch_add(1, Ordering::Relaxed);
        format!("w{}-p{}", self.id, seq)
    }

    fn store(&self, data: Vec<Value>) -> String {
        let id = self.fresh_id();
        self.partitions.lock().insert(id.clone(), data);
        id
    }

    fn data_of(&self, id: &str) -> Result<Vec<Value>> {
        self.partitions.lock().get(id).cloned().ok_or_else(|| {
            EngineError::Worker(format!("unknown partition '{}' on worker {}", id, self.id))
        })
    }

    /// 当前存活的分区数
    pub fn partition_count(&self) -> usize {
        self.partitions.lock().len()
    }

    /// 读取一个分区的内容（检查用）
    pub fn partition_data(&self, id: &str) -> Option<Vec<Value>> {
        self.partitions.lock().get(id).cloned()
    }

    fn execute(&self, rpc: WorkerRpc) -> Result<WorkerReply> {
        let registry = FuncRegistry::global();
        match rpc {
            WorkerRpc::CreatePartition {
                creator,
                count,
                args,
                ..
            } => {
                if args.len() != count {
                    return Err(EngineError::Worker(format!(
                        "create expects {} args, got {}",
                        count,
                        args.len()
                    )));
                }
                let create = registry.materialize(&creator)?.into_creator(&creator.name)?;
                let mut ids = Vec::with_capacity(count);
                for arg in &args {
                    ids.push(self.store(create(arg)?));
                }
                Ok(WorkerReply::Ids(ids))
            }

            WorkerRpc::Map { func, ids } => {
                let map = registry.materialize(&func)?.into_map(&func.name)?;
                let mut out = Vec::with_capacity(ids.len());
                for id in &ids {
                    let data = self.data_of(id)?;
                    out.push(self.store(map(data)?));
                }
                Ok(WorkerReply::Ids(out))
            }

            WorkerRpc::Reduce { func, ids } => {
                let reduce = registry.materialize(&func)?.into_reduce(&func.name)?;
                let mut out = Vec::with_capacity(ids.len());
                for id in &ids {
                    let data = self.data_of(id)?;
                    out.push(reduce(&data)?);
                }
                Ok(WorkerReply::Values(out))
            }

            WorkerRpc::RepartitionSlice {
                ids,
                num_partitions,
                partition_func,
                args,
            } => {
                let slicer = registry
                    .materialize(&partition_func)?
                    .into_slicer(&partition_func.name)?;
                let mut rows = Vec::with_capacity(ids.len());
                for (index, id) in ids.iter().enumerate() {
                    let data = self.data_of(id)?;
                    let arg = args.get(index).cloned().unwrap_or(Value::Null);
                    let slices = slicer(data, &arg)?;
                    if slices.len() != num_partitions {
                        return Err(EngineError::Worker(format!(
                            "slicer produced {} slots, expected {}",
                            slices.len(),
                            num_partitions
                        )));
                    }
                    let row: Vec<Option<Piece>> = slices
                        .into_iter()
                        .map(|slot| slot.map(|payload| Piece::File(self.pieces.put(payload))))
                        .collect();
                    rows.push(row);
                }
                Ok(WorkerReply::Pieces(rows))
            }

            WorkerRpc::RepartitionJoin { pieces } => {
                let mut ids = Vec::with_capacity(pieces.len());
                for column in pieces {
                    let mut data = Vec::new();
                    for piece in column {
                        match piece {
                            Piece::File(key) => data.extend(self.pieces.take(&key)?),
                            Piece::Remote { rdd_id, .. } => {
                                return Err(EngineError::Worker(format!(
                                    "local worker cannot fetch remote piece '{}'",
                                    rdd_id
                                )));
                            }
                        }
                    }
                    ids.push(self.store(data));
                }
                Ok(WorkerReply::Ids(ids))
            }

            WorkerRpc::Release { ids } => {
                let mut partitions = self.partitions.lock();
                for id in &ids {
                    if partitions.remove(id).is_none() {
                        return Err(EngineError::Worker(format!(
                            "release of unknown partition '{}'",
                            id
                        )));
                    }
                }
                Ok(WorkerReply::Released)
            }
        }
    }
}

#[async_trait]
impl WorkerChannel for LocalWorker {
    fn worker_id(&self) -> usize {
        self.id
    }

    async fn process_request(&self, rpc: WorkerRpc) -> Result<WorkerReply> {
        self.execute(rpc)
    }
}

/// 本地集群：一个主节点 + N个进程内worker，共享一个碎片存放处
pub struct LocalCluster {
    master: Master,
    workers: Vec<Arc<LocalWorker>>,
    pieces: Arc<PieceStore>,
}

impl LocalCluster {
    pub fn new(worker_count: usize) -> Self {
        let pieces = Arc::new(PieceStore::default());
        let workers: Vec<Arc<LocalWorker>> = (0..worker_count)
            .map(|id| Arc::new(LocalWorker::new(id, pieces.clone())))
            .collect();
        let channels = workers
            .iter()
            .map(|worker| worker.clone() as Arc<dyn WorkerChannel>)
            .collect();
        Self {
            master: Master::new(channels),
            workers,
            pieces,
        }
    }

    pub fn master(&self) -> &Master {
        &self.master
    }

    pub fn into_master(self) -> Master {
        self.master
    }

    pub fn workers(&self) -> &[Arc<LocalWorker>] {
        &self.workers
    }

    pub fn pieces(&self) -> &Arc<PieceStore> {
        &self.pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::{SerializedFunc, WorkerFunc};
    use serde_json::json;

    fn worker() -> LocalWorker {
        LocalWorker::new(0, Arc::new(PieceStore::default()))
    }

    fn list_creator() -> SerializedFunc {
        FuncRegistry::global().register("local_test.from_list", |_env| {
            Ok(WorkerFunc::Creator(Box::new(|arg| {
                arg.as_array()
                    .cloned()
                    .ok_or_else(|| EngineError::Worker("expected a list argument".to_string()))
            })))
        });
        SerializedFunc::capture("local_test.from_list", &()).unwrap()
    }

    #[test]
    fn test_create_and_release() {
        let w = worker();
        let reply = w
            .execute(WorkerRpc::CreatePartition {
                type_tag: "memory".to_string(),
                creator: list_creator(),
                count: 2,
                args: vec![json!([1, 2]), json!([3])],
            })
            .unwrap();
        let ids = reply.into_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(w.partition_count(), 2);
        assert_eq!(w.partition_data(&ids[0]).unwrap(), vec![json!(1), json!(2)]);

        w.execute(WorkerRpc::Release { ids: ids.clone() })
            .unwrap()
            .into_ack()
            .unwrap();
        assert_eq!(w.partition_count(), 0);

        // 重复释放必须报错
        let err = w.execute(WorkerRpc::Release { ids }).unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }

    #[test]
    fn test_create_arg_count_mismatch() {
        let w = worker();
        let err = w
            .execute(WorkerRpc::CreatePartition {
                type_tag: "memory".to_string(),
                creator: list_creator(),
                count: 3,
                args: vec![json!([1])],
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }

    #[test]
    fn test_slice_and_join_through_piece_store() {
        let pieces = Arc::new(PieceStore::default());
        let w = LocalWorker::new(0, pieces.clone());

        let id = w.store(vec![json!(1), json!(2), json!(3)]);
        let rows = w
            .execute(WorkerRpc::RepartitionSlice {
                ids: vec![id],
                num_partitions: 2,
                partition_func: crate::funcs::range_slicer(2).unwrap(),
                args: vec![json!([[0, 0, 2], [1, 2, 1]])],
            })
            .unwrap()
            .into_pieces()
            .unwrap();
        assert_eq!(pieces.len(), 2);

        let column: Vec<Piece> = rows[0].iter().flatten().cloned().collect();
        let ids = w
            .execute(WorkerRpc::RepartitionJoin {
                pieces: vec![column],
            })
            .unwrap()
            .into_ids()
            .unwrap();

        // 碎片被取走，数据拼接完整
        assert!(pieces.is_empty());
        assert_eq!(
            w.partition_data(&ids[0]).unwrap(),
            vec![json!(1), json!(2), json!(3)]
        );
    }

    #[test]
    fn test_unknown_partition() {
        let w = worker();
        let err = w
            .execute(WorkerRpc::Reduce {
                func: crate::funcs::count_reducer().unwrap(),
                ids: vec!["nope".to_string()],
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }
}
