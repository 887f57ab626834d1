/// 集成测试公共设施：测试函数注册、记录释放的worker包装、注入故障的
/// worker包装，以及搭建带记录的本地集群。

use async_trait::async_trait;
use parking_lot::Mutex;
use rdd_engine::error::{EngineError, Result};
use rdd_engine::funcs::{FuncRegistry, SerializedFunc, WorkerFunc};
use rdd_engine::local::{LocalWorker, PieceStore};
use rdd_engine::partition::Partition;
use rdd_engine::protocol::{Request, WorkerReply, WorkerRpc};
use rdd_engine::worker::WorkerChannel;
use rdd_engine::Master;
use serde_json::{json, Value};
use std::sync::Arc;

/// 注册端到端场景用的函数（覆盖式，可重复调用）
pub fn register_test_funcs() {
    let registry = FuncRegistry::global();

    // 参数是JSON列表，原样成为分区内容
    registry.register("test.from_list", |_env| {
        Ok(WorkerFunc::Creator(Box::new(|arg| {
            arg.as_array()
                .cloned()
                .ok_or_else(|| EngineError::Worker("expected a list argument".to_string()))
        })))
    });

    // 每项加一
    registry.register("test.add_one", |_env| {
        Ok(WorkerFunc::Map(Box::new(|data| {
            data.into_iter()
                .map(|item| {
                    item.as_i64()
                        .map(|n| json!(n + 1))
                        .ok_or_else(|| EngineError::Worker("expected integer items".to_string()))
                })
                .collect()
        })))
    });

    // 整数求和（既当worker端的partitionFunc，也当主节点的finalFunc）
    registry.register("test.sum", |_env| {
        Ok(WorkerFunc::Reduce(Box::new(|items| {
            let mut total = 0i64;
            for item in items {
                total += item
                    .as_i64()
                    .ok_or_else(|| EngineError::Worker("expected integer items".to_string()))?;
            }
            Ok(json!(total))
        })))
    });

    // 模N路由，模数在环境里
    registry.register("test.mod", |env| {
        let modulus: u64 = rdd_engine::funcs::decode_env(env)?;
        Ok(WorkerFunc::Partitioner(Box::new(move |item| {
            let n = item
                .as_u64()
                .ok_or_else(|| EngineError::Worker("expected integer items".to_string()))?;
            Ok((n % modulus) as usize)
        })))
    });
}

pub fn from_list_creator() -> SerializedFunc {
    SerializedFunc::capture("test.from_list", &()).unwrap()
}

pub fn add_one_func() -> SerializedFunc {
    SerializedFunc::capture("test.add_one", &()).unwrap()
}

pub fn sum_func() -> SerializedFunc {
    SerializedFunc::capture("test.sum", &()).unwrap()
}

pub fn mod_func(modulus: u64) -> SerializedFunc {
    SerializedFunc::capture("test.mod", &modulus).unwrap()
}

/// createRDD请求：每个chunk成为一个分区
pub fn create_request(chunks: &[Vec<i64>]) -> Request {
    Request::CreateRdd {
        num_partitions: Some(chunks.len()),
        creator: from_list_creator(),
        args: chunks.iter().map(|chunk| json!(chunk)).collect(),
        type_tag: "memory".to_string(),
    }
}

/// 场景数据：5个单项分区
pub fn scenario_chunks() -> Vec<Vec<i64>> {
    vec![vec![10], vec![20], vec![30], vec![40], vec![50]]
}

/// 记录RELEASE的worker包装
pub struct RecordingWorker {
    inner: Arc<LocalWorker>,
    released: Mutex<Vec<String>>,
}

impl RecordingWorker {
    pub fn released_ids(&self) -> Vec<String> {
        self.released.lock().clone()
    }

    pub fn released_count(&self) -> usize {
        self.released.lock().len()
    }
}

#[async_trait]
impl WorkerChannel for RecordingWorker {
    fn worker_id(&self) -> usize {
        self.inner.worker_id()
    }

    async fn process_request(&self, rpc: WorkerRpc) -> Result<WorkerReply> {
        if let WorkerRpc::Release { ids } = &rpc {
            self.released.lock().extend(ids.iter().cloned());
        }
        self.inner.process_request(rpc).await
    }
}

/// 在指定操作上注入失败的worker包装
pub struct FailingWorker {
    inner: Arc<LocalWorker>,
    fail_on: &'static str,
}

impl FailingWorker {
    pub fn new(inner: Arc<LocalWorker>, fail_on: &'static str) -> Self {
        Self { inner, fail_on }
    }
}

#[async_trait]
impl WorkerChannel for FailingWorker {
    fn worker_id(&self) -> usize {
        self.inner.worker_id()
    }

    async fn process_request(&self, rpc: WorkerRpc) -> Result<WorkerReply> {
        if rpc.name() == self.fail_on {
            return Err(EngineError::Worker("injected failure".to_string()));
        }
        self.inner.process_request(rpc).await
    }
}

/// 带记录包装的本地集群
pub struct RecordingCluster {
    pub master: Master,
    pub workers: Vec<Arc<LocalWorker>>,
    pub recorders: Vec<Arc<RecordingWorker>>,
    pub pieces: Arc<PieceStore>,
}

impl RecordingCluster {
    pub fn new(worker_count: usize) -> Self {
        register_test_funcs();

        let pieces = Arc::new(PieceStore::default());
        let workers: Vec<Arc<LocalWorker>> = (0..worker_count)
            .map(|id| Arc::new(LocalWorker::new(id, pieces.clone())))
            .collect();
        let recorders: Vec<Arc<RecordingWorker>> = workers
            .iter()
            .map(|worker| {
                Arc::new(RecordingWorker {
                    inner: worker.clone(),
                    released: Mutex::new(Vec::new()),
                })
            })
            .collect();
        let channels = recorders
            .iter()
            .map(|recorder| recorder.clone() as Arc<dyn WorkerChannel>)
            .collect();

        Self {
            master: Master::new(channels),
            workers,
            recorders,
            pieces,
        }
    }

    /// 全集群释放总数
    pub fn total_released(&self) -> usize {
        self.recorders
            .iter()
            .map(|recorder| recorder.released_count())
            .sum()
    }

    /// 全集群存活分区总数
    pub fn total_live(&self) -> usize {
        self.workers
            .iter()
            .map(|worker| worker.partition_count())
            .sum()
    }

    /// 读取一个分区的整数内容
    pub fn items_of(&self, partition: &Partition) -> Vec<i64> {
        let data = self.workers[partition.worker.worker_id()]
            .partition_data(&partition.id)
            .expect("partition should be live");
        data.iter()
            .map(|item| item.as_i64().expect("integer item"))
            .collect()
    }

    /// 按分区列表顺序拼接全部内容
    pub fn concat_items(&self, partitions: &[Partition]) -> Vec<i64> {
        partitions
            .iter()
            .flat_map(|partition| self.items_of(partition))
            .collect()
    }
}

/// 场景数据的原始值（排序后比较多重集用）
pub fn sorted(mut items: Vec<i64>) -> Vec<i64> {
    items.sort_unstable();
    items
}

#[allow(dead_code)]
pub fn value_items(data: &[Value]) -> Vec<i64> {
    data.iter().filter_map(|item| item.as_i64()).collect()
}
