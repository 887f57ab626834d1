/// Function shipment
///
/// 用户闭包无法跨进程直接传送。装运形式是 `SerializedFunc`：注册表
/// 函数名 + bincode编码的自由变量环境。worker端（以及主节点本地，
/// 仅限reduce的finalFunc）通过 `FuncRegistry` 把它重建成可调用对象。
///
/// 主节点把 `SerializedFunc` 当不透明字节对待；组合切片闭包时只是把
/// 内层函数嵌进外层函数的环境里。

use crate::error::{EngineError, Result};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 可装运函数：注册表名字 + 捕获的环境
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedFunc {
    pub name: String,
    pub env: Vec<u8>,
}

impl SerializedFunc {
    /// 捕获环境，生成装运形式
    pub fn capture<E: Serialize>(name: &str, env: &E) -> Result<Self> {
        let env = bincode::serde::encode_to_vec(env, bincode::config::standard())?;
        Ok(Self {
            name: name.to_string(),
            env,
        })
    }
}

/// 解码捕获的环境
pub fn decode_env<E: DeserializeOwned>(env: &[u8]) -> Result<E> {
    let (decoded, _) = bincode::serde::decode_from_slice(env, bincode::config::standard())?;
    Ok(decoded)
}

pub type CreatorFn = Box<dyn Fn(&Value) -> Result<Vec<Value>> + Send + Sync>;
pub type MapFn = Box<dyn Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync>;
pub type ReduceFn = Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;
pub type PartitionerFn = Box<dyn Fn(&Value) -> Result<usize> + Send + Sync>;
pub type SlicerFn = Box<dyn Fn(Vec<Value>, &Value) -> Result<Vec<Option<Vec<Value>>>> + Send + Sync>;

/// 重建后的可调用对象，按用途分类
pub enum WorkerFunc {
    /// 一个参数 → 一个分区的数据
    Creator(CreatorFn),
    /// 整分区 → 整分区
    Map(MapFn),
    /// 整分区 → 单值
    Reduce(ReduceFn),
    /// 单项 → 目的分区号
    Partitioner(PartitionerFn),
    /// (整分区, 指派参数) → 每个目的分区一个子切片（空为None）
    Slicer(SlicerFn),
}

impl std::fmt::Debug for WorkerFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            WorkerFunc::Creator(_) => "Creator",
            WorkerFunc::Map(_) => "Map",
            WorkerFunc::Reduce(_) => "Reduce",
            WorkerFunc::Partitioner(_) => "Partitioner",
            WorkerFunc::Slicer(_) => "Slicer",
        };
        f.debug_tuple(variant).field(&"<fn>").finish()
    }
}

impl WorkerFunc {
    pub fn into_creator(self, name: &str) -> Result<CreatorFn> {
        match self {
            WorkerFunc::Creator(f) => Ok(f),
            _ => Err(EngineError::Planning(format!(
                "function '{}' is not a creator",
                name
            ))),
        }
    }

    pub fn into_map(self, name: &str) -> Result<MapFn> {
        match self {
            WorkerFunc::Map(f) => Ok(f),
            _ => Err(EngineError::Planning(format!(
                "function '{}' is not a map function",
                name
            ))),
        }
    }

    pub fn into_reduce(self, name: &str) -> Result<ReduceFn> {
        match self {
            WorkerFunc::Reduce(f) => Ok(f),
            _ => Err(EngineError::Planning(format!(
                "function '{}' is not a reducer",
                name
            ))),
        }
    }

    pub fn into_partitioner(self, name: &str) -> Result<PartitionerFn> {
        match self {
            WorkerFunc::Partitioner(f) => Ok(f),
            _ => Err(EngineError::Planning(format!(
                "function '{}' is not a partitioner",
                name
            ))),
        }
    }

    pub fn into_slicer(self, name: &str) -> Result<SlicerFn> {
        match self {
            WorkerFunc::Slicer(f) => Ok(f),
            _ => Err(EngineError::Planning(format!(
                "function '{}' is not a slicer",
                name
            ))),
        }
    }
}

type Factory = Arc<dyn Fn(&[u8]) -> Result<WorkerFunc> + Send + Sync>;

/// 函数注册表
///
/// 进程级单例（参见 `global()`）。主节点和本地worker共享同一张表；
/// 网络模式下worker进程持有自己的同构注册表。
pub struct FuncRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

lazy_static! {
    static ref GLOBAL_REGISTRY: FuncRegistry = {
        let registry = FuncRegistry::new();
        register_builtins(&registry);
        registry
    };
}

impl FuncRegistry {
    fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// 全局注册表（内建函数已注册）
    pub fn global() -> &'static FuncRegistry {
        &GLOBAL_REGISTRY
    }

    /// 注册一个函数工厂；同名覆盖
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&[u8]) -> Result<WorkerFunc> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(name.to_string(), Arc::new(factory));
    }

    /// 从装运形式重建可调用对象
    pub fn materialize(&self, func: &SerializedFunc) -> Result<WorkerFunc> {
        // 先克隆出工厂再调用：工厂本身可能递归查表（嵌套函数）
        let factory = self.factories.read().get(&func.name).cloned();
        let factory = factory.ok_or_else(|| {
            EngineError::Planning(format!("unknown function '{}'", func.name))
        })?;
        factory(&func.env)
    }

    /// 重建归约函数（主节点本地只用得到这一种）
    pub fn materialize_reduce(&self, func: &SerializedFunc) -> Result<ReduceFn> {
        self.materialize(func)?.into_reduce(&func.name)
    }
}

// ===================================================================
// 内建函数 (Builtins)
// ===================================================================

const COUNT: &str = "builtin.count";
const KEY_SLICER: &str = "builtin.key_slicer";
const RANGE_SLICER: &str = "builtin.range_slicer";

/// coalesce预检：分区长度归约（`arr → arr.length`）
pub fn count_reducer() -> Result<SerializedFunc> {
    SerializedFunc::capture(COUNT, &())
}

#[derive(Serialize, Deserialize)]
struct KeySlicerEnv {
    num_partitions: usize,
    partition_func: SerializedFunc,
}

/// repartition阶段一：按键函数路由每一项
///
/// 用户的partitionFunc嵌在切片器环境里，在worker端重建。
pub fn key_slicer(num_partitions: usize, partition_func: &SerializedFunc) -> Result<SerializedFunc> {
    SerializedFunc::capture(
        KEY_SLICER,
        &KeySlicerEnv {
            num_partitions,
            partition_func: partition_func.clone(),
        },
    )
}

/// coalesce阶段一：按每分区的 `[dest, start, len]` 指派表连续切片
pub fn range_slicer(num_partitions: usize) -> Result<SerializedFunc> {
    SerializedFunc::capture(RANGE_SLICER, &num_partitions)
}

fn register_builtins(registry: &FuncRegistry) {
    registry.register(COUNT, |_env| {
        Ok(WorkerFunc::Reduce(Box::new(|items| {
            Ok(Value::from(items.len() as u64))
        })))
    });

    registry.register(KEY_SLICER, |env| {
        let env: KeySlicerEnv = decode_env(env)?;
        let partitioner = FuncRegistry::global()
            .materialize(&env.partition_func)?
            .into_partitioner(&env.partition_func.name)?;
        let num_partitions = env.num_partitions;

        Ok(WorkerFunc::Slicer(Box::new(move |data, _arg| {
            let mut buckets: Vec<Vec<Value>> = (0..num_partitions).map(|_| Vec::new()).collect();
            for item in data {
                let dest = partitioner(&item)?;
                if dest >= num_partitions {
                    return Err(EngineError::Worker(format!(
                        "partition function routed an item to {} but only {} partitions exist",
                        dest, num_partitions
                    )));
                }
                buckets[dest].push(item);
            }
            Ok(buckets
                .into_iter()
                .map(|b| if b.is_empty() { None } else { Some(b) })
                .collect())
        })))
    });

    registry.register(RANGE_SLICER, |env| {
        let num_partitions: usize = decode_env(env)?;

        Ok(WorkerFunc::Slicer(Box::new(move |data, arg| {
            let mut out: Vec<Option<Vec<Value>>> = vec![None; num_partitions];
            if arg.is_null() {
                return Ok(out);
            }
            let assignments: Vec<(usize, usize, usize)> = serde_json::from_value(arg.clone())?;
            for (dest, start, len) in assignments {
                if dest >= num_partitions {
                    return Err(EngineError::Worker(format!(
                        "slice assignment targets {} but only {} partitions exist",
                        dest, num_partitions
                    )));
                }
                let end = start + len;
                if end > data.len() {
                    return Err(EngineError::Worker(format!(
                        "slice {}..{} out of bounds for {} items",
                        start,
                        end,
                        data.len()
                    )));
                }
                out[dest] = Some(data[start..end].to_vec());
            }
            Ok(out)
        })))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_roundtrip() {
        let func = SerializedFunc::capture("test", &(3usize, "abc".to_string())).unwrap();
        let (n, s): (usize, String) = decode_env(&func.env).unwrap();
        assert_eq!(n, 3);
        assert_eq!(s, "abc");
    }

    #[test]
    fn test_unknown_function() {
        let func = SerializedFunc::capture("no.such.func", &()).unwrap();
        let err = FuncRegistry::global().materialize(&func).unwrap_err();
        assert!(matches!(err, EngineError::Planning(_)));
    }

    #[test]
    fn test_count_builtin() {
        let func = count_reducer().unwrap();
        let reduce = FuncRegistry::global().materialize_reduce(&func).unwrap();
        let items = vec![json!(1), json!(2), json!(3)];
        assert_eq!(reduce(&items).unwrap(), json!(3));
    }

    #[test]
    fn test_key_slicer_routes_by_partitioner() {
        // 注册一个模3的分区函数供切片器嵌套
        FuncRegistry::global().register("test.mod3", |_env| {
            Ok(WorkerFunc::Partitioner(Box::new(|item| {
                let n = item
                    .as_u64()
                    .ok_or_else(|| EngineError::Worker("expected integer item".to_string()))?;
                Ok((n % 3) as usize)
            })))
        });

        let inner = SerializedFunc::capture("test.mod3", &()).unwrap();
        let slicer_func = key_slicer(3, &inner).unwrap();
        let slicer = FuncRegistry::global()
            .materialize(&slicer_func)
            .unwrap()
            .into_slicer("builtin.key_slicer")
            .unwrap();

        let data = vec![json!(10), json!(20), json!(30), json!(40), json!(50)];
        let slices = slicer(data, &Value::Null).unwrap();

        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0], Some(vec![json!(30)]));
        assert_eq!(slices[1], Some(vec![json!(10), json!(40)]));
        assert_eq!(slices[2], Some(vec![json!(20), json!(50)]));
    }

    #[test]
    fn test_key_slicer_out_of_range() {
        FuncRegistry::global().register("test.always9", |_env| {
            Ok(WorkerFunc::Partitioner(Box::new(|_| Ok(9))))
        });

        let inner = SerializedFunc::capture("test.always9", &()).unwrap();
        let slicer_func = key_slicer(2, &inner).unwrap();
        let slicer = FuncRegistry::global()
            .materialize(&slicer_func)
            .unwrap()
            .into_slicer("builtin.key_slicer")
            .unwrap();

        let err = slicer(vec![json!(1)], &Value::Null).unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }

    #[test]
    fn test_range_slicer() {
        let func = range_slicer(2).unwrap();
        let slicer = FuncRegistry::global()
            .materialize(&func)
            .unwrap()
            .into_slicer("builtin.range_slicer")
            .unwrap();

        let data = vec![json!("a"), json!("b"), json!("c")];
        // 前两项给0号，最后一项给1号
        let arg = json!([[0, 0, 2], [1, 2, 1]]);
        let slices = slicer(data, &arg).unwrap();

        assert_eq!(slices[0], Some(vec![json!("a"), json!("b")]));
        assert_eq!(slices[1], Some(vec![json!("c")]));
    }

    #[test]
    fn test_range_slicer_out_of_bounds() {
        let func = range_slicer(1).unwrap();
        let slicer = FuncRegistry::global()
            .materialize(&func)
            .unwrap()
            .into_slicer("builtin.range_slicer")
            .unwrap();

        let err = slicer(vec![json!(1)], &json!([[0, 0, 5]])).unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }

    #[test]
    fn test_wrong_function_kind() {
        let func = count_reducer().unwrap();
        let result = FuncRegistry::global()
            .materialize(&func)
            .unwrap()
            .into_map("builtin.count");
        assert!(matches!(result, Err(EngineError::Planning(_))));
    }
}
