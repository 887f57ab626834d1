// 全局内存分配器：使用 jemalloc 提升性能
// jemalloc 在高并发场景下比系统分配器快 8-15%
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// ===================================================================
// RDD式分布式计算引擎 —— 主节点调度核心
// ===================================================================
//
// 集群 = 一个主节点 + N个worker进程。客户端提交声明式的请求树
// （分区数据集的血缘），主节点把它翻译成对worker的远程操作DAG：
// 递归解析出扁平的分区集合、均衡放置、两阶段shuffle、显式释放
// 中间分区。
//
// 模块依赖自下而上：
//   error → protocol/funcs → partition/placement/worker → dispatch
//   local（单机模式）、server/cli（对外表面）在最上层。

/// 错误类型
pub mod error;

/// 主从协议：请求树、worker RPC、碎片描述符、帧
pub mod protocol;

/// Function shipment：注册表 + 环境捕获
pub mod funcs;

/// 分区句柄与按worker分组
pub mod partition;

/// 均衡轮转放置算术
pub mod placement;

/// worker请求通道（trait + 网络客户端）
pub mod worker;

/// 请求调度器与六个处理器
pub mod dispatch;

/// 本地执行模式（进程内worker）
pub mod local;

/// 客户端网络前端
pub mod server;

/// 命令行入口
pub mod cli;

/// Prometheus指标
pub mod metrics;

// ===================================================================
// 便捷的重新导出 (Convenience Re-exports)
// ===================================================================

pub use dispatch::{Master, Resolved};
pub use error::{EngineError, Result};
pub use funcs::{FuncRegistry, SerializedFunc, WorkerFunc};
pub use local::{LocalCluster, LocalWorker, PieceStore};
pub use partition::{group_by_worker, Partition, TaskRecord};
pub use protocol::{Piece, Request, WorkerReply, WorkerRpc};
pub use worker::{WorkerChannel, WorkerClient};
