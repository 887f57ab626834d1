/// 主从协议定义
///
/// 两套消息：
/// - `Request`：客户端提交的请求树，按 `kind` 打标签的递归和类型
/// - `WorkerRpc` / `WorkerReply`：主节点发给单个worker的远程操作及其回复
///
/// 所有消息经由长度前缀帧 + JSON 编码传输（用户数据项是无模式的
/// `serde_json::Value`，二进制编解码器无法承载自描述值）。

use crate::error::{EngineError, Result};
use crate::funcs::SerializedFunc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 请求树：客户端描述数据集血缘的声明式结构
///
/// 非叶子节点携带 `subRequest`；同一请求可被多次解析，每次解析都会
/// 重新产生新分区。唯一的例外是 `loadCache`：它返回缓存持有的分区，
/// 消费方不得释放。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Request {
    /// 物化 N 个初始分区，args 每项对应一个分区
    #[serde(rename = "createRDD", rename_all = "camelCase")]
    CreateRdd {
        #[serde(default)]
        num_partitions: Option<usize>,
        creator: SerializedFunc,
        args: Vec<Value>,
        #[serde(rename = "type")]
        type_tag: String,
    },

    /// 逐分区变换，输出分区与输入分区同宿主
    #[serde(rename = "map", rename_all = "camelCase")]
    Map {
        sub_request: Box<Request>,
        func: SerializedFunc,
    },

    /// 两级归约：worker端逐分区归约，主节点本地跨分区归约
    #[serde(rename = "reduce", rename_all = "camelCase")]
    Reduce {
        sub_request: Box<Request>,
        partition_func: SerializedFunc,
        final_func: SerializedFunc,
    },

    /// 按键函数重分布（两阶段shuffle）
    #[serde(rename = "repartition", rename_all = "camelCase")]
    Repartition {
        sub_request: Box<Request>,
        #[serde(default)]
        num_partitions: Option<usize>,
        partition_func: SerializedFunc,
    },

    /// 按连续切片重分布，保持全局顺序（两阶段shuffle）
    #[serde(rename = "coalesce", rename_all = "camelCase")]
    Coalesce {
        sub_request: Box<Request>,
        #[serde(default)]
        num_partitions: Option<usize>,
    },

    /// 取出缓存持有的分区句柄；输出归缓存所有，禁止释放
    #[serde(rename = "loadCache", rename_all = "camelCase")]
    LoadCache { name: String },
}

impl Request {
    /// 请求种类标签
    pub fn kind(&self) -> &'static str {
        match self {
            Request::CreateRdd { .. } => "createRDD",
            Request::Map { .. } => "map",
            Request::Reduce { .. } => "reduce",
            Request::Repartition { .. } => "repartition",
            Request::Coalesce { .. } => "coalesce",
            Request::LoadCache { .. } => "loadCache",
        }
    }

    /// 该请求的输出是否归缓存所有（决定消费方是否释放）
    pub fn is_cache_owned(&self) -> bool {
        matches!(self, Request::LoadCache { .. })
    }
}

/// shuffle切片阶段产出的碎片描述符
///
/// 对主节点完全不透明：本地模式是文件名，网络模式是 (rdd-id, host,
/// port) 三元组。主节点在转置时只关心 Some / None。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Piece {
    /// 本地模式：worker本地的文件名
    File(String),
    /// 网络模式：远端取回句柄
    Remote {
        rdd_id: String,
        host: String,
        port: u16,
    },
}

/// 主节点发给worker的远程操作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerRpc {
    /// 创建 count 个分区，args 与分区一一对应
    CreatePartition {
        type_tag: String,
        creator: SerializedFunc,
        count: usize,
        args: Vec<Value>,
    },

    /// 对每个分区应用 func，返回等长的新分区id列表
    Map {
        func: SerializedFunc,
        ids: Vec<String>,
    },

    /// 对每个分区应用归约函数，返回等长的值列表
    Reduce {
        func: SerializedFunc,
        ids: Vec<String>,
    },

    /// shuffle阶段一：对每个分区切片出 num_partitions 份碎片
    ///
    /// `args` 要么为空（repartition），要么与 `ids` 平行（coalesce，
    /// 每项是该分区的连续切片指派表）。
    RepartitionSlice {
        ids: Vec<String>,
        num_partitions: usize,
        partition_func: SerializedFunc,
        args: Vec<Value>,
    },

    /// shuffle阶段二：按目的分区合并碎片，每个外层条目产出一个新分区
    RepartitionJoin { pieces: Vec<Vec<Piece>> },

    /// 释放分区。确认后句柄即失效
    Release { ids: Vec<String> },
}

impl WorkerRpc {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerRpc::CreatePartition { .. } => "create_partition",
            WorkerRpc::Map { .. } => "map",
            WorkerRpc::Reduce { .. } => "reduce",
            WorkerRpc::RepartitionSlice { .. } => "repartition_slice",
            WorkerRpc::RepartitionJoin { .. } => "repartition_join",
            WorkerRpc::Release { .. } => "release",
        }
    }
}

/// worker的回复
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerReply {
    /// 新产生的分区id
    Ids(Vec<String>),
    /// 逐分区归约值
    Values(Vec<Value>),
    /// 每个输入分区一行，每行 num_partitions 个碎片槽位
    Pieces(Vec<Vec<Option<Piece>>>),
    /// 释放确认
    Released,
}

impl WorkerReply {
    /// 期望id列表回复
    pub fn into_ids(self) -> Result<Vec<String>> {
        match self {
            WorkerReply::Ids(ids) => Ok(ids),
            _ => Err(EngineError::UnexpectedReply { expected: "ids" }),
        }
    }

    /// 期望值列表回复
    pub fn into_values(self) -> Result<Vec<Value>> {
        match self {
            WorkerReply::Values(values) => Ok(values),
            _ => Err(EngineError::UnexpectedReply { expected: "values" }),
        }
    }

    /// 期望碎片表回复
    pub fn into_pieces(self) -> Result<Vec<Vec<Option<Piece>>>> {
        match self {
            WorkerReply::Pieces(pieces) => Ok(pieces),
            _ => Err(EngineError::UnexpectedReply { expected: "pieces" }),
        }
    }

    /// 期望释放确认
    pub fn into_ack(self) -> Result<()> {
        match self {
            WorkerReply::Released => Ok(()),
            _ => Err(EngineError::UnexpectedReply { expected: "released" }),
        }
    }
}

/// 出站帧：tag 用于把回复匹配回挂起的请求
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestFrame {
    pub tag: u64,
    pub rpc: WorkerRpc,
}

/// 入站帧：worker端错误以字符串形式透传
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub tag: u64,
    pub result: std::result::Result<WorkerReply, String>,
}
