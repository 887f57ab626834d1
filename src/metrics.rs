//! Prometheus Metrics Module
//!
//! 主节点调度活动的核心指标
//!
//! ## 指标类型
//! - **Counter**: 请求数、worker RPC数、分区创建/释放数
//! - **Gauge**: 存活分区数（中途失败泄漏的分区会留在计数里）

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// 全局Metrics实例
    pub static ref METRICS: Metrics = Metrics::new();
}

/// 调度核心指标
pub struct Metrics {
    /// 解析的请求数（按kind）
    pub requests_total: IntCounterVec,

    /// 发出的worker RPC数（按操作）
    pub worker_rpcs_total: IntCounterVec,

    /// 创建的分区总数
    pub partitions_created_total: IntCounter,

    /// 释放的分区总数
    pub partitions_released_total: IntCounter,

    /// 当前存活分区数
    pub live_partitions: IntGauge,
}

impl Metrics {
    fn new() -> Self {
        Self {
            requests_total: register_int_counter_vec!(
                "rdd_engine_requests_total",
                "Total number of requests resolved",
                &["kind"]
            )
            .unwrap(),

            worker_rpcs_total: register_int_counter_vec!(
                "rdd_engine_worker_rpcs_total",
                "Total number of worker RPCs issued",
                &["rpc"]
            )
            .unwrap(),

            partitions_created_total: register_int_counter!(
                "rdd_engine_partitions_created_total",
                "Total number of partitions created"
            )
            .unwrap(),

            partitions_released_total: register_int_counter!(
                "rdd_engine_partitions_released_total",
                "Total number of partitions released"
            )
            .unwrap(),

            live_partitions: register_int_gauge!(
                "rdd_engine_live_partitions",
                "Number of currently live partitions"
            )
            .unwrap(),
        }
    }

    /// 导出Prometheus文本格式
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}
