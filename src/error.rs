/// 引擎错误类型
///
/// 所有失败都向上传播：处理器中止，主进程保持存活，不做本层重试。

use thiserror::Error;

/// 主节点调度层的错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 传输层错误（TCP连接、读写失败）
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// worker通道已关闭（连接任务退出，挂起的请求全部失败）
    #[error("worker channel closed")]
    ChannelClosed,

    /// worker端报告的执行错误，原样透传
    #[error("worker error: {0}")]
    Worker(String),

    /// 协议错误：回复形状不符
    #[error("unexpected worker reply: expected {expected}")]
    UnexpectedReply { expected: &'static str },

    /// 协议错误：回复长度与请求不一致
    #[error("length mismatch: expected {expected} results, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// 规划错误（未知缓存键、未知函数名等主节点本地可见的问题）
    #[error("planning error: {0}")]
    Planning(String),

    /// 函数环境编码失败
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// 函数环境解码失败
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// JSON序列化/反序列化失败
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
