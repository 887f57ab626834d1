/// 主节点可执行入口：薄封装，逻辑都在 `cli` 模块里。

use rdd_engine::cli;

#[tokio::main]
async fn main() {
    cli::run().await;
}
