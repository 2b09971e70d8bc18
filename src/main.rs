//! Redis服务端入口

use clap::Parser;
use stock_redis::config::ServerConfig;
use stock_redis::connection::cleanup_task;
use stock_redis::{logging, FunctionRegistry, Server, Store, VERSION};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();
    logging::init(&config.log.filter, config.log.json_logs);

    info!(version = VERSION, "启动服务端");

    let store = Store::new();
    let functions = FunctionRegistry::with_builtins();
    info!(functions = ?functions.names(), "已注册服务端函数");

    tokio::spawn(cleanup_task(store.clone(), config.cleanup_every()));

    let server = Server::bind(config.addr.addr(), store, functions).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "无法监听Ctrl-C信号");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("服务端已停止");
    Ok(())
}
