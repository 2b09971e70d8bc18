//! 库存扣减命令行
//!
//! ```text
//! stock-cli init --key product:101:stock --count 10
//! stock-cli deduct --amount 1
//! stock-cli deduct-unsafe --amount 1
//! stock-cli --unsafe-delay-ms 200 race --mode unsafe --initial 1 --callers 2
//! ```
//!
//! 退出码: 0 成功(包括库存不足)，1 存储错误，2 参数错误。

use clap::Parser;
use stock_redis::config::{StockCliConfig, StockCommand};
use stock_redis::stock::run_race;
use stock_redis::{logging, ClientPool, StockResult, StockService};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let config = StockCliConfig::parse();
    logging::init(&config.log.filter, config.log.json_logs);

    if let Err(e) = run(config).await {
        error!(error = %e, "执行失败");
        eprintln!("{}", e);
        process::exit(e.exit_code());
    }
}

async fn run(config: StockCliConfig) -> StockResult<()> {
    // 参数错误在连接存储之前返回
    config.command.validate()?;

    let pool = ClientPool::connect(config.addr.addr(), config.connections).await?;
    let service = StockService::with_config(pool, config.stock_config());

    match config.command {
        StockCommand::Init { key, count } => {
            let ok = service.init_stock(&key, count).await?;
            println!("{}", ok);
        }
        StockCommand::Deduct { key, amount } => {
            println!("{}", service.deduct_stock(&key, amount).await?);
        }
        StockCommand::DeductUnsafe { key, amount } => {
            println!("{}", service.deduct_stock_unsafe(&key, amount).await?);
        }
        StockCommand::Get { key } => match service.get_stock(&key).await? {
            Some(count) => println!("{}", count),
            None => println!("(nil)"),
        },
        StockCommand::Race {
            key,
            initial,
            callers,
            amount,
            mode,
        } => {
            let report = run_race(&service, &key, initial, callers, amount, mode).await?;
            println!("{}", report);
        }
    }

    Ok(())
}
