//! 交互式命令行客户端
//!
//! 用法: `redis-client [--host 127.0.0.1] [--port 6379]`，输入 QUIT 退出。

use clap::Parser;
use stock_redis::config::AddrArgs;
use stock_redis::{Client, RedisError, RespValue};
use std::io::{self, Write};

#[derive(Debug, Parser)]
#[command(name = "redis-client", version, about = "交互式RESP客户端")]
struct Cli {
    #[command(flatten)]
    addr: AddrArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let addr = cli.addr.addr();

    println!("连接到 {}...", addr);
    let mut client = Client::connect(&addr).await?;
    println!("已连接！输入 QUIT 退出。\n");

    loop {
        print!("{}> ", addr);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let parts = tokenize(input.trim());
        if parts.is_empty() {
            continue;
        }

        match client.send(&RespValue::command(&parts)).await {
            Ok(response) => print_response(&response, 0),
            Err(RedisError::ConnectionClosed) => {
                println!("服务器断开连接");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        if parts[0].eq_ignore_ascii_case("QUIT") {
            println!("再见！");
            break;
        }
    }

    Ok(())
}

/// 分词器 - 支持引号
///
/// Rust特点: 状态机模式匹配
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// 格式化打印响应
///
/// Rust特点: 递归模式匹配
fn print_response(value: &RespValue, indent: usize) {
    let prefix = "  ".repeat(indent);

    match value {
        RespValue::SimpleString(s) => println!("{}{}", prefix, s),
        RespValue::Error(e) => println!("{}(error) {}", prefix, e),
        RespValue::Integer(i) => println!("{}(integer) {}", prefix, i),
        RespValue::BulkString(data) => match std::str::from_utf8(data) {
            Ok(s) => println!("{}\"{}\"", prefix, s),
            Err(_) => println!("{}<binary data, {} bytes>", prefix, data.len()),
        },
        RespValue::Null => println!("{}(nil)", prefix),
        RespValue::Array(items) if items.is_empty() => println!("{}(empty array)", prefix),
        RespValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("{}{})", prefix, i + 1);
                print_response(item, indent + 1);
            }
        }
    }
}
