use assert_cmd::Command;
use predicates::str::contains;
use std::net::SocketAddr;

use stock_redis::{FunctionRegistry, Server, Store};

fn stock_cli(port: u16) -> Command {
    let mut cmd = Command::cargo_bin("stock-cli").unwrap();
    cmd.args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .env("RUST_LOG", "off");
    cmd
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn start_server() -> (SocketAddr, Store) {
    let store = Store::new();
    let server = Server::bind("127.0.0.1:0", store.clone(), FunctionRegistry::with_builtins())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, store)
}

#[test]
fn bad_input_exits_2_without_touching_the_store() {
    let port = closed_port();

    for args in [
        &["deduct", "--amount", "0"][..],
        &["deduct-unsafe", "--amount", "-1"],
        &["init", "--count", "-5"],
        &["deduct", "--key", ""],
    ] {
        stock_cli(port)
            .args(args)
            .assert()
            .code(2)
            .stderr(contains("参数错误"));
    }
}

#[test]
fn unreachable_store_exits_1() {
    stock_cli(closed_port())
        .args(["deduct", "--amount", "1"])
        .assert()
        .code(1)
        .stderr(contains("存储错误"));
}

// 子进程阻塞运行期间，服务端任务在工作线程上继续处理连接
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn init_and_deduct_through_the_cli() {
    let (addr, store) = start_server().await;
    let port = addr.port();

    stock_cli(port)
        .args(["init", "--key", "cli:stock", "--count", "1"])
        .assert()
        .success();

    stock_cli(port)
        .args(["deduct", "--key", "cli:stock"])
        .assert()
        .success()
        .stdout(contains("扣减成功"));

    // 库存不足是正常结果，退出码为0
    stock_cli(port)
        .args(["deduct", "--key", "cli:stock"])
        .assert()
        .success()
        .stdout(contains("库存不足"));

    assert_eq!(store.get("cli:stock"), Some(b"0".to_vec()));
}
