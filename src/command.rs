//! 命令处理模块
//!
//! Rust特点展示:
//! - 枚举表示不同命令类型
//! - 模式匹配解析和执行命令
//! - 生命周期标注

use crate::error::{RedisError, RedisResult};
use crate::function::FunctionRegistry;
use crate::resp::{self, RespValue};
use crate::store::Store;
use std::time::Duration;

/// Redis命令枚举
///
/// Rust特点: 枚举的每个变体可以携带不同的数据
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // 连接命令
    Ping(Option<String>),
    Echo(String),
    Quit,

    // 字符串命令
    Get { key: String },
    Set {
        key: String,
        value: Vec<u8>,
        expiry: Option<Duration>,
        nx: bool, // 仅当键不存在时设置
        xx: bool, // 仅当键存在时设置
    },
    IncrBy { key: String, delta: i64 },

    // 键命令
    Del { keys: Vec<String> },
    Exists { keys: Vec<String> },
    Expire { key: String, ttl: Duration },
    PTtl { key: String, millis: bool },
    Persist { key: String },

    // 服务端函数
    FCall {
        function: String,
        keys: Vec<String>,
        args: Vec<Vec<u8>>,
    },
    FunctionList,

    // 服务器命令
    DbSize,
    FlushDb,
    Info,

    Unknown(String),
}

impl Command {
    /// 从RESP值解析命令
    pub fn from_resp(value: RespValue) -> RedisResult<Command> {
        let parts = match value {
            RespValue::Array(arr) => arr,
            _ => return Err(RedisError::Protocol("期望数组".to_string())),
        };

        if parts.is_empty() {
            return Err(RedisError::Protocol("空命令".to_string()));
        }

        let cmd_name = parts[0]
            .as_string()
            .ok_or_else(|| RedisError::Protocol("命令名必须是字符串".to_string()))?
            .to_uppercase();

        let args: Vec<RespValue> = parts.into_iter().skip(1).collect();

        Self::parse_command(&cmd_name, args)
    }

    /// 解析具体命令
    ///
    /// Rust特点: match表达式返回值，所有分支必须返回相同类型
    fn parse_command(cmd: &str, args: Vec<RespValue>) -> RedisResult<Command> {
        match cmd {
            // ===== 连接命令 =====
            "PING" => Ok(Command::Ping(args.first().and_then(|v| v.as_string()))),

            "ECHO" => {
                Self::require_args("ECHO", &args, 1)?;
                Ok(Command::Echo(Self::get_string(&args[0])?))
            }

            "QUIT" => Ok(Command::Quit),

            // ===== 字符串命令 =====
            "GET" => {
                Self::require_args("GET", &args, 1)?;
                Ok(Command::Get {
                    key: Self::get_string(&args[0])?,
                })
            }

            "SET" => Self::parse_set(args),

            "INCR" | "DECR" => {
                Self::require_args(cmd, &args, 1)?;
                Ok(Command::IncrBy {
                    key: Self::get_string(&args[0])?,
                    delta: if cmd == "INCR" { 1 } else { -1 },
                })
            }

            "INCRBY" | "DECRBY" => {
                Self::require_args(cmd, &args, 2)?;
                let delta = Self::get_integer(&args[1])?;
                let delta = if cmd == "INCRBY" {
                    delta
                } else {
                    delta
                        .checked_neg()
                        .ok_or_else(|| RedisError::TypeError("增量超出范围".to_string()))?
                };
                Ok(Command::IncrBy {
                    key: Self::get_string(&args[0])?,
                    delta,
                })
            }

            // ===== 键命令 =====
            "DEL" => {
                Self::require_min_args("DEL", &args, 1)?;
                Ok(Command::Del {
                    keys: Self::get_strings(&args)?,
                })
            }

            "EXISTS" => {
                Self::require_min_args("EXISTS", &args, 1)?;
                Ok(Command::Exists {
                    keys: Self::get_strings(&args)?,
                })
            }

            "EXPIRE" | "PEXPIRE" => {
                Self::require_args(cmd, &args, 2)?;
                let amount = Self::get_non_negative(&args[1])?;
                let ttl = if cmd == "EXPIRE" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                };
                Ok(Command::Expire {
                    key: Self::get_string(&args[0])?,
                    ttl,
                })
            }

            "TTL" | "PTTL" => {
                Self::require_args(cmd, &args, 1)?;
                Ok(Command::PTtl {
                    key: Self::get_string(&args[0])?,
                    millis: cmd == "PTTL",
                })
            }

            "PERSIST" => {
                Self::require_args("PERSIST", &args, 1)?;
                Ok(Command::Persist {
                    key: Self::get_string(&args[0])?,
                })
            }

            // ===== 服务端函数 =====
            "FCALL" => Self::parse_fcall(args),

            "FUNCTION" => {
                Self::require_args("FUNCTION", &args, 1)?;
                match Self::get_string(&args[0])?.to_uppercase().as_str() {
                    "LIST" => Ok(Command::FunctionList),
                    other => Err(RedisError::Syntax(format!("未知的FUNCTION子命令: {}", other))),
                }
            }

            // ===== 服务器命令 =====
            "DBSIZE" => Ok(Command::DbSize),

            "FLUSHDB" | "FLUSHALL" => Ok(Command::FlushDb),

            "INFO" => Ok(Command::Info),

            _ => Ok(Command::Unknown(cmd.to_string())),
        }
    }

    /// `SET key value [EX seconds|PX milliseconds] [NX|XX]`
    fn parse_set(args: Vec<RespValue>) -> RedisResult<Command> {
        Self::require_min_args("SET", &args, 2)?;
        let key = Self::get_string(&args[0])?;
        let value = Self::get_bytes(&args[1])?;

        let mut expiry = None;
        let mut nx = false;
        let mut xx = false;
        let mut options = args[2..].iter();

        while let Some(opt) = options.next() {
            let opt = Self::get_string(opt)?.to_uppercase();
            match opt.as_str() {
                "EX" | "PX" => {
                    let amount = options
                        .next()
                        .ok_or_else(|| RedisError::Syntax(format!("{} 缺少参数", opt)))?;
                    let amount = Self::get_non_negative(amount)?;
                    expiry = Some(if opt == "EX" {
                        Duration::from_secs(amount)
                    } else {
                        Duration::from_millis(amount)
                    });
                }
                "NX" => nx = true,
                "XX" => xx = true,
                _ => return Err(RedisError::Syntax(format!("未知选项: {}", opt))),
            }
        }

        if nx && xx {
            return Err(RedisError::Syntax("NX 与 XX 不能同时使用".to_string()));
        }

        Ok(Command::Set {
            key,
            value,
            expiry,
            nx,
            xx,
        })
    }

    /// `FCALL function numkeys key [key ...] [arg ...]`
    fn parse_fcall(args: Vec<RespValue>) -> RedisResult<Command> {
        Self::require_min_args("FCALL", &args, 2)?;
        let function = Self::get_string(&args[0])?;
        let numkeys = Self::get_non_negative(&args[1])? as usize;

        let rest = &args[2..];
        if numkeys > rest.len() {
            return Err(RedisError::Syntax(
                "Number of keys can't be greater than number of args".to_string(),
            ));
        }

        let keys = Self::get_strings(&rest[..numkeys])?;
        let args = rest[numkeys..]
            .iter()
            .map(Self::get_bytes)
            .collect::<RedisResult<Vec<_>>>()?;

        Ok(Command::FCall {
            function,
            keys,
            args,
        })
    }

    /// 检查参数数量是否正确
    fn require_args(cmd: &str, args: &[RespValue], expected: usize) -> RedisResult<()> {
        if args.len() != expected {
            Err(RedisError::WrongNumberOfArguments {
                command: cmd.to_string(),
                expected,
                got: args.len(),
            })
        } else {
            Ok(())
        }
    }

    /// 检查最少参数数量
    fn require_min_args(cmd: &str, args: &[RespValue], min: usize) -> RedisResult<()> {
        if args.len() < min {
            Err(RedisError::WrongNumberOfArguments {
                command: cmd.to_string(),
                expected: min,
                got: args.len(),
            })
        } else {
            Ok(())
        }
    }

    fn get_string(value: &RespValue) -> RedisResult<String> {
        value
            .as_string()
            .ok_or_else(|| RedisError::TypeError("期望字符串".to_string()))
    }

    fn get_strings(values: &[RespValue]) -> RedisResult<Vec<String>> {
        values.iter().map(Self::get_string).collect()
    }

    fn get_bytes(value: &RespValue) -> RedisResult<Vec<u8>> {
        match value {
            RespValue::BulkString(data) => Ok(data.clone()),
            RespValue::SimpleString(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(RedisError::TypeError("期望字符串".to_string())),
        }
    }

    fn get_integer(value: &RespValue) -> RedisResult<i64> {
        value
            .as_integer()
            .ok_or_else(|| RedisError::TypeError("期望整数".to_string()))
    }

    fn get_non_negative(value: &RespValue) -> RedisResult<u64> {
        let n = Self::get_integer(value)?;
        u64::try_from(n).map_err(|_| RedisError::TypeError("期望非负整数".to_string()))
    }
}

/// 命令执行器
///
/// Rust特点: 生命周期'a确保执行器不会比store和函数表活得更久
pub struct CommandExecutor<'a> {
    store: &'a Store,
    functions: &'a FunctionRegistry,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(store: &'a Store, functions: &'a FunctionRegistry) -> Self {
        Self { store, functions }
    }

    /// 执行命令并返回 (响应, 是否断开连接)
    ///
    /// Rust特点: 穷尽的模式匹配确保所有命令都被处理
    pub fn execute(&self, cmd: Command) -> (RespValue, bool) {
        let should_quit = matches!(cmd, Command::Quit);

        let response = match cmd {
            Command::Ping(msg) => match msg {
                Some(m) => resp::bulk_string(&m),
                None => resp::pong(),
            },

            Command::Echo(msg) => resp::bulk_string(&msg),

            Command::Quit => resp::ok(),

            Command::Get { key } => match self.store.get(&key) {
                Some(data) => RespValue::BulkString(data),
                None => RespValue::Null,
            },

            Command::Set {
                key,
                value,
                expiry,
                nx,
                xx,
            } => {
                if self.store.set_conditional(key, value, expiry, nx, xx) {
                    resp::ok()
                } else {
                    RespValue::Null
                }
            }

            Command::IncrBy { key, delta } => match self.store.incr(&key, delta) {
                Ok(n) => RespValue::Integer(n),
                Err(e) => resp::error(&e),
            },

            Command::Del { keys } => RespValue::Integer(self.store.del_multi(&keys) as i64),

            Command::Exists { keys } => RespValue::Integer(self.store.exists_multi(&keys) as i64),

            Command::Expire { key, ttl } => {
                RespValue::Integer(i64::from(self.store.expire(&key, ttl)))
            }

            Command::PTtl { key, millis } => {
                let ttl_ms = self.store.pttl(&key);
                if millis || ttl_ms < 0 {
                    RespValue::Integer(ttl_ms)
                } else {
                    RespValue::Integer(ttl_ms / 1000)
                }
            }

            Command::Persist { key } => RespValue::Integer(i64::from(self.store.persist(&key))),

            Command::FCall {
                function,
                keys,
                args,
            } => match self.functions.call(self.store, &function, &keys, &args) {
                Ok(value) => value,
                Err(e) => resp::error(&format!("ERR {}", e)),
            },

            Command::FunctionList => RespValue::Array(
                self.functions
                    .names()
                    .into_iter()
                    .map(resp::bulk_string)
                    .collect(),
            ),

            Command::DbSize => RespValue::Integer(self.store.dbsize() as i64),

            Command::FlushDb => {
                self.store.flushdb();
                resp::ok()
            }

            Command::Info => {
                let info = format!(
                    "# Server\r\n\
                     redis_version:{}\r\n\
                     # Functions\r\n\
                     functions:{}\r\n\
                     # Keyspace\r\n\
                     db0:keys={}\r\n",
                    env!("CARGO_PKG_VERSION"),
                    self.functions.names().join(","),
                    self.store.dbsize()
                );
                RespValue::BulkString(info.into_bytes())
            }

            Command::Unknown(cmd) => resp::error(&format!("ERR unknown command '{}'", cmd)),
        };

        (response, should_quit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(parts: &[&str]) -> RedisResult<Command> {
        Command::from_resp(RespValue::command(parts.iter().copied()))
    }

    fn run(store: &Store, parts: &[&str]) -> RespValue {
        let functions = FunctionRegistry::with_builtins();
        let executor = CommandExecutor::new(store, &functions);
        executor.execute(parse(parts).unwrap()).0
    }

    #[test]
    fn test_parse_ping() {
        assert_eq!(parse(&["ping"]).unwrap(), Command::Ping(None));
    }

    #[test]
    fn test_parse_set_options() {
        let cmd = parse(&["SET", "k", "v", "EX", "60", "NX"]).unwrap();
        assert_eq!(
            cmd,
            Command::Set {
                key: "k".to_string(),
                value: b"v".to_vec(),
                expiry: Some(Duration::from_secs(60)),
                nx: true,
                xx: false,
            }
        );
    }

    #[test]
    fn test_parse_set_missing_option_value() {
        assert!(matches!(parse(&["SET", "k", "v", "EX"]), Err(RedisError::Syntax(_))));
        assert!(matches!(parse(&["SET", "k", "v", "NX", "XX"]), Err(RedisError::Syntax(_))));
    }

    #[test]
    fn test_parse_fcall() {
        let cmd = parse(&["FCALL", "deduct_stock", "1", "product:101:stock", "2"]).unwrap();
        assert_eq!(
            cmd,
            Command::FCall {
                function: "deduct_stock".to_string(),
                keys: vec!["product:101:stock".to_string()],
                args: vec![b"2".to_vec()],
            }
        );
        assert!(parse(&["FCALL", "deduct_stock", "3", "k"]).is_err());
    }

    #[test]
    fn test_parse_wrong_arity() {
        assert!(matches!(
            parse(&["GET"]),
            Err(RedisError::WrongNumberOfArguments { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_execute_set_get() {
        let store = Store::new();
        assert_eq!(run(&store, &["SET", "foo", "bar"]), resp::ok());
        assert_eq!(run(&store, &["GET", "foo"]), RespValue::BulkString(b"bar".to_vec()));
        assert_eq!(run(&store, &["SET", "foo", "baz", "NX"]), RespValue::Null);
    }

    #[test]
    fn test_execute_counters() {
        let store = Store::new();
        assert_eq!(run(&store, &["INCR", "n"]), RespValue::Integer(1));
        assert_eq!(run(&store, &["INCRBY", "n", "9"]), RespValue::Integer(10));
        assert_eq!(run(&store, &["DECRBY", "n", "4"]), RespValue::Integer(6));
        assert_eq!(run(&store, &["DECR", "n"]), RespValue::Integer(5));
    }

    #[test]
    fn test_execute_ttl() {
        let store = Store::new();
        assert_eq!(run(&store, &["TTL", "nope"]), RespValue::Integer(-2));
        run(&store, &["SET", "k", "v"]);
        assert_eq!(run(&store, &["TTL", "k"]), RespValue::Integer(-1));
        assert_eq!(run(&store, &["EXPIRE", "k", "100"]), RespValue::Integer(1));
        match run(&store, &["TTL", "k"]) {
            RespValue::Integer(s) => assert!(s > 90 && s <= 100),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_execute_fcall_deduct() {
        let store = Store::new();
        run(&store, &["SET", "stock", "2"]);
        let fcall = ["FCALL", "deduct_stock", "1", "stock", "1"];
        assert_eq!(run(&store, &fcall), RespValue::Integer(1));
        assert_eq!(run(&store, &fcall), RespValue::Integer(1));
        assert_eq!(run(&store, &fcall), RespValue::Integer(0));
        assert_eq!(run(&store, &["GET", "stock"]), RespValue::BulkString(b"0".to_vec()));
    }

    #[test]
    fn test_execute_fcall_errors_are_replies() {
        let store = Store::new();
        assert!(matches!(
            run(&store, &["FCALL", "missing", "0"]),
            RespValue::Error(_)
        ));
        assert_eq!(
            run(&store, &["FCALL", "deduct_stock", "1", "stock", "0"]),
            resp::error("ERR amount must be a positive integer")
        );

        run(&store, &["SET", "stock", "many"]);
        assert_eq!(
            run(&store, &["FCALL", "deduct_stock", "1", "stock", "1"]),
            resp::error("ERR value is not an integer")
        );
    }

    #[test]
    fn test_function_list() {
        let store = Store::new();
        assert_eq!(
            run(&store, &["FUNCTION", "LIST"]),
            RespValue::Array(vec![resp::bulk_string("deduct_stock")])
        );
    }
}
