//! 库存扣减服务
//!
//! 同一个库存计数器上的两种扣减方式:
//!
//! - [`StockService::deduct_stock`] 调用服务端函数 `deduct_stock`，"查询-判断-扣减"
//!   在存储内部一次完成，并发调用不会超卖。
//! - [`StockService::deduct_stock_unsafe`] 在本进程里 读 → 判断 → 等待 → 写，
//!   三次往返之间任何其他调用都可以插进来。这条路径用于演示竞态，不做任何同步，
//!   并发下可能超卖，这正是它存在的意义。
//!
//! 存储通过 [`StockBackend`] 注入: 进程内的 [`LocalBackend`]，或者经TCP访问的
//! [`SharedClient`] / [`ClientPool`]。

use crate::client::{ClientPool, SharedClient};
use crate::error::{RedisError, RedisResult, StockError, StockResult};
use crate::function::{DeductStock, FunctionRegistry};
use crate::resp::RespValue;
use crate::store::Store;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// 非原子路径在 "判断" 与 "写回" 之间默认等待的时间
pub const DEFAULT_UNSAFE_DELAY: Duration = Duration::from_millis(100);

/// 库存服务依赖的存储操作
///
/// Rust特点: async-trait 让trait方法可以是异步的
#[async_trait]
pub trait StockBackend: Send + Sync {
    /// 读取字符串值
    async fn get(&self, key: &str) -> RedisResult<Option<String>>;

    /// 无条件写入
    async fn set(&self, key: &str, value: &str) -> RedisResult<()>;

    /// 调用服务端函数
    async fn fcall(&self, function: &str, keys: &[&str], args: &[&str]) -> RedisResult<RespValue>;
}

/// 直接操作进程内 [`Store`] 的后端
#[derive(Clone)]
pub struct LocalBackend {
    store: Store,
    functions: Arc<FunctionRegistry>,
}

impl LocalBackend {
    /// 使用内置函数表
    pub fn new(store: Store) -> Self {
        Self::with_functions(store, FunctionRegistry::with_builtins())
    }

    pub fn with_functions(store: Store, functions: FunctionRegistry) -> Self {
        Self {
            store,
            functions: Arc::new(functions),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[async_trait]
impl StockBackend for LocalBackend {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        match self.store.get(key) {
            Some(data) => Ok(Some(String::from_utf8(data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> RedisResult<()> {
        self.store.set(key.to_string(), value.as_bytes().to_vec());
        Ok(())
    }

    async fn fcall(&self, function: &str, keys: &[&str], args: &[&str]) -> RedisResult<RespValue> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let args: Vec<Vec<u8>> = args.iter().map(|a| a.as_bytes().to_vec()).collect();
        self.functions.call(&self.store, function, &keys, &args)
    }
}

#[async_trait]
impl StockBackend for SharedClient {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.lock().await.get_string(key).await
    }

    async fn set(&self, key: &str, value: &str) -> RedisResult<()> {
        self.lock().await.set(key, value).await
    }

    async fn fcall(&self, function: &str, keys: &[&str], args: &[&str]) -> RedisResult<RespValue> {
        self.lock().await.fcall(function, keys, args).await
    }
}

#[async_trait]
impl StockBackend for ClientPool {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.next_client().get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> RedisResult<()> {
        StockBackend::set(self.next_client(), key, value).await
    }

    async fn fcall(&self, function: &str, keys: &[&str], args: &[&str]) -> RedisResult<RespValue> {
        self.next_client().fcall(function, keys, args).await
    }
}

/// 库存服务配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockConfig {
    /// 非原子路径在判断之后、写回之前的等待时间，用来放大竞态窗口
    pub unsafe_delay: Duration,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            unsafe_delay: DEFAULT_UNSAFE_DELAY,
        }
    }
}

/// 原子扣减的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    Deducted,
    /// 库存不足，计数器未被修改
    InsufficientStock,
}

impl DeductOutcome {
    pub fn is_deducted(&self) -> bool {
        matches!(self, DeductOutcome::Deducted)
    }
}

impl fmt::Display for DeductOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeductOutcome::Deducted => write!(f, "扣减成功"),
            DeductOutcome::InsufficientStock => write!(f, "库存不足，扣减失败"),
        }
    }
}

/// 非原子扣减的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeDeductOutcome {
    /// 写回成功，`remaining` 是本次调用写回的值，并发下未必是计数器的真实余量
    Deducted { remaining: i64 },
    InsufficientStock,
}

impl UnsafeDeductOutcome {
    pub fn is_deducted(&self) -> bool {
        matches!(self, UnsafeDeductOutcome::Deducted { .. })
    }
}

impl fmt::Display for UnsafeDeductOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafeDeductOutcome::Deducted { remaining } => {
                write!(f, "不安全扣减成功，当前余量：{}", remaining)
            }
            UnsafeDeductOutcome::InsufficientStock => write!(f, "库存不足"),
        }
    }
}

/// 库存服务
///
/// 服务本身不持有任何可变状态，所有共享状态都在存储里。`clone()` 后可以交给任意多个任务。
#[derive(Clone)]
pub struct StockService<B> {
    backend: B,
    config: StockConfig,
}

impl<B: StockBackend> StockService<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StockConfig::default())
    }

    pub fn with_config(backend: B, config: StockConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    /// 初始化库存，无条件覆盖旧值
    #[instrument(skip(self), err)]
    pub async fn init_stock(&self, key: &str, count: i64) -> StockResult<bool> {
        validate_key(key)?;
        validate_count(count)?;

        self.backend.set(key, &count.to_string()).await?;
        info!(key, count, "初始化库存");
        Ok(true)
    }

    /// 读取当前库存，key不存在时返回 `None`
    pub async fn get_stock(&self, key: &str) -> StockResult<Option<i64>> {
        validate_key(key)?;
        match self.backend.get(key).await? {
            Some(value) => parse_stock(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// 原子扣减
    ///
    /// 参数在访问存储之前校验。key不存在视为库存不足。
    #[instrument(skip(self), err)]
    pub async fn deduct_stock(&self, key: &str, amount: i64) -> StockResult<DeductOutcome> {
        validate_key(key)?;
        validate_amount(amount)?;

        let amount_arg = amount.to_string();
        let reply = self
            .backend
            .fcall(DeductStock::NAME, &[key], &[amount_arg.as_str()])
            .await?;

        match reply {
            RespValue::Integer(1) => {
                info!(key, amount, "库存扣减成功");
                Ok(DeductOutcome::Deducted)
            }
            RespValue::Integer(0) => {
                warn!(key, amount, "库存不足，扣减失败");
                Ok(DeductOutcome::InsufficientStock)
            }
            other => Err(RedisError::UnexpectedReply(format!(
                "{}: {:?}",
                DeductStock::NAME,
                other
            ))
            .into()),
        }
    }

    /// 非原子扣减，仅用于演示并发问题
    ///
    /// 1. `GET` 读取当前库存，key不存在按0处理
    /// 2. 在本进程中判断是否足够，不足立即返回
    /// 3. 等待 `unsafe_delay`
    /// 4. `SET` 写回 `当前值 - amount`，不做任何比较
    ///
    /// 两个并发调用可能都通过第2步，各自写回同一个值，造成超卖。
    #[instrument(skip(self), err)]
    pub async fn deduct_stock_unsafe(&self, key: &str, amount: i64) -> StockResult<UnsafeDeductOutcome> {
        validate_key(key)?;
        validate_amount(amount)?;

        let current = match self.backend.get(key).await? {
            Some(value) => parse_stock(key, value)?,
            None => 0,
        };

        if current < amount {
            return Ok(UnsafeDeductOutcome::InsufficientStock);
        }

        tokio::time::sleep(self.config.unsafe_delay).await;

        let remaining = current - amount;
        self.backend.set(key, &remaining.to_string()).await?;
        info!(key, remaining, "不安全扣减成功");
        Ok(UnsafeDeductOutcome::Deducted { remaining })
    }
}

/// key不能为空白
pub fn validate_key(key: &str) -> StockResult<()> {
    if key.trim().is_empty() {
        return Err(StockError::InvalidInput("key不能为空".to_string()));
    }
    Ok(())
}

/// 扣减量必须为正数
pub fn validate_amount(amount: i64) -> StockResult<()> {
    if amount <= 0 {
        return Err(StockError::InvalidInput(format!(
            "amount必须为正整数: {}",
            amount
        )));
    }
    Ok(())
}

/// 初始库存不能为负数
pub fn validate_count(count: i64) -> StockResult<()> {
    if count < 0 {
        return Err(StockError::InvalidInput(format!(
            "count不能为负数: {}",
            count
        )));
    }
    Ok(())
}

fn parse_stock(key: &str, value: String) -> StockResult<i64> {
    value.trim().parse().map_err(|_| StockError::NotAnInteger {
        key: key.to_string(),
        value,
    })
}

/// 并发演示使用的扣减方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RaceMode {
    /// 服务端函数原子扣减
    Safe,
    /// 读-判断-写 三步扣减
    Unsafe,
}

impl fmt::Display for RaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceMode::Safe => write!(f, "safe"),
            RaceMode::Unsafe => write!(f, "unsafe"),
        }
    }
}

/// 一次并发演示的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    pub mode: RaceMode,
    pub initial: i64,
    pub amount: i64,
    pub callers: usize,
    pub successes: usize,
    pub insufficient: usize,
    /// 基础设施错误的次数
    pub errors: usize,
    pub final_stock: Option<i64>,
}

impl RaceReport {
    /// 成功扣减的总量超过了初始库存
    pub fn oversold(&self) -> bool {
        // 用i128计算，成功次数乘扣减量可能超出i64
        self.successes as i128 * i128::from(self.amount) > i128::from(self.initial)
    }
}

impl fmt::Display for RaceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={} initial={} callers={} amount={} 成功={} 库存不足={} 错误={} 最终库存={}",
            self.mode,
            self.initial,
            self.callers,
            self.amount,
            self.successes,
            self.insufficient,
            self.errors,
            self.final_stock
                .map_or_else(|| "nil".to_string(), |v| v.to_string()),
        )?;
        if self.oversold() {
            write!(f, " (超卖)")?;
        }
        Ok(())
    }
}

/// 初始化库存后同时发起 `callers` 个扣减，等待全部完成并统计结果
pub async fn run_race<B>(
    service: &StockService<B>,
    key: &str,
    initial: i64,
    callers: usize,
    amount: i64,
    mode: RaceMode,
) -> StockResult<RaceReport>
where
    B: StockBackend + Clone + 'static,
{
    validate_amount(amount)?;
    service.init_stock(key, initial).await?;

    let tasks: Vec<_> = (0..callers)
        .map(|_| {
            let service = service.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                match mode {
                    RaceMode::Safe => service
                        .deduct_stock(&key, amount)
                        .await
                        .map(|o| o.is_deducted()),
                    RaceMode::Unsafe => service
                        .deduct_stock_unsafe(&key, amount)
                        .await
                        .map(|o| o.is_deducted()),
                }
            })
        })
        .collect();

    let mut report = RaceReport {
        mode,
        initial,
        amount,
        callers,
        successes: 0,
        insufficient: 0,
        errors: 0,
        final_stock: None,
    };

    for task in tasks {
        match task.await {
            Ok(Ok(true)) => report.successes += 1,
            Ok(Ok(false)) => report.insufficient += 1,
            Ok(Err(e)) => {
                warn!(error = %e, "扣减失败");
                report.errors += 1;
            }
            Err(e) => {
                warn!(error = %e, "扣减任务异常退出");
                report.errors += 1;
            }
        }
    }

    report.final_stock = service.get_stock(key).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StockService<LocalBackend> {
        StockService::new(LocalBackend::new(Store::new()))
    }

    fn service_with_delay(delay: Duration) -> StockService<LocalBackend> {
        StockService::with_config(
            LocalBackend::new(Store::new()),
            StockConfig {
                unsafe_delay: delay,
            },
        )
    }

    #[tokio::test]
    async fn test_init_overwrites() {
        let svc = service();
        assert!(svc.init_stock("product:101:stock", 100).await.unwrap());
        assert!(svc.init_stock("product:101:stock", 7).await.unwrap());
        assert_eq!(svc.get_stock("product:101:stock").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_init_rejects_bad_input() {
        let svc = service();
        assert!(svc.init_stock("k", -1).await.unwrap_err().is_client_error());
        assert!(svc.init_stock("  ", 1).await.unwrap_err().is_client_error());
        assert_eq!(svc.backend().store().dbsize(), 0);
    }

    #[tokio::test]
    async fn test_deduct_boundaries() {
        let svc = service();
        svc.init_stock("s", 5).await.unwrap();

        assert_eq!(svc.deduct_stock("s", 6).await.unwrap(), DeductOutcome::InsufficientStock);
        assert_eq!(svc.get_stock("s").await.unwrap(), Some(5));

        assert_eq!(svc.deduct_stock("s", 5).await.unwrap(), DeductOutcome::Deducted);
        assert_eq!(svc.get_stock("s").await.unwrap(), Some(0));

        assert_eq!(svc.deduct_stock("s", 1).await.unwrap(), DeductOutcome::InsufficientStock);
        assert_eq!(svc.get_stock("s").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_deduct_missing_key() {
        let svc = service();
        assert_eq!(
            svc.deduct_stock("never:initialized", 1).await.unwrap(),
            DeductOutcome::InsufficientStock
        );
        assert_eq!(svc.get_stock("never:initialized").await.unwrap(), None);
        assert_eq!(svc.backend().store().dbsize(), 0);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected_before_store() {
        let svc = service();
        svc.init_stock("s", 3).await.unwrap();

        for amount in [0, -1, i64::MIN] {
            let err = svc.deduct_stock("s", amount).await.unwrap_err();
            assert!(matches!(err, StockError::InvalidInput(_)));
            let err = svc.deduct_stock_unsafe("s", amount).await.unwrap_err();
            assert!(matches!(err, StockError::InvalidInput(_)));
        }
        assert_eq!(svc.get_stock("s").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_non_integer_value() {
        let svc = service();
        svc.backend().store().set("s".to_string(), b"many".to_vec());

        assert!(matches!(
            svc.deduct_stock("s", 1).await.unwrap_err(),
            StockError::Store(RedisError::TypeError(_))
        ));
        assert!(matches!(
            svc.deduct_stock_unsafe("s", 1).await.unwrap_err(),
            StockError::NotAnInteger { .. }
        ));
    }

    #[tokio::test]
    async fn test_unsafe_sequential() {
        let svc = service_with_delay(Duration::ZERO);
        svc.init_stock("s", 2).await.unwrap();

        assert_eq!(
            svc.deduct_stock_unsafe("s", 1).await.unwrap(),
            UnsafeDeductOutcome::Deducted { remaining: 1 }
        );
        assert_eq!(
            svc.deduct_stock_unsafe("s", 2).await.unwrap(),
            UnsafeDeductOutcome::InsufficientStock
        );
        assert_eq!(
            svc.deduct_stock_unsafe("missing", 1).await.unwrap(),
            UnsafeDeductOutcome::InsufficientStock
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_safe_deduct_never_oversells() {
        let svc = service();
        let report = run_race(&svc, "s", 10, 20, 1, RaceMode::Safe).await.unwrap();

        assert_eq!(report.successes, 10);
        assert_eq!(report.insufficient, 10);
        assert_eq!(report.errors, 0);
        assert_eq!(report.final_stock, Some(0));
        assert!(!report.oversold());
    }

    #[tokio::test]
    async fn test_unsafe_deduct_oversells() {
        let svc = service_with_delay(Duration::from_millis(50));
        let report = run_race(&svc, "s", 1, 2, 1, RaceMode::Unsafe).await.unwrap();

        // 两个调用都在对方写回之前读到了 1
        assert_eq!(report.successes, 2);
        assert_eq!(report.final_stock, Some(0));
        assert!(report.oversold());
    }

    #[tokio::test]
    async fn test_oversold_with_extreme_amounts() {
        let svc = service_with_delay(Duration::from_millis(50));
        let report = run_race(&svc, "s", i64::MAX, 2, i64::MAX, RaceMode::Unsafe)
            .await
            .unwrap();

        assert_eq!(report.successes, 2);
        assert!(report.oversold());
        assert!(report.to_string().ends_with("(超卖)"));
    }

    #[test]
    fn test_oversold_boundary() {
        let report = RaceReport {
            mode: RaceMode::Safe,
            initial: i64::MAX,
            amount: i64::MAX,
            callers: 1,
            successes: 1,
            insufficient: 0,
            errors: 0,
            final_stock: Some(0),
        };
        assert!(!report.oversold());
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(DeductOutcome::Deducted.to_string(), "扣减成功");
        assert_eq!(DeductOutcome::InsufficientStock.to_string(), "库存不足，扣减失败");
        assert_eq!(
            UnsafeDeductOutcome::Deducted { remaining: 9 }.to_string(),
            "不安全扣减成功，当前余量：9"
        );
        assert_eq!(UnsafeDeductOutcome::InsufficientStock.to_string(), "库存不足");
    }
}
