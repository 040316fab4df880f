use std::time::Duration;
use tracing::warn;

/// 退避等待的抽象，测试中替换为记录器，避免真实 sleep。
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// 默认实现：阻塞当前线程。
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// 重试策略：第 n 次重试前等待 `delays[n - 1]`，重试次数等于 `delays.len()`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// 不重试。
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// 线性退避：`base * 1, base * 2, ... base * retries`。
    pub fn linear(base: Duration, retries: u32) -> Self {
        Self {
            delays: (1..=retries).map(|attempt| base * attempt).collect(),
        }
    }

    /// tus 客户端对整段上传的默认重试间隔。
    pub fn tus_default() -> Self {
        Self::new(
            [500, 1000, 2000, 3000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        )
    }

    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }

    pub fn delay_for(&self, retry: usize) -> Option<Duration> {
        retry.checked_sub(1).and_then(|idx| self.delays.get(idx)).copied()
    }
}

/// 反复调用 `attempt`，直到成功、遇到不可重试的错误或重试次数用尽。
/// `attempt` 收到从 0 开始的尝试序号；返回最后一次的结果。
pub fn make_attempts<T, E, F, R>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    should_retry: R,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt_no = 0;
    loop {
        match attempt(attempt_no) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let next = attempt_no + 1;
                let delay = match policy.delay_for(next) {
                    Some(delay) if should_retry(&err) => delay,
                    _ => return Err(err),
                };
                warn!(
                    retry = next,
                    max_retries = policy.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                sleeper.sleep(delay);
                attempt_no = next;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 记录每次等待时长的测试用 Sleeper。
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub(crate) delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub(crate) fn recorded(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    #[test]
    fn linear_policy_delays() {
        let policy = RetryPolicy::linear(Duration::from_millis(3000), 3);
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(3000)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(9000)));
        assert_eq!(policy.delay_for(4), None);
    }

    #[test]
    fn stops_at_first_success() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::linear(Duration::from_millis(10), 3);
        let result: Result<usize, String> = make_attempts(
            &policy,
            &sleeper,
            |_| true,
            |attempt| {
                if attempt < 2 {
                    Err(format!("fail {attempt}"))
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[test]
    fn gives_up_after_policy_exhausted() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), String> = make_attempts(
            &RetryPolicy::tus_default(),
            &sleeper,
            |_| true,
            |_| {
                calls += 1;
                Err("boom".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 5);
        assert_eq!(sleeper.recorded().len(), 4);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;
        let result: Result<(), String> = make_attempts(
            &RetryPolicy::tus_default(),
            &sleeper,
            |err: &String| err != "fatal",
            |_| {
                calls += 1;
                Err("fatal".to_string())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(sleeper.recorded().is_empty());
    }
}
