//! 调度定义
//!
//! 三种调度：固定间隔、带起止窗口的间隔、CRON 表达式。
//! 调度是挂钟时间的纯函数，不做任何 I/O；`wait` 睡到下一个触发
//! 时刻并报告被跳过的周期数，任务据此累计 miss。

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronExpr;
use tracing::warn;

use snap_errors::{SnapError, SnapResult};

/// 一次等待的结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Active,
    /// 调度窗口已结束，任务应当停止
    Ended,
    /// 调度定义无效，本次不推进
    Error,
}

/// `wait` 的返回值
#[derive(Debug, Clone)]
pub struct Waited {
    /// 本次触发对应的时刻
    pub at: DateTime<Utc>,
    /// 自上次触发以来被跳过的周期数
    pub missed: u64,
    pub state: ScheduleState,
}

impl Waited {
    fn active(at: DateTime<Utc>, missed: u64) -> Self {
        Self {
            at,
            missed,
            state: ScheduleState::Active,
        }
    }

    fn ended() -> Self {
        Self {
            at: Utc::now(),
            missed: 0,
            state: ScheduleState::Ended,
        }
    }

    fn error() -> Self {
        Self {
            at: Utc::now(),
            missed: 0,
            state: ScheduleState::Error,
        }
    }
}

/// 任务的触发调度
#[derive(Debug, Clone)]
pub enum Schedule {
    Simple(SimpleSchedule),
    Windowed(WindowedSchedule),
    Cron(CronSchedule),
}

impl Schedule {
    pub fn simple(period: Duration) -> Self {
        Self::Simple(SimpleSchedule { period })
    }

    pub fn windowed(
        period: Duration,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> Self {
        Self::Windowed(WindowedSchedule {
            period,
            start,
            stop,
        })
    }

    pub fn cron(expr: &str) -> Self {
        Self::Cron(CronSchedule {
            expr: expr.to_string(),
        })
    }

    /// 创建任务时校验调度定义
    pub fn validate(&self) -> SnapResult<()> {
        match self {
            Schedule::Simple(s) => s.validate(),
            Schedule::Windowed(s) => s.validate(),
            Schedule::Cron(s) => s.validate(),
        }
    }

    /// 睡到下一个触发时刻
    ///
    /// `last` 为上次触发的时刻；首次触发传 `None`。
    pub async fn wait(&self, last: Option<DateTime<Utc>>) -> Waited {
        match self {
            Schedule::Simple(s) => s.wait(last).await,
            Schedule::Windowed(s) => s.wait(last).await,
            Schedule::Cron(s) => s.wait(last).await,
        }
    }
}

/// 固定间隔调度
#[derive(Debug, Clone)]
pub struct SimpleSchedule {
    pub period: Duration,
}

impl SimpleSchedule {
    fn validate(&self) -> SnapResult<()> {
        if self.period.is_zero() {
            return Err(SnapError::InvalidSchedule(
                "调度间隔必须大于零".to_string(),
            ));
        }
        Ok(())
    }

    async fn wait(&self, last: Option<DateTime<Utc>>) -> Waited {
        let Ok(period) = chrono::Duration::from_std(self.period) else {
            return Waited::error();
        };
        if period <= chrono::Duration::zero() {
            return Waited::error();
        }
        wait_on_interval(last, period, None).await
    }
}

/// 带起止窗口的间隔调度
#[derive(Debug, Clone)]
pub struct WindowedSchedule {
    pub period: Duration,
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
}

impl WindowedSchedule {
    fn validate(&self) -> SnapResult<()> {
        if self.period.is_zero() {
            return Err(SnapError::InvalidSchedule(
                "调度间隔必须大于零".to_string(),
            ));
        }
        if let (Some(start), Some(stop)) = (self.start, self.stop) {
            if stop <= start {
                return Err(SnapError::InvalidSchedule(format!(
                    "窗口结束时间 {stop} 不晚于开始时间 {start}"
                )));
            }
        }
        Ok(())
    }

    async fn wait(&self, last: Option<DateTime<Utc>>) -> Waited {
        let Ok(period) = chrono::Duration::from_std(self.period) else {
            return Waited::error();
        };
        if period <= chrono::Duration::zero() {
            return Waited::error();
        }

        if let Some(stop) = self.stop {
            if Utc::now() > stop {
                return Waited::ended();
            }
        }

        // 首次触发不早于窗口开始
        let effective_last = match (last, self.start) {
            (None, Some(start)) if start > Utc::now() => {
                sleep_until(start).await;
                return Waited::active(start, 0);
            }
            _ => last,
        };

        let waited = wait_on_interval(effective_last, period, self.stop).await;
        if let Some(stop) = self.stop {
            if waited.state == ScheduleState::Active && waited.at > stop {
                return Waited::ended();
            }
        }
        waited
    }
}

/// CRON 表达式调度（秒级六字段表达式）
#[derive(Debug, Clone)]
pub struct CronSchedule {
    pub expr: String,
}

impl CronSchedule {
    fn validate(&self) -> SnapResult<()> {
        CronExpr::from_str(&self.expr).map_err(|e| SnapError::InvalidCron {
            expr: self.expr.clone(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn wait(&self, last: Option<DateTime<Utc>>) -> Waited {
        let expr = match CronExpr::from_str(&self.expr) {
            Ok(expr) => expr,
            Err(e) => {
                warn!("CRON表达式无效: {} - {e}", self.expr);
                return Waited::error();
            }
        };

        let from = last.unwrap_or_else(Utc::now);
        let Some(next) = expr.after(&from).next() else {
            // 表达式不再产生触发时刻
            return Waited::ended();
        };

        let now = Utc::now();
        if next > now {
            sleep_until(next).await;
            return Waited::active(next, 0);
        }

        // 触发时刻已经过去：跳过落后的周期，只补最近一次
        let mut missed = 0_u64;
        let mut at = next;
        for t in expr.after(&next) {
            if t <= now {
                missed += 1;
                at = t;
            } else {
                break;
            }
        }
        Waited::active(at, missed)
    }
}

/// 间隔类调度的公共等待逻辑
async fn wait_on_interval(
    last: Option<DateTime<Utc>>,
    period: chrono::Duration,
    stop: Option<DateTime<Utc>>,
) -> Waited {
    let now = Utc::now();
    let next = match last {
        None => now,
        Some(last) => last + period,
    };

    if let Some(stop) = stop {
        if next > stop {
            return Waited::ended();
        }
    }

    if next > now {
        sleep_until(next).await;
        return Waited::active(next, 0);
    }

    // 上次触发超时了：对齐到最近一个已到期的周期边界，落后的周期计为 miss
    let behind_ms = (now - next).num_milliseconds().max(0);
    let period_ms = period.num_milliseconds().max(1);
    let missed = (behind_ms / period_ms) as u64;
    let at = next + period * (missed as i32);
    Waited::active(at, missed)
}

async fn sleep_until(at: DateTime<Utc>) {
    let now = Utc::now();
    if at > now {
        if let Ok(delay) = (at - now).to_std() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_first_fire_is_immediate() {
        let schedule = Schedule::simple(Duration::from_millis(50));
        let start = std::time::Instant::now();
        let waited = schedule.wait(None).await;
        assert_eq!(waited.state, ScheduleState::Active);
        assert_eq!(waited.missed, 0);
        assert!(start.elapsed() < Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_simple_waits_one_period() {
        let schedule = Schedule::simple(Duration::from_millis(60));
        let first = schedule.wait(None).await;
        let start = std::time::Instant::now();
        let second = schedule.wait(Some(first.at)).await;
        assert_eq!(second.state, ScheduleState::Active);
        assert_eq!(second.missed, 0);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_simple_counts_missed_periods() {
        let schedule = Schedule::simple(Duration::from_millis(20));
        // 上次触发在很久之前，应当补齐 miss 计数而不是逐个补触发
        let last = Utc::now() - chrono::Duration::milliseconds(110);
        let waited = schedule.wait(Some(last)).await;
        assert_eq!(waited.state, ScheduleState::Active);
        assert!(waited.missed >= 3, "missed = {}", waited.missed);
        assert!(waited.at <= Utc::now());
    }

    #[tokio::test]
    async fn test_zero_period_is_invalid() {
        let schedule = Schedule::simple(Duration::from_secs(0));
        assert!(schedule.validate().is_err());
    }

    #[tokio::test]
    async fn test_windowed_past_stop_is_ended() {
        let schedule = Schedule::windowed(
            Duration::from_millis(10),
            None,
            Some(Utc::now() - chrono::Duration::seconds(1)),
        );
        let waited = schedule.wait(None).await;
        assert_eq!(waited.state, ScheduleState::Ended);
    }

    #[tokio::test]
    async fn test_windowed_waits_for_start() {
        let start_at = Utc::now() + chrono::Duration::milliseconds(60);
        let schedule = Schedule::windowed(Duration::from_millis(10), Some(start_at), None);
        let begin = std::time::Instant::now();
        let waited = schedule.wait(None).await;
        assert_eq!(waited.state, ScheduleState::Active);
        assert!(begin.elapsed() >= Duration::from_millis(40));
        assert_eq!(waited.at, start_at);
    }

    #[tokio::test]
    async fn test_windowed_invalid_window() {
        let now = Utc::now();
        let schedule = Schedule::windowed(
            Duration::from_millis(10),
            Some(now),
            Some(now - chrono::Duration::seconds(1)),
        );
        assert!(schedule.validate().is_err());
    }

    #[tokio::test]
    async fn test_cron_validate() {
        assert!(Schedule::cron("*/1 * * * * *").validate().is_ok());
        assert!(Schedule::cron("not a cron").validate().is_err());
    }

    #[tokio::test]
    async fn test_cron_malformed_returns_error_state() {
        let schedule = Schedule::cron("not a cron");
        let waited = schedule.wait(None).await;
        assert_eq!(waited.state, ScheduleState::Error);
    }

    #[tokio::test]
    async fn test_cron_fires_every_second() {
        let schedule = Schedule::cron("* * * * * *");
        let start = std::time::Instant::now();
        let waited = schedule.wait(None).await;
        assert_eq!(waited.state, ScheduleState::Active);
        assert!(start.elapsed() <= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_cron_counts_missed_ticks() {
        let schedule = Schedule::cron("* * * * * *");
        let last = Utc::now() - chrono::Duration::seconds(5);
        let waited = schedule.wait(Some(last)).await;
        assert_eq!(waited.state, ScheduleState::Active);
        assert!(waited.missed >= 3, "missed = {}", waited.missed);
    }
}
