//! 会话监管：每个 Space 一个，管理进行中请求的中断
//!
//! 每个请求拿到当前会话令牌的子令牌；cancel 取消当前令牌（中断所有进行中的请求）并换上新令牌，
//! 之后的请求不受影响。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// 会话级取消管理
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    token: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一个新请求创建子令牌
    pub fn request_token(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token()
    }

    /// 中断所有进行中的请求
    pub fn cancel(&self) {
        let previous = std::mem::take(&mut *self.token.lock().unwrap_or_else(|e| e.into_inner()));
        previous.cancel();
        tracing::info!("Session cancelled; in-flight requests aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_only_inflight_requests() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.request_token();
        supervisor.cancel();
        assert!(first.is_cancelled());

        let second = supervisor.request_token();
        assert!(!second.is_cancelled());
    }
}
