// ==========================================
// 工地物资申领履约系统 - 引擎层变更发布
// ==========================================
// 职责: 定义变更快照发布 trait，实现依赖倒置
// 说明: Engine 层定义 trait，store 层的 ChangeFeed 实现
// 约定: 只在事务提交之后发布；投递语义为“至少一次”
// ==========================================

use crate::store::path::LedgerPath;
use crate::store::snapshot::Snapshot;
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;

/// 变更发布者 Trait
///
/// # 实现说明
/// - `store::feed::ChangeFeed` 实现此 trait（tokio broadcast）
/// - 测试中可使用 `NoOpPublisher`
pub trait ChangePublisher: Send + Sync {
    /// 发布变更快照
    ///
    /// # 返回
    /// - `Ok(n)`: 收到快照的订阅者数量（可为 0）
    /// - `Err`: 发布失败
    fn publish(&self, snapshot: Snapshot) -> Result<usize, Box<dyn Error + Send + Sync>>;
}

/// 空操作发布者
///
/// 用于不需要变更通知的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpPublisher;

impl ChangePublisher for NoOpPublisher {
    fn publish(&self, snapshot: Snapshot) -> Result<usize, Box<dyn Error + Send + Sync>> {
        tracing::debug!("NoOpPublisher: 跳过变更发布 - path={}", snapshot.path);
        Ok(0)
    }
}

/// 可选的发布者包装
///
/// 简化 Option<Arc<dyn ChangePublisher>> 的使用；发布失败只记录告警，不影响已提交的写入
#[derive(Clone)]
pub struct OptionalPublisher {
    inner: Option<Arc<dyn ChangePublisher>>,
}

impl OptionalPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn ChangePublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布变更）
    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn from_option(publisher: Option<Arc<dyn ChangePublisher>>) -> Self {
        Self { inner: publisher }
    }

    /// 发布快照（如果有发布者）
    pub fn publish(&self, snapshot: Snapshot) {
        let Some(publisher) = &self.inner else {
            tracing::debug!("OptionalPublisher: 未配置发布者，跳过 - path={}", snapshot.path);
            return;
        };

        let path = snapshot.path.to_string();
        if let Err(e) = publisher.publish(snapshot) {
            tracing::warn!(path = %path, error = %e, "变更快照发布失败");
        }
    }

    /// 将实体序列化为快照后发布
    pub fn publish_entity<T: Serialize>(&self, path: LedgerPath, entity: &T) {
        if !self.is_configured() {
            return;
        }
        match Snapshot::of(path, entity) {
            Ok(snapshot) => self.publish(snapshot),
            Err(e) => tracing::warn!(error = %e, "变更快照构造失败"),
        }
    }

    /// 批量发布
    pub fn publish_all(&self, snapshots: impl IntoIterator<Item = Snapshot>) {
        for snapshot in snapshots {
            self.publish(snapshot);
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        paths: Mutex<Vec<String>>,
    }

    impl ChangePublisher for RecordingPublisher {
        fn publish(&self, snapshot: Snapshot) -> Result<usize, Box<dyn Error + Send + Sync>> {
            self.paths.lock().unwrap().push(snapshot.path.to_string());
            Ok(1)
        }
    }

    struct FailingPublisher;

    impl ChangePublisher for FailingPublisher {
        fn publish(&self, _snapshot: Snapshot) -> Result<usize, Box<dyn Error + Send + Sync>> {
            Err("feed closed".into())
        }
    }

    #[test]
    fn test_optional_publisher_forwards() {
        let recorder = Arc::new(RecordingPublisher::default());
        let publisher = OptionalPublisher::with_publisher(recorder.clone());
        assert!(publisher.is_configured());

        publisher.publish_all(vec![
            Snapshot::absent(LedgerPath::material("m1")),
            Snapshot::absent(LedgerPath::project("p1")),
        ]);
        assert_eq!(
            *recorder.paths.lock().unwrap(),
            vec!["materials/m1".to_string(), "projects/p1".to_string()]
        );
    }

    #[test]
    fn test_optional_publisher_swallows_failure() {
        let publisher = OptionalPublisher::with_publisher(Arc::new(FailingPublisher));
        publisher.publish(Snapshot::absent(LedgerPath::material("m1")));
        assert!(!OptionalPublisher::none().is_configured());
    }
}
