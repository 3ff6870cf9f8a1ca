// ==========================================
// 自动派车流程测试
// ==========================================
// 职责: 订阅循环 + 全量对账在文件数据库上的端到端行为
// ==========================================


#[cfg(test)]
mod dispatch_flow_test {
    use chrono::Duration as ChronoDuration;
    use site_supply::app::AppState;
    use site_supply::domain::DispatchStatus;
    use site_supply::engine::{EngineError, ReconcileAction};
    use site_supply::store::{LedgerPath, Snapshot};
    use std::time::Duration;
    use tokio::sync::watch;

    use crate::test_helpers::*;

    async fn wait_for_dispatch(state: &AppState, request_id: &str) -> bool {
        for _ in 0..100 {
            if state.scheduler.dispatch_count_for_request(request_id).unwrap() > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_dispatches_approved_request_once() {
        let (_tmp, _path, state) = create_test_state();
        let driver_id = seed_driver(&state, "Zhang", "TRK-001");
        let cement = seed_material(&state, "Cement", "Concrete", 10.0, 100);
        let tower = seed_project(&state, "Tower A", 5000.0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = state.dispatch_watcher().spawn(shutdown_rx);

        let outcome = submit_and_approve(&state, &cement.material_id, &tower.project_id, 30);
        let request_id = outcome.request.request_id.clone();
        assert!(wait_for_dispatch(&state, &request_id).await);

        // 同一份“已批准未派车”快照重复投递
        let stale = Snapshot::of(LedgerPath::request(&request_id), &outcome.request).unwrap();
        state.feed.publish_snapshot(stale.clone());
        state.feed.publish_snapshot(stale);
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.duplicates, 2);
        assert_eq!(state.scheduler.dispatch_count_for_request(&request_id).unwrap(), 1);

        let dispatch = state.scheduler.get_dispatch(&request_id).unwrap();
        assert_eq!(dispatch.request_id.as_deref(), Some(request_id.as_str()));
        assert_eq!(dispatch.driver_id, driver_id);
        assert_eq!(dispatch.to_site, "Tower A");
        assert_eq!(dispatch.status, DispatchStatus::InTransit);
        assert_eq!(dispatch.eta - dispatch.dispatch_time, ChronoDuration::days(2));

        // 库存只在批准时扣减一次
        assert_eq!(state.coordinator.get_material(&cement.material_id).unwrap().quantity, 70);
        assert!(state.coordinator.get_request(&request_id).unwrap().delivery_assigned);
    }

    #[test]
    fn test_restart_reconcile_recovers_missed_dispatches() {
        let (_tmp, path, state) = create_test_state();
        let cement = seed_material(&state, "Cement", "Concrete", 10.0, 100);
        let tower = seed_project(&state, "Tower A", 5000.0);
        let first = submit_and_approve(&state, &cement.material_id, &tower.project_id, 10);
        let second = submit_and_approve(&state, &cement.material_id, &tower.project_id, 20);
        let pending = submit(&state, &cement.material_id, &tower.project_id, 5);

        // 没有司机: 本轮对账失败但可重试
        let report = state.scheduler.reconcile_all().unwrap();
        assert_eq!(report.missing, 2);
        assert!(report.created.is_empty());
        assert!(report.failed.iter().all(|f| f.retryable));
        drop(state);

        let restarted = AppState::new(path).unwrap();
        seed_driver(&restarted, "Li", "TRK-002");
        let report = restarted.scheduler.reconcile_all().unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.created.contains(&first.request.request_id));
        assert!(report.created.contains(&second.request.request_id));
        assert_eq!(
            restarted
                .scheduler
                .dispatch_count_for_request(&pending.request_id)
                .unwrap(),
            0
        );

        let again = restarted.scheduler.reconcile_all().unwrap();
        assert_eq!(again.missing, 0);
        assert_eq!(restarted.scheduler.list_dispatches(None).unwrap().len(), 2);
        assert_eq!(
            restarted.coordinator.get_material(&cement.material_id).unwrap().quantity,
            70
        );
    }

    #[test]
    fn test_reconcile_request_twice_is_idempotent() {
        let (_tmp, _path, state) = create_test_state();
        seed_driver(&state, "Zhang", "TRK-001");
        let cement = seed_material(&state, "Cement", "Concrete", 10.0, 100);
        let tower = seed_project(&state, "Tower A", 5000.0);
        let outcome = submit_and_approve(&state, &cement.material_id, &tower.project_id, 30);
        let request_id = &outcome.request.request_id;

        let first = state.scheduler.reconcile_request(request_id).unwrap();
        let second = state.scheduler.reconcile_request(request_id).unwrap();
        assert!(matches!(first, ReconcileAction::Created { .. }));
        assert!(matches!(second, ReconcileAction::AlreadyDispatched { .. }));
        assert_eq!(state.scheduler.dispatch_count_for_request(request_id).unwrap(), 1);
    }

    #[test]
    fn test_delivery_lifecycle() {
        let (_tmp, _path, state) = create_test_state();
        seed_driver(&state, "Zhang", "TRK-001");
        let cement = seed_material(&state, "Cement", "Concrete", 10.0, 100);
        let tower = seed_project(&state, "Tower A", 5000.0);
        let outcome = submit_and_approve(&state, &cement.material_id, &tower.project_id, 30);
        state.scheduler.reconcile_all().unwrap();
        let id = &outcome.request.request_id;

        let delivered = state
            .scheduler
            .update_status(id, DispatchStatus::Delivered, OPERATOR)
            .unwrap();
        assert!(delivered.dispatch.delivery_time.is_some());

        let err = state
            .scheduler
            .update_status(id, DispatchStatus::Delayed, OPERATOR)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
        assert_eq!(
            state.scheduler.list_dispatches(Some(DispatchStatus::Delivered)).unwrap().len(),
            1
        );
    }
}
