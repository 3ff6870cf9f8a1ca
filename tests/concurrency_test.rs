// ==========================================
// 并发审批测试
// ==========================================
// 职责: 多线程同时审批/盘点时，库存与预算红线保持成立
// ==========================================


#[cfg(test)]
mod concurrency_test {
    use site_supply::domain::RequestStatus;
    use site_supply::engine::EngineError;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::test_helpers::*;

    #[test]
    fn test_concurrent_approvals_never_oversell_or_overspend() {
        let (_tmp, _path, state) = create_test_state();
        let cement = seed_material(&state, "Cement", "Concrete", 10.0, 100);
        let tower = seed_project(&state, "Tower A", 1000.0);

        let requests: Vec<String> = (0..10)
            .map(|_| submit(&state, &cement.material_id, &tower.project_id, 15).request_id)
            .collect();

        let barrier = Arc::new(Barrier::new(requests.len()));
        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request_id| {
                let coordinator = state.coordinator.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    coordinator.approve(&request_id, None, OPERATOR)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let approved = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(approved, 6);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(
                err,
                EngineError::InsufficientStock { .. } | EngineError::BudgetExceeded { .. }
            ));
        }

        let material = state.coordinator.get_material(&cement.material_id).unwrap();
        let project = state.coordinator.get_project(&tower.project_id).unwrap();
        assert!(material.quantity >= 0);
        assert_eq!(material.quantity, 100 - 15 * approved as i64);

        let approved_cost: f64 = state
            .coordinator
            .list_requests()
            .unwrap()
            .iter()
            .filter(|r| r.project_id == tower.project_id && r.status == RequestStatus::Approved)
            .map(|r| r.total_cost)
            .sum();
        assert!((project.spent - approved_cost).abs() < 1e-9);
        assert!(project.spent <= project.budget + 1e-9);
    }

    #[test]
    fn test_racing_responses_resolve_request_once() {
        let (_tmp, _path, state) = create_test_state();
        let cement = seed_material(&state, "Cement", "Concrete", 10.0, 100);
        let tower = seed_project(&state, "Tower A", 1000.0);
        let request_id = submit(&state, &cement.material_id, &tower.project_id, 10).request_id;

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = state.coordinator.clone();
                let barrier = barrier.clone();
                let request_id = request_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        coordinator.approve(&request_id, None, OPERATOR).map(|_| ())
                    } else {
                        coordinator.reject(&request_id, None, OPERATOR).map(|_| ())
                    }
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, EngineError::AlreadyResolved { .. })));

        let request = state.coordinator.get_request(&request_id).unwrap();
        let material = state.coordinator.get_material(&cement.material_id).unwrap();
        match request.status {
            RequestStatus::Approved => assert_eq!(material.quantity, 90),
            RequestStatus::Rejected => assert_eq!(material.quantity, 100),
            RequestStatus::Pending => panic!("申领应已被处理"),
        }
    }

    #[test]
    fn test_audit_racing_approvals_is_linearizable() {
        const APPROVERS: usize = 6;
        const QTY: i64 = 10;
        const INITIAL: i64 = 100;
        const ACTUAL: i64 = 50;

        for _ in 0..5 {
            let (_tmp, _path, state) = create_test_state();
            let cement = seed_material(&state, "Cement", "Concrete", 10.0, INITIAL);
            let tower = seed_project(&state, "Tower A", 10_000.0);
            let requests: Vec<String> = (0..APPROVERS)
                .map(|_| submit(&state, &cement.material_id, &tower.project_id, QTY).request_id)
                .collect();

            let barrier = Arc::new(Barrier::new(APPROVERS + 1));
            let approvers: Vec<_> = requests
                .iter()
                .cloned()
                .map(|request_id| {
                    let coordinator = state.coordinator.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        coordinator.approve(&request_id, None, OPERATOR)
                    })
                })
                .collect();
            let auditor = {
                let engine = state.audit_engine.clone();
                let barrier = barrier.clone();
                let material_id = cement.material_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.record_audit(&material_id, ACTUAL, "auditor")
                })
            };

            let results: Vec<_> = approvers.into_iter().map(|h| h.join().unwrap()).collect();
            let audit = auditor.join().unwrap().unwrap().audit;

            // 盘点看到的账面数量 = 初始 - 在它之前提交的批准
            let recorded = audit.recorded_quantity;
            assert_eq!((INITIAL - recorded) % QTY, 0, "recorded={}", recorded);
            let before = (INITIAL - recorded) / QTY;
            assert!((0..=APPROVERS as i64).contains(&before));

            let mut after_quantities: Vec<i64> = Vec::new();
            let mut before_quantities: Vec<i64> = Vec::new();
            for result in &results {
                match result {
                    // 盘点前的批准剩余 >= recorded；盘点后的批准剩余 <= ACTUAL - QTY
                    Ok(outcome) if outcome.material.quantity >= recorded => {
                        before_quantities.push(outcome.material.quantity)
                    }
                    Ok(outcome) => after_quantities.push(outcome.material.quantity),
                    Err(err) => assert!(
                        matches!(err, EngineError::InsufficientStock { .. }),
                        "{err:?}"
                    ),
                }
            }
            before_quantities.sort_unstable_by(|a, b| b.cmp(a));
            after_quantities.sort_unstable_by(|a, b| b.cmp(a));

            let expected_before: Vec<i64> = (1..=before).map(|i| INITIAL - QTY * i).collect();
            let after = (APPROVERS as i64 - before).min(ACTUAL / QTY);
            let expected_after: Vec<i64> = (1..=after).map(|j| ACTUAL - QTY * j).collect();
            assert_eq!(before_quantities, expected_before);
            assert_eq!(after_quantities, expected_after);

            let material = state.coordinator.get_material(&cement.material_id).unwrap();
            assert_eq!(material.quantity, ACTUAL - QTY * after);

            let audits = state.audit_engine.audits_for(&cement.material_id).unwrap();
            assert_eq!(audits.len(), 1);
            assert_eq!(audits[0].recorded_quantity, recorded);
        }
    }
}
