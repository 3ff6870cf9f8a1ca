use super::*;
use crate::engine::test_support::{memory_db, seed_material, seed_project};
use crate::store::feed::ChangeFeed;

fn coordinator(conn: &SharedConnection) -> FulfillmentCoordinator {
    FulfillmentCoordinator::new(conn.clone(), OptionalPublisher::none())
}

fn worker() -> Requester {
    Requester::new("u1", "worker1")
}

#[test]
fn test_approve_deducts_stock_and_charges_budget() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 30, &worker()).unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.total_cost, 300.0);
    assert_eq!(request.material_name, "Material M");

    let outcome = engine.approve(&request.request_id, None, "manager").unwrap();
    assert_eq!(outcome.material.quantity, 70);
    assert_eq!(outcome.project.spent, 300.0);
    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert!(outcome.request.responded_at.is_some());
    assert!(!outcome.request.delivery_assigned);
    assert!(outcome.message.contains("-30"));

    assert_eq!(engine.get_material("M").unwrap().quantity, 70);
    assert_eq!(engine.get_project("P").unwrap().spent, 300.0);
}

#[test]
fn test_insufficient_stock_leaves_records_unchanged() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 150, &worker()).unwrap();
    let material_before = engine.get_material("M").unwrap();

    let err = engine.approve(&request.request_id, None, "manager").unwrap_err();
    assert_eq!(
        err,
        EngineError::InsufficientStock {
            material_id: "M".to_string(),
            available: 100,
            requested: 150,
        }
    );
    assert!(err.to_string().contains("100"));
    assert!(err.to_string().contains("150"));

    assert_eq!(engine.get_material("M").unwrap(), material_before);
    assert_eq!(engine.get_project("P").unwrap().spent, 0.0);
    assert_eq!(
        engine.get_request(&request.request_id).unwrap().status,
        RequestStatus::Pending
    );
}

#[test]
fn test_budget_exceeded_leaves_records_unchanged() {
    let conn = memory_db();
    seed_material(&conn, "M", "Steel", 10.0, 100);
    seed_project(&conn, "P", 1000.0, 900.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 15, &worker()).unwrap();
    assert_eq!(request.total_cost, 150.0);

    let err = engine.approve(&request.request_id, None, "manager").unwrap_err();
    match err {
        EngineError::BudgetExceeded {
            project_id,
            available,
            requested,
        } => {
            assert_eq!(project_id, "P");
            assert!((available - 100.0).abs() < 1e-9);
            assert!((requested - 150.0).abs() < 1e-9);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(engine.get_project("P").unwrap().spent, 900.0);
    assert_eq!(engine.get_material("M").unwrap().quantity, 100);
}

#[test]
fn test_budget_boundary_is_inclusive() {
    let conn = memory_db();
    seed_material(&conn, "M", "Steel", 10.0, 100);
    seed_project(&conn, "P", 1000.0, 900.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 10, &worker()).unwrap();
    let outcome = engine.approve(&request.request_id, None, "manager").unwrap();
    assert_eq!(outcome.project.spent, 1000.0);
    assert_eq!(outcome.project.remaining(), 0.0);
}

#[test]
fn test_reject_touches_only_the_request() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 30, &worker()).unwrap();
    let outcome = engine
        .respond(&request.request_id, Decision::Reject, Some("not needed"), "manager")
        .unwrap();

    assert_eq!(outcome.request().status, RequestStatus::Rejected);
    assert_eq!(outcome.request().response_message.as_deref(), Some("not needed"));
    assert_eq!(engine.get_material("M").unwrap().quantity, 100);
    assert_eq!(engine.get_project("P").unwrap().spent, 0.0);
}

#[test]
fn test_second_response_is_already_resolved() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 30, &worker()).unwrap();
    engine.approve(&request.request_id, None, "manager").unwrap();

    let again = engine
        .respond(&request.request_id, Decision::Approve, None, "manager")
        .unwrap_err();
    assert!(matches!(again, EngineError::AlreadyResolved { ref status, .. } if status == "approved"));

    let reject = engine.reject(&request.request_id, None, "manager").unwrap_err();
    assert!(matches!(reject, EngineError::AlreadyResolved { .. }));

    // 只扣减一次
    assert_eq!(engine.get_material("M").unwrap().quantity, 70);
    assert_eq!(engine.get_project("P").unwrap().spent, 300.0);
}

#[test]
fn test_respond_unknown_request_is_not_found() {
    let conn = memory_db();
    let engine = coordinator(&conn);
    let err = engine.approve("missing", None, "manager").unwrap_err();
    assert_eq!(err, EngineError::not_found("MaterialRequest", "missing"));
}

#[test]
fn test_submit_validation() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    assert!(matches!(
        engine.submit_request("M", "P", 0, &worker()),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.submit_request("M", "P", -5, &worker()),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.submit_request("M", "P", 1, &Requester::new("u1", "  ")),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.submit_request("X", "P", 1, &worker()),
        Err(EngineError::NotFound { .. })
    ));
    assert!(matches!(
        engine.submit_request("M", "X", 1, &worker()),
        Err(EngineError::NotFound { .. })
    ));
    assert!(engine.list_requests().unwrap().is_empty());
}

#[test]
fn test_spent_equals_sum_of_approved_costs() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 12.5, 1000);
    seed_project(&conn, "P", 5_000.0, 0.0);
    let engine = coordinator(&conn);

    let mut expected = 0.0;
    for (i, qty) in [10, 20, 30, 40, 500].iter().enumerate() {
        let request = engine.submit_request("M", "P", *qty, &worker()).unwrap();
        let result = if i % 2 == 0 {
            engine.approve(&request.request_id, None, "manager").map(|_| ())
        } else {
            engine.reject(&request.request_id, None, "manager").map(|_| ())
        };
        if result.is_ok() && i % 2 == 0 {
            expected += request.total_cost;
        }
    }

    let approved_sum: f64 = engine
        .list_requests()
        .unwrap()
        .iter()
        .filter(|r| r.status == RequestStatus::Approved && r.project_id == "P")
        .map(|r| r.total_cost)
        .sum();
    let spent = engine.get_project("P").unwrap().spent;
    assert!((spent - approved_sum).abs() < 1e-6);
    assert!((spent - expected).abs() < 1e-6);
}

#[test]
fn test_price_change_applies_to_new_requests_only() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    let first = engine.submit_request("M", "P", 10, &worker()).unwrap();
    engine.update_material_price("M", 20.0, "operator").unwrap();
    let second = engine.submit_request("M", "P", 10, &worker()).unwrap();

    assert_eq!(first.total_cost, 100.0);
    assert_eq!(second.total_cost, 200.0);
    assert!(matches!(
        engine.update_material_price("M", -1.0, "operator"),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn test_restock_and_top_up_unblock_approval() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 5);
    seed_project(&conn, "P", 50.0, 0.0);
    let engine = coordinator(&conn);

    let request = engine.submit_request("M", "P", 10, &worker()).unwrap();
    assert!(matches!(
        engine.approve(&request.request_id, None, "manager"),
        Err(EngineError::InsufficientStock { .. })
    ));

    let restock = engine.restock_material("M", 10, "operator").unwrap();
    assert_eq!(restock.previous_quantity, 5);
    assert_eq!(restock.material.quantity, 15);
    assert!(matches!(
        engine.approve(&request.request_id, None, "manager"),
        Err(EngineError::BudgetExceeded { .. })
    ));

    let top_up = engine.top_up_budget("P", 100.0, "finance").unwrap();
    assert_eq!(top_up.project.budget, 150.0);

    let outcome = engine.approve(&request.request_id, None, "manager").unwrap();
    assert_eq!(outcome.material.quantity, 5);
    assert_eq!(outcome.project.spent, 100.0);

    assert!(matches!(
        engine.restock_material("M", 0, "operator"),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.top_up_budget("P", -1.0, "finance"),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.restock_material("missing", 1, "operator"),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn test_restock_overflow_is_rejected_as_bad_input() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 5);
    let engine = coordinator(&conn);

    let err = engine.restock_material("M", i64::MAX, "operator").unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
    assert!(!err.is_retryable());

    // 回滚后库存与日志不变，后续补货照常
    assert_eq!(engine.get_material("M").unwrap().quantity, 5);
    let restock = engine.restock_material("M", 3, "operator").unwrap();
    assert_eq!(restock.material.quantity, 8);
}

#[test]
fn test_create_material_and_project_fill_defaults() {
    let conn = memory_db();
    let engine = coordinator(&conn);

    let material = engine
        .create_material(
            NewMaterial {
                name: "  Rebar ".to_string(),
                category: None,
                unit_type: None,
                price: 4.5,
                quantity: 10,
                supplier: None,
                description: None,
            },
            "operator",
        )
        .unwrap();
    assert_eq!(material.name, "Rebar");
    assert_eq!(material.category, "Uncategorized");
    assert_eq!(material.unit_type, "unit");

    let project = engine.create_project("Tower B", 2500.0, "operator").unwrap();
    assert_eq!(project.spent, 0.0);

    assert_eq!(engine.list_materials().unwrap().len(), 1);
    assert_eq!(engine.list_projects().unwrap().len(), 1);
    assert!(matches!(
        engine.create_material(NewMaterial::simple("Sand", "Aggregate", 1.0, -1), "operator"),
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_project("", 10.0, "operator"),
        Err(EngineError::Validation(_))
    ));
}

#[test]
fn test_every_write_is_logged() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let engine = coordinator(&conn);

    let approved = engine.submit_request("M", "P", 10, &worker()).unwrap();
    let rejected = engine.submit_request("M", "P", 10, &worker()).unwrap();
    engine.approve(&approved.request_id, None, "manager").unwrap();
    engine.reject(&rejected.request_id, Some("dup"), "manager").unwrap();
    // 失败的批准不留日志
    let _ = engine.approve(&rejected.request_id, None, "manager");

    let logs = ActionLogRepository::new(conn.clone());
    assert_eq!(logs.count_by_action_type("SubmitRequest").unwrap(), 2);
    assert_eq!(logs.count_by_action_type("ApproveRequest").unwrap(), 1);
    assert_eq!(logs.count_by_action_type("RejectRequest").unwrap(), 1);

    let trail = logs
        .find_by_entity("material_requests", &approved.request_id)
        .unwrap();
    assert_eq!(trail.len(), 2);
}

#[test]
fn test_snapshots_published_after_commit() {
    let conn = memory_db();
    seed_material(&conn, "M", "Cement", 10.0, 100);
    seed_project(&conn, "P", 10_000.0, 0.0);
    let feed = Arc::new(ChangeFeed::new(16));
    let mut sub = feed.subscribe(None);
    let engine = FulfillmentCoordinator::new(conn.clone(), OptionalPublisher::with_publisher(feed.clone()));

    let request = engine.submit_request("M", "P", 30, &worker()).unwrap();
    engine.approve(&request.request_id, None, "manager").unwrap();

    let mut paths = Vec::new();
    while let Some(Ok(snapshot)) = sub.try_recv() {
        paths.push(snapshot.path.to_string());
    }
    assert_eq!(
        paths,
        vec![
            format!("material_requests/{}", request.request_id),
            "materials/M".to_string(),
            "projects/P".to_string(),
            format!("material_requests/{}", request.request_id),
        ]
    );

    // 失败的写入不发布
    let rejected = engine.submit_request("M", "P", 500, &worker()).unwrap();
    let _ = sub.try_recv();
    assert!(engine.approve(&rejected.request_id, None, "manager").is_err());
    assert!(sub.try_recv().is_none());
}
