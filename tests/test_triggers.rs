use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use keeldb::{
    Database, EngineConfig, Error, Session, TriggerContext, TriggerEvent, TriggerTiming, Value,
};

fn orders(db: &Database) -> Session {
    let mut session = db.session();
    session
        .execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer VARCHAR(30), total INTEGER);
             CREATE TABLE audit (entry SERIAL PRIMARY KEY, action VARCHAR(10), order_id INTEGER);",
        )
        .unwrap();
    session
}

fn count(session: &mut Session, sql: &str) -> i64 {
    match session.execute(sql).unwrap().rows[0].get(0) {
        Some(Value::Integer(n)) => *n,
        other => panic!("expected a count, got {:?}", other),
    }
}

fn audit(ctx: &mut TriggerContext<'_>) -> keeldb::Result<()> {
    let row = match ctx.event() {
        TriggerEvent::Delete => ctx.old_row(),
        _ => ctx.new_row(),
    };
    let id = row.and_then(|r| r.get(0)).cloned().unwrap_or(Value::Null);
    let action = ctx.event().to_string();
    ctx.execute_with_params(
        "INSERT INTO audit (action, order_id) VALUES ($1, $2)",
        &[Value::from(action), id],
    )?;
    Ok(())
}

#[test]
fn test_after_triggers_write_in_same_transaction() {
    let db = Database::new();
    let mut s = orders(&db);
    for event in [TriggerEvent::Insert, TriggerEvent::Update, TriggerEvent::Delete] {
        db.register_trigger("orders", event, TriggerTiming::After, audit);
    }

    s.execute("INSERT INTO orders VALUES (1, 'ada', 10), (2, 'bob', 20)")
        .unwrap();
    s.execute("UPDATE orders SET total = 30 WHERE id = 2").unwrap();
    s.execute("DELETE FROM orders WHERE id = 1").unwrap();

    let result = s
        .execute("SELECT action, order_id FROM audit ORDER BY entry")
        .unwrap();
    let actions: Vec<String> = result
        .rows
        .iter()
        .map(|r| r.get(0).map(|v| v.to_string()).unwrap_or_default())
        .collect();
    assert_eq!(actions, vec!["INSERT", "INSERT", "UPDATE", "DELETE"]);

    // Audit rows roll back with the write that caused them
    s.execute("BEGIN").unwrap();
    s.execute("INSERT INTO orders VALUES (3, 'cy', 5)").unwrap();
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM audit"), 5);
    s.execute("ROLLBACK").unwrap();
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM audit"), 4);
}

#[test]
fn test_before_trigger_rewrites_row() {
    let db = Database::new();
    let mut s = orders(&db);
    db.register_trigger("orders", TriggerEvent::Insert, TriggerTiming::Before, |ctx| {
        if let Some(Value::String(name)) = ctx.new_value("customer")?.cloned() {
            ctx.set_new_value("customer", name.to_uppercase())?;
        }
        Ok(())
    });
    db.register_trigger("orders", TriggerEvent::Update, TriggerTiming::Before, |ctx| {
        let old = ctx.old_value("total")?.cloned();
        let new = ctx.new_value("total")?.cloned();
        // Totals never go down
        if let (Some(Value::Integer(old)), Some(Value::Integer(new))) = (old, new) {
            if new < old {
                ctx.set_new_value("total", old)?;
            }
        }
        Ok(())
    });

    s.execute("INSERT INTO orders VALUES (1, 'ada', 10)").unwrap();
    s.execute("UPDATE orders SET total = 3 WHERE id = 1").unwrap();

    let result = s.execute("SELECT customer, total FROM orders").unwrap();
    assert_eq!(result.value(0, "customer"), Some(&Value::from("ADA")));
    assert_eq!(result.value(0, "total"), Some(&Value::Integer(10)));
}

#[test]
fn test_after_trigger_cannot_rewrite_row() {
    let db = Database::new();
    let mut s = orders(&db);
    db.register_trigger("orders", TriggerEvent::Insert, TriggerTiming::After, |ctx| {
        ctx.set_new_value("total", 0)
    });

    let err = s.execute("INSERT INTO orders VALUES (1, 'ada', 10)").unwrap_err();
    assert!(matches!(err, Error::TriggerFailed { .. }), "{:?}", err);
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM orders"), 0);
}

#[test]
fn test_trigger_failure_aborts_transaction() {
    let db = Database::new();
    let mut s = orders(&db);
    db.register_trigger("orders", TriggerEvent::Insert, TriggerTiming::Before, |ctx| {
        match ctx.new_value("total")? {
            Some(Value::Integer(n)) if *n > 1000 => Err(Error::ExecutionError(
                "order total over limit".to_string(),
            )),
            _ => Ok(()),
        }
    });

    s.execute("BEGIN").unwrap();
    s.execute("INSERT INTO orders VALUES (1, 'ada', 10)").unwrap();
    let err = s
        .execute("INSERT INTO orders VALUES (2, 'bob', 5000)")
        .unwrap_err();
    match &err {
        Error::TriggerFailed { table, message } => {
            assert_eq!(table, "orders");
            assert!(message.contains("over limit"));
        }
        other => panic!("unexpected error {:?}", other),
    }

    // The whole transaction is gone, not just the failing statement
    assert!(!s.in_transaction());
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM orders"), 0);
}

#[test]
fn test_trigger_nesting_limit() {
    let db = Database::open(EngineConfig::new().max_trigger_depth(3)).unwrap();
    let mut s = db.session();
    s.execute("CREATE TABLE chain (n INTEGER)").unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    db.register_trigger("chain", TriggerEvent::Insert, TriggerTiming::After, move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        let next = match ctx.new_value("n")? {
            Some(Value::Integer(n)) => n + 1,
            _ => 0,
        };
        ctx.execute(&format!("INSERT INTO chain VALUES ({})", next))?;
        Ok(())
    });

    let err = s.execute("INSERT INTO chain VALUES (0)").unwrap_err();
    assert!(matches!(err, Error::TriggerDepthExceeded(3)), "{:?}", err);
    assert_eq!(fired.load(Ordering::SeqCst), 4);
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM chain"), 0);

    assert_eq!(db.clear_triggers("chain"), 1);
    s.execute("INSERT INTO chain VALUES (0)").unwrap();
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM chain"), 1);
}

#[test]
fn test_triggers_fire_for_cascaded_deletes() {
    let db = Database::new();
    let mut s = db.session();
    s.execute(
        "CREATE TABLE parents (id INTEGER PRIMARY KEY);
         CREATE TABLE kids (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES parents(id) ON DELETE CASCADE);
         INSERT INTO parents VALUES (1);
         INSERT INTO kids VALUES (1, 1), (2, 1);",
    )
    .unwrap();

    let deleted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deleted);
    db.register_trigger("kids", TriggerEvent::Delete, TriggerTiming::Before, move |ctx| {
        assert!(ctx.old_row().is_some());
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    s.execute("DELETE FROM parents WHERE id = 1").unwrap();
    assert_eq!(deleted.load(Ordering::SeqCst), 2);
}
