use keeldb::{Database, Error, ErrorKind, QueryResult, Session, Value};

fn session_with(sql: &str) -> (Database, Session) {
    let db = Database::new();
    let mut session = db.session();
    session.execute(sql).unwrap();
    (db, session)
}

fn ints(result: &QueryResult, column: &str) -> Vec<i64> {
    let i = result.column_index(column).unwrap();
    result
        .rows
        .iter()
        .map(|row| match row.get(i) {
            Some(Value::Integer(n)) => *n,
            other => panic!("expected integer in '{}', got {:?}", column, other),
        })
        .collect()
}

#[test]
fn test_defaults_and_auto_increment() {
    let (_db, mut s) = session_with(
        "CREATE TABLE tickets (
            id SERIAL PRIMARY KEY,
            subject TEXT NOT NULL,
            status VARCHAR(10) DEFAULT 'open'
        )",
    );

    s.execute("INSERT INTO tickets (subject) VALUES ('printer'), ('badge')")
        .unwrap();
    s.execute("INSERT INTO tickets (subject, status) VALUES ('vpn', 'closed')")
        .unwrap();

    let result = s
        .execute("SELECT id, status FROM tickets ORDER BY id")
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![1, 2, 3]);
    assert_eq!(result.value(0, "status"), Some(&Value::from("open")));
    assert_eq!(result.value(2, "status"), Some(&Value::from("closed")));

    // An explicit key moves the sequence past it
    s.execute("INSERT INTO tickets (id, subject) VALUES (10, 'desk')")
        .unwrap();
    s.execute("INSERT INTO tickets (subject) VALUES ('chair')")
        .unwrap();
    let result = s
        .execute("SELECT id FROM tickets WHERE subject = 'chair'")
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![11]);
}

#[test]
fn test_varchar_length_is_enforced() {
    let (_db, mut s) = session_with("CREATE TABLE codes (code VARCHAR(3))");
    let err = s.execute("INSERT INTO codes VALUES ('ABCD')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    s.execute("INSERT INTO codes VALUES ('ABC')").unwrap();
}

#[test]
fn test_decimal_columns_round_half_away_from_zero() {
    let (_db, mut s) =
        session_with("CREATE TABLE prices (id INTEGER PRIMARY KEY, amount DECIMAL(10,2))");
    s.execute("INSERT INTO prices VALUES (1, 1.005), (2, -1.005), (3, 2.994)")
        .unwrap();

    let result = s.execute("SELECT amount FROM prices ORDER BY id").unwrap();
    let amounts: Vec<String> = result
        .rows
        .iter()
        .map(|r| r.get(0).unwrap().to_string())
        .collect();
    assert_eq!(amounts, vec!["1.01", "-1.01", "2.99"]);
}

#[test]
fn test_alter_table_add_and_drop_column() {
    let (_db, mut s) = session_with(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name VARCHAR(20));
         INSERT INTO items VALUES (1, 'bolt'), (2, 'nut');",
    );

    s.execute("ALTER TABLE items ADD COLUMN qty INTEGER DEFAULT 0")
        .unwrap();
    let result = s.execute("SELECT qty FROM items ORDER BY id").unwrap();
    assert_eq!(ints(&result, "qty"), vec![0, 0]);

    // Existing rows have no value for a NOT NULL column without a default
    let err = s
        .execute("ALTER TABLE items ADD COLUMN weight INTEGER NOT NULL")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert!(s.execute("SELECT weight FROM items").is_err());

    s.execute("ALTER TABLE items DROP COLUMN name").unwrap();
    let err = s.execute("SELECT name FROM items").unwrap_err();
    assert!(matches!(err, Error::ColumnNotFound(..)), "{:?}", err);
    s.execute("ALTER TABLE items DROP COLUMN IF EXISTS name").unwrap();

    s.execute("INSERT INTO items (id) VALUES (3)").unwrap();
    let result = s.execute("SELECT * FROM items WHERE id = 3").unwrap();
    assert_eq!(result.columns, vec!["id", "qty"]);
    assert_eq!(result.value(0, "qty"), Some(&Value::Integer(0)));
}

#[test]
fn test_alter_column_type_rejects_narrowing() {
    let (_db, mut s) = session_with(
        "CREATE TABLE readings (id INTEGER PRIMARY KEY, value INTEGER);
         INSERT INTO readings VALUES (1, 12), (2, 100000);",
    );

    let err = s
        .execute("ALTER TABLE readings ALTER COLUMN value TYPE SMALLINT")
        .unwrap_err();
    assert!(matches!(err, Error::TypeNarrowing { .. }), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);

    s.execute("DELETE FROM readings WHERE id = 2").unwrap();
    s.execute("ALTER TABLE readings ALTER COLUMN value TYPE SMALLINT")
        .unwrap();
    s.execute("ALTER TABLE readings ALTER COLUMN value TYPE BIGINT")
        .unwrap();
    let result = s.execute("SELECT value FROM readings").unwrap();
    assert_eq!(ints(&result, "value"), vec![12]);
}

#[test]
fn test_alter_table_constraints() {
    let (_db, mut s) = session_with(
        "CREATE TABLE staff (id INTEGER PRIMARY KEY, email VARCHAR(50), salary INTEGER);
         INSERT INTO staff VALUES (1, 'a@x', 100), (2, 'a@x', -5);",
    );

    let err = s
        .execute("ALTER TABLE staff ADD CONSTRAINT positive_salary CHECK (salary > 0)")
        .unwrap_err();
    assert!(matches!(err, Error::CheckViolation(_)), "{:?}", err);

    let err = s
        .execute("ALTER TABLE staff ADD CONSTRAINT unique_email UNIQUE (email)")
        .unwrap_err();
    assert!(matches!(err, Error::UniqueViolation(_)), "{:?}", err);

    s.execute("UPDATE staff SET salary = 5, email = 'b@x' WHERE id = 2")
        .unwrap();
    s.execute("ALTER TABLE staff ADD CONSTRAINT positive_salary CHECK (salary > 0)")
        .unwrap();
    s.execute("ALTER TABLE staff ADD CONSTRAINT unique_email UNIQUE (email)")
        .unwrap();

    let err = s
        .execute("INSERT INTO staff VALUES (3, 'c@x', 0)")
        .unwrap_err();
    assert!(matches!(err, Error::CheckViolation(_)), "{:?}", err);
    let err = s
        .execute("INSERT INTO staff VALUES (3, 'a@x', 10)")
        .unwrap_err();
    assert!(matches!(err, Error::UniqueViolation(_)), "{:?}", err);

    s.execute("ALTER TABLE staff DROP CONSTRAINT positive_salary")
        .unwrap();
    s.execute("INSERT INTO staff VALUES (3, 'c@x', 0)").unwrap();

    s.execute("ALTER TABLE staff ALTER COLUMN email SET NOT NULL")
        .unwrap();
    let err = s
        .execute("INSERT INTO staff VALUES (4, NULL, 1)")
        .unwrap_err();
    assert!(matches!(err, Error::NullNotAllowed { .. }), "{:?}", err);
}

#[test]
fn test_rename_table() {
    let (db, mut s) = session_with(
        "CREATE TABLE draft (id INTEGER PRIMARY KEY);
         INSERT INTO draft VALUES (1);",
    );

    s.execute("ALTER TABLE draft RENAME TO final").unwrap();
    assert!(s.execute("SELECT * FROM draft").is_err());
    let result = s.execute("SELECT id FROM final").unwrap();
    assert_eq!(ints(&result, "id"), vec![1]);
    assert_eq!(db.catalog().list_tables(), vec!["final".to_string()]);
}

#[test]
fn test_indexes() {
    let (db, mut s) = session_with(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, city VARCHAR(20), badge INTEGER);
         INSERT INTO people VALUES (1, 'Oslo', 7), (2, 'Lima', 7), (3, 'Oslo', 9);",
    );

    s.execute("CREATE INDEX idx_city ON people (city)").unwrap();
    let err = s
        .execute("CREATE INDEX idx_city ON people (badge)")
        .unwrap_err();
    assert!(matches!(err, Error::IndexAlreadyExists(_)), "{:?}", err);
    s.execute("CREATE INDEX IF NOT EXISTS idx_city ON people (badge)")
        .unwrap();

    let result = s
        .execute("SELECT id FROM people WHERE city = 'Oslo' ORDER BY id")
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![1, 3]);

    // Index lookups see later writes
    s.execute("UPDATE people SET city = 'Oslo' WHERE id = 2").unwrap();
    s.execute("DELETE FROM people WHERE id = 3").unwrap();
    let result = s
        .execute("SELECT id FROM people WHERE city = 'Oslo' ORDER BY id")
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![1, 2]);

    let err = s
        .execute("CREATE UNIQUE INDEX idx_badge ON people (badge)")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert!(db.catalog().get_index("idx_badge").is_err());

    s.execute("DROP INDEX idx_city").unwrap();
    s.execute("DROP INDEX IF EXISTS idx_city").unwrap();
    let err = s.execute("DROP INDEX idx_city").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogError);

    let result = s
        .execute("SELECT id FROM people WHERE city = 'Oslo' ORDER BY id")
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![1, 2]);
}

#[test]
fn test_unique_allows_multiple_nulls() {
    let (_db, mut s) = session_with("CREATE TABLE tags (id INTEGER PRIMARY KEY, label VARCHAR(10) UNIQUE)");
    s.execute("INSERT INTO tags VALUES (1, NULL), (2, NULL), (3, 'x')")
        .unwrap();
    let err = s.execute("INSERT INTO tags VALUES (4, 'x')").unwrap_err();
    assert!(matches!(err, Error::UniqueViolation(_)), "{:?}", err);
}

#[test]
fn test_drop_referenced_table() {
    let (db, mut s) = session_with(
        "CREATE TABLE teams (id INTEGER PRIMARY KEY);
         CREATE TABLE players (id INTEGER PRIMARY KEY, team_id INTEGER REFERENCES teams(id));
         INSERT INTO teams VALUES (1);
         INSERT INTO players VALUES (1, 1);",
    );

    let err = s.execute("DROP TABLE teams").unwrap_err();
    assert!(matches!(err, Error::ForeignKeyReferenced { .. }), "{:?}", err);

    s.execute("DROP TABLE teams CASCADE").unwrap();
    assert_eq!(db.catalog().list_tables(), vec!["players".to_string()]);
    // The foreign key went with the parent
    s.execute("INSERT INTO players VALUES (2, 42)").unwrap();
}

#[test]
fn test_foreign_key_actions() {
    let (_db, mut s) = session_with(
        "CREATE TABLE departments (code VARCHAR(5) PRIMARY KEY);
         CREATE TABLE employees (
             id INTEGER PRIMARY KEY,
             dept VARCHAR(5) REFERENCES departments(code) ON DELETE SET NULL ON UPDATE CASCADE
         );
         CREATE TABLE badges (
             id INTEGER PRIMARY KEY,
             dept VARCHAR(5) REFERENCES departments(code) ON DELETE RESTRICT
         );
         INSERT INTO departments VALUES ('ENG'), ('OPS'), ('HR');
         INSERT INTO employees VALUES (1, 'ENG'), (2, 'ENG'), (3, 'OPS');
         INSERT INTO badges VALUES (1, 'HR');",
    );

    let err = s.execute("INSERT INTO employees VALUES (4, 'XYZ')").unwrap_err();
    assert!(matches!(err, Error::ForeignKeyViolation(_)), "{:?}", err);
    // NULL references nothing
    s.execute("INSERT INTO employees VALUES (4, NULL)").unwrap();

    s.execute("UPDATE departments SET code = 'DEV' WHERE code = 'ENG'")
        .unwrap();
    let result = s
        .execute("SELECT id FROM employees WHERE dept = 'DEV' ORDER BY id")
        .unwrap();
    assert_eq!(ints(&result, "id"), vec![1, 2]);

    s.execute("DELETE FROM departments WHERE code = 'OPS'").unwrap();
    let result = s
        .execute("SELECT dept FROM employees WHERE id = 3")
        .unwrap();
    assert_eq!(result.value(0, "dept"), Some(&Value::Null));

    let err = s
        .execute("DELETE FROM departments WHERE code = 'HR'")
        .unwrap_err();
    assert!(matches!(err, Error::ForeignKeyViolation(_)), "{:?}", err);

    // Changing a child to a missing parent fails too
    let err = s
        .execute("UPDATE badges SET dept = 'NOPE' WHERE id = 1")
        .unwrap_err();
    assert!(matches!(err, Error::ForeignKeyViolation(_)), "{:?}", err);
}

#[test]
fn test_no_action_checked_at_statement_end() {
    let (_db, mut s) = session_with(
        "CREATE TABLE nodes (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES nodes(id));
         INSERT INTO nodes VALUES (1, NULL), (2, 1), (3, 2);",
    );

    // Deleting a whole chain in one statement leaves no dangling reference
    let result = s.execute("DELETE FROM nodes WHERE id >= 2").unwrap();
    assert_eq!(result.affected_rows, 2);

    s.execute("INSERT INTO nodes VALUES (2, 1)").unwrap();
    let err = s.execute("DELETE FROM nodes WHERE id = 1").unwrap_err();
    assert!(matches!(err, Error::ForeignKeyViolation(_)), "{:?}", err);

    // Parent and child together are fine
    s.execute("DELETE FROM nodes").unwrap();
}

#[test]
fn test_describe_table() {
    let (db, _s) = session_with(
        "CREATE TABLE gadgets (id INTEGER PRIMARY KEY, label VARCHAR(30) NOT NULL)",
    );
    let description = db.catalog().describe_table("gadgets").unwrap();
    assert!(description.contains("gadgets"));
    assert!(description.contains("label"));
}
