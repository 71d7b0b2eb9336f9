use keeldb::{Database, Error, ErrorKind, QueryResult, Session, Value};

fn setup(sql: &str) -> (Database, Session) {
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

fn count(session: &mut Session, sql: &str) -> i64 {
    let result = session.execute(sql).unwrap();
    match result.rows[0].get(0) {
        Some(Value::Integer(n)) => *n,
        other => panic!("expected a count, got {:?}", other),
    }
}

const AUTHORS_BOOKS: &str = "
    CREATE TABLE authors (author_id INTEGER PRIMARY KEY, name VARCHAR(100) NOT NULL);
    CREATE TABLE books (
        book_id INTEGER PRIMARY KEY,
        title VARCHAR(200) NOT NULL,
        author_id INTEGER REFERENCES authors(author_id),
        price DECIMAL(10,2) CHECK (price > 0)
    );
    INSERT INTO authors VALUES (1, 'Ursula'), (2, 'Stanislaw'), (3, 'Octavia');
    INSERT INTO books VALUES (10, 'Earthsea', 1, 10.00), (11, 'Dispossessed', 1, 20.00);
";

#[test]
fn test_constraint_violation_leaves_no_row() {
    let (_db, mut s) = setup(
        "CREATE TABLE items (
            id INTEGER PRIMARY KEY,
            sku VARCHAR(20) UNIQUE,
            qty INTEGER NOT NULL CHECK (qty >= 0)
        );
        INSERT INTO items VALUES (1, 'A-1', 5);",
    );

    let attempts = [
        "INSERT INTO items VALUES (2, 'B-2', NULL)",
        "INSERT INTO items VALUES (2, 'B-2', -1)",
        "INSERT INTO items VALUES (2, 'A-1', 1)",
        "INSERT INTO items VALUES (1, 'C-3', 1)",
    ];
    for sql in attempts {
        let err = s.execute(sql).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation, "{}", sql);
        assert!(!err.is_retryable());
    }

    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM items"), 1);
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM items WHERE id = 2"), 0);
}

#[test]
fn test_insert_then_read_back_in_same_transaction() {
    let (_db, mut s) = setup(
        "CREATE TABLE events (
            id INTEGER PRIMARY KEY,
            label VARCHAR(50),
            amount DECIMAL(8,2),
            happened DATE,
            note TEXT
        )",
    );

    s.execute("BEGIN").unwrap();
    s.execute("INSERT INTO events VALUES (7, 'launch', 12.50, DATE '2024-03-01', NULL)")
        .unwrap();
    let result = s.execute("SELECT * FROM events WHERE id = 7").unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.value(0, "id"), Some(&Value::Integer(7)));
    assert_eq!(result.value(0, "label"), Some(&Value::from("launch")));
    assert_eq!(result.value(0, "amount").unwrap().to_string(), "12.50");
    assert_eq!(result.value(0, "happened").unwrap().to_string(), "2024-03-01");
    assert_eq!(result.value(0, "note"), Some(&Value::Null));
    s.execute("COMMIT").unwrap();
}

#[test]
fn test_drop_table_if_exists_is_idempotent() {
    let (db, mut s) = setup("CREATE TABLE scratch (id INTEGER)");

    s.execute("DROP TABLE IF EXISTS scratch").unwrap();
    s.execute("DROP TABLE IF EXISTS scratch").unwrap();
    assert!(db.catalog().list_tables().is_empty());

    let err = s.execute("DROP TABLE scratch").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogError);
}

#[test]
fn test_read_committed_never_sees_uncommitted_writes() {
    let (db, mut writer) = setup("CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER)");
    let mut reader = db.session();

    writer.execute("BEGIN").unwrap();
    writer.execute("INSERT INTO t VALUES (1, 100)").unwrap();
    assert_eq!(count(&mut reader, "SELECT COUNT(*) FROM t"), 0);

    writer.execute("COMMIT").unwrap();
    assert_eq!(count(&mut reader, "SELECT COUNT(*) FROM t"), 1);
}

#[test]
fn test_repeatable_read_returns_same_value_twice() {
    let (db, mut writer) = setup(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER);
         INSERT INTO t VALUES (1, 100);",
    );
    let mut reader = db.session();

    reader.execute("BEGIN ISOLATION LEVEL REPEATABLE READ").unwrap();
    let first = reader.execute("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(ints(&first, "v"), vec![100]);

    writer.execute("UPDATE t SET v = 200 WHERE id = 1").unwrap();

    let second = reader.execute("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(ints(&second, "v"), vec![100]);
    reader.execute("COMMIT").unwrap();

    let after = reader.execute("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(ints(&after, "v"), vec![200]);
}

#[test]
fn test_row_number_and_rank() {
    let (_db, mut s) = setup(
        "CREATE TABLE scores (player VARCHAR(20), points INTEGER);
         INSERT INTO scores VALUES ('a', 90), ('b', 80), ('c', 80), ('d', 70), ('e', 60);",
    );

    let result = s
        .execute(
            "SELECT player,
                    ROW_NUMBER() OVER (ORDER BY points DESC, player) AS rn,
                    RANK() OVER (ORDER BY points DESC) AS rnk
             FROM scores
             ORDER BY rn",
        )
        .unwrap();
    assert_eq!(ints(&result, "rn"), vec![1, 2, 3, 4, 5]);
    assert_eq!(ints(&result, "rnk"), vec![1, 2, 2, 4, 5]);
}

#[test]
fn test_authors_books_average_and_restricted_delete() {
    let (_db, mut s) = setup(AUTHORS_BOOKS);

    let result = s
        .execute("SELECT AVG(price) AS avg_price FROM books WHERE author_id = 1")
        .unwrap();
    assert_eq!(result.value(0, "avg_price").unwrap().to_string(), "15.00");

    let err = s.execute("DELETE FROM authors WHERE author_id = 1").unwrap_err();
    assert!(matches!(err, Error::ForeignKeyViolation(_)), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM authors"), 3);
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM books"), 2);

    // An author without books can go
    s.execute("DELETE FROM authors WHERE author_id = 3").unwrap();
    assert_eq!(count(&mut s, "SELECT COUNT(*) FROM authors"), 2);
}

#[test]
fn test_on_delete_cascade_removes_children() {
    let (_db, mut s) = setup(
        "CREATE TABLE authors (author_id INTEGER PRIMARY KEY, name VARCHAR(100));
         CREATE TABLE books (
             book_id INTEGER PRIMARY KEY,
             author_id INTEGER REFERENCES authors(author_id) ON DELETE CASCADE
         );
         INSERT INTO authors VALUES (1, 'Ursula'), (2, 'Stanislaw');
         INSERT INTO books VALUES (10, 1), (11, 1), (12, 2);",
    );

    let result = s.execute("DELETE FROM authors WHERE author_id = 1").unwrap();
    assert_eq!(result.affected_rows, 1);

    let remaining = s.execute("SELECT book_id FROM books ORDER BY book_id").unwrap();
    assert_eq!(ints(&remaining, "book_id"), vec![12]);
}

#[test]
fn test_limit_offset_pagination() {
    let (_db, mut s) = setup("CREATE TABLE pages (n INTEGER PRIMARY KEY)");
    let values: Vec<String> = (1..=12).map(|n| format!("({})", n)).collect();
    s.execute(&format!("INSERT INTO pages VALUES {}", values.join(", ")))
        .unwrap();

    let page = s
        .execute("SELECT n FROM pages ORDER BY n LIMIT 5 OFFSET 10")
        .unwrap();
    assert_eq!(ints(&page, "n"), vec![11, 12]);

    let past_end = s
        .execute("SELECT n FROM pages ORDER BY n LIMIT 5 OFFSET 20")
        .unwrap();
    assert!(past_end.rows.is_empty());
}

#[test]
fn test_left_join_keeps_unmatched_rows() {
    let (_db, mut s) = setup(
        "CREATE TABLE authors (author_id INTEGER PRIMARY KEY, name VARCHAR(100));
         CREATE TABLE books (book_id INTEGER PRIMARY KEY, author_id INTEGER, title VARCHAR(100));
         INSERT INTO authors VALUES (1, 'Ursula'), (2, 'Stanislaw'), (3, 'Octavia');
         INSERT INTO books VALUES (10, 1, 'Earthsea'), (11, 2, 'Solaris');",
    );

    let result = s
        .execute(
            "SELECT a.name, b.title
             FROM authors a LEFT JOIN books b ON a.author_id = b.author_id
             ORDER BY a.author_id",
        )
        .unwrap();
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.value(0, "title"), Some(&Value::from("Earthsea")));
    assert_eq!(result.value(1, "title"), Some(&Value::from("Solaris")));
    assert_eq!(result.value(2, "name"), Some(&Value::from("Octavia")));
    assert_eq!(result.value(2, "title"), Some(&Value::Null));
}
