use keeldb::{Database, EngineConfig, Error, ErrorKind, QueryResult, Session, Value};

fn library() -> Session {
    let db = Database::new();
    let mut session = db.session();
    session
        .execute(
            "CREATE TABLE authors (author_id INTEGER PRIMARY KEY, name VARCHAR(100) NOT NULL, country VARCHAR(40));
             CREATE TABLE books (
                 book_id INTEGER PRIMARY KEY,
                 title VARCHAR(200) NOT NULL,
                 author_id INTEGER REFERENCES authors(author_id),
                 year INTEGER,
                 price DECIMAL(10,2)
             );
             INSERT INTO authors VALUES
                 (1, 'Le Guin', 'US'), (2, 'Lem', 'PL'), (3, 'Butler', 'US'), (4, 'Tokarczuk', 'PL');
             INSERT INTO books VALUES
                 (10, 'Earthsea', 1, 1968, 12.00),
                 (11, 'The Dispossessed', 1, 1974, 15.50),
                 (12, 'Solaris', 2, 1961, 9.99),
                 (13, 'Kindred', 3, 1979, 14.00),
                 (14, 'Parable of the Sower', 3, 1993, NULL),
                 (15, 'Fiasco', 2, 1986, 11.25);",
        )
        .unwrap();
    session
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

fn strings(result: &QueryResult, column: &str) -> Vec<String> {
    let i = result.column_index(column).unwrap();
    result
        .rows
        .iter()
        .map(|row| row.get(i).map(|v| v.to_string()).unwrap_or_default())
        .collect()
}

#[test]
fn test_where_order_and_distinct() {
    let mut s = library();

    let result = s
        .execute("SELECT title FROM books WHERE year BETWEEN 1960 AND 1975 ORDER BY year DESC")
        .unwrap();
    assert_eq!(
        strings(&result, "title"),
        vec!["The Dispossessed", "Earthsea", "Solaris"]
    );

    let result = s
        .execute("SELECT DISTINCT country FROM authors ORDER BY country")
        .unwrap();
    assert_eq!(strings(&result, "country"), vec!["PL", "US"]);

    let result = s
        .execute("SELECT title FROM books WHERE title LIKE 'The %' OR price IS NULL ORDER BY book_id")
        .unwrap();
    assert_eq!(
        strings(&result, "title"),
        vec!["The Dispossessed", "Parable of the Sower"]
    );
}

#[test]
fn test_order_by_is_stable() {
    let mut s = library();

    // Ties keep their scan order
    let result = s
        .execute("SELECT author_id, book_id FROM books ORDER BY author_id")
        .unwrap();
    assert_eq!(ints(&result, "book_id"), vec![10, 11, 12, 15, 13, 14]);
}

#[test]
fn test_group_by_having() {
    let mut s = library();

    let result = s
        .execute(
            "SELECT author_id, COUNT(*) AS books, MIN(year) AS first_year
             FROM books
             GROUP BY author_id
             HAVING COUNT(*) > 1
             ORDER BY author_id",
        )
        .unwrap();
    assert_eq!(ints(&result, "author_id"), vec![1, 2, 3]);
    assert_eq!(ints(&result, "books"), vec![2, 2, 2]);
    assert_eq!(ints(&result, "first_year"), vec![1968, 1961, 1979]);

    // COUNT of a column skips NULLs
    let result = s
        .execute("SELECT COUNT(*) AS all_books, COUNT(price) AS priced FROM books")
        .unwrap();
    assert_eq!(ints(&result, "all_books"), vec![6]);
    assert_eq!(ints(&result, "priced"), vec![5]);
}

#[test]
fn test_aggregates_over_empty_input() {
    let mut s = library();

    let result = s
        .execute("SELECT COUNT(*) AS n, SUM(year) AS total FROM books WHERE year > 3000")
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.value(0, "n"), Some(&Value::Integer(0)));
    assert_eq!(result.value(0, "total"), Some(&Value::Null));

    let grouped = s
        .execute("SELECT author_id, COUNT(*) FROM books WHERE year > 3000 GROUP BY author_id")
        .unwrap();
    assert!(grouped.rows.is_empty());
}

#[test]
fn test_ungrouped_column_is_rejected() {
    let mut s = library();
    let err = s
        .execute("SELECT title, COUNT(*) FROM books GROUP BY author_id")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogError);
}

#[test]
fn test_joins() {
    let mut s = library();

    let inner = s
        .execute(
            "SELECT a.name, b.title FROM authors a
             JOIN books b ON a.author_id = b.author_id
             WHERE a.country = 'PL'
             ORDER BY b.year",
        )
        .unwrap();
    assert_eq!(strings(&inner, "title"), vec!["Solaris", "Fiasco"]);

    let right = s
        .execute(
            "SELECT a.name, b.title FROM books b
             RIGHT JOIN authors a ON a.author_id = b.author_id
             WHERE b.title IS NULL",
        )
        .unwrap();
    assert_eq!(strings(&right, "name"), vec!["Tokarczuk"]);

    let cross = s
        .execute("SELECT COUNT(*) AS n FROM authors CROSS JOIN books")
        .unwrap();
    assert_eq!(ints(&cross, "n"), vec![24]);

    s.execute("INSERT INTO books VALUES (16, 'Anonymous', NULL, 2000, 1.00)")
        .unwrap();
    let full = s
        .execute("SELECT COUNT(*) AS n FROM authors a FULL JOIN books b ON a.author_id = b.author_id")
        .unwrap();
    // 7 books, one of them without an author, plus Tokarczuk
    assert_eq!(ints(&full, "n"), vec![8]);
}

#[test]
fn test_subqueries() {
    let mut s = library();

    let exists = s
        .execute(
            "SELECT name FROM authors a
             WHERE EXISTS (SELECT 1 FROM books b WHERE b.author_id = a.author_id AND b.year > 1980)
             ORDER BY name",
        )
        .unwrap();
    assert_eq!(strings(&exists, "name"), vec!["Butler", "Lem"]);

    let not_in = s
        .execute("SELECT name FROM authors WHERE author_id NOT IN (SELECT author_id FROM books)")
        .unwrap();
    assert_eq!(strings(&not_in, "name"), vec!["Tokarczuk"]);

    let scalar = s
        .execute(
            "SELECT title FROM books
             WHERE year = (SELECT MAX(year) FROM books)",
        )
        .unwrap();
    assert_eq!(strings(&scalar, "title"), vec!["Parable of the Sower"]);

    let all = s
        .execute("SELECT title FROM books WHERE year >= ALL (SELECT year FROM books WHERE author_id = 1) AND author_id = 1")
        .unwrap();
    assert_eq!(strings(&all, "title"), vec!["The Dispossessed"]);

    let correlated = s
        .execute(
            "SELECT name, (SELECT COUNT(*) FROM books b WHERE b.author_id = a.author_id) AS n
             FROM authors a ORDER BY author_id",
        )
        .unwrap();
    assert_eq!(ints(&correlated, "n"), vec![2, 2, 2, 0]);

    let derived = s
        .execute(
            "SELECT t.author_id FROM (SELECT author_id, COUNT(*) AS n FROM books GROUP BY author_id) t
             WHERE t.n = 2 ORDER BY t.author_id",
        )
        .unwrap();
    assert_eq!(ints(&derived, "author_id"), vec![1, 2, 3]);
}

#[test]
fn test_scalar_subquery_with_many_rows_fails() {
    let mut s = library();
    let err = s
        .execute("SELECT (SELECT book_id FROM books) AS b FROM authors")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CardinalityViolation);
}

#[test]
fn test_division_by_zero() {
    let mut s = library();
    let err = s.execute("SELECT year / 0 FROM books").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DivisionByZero);
}

#[test]
fn test_integer_range_edges() {
    let mut s = library();

    let min = s.execute("SELECT -9223372036854775808 AS m").unwrap();
    assert_eq!(min.value(0, "m"), Some(&Value::Integer(i64::MIN)));

    let err = s.execute("SELECT 9223372036854775807 + 1").unwrap_err();
    assert!(matches!(err, Error::NumericOverflow), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::DivisionByZero);
}

#[test]
fn test_set_operations() {
    let mut s = library();

    let union = s
        .execute(
            "SELECT author_id FROM authors WHERE country = 'US'
             UNION SELECT author_id FROM books WHERE year > 1975
             ORDER BY author_id",
        )
        .unwrap();
    assert_eq!(ints(&union, "author_id"), vec![1, 2, 3]);

    let union_all = s
        .execute("SELECT author_id FROM books UNION ALL SELECT author_id FROM authors")
        .unwrap();
    assert_eq!(union_all.rows.len(), 10);

    let intersect = s
        .execute("SELECT author_id FROM authors INTERSECT SELECT author_id FROM books WHERE year < 1970")
        .unwrap();
    let mut ids = ints(&intersect, "author_id");
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    let except = s
        .execute("SELECT author_id FROM authors EXCEPT SELECT author_id FROM books")
        .unwrap();
    assert_eq!(ints(&except, "author_id"), vec![4]);

    let err = s
        .execute("SELECT author_id, name FROM authors UNION SELECT author_id FROM books")
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionError(_)), "{:?}", err);
}

#[test]
fn test_window_functions() {
    let mut s = library();

    let result = s
        .execute(
            "SELECT title,
                    ROW_NUMBER() OVER (PARTITION BY author_id ORDER BY year) AS nth,
                    SUM(year) OVER (PARTITION BY author_id ORDER BY year) AS running,
                    LAG(year) OVER (PARTITION BY author_id ORDER BY year) AS previous
             FROM books
             ORDER BY author_id, year",
        )
        .unwrap();
    assert_eq!(ints(&result, "nth"), vec![1, 2, 1, 2, 1, 2]);
    assert_eq!(
        ints(&result, "running"),
        vec![1968, 1968 + 1974, 1961, 1961 + 1986, 1979, 1979 + 1993]
    );
    assert_eq!(result.value(0, "previous"), Some(&Value::Null));
    assert_eq!(result.value(1, "previous"), Some(&Value::Integer(1968)));

    let dense = s
        .execute(
            "SELECT DENSE_RANK() OVER (ORDER BY country) AS r FROM authors ORDER BY author_id",
        )
        .unwrap();
    assert_eq!(ints(&dense, "r"), vec![2, 1, 2, 1]);
}

#[test]
fn test_window_offsets_and_frame_values() {
    let db = Database::new();
    let mut s = db.session();
    s.execute(
        "CREATE TABLE readings (sensor VARCHAR(10), t INTEGER, v INTEGER);
         INSERT INTO readings VALUES
             ('a', 1, 10), ('a', 2, 20), ('a', 3, 30), ('a', 4, 40),
             ('b', 1, 5), ('b', 2, 7);",
    )
    .unwrap();

    let result = s
        .execute(
            "SELECT sensor, t,
                    LAG(v, 1, -1) OVER (PARTITION BY sensor ORDER BY t) AS prev,
                    LEAD(v, 2) OVER (PARTITION BY sensor ORDER BY t) AS ahead,
                    FIRST_VALUE(v) OVER (PARTITION BY sensor ORDER BY t) AS first_v,
                    LAST_VALUE(v) OVER (PARTITION BY sensor ORDER BY t) AS last_v
             FROM readings
             ORDER BY sensor, t",
        )
        .unwrap();

    let column = |name: &str| -> Vec<Option<i64>> {
        let i = result.column_index(name).unwrap();
        result
            .rows
            .iter()
            .map(|row| match row.get(i) {
                Some(Value::Integer(n)) => Some(*n),
                Some(Value::Null) => None,
                other => panic!("unexpected {:?} in '{}'", other, name),
            })
            .collect()
    };
    assert_eq!(column("prev"), vec![Some(-1), Some(10), Some(20), Some(30), Some(-1), Some(5)]);
    // Two rows ahead never reaches into the next sensor
    assert_eq!(column("ahead"), vec![Some(30), Some(40), None, None, None, None]);
    assert_eq!(column("first_v"), vec![Some(10), Some(10), Some(10), Some(10), Some(5), Some(5)]);
    // The default frame ends at the current row
    assert_eq!(column("last_v"), vec![Some(10), Some(20), Some(30), Some(40), Some(5), Some(7)]);
}

#[test]
fn test_common_table_expressions() {
    let mut s = library();

    let result = s
        .execute(
            "WITH prolific AS (SELECT author_id FROM books GROUP BY author_id HAVING COUNT(*) >= 2)
             SELECT name FROM authors WHERE author_id IN (SELECT author_id FROM prolific)
             ORDER BY name",
        )
        .unwrap();
    assert_eq!(strings(&result, "name"), vec!["Butler", "Le Guin", "Lem"]);

    let result = s
        .execute(
            "WITH RECURSIVE nums(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM nums WHERE n < 10)
             SELECT SUM(n) AS total, COUNT(*) AS c FROM nums",
        )
        .unwrap();
    assert_eq!(ints(&result, "total"), vec![55]);
    assert_eq!(ints(&result, "c"), vec![10]);
}

#[test]
fn test_recursive_union_stops_on_cycles() {
    let db = Database::new();
    let mut s = db.session();
    s.execute(
        "CREATE TABLE edges (src INTEGER, dst INTEGER);
         INSERT INTO edges VALUES (1, 2), (2, 3), (3, 1), (3, 4);",
    )
    .unwrap();

    let result = s
        .execute(
            "WITH RECURSIVE reach(node) AS (
                 SELECT 1
                 UNION
                 SELECT e.dst FROM edges e JOIN reach r ON e.src = r.node
             )
             SELECT node FROM reach ORDER BY node",
        )
        .unwrap();
    assert_eq!(ints(&result, "node"), vec![1, 2, 3, 4]);
}

#[test]
fn test_recursion_limit() {
    let db = Database::open(EngineConfig::new().max_recursion_depth(5)).unwrap();
    let mut s = db.session();

    let ok = s
        .execute("WITH RECURSIVE nums(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM nums WHERE n < 5) SELECT COUNT(*) AS c FROM nums")
        .unwrap();
    assert_eq!(ints(&ok, "c"), vec![5]);

    let err = s
        .execute("WITH RECURSIVE nums(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM nums) SELECT COUNT(*) FROM nums")
        .unwrap_err();
    assert!(matches!(err, Error::RecursionLimitExceeded(5)), "{:?}", err);
}

#[test]
fn test_views() {
    let mut s = library();

    s.execute(
        "CREATE VIEW author_stats (author_id, books) AS
         SELECT author_id, COUNT(*) FROM books GROUP BY author_id",
    )
    .unwrap();
    let result = s
        .execute(
            "SELECT a.name, v.books FROM authors a JOIN author_stats v ON a.author_id = v.author_id
             WHERE v.books = 2 ORDER BY a.name",
        )
        .unwrap();
    assert_eq!(strings(&result, "name"), vec!["Butler", "Le Guin", "Lem"]);

    // Plain views follow the base tables
    s.execute("INSERT INTO books VALUES (20, 'Flights', 4, 2007, 18.00)")
        .unwrap();
    let result = s
        .execute("SELECT books FROM author_stats WHERE author_id = 4")
        .unwrap();
    assert_eq!(ints(&result, "books"), vec![1]);

    let err = s
        .execute("INSERT INTO author_stats VALUES (9, 9)")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    s.execute("DROP VIEW author_stats").unwrap();
    s.execute("DROP VIEW IF EXISTS author_stats").unwrap();
    assert!(s.execute("SELECT * FROM author_stats").is_err());
}

#[test]
fn test_materialized_view_refresh() {
    let mut s = library();

    s.execute("CREATE MATERIALIZED VIEW book_count AS SELECT COUNT(*) AS n FROM books")
        .unwrap();
    s.execute("INSERT INTO books VALUES (20, 'Flights', 4, 2007, 18.00)")
        .unwrap();

    let stale = s.execute("SELECT n FROM book_count").unwrap();
    assert_eq!(ints(&stale, "n"), vec![6]);

    let refreshed = s.execute("REFRESH MATERIALIZED VIEW book_count").unwrap();
    assert_eq!(refreshed.affected_rows, 1);
    let fresh = s.execute("SELECT n FROM book_count").unwrap();
    assert_eq!(ints(&fresh, "n"), vec![7]);
}

#[test]
fn test_materialized_view_without_column_list() {
    let mut s = library();

    s.execute(
        "CREATE MATERIALIZED VIEW old_books AS
         SELECT book_id, title FROM books WHERE year < 1970",
    )
    .unwrap();

    let all = s.execute("SELECT * FROM old_books ORDER BY book_id").unwrap();
    assert_eq!(all.columns, vec!["book_id".to_string(), "title".to_string()]);
    assert_eq!(all.rows.len(), 2);

    let ids = s.execute("SELECT book_id FROM old_books ORDER BY book_id").unwrap();
    assert_eq!(ints(&ids, "book_id"), vec![10, 12]);

    s.execute("REFRESH MATERIALIZED VIEW old_books").unwrap();
    let again = s.execute("SELECT title FROM old_books").unwrap();
    assert_eq!(again.rows.len(), 2);
}

#[test]
fn test_parameters() {
    let mut s = library();

    let result = s
        .execute_with_params(
            "SELECT title FROM books WHERE author_id = $1 AND year > $2 ORDER BY year",
            &[Value::Integer(1), Value::Integer(1970)],
        )
        .unwrap();
    assert_eq!(strings(&result, "title"), vec!["The Dispossessed"]);

    s.execute_with_params(
        "INSERT INTO authors VALUES (?, ?, ?)",
        &[Value::Integer(5), Value::from("Lessing"), Value::Null],
    )
    .unwrap();
    let result = s
        .execute_with_params("SELECT name FROM authors WHERE author_id = $1", &[Value::Integer(5)])
        .unwrap();
    assert_eq!(strings(&result, "name"), vec!["Lessing"]);

    let err = s
        .execute_with_params("SELECT * FROM books WHERE year = $2", &[Value::Integer(1)])
        .unwrap_err();
    assert!(matches!(err, Error::MissingParameter(2)), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn test_insert_select_and_update_with_expressions() {
    let mut s = library();

    s.execute("CREATE TABLE cheap (book_id INTEGER PRIMARY KEY, title VARCHAR(200))")
        .unwrap();
    let result = s
        .execute("INSERT INTO cheap SELECT book_id, title FROM books WHERE price < 12.50")
        .unwrap();
    assert_eq!(result.affected_rows, 3);

    let result = s
        .execute("UPDATE books SET price = price * 2 WHERE author_id = 2")
        .unwrap();
    assert_eq!(result.affected_rows, 2);
    let result = s
        .execute("SELECT price FROM books WHERE book_id = 12")
        .unwrap();
    assert_eq!(strings(&result, "price"), vec!["19.98"]);
}

#[test]
fn test_limit_without_order() {
    let mut s = library();

    let result = s.execute("SELECT * FROM books LIMIT 2").unwrap();
    assert_eq!(result.rows.len(), 2);
    let result = s.execute("SELECT * FROM books LIMIT 0").unwrap();
    assert!(result.rows.is_empty());
    let result = s.execute("SELECT * FROM books OFFSET 4").unwrap();
    assert_eq!(result.rows.len(), 2);
}
