//! KeelDB - CLI Client

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use keeldb::server::{format_error, format_result, OutputFormat};
use keeldb::{Database, EngineConfig, Session};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

/// Print welcome banner
fn print_banner() {
    println!(
        r#"
 _  __          _ ____  ____
| |/ /___  ___ | |  _ \| __ )
| ' // _ \/ _ \| | | | |  _ \
| . \  __/  __/| | |_| | |_) |
|_|\_\___|\___||_|____/|____/

 A small multi-version relational engine in Rust
 Type '.help' for help, '.quit' to exit
"#
    );
}

/// Print help message
fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .quit              Exit KeelDB
  .tables            List all tables
  .schema [table]    Show table schema
  .mode json|table   Choose the result format

Statements end with ';' and may span several lines.

SQL Commands:
  CREATE TABLE / VIEW / INDEX ...    Define objects
  ALTER TABLE ... / DROP ...         Change or remove them
  INSERT / UPDATE / DELETE ...       Modify rows
  SELECT ... / WITH ...              Query data
  BEGIN / COMMIT / ROLLBACK          Transactions
  SET TRANSACTION ISOLATION LEVEL x  Choose an isolation level

Examples:
  CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(100));
  INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob');
  SELECT * FROM users WHERE id = 1;
"#
    );
}

fn parse_args() -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || args.next().with_context(|| format!("{} needs a value", arg));
        match arg.as_str() {
            "--data-dir" => config = config.data_dir(value()?),
            "--lock-timeout-ms" => {
                let ms: u64 = value()?.parse().context("invalid --lock-timeout-ms")?;
                config = config.lock_timeout(Duration::from_millis(ms));
            }
            other => bail!("unknown argument '{}'", other),
        }
    }
    Ok(config)
}

/// Handle special dot commands; returns false to leave the REPL
fn handle_special_command(cmd: &str, db: &Database, format: &mut OutputFormat) -> bool {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    let catalog = db.catalog();

    match parts.first().copied() {
        Some(".help") => print_help(),
        Some(".quit") | Some(".exit") => return false,
        Some(".tables") => {
            let tables = catalog.list_tables();
            if tables.is_empty() {
                println!("No tables found.");
            } else {
                println!("Tables:");
                for table in tables {
                    println!("  {}", table);
                }
            }
        }
        Some(".schema") => {
            let names = match parts.get(1) {
                Some(name) => vec![name.to_string()],
                None => catalog.list_tables(),
            };
            for name in names {
                match catalog.describe_table(&name) {
                    Ok(info) => println!("{}", info),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
        Some(".mode") => match parts.get(1).copied() {
            Some("json") => *format = OutputFormat::Json,
            Some("table") => *format = OutputFormat::Table,
            _ => eprintln!("Usage: .mode json|table"),
        },
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("Type '.help' for available commands.");
        }
        None => {}
    }
    true
}

fn execute_sql(session: &mut Session, sql: &str, format: OutputFormat) {
    match session.execute(sql) {
        Ok(result) => print!("{}", format_result(&result, format)),
        Err(e) => eprint!("{}", format_error(&e, format)),
    }
}

/// Main REPL loop
fn run_repl(db: Database) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut session = db.session();
    let mut format = OutputFormat::Table;
    let mut buffer = String::new();

    print_banner();

    loop {
        let prompt = if buffer.is_empty() { "keeldb> " } else { "   ...> " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();

        if buffer.is_empty() && trimmed.starts_with('.') {
            let _ = editor.add_history_entry(trimmed);
            if !handle_special_command(trimmed, &db, &mut format) {
                break;
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        buffer.push_str(&line);
        buffer.push('\n');
        if trimmed.ends_with(';') {
            let sql = std::mem::take(&mut buffer);
            let _ = editor.add_history_entry(sql.trim());
            execute_sql(&mut session, &sql, format);
        }
    }

    if session.in_transaction() {
        println!("Open transaction rolled back.");
    }
    println!("Goodbye!");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = parse_args()?;
    let db = Database::open(config).context("failed to open database")?;
    run_repl(db)
}
