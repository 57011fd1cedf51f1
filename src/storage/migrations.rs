use rusqlite::{Connection, OptionalExtension, params};

use crate::prelude::*;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_processes_table",
        sql: "CREATE TABLE IF NOT EXISTS processes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pid INTEGER NOT NULL,
            ppid INTEGER,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            cpu_usage REAL NOT NULL,
            memory_usage REAL NOT NULL,
            created_time INTEGER NOT NULL,
            captured_at INTEGER NOT NULL,
            os TEXT NOT NULL,
            platform TEXT NOT NULL,
            platform_family TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS processes_captured_at_idx ON processes (captured_at);",
    },
    Migration {
        name: "create_commands_table",
        sql: "CREATE TABLE IF NOT EXISTS commands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            command TEXT NOT NULL,
            user TEXT NOT NULL,
            directory TEXT NOT NULL,
            repository TEXT,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            execution_time INTEGER NOT NULL,
            result TEXT NOT NULL,
            status TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS commands_end_time_idx ON commands (end_time);",
    },
];

/// Apply every migration that is not recorded in `schema_migrations` yet.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            migration_name TEXT NOT NULL UNIQUE
        )",
        [],
    )
    .context("Failed to create the schema_migrations table")?;

    for migration in MIGRATIONS {
        let applied = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE migration_name = ?1",
                params![migration.name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if applied {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .with_context(|| format!("Failed to apply migration {}", migration.name))?;
        tx.execute(
            "INSERT INTO schema_migrations (migration_name) VALUES (?1)",
            params![migration.name],
        )?;
        tx.commit()?;
        debug!("Applied migration {}", migration.name);
    }

    Ok(())
}
