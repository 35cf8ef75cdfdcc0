use anyhow::Context;
use rusqlite::Connection;

/// Embedded migrations, applied in order and tracked in `_migrations` so a
/// restart never re-runs one.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial",
    "CREATE TABLE IF NOT EXISTS availability_profiles (
        account_id TEXT PRIMARY KEY,
        timezone TEXT NOT NULL,
        weekly_schedule TEXT NOT NULL,
        slot_interval_minutes INTEGER NOT NULL DEFAULT 30,
        default_duration_minutes INTEGER NOT NULL DEFAULT 30,
        buffer_before_minutes INTEGER NOT NULL DEFAULT 0,
        buffer_after_minutes INTEGER NOT NULL DEFAULT 0,
        min_notice_hours INTEGER NOT NULL DEFAULT 0,
        max_days_ahead INTEGER NOT NULL DEFAULT 30,
        provider_preference TEXT NOT NULL DEFAULT 'both',
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS calendar_integrations (
        account_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        expires_at TEXT NOT NULL,
        calendar_id TEXT NOT NULL,
        sync_enabled INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (account_id, provider)
    );

    CREATE TABLE IF NOT EXISTS appointments (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        contact_id TEXT,
        title TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        timezone TEXT NOT NULL,
        status TEXT NOT NULL,
        primary_event_id TEXT,
        secondary_event_id TEXT,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_appointments_account_start
        ON appointments(account_id, start_time);

    CREATE TABLE IF NOT EXISTS contacts (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT,
        phone TEXT NOT NULL,
        email TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_contacts_account_phone
        ON contacts(account_id, phone);

    CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id TEXT NOT NULL,
        action TEXT NOT NULL,
        params TEXT NOT NULL,
        result TEXT NOT NULL,
        success INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );",
)];

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
