use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        let tx = conn.transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE users (
                fid             INTEGER PRIMARY KEY,
                username        TEXT,
                display_name    TEXT,
                pfp_url         TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE user_roles (
                user_fid        INTEGER NOT NULL,
                role            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (user_fid, role)
            );

            CREATE INDEX idx_user_roles_role ON user_roles(role);

            CREATE TABLE curated_casts (
                cast_hash       TEXT PRIMARY KEY,
                cast_data       TEXT NOT NULL,
                author_fid      INTEGER NOT NULL,
                cast_text       TEXT NOT NULL DEFAULT '',
                cast_created_at TEXT NOT NULL,
                likes_count     INTEGER NOT NULL DEFAULT 0,
                recasts_count   INTEGER NOT NULL DEFAULT 0,
                replies_count   INTEGER NOT NULL DEFAULT 0,
                curated_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_curated_casts_created ON curated_casts(cast_created_at);

            CREATE TABLE curator_cast_curations (
                cast_hash       TEXT NOT NULL REFERENCES curated_casts(cast_hash) ON DELETE CASCADE,
                curator_fid     INTEGER NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (cast_hash, curator_fid)
            );

            CREATE INDEX idx_curations_curator ON curator_cast_curations(curator_fid, created_at);

            CREATE TABLE cast_replies (
                reply_cast_hash     TEXT PRIMARY KEY,
                curated_cast_hash   TEXT NOT NULL REFERENCES curated_casts(cast_hash) ON DELETE CASCADE,
                parent_cast_hash    TEXT,
                root_cast_hash      TEXT NOT NULL,
                quoted_cast_hash    TEXT,
                is_quote_cast       INTEGER NOT NULL DEFAULT 0,
                reply_depth         INTEGER NOT NULL DEFAULT 1,
                cast_data           TEXT NOT NULL,
                author_fid          INTEGER NOT NULL,
                cast_text           TEXT NOT NULL DEFAULT '',
                cast_created_at     TEXT NOT NULL,
                likes_count         INTEGER NOT NULL DEFAULT 0,
                recasts_count       INTEGER NOT NULL DEFAULT 0,
                replies_count       INTEGER NOT NULL DEFAULT 0,
                engagement_score    INTEGER NOT NULL DEFAULT 0,
                quality_score       REAL NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_replies_curated ON cast_replies(curated_cast_hash, cast_created_at);
            CREATE INDEX idx_replies_quoted ON cast_replies(quoted_cast_hash);
            CREATE INDEX idx_replies_parent ON cast_replies(parent_cast_hash);

            CREATE TABLE cast_tags (
                cast_hash       TEXT NOT NULL REFERENCES curated_casts(cast_hash) ON DELETE CASCADE,
                tag             TEXT NOT NULL,
                admin_fid       INTEGER NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (cast_hash, tag)
            );

            CREATE TABLE cast_interactions (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                curated_cast_hash   TEXT NOT NULL REFERENCES curated_casts(cast_hash) ON DELETE CASCADE,
                target_cast_hash    TEXT NOT NULL,
                interaction_type    TEXT NOT NULL,
                user_fid            INTEGER NOT NULL,
                created_at          TEXT NOT NULL,
                UNIQUE (target_cast_hash, interaction_type, user_fid)
            );

            CREATE INDEX idx_interactions_curated ON cast_interactions(curated_cast_hash);

            CREATE TABLE polls (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                cast_hash           TEXT NOT NULL UNIQUE REFERENCES curated_casts(cast_hash) ON DELETE CASCADE,
                slug                TEXT UNIQUE,
                question            TEXT NOT NULL,
                poll_type           TEXT NOT NULL,
                choices             TEXT NOT NULL DEFAULT '[]',
                allocation_budget   INTEGER NOT NULL DEFAULT 100,
                created_by          INTEGER NOT NULL,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE poll_options (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id         INTEGER NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                option_text     TEXT NOT NULL,
                order_index     INTEGER NOT NULL
            );

            CREATE INDEX idx_poll_options_poll ON poll_options(poll_id, order_index);

            CREATE TABLE poll_responses (
                poll_id         INTEGER NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                user_fid        INTEGER NOT NULL,
                response        TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (poll_id, user_fid)
            );

            CREATE TABLE user_watches (
                watcher_fid     INTEGER NOT NULL,
                watched_fid     INTEGER NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (watcher_fid, watched_fid)
            );

            CREATE INDEX idx_watches_watched ON user_watches(watched_fid);

            CREATE TABLE notifications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_fid        INTEGER NOT NULL,
                kind            TEXT NOT NULL,
                actor_fid       INTEGER,
                cast_hash       TEXT,
                message         TEXT NOT NULL,
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                UNIQUE (user_fid, kind, cast_hash)
            );

            CREATE INDEX idx_notifications_user ON notifications(user_fid, created_at);

            CREATE TABLE webhooks (
                id              TEXT PRIMARY KEY,
                webhook_type    TEXT NOT NULL,
                secret          TEXT NOT NULL,
                url             TEXT,
                created_at      TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}
