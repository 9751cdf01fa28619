use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use depthcaster_types::cast::{CastPayload, METADATA_PARENT_HASH, normalize_hash};
use depthcaster_types::sort::ThreadSort;
use rusqlite::{Connection, Row};

use crate::models::{Counter, ReplyRow, ThreadPosition};
use crate::{Database, OptionalExt, decode_cast, placeholders, ts};

const REPLY_COLUMNS: &str = "reply_cast_hash, curated_cast_hash, parent_cast_hash, root_cast_hash,
    quoted_cast_hash, is_quote_cast, reply_depth, cast_data";

struct RawReply {
    reply_cast_hash: String,
    curated_cast_hash: String,
    parent_cast_hash: Option<String>,
    root_cast_hash: String,
    quoted_cast_hash: Option<String>,
    is_quote: bool,
    depth: i64,
    data: String,
}

fn raw_reply(row: &Row<'_>) -> rusqlite::Result<RawReply> {
    Ok(RawReply {
        reply_cast_hash: row.get(0)?,
        curated_cast_hash: row.get(1)?,
        parent_cast_hash: row.get(2)?,
        root_cast_hash: row.get(3)?,
        quoted_cast_hash: row.get(4)?,
        is_quote: row.get::<_, i64>(5)? != 0,
        depth: row.get(6)?,
        data: row.get(7)?,
    })
}

impl RawReply {
    fn decode(self) -> Option<ReplyRow> {
        let cast = decode_cast(&self.data, &self.reply_cast_hash)?;
        Some(ReplyRow {
            reply_cast_hash: self.reply_cast_hash,
            curated_cast_hash: self.curated_cast_hash,
            parent_cast_hash: self.parent_cast_hash,
            root_cast_hash: self.root_cast_hash,
            quoted_cast_hash: self.quoted_cast_hash,
            is_quote: self.is_quote,
            depth: self.depth.max(0) as u32,
            cast,
        })
    }
}

fn insert_reply(conn: &Connection, reply: &ReplyRow, or_ignore: bool) -> Result<usize> {
    let cast = &reply.cast;
    let data = serde_json::to_string(cast)?;
    let now = ts(Utc::now());

    // Metadata rows never overwrite the thread position of a real reply.
    let sql = if or_ignore {
        format!(
            "INSERT OR IGNORE INTO cast_replies ({REPLY_COLUMNS}, author_fid, cast_text, cast_created_at,
                likes_count, recasts_count, replies_count, engagement_score, quality_score,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)"
        )
    } else {
        format!(
            "INSERT INTO cast_replies ({REPLY_COLUMNS}, author_fid, cast_text, cast_created_at,
                likes_count, recasts_count, replies_count, engagement_score, quality_score,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17)
             ON CONFLICT(reply_cast_hash) DO UPDATE SET
                cast_data = excluded.cast_data,
                cast_text = excluded.cast_text,
                likes_count = excluded.likes_count,
                recasts_count = excluded.recasts_count,
                replies_count = excluded.replies_count,
                engagement_score = excluded.engagement_score,
                quality_score = excluded.quality_score,
                curated_cast_hash = CASE WHEN excluded.parent_cast_hash IS '{ph}'
                    THEN cast_replies.curated_cast_hash ELSE excluded.curated_cast_hash END,
                parent_cast_hash = CASE WHEN excluded.parent_cast_hash IS '{ph}'
                    THEN cast_replies.parent_cast_hash ELSE excluded.parent_cast_hash END,
                root_cast_hash = CASE WHEN excluded.parent_cast_hash IS '{ph}'
                    THEN cast_replies.root_cast_hash ELSE excluded.root_cast_hash END,
                reply_depth = CASE WHEN excluded.parent_cast_hash IS '{ph}'
                    THEN cast_replies.reply_depth ELSE excluded.reply_depth END,
                updated_at = excluded.updated_at",
            ph = METADATA_PARENT_HASH
        )
    };

    let changed = conn.execute(
        &sql,
        rusqlite::params![
            normalize_hash(&reply.reply_cast_hash),
            normalize_hash(&reply.curated_cast_hash),
            reply.parent_cast_hash.as_deref().map(normalize_hash),
            normalize_hash(&reply.root_cast_hash),
            reply.quoted_cast_hash.as_deref().map(normalize_hash),
            reply.is_quote as i64,
            reply.depth as i64,
            data,
            cast.author.fid as i64,
            cast.text,
            ts(cast.timestamp),
            cast.likes(),
            cast.recasts(),
            cast.reply_count(),
            cast.engagement_score(),
            cast.quality_score(),
            now,
        ],
    )?;
    Ok(changed)
}

impl Database {
    // -- Replies --

    /// Insert a reply, or refresh its payload and counters if it exists.
    /// Webhook delivery and direct posting race here; either order converges.
    pub fn upsert_reply(&self, reply: &ReplyRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            insert_reply(conn, reply, false)?;
            Ok(())
        })
    }

    /// Insert only when the hash is not stored yet. Returns true on insert.
    pub fn insert_reply_if_absent(&self, reply: &ReplyRow) -> Result<bool> {
        self.with_conn_mut(|conn| Ok(insert_reply(conn, reply, true)? > 0))
    }

    /// Persist a display-only parent for a quote cast under `curated_cast_hash`.
    pub fn insert_metadata_reply(&self, reply: &ReplyRow) -> Result<bool> {
        debug_assert!(reply.is_metadata());
        self.insert_reply_if_absent(reply)
    }

    /// Every stored row belonging to or quoting `root`, ordered by depth and
    /// then by the column that approximates `sort`.
    pub fn thread_rows(&self, root: &str, sort: ThreadSort) -> Result<Vec<ReplyRow>> {
        let root = normalize_hash(root);
        let order = match sort {
            ThreadSort::Newest => "cast_created_at DESC",
            ThreadSort::Engagement => "engagement_score DESC",
            ThreadSort::Quality => "quality_score DESC",
            ThreadSort::Chronological => "cast_created_at ASC",
        };
        let sql = format!(
            "SELECT {REPLY_COLUMNS} FROM cast_replies
             WHERE curated_cast_hash = ?1 OR quoted_cast_hash = ?1
             ORDER BY reply_depth ASC, {order}, reply_cast_hash ASC"
        );

        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&root], raw_reply)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(raw.into_iter().filter_map(RawReply::decode).collect())
    }

    pub fn get_reply(&self, hash: &str) -> Result<Option<ReplyRow>> {
        let hash = normalize_hash(hash);
        let raw = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {REPLY_COLUMNS} FROM cast_replies WHERE reply_cast_hash = ?1"),
                [&hash],
                raw_reply,
            )
            .optional()
        })?;
        Ok(raw.and_then(RawReply::decode))
    }

    /// Look a cast up in curated casts first, then in stored replies.
    pub fn find_cast_payload(&self, hash: &str) -> Result<Option<CastPayload>> {
        let map = self.find_cast_payloads(&[normalize_hash(hash)])?;
        Ok(map.into_values().next())
    }

    pub fn find_cast_payloads(&self, hashes: &[String]) -> Result<HashMap<String, CastPayload>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = self.with_conn(|conn| {
            let list = placeholders(1, hashes.len());
            let sql = format!(
                "SELECT cast_hash, cast_data, 0 AS pref FROM curated_casts WHERE cast_hash IN ({list})
                 UNION ALL
                 SELECT reply_cast_hash, cast_data, 1 AS pref FROM cast_replies WHERE reply_cast_hash IN ({list})
                 ORDER BY pref DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(hashes.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        // Curated rows come last and win.
        let mut map = HashMap::new();
        for (hash, data) in rows {
            if let Some(cast) = decode_cast(&data, &hash) {
                map.insert(hash, cast);
            }
        }
        Ok(map)
    }

    /// Position of `hash` in a stored curated thread, if any.
    pub fn thread_position(&self, hash: &str) -> Result<Option<ThreadPosition>> {
        let hash = normalize_hash(hash);
        if self.is_curated(&hash)? {
            return Ok(Some(ThreadPosition {
                curated_cast_hash: hash,
                depth: 0,
            }));
        }

        self.with_conn(|conn| {
            conn.query_row(
                "SELECT curated_cast_hash, reply_depth FROM cast_replies
                 WHERE reply_cast_hash = ?1
                   AND (parent_cast_hash IS NULL OR parent_cast_hash != ?2)",
                rusqlite::params![hash, METADATA_PARENT_HASH],
                |row| {
                    Ok(ThreadPosition {
                        curated_cast_hash: row.get(0)?,
                        depth: row.get::<_, i64>(1)?.max(0) as u32,
                    })
                },
            )
            .optional()
        })
    }

    /// Delete a reply and every stored descendant. Returns rows removed.
    pub fn delete_reply_cascade(&self, hash: &str) -> Result<usize> {
        let hash = normalize_hash(hash);
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "WITH RECURSIVE doomed(h) AS (
                    SELECT reply_cast_hash FROM cast_replies WHERE reply_cast_hash = ?1
                    UNION
                    SELECT r.reply_cast_hash FROM cast_replies r JOIN doomed d ON r.parent_cast_hash = d.h
                 )
                 DELETE FROM cast_replies WHERE reply_cast_hash IN (SELECT h FROM doomed)",
                [&hash],
            )?;
            Ok(changed)
        })
    }

    /// Adjust one counter on whichever stored copy of `hash` exists, keeping
    /// the column and the `cast_data` snapshot in step. Never goes below zero.
    pub fn apply_counter_delta(&self, hash: &str, counter: Counter, delta: i64) -> Result<bool> {
        let hash = normalize_hash(hash);
        let col = counter.column();
        let path = counter.json_path();
        let next = format!("MAX({col} + ?2, 0)");

        let value = |c: Counter| {
            if c == counter {
                next.clone()
            } else {
                c.column().to_string()
            }
        };
        let engagement = format!(
            "{} + 2 * {} + 3 * {}",
            value(Counter::Likes),
            value(Counter::Recasts),
            value(Counter::Replies)
        );

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let curated = tx.execute(
                &format!(
                    "UPDATE curated_casts
                     SET {col} = {next}, cast_data = json_set(cast_data, '{path}', {next})
                     WHERE cast_hash = ?1"
                ),
                rusqlite::params![hash, delta],
            )?;
            let replies = tx.execute(
                &format!(
                    "UPDATE cast_replies
                     SET {col} = {next}, engagement_score = {engagement},
                         cast_data = json_set(cast_data, '{path}', {next})
                     WHERE reply_cast_hash = ?1"
                ),
                rusqlite::params![hash, delta],
            )?;
            tx.commit()?;
            Ok(curated + replies > 0)
        })
    }
}
