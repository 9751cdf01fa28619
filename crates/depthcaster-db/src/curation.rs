use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use depthcaster_types::cast::{CastPayload, METADATA_PARENT_HASH, normalize_hash};
use depthcaster_types::sort::FeedSort;
use rusqlite::types::Value;
use tracing::warn;

use crate::models::{CuratedCastRow, CurationRow, FeedCandidate, FeedCursor, UncurateOutcome};
use crate::{Database, OptionalExt, decode_cast, parse_ts, placeholders, ts};

impl Database {
    // -- Curation --

    /// Store the cast (if new) and record `curator_fid`'s curation.
    /// Returns true when this curator had not curated the cast before.
    pub fn curate_cast(&self, cast: &CastPayload, curator_fid: u64, at: DateTime<Utc>) -> Result<bool> {
        let hash = normalize_hash(&cast.hash);
        let data = serde_json::to_string(cast)?;
        let now = ts(at);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO curated_casts
                    (cast_hash, cast_data, author_fid, cast_text, cast_created_at,
                     likes_count, recasts_count, replies_count, curated_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    hash,
                    data,
                    cast.author.fid as i64,
                    cast.text,
                    ts(cast.timestamp),
                    cast.likes(),
                    cast.recasts(),
                    cast.reply_count(),
                    now,
                ],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO curator_cast_curations (cast_hash, curator_fid, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![hash, curator_fid as i64, now],
            )?;
            tx.commit()?;
            Ok(inserted > 0)
        })
    }

    /// Remove one curator's curation. The cast itself (and everything hanging
    /// off it) goes away with the last curation.
    pub fn uncurate_cast(&self, cast_hash: &str, curator_fid: u64) -> Result<UncurateOutcome> {
        let hash = normalize_hash(cast_hash);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM curator_cast_curations WHERE cast_hash = ?1 AND curator_fid = ?2",
                rusqlite::params![hash, curator_fid as i64],
            )? > 0;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM curator_cast_curations WHERE cast_hash = ?1",
                [&hash],
                |row| row.get(0),
            )?;

            let cast_deleted = if removed && remaining == 0 {
                tx.execute("DELETE FROM curated_casts WHERE cast_hash = ?1", [&hash])? > 0
            } else {
                false
            };
            tx.commit()?;

            Ok(UncurateOutcome {
                removed,
                cast_deleted,
            })
        })
    }

    pub fn get_curated_cast(&self, cast_hash: &str) -> Result<Option<CuratedCastRow>> {
        let hash = normalize_hash(cast_hash);
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT cast_hash, cast_data, curated_at FROM curated_casts WHERE cast_hash = ?1",
                [&hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
        })?;

        Ok(row.and_then(|(cast_hash, data, curated_at)| {
            let cast = decode_cast(&data, &cast_hash)?;
            Some(CuratedCastRow {
                curated_at: parse_ts(&curated_at).unwrap_or_default(),
                cast_hash,
                cast,
            })
        }))
    }

    pub fn is_curated(&self, cast_hash: &str) -> Result<bool> {
        let hash = normalize_hash(cast_hash);
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM curated_casts WHERE cast_hash = ?1",
                    [&hash],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Delete a curated cast. Curations, tags, interactions, replies and
    /// polls cascade.
    pub fn delete_curated_cast(&self, cast_hash: &str) -> Result<bool> {
        let hash = normalize_hash(cast_hash);
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM curated_casts WHERE cast_hash = ?1", [&hash])?;
            Ok(changed > 0)
        })
    }

    /// Replace the stored snapshot and counters with fresh upstream data.
    pub fn update_cast_engagement(&self, cast: &CastPayload) -> Result<bool> {
        let hash = normalize_hash(&cast.hash);
        let data = serde_json::to_string(cast)?;
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE curated_casts
                 SET cast_data = ?2, cast_text = ?3, likes_count = ?4, recasts_count = ?5,
                     replies_count = ?6, updated_at = ?7
                 WHERE cast_hash = ?1",
                rusqlite::params![
                    hash,
                    data,
                    cast.text,
                    cast.likes(),
                    cast.recasts(),
                    cast.reply_count(),
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Curator FIDs for one cast, earliest curation first.
    pub fn get_curators(&self, cast_hash: &str) -> Result<Vec<u64>> {
        let hash = normalize_hash(cast_hash);
        let map = self.curators_for_casts(&[hash.clone()])?;
        Ok(map
            .get(&hash)
            .map(|rows| rows.iter().map(|r| r.curator_fid).collect())
            .unwrap_or_default())
    }

    /// Batch-fetch curations for a set of cast hashes, earliest first.
    pub fn curators_for_casts(&self, hashes: &[String]) -> Result<HashMap<String, Vec<CurationRow>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT cast_hash, curator_fid, created_at FROM curator_cast_curations
                 WHERE cast_hash IN ({})
                 ORDER BY created_at ASC, curator_fid ASC",
                placeholders(1, hashes.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(hashes.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut map: HashMap<String, Vec<CurationRow>> = HashMap::new();
            for (cast_hash, curator_fid, created_at) in rows {
                map.entry(cast_hash.clone()).or_default().push(CurationRow {
                    cast_hash,
                    curator_fid: curator_fid as u64,
                    created_at: parse_ts(&created_at).unwrap_or_default(),
                });
            }
            Ok(map)
        })
    }

    // -- Feed --

    /// Phase one of the feed: hashes and sort times only, newest first with
    /// ties in descending hash order, starting after `cursor`.
    pub fn feed_candidates(
        &self,
        curators: &[u64],
        sort: FeedSort,
        cursor: Option<&FeedCursor>,
        limit: usize,
    ) -> Result<Vec<FeedCandidate>> {
        if curators.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let sort_expr = match sort {
            FeedSort::RecentlyCurated => "e.last_curated".to_string(),
            FeedSort::TimeOfCast => "c.cast_created_at".to_string(),
            FeedSort::RecentReply => format!(
                "COALESCE(
                    (SELECT MAX(r.cast_created_at) FROM cast_replies r
                     WHERE r.curated_cast_hash = c.cast_hash
                       AND (r.parent_cast_hash IS NULL OR r.parent_cast_hash != '{}')),
                    c.cast_created_at)",
                METADATA_PARENT_HASH
            ),
        };

        let sql = format!(
            "WITH eligible AS (
                SELECT cast_hash, MAX(created_at) AS last_curated
                FROM curator_cast_curations
                WHERE curator_fid IN ({})
                GROUP BY cast_hash
            ),
            ranked AS (
                SELECT c.cast_hash AS cast_hash, {} AS sort_time
                FROM curated_casts c
                JOIN eligible e ON e.cast_hash = c.cast_hash
            )
            SELECT cast_hash, sort_time FROM ranked
            WHERE ?1 IS NULL OR sort_time < ?1 OR (sort_time = ?1 AND cast_hash < ?2)
            ORDER BY sort_time DESC, cast_hash DESC
            LIMIT {}",
            placeholders(3, curators.len()),
            sort_expr,
            limit
        );

        let mut params: Vec<Value> = Vec::with_capacity(curators.len() + 2);
        params.push(cursor.map(|c| Value::Text(ts(c.sort_time))).unwrap_or(Value::Null));
        params.push(
            cursor
                .and_then(|c| c.cast_hash.as_deref())
                .map(|h| Value::Text(normalize_hash(h)))
                .unwrap_or(Value::Null),
        );
        params.extend(curators.iter().map(|fid| Value::Integer(*fid as i64)));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .filter_map(|(cast_hash, raw)| match parse_ts(&raw) {
                    Some(sort_time) => Some(FeedCandidate {
                        cast_hash,
                        sort_time,
                    }),
                    None => {
                        warn!("Skipping feed row {} with bad sort time '{}'", cast_hash, raw);
                        None
                    }
                })
                .collect())
        })
    }

    /// Phase two of the feed: full payloads for the selected page only.
    pub fn load_curated_casts(&self, hashes: &[String]) -> Result<HashMap<String, CuratedCastRow>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT cast_hash, cast_data, curated_at FROM curated_casts WHERE cast_hash IN ({})",
                placeholders(1, hashes.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(hashes.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .filter_map(|(cast_hash, data, curated_at)| {
                    let cast = decode_cast(&data, &cast_hash)?;
                    Some((
                        cast_hash.clone(),
                        CuratedCastRow {
                            cast_hash,
                            cast,
                            curated_at: parse_ts(&curated_at).unwrap_or_default(),
                        },
                    ))
                })
                .collect())
        })
    }

    // -- Tags --

    pub fn add_tag(&self, cast_hash: &str, tag: &str, admin_fid: u64) -> Result<bool> {
        let hash = normalize_hash(cast_hash);
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO cast_tags (cast_hash, tag, admin_fid, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![hash, tag, admin_fid as i64, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn remove_tag(&self, cast_hash: &str, tag: &str) -> Result<bool> {
        let hash = normalize_hash(cast_hash);
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM cast_tags WHERE cast_hash = ?1 AND tag = ?2",
                rusqlite::params![hash, tag],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_tags(&self, cast_hash: &str) -> Result<Vec<String>> {
        let hash = normalize_hash(cast_hash);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT tag FROM cast_tags WHERE cast_hash = ?1 ORDER BY tag")?;
            let tags = stmt
                .query_map([&hash], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tags)
        })
    }

    // -- Interactions --

    /// Record a reaction or reply made on a cast inside a curated thread.
    pub fn record_interaction(
        &self,
        curated_cast_hash: &str,
        target_cast_hash: &str,
        interaction_type: &str,
        user_fid: u64,
    ) -> Result<bool> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO cast_interactions
                    (curated_cast_hash, target_cast_hash, interaction_type, user_fid, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    normalize_hash(curated_cast_hash),
                    normalize_hash(target_cast_hash),
                    interaction_type,
                    user_fid as i64,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn remove_interaction(&self, target_cast_hash: &str, interaction_type: &str, user_fid: u64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM cast_interactions
                 WHERE target_cast_hash = ?1 AND interaction_type = ?2 AND user_fid = ?3",
                rusqlite::params![normalize_hash(target_cast_hash), interaction_type, user_fid as i64],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn count_interactions(&self, curated_cast_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM cast_interactions WHERE curated_cast_hash = ?1",
                [normalize_hash(curated_cast_hash)],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReplyRow;
    use crate::testutil::{at, cast, reply};

    fn hashes(rows: &[FeedCandidate]) -> Vec<&str> {
        rows.iter().map(|r| r.cast_hash.as_str()).collect()
    }

    #[test]
    fn curate_is_idempotent_per_curator() {
        let db = Database::open_in_memory().unwrap();
        let c = cast("0xaaa", 1, 0);
        assert!(db.curate_cast(&c, 100, at(1)).unwrap());
        assert!(!db.curate_cast(&c, 100, at(2)).unwrap());
        assert!(db.curate_cast(&c, 101, at(3)).unwrap());
        assert_eq!(db.get_curators("0xAAA").unwrap(), vec![100, 101]);
    }

    #[test]
    fn last_uncurate_deletes_cast() {
        let db = Database::open_in_memory().unwrap();
        let c = cast("0xaaa", 1, 0);
        db.curate_cast(&c, 100, at(1)).unwrap();
        db.curate_cast(&c, 101, at(2)).unwrap();

        let first = db.uncurate_cast("0xaaa", 100).unwrap();
        assert!(first.removed && !first.cast_deleted);
        let second = db.uncurate_cast("0xaaa", 101).unwrap();
        assert!(second.removed && second.cast_deleted);
        assert!(!db.is_curated("0xaaa").unwrap());
    }

    #[test]
    fn delete_cascades_to_dependents() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xaaa", 1, 0), 100, at(1)).unwrap();
        db.add_tag("0xaaa", "science", 7).unwrap();
        db.record_interaction("0xaaa", "0xaaa", "like", 9).unwrap();
        db.upsert_reply(&ReplyRow::from_cast(reply("0xbbb", "0xaaa", 2, 3), "0xaaa", 1))
            .unwrap();

        assert!(db.delete_curated_cast("0xaaa").unwrap());
        assert!(db.get_tags("0xaaa").unwrap().is_empty());
        assert_eq!(db.count_interactions("0xaaa").unwrap(), 0);
        assert!(db.get_curators("0xaaa").unwrap().is_empty());
        assert!(db.find_cast_payload("0xbbb").unwrap().is_none());
    }

    #[test]
    fn recent_reply_orders_by_newest_reply() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xa", 1, 10), 100, at(11)).unwrap();
        db.curate_cast(&cast("0xb", 1, 20), 100, at(21)).unwrap();
        // A older, but its reply is newer than anything on B.
        db.upsert_reply(&ReplyRow::from_cast(reply("0xa1", "0xa", 2, 40), "0xa", 1))
            .unwrap();
        db.upsert_reply(&ReplyRow::from_cast(reply("0xb1", "0xb", 2, 30), "0xb", 1))
            .unwrap();

        let rows = db.feed_candidates(&[100], FeedSort::RecentReply, None, 10).unwrap();
        assert_eq!(hashes(&rows), vec!["0xa", "0xb"]);
        assert_eq!(rows[0].sort_time, at(40));

        let by_cast = db.feed_candidates(&[100], FeedSort::TimeOfCast, None, 10).unwrap();
        assert_eq!(hashes(&by_cast), vec!["0xb", "0xa"]);
    }

    #[test]
    fn metadata_rows_do_not_bump_recent_reply() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xa", 1, 10), 100, at(11)).unwrap();
        db.insert_metadata_reply(&ReplyRow::metadata(cast("0xp", 3, 50), "0xa"))
            .unwrap();

        let rows = db.feed_candidates(&[100], FeedSort::RecentReply, None, 10).unwrap();
        assert_eq!(rows[0].sort_time, at(10));
    }

    #[test]
    fn recently_curated_uses_only_eligible_curators() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xa", 1, 0), 100, at(5)).unwrap();
        db.curate_cast(&cast("0xb", 1, 0), 100, at(6)).unwrap();
        db.curate_cast(&cast("0xa", 1, 0), 200, at(30)).unwrap();

        let all = db.feed_candidates(&[100, 200], FeedSort::RecentlyCurated, None, 10).unwrap();
        assert_eq!(hashes(&all), vec!["0xa", "0xb"]);

        let only_100 = db.feed_candidates(&[100], FeedSort::RecentlyCurated, None, 10).unwrap();
        assert_eq!(hashes(&only_100), vec!["0xb", "0xa"]);

        assert!(db.feed_candidates(&[300], FeedSort::RecentlyCurated, None, 10).unwrap().is_empty());
    }

    #[test]
    fn cursor_is_strictly_less_than() {
        let db = Database::open_in_memory().unwrap();
        for (i, h) in ["0x1", "0x2", "0x3", "0x4"].iter().enumerate() {
            db.curate_cast(&cast(h, 1, i as u32), 100, at(50)).unwrap();
        }

        let page1 = db.feed_candidates(&[100], FeedSort::TimeOfCast, None, 2).unwrap();
        assert_eq!(hashes(&page1), vec!["0x4", "0x3"]);

        let cursor = page1.last().map(|r| FeedCursor {
            sort_time: r.sort_time,
            cast_hash: None,
        });
        let page2 = db.feed_candidates(&[100], FeedSort::TimeOfCast, cursor.as_ref(), 2).unwrap();
        assert_eq!(hashes(&page2), vec!["0x2", "0x1"]);
        assert!(page2.iter().all(|r| page1.iter().all(|p| r.sort_time < p.sort_time)));
    }

    #[test]
    fn tied_sort_times_continue_by_hash() {
        let db = Database::open_in_memory().unwrap();
        for h in ["0xa1", "0xa2", "0xa3"] {
            db.curate_cast(&cast(h, 1, 7), 100, at(50)).unwrap();
        }
        db.curate_cast(&cast("0xb0", 1, 3), 100, at(50)).unwrap();

        let page1 = db.feed_candidates(&[100], FeedSort::TimeOfCast, None, 2).unwrap();
        assert_eq!(hashes(&page1), vec!["0xa3", "0xa2"]);

        let cursor = page1.last().map(FeedCursor::after);
        let page2 = db.feed_candidates(&[100], FeedSort::TimeOfCast, cursor.as_ref(), 2).unwrap();
        assert_eq!(hashes(&page2), vec!["0xa1", "0xb0"]);
    }

    #[test]
    fn load_skips_malformed_payloads() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xa", 1, 0), 100, at(1)).unwrap();
        db.curate_cast(&cast("0xb", 1, 0), 100, at(1)).unwrap();
        db.with_conn_mut(|conn| {
            conn.execute("UPDATE curated_casts SET cast_data = '{not json' WHERE cast_hash = '0xb'", [])?;
            Ok(())
        })
        .unwrap();

        let loaded = db.load_curated_casts(&["0xa".into(), "0xb".into()]).unwrap();
        assert!(loaded.contains_key("0xa"));
        assert!(!loaded.contains_key("0xb"));
    }
}
