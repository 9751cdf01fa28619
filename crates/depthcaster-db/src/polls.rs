use anyhow::Result;
use chrono::Utc;
use depthcaster_types::cast::normalize_hash;
use depthcaster_types::poll::{PollAnswer, PollType};
use rusqlite::{Connection, ToSql};
use tracing::warn;

use crate::models::{NewPoll, PollOptionRow, PollResponseRow, PollRow};
use crate::{Database, OptionalExt, conflict_or, parse_ts, ts};

const POLL_COLUMNS: &str =
    "id, cast_hash, slug, question, poll_type, choices, allocation_budget, created_by, created_at";

fn query_poll(conn: &Connection, filter: &str, value: &dyn ToSql) -> Result<Option<PollRow>> {
    let sql = format!("SELECT {POLL_COLUMNS} FROM polls WHERE {filter} = ?1");
    let raw = conn
        .query_row(&sql, [value], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .optional()?;

    let Some((id, cast_hash, slug, question, poll_type, choices, budget, created_by, created_at)) = raw
    else {
        return Ok(None);
    };

    let poll_type: PollType = poll_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!("poll {}: {}", id, e))?;
    let choices: Vec<String> = serde_json::from_str(&choices).unwrap_or_else(|e| {
        warn!("Poll {} has malformed choices: {}", id, e);
        Vec::new()
    });

    let mut stmt = conn.prepare(
        "SELECT id, option_text, order_index FROM poll_options WHERE poll_id = ?1 ORDER BY order_index, id",
    )?;
    let options = stmt
        .query_map([id], |row| {
            Ok(PollOptionRow {
                id: row.get(0)?,
                text: row.get(1)?,
                order_index: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Some(PollRow {
        id,
        cast_hash,
        slug,
        question,
        poll_type,
        choices,
        allocation_budget: budget.max(0) as u32,
        created_by: created_by as u64,
        created_at: parse_ts(&created_at).unwrap_or_default(),
        options,
    }))
}

impl Database {
    // -- Polls --

    /// Create a poll with its options. A second poll on the same cast, or a
    /// reused slug, is a [`crate::DbError::Conflict`].
    pub fn create_poll(&self, poll: &NewPoll) -> Result<PollRow> {
        let hash = normalize_hash(&poll.cast_hash);
        let choices = serde_json::to_string(&poll.choices)?;
        let now = ts(Utc::now());

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO polls (cast_hash, slug, question, poll_type, choices, allocation_budget, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    hash,
                    poll.slug,
                    poll.question,
                    poll.poll_type.as_str(),
                    choices,
                    poll.allocation_budget as i64,
                    poll.created_by as i64,
                    now,
                ],
            )
            .map_err(|e| conflict_or(e, "poll already exists for this cast or slug"))?;
            let poll_id = tx.last_insert_rowid();

            for (index, text) in poll.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO poll_options (poll_id, option_text, order_index) VALUES (?1, ?2, ?3)",
                    rusqlite::params![poll_id, text, index as i64],
                )?;
            }
            tx.commit()?;

            query_poll(conn, "id", &poll_id)?
                .ok_or_else(|| anyhow::anyhow!("poll {} vanished after insert", poll_id))
        })
    }

    pub fn get_poll_by_cast(&self, cast_hash: &str) -> Result<Option<PollRow>> {
        let hash = normalize_hash(cast_hash);
        self.with_conn(|conn| query_poll(conn, "cast_hash", &hash))
    }

    pub fn get_poll_by_slug(&self, slug: &str) -> Result<Option<PollRow>> {
        self.with_conn(|conn| query_poll(conn, "slug", &slug))
    }

    pub fn delete_poll(&self, cast_hash: &str) -> Result<bool> {
        let hash = normalize_hash(cast_hash);
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM polls WHERE cast_hash = ?1", [&hash])?;
            Ok(changed > 0)
        })
    }

    /// One response per (poll, user); resubmitting replaces the answer.
    pub fn upsert_poll_response(&self, poll_id: i64, user_fid: u64, answer: &PollAnswer) -> Result<()> {
        let body = serde_json::to_string(answer)?;
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO poll_responses (poll_id, user_fid, response, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(poll_id, user_fid) DO UPDATE SET
                    response = excluded.response,
                    updated_at = excluded.updated_at",
                rusqlite::params![poll_id, user_fid as i64, body, now],
            )?;
            Ok(())
        })
    }

    pub fn poll_responses(&self, poll_id: i64) -> Result<Vec<PollResponseRow>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_fid, response FROM poll_responses WHERE poll_id = ?1 ORDER BY created_at, user_fid",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(raw
            .into_iter()
            .filter_map(|(user_fid, body)| match serde_json::from_str::<PollAnswer>(&body) {
                Ok(answer) => Some(PollResponseRow {
                    poll_id,
                    user_fid: user_fid as u64,
                    answer,
                }),
                Err(e) => {
                    warn!("Skipping malformed response of fid {} on poll {}: {}", user_fid, poll_id, e);
                    None
                }
            })
            .collect())
    }

    pub fn poll_response_for(&self, poll_id: i64, user_fid: u64) -> Result<Option<PollAnswer>> {
        let body: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT response FROM poll_responses WHERE poll_id = ?1 AND user_fid = ?2",
                rusqlite::params![poll_id, user_fid as i64],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(body.and_then(|b| serde_json::from_str(&b).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;
    use crate::testutil::{at, cast};

    fn new_poll(slug: Option<&str>) -> NewPoll {
        NewPoll {
            cast_hash: "0xaaa".into(),
            slug: slug.map(str::to_string),
            question: "Best client?".into(),
            poll_type: PollType::Ranking,
            choices: vec![],
            allocation_budget: 100,
            created_by: 1,
            options: vec!["a".into(), "b".into(), "c".into()],
        }
    }

    #[test]
    fn create_and_fetch_with_ordered_options() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xaaa", 1, 0), 1, at(1)).unwrap();

        let poll = db.create_poll(&new_poll(Some("best"))).unwrap();
        let texts: Vec<_> = poll.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(db.get_poll_by_slug("best").unwrap().unwrap().id, poll.id);
    }

    #[test]
    fn duplicate_poll_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xaaa", 1, 0), 1, at(1)).unwrap();
        db.create_poll(&new_poll(None)).unwrap();

        let err = db.create_poll(&new_poll(None)).unwrap_err();
        assert!(err.downcast_ref::<DbError>().is_some());
    }

    #[test]
    fn responses_replace_per_user() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xaaa", 1, 0), 1, at(1)).unwrap();
        let poll = db.create_poll(&new_poll(None)).unwrap();
        let ids: Vec<i64> = poll.options.iter().map(|o| o.id).collect();

        db.upsert_poll_response(poll.id, 9, &PollAnswer::Ranking(ids.clone())).unwrap();
        let reversed: Vec<i64> = ids.iter().rev().copied().collect();
        db.upsert_poll_response(poll.id, 9, &PollAnswer::Ranking(reversed.clone()))
            .unwrap();

        let responses = db.poll_responses(poll.id).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].answer, PollAnswer::Ranking(reversed));
    }

    #[test]
    fn poll_goes_with_its_cast() {
        let db = Database::open_in_memory().unwrap();
        db.curate_cast(&cast("0xaaa", 1, 0), 1, at(1)).unwrap();
        db.create_poll(&new_poll(None)).unwrap();
        db.delete_curated_cast("0xaaa").unwrap();
        assert!(db.get_poll_by_cast("0xaaa").unwrap().is_none());
    }
}
