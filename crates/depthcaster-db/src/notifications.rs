use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use depthcaster_types::events::WebhookKind;
use rusqlite::types::Value;
use tracing::warn;

use crate::models::{NewNotification, NotificationRow, WebhookRow};
use crate::{Database, parse_ts, placeholders, ts};

impl Database {
    // -- Notifications --

    /// Returns false when an identical notification (same user, kind and
    /// cast) already exists, which absorbs webhook redeliveries.
    pub fn insert_notification(&self, n: &NewNotification) -> Result<bool> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO notifications (user_fid, kind, actor_fid, cast_hash, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    n.user_fid as i64,
                    n.kind,
                    n.actor_fid.map(|f| f as i64),
                    n.cast_hash,
                    n.message,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn list_notifications(&self, user_fid: u64, limit: u32) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_fid, kind, actor_fid, cast_hash, message, is_read, created_at
                 FROM notifications
                 WHERE user_fid = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_fid as i64, limit], |row| {
                    Ok((
                        NotificationRow {
                            id: row.get(0)?,
                            user_fid: row.get::<_, i64>(1)? as u64,
                            kind: row.get(2)?,
                            actor_fid: row.get::<_, Option<i64>>(3)?.map(|f| f as u64),
                            cast_hash: row.get(4)?,
                            message: row.get(5)?,
                            is_read: row.get::<_, i64>(6)? != 0,
                            created_at: Default::default(),
                        },
                        row.get::<_, String>(7)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(|(mut n, created_at)| {
                    n.created_at = parse_ts(&created_at).unwrap_or_default();
                    n
                })
                .collect())
        })
    }

    /// Mark `ids` (or everything when `None`) read for `user_fid`.
    pub fn mark_notifications_read(&self, user_fid: u64, ids: Option<&[i64]>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = match ids {
                None => conn.execute(
                    "UPDATE notifications SET is_read = 1 WHERE user_fid = ?1 AND is_read = 0",
                    [user_fid as i64],
                )?,
                Some([]) => 0,
                Some(ids) => {
                    let sql = format!(
                        "UPDATE notifications SET is_read = 1 WHERE user_fid = ?1 AND id IN ({})",
                        placeholders(2, ids.len())
                    );
                    let mut params = vec![Value::Integer(user_fid as i64)];
                    params.extend(ids.iter().map(|id| Value::Integer(*id)));
                    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?
                }
            };
            Ok(changed)
        })
    }

    // -- Webhooks --

    pub fn upsert_webhook(&self, id: &str, kind: WebhookKind, secret: &str, url: Option<&str>) -> Result<()> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO webhooks (id, webhook_type, secret, url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    webhook_type = excluded.webhook_type,
                    secret = excluded.secret,
                    url = excluded.url",
                rusqlite::params![id, kind.as_str(), secret, url, now],
            )?;
            Ok(())
        })
    }

    pub fn list_webhooks(&self) -> Result<Vec<WebhookRow>> {
        let raw = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, webhook_type, secret, url FROM webhooks ORDER BY created_at, id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(raw
            .into_iter()
            .filter_map(|(id, kind, secret, url)| match WebhookKind::from_str(&kind) {
                Ok(kind) => Some(WebhookRow { id, kind, secret, url }),
                Err(e) => {
                    warn!("Ignoring webhook {}: {}", id, e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(user: u64, cast: &str) -> NewNotification {
        NewNotification {
            user_fid: user,
            kind: "watched-cast".into(),
            actor_fid: Some(2),
            cast_hash: Some(cast.into()),
            message: "new cast".into(),
        }
    }

    #[test]
    fn duplicate_notifications_are_absorbed() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_notification(&note(1, "0xa")).unwrap());
        assert!(!db.insert_notification(&note(1, "0xa")).unwrap());
        assert!(db.insert_notification(&note(1, "0xb")).unwrap());
        assert_eq!(db.list_notifications(1, 10).unwrap().len(), 2);
    }

    #[test]
    fn mark_read_by_id_and_all() {
        let db = Database::open_in_memory().unwrap();
        db.insert_notification(&note(1, "0xa")).unwrap();
        db.insert_notification(&note(1, "0xb")).unwrap();
        db.insert_notification(&note(2, "0xa")).unwrap();

        let first = db.list_notifications(1, 10).unwrap()[0].id;
        assert_eq!(db.mark_notifications_read(1, Some(&[first])).unwrap(), 1);
        assert_eq!(db.mark_notifications_read(1, None).unwrap(), 1);
        assert!(db.list_notifications(1, 10).unwrap().iter().all(|n| n.is_read));
        assert!(!db.list_notifications(2, 10).unwrap()[0].is_read);
    }

    #[test]
    fn webhooks_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_webhook("wh1", WebhookKind::CuratedReply, "s1", None).unwrap();
        db.upsert_webhook("wh1", WebhookKind::CuratedQuote, "s2", Some("https://x")).unwrap();

        let hooks = db.list_webhooks().unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].kind, WebhookKind::CuratedQuote);
        assert_eq!(hooks[0].secret, "s2");
    }
}
