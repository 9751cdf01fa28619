use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use depthcaster_types::roles::Role;
use tracing::warn;

use crate::models::UserRow;
use crate::{Database, OptionalExt, placeholders, ts};

impl Database {
    // -- Users --

    pub fn upsert_user(
        &self,
        fid: u64,
        username: Option<&str>,
        display_name: Option<&str>,
        pfp_url: Option<&str>,
    ) -> Result<()> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (fid, username, display_name, pfp_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(fid) DO UPDATE SET
                    username = COALESCE(excluded.username, users.username),
                    display_name = COALESCE(excluded.display_name, users.display_name),
                    pfp_url = COALESCE(excluded.pfp_url, users.pfp_url),
                    updated_at = excluded.updated_at",
                rusqlite::params![fid as i64, username, display_name, pfp_url, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, fid: u64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT fid, username, display_name, pfp_url FROM users WHERE fid = ?1",
                [fid as i64],
                |row| {
                    Ok(UserRow {
                        fid: row.get::<_, i64>(0)? as u64,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        pfp_url: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Roles --

    pub fn get_roles(&self, fid: u64) -> Result<Vec<Role>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT role FROM user_roles WHERE user_fid = ?1 ORDER BY role")?;
            let raw = stmt
                .query_map([fid as i64], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let roles = raw
                .into_iter()
                .filter_map(|r| match Role::from_str(&r) {
                    Ok(role) => Some(role),
                    Err(e) => {
                        warn!("Ignoring stored role for fid {}: {}", fid, e);
                        None
                    }
                })
                .collect();
            Ok(roles)
        })
    }

    /// Returns true when the role was newly granted.
    pub fn add_role(&self, fid: u64, role: Role) -> Result<bool> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_fid, role, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![fid as i64, role.as_str(), now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn remove_role(&self, fid: u64, role: Role) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM user_roles WHERE user_fid = ?1 AND role = ?2",
                rusqlite::params![fid as i64, role.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Distinct FIDs holding any of `roles`, ascending.
    pub fn fids_with_roles(&self, roles: &[Role]) -> Result<Vec<u64>> {
        if roles.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT DISTINCT user_fid FROM user_roles WHERE role IN ({}) ORDER BY user_fid",
                placeholders(1, roles.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let fids = stmt
                .query_map(
                    rusqlite::params_from_iter(roles.iter().map(|r| r.as_str())),
                    |row| row.get::<_, i64>(0),
                )?
                .map(|r| r.map(|fid| fid as u64))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(fids)
        })
    }

    // -- Watches --

    pub fn add_watch(&self, watcher_fid: u64, watched_fid: u64) -> Result<bool> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO user_watches (watcher_fid, watched_fid, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![watcher_fid as i64, watched_fid as i64, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn remove_watch(&self, watcher_fid: u64, watched_fid: u64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM user_watches WHERE watcher_fid = ?1 AND watched_fid = ?2",
                rusqlite::params![watcher_fid as i64, watched_fid as i64],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn watchers_of(&self, watched_fid: u64) -> Result<Vec<u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT watcher_fid FROM user_watches WHERE watched_fid = ?1 ORDER BY created_at, watcher_fid",
            )?;
            let fids = stmt
                .query_map([watched_fid as i64], |row| row.get::<_, i64>(0))?
                .map(|r| r.map(|fid| fid as u64))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(fids)
        })
    }

    pub fn watched_by(&self, watcher_fid: u64) -> Result<Vec<u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT watched_fid FROM user_watches WHERE watcher_fid = ?1 ORDER BY created_at, watched_fid",
            )?;
            let fids = stmt
                .query_map([watcher_fid as i64], |row| row.get::<_, i64>(0))?
                .map(|r| r.map(|fid| fid as u64))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(fids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_roundtrip_and_filter() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.add_role(1, Role::Curator).unwrap());
        assert!(!db.add_role(1, Role::Curator).unwrap());
        db.add_role(2, Role::Admin).unwrap();
        db.add_role(3, Role::Tester).unwrap();

        assert_eq!(db.get_roles(1).unwrap(), vec![Role::Curator]);
        assert_eq!(db.fids_with_roles(&Role::curator_class()).unwrap(), vec![1, 2]);

        assert!(db.remove_role(1, Role::Curator).unwrap());
        assert_eq!(db.fids_with_roles(&Role::curator_class()).unwrap(), vec![2]);
    }

    #[test]
    fn watches_are_directed() {
        let db = Database::open_in_memory().unwrap();
        db.add_watch(10, 20).unwrap();
        db.add_watch(11, 20).unwrap();

        assert_eq!(db.watchers_of(20).unwrap(), vec![10, 11]);
        assert!(db.watchers_of(10).unwrap().is_empty());
        assert_eq!(db.watched_by(10).unwrap(), vec![20]);

        assert!(db.remove_watch(10, 20).unwrap());
        assert_eq!(db.watchers_of(20).unwrap(), vec![11]);
    }

    #[test]
    fn upsert_user_keeps_known_fields() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(5, Some("eve"), Some("Eve"), None).unwrap();
        db.upsert_user(5, None, None, Some("https://pfp")).unwrap();

        let user = db.get_user(5).unwrap().unwrap();
        assert_eq!(user.username.as_deref(), Some("eve"));
        assert_eq!(user.pfp_url.as_deref(), Some("https://pfp"));
    }
}
