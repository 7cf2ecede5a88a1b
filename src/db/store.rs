//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found")]
    NotFound,
}

/// Thread-safe database store.
///
/// Every statement runs under the one connection lock, so a range query
/// never interleaves with a retention delete.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Targets ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO targets (name, host, group_name, description, enabled) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.name,
                target.host,
                target.group,
                target.description,
                target.enabled,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Insert or update a target keyed by its name. Returns the target ID.
    pub fn upsert_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO targets (name, host, group_name, description, enabled) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
             host=excluded.host, group_name=excluded.group_name,
             description=excluded.description, enabled=excluded.enabled",
            params![
                target.name,
                target.host,
                target.group,
                target.description,
                target.enabled,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM targets WHERE name = ?1",
            params![target.name],
            |row| row.get(0),
        )?;
        target.id = id;
        Ok(id)
    }

    /// Upsert every seed target by name. Targets absent from the seed are
    /// left alone. Returns how many were written.
    pub fn sync_targets(&self, seeds: &[Target]) -> Result<usize, DbError> {
        for seed in seeds {
            let mut target = seed.clone();
            self.upsert_target(&mut target)?;
        }
        Ok(seeds.len())
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, host, group_name, description, enabled FROM targets ORDER BY id",
        )?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, name, host, group_name, description, enabled FROM targets WHERE id = ?1",
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Enable or disable a target. Targets are otherwise edited through the
    /// seed file.
    #[cfg(test)]
    pub fn set_target_enabled(&self, id: i64, enabled: bool) -> Result<(), DbError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE targets SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Delete a target and its samples.
    #[cfg(test)]
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM ping_results WHERE target_id = ?1", params![id])?;
        tx.execute("DELETE FROM route_results WHERE target_id = ?1", params![id])?;
        tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // --- Ping samples ---

    /// Append a ping sample.
    pub fn append_ping(&self, sample: &PingSample) -> Result<(), DbError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO ping_results (target_id, time, packets_sent, packets_received, packet_loss,
             min_rtt, avg_rtt, max_rtt, jitter, is_alive, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                sample.target_id,
                format_db_time(sample.time),
                sample.packets_sent,
                sample.packets_received,
                sample.packet_loss,
                sample.min_rtt,
                sample.avg_rtt,
                sample.max_rtt,
                sample.jitter,
                sample.is_alive,
                sample.error,
            ],
        )?;
        Ok(())
    }

    /// Get ping samples for a target at or after `since`, newest first.
    pub fn query_ping_range(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PingSample>, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT target_id, time, packets_sent, packets_received, packet_loss,
             min_rtt, avg_rtt, max_rtt, jitter, is_alive, error
             FROM ping_results
             WHERE target_id = ?1 AND time >= ?2 ORDER BY time DESC LIMIT ?3",
        )?;

        let results = stmt
            .query_map(
                params![target_id, format_db_time(since), limit as i64],
                ping_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    // --- Route samples ---

    /// Append a route sample.
    pub fn append_route(&self, sample: &RouteSample) -> Result<(), DbError> {
        let hops = serde_json::to_string(&sample.hops)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO route_results (target_id, time, hops, destination_reached, total_hops, source, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sample.target_id,
                format_db_time(sample.time),
                hops,
                sample.destination_reached,
                sample.total_hops,
                sample.source.map(|s| s.as_str()),
                sample.error,
            ],
        )?;
        Ok(())
    }

    /// Get route samples for a target at or after `since`, newest first.
    pub fn query_route_range(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RouteSample>, DbError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT target_id, time, hops, destination_reached, total_hops, source, error
             FROM route_results
             WHERE target_id = ?1 AND time >= ?2 ORDER BY time DESC LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(
                params![target_id, format_db_time(since), limit as i64],
                |row| {
                    let time_str: String = row.get(1)?;
                    let hops: String = row.get(2)?;
                    let source: Option<String> = row.get(5)?;
                    Ok((
                        row.get::<_, i64>(0)?,
                        time_str,
                        hops,
                        row.get::<_, bool>(3)?,
                        row.get::<_, u32>(4)?,
                        source,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(target_id, time_str, hops, destination_reached, total_hops, source, error)| {
                Ok(RouteSample {
                    target_id,
                    time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                    hops: serde_json::from_str(&hops)?,
                    destination_reached,
                    total_hops,
                    source: source.as_deref().and_then(RouteSource::parse),
                    error,
                })
            })
            .collect()
    }

    // --- Retention ---

    /// Delete every sample older than `cutoff`. Returns the number of rows removed.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let cutoff = format_db_time(cutoff);
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let pings = tx.execute("DELETE FROM ping_results WHERE time < ?1", params![cutoff])?;
        let routes = tx.execute("DELETE FROM route_results WHERE time < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(pings + routes)
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        host: row.get(2)?,
        group: row.get(3)?,
        description: row.get(4)?,
        enabled: row.get(5)?,
    })
}

fn ping_from_row(row: &Row<'_>) -> SqlResult<PingSample> {
    let time_str: String = row.get(1)?;
    Ok(PingSample {
        target_id: row.get(0)?,
        time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        packets_sent: row.get(2)?,
        packets_received: row.get(3)?,
        packet_loss: row.get(4)?,
        min_rtt: row.get(5)?,
        avg_rtt: row.get(6)?,
        max_rtt: row.get(7)?,
        jitter: row.get(8)?,
        is_alive: row.get(9)?,
        error: row.get(10)?,
    })
}

fn format_db_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add_target(store: &Store, name: &str) -> i64 {
        let mut target = Target {
            name: name.to_string(),
            host: "example.com".to_string(),
            ..Default::default()
        };
        store.add_target(&mut target).unwrap()
    }

    fn alive_sample(target_id: i64, time: DateTime<Utc>, avg: f64) -> PingSample {
        let rtt = RttSummary { min: avg - 1.0, avg, max: avg + 1.0, jitter: 0.4 };
        PingSample::new(target_id, time, 10, 10, 0.0, Some(rtt))
    }

    #[test]
    fn test_target_registry() {
        let (_tmp, store) = test_store();

        let id = add_target(&store, "Test");
        assert!(id > 0);
        assert_eq!(store.get_target(id).unwrap().name, "Test");

        store.set_target_enabled(id, false).unwrap();
        assert!(!store.get_target(id).unwrap().enabled);

        let mut seeded = Target {
            name: "Test".to_string(),
            host: "1.1.1.1".to_string(),
            group: Some("dns".to_string()),
            ..Default::default()
        };
        assert_eq!(store.upsert_target(&mut seeded).unwrap(), id);
        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.host, "1.1.1.1");
        assert!(fetched.enabled);
        assert_eq!(store.get_targets().unwrap().len(), 1);

        store.delete_target(id).unwrap();
        assert!(matches!(store.get_target(id), Err(DbError::NotFound)));
        assert!(matches!(store.set_target_enabled(id, true), Err(DbError::NotFound)));
    }

    #[test]
    fn test_sync_targets_upserts_by_name() {
        let (_tmp, store) = test_store();
        let kept = add_target(&store, "Manual");
        let existing = add_target(&store, "Cloudflare");

        let seeds = vec![
            Target {
                name: "Cloudflare".to_string(),
                host: "1.1.1.1".to_string(),
                ..Default::default()
            },
            Target {
                name: "Quad9".to_string(),
                host: "9.9.9.9".to_string(),
                enabled: false,
                ..Default::default()
            },
        ];
        assert_eq!(store.sync_targets(&seeds).unwrap(), 2);

        let targets = store.get_targets().unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(store.get_target(existing).unwrap().host, "1.1.1.1");
        assert_eq!(store.get_target(kept).unwrap().host, "example.com");
        assert!(targets.iter().any(|t| t.name == "Quad9" && !t.enabled));
    }

    #[test]
    fn test_ping_range_is_newest_first_and_limited() {
        let (_tmp, store) = test_store();
        let id = add_target(&store, "A");
        let now = Utc::now();

        for i in 0..5 {
            store
                .append_ping(&alive_sample(id, now - ChronoDuration::minutes(i), 10.0 + i as f64))
                .unwrap();
        }
        store
            .append_ping(&PingSample::failed(id, now - ChronoDuration::hours(2), 10, Some("timeout".into())))
            .unwrap();

        let recent = store.query_ping_range(id, now - ChronoDuration::hours(1), 100).unwrap();
        assert_eq!(recent.len(), 5);
        assert!(recent.windows(2).all(|w| w[0].time > w[1].time));
        assert_eq!(recent[0].avg_rtt, Some(10.0));

        let limited = store.query_ping_range(id, now - ChronoDuration::hours(3), 2).unwrap();
        assert_eq!(limited.len(), 2);

        let all = store.query_ping_range(id, now - ChronoDuration::hours(3), 100).unwrap();
        let failed = all.last().unwrap();
        assert!(!failed.is_alive);
        assert_eq!(failed.avg_rtt, None);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_delete_older_than_keeps_recent() {
        let (_tmp, store) = test_store();
        let id = add_target(&store, "A");
        let now = Utc::now();

        store.append_ping(&alive_sample(id, now - ChronoDuration::days(31), 10.0)).unwrap();
        store.append_ping(&alive_sample(id, now - ChronoDuration::days(1), 20.0)).unwrap();

        let removed = store.delete_older_than(now - ChronoDuration::days(30)).unwrap();
        assert_eq!(removed, 1);

        let left = store.query_ping_range(id, now - ChronoDuration::days(60), 10).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].avg_rtt, Some(20.0));
    }

    #[test]
    fn test_route_roundtrip_and_cascade() {
        let (_tmp, store) = test_store();
        let id = add_target(&store, "A");
        let now = Utc::now();

        let hop = Hop {
            hop: 1,
            ip: Some("192.168.1.1".to_string()),
            hostname: None,
            rtts: vec![1.0, 2.0, 3.0],
            avg_rtt: Some(2.0),
            min_rtt: Some(1.0),
            max_rtt: Some(3.0),
            last_rtt: None,
            std_dev: None,
            sent: None,
            loss: 0.0,
        };
        let sample = RouteSample::new(id, now, vec![hop], true, RouteSource::Traceroute);
        store.append_route(&sample).unwrap();
        store
            .append_route(&RouteSample::failed(id, now - ChronoDuration::minutes(5), "no tools".into()))
            .unwrap();

        let routes = store.query_route_range(id, now - ChronoDuration::hours(1), 10).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].hops, sample.hops);
        assert_eq!(routes[0].source, Some(RouteSource::Traceroute));
        assert_eq!(routes[1].source, None);
        assert_eq!(routes[1].total_hops, 0);

        store.delete_target(id).unwrap();
        assert!(store.query_route_range(id, now - ChronoDuration::hours(1), 10).unwrap().is_empty());
    }

    #[test]
    fn test_route_hop_floats_are_exact() {
        let (_tmp, store) = test_store();
        let id = add_target(&store, "A");
        let now = Utc::now();

        let rtts = vec![11.024, 10.998, 11.310];
        let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
        let hop = Hop {
            hop: 1,
            ip: Some("8.8.8.8".to_string()),
            hostname: None,
            rtts,
            avg_rtt: Some(avg),
            min_rtt: Some(10.998),
            max_rtt: Some(11.310),
            last_rtt: Some(11.310),
            std_dev: Some(0.1406698956038),
            sent: Some(3),
            loss: 33.333333333333336,
        };
        let sample = RouteSample::new(id, now, vec![hop], true, RouteSource::Traceroute);
        store.append_route(&sample).unwrap();

        let routes = store.query_route_range(id, now - ChronoDuration::hours(1), 10).unwrap();
        assert_eq!(routes[0].hops, sample.hops);
        assert_eq!(routes[0].hops[0].avg_rtt.map(f64::to_bits), Some(avg.to_bits()));
    }

    #[test]
    fn test_parse_db_time() {
        let t = parse_db_time("2024-01-01 12:34:56.123456789").unwrap();
        assert_eq!(format_db_time(t), "2024-01-01 12:34:56.123456789");
        assert!(parse_db_time("2024-01-01T12:34:56Z").is_some());
        assert!(parse_db_time("garbage").is_none());
    }
}
