//! SQLite-backed soil database.
//!
//! Each database (ssurgo, statsgo, ...) lives in a pair of tables named
//! `<db>_<mapunit_table>` and `<db>_<horizon_table>`; column names come
//! from [`SoilDbColumns`].

use super::SoilDb;
use super::soil_file::{HorizonAttrs, SoilProfile};
use crate::config::SoilDbColumns;
use crate::error::Result;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;

pub struct SoilDatabase {
    conn: Connection,
    columns: SoilDbColumns,
}

impl SoilDatabase {
    pub fn open(path: &Path, columns: SoilDbColumns) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(SoilDatabase { conn, columns })
    }

    pub fn from_connection(conn: Connection, columns: SoilDbColumns) -> Self {
        SoilDatabase { conn, columns }
    }

    fn table(&self, db: SoilDb, table: &str) -> String {
        format!("{}_{}", db.name(), table)
    }

    pub fn has_db(&self, db: SoilDb) -> Result<bool> {
        let name = self.table(db, &self.columns.mapunit_table);
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                [&name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Loads a mapunit and its horizons, `None` when the database or the
    /// mapunit is absent.
    pub fn load_profile(&self, db: SoilDb, mukey: &str) -> Result<Option<SoilProfile>> {
        if !self.has_db(db)? {
            return Ok(None);
        }
        let c = &self.columns;
        let query = format!(
            "SELECT {}, {}, {}, {}, {}, {}, {}, {}, {} FROM '{}' WHERE {} = ?",
            c.name,
            c.kind,
            c.texture,
            c.albedo,
            c.ki,
            c.kr,
            c.shcrit,
            c.avke,
            c.kslast,
            self.table(db, &c.mapunit_table),
            c.key
        );
        let mut stmt = self.conn.prepare(&query)?;
        let profile = stmt
            .query_row([mukey], |row| {
                Ok(SoilProfile {
                    mukey: mukey.to_string(),
                    name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    kind: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    texture: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    albedo: row.get(3)?,
                    ki: row.get(4)?,
                    kr: row.get(5)?,
                    shcrit: row.get(6)?,
                    avke: row.get(7)?,
                    kslast: row.get(8)?,
                    ll: None,
                    horizons: Vec::new(),
                })
            })
            .optional()?;

        let Some(mut profile) = profile else {
            return Ok(None);
        };

        let query = format!(
            "SELECT {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {} FROM '{}' WHERE {} = ? ORDER BY {}",
            c.depth,
            c.bd,
            c.ksat,
            c.fc,
            c.wp,
            c.sand,
            c.clay,
            c.om,
            c.cec,
            c.rfg,
            c.ll,
            self.table(db, &c.horizon_table),
            c.key,
            c.depth
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([mukey], |row| {
            Ok((
                HorizonAttrs {
                    // cm to mm
                    depth: row.get::<_, f64>(0)? * 10.0,
                    bd: row.get(1)?,
                    // um/s to mm/h
                    ksat: row.get::<_, Option<f64>>(2)?.map(|v| v * 3.6),
                    // percent to fraction
                    fc: row.get::<_, Option<f64>>(3)?.map(|v| v / 100.0),
                    wp: row.get::<_, Option<f64>>(4)?.map(|v| v / 100.0),
                    sand: row.get(5)?,
                    clay: row.get(6)?,
                    om: row.get(7)?,
                    cec: row.get(8)?,
                    rfg: row.get(9)?,
                },
                row.get::<_, Option<f64>>(10)?,
            ))
        })?;
        for row in rows {
            let (horizon, ll) = row?;
            if profile.ll.is_none() {
                profile.ll = ll;
            }
            profile.horizons.push(horizon);
        }
        tracing::debug!(
            mukey,
            db = db.name(),
            horizons = profile.horizons.len(),
            "loaded soil profile"
        );
        Ok(Some(profile))
    }

    /// Mapunit keys present in a database.
    pub fn mukeys(&self, db: SoilDb) -> Result<Vec<String>> {
        if !self.has_db(db)? {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {} FROM '{}' ORDER BY {}",
            self.columns.key,
            self.table(db, &self.columns.mapunit_table),
            self.columns.key
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds an in-memory database with one complete and one water mapunit.
    pub(crate) fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ssurgo_mapunit (mukey TEXT, muname TEXT, kind TEXT, texture TEXT,
                albedo REAL, ki REAL, kr REAL, shcrit REAL, avke REAL, kslast REAL);
             CREATE TABLE ssurgo_chorizon (mukey TEXT, hzdepb_r REAL, dbthirdbar_r REAL,
                ksat_r REAL, wthirdbar_r REAL, wfifteenbar_r REAL, sandtotal_r REAL,
                claytotal_r REAL, om_r REAL, cec7_r REAL, fragvol_r REAL, ll_r REAL);
             INSERT INTO ssurgo_mapunit VALUES
                ('100', 'Palouse silt loam', NULL, 'silt loam', 0.23, 5000000, 0.006, 3.5, NULL, NULL),
                ('200', 'Water', 'water', 'water', NULL, NULL, NULL, NULL, NULL, NULL);
             INSERT INTO ssurgo_chorizon VALUES
                ('100', 100, 1.3, 9.0, 30.0, 12.0, 15.0, 20.0, 3.0, 18.0, 0.0, 31.0),
                ('100', 20, 1.2, 10.0, 31.0, 11.0, 14.0, 19.0, 4.0, 19.0, 0.0, 30.0);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_load_profile_converts_units_and_orders_horizons() {
        let db = SoilDatabase::from_connection(fixture(), SoilDbColumns::default());
        let p = db.load_profile(SoilDb::Ssurgo, "100").unwrap().unwrap();
        assert_eq!(p.horizons.len(), 2);
        assert_eq!(p.horizons[0].depth, 200.0);
        assert_eq!(p.horizons[1].depth, 1000.0);
        assert!((p.horizons[0].ksat.unwrap() - 36.0).abs() < 1e-9);
        assert!((p.horizons[0].fc.unwrap() - 0.31).abs() < 1e-9);
        assert_eq!(p.ll, Some(30.0));
        assert!(p.is_complete());
    }

    #[test]
    fn test_missing_db_or_mukey_is_none() {
        let db = SoilDatabase::from_connection(fixture(), SoilDbColumns::default());
        assert!(db.load_profile(SoilDb::Statsgo, "100").unwrap().is_none());
        assert!(db.load_profile(SoilDb::Ssurgo, "999").unwrap().is_none());
        assert_eq!(db.mukeys(SoilDb::Ssurgo).unwrap(), vec!["100", "200"]);
    }
}
