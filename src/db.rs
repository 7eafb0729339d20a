use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

use crate::model::{
    Course, EnrollmentNo, EnrollmentRecord, ListFilter, MarksheetAggregate, MarksheetRow, Page,
    Remarks, Subject, SubjectScore,
};
use crate::storage::{Storage, StorageError};

pub const DB_FILE_NAME: &str = "marksheet.sqlite3";

/// Two daemons may share one workspace; writers queue for this long before
/// SQLite reports the database as busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            duration_months INTEGER NOT NULL DEFAULT 0,
            subjects_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            enrollment_no TEXT PRIMARY KEY,
            student_name TEXT NOT NULL,
            guardian_name TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            course_code TEXT NOT NULL,
            center_code TEXT NOT NULL,
            activated INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(course_code) REFERENCES courses(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_center ON enrollments(center_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marksheets(
            id TEXT PRIMARY KEY,
            enrollment_no TEXT NOT NULL,
            year TEXT NOT NULL,
            scores_json TEXT NOT NULL,
            total_marks INTEGER NOT NULL,
            total_full INTEGER NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            remarks TEXT NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(enrollment_no) REFERENCES enrollments(enrollment_no)
        )",
        [],
    )?;
    // Natural key: one marksheet per enrollment and year. Concurrent
    // submissions are arbitrated here.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_marksheets_enrollment_year
         ON marksheets(enrollment_no, year)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}

/// [`Storage`] over a workspace SQLite connection.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const ENROLLMENT_COLUMNS: &str = "e.enrollment_no, e.student_name, e.guardian_name, e.date_of_birth,
     e.course_code, e.center_code, e.activated, e.created_at";

const MARKSHEET_COLUMNS: &str = "m.id, m.enrollment_no, m.year, m.scores_json, m.total_marks,
     m.total_full, m.percentage, m.grade, m.remarks, m.verified, m.created_at, m.updated_at";

// Matches every row when the search parameter is NULL.
const CENTER_FILTER: &str = "(?1 IS NULL OR instr(lower(e.center_code), lower(?1)) > 0)";

struct EnrollmentRow {
    enrollment_no: String,
    student_name: String,
    guardian_name: String,
    date_of_birth: String,
    course_code: String,
    center_code: String,
    activated: i64,
    created_at: String,
}

impl EnrollmentRow {
    /// Reads the enrollment columns starting at `base`.
    fn read(r: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            enrollment_no: r.get(base)?,
            student_name: r.get(base + 1)?,
            guardian_name: r.get(base + 2)?,
            date_of_birth: r.get(base + 3)?,
            course_code: r.get(base + 4)?,
            center_code: r.get(base + 5)?,
            activated: r.get(base + 6)?,
            created_at: r.get(base + 7)?,
        })
    }

    fn into_record(self) -> Result<EnrollmentRecord, StorageError> {
        let enrollment_no = EnrollmentNo::parse(&self.enrollment_no)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let date_of_birth = chrono::NaiveDate::parse_from_str(&self.date_of_birth, "%Y-%m-%d")
            .map_err(|e| {
                StorageError::Corrupt(format!(
                    "enrollment {} date_of_birth: {}",
                    self.enrollment_no, e
                ))
            })?;
        Ok(EnrollmentRecord {
            enrollment_no,
            student_name: self.student_name,
            guardian_name: self.guardian_name,
            date_of_birth,
            course_code: self.course_code,
            center_code: self.center_code,
            activated: self.activated != 0,
            created_at: self.created_at,
        })
    }
}

struct MarksheetDbRow {
    id: String,
    enrollment_no: String,
    year: String,
    scores_json: String,
    total_marks: i64,
    total_full: i64,
    percentage: f64,
    grade: String,
    remarks: String,
    verified: i64,
    created_at: String,
    updated_at: String,
}

impl MarksheetDbRow {
    fn read(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            enrollment_no: r.get(1)?,
            year: r.get(2)?,
            scores_json: r.get(3)?,
            total_marks: r.get(4)?,
            total_full: r.get(5)?,
            percentage: r.get(6)?,
            grade: r.get(7)?,
            remarks: r.get(8)?,
            verified: r.get(9)?,
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
        })
    }

    fn into_aggregate(self) -> Result<MarksheetAggregate, StorageError> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            StorageError::Corrupt(format!("marksheet {} {}: {}", self.id, what, e))
        };
        let enrollment_no =
            EnrollmentNo::parse(&self.enrollment_no).map_err(|e| corrupt("enrollment_no", &e))?;
        let scores: Vec<SubjectScore> =
            serde_json::from_str(&self.scores_json).map_err(|e| corrupt("scores_json", &e))?;
        let remarks = Remarks::parse(Some(self.remarks.as_str())).map_err(|e| corrupt("remarks", &e))?;
        let total_marks = u32::try_from(self.total_marks).map_err(|e| corrupt("total_marks", &e))?;
        let total_full = u32::try_from(self.total_full).map_err(|e| corrupt("total_full", &e))?;
        Ok(MarksheetAggregate {
            id: self.id,
            enrollment_no,
            year: self.year,
            scores,
            total_marks,
            total_full,
            percentage: self.percentage,
            grade: self.grade,
            remarks,
            verified: self.verified != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn scores_json(aggregate: &MarksheetAggregate) -> Result<String, StorageError> {
    serde_json::to_string(&aggregate.scores).map_err(|e| StorageError::Query(e.to_string()))
}

impl Storage for SqliteStore<'_> {
    fn get_enrollment(&self, no: &EnrollmentNo) -> Result<Option<EnrollmentRecord>, StorageError> {
        let sql = format!(
            "SELECT {} FROM enrollments e WHERE e.enrollment_no = ?",
            ENROLLMENT_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [no.as_str()], |r| EnrollmentRow::read(r, 0))
            .optional()?;
        row.map(EnrollmentRow::into_record).transpose()
    }

    fn put_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO enrollments(
                enrollment_no, student_name, guardian_name, date_of_birth,
                course_code, center_code, activated, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                record.enrollment_no.as_str(),
                &record.student_name,
                &record.guardian_name,
                record.date_of_birth.format("%Y-%m-%d").to_string(),
                &record.course_code,
                &record.center_code,
                i64::from(record.activated),
                &record.created_at,
                &record.created_at,
            ),
        )?;
        Ok(())
    }

    fn update_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE enrollments
             SET student_name = ?, guardian_name = ?, date_of_birth = ?,
                 course_code = ?, center_code = ?, activated = ?, updated_at = ?
             WHERE enrollment_no = ?",
            (
                &record.student_name,
                &record.guardian_name,
                record.date_of_birth.format("%Y-%m-%d").to_string(),
                &record.course_code,
                &record.center_code,
                i64::from(record.activated),
                chrono::Utc::now().to_rfc3339(),
                record.enrollment_no.as_str(),
            ),
        )?;
        if changed == 0 {
            return Err(StorageError::Query(format!(
                "enrollment {} does not exist",
                record.enrollment_no
            )));
        }
        Ok(())
    }

    fn list_enrollments(
        &self,
        filter: &ListFilter,
    ) -> Result<Page<EnrollmentRecord>, StorageError> {
        let search = filter.center_search.as_deref();
        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM enrollments e WHERE {}", CENTER_FILTER),
            rusqlite::params![search],
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM enrollments e WHERE {}
             ORDER BY e.created_at, e.rowid
             LIMIT ?2 OFFSET ?3",
            ENROLLMENT_COLUMNS, CENTER_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![search, filter.page_size, filter.offset() as i64],
                |r| EnrollmentRow::read(r, 0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        let items = rows
            .into_iter()
            .map(EnrollmentRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page: filter.page.max(1),
            page_size: filter.page_size,
            total: total.max(0) as u64,
        })
    }

    fn get_course(&self, code: &str) -> Result<Option<Course>, StorageError> {
        let row: Option<(String, String, i64, String)> = self
            .conn
            .query_row(
                "SELECT code, name, duration_months, subjects_json FROM courses WHERE code = ?",
                [code],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((code, name, duration_months, subjects_json)) = row else {
            return Ok(None);
        };
        let subjects: Vec<Subject> = serde_json::from_str(&subjects_json)
            .map_err(|e| StorageError::Corrupt(format!("course {} subjects_json: {}", code, e)))?;
        Ok(Some(Course {
            code,
            name,
            duration_months: duration_months.max(0) as u32,
            subjects,
        }))
    }

    fn put_course(&self, course: &Course) -> Result<(), StorageError> {
        let subjects_json = serde_json::to_string(&course.subjects)
            .map_err(|e| StorageError::Query(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO courses(code, name, duration_months, subjects_json, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                duration_months = excluded.duration_months,
                subjects_json = excluded.subjects_json,
                updated_at = excluded.updated_at",
            (
                &course.code,
                &course.name,
                i64::from(course.duration_months),
                subjects_json,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    fn get_aggregate(
        &self,
        no: &EnrollmentNo,
        year: &str,
    ) -> Result<Option<MarksheetAggregate>, StorageError> {
        let sql = format!(
            "SELECT {} FROM marksheets m WHERE m.enrollment_no = ? AND m.year = ?",
            MARKSHEET_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, (no.as_str(), year.trim()), MarksheetDbRow::read)
            .optional()?;
        row.map(MarksheetDbRow::into_aggregate).transpose()
    }

    fn get_aggregate_by_id(&self, id: &str) -> Result<Option<MarksheetAggregate>, StorageError> {
        let sql = format!("SELECT {} FROM marksheets m WHERE m.id = ?", MARKSHEET_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, [id], MarksheetDbRow::read)
            .optional()?;
        row.map(MarksheetDbRow::into_aggregate).transpose()
    }

    fn put_aggregate(&self, aggregate: &MarksheetAggregate) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO marksheets(
                id, enrollment_no, year, scores_json, total_marks, total_full,
                percentage, grade, remarks, verified, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                aggregate.id,
                aggregate.enrollment_no.as_str(),
                aggregate.year,
                scores_json(aggregate)?,
                aggregate.total_marks,
                aggregate.total_full,
                aggregate.percentage,
                aggregate.grade,
                aggregate.remarks.as_str(),
                aggregate.verified,
                aggregate.created_at,
                aggregate.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_aggregate(
        &self,
        aggregate: &MarksheetAggregate,
        read: &MarksheetAggregate,
    ) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE marksheets
             SET scores_json = ?, total_marks = ?, total_full = ?, percentage = ?,
                 grade = ?, remarks = ?, verified = ?, updated_at = ?
             WHERE id = ? AND updated_at = ? AND verified = ?",
            rusqlite::params![
                scores_json(aggregate)?,
                aggregate.total_marks,
                aggregate.total_full,
                aggregate.percentage,
                aggregate.grade,
                aggregate.remarks.as_str(),
                aggregate.verified,
                aggregate.updated_at,
                aggregate.id,
                read.updated_at,
                read.verified,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::Conflict(format!(
                "marksheet {} was modified or removed",
                aggregate.id
            )));
        }
        Ok(())
    }

    fn set_verified(&self, id: &str, from: bool, updated_at: &str) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE marksheets SET verified = ?, updated_at = ?
             WHERE id = ? AND verified = ?",
            rusqlite::params![!from, updated_at, id, from],
        )?;
        Ok(changed > 0)
    }

    fn list_aggregates(&self, filter: &ListFilter) -> Result<Page<MarksheetRow>, StorageError> {
        let search = filter.center_search.as_deref();
        let total: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM marksheets m
                 JOIN enrollments e ON e.enrollment_no = m.enrollment_no
                 WHERE {}",
                CENTER_FILTER
            ),
            rusqlite::params![search],
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT {}, {} FROM marksheets m
             JOIN enrollments e ON e.enrollment_no = m.enrollment_no
             WHERE {}
             ORDER BY m.created_at, m.rowid
             LIMIT ?2 OFFSET ?3",
            MARKSHEET_COLUMNS, ENROLLMENT_COLUMNS, CENTER_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![search, filter.page_size, filter.offset() as i64],
                |r| Ok((MarksheetDbRow::read(r)?, EnrollmentRow::read(r, 12)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (m, e) in rows {
            items.push(MarksheetRow {
                marksheet: m.into_aggregate()?,
                enrollment: e.into_record()?,
            });
        }

        Ok(Page {
            items,
            page: filter.page.max(1),
            page_size: filter.page_size,
            total: total.max(0) as u64,
        })
    }
}
