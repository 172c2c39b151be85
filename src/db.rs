use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{Constraint, StoreError, StoreResult};
use crate::models::{
    ApplicationStats, ApplicationStatus, JobApplication, LinkedInProfile, NewJobApplication,
    NewUser, NewUserPreferences, User, UserPreferences, stamp_created, stamp_updated,
};

const USER_COLUMNS: &str =
    "id, email, name, linkedin_id, access_token, refresh_token, created_at, updated_at";

const APPLICATION_COLUMNS: &str = "id, user_id, job_id, company_name, job_title, location, \
     job_type, salary_range, description, application_status, applied_date, response_date, \
     interview_date, notes, created_at, updated_at";

const PREFERENCES_COLUMNS: &str = "id, user_id, experience_level, min_salary, max_salary, \
     remote_only, auto_apply, created_at, updated_at";

// Multi-valued preference tables, in the order of `ValueSets`.
const VALUE_TABLES: [&str; 4] = [
    "desired_job_titles",
    "desired_locations",
    "desired_industries",
    "desired_job_types",
];

type ValueSets = [BTreeSet<String>; 4];

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        Self::open_at(Self::default_path())
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::configure(&conn)?;
        Ok(Self { conn, path })
    }

    /// Fresh database with the schema already applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        match directories::ProjectDirs::from("", "", "autoapply") {
            Some(proj_dirs) => proj_dirs.data_dir().join("autoapply.db"),
            None => PathBuf::from("autoapply.db"),
        }
    }

    fn configure(conn: &Connection) -> Result<()> {
        // Cascades and FK checks are off by default in SQLite, per connection.
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(())
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                linkedin_id TEXT UNIQUE,
                access_token TEXT,
                refresh_token TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE ON UPDATE CASCADE,
                job_id TEXT NOT NULL,
                company_name TEXT NOT NULL,
                job_title TEXT NOT NULL,
                location TEXT,
                job_type TEXT,
                salary_range TEXT,
                description TEXT,
                application_status TEXT NOT NULL DEFAULT 'DRAFT' CHECK (application_status IN (
                    'DRAFT', 'APPLIED', 'RESPONDED', 'INTERVIEW_SCHEDULED', 'INTERVIEW_COMPLETED',
                    'OFFER_RECEIVED', 'OFFER_ACCEPTED', 'OFFER_DECLINED', 'REJECTED', 'WITHDRAWN'
                )),
                applied_date TEXT,
                response_date TEXT,
                interview_date TEXT,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_preferences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE ON UPDATE CASCADE,
                experience_level TEXT,
                min_salary INTEGER,
                max_salary INTEGER,
                remote_only INTEGER NOT NULL DEFAULT 0,
                auto_apply INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS desired_job_titles (
                preferences_id INTEGER NOT NULL REFERENCES user_preferences(id) ON DELETE CASCADE,
                value TEXT NOT NULL,
                PRIMARY KEY (preferences_id, value)
            );

            CREATE TABLE IF NOT EXISTS desired_locations (
                preferences_id INTEGER NOT NULL REFERENCES user_preferences(id) ON DELETE CASCADE,
                value TEXT NOT NULL,
                PRIMARY KEY (preferences_id, value)
            );

            CREATE TABLE IF NOT EXISTS desired_industries (
                preferences_id INTEGER NOT NULL REFERENCES user_preferences(id) ON DELETE CASCADE,
                value TEXT NOT NULL,
                PRIMARY KEY (preferences_id, value)
            );

            CREATE TABLE IF NOT EXISTS desired_job_types (
                preferences_id INTEGER NOT NULL REFERENCES user_preferences(id) ON DELETE CASCADE,
                value TEXT NOT NULL,
                PRIMARY KEY (preferences_id, value)
            );

            CREATE INDEX IF NOT EXISTS idx_applications_user ON job_applications(user_id);
            CREATE INDEX IF NOT EXISTS idx_applications_status ON job_applications(application_status);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'autoapply init' first."
            ));
        }
        Ok(())
    }

    // --- User operations ---

    pub fn create_user(&self, new: NewUser) -> StoreResult<User> {
        self.insert_user(new, None, None)
    }

    // Single stamped INSERT; tokens from a sign-in go in with the row.
    fn insert_user(
        &self,
        new: NewUser,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> StoreResult<User> {
        let tx = self.conn.unchecked_transaction()?;
        check_user_unique(&tx, &new.email, new.linkedin_id.as_deref(), None)?;

        let (created_at, updated_at) = stamp_created();
        tx.execute(
            "INSERT INTO users (email, name, linkedin_id, access_token, refresh_token,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.email,
                new.name,
                new.linkedin_id,
                access_token,
                refresh_token,
                created_at,
                updated_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!(user_id = id, email = %new.email, "created user");
        Ok(User {
            id,
            email: new.email,
            name: new.name,
            linkedin_id: new.linkedin_id,
            access_token,
            refresh_token,
            created_at,
            updated_at,
        })
    }

    pub fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        self.find_user("id = ?1", id)
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_user("email = ?1", email)
    }

    pub fn get_user_by_linkedin_id(&self, linkedin_id: &str) -> StoreResult<Option<User>> {
        self.find_user("linkedin_id = ?1", linkedin_id)
    }

    fn find_user(&self, condition: &str, key: impl rusqlite::ToSql) -> StoreResult<Option<User>> {
        let result = self.conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE {condition}"),
            [key],
            Self::row_to_user,
        );
        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let rows = stmt.query_map([], Self::row_to_user)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Writes every mutable field of `user` and refreshes `updated_at`.
    /// `created_at` is never written; `user` is reloaded from storage after.
    pub fn update_user(&self, user: &mut User) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let previous = stored_updated_at(&tx, "users", "user", user.id)?;
        check_user_unique(&tx, &user.email, user.linkedin_id.as_deref(), Some(user.id))?;

        let updated_at = stamp_updated(previous);
        tx.execute(
            "UPDATE users SET email = ?1, name = ?2, linkedin_id = ?3, access_token = ?4,
                    refresh_token = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                user.email,
                user.name,
                user.linkedin_id,
                user.access_token,
                user.refresh_token,
                updated_at,
                user.id
            ],
        )?;
        tx.commit()?;

        debug!(user_id = user.id, "updated user");
        *user = self
            .get_user(user.id)?
            .ok_or_else(|| StoreError::not_found("user", user.id))?;
        Ok(())
    }

    /// Records OAuth credentials handed over by the sign-in flow.
    pub fn store_tokens(
        &self,
        user_id: i64,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> StoreResult<User> {
        let mut user = self
            .get_user(user_id)?
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.access_token = access_token.map(str::to_string);
        user.refresh_token = refresh_token.map(str::to_string);
        self.update_user(&mut user)?;
        Ok(user)
    }

    /// Finds the account for a provider login, linking or creating it as
    /// needed: by linkedin id first, then by email, else a new user.
    /// An email match already linked to another linkedin id is a unique
    /// violation; the link is never moved.
    pub fn upsert_linkedin_user(&self, profile: LinkedInProfile) -> StoreResult<User> {
        let mut user = match self.get_user_by_linkedin_id(&profile.linkedin_id)? {
            Some(user) => user,
            None => match self.get_user_by_email(&profile.email)? {
                Some(user) if user.linkedin_id.is_some() => {
                    return Err(StoreError::violation(
                        Constraint::Unique,
                        format!(
                            "users.email '{}' is already linked to another linkedin account",
                            profile.email
                        ),
                    ));
                }
                Some(mut user) => {
                    info!(user_id = user.id, "linking existing account to linkedin");
                    user.linkedin_id = Some(profile.linkedin_id);
                    user
                }
                None => {
                    return self.insert_user(
                        NewUser::new(profile.email, profile.name)
                            .with_linkedin_id(profile.linkedin_id),
                        profile.access_token,
                        profile.refresh_token,
                    );
                }
            },
        };
        user.name = profile.name;
        user.access_token = profile.access_token;
        user.refresh_token = profile.refresh_token;
        self.update_user(&mut user)?;
        Ok(user)
    }

    /// Deletes the user together with its applications and preferences.
    /// Returns false if there was no such user.
    pub fn delete_user(&self, id: i64) -> StoreResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let applications: i64 = tx.query_row(
            "SELECT COUNT(*) FROM job_applications WHERE user_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
        tx.commit()?;

        if deleted > 0 {
            info!(user_id = id, applications, "deleted user");
        }
        Ok(deleted > 0)
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            linkedin_id: row.get(3)?,
            access_token: row.get(4)?,
            refresh_token: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // --- Job application operations ---

    pub fn create_application(&self, new: NewJobApplication) -> StoreResult<JobApplication> {
        let tx = self.conn.unchecked_transaction()?;
        check_user_exists(&tx, "job_applications", new.user_id)?;

        let status = new.status.unwrap_or_default();
        let (created_at, updated_at) = stamp_created();
        tx.execute(
            "INSERT INTO job_applications (user_id, job_id, company_name, job_title, location,
                 job_type, salary_range, description, application_status, applied_date,
                 response_date, interview_date, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                new.user_id,
                new.job_id,
                new.company_name,
                new.job_title,
                new.location,
                new.job_type,
                new.salary_range,
                new.description,
                status,
                new.applied_date,
                new.response_date,
                new.interview_date,
                new.notes,
                created_at,
                updated_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!(application_id = id, user_id = new.user_id, %status, "created application");
        Ok(JobApplication {
            id,
            user_id: new.user_id,
            job_id: new.job_id,
            company_name: new.company_name,
            job_title: new.job_title,
            location: new.location,
            job_type: new.job_type,
            salary_range: new.salary_range,
            description: new.description,
            status,
            applied_date: new.applied_date,
            response_date: new.response_date,
            interview_date: new.interview_date,
            notes: new.notes,
            created_at,
            updated_at,
        })
    }

    pub fn get_application(&self, id: i64) -> StoreResult<Option<JobApplication>> {
        let result = self.conn.query_row(
            &format!("SELECT {APPLICATION_COLUMNS} FROM job_applications WHERE id = ?1"),
            [id],
            Self::row_to_application,
        );
        match result {
            Ok(app) => Ok(Some(app)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A user's applications, newest first, optionally narrowed to one status.
    pub fn list_applications(
        &self,
        user_id: i64,
        status: Option<ApplicationStatus>,
    ) -> StoreResult<Vec<JobApplication>> {
        let mut sql =
            format!("SELECT {APPLICATION_COLUMNS} FROM job_applications WHERE user_id = ?1");
        if status.is_some() {
            sql.push_str(" AND application_status = ?2");
        }
        sql.push_str(" ORDER BY id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match status {
            Some(s) => stmt.query_map(params![user_id, s], Self::row_to_application)?,
            None => stmt.query_map([user_id], Self::row_to_application)?,
        };
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_application(&self, app: &mut JobApplication) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let previous = stored_updated_at(&tx, "job_applications", "application", app.id)?;
        check_user_exists(&tx, "job_applications", app.user_id)?;

        let updated_at = stamp_updated(previous);
        tx.execute(
            "UPDATE job_applications SET user_id = ?1, job_id = ?2, company_name = ?3,
                    job_title = ?4, location = ?5, job_type = ?6, salary_range = ?7,
                    description = ?8, application_status = ?9, applied_date = ?10,
                    response_date = ?11, interview_date = ?12, notes = ?13, updated_at = ?14
             WHERE id = ?15",
            params![
                app.user_id,
                app.job_id,
                app.company_name,
                app.job_title,
                app.location,
                app.job_type,
                app.salary_range,
                app.description,
                app.status,
                app.applied_date,
                app.response_date,
                app.interview_date,
                app.notes,
                updated_at,
                app.id
            ],
        )?;
        tx.commit()?;

        debug!(application_id = app.id, status = %app.status, "updated application");
        *app = self
            .get_application(app.id)?
            .ok_or_else(|| StoreError::not_found("application", app.id))?;
        Ok(())
    }

    /// Sets any status; transitions are not validated.
    pub fn set_application_status(
        &self,
        id: i64,
        status: ApplicationStatus,
    ) -> StoreResult<JobApplication> {
        let mut app = self
            .get_application(id)?
            .ok_or_else(|| StoreError::not_found("application", id))?;
        app.status = status;
        self.update_application(&mut app)?;
        Ok(app)
    }

    /// Marks the application as submitted, stamping `applied_date` unless
    /// it already has one.
    pub fn mark_applied(&self, id: i64) -> StoreResult<JobApplication> {
        let mut app = self
            .get_application(id)?
            .ok_or_else(|| StoreError::not_found("application", id))?;
        app.status = ApplicationStatus::Applied;
        app.applied_date.get_or_insert_with(Utc::now);
        self.update_application(&mut app)?;
        Ok(app)
    }

    pub fn delete_application(&self, id: i64) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM job_applications WHERE id = ?1", [id])?;
        if deleted > 0 {
            info!(application_id = id, "deleted application");
        }
        Ok(deleted > 0)
    }

    pub fn application_stats(&self, user_id: i64) -> StoreResult<ApplicationStats> {
        let mut stmt = self.conn.prepare(
            "SELECT application_status, COUNT(*) FROM job_applications
             WHERE user_id = ?1 GROUP BY application_status",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((row.get::<_, ApplicationStatus>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = ApplicationStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            stats.total += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<JobApplication> {
        Ok(JobApplication {
            id: row.get(0)?,
            user_id: row.get(1)?,
            job_id: row.get(2)?,
            company_name: row.get(3)?,
            job_title: row.get(4)?,
            location: row.get(5)?,
            job_type: row.get(6)?,
            salary_range: row.get(7)?,
            description: row.get(8)?,
            status: row.get(9)?,
            applied_date: row.get(10)?,
            response_date: row.get(11)?,
            interview_date: row.get(12)?,
            notes: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    // --- Preferences operations ---

    /// Fails with a unique violation if the user already has preferences.
    pub fn create_preferences(&self, new: NewUserPreferences) -> StoreResult<UserPreferences> {
        let tx = self.conn.unchecked_transaction()?;
        check_user_exists(&tx, "user_preferences", new.user_id)?;
        let existing: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM user_preferences WHERE user_id = ?1)",
            [new.user_id],
            |row| row.get(0),
        )?;
        if existing {
            return Err(StoreError::violation(
                Constraint::Unique,
                format!("user_preferences.user_id: user #{} already has preferences", new.user_id),
            ));
        }

        let (created_at, updated_at) = stamp_created();
        tx.execute(
            "INSERT INTO user_preferences (user_id, experience_level, min_salary, max_salary,
                 remote_only, auto_apply, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.user_id,
                new.experience_level,
                new.min_salary,
                new.max_salary,
                new.remote_only,
                new.auto_apply,
                created_at,
                updated_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        let prefs = UserPreferences {
            id,
            user_id: new.user_id,
            desired_job_titles: new.desired_job_titles,
            desired_locations: new.desired_locations,
            desired_industries: new.desired_industries,
            desired_job_types: new.desired_job_types,
            experience_level: new.experience_level,
            min_salary: new.min_salary,
            max_salary: new.max_salary,
            remote_only: new.remote_only,
            auto_apply: new.auto_apply,
            created_at,
            updated_at,
        };
        replace_value_sets(&tx, &prefs)?;
        tx.commit()?;

        info!(preferences_id = id, user_id = prefs.user_id, "created preferences");
        Ok(prefs)
    }

    pub fn get_preferences(&self, id: i64) -> StoreResult<Option<UserPreferences>> {
        self.find_preferences("id = ?1", id)
    }

    pub fn get_preferences_for_user(&self, user_id: i64) -> StoreResult<Option<UserPreferences>> {
        self.find_preferences("user_id = ?1", user_id)
    }

    fn find_preferences(&self, condition: &str, key: i64) -> StoreResult<Option<UserPreferences>> {
        let result = self.conn.query_row(
            &format!("SELECT {PREFERENCES_COLUMNS} FROM user_preferences WHERE {condition}"),
            [key],
            Self::row_to_preferences,
        );
        let mut prefs = match result {
            Ok(prefs) => prefs,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let [titles, locations, industries, job_types] = load_value_sets(&self.conn, prefs.id)?;
        prefs.desired_job_titles = titles;
        prefs.desired_locations = locations;
        prefs.desired_industries = industries;
        prefs.desired_job_types = job_types;
        Ok(Some(prefs))
    }

    /// Rewrites the scalar columns and replaces all four value sets.
    pub fn update_preferences(&self, prefs: &mut UserPreferences) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let previous = stored_updated_at(&tx, "user_preferences", "preferences", prefs.id)?;
        check_user_exists(&tx, "user_preferences", prefs.user_id)?;

        let updated_at = stamp_updated(previous);
        tx.execute(
            "UPDATE user_preferences SET user_id = ?1, experience_level = ?2, min_salary = ?3,
                    max_salary = ?4, remote_only = ?5, auto_apply = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                prefs.user_id,
                prefs.experience_level,
                prefs.min_salary,
                prefs.max_salary,
                prefs.remote_only,
                prefs.auto_apply,
                updated_at,
                prefs.id
            ],
        )?;
        replace_value_sets(&tx, prefs)?;
        tx.commit()?;

        debug!(preferences_id = prefs.id, "updated preferences");
        *prefs = self
            .get_preferences(prefs.id)?
            .ok_or_else(|| StoreError::not_found("preferences", prefs.id))?;
        Ok(())
    }

    /// Create-or-update keyed by user. An existing record keeps its id and
    /// `created_at`.
    pub fn save_preferences(&self, new: NewUserPreferences) -> StoreResult<UserPreferences> {
        match self.get_preferences_for_user(new.user_id)? {
            Some(mut prefs) => {
                prefs.apply(new);
                self.update_preferences(&mut prefs)?;
                Ok(prefs)
            }
            None => self.create_preferences(new),
        }
    }

    pub fn delete_preferences(&self, id: i64) -> StoreResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM user_preferences WHERE id = ?1", [id])?;
        if deleted > 0 {
            info!(preferences_id = id, "deleted preferences");
        }
        Ok(deleted > 0)
    }

    fn row_to_preferences(row: &rusqlite::Row) -> rusqlite::Result<UserPreferences> {
        Ok(UserPreferences {
            id: row.get(0)?,
            user_id: row.get(1)?,
            desired_job_titles: BTreeSet::new(),
            desired_locations: BTreeSet::new(),
            desired_industries: BTreeSet::new(),
            desired_job_types: BTreeSet::new(),
            experience_level: row.get(2)?,
            min_salary: row.get(3)?,
            max_salary: row.get(4)?,
            remote_only: row.get(5)?,
            auto_apply: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

// --- Constraint checks ---

fn check_user_unique(
    conn: &Connection,
    email: &str,
    linkedin_id: Option<&str>,
    exclude_id: Option<i64>,
) -> StoreResult<()> {
    // `id IS NOT NULL` matches every row when there is nothing to exclude.
    let email_taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 AND id IS NOT ?2)",
        params![email, exclude_id],
        |row| row.get(0),
    )?;
    if email_taken {
        return Err(StoreError::violation(
            Constraint::Unique,
            format!("users.email '{}' already exists", email),
        ));
    }

    if let Some(linkedin_id) = linkedin_id {
        let linkedin_taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE linkedin_id = ?1 AND id IS NOT ?2)",
            params![linkedin_id, exclude_id],
            |row| row.get(0),
        )?;
        if linkedin_taken {
            return Err(StoreError::violation(
                Constraint::Unique,
                format!("users.linkedin_id '{}' already exists", linkedin_id),
            ));
        }
    }
    Ok(())
}

fn check_user_exists(conn: &Connection, table: &str, user_id: i64) -> StoreResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [user_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(StoreError::violation(
            Constraint::ForeignKey,
            format!("{}.user_id references missing user #{}", table, user_id),
        ));
    }
    Ok(())
}

fn stored_updated_at(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: i64,
) -> StoreResult<DateTime<Utc>> {
    let result = conn.query_row(
        &format!("SELECT updated_at FROM {table} WHERE id = ?1"),
        [id],
        |row| row.get(0),
    );
    match result {
        Ok(stamp) => Ok(stamp),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::not_found(entity, id)),
        Err(e) => Err(e.into()),
    }
}

// --- Preference value sets ---

fn replace_value_sets(conn: &Connection, prefs: &UserPreferences) -> StoreResult<()> {
    let sets = [
        &prefs.desired_job_titles,
        &prefs.desired_locations,
        &prefs.desired_industries,
        &prefs.desired_job_types,
    ];
    for (table, values) in VALUE_TABLES.iter().zip(sets) {
        conn.execute(
            &format!("DELETE FROM {table} WHERE preferences_id = ?1"),
            [prefs.id],
        )?;
        let mut stmt =
            conn.prepare(&format!("INSERT INTO {table} (preferences_id, value) VALUES (?1, ?2)"))?;
        for value in values {
            stmt.execute(params![prefs.id, value])?;
        }
    }
    Ok(())
}

fn load_value_sets(conn: &Connection, preferences_id: i64) -> StoreResult<ValueSets> {
    let mut sets: ValueSets = Default::default();
    for (table, set) in VALUE_TABLES.iter().zip(sets.iter_mut()) {
        let mut stmt = conn.prepare(&format!(
            "SELECT value FROM {table} WHERE preferences_id = ?1"
        ))?;
        let rows = stmt.query_map([preferences_id], |row| row.get::<_, String>(0))?;
        for value in rows {
            set.insert(value?);
        }
    }
    Ok(sets)
}
