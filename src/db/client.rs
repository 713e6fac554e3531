use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::*;

#[derive(Debug, Clone)]
pub struct Database {
    pub(super) pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database file and bootstrap the schema
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!("Connecting to sqlite://{}", database_path);
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publishers (
                id TEXT PRIMARY KEY,
                cvid INTEGER UNIQUE,
                cvurl TEXT,
                name TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                logo TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                cvid INTEGER NOT NULL UNIQUE,
                cvurl TEXT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                sort_title TEXT NOT NULL,
                publisher_id TEXT,
                year INTEGER,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (publisher_id) REFERENCES publishers (id) ON DELETE SET NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS issues (
                id TEXT PRIMARY KEY,
                cvid INTEGER NOT NULL UNIQUE,
                cvurl TEXT,
                series_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                slug TEXT NOT NULL UNIQUE,
                number TEXT NOT NULL,
                cover_date TEXT,
                description TEXT NOT NULL DEFAULT '',
                file TEXT NOT NULL UNIQUE,
                cover TEXT,
                status TEXT NOT NULL DEFAULT '{}',
                leaf INTEGER NOT NULL DEFAULT 1,
                page_count INTEGER NOT NULL DEFAULT 0,
                mod_ts TEXT NOT NULL,
                import_date TEXT NOT NULL,
                FOREIGN KEY (series_id) REFERENCES series (id) ON DELETE CASCADE
            )
            "#,
            READ_STATUS_UNREAD
        ))
        .execute(&self.pool)
        .await?;

        for kind in [
            EntityKind::Arc,
            EntityKind::Character,
            EntityKind::Team,
            EntityKind::Creator,
        ] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    cvid INTEGER NOT NULL UNIQUE,
                    cvurl TEXT,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL DEFAULT '',
                    image TEXT,
                    created_at TEXT NOT NULL
                )
                "#,
                kind.table()
            ))
            .execute(&self.pool)
            .await?;

            // Issue-to-entity junction tables
            if let Some((join_table, column)) = kind.issue_join() {
                sqlx::query(&format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {join_table} (
                        issue_id TEXT NOT NULL,
                        {column} TEXT NOT NULL,
                        PRIMARY KEY (issue_id, {column}),
                        FOREIGN KEY (issue_id) REFERENCES issues (id) ON DELETE CASCADE,
                        FOREIGN KEY ({column}) REFERENCES {table} (id) ON DELETE CASCADE
                    )
                    "#,
                    table = kind.table(),
                ))
                .execute(&self.pool)
                .await?;

                sqlx::query(&format!(
                    "CREATE INDEX IF NOT EXISTS idx_{join_table}_{column} ON {join_table} ({column})"
                ))
                .execute(&self.pool)
                .await?;
            }
        }

        // Character-Team membership
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS character_teams (
                character_id TEXT NOT NULL,
                team_id TEXT NOT NULL,
                PRIMARY KEY (character_id, team_id),
                FOREIGN KEY (character_id) REFERENCES characters (id) ON DELETE CASCADE,
                FOREIGN KEY (team_id) REFERENCES teams (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS roles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS creator_credits (
                id TEXT PRIMARY KEY,
                creator_id TEXT NOT NULL,
                issue_id TEXT NOT NULL,
                FOREIGN KEY (creator_id) REFERENCES creators (id) ON DELETE CASCADE,
                FOREIGN KEY (issue_id) REFERENCES issues (id) ON DELETE CASCADE,
                UNIQUE(creator_id, issue_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_roles (
                credit_id TEXT NOT NULL,
                role_id TEXT NOT NULL,
                PRIMARY KEY (credit_id, role_id),
                FOREIGN KEY (credit_id) REFERENCES creator_credits (id) ON DELETE CASCADE,
                FOREIGN KEY (role_id) REFERENCES roles (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_series_id ON issues (series_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_character_teams_team_id ON character_teams (team_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_creator_credits_issue_id ON creator_credits (issue_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Whether `slug` is already taken in `table`
    pub async fn slug_exists(&self, table: &str, slug: &str) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        slug_exists_in(&mut conn, table, slug).await
    }

    /// Try `base`, `base-1`, `base-2`, ... until a free slug is found
    pub async fn unique_slug(&self, table: &str, base: &str) -> Result<String, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        unique_slug_in(&mut conn, table, base).await
    }

    // Publishers

    /// Insert a publisher unless one with the same name exists. Returns true if inserted.
    pub async fn insert_publisher_if_absent(
        &self,
        publisher: &DbPublisher,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_publisher_if_absent_in(&mut conn, publisher).await
    }

    pub async fn get_publisher_by_name(
        &self,
        name: &str,
    ) -> Result<Option<DbPublisher>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_publisher_by_name_in(&mut conn, name).await
    }

    pub async fn get_publisher_by_cvid(
        &self,
        cvid: i64,
    ) -> Result<Option<DbPublisher>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_publisher_by_cvid_in(&mut conn, cvid).await
    }

    pub async fn get_publisher_by_id(&self, id: &str) -> Result<Option<DbPublisher>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM publishers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(publisher_from_row).transpose()
    }

    /// Record the catalog id and descriptive fields of a publisher
    pub async fn update_publisher_details(
        &self,
        publisher_id: &str,
        cvid: Option<i64>,
        details: &EntityDetails,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        update_publisher_details_in(&mut conn, publisher_id, cvid, details).await
    }

    // Series

    /// Insert a series unless its catalog id is already present. Returns true if inserted.
    pub async fn insert_series_if_absent(&self, series: &DbSeries) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_series_if_absent_in(&mut conn, series).await
    }

    pub async fn get_series_by_cvid(&self, cvid: i64) -> Result<Option<DbSeries>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_series_by_cvid_in(&mut conn, cvid).await
    }

    pub async fn get_series_by_id(&self, id: &str) -> Result<Option<DbSeries>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM series WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(series_from_row).transpose()
    }

    pub async fn get_all_series(&self) -> Result<Vec<DbSeries>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM series ORDER BY sort_title")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(series_from_row).collect()
    }

    pub async fn update_series_details(
        &self,
        series_id: &str,
        year: Option<i32>,
        details: &EntityDetails,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE series
            SET year = COALESCE(?, year), cvurl = COALESCE(?, cvurl), description = ?
            WHERE id = ?
            "#,
        )
        .bind(year)
        .bind(&details.cvurl)
        .bind(&details.desc)
        .bind(series_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Issues

    /// Insert a new issue
    ///
    /// Fails with a unique violation if the file path, catalog id or slug is taken.
    pub async fn insert_issue(&self, issue: &DbIssue) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_issue_in(&mut conn, issue).await
    }

    pub async fn get_issues(&self) -> Result<Vec<DbIssue>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM issues ORDER BY file")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(issue_from_row).collect()
    }

    pub async fn get_issue_by_id(&self, id: &str) -> Result<Option<DbIssue>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM issues WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    pub async fn get_issue_by_cvid(&self, cvid: i64) -> Result<Option<DbIssue>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_issue_by_cvid_in(&mut conn, cvid).await
    }

    pub async fn get_issues_for_series(
        &self,
        series_id: &str,
    ) -> Result<Vec<DbIssue>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM issues WHERE series_id = ? ORDER BY number")
            .bind(series_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(issue_from_row).collect()
    }

    /// All file paths currently backed by an issue row
    pub async fn get_issue_files(&self) -> Result<HashSet<String>, sqlx::Error> {
        let files: Vec<String> = sqlx::query_scalar("SELECT file FROM issues")
            .fetch_all(&self.pool)
            .await?;
        Ok(files.into_iter().collect())
    }

    pub async fn update_issue_details(
        &self,
        issue_id: &str,
        name: Option<&str>,
        details: &EntityDetails,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE issues
            SET name = COALESCE(?, name), cvurl = COALESCE(?, cvurl), description = ?,
                cover = COALESCE(?, cover)
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(&details.cvurl)
        .bind(&details.desc)
        .bind(&details.image)
        .bind(issue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_issue_status(
        &self,
        issue_id: &str,
        status: ReadStatus,
        leaf: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE issues SET status = ?, leaf = ? WHERE id = ?")
            .bind(status)
            .bind(leaf)
            .bind(issue_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Arcs, characters, teams, creators

    /// Insert an entity unless its catalog id is already present. Returns true if inserted.
    pub async fn insert_entity_if_absent(
        &self,
        kind: EntityKind,
        entity: &DbEntity,
    ) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_entity_if_absent_in(&mut conn, kind, entity).await
    }

    pub async fn get_entity_by_cvid(
        &self,
        kind: EntityKind,
        cvid: i64,
    ) -> Result<Option<DbEntity>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_entity_by_cvid_in(&mut conn, kind, cvid).await
    }

    pub async fn get_entities(&self, kind: EntityKind) -> Result<Vec<DbEntity>, sqlx::Error> {
        let rows = sqlx::query(&format!("SELECT * FROM {} ORDER BY name", kind.table()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_from_row).collect()
    }

    pub async fn update_entity_details(
        &self,
        kind: EntityKind,
        entity_id: &str,
        details: &EntityDetails,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            r#"
            UPDATE {}
            SET cvurl = COALESCE(?, cvurl), description = ?, image = COALESCE(?, image)
            WHERE id = ?
            "#,
            kind.table()
        ))
        .bind(&details.cvurl)
        .bind(&details.desc)
        .bind(&details.image)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link an arc, character or team to an issue (no-op if already linked)
    pub async fn attach_entity_to_issue(
        &self,
        kind: EntityKind,
        issue_id: &str,
        entity_id: &str,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        attach_entity_to_issue_in(&mut conn, kind, issue_id, entity_id).await
    }

    /// Entities of `kind` linked to an issue, ordered by name
    pub async fn get_entities_for_issue(
        &self,
        kind: EntityKind,
        issue_id: &str,
    ) -> Result<Vec<DbEntity>, sqlx::Error> {
        let query = match kind.issue_join() {
            Some((join_table, column)) => format!(
                r#"
                SELECT e.* FROM {table} e
                JOIN {join_table} j ON e.id = j.{column}
                WHERE j.issue_id = ?
                ORDER BY e.name
                "#,
                table = kind.table(),
            ),
            None => r#"
                SELECT e.* FROM creators e
                JOIN creator_credits c ON e.id = c.creator_id
                WHERE c.issue_id = ?
                ORDER BY e.name
                "#
            .to_string(),
        };

        let rows = sqlx::query(&query)
            .bind(issue_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_from_row).collect()
    }

    /// Add a character to a team (no-op if already a member)
    pub async fn attach_character_to_team(
        &self,
        character_id: &str,
        team_id: &str,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        attach_character_to_team_in(&mut conn, character_id, team_id).await
    }

    pub async fn get_teams_for_character(
        &self,
        character_id: &str,
    ) -> Result<Vec<DbEntity>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM teams t
            JOIN character_teams ct ON t.id = ct.team_id
            WHERE ct.character_id = ?
            ORDER BY t.name
            "#,
        )
        .bind(character_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entity_from_row).collect()
    }

    // Roles and creator credits

    /// Fetch the role with this name, creating it if needed
    pub async fn get_or_create_role(&self, name: &str) -> Result<DbRole, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_or_create_role_in(&mut conn, name).await
    }

    /// Fetch the credit linking a creator to an issue, creating it if needed
    pub async fn get_or_create_credit(
        &self,
        creator_id: &str,
        issue_id: &str,
    ) -> Result<DbCreatorCredit, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        get_or_create_credit_in(&mut conn, creator_id, issue_id).await
    }

    pub async fn attach_role_to_credit(
        &self,
        credit_id: &str,
        role_id: &str,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        attach_role_to_credit_in(&mut conn, credit_id, role_id).await
    }

    pub async fn get_credits_for_issue(
        &self,
        issue_id: &str,
    ) -> Result<Vec<DbCreatorCredit>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, creator_id, issue_id FROM creator_credits WHERE issue_id = ? ORDER BY id",
        )
        .bind(issue_id)
        .fetch_all(&self.pool)
        .await?;

        let mut credits = Vec::new();
        for row in rows {
            credits.push(DbCreatorCredit {
                id: row.try_get("id")?,
                creator_id: row.try_get("creator_id")?,
                issue_id: row.try_get("issue_id")?,
            });
        }
        Ok(credits)
    }

    /// Roles attached to a credit, ordered by name
    pub async fn get_roles_for_credit(&self, credit_id: &str) -> Result<Vec<DbRole>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name FROM roles r
            JOIN credit_roles cr ON r.id = cr.role_id
            WHERE cr.credit_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(credit_id)
        .fetch_all(&self.pool)
        .await?;

        let mut roles = Vec::new();
        for row in rows {
            roles.push(DbRole {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            });
        }
        Ok(roles)
    }

    /// Number of rows still pointing at an image path
    pub async fn image_references(&self, image: &str) -> Result<i64, sqlx::Error> {
        let mut total: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM issues WHERE cover = ?1)
                 + (SELECT COUNT(*) FROM publishers WHERE logo = ?1)
            "#,
        )
        .bind(image)
        .fetch_one(&self.pool)
        .await?;

        for kind in [
            EntityKind::Arc,
            EntityKind::Character,
            EntityKind::Team,
            EntityKind::Creator,
        ] {
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE image = ?",
                kind.table()
            ))
            .bind(image)
            .fetch_one(&self.pool)
            .await?;
            total += count;
        }
        Ok(total)
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
    }

    // Deletion

    /// Rows that may be left without references once `issue_id` is deleted
    pub async fn orphan_candidates(&self, issue_id: &str) -> Result<OrphanCandidates, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        orphan_candidates_in(&mut conn, issue_id).await
    }

    /// Delete an issue and sweep whatever it leaves orphaned, in one transaction
    ///
    /// Arcs, characters and teams with no remaining issue, teams whose last
    /// swept character was their only member, and a series with no remaining
    /// issue are removed. Creators and roles are kept.
    pub async fn delete_issue(&self, issue_id: &str) -> Result<OrphanSweep, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let candidates = orphan_candidates_in(&mut tx, issue_id).await?;

        let mut sweep = OrphanSweep::default();

        let cover: Option<Option<String>> =
            sqlx::query_scalar("SELECT cover FROM issues WHERE id = ?")
                .bind(issue_id)
                .fetch_optional(&mut *tx)
                .await?;
        if let Some(Some(cover)) = cover {
            sweep.images.push(cover);
        }

        sqlx::query("DELETE FROM issues WHERE id = ?")
            .bind(issue_id)
            .execute(&mut *tx)
            .await?;

        for arc_id in &candidates.arcs {
            if count_issue_refs(&mut tx, EntityKind::Arc, arc_id).await? == 0 {
                delete_entity_in(&mut tx, EntityKind::Arc, arc_id, &mut sweep.images).await?;
                sweep.arcs.push(arc_id.clone());
            }
        }

        // Teams of swept characters lose a member and are re-checked below
        let mut membership_candidates = Vec::new();
        for character_id in &candidates.characters {
            if count_issue_refs(&mut tx, EntityKind::Character, character_id).await? == 0 {
                let teams: Vec<String> =
                    sqlx::query_scalar("SELECT team_id FROM character_teams WHERE character_id = ?")
                        .bind(character_id)
                        .fetch_all(&mut *tx)
                        .await?;
                membership_candidates.extend(teams);

                delete_entity_in(&mut tx, EntityKind::Character, character_id, &mut sweep.images)
                    .await?;
                sweep.characters.push(character_id.clone());
            }
        }

        for team_id in &candidates.teams {
            if count_issue_refs(&mut tx, EntityKind::Team, team_id).await? == 0 {
                delete_entity_in(&mut tx, EntityKind::Team, team_id, &mut sweep.images).await?;
                sweep.teams.push(team_id.clone());
            }
        }

        for team_id in membership_candidates {
            if sweep.teams.contains(&team_id) {
                continue;
            }
            let members: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM character_teams WHERE team_id = ?")
                    .bind(&team_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if members == 0 {
                delete_entity_in(&mut tx, EntityKind::Team, &team_id, &mut sweep.images).await?;
                sweep.teams.push(team_id);
            }
        }

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues WHERE series_id = ?")
            .bind(&candidates.series_id)
            .fetch_one(&mut *tx)
            .await?;
        if remaining == 0 && !candidates.series_id.is_empty() {
            sqlx::query("DELETE FROM series WHERE id = ?")
                .bind(&candidates.series_id)
                .execute(&mut *tx)
                .await?;
            sweep.series = Some(candidates.series_id.clone());
        }

        tx.commit().await?;
        Ok(sweep)
    }
}

pub(super) async fn slug_exists_in(
    conn: &mut SqliteConnection,
    table: &str,
    slug: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE slug = ?", table))
            .bind(slug)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count > 0)
}

pub(super) async fn unique_slug_in(
    conn: &mut SqliteConnection,
    table: &str,
    base: &str,
) -> Result<String, sqlx::Error> {
    if !slug_exists_in(&mut *conn, table, base).await? {
        return Ok(base.to_string());
    }

    let mut n = 1u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !slug_exists_in(&mut *conn, table, &candidate).await? {
            debug!("Slug '{}' taken in {}, using '{}'", base, table, candidate);
            return Ok(candidate);
        }
        n += 1;
    }
}

pub(super) async fn insert_publisher_if_absent_in(
    conn: &mut SqliteConnection,
    publisher: &DbPublisher,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO publishers (id, cvid, cvurl, name, slug, description, logo, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(&publisher.id)
    .bind(publisher.cvid)
    .bind(&publisher.cvurl)
    .bind(&publisher.name)
    .bind(&publisher.slug)
    .bind(&publisher.desc)
    .bind(&publisher.logo)
    .bind(format_timestamp(&publisher.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn get_publisher_by_name_in(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<DbPublisher>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM publishers WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(publisher_from_row).transpose()
}

pub(super) async fn get_publisher_by_cvid_in(
    conn: &mut SqliteConnection,
    cvid: i64,
) -> Result<Option<DbPublisher>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM publishers WHERE cvid = ?")
        .bind(cvid)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(publisher_from_row).transpose()
}

pub(super) async fn update_publisher_details_in(
    conn: &mut SqliteConnection,
    publisher_id: &str,
    cvid: Option<i64>,
    details: &EntityDetails,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE publishers
        SET cvid = COALESCE(?, cvid), cvurl = COALESCE(?, cvurl), description = ?,
            logo = COALESCE(?, logo)
        WHERE id = ?
        "#,
    )
    .bind(cvid)
    .bind(&details.cvurl)
    .bind(&details.desc)
    .bind(&details.image)
    .bind(publisher_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(super) async fn insert_series_if_absent_in(
    conn: &mut SqliteConnection,
    series: &DbSeries,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO series (
            id, cvid, cvurl, name, slug, sort_title, publisher_id,
            year, description, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(cvid) DO NOTHING
        "#,
    )
    .bind(&series.id)
    .bind(series.cvid)
    .bind(&series.cvurl)
    .bind(&series.name)
    .bind(&series.slug)
    .bind(&series.sort_title)
    .bind(&series.publisher_id)
    .bind(series.year)
    .bind(&series.desc)
    .bind(format_timestamp(&series.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn get_series_by_cvid_in(
    conn: &mut SqliteConnection,
    cvid: i64,
) -> Result<Option<DbSeries>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM series WHERE cvid = ?")
        .bind(cvid)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(series_from_row).transpose()
}

pub(super) async fn insert_issue_in(
    conn: &mut SqliteConnection,
    issue: &DbIssue,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO issues (
            id, cvid, cvurl, series_id, name, slug, number, cover_date,
            description, file, cover, status, leaf, page_count, mod_ts, import_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&issue.id)
    .bind(issue.cvid)
    .bind(&issue.cvurl)
    .bind(&issue.series_id)
    .bind(&issue.name)
    .bind(&issue.slug)
    .bind(&issue.number)
    .bind(issue.cover_date)
    .bind(&issue.desc)
    .bind(&issue.file)
    .bind(&issue.cover)
    .bind(issue.status)
    .bind(issue.leaf)
    .bind(issue.page_count)
    .bind(format_timestamp(&issue.mod_ts))
    .bind(format_timestamp(&issue.import_date))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(super) async fn get_issue_by_cvid_in(
    conn: &mut SqliteConnection,
    cvid: i64,
) -> Result<Option<DbIssue>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM issues WHERE cvid = ?")
        .bind(cvid)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(issue_from_row).transpose()
}

pub(super) async fn insert_entity_if_absent_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity: &DbEntity,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&format!(
        r#"
        INSERT INTO {} (id, cvid, cvurl, name, slug, description, image, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(cvid) DO NOTHING
        "#,
        kind.table()
    ))
    .bind(&entity.id)
    .bind(entity.cvid)
    .bind(&entity.cvurl)
    .bind(&entity.name)
    .bind(&entity.slug)
    .bind(&entity.desc)
    .bind(&entity.image)
    .bind(format_timestamp(&entity.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn get_entity_by_cvid_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    cvid: i64,
) -> Result<Option<DbEntity>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT * FROM {} WHERE cvid = ?", kind.table()))
        .bind(cvid)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(entity_from_row).transpose()
}

pub(super) async fn attach_entity_to_issue_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    issue_id: &str,
    entity_id: &str,
) -> Result<(), sqlx::Error> {
    let Some((join_table, column)) = kind.issue_join() else {
        return Err(sqlx::Error::Protocol(format!(
            "{} rows are linked through credits",
            kind.label()
        )));
    };

    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {} (issue_id, {}) VALUES (?, ?)",
        join_table, column
    ))
    .bind(issue_id)
    .bind(entity_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(super) async fn attach_character_to_team_in(
    conn: &mut SqliteConnection,
    character_id: &str,
    team_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO character_teams (character_id, team_id) VALUES (?, ?)")
        .bind(character_id)
        .bind(team_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(super) async fn get_or_create_role_in(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<DbRole, sqlx::Error> {
    sqlx::query("INSERT INTO roles (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .execute(&mut *conn)
        .await?;

    let row = sqlx::query("SELECT id, name FROM roles WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(DbRole {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

pub(super) async fn get_or_create_credit_in(
    conn: &mut SqliteConnection,
    creator_id: &str,
    issue_id: &str,
) -> Result<DbCreatorCredit, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO creator_credits (id, creator_id, issue_id) VALUES (?, ?, ?)
        ON CONFLICT(creator_id, issue_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(creator_id)
    .bind(issue_id)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT id, creator_id, issue_id FROM creator_credits WHERE creator_id = ? AND issue_id = ?",
    )
    .bind(creator_id)
    .bind(issue_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(DbCreatorCredit {
        id: row.try_get("id")?,
        creator_id: row.try_get("creator_id")?,
        issue_id: row.try_get("issue_id")?,
    })
}

pub(super) async fn attach_role_to_credit_in(
    conn: &mut SqliteConnection,
    credit_id: &str,
    role_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO credit_roles (credit_id, role_id) VALUES (?, ?)")
        .bind(credit_id)
        .bind(role_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn orphan_candidates_in(
    conn: &mut SqliteConnection,
    issue_id: &str,
) -> Result<OrphanCandidates, sqlx::Error> {
    let series_id: Option<String> = sqlx::query_scalar("SELECT series_id FROM issues WHERE id = ?")
        .bind(issue_id)
        .fetch_optional(&mut *conn)
        .await?;

    let mut candidates = OrphanCandidates {
        series_id: series_id.unwrap_or_default(),
        ..Default::default()
    };

    for kind in [EntityKind::Arc, EntityKind::Character, EntityKind::Team] {
        if let Some((join_table, column)) = kind.issue_join() {
            let ids: Vec<String> = sqlx::query_scalar(&format!(
                "SELECT {} FROM {} WHERE issue_id = ?",
                column, join_table
            ))
            .bind(issue_id)
            .fetch_all(&mut *conn)
            .await?;

            match kind {
                EntityKind::Arc => candidates.arcs = ids,
                EntityKind::Character => candidates.characters = ids,
                EntityKind::Team => candidates.teams = ids,
                EntityKind::Creator => {}
            }
        }
    }

    Ok(candidates)
}

async fn count_issue_refs(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
) -> Result<i64, sqlx::Error> {
    let Some((join_table, column)) = kind.issue_join() else {
        return Ok(0);
    };
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        join_table, column
    ))
    .bind(entity_id)
    .fetch_one(&mut *conn)
    .await
}

async fn delete_entity_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
    images: &mut Vec<String>,
) -> Result<(), sqlx::Error> {
    let image: Option<Option<String>> =
        sqlx::query_scalar(&format!("SELECT image FROM {} WHERE id = ?", kind.table()))
            .bind(entity_id)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some(Some(image)) = image {
        images.push(image);
    }

    sqlx::query(&format!("DELETE FROM {} WHERE id = ?", kind.table()))
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Timestamps are stored as RFC 3339 with nanoseconds so file mtimes round-trip exactly
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(super) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub(super) fn publisher_from_row(row: &SqliteRow) -> Result<DbPublisher, sqlx::Error> {
    Ok(DbPublisher {
        id: row.try_get("id")?,
        cvid: row.try_get("cvid")?,
        cvurl: row.try_get("cvurl")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        desc: row.try_get("description")?,
        logo: row.try_get("logo")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

pub(super) fn series_from_row(row: &SqliteRow) -> Result<DbSeries, sqlx::Error> {
    Ok(DbSeries {
        id: row.try_get("id")?,
        cvid: row.try_get("cvid")?,
        cvurl: row.try_get("cvurl")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        sort_title: row.try_get("sort_title")?,
        publisher_id: row.try_get("publisher_id")?,
        year: row.try_get("year")?,
        desc: row.try_get("description")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

pub(super) fn issue_from_row(row: &SqliteRow) -> Result<DbIssue, sqlx::Error> {
    Ok(DbIssue {
        id: row.try_get("id")?,
        cvid: row.try_get("cvid")?,
        cvurl: row.try_get("cvurl")?,
        series_id: row.try_get("series_id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        number: row.try_get("number")?,
        cover_date: row.try_get::<Option<NaiveDate>, _>("cover_date")?,
        desc: row.try_get("description")?,
        file: row.try_get("file")?,
        cover: row.try_get("cover")?,
        status: row.try_get("status")?,
        leaf: row.try_get("leaf")?,
        page_count: row.try_get("page_count")?,
        mod_ts: parse_timestamp(&row.try_get::<String, _>("mod_ts")?)?,
        import_date: parse_timestamp(&row.try_get::<String, _>("import_date")?)?,
    })
}

pub(super) fn entity_from_row(row: &SqliteRow) -> Result<DbEntity, sqlx::Error> {
    Ok(DbEntity {
        id: row.try_get("id")?,
        cvid: row.try_get("cvid")?,
        cvurl: row.try_get("cvurl")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        desc: row.try_get("description")?,
        image: row.try_get("image")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

/// True when the error is a UNIQUE constraint failure
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let database = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (database, temp_dir)
    }

    #[test]
    fn test_timestamp_round_trip_keeps_nanoseconds() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T10:20:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
    }

    #[tokio::test]
    async fn test_unique_slug_numbers_suffixes() {
        let (db, _dir) = open_test_db().await;

        for (cvid, expected) in [(1, "batman"), (2, "batman-1"), (3, "batman-2")] {
            let slug = db.unique_slug("characters", "batman").await.unwrap();
            assert_eq!(slug, expected);
            let entity = DbEntity::new(cvid, "Batman", &slug);
            assert!(db
                .insert_entity_if_absent(EntityKind::Character, &entity)
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_insert_entity_if_absent_keeps_first_row() {
        let (db, _dir) = open_test_db().await;

        let first = DbEntity::new(2357, "Aquaman", "aquaman");
        let second = DbEntity::new(2357, "Aquaman", "aquaman-1");
        assert!(db.insert_entity_if_absent(EntityKind::Character, &first).await.unwrap());
        assert!(!db.insert_entity_if_absent(EntityKind::Character, &second).await.unwrap());

        let stored = db
            .get_entity_by_cvid(EntityKind::Character, 2357)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(db.count_rows("characters").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_roles_are_shared() {
        let (db, _dir) = open_test_db().await;

        let writer = db.get_or_create_role("Writer").await.unwrap();
        let again = db.get_or_create_role("Writer").await.unwrap();
        assert_eq!(writer.id, again.id);
        assert_eq!(db.count_rows("roles").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_publisher_name_is_not_inserted() {
        let (db, _dir) = open_test_db().await;

        assert!(db
            .insert_publisher_if_absent(&DbPublisher::new("DC Comics", "dc-comics"))
            .await
            .unwrap());
        assert!(!db
            .insert_publisher_if_absent(&DbPublisher::new("DC Comics", "dc-comics-1"))
            .await
            .unwrap());
        assert_eq!(db.count_rows("publishers").await.unwrap(), 1);
    }
}
