// # Issue Graph Writes
//
// An archive's publisher, series, issue, cross references and credits are
// written in one transaction. An import that stops partway through a file
// leaves nothing behind, so the next scan sees the file as new.

use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};

use crate::db::client::*;
use crate::db::models::*;
use crate::slug::slugify;

impl Database {
    /// Write one issue and everything it references in a single transaction
    ///
    /// Rows that already exist are reused as they are; new rows take the
    /// details carried by the graph. Any error, including a unique violation
    /// on the issue's file or catalog id, rolls the whole write back.
    pub async fn insert_issue_graph(
        &self,
        graph: &NewIssueGraph,
    ) -> Result<IssueGraphWrite, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut publisher_created = false;
        let mut publisher_linked = false;
        let publisher_id = match &graph.publisher {
            Some(new) => {
                let (publisher, created) = get_or_insert_publisher_in(&mut tx, &new.name).await?;
                publisher_created = created;
                if let (None, Some((cvid, details))) = (publisher.cvid, &new.catalog) {
                    publisher_linked =
                        link_publisher_in(&mut tx, &publisher, *cvid, details).await?;
                }
                Some(publisher.id)
            }
            None => None,
        };

        let (series, series_created) =
            match get_series_by_cvid_in(&mut tx, graph.series.cvid).await? {
                Some(existing) => (existing, false),
                None => {
                    let mut series = graph.series.clone();
                    series.slug = unique_slug_in(&mut tx, "series", &slugify(&series.name)).await?;
                    series.publisher_id = publisher_id;
                    insert_series_if_absent_in(&mut tx, &series).await?;
                    (series, true)
                }
            };

        let mut issue = graph.issue.clone();
        issue.series_id = series.id.clone();
        issue.slug = unique_slug_in(&mut tx, "issues", &slugify(&graph.slug_source)).await?;
        insert_issue_in(&mut tx, &issue).await?;

        let mut created = Vec::new();

        for (kind, entities) in [
            (EntityKind::Character, &graph.characters),
            (EntityKind::Arc, &graph.arcs),
        ] {
            for new in entities {
                let (entity, was_created) = get_or_insert_entity_in(&mut tx, kind, new).await?;
                attach_entity_to_issue_in(&mut tx, kind, &issue.id, &entity.id).await?;
                if was_created {
                    created.push((kind, entity.name));
                }
            }
        }

        for new in &graph.teams {
            let (team, was_created) =
                get_or_insert_entity_in(&mut tx, EntityKind::Team, &new.team).await?;
            attach_entity_to_issue_in(&mut tx, EntityKind::Team, &issue.id, &team.id).await?;
            if !was_created {
                continue;
            }

            // Only members we already know about; unknown characters are not created here
            for member in &new.members {
                if let Some(character) =
                    get_entity_by_cvid_in(&mut tx, EntityKind::Character, *member).await?
                {
                    attach_character_to_team_in(&mut tx, &character.id, &team.id).await?;
                }
            }
            created.push((EntityKind::Team, team.name));
        }

        for new in &graph.credits {
            let (creator, was_created) =
                get_or_insert_entity_in(&mut tx, EntityKind::Creator, &new.creator).await?;
            let credit = get_or_create_credit_in(&mut tx, &creator.id, &issue.id).await?;
            for role_name in &new.roles {
                let role = get_or_create_role_in(&mut tx, role_name).await?;
                attach_role_to_credit_in(&mut tx, &credit.id, &role.id).await?;
            }
            if was_created {
                created.push((EntityKind::Creator, creator.name));
            }
        }

        tx.commit().await?;
        debug!("Committed issue graph for {}", issue.file);

        Ok(IssueGraphWrite {
            issue,
            series,
            series_created,
            publisher_created,
            publisher_linked,
            created,
        })
    }
}

async fn get_or_insert_publisher_in(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<(DbPublisher, bool), sqlx::Error> {
    if let Some(existing) = get_publisher_by_name_in(&mut *conn, name).await? {
        return Ok((existing, false));
    }

    let slug = unique_slug_in(&mut *conn, "publishers", &slugify(name)).await?;
    let publisher = DbPublisher::new(name, &slug);
    if insert_publisher_if_absent_in(&mut *conn, &publisher).await? {
        return Ok((publisher, true));
    }
    get_publisher_by_name_in(&mut *conn, name)
        .await?
        .map(|p| (p, false))
        .ok_or(sqlx::Error::RowNotFound)
}

/// Give a publisher its catalog id and details. Returns false when another
/// publisher already holds that id.
async fn link_publisher_in(
    conn: &mut SqliteConnection,
    publisher: &DbPublisher,
    cvid: i64,
    details: &EntityDetails,
) -> Result<bool, sqlx::Error> {
    if let Some(holder) = get_publisher_by_cvid_in(&mut *conn, cvid).await? {
        if holder.id != publisher.id {
            warn!(
                "Catalog publisher {} is already linked to '{}'; not linking '{}'",
                cvid, holder.name, publisher.name
            );
            return Ok(false);
        }
    }

    update_publisher_details_in(&mut *conn, &publisher.id, Some(cvid), details).await?;
    Ok(true)
}

async fn get_or_insert_entity_in(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    new: &NewEntity,
) -> Result<(DbEntity, bool), sqlx::Error> {
    if let Some(existing) = get_entity_by_cvid_in(&mut *conn, kind, new.cvid).await? {
        return Ok((existing, false));
    }

    let slug = unique_slug_in(&mut *conn, kind.table(), &slugify(&new.name)).await?;
    let mut entity = DbEntity::new(new.cvid, &new.name, &slug);
    if let Some(details) = &new.details {
        entity.cvurl = details.cvurl.clone();
        entity.desc = details.desc.clone();
        entity.image = details.image.clone();
    }

    if insert_entity_if_absent_in(&mut *conn, kind, &entity).await? {
        return Ok((entity, true));
    }
    get_entity_by_cvid_in(&mut *conn, kind, new.cvid)
        .await?
        .map(|e| (e, false))
        .ok_or(sqlx::Error::RowNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn open_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let database = Database::new(db_path.to_str().unwrap()).await.unwrap();
        (database, temp_dir)
    }

    fn entity(cvid: i64, name: &str) -> NewEntity {
        NewEntity {
            cvid,
            name: name.to_string(),
            details: None,
        }
    }

    fn graph(issue_cvid: i64, file: &str) -> NewIssueGraph {
        NewIssueGraph {
            publisher: Some(NewPublisher {
                name: "DC Comics".to_string(),
                catalog: None,
            }),
            series: DbSeries::new(3774, "Captain Atom"),
            issue: DbIssue::new(issue_cvid, "", "78", file, Utc::now()),
            slug_source: "Captain Atom 78 1989".to_string(),
            characters: vec![entity(1253, "Captain Atom")],
            arcs: vec![],
            teams: vec![NewTeam {
                team: entity(1410, "Justice League"),
                members: vec![1253],
            }],
            credits: vec![NewCredit {
                creator: entity(40439, "Cary Bates"),
                roles: vec!["Writer".to_string()],
            }],
        }
    }

    #[tokio::test]
    async fn test_graph_is_written_together() {
        let (db, _dir) = open_test_db().await;

        let write = db.insert_issue_graph(&graph(8192, "/comics/a.cbz")).await.unwrap();
        assert!(write.series_created);
        assert!(write.publisher_created);
        assert_eq!(write.issue.slug, "captain-atom-78-1989");
        assert_eq!(write.created.len(), 3);

        let team = db
            .get_entity_by_cvid(EntityKind::Team, 1410)
            .await
            .unwrap()
            .unwrap();
        let character = db
            .get_entity_by_cvid(EntityKind::Character, 1253)
            .await
            .unwrap()
            .unwrap();
        let teams = db.get_teams_for_character(&character.id).await.unwrap();
        assert_eq!(teams, vec![team]);
        assert_eq!(db.count_rows("credit_roles").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_issue_rolls_back_everything() {
        let (db, _dir) = open_test_db().await;
        db.insert_issue_graph(&graph(8192, "/comics/a.cbz")).await.unwrap();

        let mut second = graph(8192, "/comics/b.cbz");
        second.publisher = Some(NewPublisher {
            name: "Charlton".to_string(),
            catalog: None,
        });
        second.arcs = vec![entity(55766, "Janus Directive")];

        let err = db.insert_issue_graph(&second).await.unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(db.count_rows("publishers").await.unwrap(), 1);
        assert_eq!(db.count_rows("arcs").await.unwrap(), 0);
        assert_eq!(db.count_rows("issues").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unlinked_publisher_takes_catalog_id() {
        let (db, _dir) = open_test_db().await;
        db.insert_issue_graph(&graph(8192, "/comics/a.cbz")).await.unwrap();
        let publisher = db.get_publisher_by_name("DC Comics").await.unwrap().unwrap();
        assert_eq!(publisher.cvid, None);

        let mut second = graph(8193, "/comics/b.cbz");
        second.publisher = Some(NewPublisher {
            name: "DC Comics".to_string(),
            catalog: Some((
                10,
                EntityDetails {
                    cvurl: Some("https://comicvine.gamespot.com/dc-comics/4010-10/".into()),
                    desc: "Publisher of Superman".to_string(),
                    image: None,
                },
            )),
        });
        second.slug_source = "Captain Atom 79 1989".to_string();

        let write = db.insert_issue_graph(&second).await.unwrap();
        assert!(write.publisher_linked);
        assert!(!write.publisher_created);
        let publisher = db.get_publisher_by_cvid(10).await.unwrap().unwrap();
        assert_eq!(publisher.name, "DC Comics");
        assert_eq!(publisher.desc, "Publisher of Superman");
    }

    #[tokio::test]
    async fn test_credit_roles_are_shared_and_sorted() {
        let (db, _dir) = open_test_db().await;

        let mut first = graph(8192, "/comics/a.cbz");
        first.credits[0].roles = vec!["Writer".to_string(), "Editor".to_string()];
        let write = db.insert_issue_graph(&first).await.unwrap();

        let mut second = graph(8193, "/comics/b.cbz");
        second.slug_source = "Captain Atom 79 1989".to_string();
        second.credits[0].roles = vec!["Writer".to_string()];
        db.insert_issue_graph(&second).await.unwrap();

        assert_eq!(db.count_rows("roles").await.unwrap(), 2);
        assert_eq!(db.count_rows("creators").await.unwrap(), 1);
        let credits = db.get_credits_for_issue(&write.issue.id).await.unwrap();
        assert_eq!(credits.len(), 1);
        let names: Vec<_> = db
            .get_roles_for_credit(&credits[0].id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Editor", "Writer"]);
    }
}
