#![cfg(feature = "test-utils")]

mod support;

use crate::support::TestLibrary;
use chrono::Utc;
use longbox::archive::ComicMetadata;
use longbox::catalog::{CatalogRef, IssueDetail};
use longbox::db::{DbIssue, DbSeries};
use longbox::import::RemovalReason;
use longbox::library::IssueInsert;
use longbox::test_support::{captain_atom_metadata, record, seed_captain_atom};
use std::fs;
use tempfile::TempDir;

fn seed_issue_79(lib: &TestLibrary, teams: Vec<CatalogRef>) {
    let mut issue = record(8193, "Janus, Part Two");
    issue.number = Some("79".to_string());
    lib.catalog.add_issue(IssueDetail {
        record: issue,
        cover_date: None,
        volume: CatalogRef::new(3774, "Captain Atom"),
        characters: vec![CatalogRef::new(2103, "Major Force")],
        arcs: vec![CatalogRef::new(55766, "Janus Directive")],
        teams,
        persons: vec![],
    });
}

fn issue_79_metadata() -> ComicMetadata {
    ComicMetadata {
        series: Some("Captain Atom".to_string()),
        issue: Some("79".to_string()),
        publisher: Some("DC Comics".to_string()),
        notes: Some("[Issue ID 8193]".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deleted_files_remove_their_issues_and_then_the_series() {
    let lib = TestLibrary::new().await;
    seed_captain_atom(&lib.catalog, None);
    seed_issue_79(&lib, vec![]);

    let first = lib.write_archive("Captain Atom 078.cbz", 0);
    lib.inspector.set_embedded(&first, captain_atom_metadata());
    let second = lib.write_archive("Captain Atom 079.cbz", 10);
    lib.inspector.set_embedded(&second, issue_79_metadata());

    lib.importer.import_comic_files().await.unwrap();
    assert_eq!(lib.count("issues").await, 2);

    fs::remove_file(&second).unwrap();
    let summary = lib.importer.import_comic_files().await.unwrap();
    assert_eq!(summary.removed.get(&RemovalReason::Missing), Some(&1));
    assert_eq!(summary.imported, 0);

    assert!(lib.database.get_issue_by_cvid(8193).await.unwrap().is_none());
    assert!(lib.database.get_issue_by_cvid(8192).await.unwrap().is_some());
    assert_eq!(lib.count("series").await, 1);
    // Both characters and the arc still appear on #78
    assert_eq!(lib.count("characters").await, 2);
    assert_eq!(lib.count("arcs").await, 1);

    fs::remove_file(&first).unwrap();
    lib.importer.import_comic_files().await.unwrap();

    assert_eq!(lib.count("issues").await, 0);
    assert_eq!(lib.count("series").await, 0);
    assert_eq!(lib.count("characters").await, 0);
    assert_eq!(lib.count("arcs").await, 0);
    assert_eq!(lib.count("teams").await, 0);
    assert_eq!(lib.count("creator_credits").await, 0);

    // Shared catalog knowledge stays
    assert_eq!(lib.count("creators").await, 2);
    assert_eq!(lib.count("roles").await, 3);
    assert_eq!(lib.count("publishers").await, 1);
}

#[tokio::test]
async fn test_team_is_swept_with_its_last_member() {
    let lib = TestLibrary::new().await;
    seed_captain_atom(&lib.catalog, None);
    seed_issue_79(&lib, vec![CatalogRef::new(1410, "Justice League")]);

    let first = lib.write_archive("Captain Atom 078.cbz", 0);
    lib.inspector.set_embedded(&first, captain_atom_metadata());
    let second = lib.write_archive("Captain Atom 079.cbz", 10);
    lib.inspector.set_embedded(&second, issue_79_metadata());

    lib.importer.import_comic_files().await.unwrap();
    assert_eq!(lib.count("issue_teams").await, 2);
    assert_eq!(lib.count("character_teams").await, 1);

    // Captain Atom only appears on #78 and is the team's only known member
    fs::remove_file(&first).unwrap();
    lib.importer.import_comic_files().await.unwrap();

    assert_eq!(lib.count("characters").await, 1);
    assert_eq!(lib.count("teams").await, 0);
    assert_eq!(lib.count("issue_teams").await, 0);
    assert!(lib.database.get_issue_by_cvid(8193).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unreferenced_cover_is_deleted_with_its_issue() {
    let lib = TestLibrary::new().await;
    let cover = lib.write_image("1253-captain_atom_78.jpg");
    seed_captain_atom(&lib.catalog, Some(&cover));

    let path = lib.write_archive("Captain Atom 078.cbz", 0);
    lib.inspector.set_embedded(&path, captain_atom_metadata());
    lib.importer.import_comic_files().await.unwrap();
    assert!(lib.media_path(&cover).exists());

    fs::remove_file(&path).unwrap();
    lib.importer.import_comic_files().await.unwrap();

    assert!(!lib.media_path(&cover).exists());
}

#[tokio::test]
async fn test_issue_outside_library_is_removed() {
    let lib = TestLibrary::new().await;
    let elsewhere = TempDir::new().unwrap();
    let stray = elsewhere.path().join("Stray 001.cbz");
    fs::write(&stray, b"data").unwrap();

    let (series, _) = lib
        .library
        .create_series(DbSeries::new(1, "Stray"))
        .await
        .unwrap();
    let issue = DbIssue::new(2, &series.id, "001", stray.to_str().unwrap(), Utc::now());
    let inserted = lib.library.create_issue(issue, "Stray 001").await.unwrap();
    assert!(matches!(inserted, IssueInsert::Created(_)));

    let summary = lib.importer.import_comic_files().await.unwrap();
    assert_eq!(summary.removed.get(&RemovalReason::OutsideLibrary), Some(&1));
    assert_eq!(lib.count("issues").await, 0);
    assert_eq!(lib.count("series").await, 0);
    assert!(stray.exists());
}

#[tokio::test]
async fn test_orphan_candidates_lists_the_issue_graph() {
    let lib = TestLibrary::new().await;
    seed_captain_atom(&lib.catalog, None);

    let path = lib.write_archive("Captain Atom 078.cbz", 0);
    lib.inspector.set_embedded(&path, captain_atom_metadata());
    lib.importer.import_comic_files().await.unwrap();

    let issue = lib.database.get_issue_by_cvid(8192).await.unwrap().unwrap();
    let candidates = lib.database.orphan_candidates(&issue.id).await.unwrap();
    assert_eq!(candidates.series_id, issue.series_id);
    assert_eq!(candidates.characters.len(), 2);
    assert_eq!(candidates.arcs.len(), 1);
    assert_eq!(candidates.teams.len(), 1);

    let sweep = lib.library.delete_issue(&issue.id).await.unwrap();
    assert_eq!(sweep.characters.len(), 2);
    assert_eq!(sweep.arcs.len(), 1);
    assert_eq!(sweep.teams.len(), 1);
    assert_eq!(sweep.series.as_deref(), Some(issue.series_id.as_str()));
}
