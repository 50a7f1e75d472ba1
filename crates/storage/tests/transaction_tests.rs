//! Transaction-level behaviour against an in-memory SQLite archive:
//! schema lifecycle, dimension resolution and cache semantics.

use obs_common::{ArchiveError, Coords, Level, Trange};
use storage::{Archive, ColTy, LevTrDesc, SqlVal, StationDesc};

async fn test_archive() -> Archive {
    let archive = Archive::connect("sqlite::memory:").await.unwrap();
    archive.init().await.unwrap();
    archive
}

fn bologna(report: i64) -> StationDesc {
    StationDesc {
        report,
        coords: Coords::from_degrees(44.5008, 11.3288),
        ident: None,
    }
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let archive = test_archive().await;
    archive.init().await.unwrap();
    archive.check_schema().await.unwrap();
    assert_eq!(
        archive.schema_version().await.unwrap().as_deref(),
        Some(storage::archive::SCHEMA_VERSION)
    );

    let mut tx = archive.transaction().await.unwrap();
    let entries = tx.report_entries().await.unwrap();
    // Seeded once, not once per init call.
    assert_eq!(entries.len(), 12);
    assert!(entries.iter().any(|e| e.memo == "synop" && e.prio == 101));
}

#[tokio::test]
async fn test_check_schema_rejects_version_mismatch() {
    let archive = test_archive().await;
    archive
        .connection()
        .settings_set("schema_version", "6")
        .await
        .unwrap();
    assert!(matches!(
        archive.check_schema().await,
        Err(ArchiveError::Consistency(_))
    ));
}

#[tokio::test]
async fn test_check_schema_rejects_uninitialised_archive() {
    let archive = Archive::connect("sqlite::memory:").await.unwrap();
    assert!(matches!(
        archive.check_schema().await,
        Err(ArchiveError::Consistency(_))
    ));
}

#[tokio::test]
async fn test_station_get_obtain_get() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();

    let report = tx.get_report_id("synop").await.unwrap();
    let desc = bologna(report);

    assert!(matches!(
        tx.get_station_id(&desc).await,
        Err(ArchiveError::NotFound(_))
    ));

    let id = tx.obtain_station_id(&desc).await.unwrap();
    assert_eq!(tx.obtain_station_id(&desc).await.unwrap(), id);
    assert_eq!(tx.get_station_id(&desc).await.unwrap(), id);
    assert_eq!(tx.station_by_id(id).await.unwrap(), desc);
}

#[tokio::test]
async fn test_resolution_survives_cache_clear() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();

    let report = tx.obtain_report_id("temp").await.unwrap();
    let station = tx.obtain_station_id(&bologna(report)).await.unwrap();
    let levtr = tx
        .obtain_levtr_id(&LevTrDesc {
            level: Level::single(100, 50000),
            trange: Trange::instant(),
        })
        .await
        .unwrap();

    tx.clear_cached_state();

    // Same ids come back from the database, not from memory.
    assert_eq!(tx.obtain_report_id("temp").await.unwrap(), report);
    assert_eq!(tx.obtain_station_id(&bologna(report)).await.unwrap(), station);
    assert_eq!(
        tx.get_levtr_id(&LevTrDesc {
            level: Level::single(100, 50000),
            trange: Trange::instant(),
        })
        .await
        .unwrap(),
        levtr
    );
    assert_eq!(
        tx.levtr_by_id(levtr).await.unwrap(),
        LevTrDesc {
            level: Level::single(100, 50000),
            trange: Trange::instant(),
        }
    );
}

#[tokio::test]
async fn test_ident_separates_stations() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();

    let report = tx.get_report_id("ship").await.unwrap();
    let fixed = bologna(report);
    let mobile = StationDesc {
        ident: Some("IMOC123".to_string()),
        ..fixed.clone()
    };

    let fixed_id = tx.obtain_station_id(&fixed).await.unwrap();
    let mobile_id = tx.obtain_station_id(&mobile).await.unwrap();
    assert_ne!(fixed_id, mobile_id);

    assert_eq!(tx.station_by_id(fixed_id).await.unwrap().ident, None);
    assert_eq!(
        tx.station_by_id(mobile_id).await.unwrap().ident.as_deref(),
        Some("IMOC123")
    );
}

#[tokio::test]
async fn test_unknown_report_memo_is_created_with_prio_zero() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();

    assert!(matches!(
        tx.get_report_id("mynetwork").await,
        Err(ArchiveError::NotFound(_))
    ));

    let id = tx.obtain_report_id("mynetwork").await.unwrap();
    assert_eq!(tx.get_report_id("mynetwork").await.unwrap(), id);

    let entry = tx
        .report_entries()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.memo == "mynetwork")
        .unwrap();
    assert_eq!(entry.prio, 0);
}

#[tokio::test]
async fn test_rollback_discards_new_dimensions() {
    let archive = test_archive().await;

    let mut tx = archive.transaction().await.unwrap();
    let report = tx.get_report_id("synop").await.unwrap();
    tx.obtain_station_id(&bologna(report)).await.unwrap();
    tx.rollback().await.unwrap();

    let mut tx = archive.transaction().await.unwrap();
    assert!(matches!(
        tx.get_station_id(&bologna(report)).await,
        Err(ArchiveError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_all_preserves_repinfo() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();

    let report = tx.get_report_id("synop").await.unwrap();
    tx.obtain_station_id(&bologna(report)).await.unwrap();
    tx.obtain_levtr_id(&LevTrDesc {
        level: Level::single(1, 0),
        trange: Trange::instant(),
    })
    .await
    .unwrap();

    tx.remove_all().await.unwrap();

    // Dimensions are gone, the cache with them; report networks stay.
    assert!(matches!(
        tx.get_station_id(&bologna(report)).await,
        Err(ArchiveError::NotFound(_))
    ));
    assert_eq!(tx.report_entries().await.unwrap().len(), 12);
    assert_eq!(tx.get_report_id("synop").await.unwrap(), report);
}

#[tokio::test]
async fn test_unique_violation_maps_to_duplicate_key() {
    let archive = test_archive().await;
    let conn = archive.connection();

    let rows = conn
        .query(
            "SELECT id FROM repinfo WHERE memo = ?",
            &[SqlVal::Text("synop".to_string())],
            &[ColTy::BigInt],
        )
        .await
        .unwrap();
    let report = rows[0].bigint(0).unwrap();

    let insert = "INSERT INTO station (report, lat, lon, ident) VALUES (?, ?, ?, ?)";
    let params = [
        SqlVal::BigInt(report),
        SqlVal::Int(4_450_000),
        SqlVal::Int(1_130_000),
        SqlVal::Text("LFPW".to_string()),
    ];
    conn.execute(insert, &params).await.unwrap();
    let err = conn.execute(insert, &params).await.unwrap_err();
    assert!(err.is_duplicate_key());
}

#[tokio::test]
async fn test_commit_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("archive.db").display());

    let archive = Archive::connect(&url).await.unwrap();
    archive.init().await.unwrap();
    let mut tx = archive.transaction().await.unwrap();
    let report = tx.get_report_id("synop").await.unwrap();
    let id = tx.obtain_station_id(&bologna(report)).await.unwrap();
    tx.commit().await.unwrap();
    drop(archive);

    let archive = Archive::connect(&url).await.unwrap();
    archive.check_schema().await.unwrap();
    let mut tx = archive.transaction().await.unwrap();
    assert_eq!(tx.get_station_id(&bologna(report)).await.unwrap(), id);
}

#[tokio::test]
async fn test_reset_reseeds_report_networks() {
    let archive = test_archive().await;

    let mut tx = archive.transaction().await.unwrap();
    tx.obtain_report_id("mynetwork").await.unwrap();
    tx.commit().await.unwrap();

    archive.reset().await.unwrap();

    let mut tx = archive.transaction().await.unwrap();
    let entries = tx.report_entries().await.unwrap();
    assert_eq!(entries.len(), 12);
    assert!(!entries.iter().any(|e| e.memo == "mynetwork"));
}
