//! Bulk reconciliation behaviour: conflict policies, outcome flags and
//! attribute handling, against an in-memory SQLite archive.

use chrono::{NaiveDate, NaiveDateTime};
use obs_common::{ArchiveError, Coords, Level, Trange, Varcode};
use storage::{
    Archive, AttrBatch, AttrTarget, DataBatch, LevTrDesc, StationDataBatch, Transaction,
    UpdateMode,
};

async fn test_archive() -> Archive {
    let archive = Archive::connect("sqlite::memory:").await.unwrap();
    archive.init().await.unwrap();
    archive
}

fn dt(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn var(code: &str) -> Varcode {
    code.parse().unwrap()
}

/// Resolve a (station, report, two levtr) context shared by the tests
/// below. Returns (levtr ids, an empty batch for 12:00).
async fn context(tx: &mut Transaction) -> (i64, i64, DataBatch) {
    let batch = tx
        .open_context("synop", Coords::from_degrees(44.5, 11.3), None, dt(12))
        .await
        .unwrap();
    let lt1 = tx
        .obtain_levtr_id(&LevTrDesc {
            level: Level::single(103, 2000),
            trange: Trange::instant(),
        })
        .await
        .unwrap();
    let lt2 = tx
        .obtain_levtr_id(&LevTrDesc {
            level: Level::single(103, 10000),
            trange: Trange::instant(),
        })
        .await
        .unwrap();
    (lt1, lt2, batch)
}

#[tokio::test]
async fn test_insert_then_update_classification() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (lt1, lt2, seed) = context(&mut tx).await;

    // Seed one row: (lt1, B01002) = "5".
    let mut seed = seed;
    seed.push(lt1, var("B01002"), "5");
    tx.insert_data(&mut seed, UpdateMode::Update).await.unwrap();
    assert!(seed.items[0].inserted);
    let seeded_id = seed.items[0].id.unwrap();

    // Batch with one conflicting and one new item.
    let mut batch = DataBatch::new(seed.id_station, seed.id_report, dt(12));
    batch.push(lt1, var("B01002"), "7");
    batch.push(lt2, var("B01002"), "9");
    tx.insert_data(&mut batch, UpdateMode::Update).await.unwrap();

    let first = batch
        .items
        .iter()
        .find(|i| i.key.id_levtr == lt1)
        .unwrap();
    assert!(first.updated && !first.inserted);
    assert_eq!(first.id, Some(seeded_id));

    let second = batch
        .items
        .iter()
        .find(|i| i.key.id_levtr == lt2)
        .unwrap();
    assert!(second.inserted && !second.updated);
    assert!(second.id.is_some());
}

#[tokio::test]
async fn test_ignore_mode_keeps_stored_values() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (lt1, lt2, mut seed) = context(&mut tx).await;

    seed.push(lt1, var("B01002"), "5");
    tx.insert_data(&mut seed, UpdateMode::Update).await.unwrap();

    let mut batch = DataBatch::new(seed.id_station, seed.id_report, dt(12));
    batch.push(lt1, var("B01002"), "7");
    batch.push(lt2, var("B01002"), "9");
    tx.insert_data(&mut batch, UpdateMode::Ignore).await.unwrap();

    // Conflicting item keeps its row id but writes nothing; the new item
    // is inserted regardless of the policy.
    let first = batch.items.iter().find(|i| i.key.id_levtr == lt1).unwrap();
    assert!(!first.updated && !first.inserted);
    assert_eq!(first.id, seed.items[0].id);
    assert!(batch.items.iter().any(|i| i.inserted));

    let query = storage::DataQuery {
        station_id: Some(seed.id_station),
        ..Default::default()
    };
    let results = tx.query_data(&query).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.value == "5"));
    assert!(!results.iter().any(|r| r.value == "7"));
}

#[tokio::test]
async fn test_error_mode_fails_before_any_write() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (lt1, lt2, mut seed) = context(&mut tx).await;

    seed.push(lt1, var("B01002"), "5");
    tx.insert_data(&mut seed, UpdateMode::Update).await.unwrap();

    let mut batch = DataBatch::new(seed.id_station, seed.id_report, dt(12));
    batch.push(lt1, var("B01002"), "7");
    batch.push(lt2, var("B01002"), "9");
    let err = tx.insert_data(&mut batch, UpdateMode::Error).await.unwrap_err();
    assert!(matches!(err, ArchiveError::Consistency(_)));

    // The insertable item must not have been written either.
    let query = storage::DataQuery {
        station_id: Some(seed.id_station),
        ..Default::default()
    };
    let results = tx.query_data(&query).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, "5");
}

#[tokio::test]
async fn test_error_mode_allows_identical_values() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (lt1, _, mut seed) = context(&mut tx).await;

    seed.push(lt1, var("B01002"), "5");
    tx.insert_data(&mut seed, UpdateMode::Update).await.unwrap();

    let mut batch = DataBatch::new(seed.id_station, seed.id_report, dt(12));
    batch.push(lt1, var("B01002"), "5");
    tx.insert_data(&mut batch, UpdateMode::Error).await.unwrap();
    assert!(!batch.items[0].updated && !batch.items[0].inserted);
    assert_eq!(batch.items[0].id, seed.items[0].id);
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (_, _, mut batch) = context(&mut tx).await;

    tx.insert_data(&mut batch, UpdateMode::Error).await.unwrap();

    let mut attrs = AttrBatch::new();
    tx.insert_attrs(AttrTarget::Values, &mut attrs, UpdateMode::Error)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_station_data_is_keyed_by_varcode_alone() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (_, _, seed) = context(&mut tx).await;

    let mut batch = StationDataBatch::new(seed.id_station);
    batch.push(var("B01019"), "Bologna urbana");
    batch.push(var("B07030"), "78");
    tx.insert_station_data(&mut batch, UpdateMode::Update)
        .await
        .unwrap();
    assert!(batch.items.iter().all(|i| i.inserted));

    // Same varcode again overwrites in place, no second row.
    let mut again = StationDataBatch::new(seed.id_station);
    again.push(var("B01019"), "Bologna");
    tx.insert_station_data(&mut again, UpdateMode::Update)
        .await
        .unwrap();
    assert!(again.items[0].updated);

    let values = tx.query_station_values(seed.id_station).await.unwrap();
    assert_eq!(values.len(), 2);
    let name = values.iter().find(|(_, c, _)| *c == var("B01019")).unwrap();
    assert_eq!(name.2, "Bologna");
}

#[tokio::test]
async fn test_attributes_per_target_table() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (lt1, _, mut seed) = context(&mut tx).await;

    seed.push(lt1, var("B12101"), "28815");
    tx.insert_data(&mut seed, UpdateMode::Update).await.unwrap();
    let id_data = seed.items[0].id.unwrap();

    let mut sd = StationDataBatch::new(seed.id_station);
    sd.push(var("B01019"), "Bologna");
    tx.insert_station_data(&mut sd, UpdateMode::Update)
        .await
        .unwrap();
    let id_station_data = sd.items[0].id.unwrap();

    let mut attrs = AttrBatch::new();
    attrs.push(id_data, var("B33007"), "75");
    attrs.push(id_data, var("B33196"), "1");
    tx.insert_attrs(AttrTarget::Values, &mut attrs, UpdateMode::Update)
        .await
        .unwrap();

    let mut sattrs = AttrBatch::new();
    sattrs.push(id_station_data, var("B33007"), "100");
    tx.insert_attrs(AttrTarget::StationValues, &mut sattrs, UpdateMode::Update)
        .await
        .unwrap();

    // The two attribute tables never see each other's rows.
    let got = tx.attrs_for(AttrTarget::Values, id_data).await.unwrap();
    assert_eq!(got.len(), 2);
    assert!(got.contains(&(var("B33007"), "75".to_string())));

    let got = tx
        .attrs_for(AttrTarget::StationValues, id_station_data)
        .await
        .unwrap();
    assert_eq!(got, vec![(var("B33007"), "100".to_string())]);
}

#[tokio::test]
async fn test_attribute_conflict_policies() {
    let archive = test_archive().await;
    let mut tx = archive.transaction().await.unwrap();
    let (lt1, _, mut seed) = context(&mut tx).await;

    seed.push(lt1, var("B12101"), "28815");
    tx.insert_data(&mut seed, UpdateMode::Update).await.unwrap();
    let id_data = seed.items[0].id.unwrap();

    let mut attrs = AttrBatch::new();
    attrs.push(id_data, var("B33007"), "75");
    tx.insert_attrs(AttrTarget::Values, &mut attrs, UpdateMode::Update)
        .await
        .unwrap();

    let mut conflicting = AttrBatch::new();
    conflicting.push(id_data, var("B33007"), "50");
    let err = tx
        .insert_attrs(AttrTarget::Values, &mut conflicting, UpdateMode::Error)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Consistency(_)));

    let mut conflicting = AttrBatch::new();
    conflicting.push(id_data, var("B33007"), "50");
    tx.insert_attrs(AttrTarget::Values, &mut conflicting, UpdateMode::Update)
        .await
        .unwrap();
    let got = tx.attrs_for(AttrTarget::Values, id_data).await.unwrap();
    assert_eq!(got, vec![(var("B33007"), "50".to_string())]);
}
