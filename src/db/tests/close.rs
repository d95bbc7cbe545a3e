use super::*;

/// Querying after the pool is closed returns an error rather than hanging
#[tokio::test]
async fn test_get_unit_after_pool_close_returns_error() {
    let (db, _temp) = setup_db().await;
    let anime_id = insert_test_anime(&db, "Show").await;
    let id = insert_test_episode(&db, anime_id, "Show - 01", Resolution::P1080).await;

    assert!(db.get_unit(id).await.unwrap().is_some());

    db.pool().close().await;

    let result = db.get_unit(id).await;
    assert!(
        result.is_err(),
        "get_unit after pool close should return an error, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_status_update_after_pool_close_returns_error() {
    let (db, _temp) = setup_db().await;
    db.pool().close().await;

    let result = db
        .update_unit_status(
            UnitId(1),
            crate::types::UnitStatus::Discovered,
            crate::types::UnitStatus::Downloaded,
        )
        .await;
    assert!(matches!(result, Err(crate::Error::Database(_))));
}
