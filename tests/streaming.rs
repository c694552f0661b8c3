//! Lazily mapped row streams.

mod common;

use futures::{StreamExt, TryStreamExt};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::*;
use rowforge::prelude::*;

#[tokio::test]
async fn test_stream_matches_list() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let listed: Vec<EmployeeDto> = session.sql(ALL_EMPLOYEES).list().await?;
    let streamed: Vec<EmployeeDto> = session
        .sql(ALL_EMPLOYEES)
        .stream::<EmployeeDto>()
        .try_collect()
        .await?;
    assert_eq!(streamed.len(), EMPLOYEE_COUNT as usize);
    assert_eq!(streamed, listed);
    Ok(())
}

#[tokio::test]
async fn test_stream_with_parameters() -> MapResult<()> {
    let db = database();
    let mut session = session(&db);

    let ids: Vec<i32> = session
        .sql(BY_DEPARTMENT)
        .bind("DepartmentId", 4)
        .stream::<EmployeeDto>()
        .map_ok(|e| e.id)
        .try_collect()
        .await?;
    assert_eq!(ids, vec![4, 9, 14, 19, 24, 29]);
    Ok(())
}

#[tokio::test]
async fn test_early_drop_closes_connection() -> MapResult<()> {
    let db = database();
    let conn = db.connect();
    let stats = conn.stats();
    let mut session = Session::new(conn);

    {
        let mut rows = session.sql(ALL_EMPLOYEES).stream::<EmployeeDto>();
        for expected in 1..=3 {
            let employee = rows.next().await.transpose()?;
            assert_eq!(employee.map(|e| e.id), Some(expected));
        }
    }

    assert!(!session.connection().is_open());
    assert_eq!((stats.opens(), stats.closes()), (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_error_ends_the_stream() {
    let db = database();
    let conn = db.connect();
    let stats = conn.stats();
    let mut session = Session::new(conn);

    let items: Vec<MapResult<EmployeeDto>> = session
        .sql(FLAKY)
        .stream::<EmployeeDto>()
        .collect()
        .await;

    assert_eq!(items.len(), 4);
    assert!(items[..3].iter().all(Result::is_ok));
    assert!(matches!(
        &items[3],
        Err(MapError::Execution {
            stage: ExecStage::Rows,
            ..
        })
    ));
    assert_eq!(stats.opens(), stats.closes());
}

#[tokio::test]
async fn test_header_failure_is_yielded_once() {
    let db = database();
    let mut session = session(&db);

    let items: Vec<MapResult<EmployeeDto>> =
        session.sql(BROKEN).stream::<EmployeeDto>().collect().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().err().and_then(MapError::stage), Some(ExecStage::Headers));
}

#[tokio::test]
async fn test_open_connection_is_left_open() -> MapResult<()> {
    let db = database();
    let conn = db.connect();
    let stats = conn.stats();
    let mut session = Session::new(conn);
    session.connection_mut().open().await.unwrap();

    let count = session
        .sql(ALL_EMPLOYEES)
        .stream::<EmployeeNameOnlyDto>()
        .try_fold(0usize, |n, _| async move { Ok(n + 1) })
        .await?;
    assert_eq!(count, 30);
    assert!(session.connection().is_open());
    assert_eq!(stats.closes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_stream_cancelled_part_way() {
    let db = database();
    let conn = db.connect();
    let stats = conn.stats();
    let mut session = Session::new(conn);
    let token = CancellationToken::new();

    let mut received = Vec::new();
    let mut tail = Vec::new();
    {
        let mut rows = session
            .sql(ALL_EMPLOYEES)
            .cancel_on(&token)
            .stream::<EmployeeDto>();
        while received.len() < 3 {
            match rows.next().await {
                Some(Ok(employee)) => received.push(employee),
                other => panic!("expected a row, got {:?}", other),
            }
        }
        token.cancel();
        while let Some(item) = rows.next().await {
            tail.push(item);
        }
    }

    assert_eq!(
        received.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(received[2].name, "Employee3");

    // rows already in the channel may still arrive before the error
    let (last, buffered) = tail.split_last().expect("stream ended without an error");
    assert!(matches!(last, Err(MapError::Cancelled)));
    for (offset, item) in buffered.iter().enumerate() {
        let employee = item.as_ref().expect("buffered row");
        assert_eq!(employee.id, 4 + offset as i32);
    }
    assert!(received.len() + buffered.len() < EMPLOYEE_COUNT as usize);

    assert!(!session.connection().is_open());
    assert_eq!((stats.opens(), stats.closes()), (1, 1));
}
