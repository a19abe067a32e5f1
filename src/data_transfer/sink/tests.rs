use super::*;
use crate::data_transfer::reader::RecordsRowStream;
use crate::testing::{user_rows, MemoryWarehouse};

fn users_stream(count: usize) -> RecordsRowStream {
    let columns = ["id", "name", "email"].iter().map(|c| c.to_string()).collect();
    RecordsRowStream::new(columns, user_rows(count))
}

fn users_warehouse() -> MemoryWarehouse {
    MemoryWarehouse::new().with_table(
        "users",
        &[("id", "UInt64"), ("name", "String"), ("email", "String")],
        Vec::new(),
    )
}

/// Cancels the token once `threshold` records are flushed.
struct CancelAt {
    threshold: u64,
    token: CancellationToken,
}

#[async_trait]
impl BatchProgress for CancelAt {
    async fn batch_flushed(&self, _batches: u64, records_written: u64) {
        if records_written >= self.threshold {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn test_export_writes_header_once_and_fixed_batches() {
    let mut stream = users_stream(250);
    let mut sink = FlatFileSink::new(Vec::new(), ',').unwrap();
    let writer = BatchWriter::new(100, CancellationToken::new());

    let written = writer.write(&mut stream, &mut sink, &()).await.unwrap();
    assert_eq!(written, 250);

    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 251);
    assert_eq!(lines[0], "id,name,email");
    assert_eq!(lines[1], "1,user1,user1@example.com");
    assert_eq!(lines.iter().filter(|l| **l == "id,name,email").count(), 1);
}

#[tokio::test]
async fn test_database_sink_inserts_one_call_per_batch() {
    let warehouse = Arc::new(users_warehouse());
    let mut stream = users_stream(250);
    let mut sink = DatabaseSink::new(warehouse.clone(), "users");
    let writer = BatchWriter::new(100, CancellationToken::new());

    let written = writer.write(&mut stream, &mut sink, &()).await.unwrap();
    assert_eq!(written, 250);
    assert_eq!(warehouse.batch_sizes(), vec![100, 100, 50]);
    assert_eq!(warehouse.rows("users").len(), 250);
}

#[tokio::test]
async fn test_failure_at_batch_k_reports_prior_batches() {
    let warehouse = Arc::new(users_warehouse().failing_insert_on(3));
    let mut stream = users_stream(500);
    let mut sink = DatabaseSink::new(warehouse.clone(), "users");
    let writer = BatchWriter::new(100, CancellationToken::new());

    let failure = writer.write(&mut stream, &mut sink, &()).await.unwrap_err();
    assert_eq!(failure.records_written, 200);
    assert!(matches!(
        failure.error,
        TransferError::Write {
            records_written: 200,
            ..
        }
    ));
    // no skip-and-continue after the failed batch
    assert_eq!(warehouse.insert_calls(), 3);
    assert_eq!(warehouse.rows("users").len(), 200);
}

#[tokio::test]
async fn test_cancel_between_batches_stops_before_next_write() {
    let warehouse = Arc::new(users_warehouse());
    let token = CancellationToken::new();
    let observer = CancelAt {
        threshold: 200,
        token: token.clone(),
    };
    let mut stream = users_stream(500);
    let mut sink = DatabaseSink::new(warehouse.clone(), "users");
    let writer = BatchWriter::new(100, token);

    let failure = writer.write(&mut stream, &mut sink, &observer).await.unwrap_err();
    assert_eq!(failure.error, TransferError::Cancelled);
    assert_eq!(failure.error.to_string(), "cancelled");
    assert_eq!(failure.records_written, 200);
    assert_eq!(warehouse.insert_calls(), 2);
}

#[tokio::test]
async fn test_empty_export_still_has_header() {
    let mut stream = users_stream(0);
    let mut sink = FlatFileSink::new(Vec::new(), ';').unwrap();
    let writer = BatchWriter::new(DEFAULT_BATCH_SIZE, CancellationToken::new());

    let written = writer.write(&mut stream, &mut sink, &()).await.unwrap();
    assert_eq!(written, 0);
    assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "id;name;email\n");
}

#[tokio::test]
async fn test_reader_error_is_passed_through() {
    let mut stream = crate::data_transfer::reader::FlatFileRowStream::open(
        crate::data_transfer::models::FlatFileInput::Text {
            text: "id,name\n1,a\n2,b\n3\n".to_string(),
        },
        ',',
        true,
    )
    .await
    .unwrap();
    let mut sink = FlatFileSink::new(Vec::new(), ',').unwrap();
    let writer = BatchWriter::new(2, CancellationToken::new());

    let failure = writer.write(stream.as_mut(), &mut sink, &()).await.unwrap_err();
    assert_eq!(failure.records_written, 2);
    assert!(matches!(failure.error, TransferError::Parse { line: 4, .. }));
}
