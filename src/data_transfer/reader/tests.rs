use super::*;
use crate::db_types::Value;

async fn drain(stream: &mut Box<dyn RowStream>, batch: usize) -> Vec<Vec<Row>> {
    let mut batches = Vec::new();
    while let Some(rows) = stream.next_batch(batch).await.unwrap() {
        batches.push(rows);
    }
    batches
}

fn text_input(text: &str) -> FlatFileInput {
    FlatFileInput::Text {
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_flat_file_stream_batches_lazily() {
    let mut text = String::from("id,name\n");
    for i in 0..5 {
        text.push_str(&format!("{},user{}\n", i, i));
    }

    let mut stream = FlatFileRowStream::open(text_input(&text), ',', true)
        .await
        .unwrap();
    assert_eq!(stream.columns(), &["id".to_string(), "name".to_string()]);
    assert_eq!(stream.estimated_total(), Some(5));

    let batches = drain(&mut stream, 2).await;
    let sizes = batches.iter().map(Vec::len).collect::<Vec<_>>();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(batches[0][1]["id"], Value::Int(1));
    assert_eq!(batches[2][0]["name"], Value::from("user4"));

    // finite and not restartable
    assert!(stream.next_batch(2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_header_only_input_is_empty_stream() {
    let mut stream = FlatFileRowStream::open(text_input("id,name\n"), ',', true)
        .await
        .unwrap();
    assert!(stream.next_batch(10).await.unwrap().is_none());
}

#[tokio::test]
async fn test_validate_mode_aborts_on_malformed_row() {
    let mut stream = FlatFileRowStream::open(text_input("a,b\n1,2\n3,4,5\n"), ',', true)
        .await
        .unwrap();
    let err = stream.next_batch(10).await.unwrap_err();
    assert_eq!(err.kind(), "parse");
    assert!(matches!(err, TransferError::Parse { line: 3, .. }));
}

#[tokio::test]
async fn test_lenient_mode_drops_malformed_rows() {
    let mut stream = FlatFileRowStream::open(text_input("a;b\n1;2\nbad\n3;4\n"), ';', false)
        .await
        .unwrap();
    let batches = drain(&mut stream, 10).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[0][1]["a"], Value::Int(3));
}

#[tokio::test]
async fn test_path_input_reads_file() {
    let path = std::env::temp_dir().join(format!("flatbridge-reader-{}.csv", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, "id,active\n1,true\n2,false\n")
        .await
        .unwrap();

    let mut stream = FlatFileRowStream::open(FlatFileInput::Path { path: path.clone() }, ',', true)
        .await
        .unwrap();
    assert_eq!(stream.estimated_total(), None);
    let batches = drain(&mut stream, 100).await;
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[0][0]["active"], Value::Bool(true));

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn test_missing_file_is_reported() {
    let path = std::env::temp_dir().join("flatbridge-does-not-exist.csv");
    let result = FlatFileRowStream::open(FlatFileInput::Path { path }, ',', true).await;
    assert!(matches!(result, Err(TransferError::Validation(_))));
}

#[tokio::test]
async fn test_records_stream_derives_columns() {
    let mut first = Row::new();
    first.insert("b".to_string(), Value::Int(1));
    let mut second = Row::new();
    second.insert("a".to_string(), Value::Int(2));
    second.insert("b".to_string(), Value::Int(3));

    let mut stream: Box<dyn RowStream> =
        Box::new(RecordsRowStream::new(Vec::new(), vec![first, second]));
    assert_eq!(stream.columns(), &["b".to_string(), "a".to_string()]);
    assert_eq!(stream.estimated_total(), Some(2));
    let batches = drain(&mut stream, 1).await;
    assert_eq!(batches.len(), 2);
}
