use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use lens_blob::backend::{FsBlobStore, MemoryBlobStore};
use lens_blob::prelude::*;
use proptest::prelude::*;
use tempfile::TempDir;

/// Test factory functions
fn memory_adapter(chunk_size: usize) -> BlobAdapter {
    BlobAdapter::new(
        MemoryBlobStore::new(),
        BlobConfig::default().with_chunk_size(chunk_size),
    )
}

async fn fs_adapter(chunk_size: usize) -> (BlobAdapter, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path()).await.unwrap();
    let adapter = BlobAdapter::new(store, BlobConfig::default().with_chunk_size(chunk_size));
    (adapter, dir)
}

fn body(parts: &[&'static str]) -> ByteStream {
    let parts: Vec<io::Result<Bytes>> = parts
        .iter()
        .map(|p| Ok(Bytes::from_static(p.as_bytes())))
        .collect();
    Box::pin(stream::iter(parts))
}

fn failing_body() -> ByteStream {
    Box::pin(stream::iter(vec![
        Ok(Bytes::from_static(b"first bytes of a photo")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ]))
}

async fn read_all(adapter: &BlobAdapter, collection: &Collection, id: &str) -> Vec<u8> {
    let mut opened = adapter.open_read(collection, id).await.unwrap();
    let mut out = Vec::new();
    while let Some(chunk) = opened.stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

async fn roundtrip_across_chunk_boundaries(adapter: BlobAdapter) {
    let photos = Collection::photos();
    let file = adapter
        .put(
            &photos,
            BlobPut::new().with_filename("a.jpg").with_content_type("image/jpeg"),
            body(&["abc", "defg", "", "hij"]),
        )
        .await
        .unwrap();

    assert_eq!(file.length, 10);
    assert_eq!(file.chunk_count, 3); // chunk size 4: abcd efgh ij
    assert_eq!(read_all(&adapter, &photos, &file.id.to_string()).await, b"abcdefghij");

    let opened = adapter.open_read(&photos, &file.id).await.unwrap();
    assert_eq!(opened.content_type(), Some("image/jpeg"));
    assert_eq!(opened.content_length(), 10);
    assert_eq!(opened.file.filename.as_deref(), Some("a.jpg"));
}

async fn invisible_until_finish(adapter: BlobAdapter) {
    let photos = Collection::photos();
    let mut writer = adapter.open_write(&photos, BlobPut::new().with_metadata("ownerId", "o1"));
    writer.write(&[7u8; 9]).await.unwrap();
    let id = writer.id();

    assert!(adapter.get(&photos, &id).await.unwrap().is_none());
    assert!(adapter.find_by_metadata(&photos, "ownerId", "o1").await.unwrap().is_empty());

    let file = writer.finish().await.unwrap();
    assert_eq!(file.id, id);
    assert_eq!(adapter.find_by_metadata(&photos, "ownerId", "o1").await.unwrap().len(), 1);
}

async fn failed_source_leaves_nothing(adapter: BlobAdapter) {
    let photos = Collection::photos();
    let err = adapter
        .put(&photos, BlobPut::new().with_metadata("ownerId", "o2"), failing_body())
        .await
        .unwrap_err();

    assert!(matches!(err, BlobError::Source { .. }));
    assert!(adapter.find_by_metadata(&photos, "ownerId", "o2").await.unwrap().is_empty());
    assert_eq!(adapter.sweep_staged(Duration::ZERO).await.unwrap(), 0);
}

async fn malformed_and_absent_ids_are_not_found(adapter: BlobAdapter) {
    let photos = Collection::photos();
    for id in ["abc", "507f1f77bcf86cd799439011", ""] {
        assert!(adapter.get(&photos, id).await.unwrap().is_none());
        let err = adapter.open_read(&photos, id).await.err().unwrap();
        assert!(err.is_not_found(), "{id}: {err}");
    }
}

async fn unique_field_admits_one_blob(adapter: BlobAdapter) {
    let thumbs = Collection::thumbnails();
    let put = || {
        BlobPut::new()
            .with_metadata("originalId", "507f1f77bcf86cd799439011")
            .with_unique_field("originalId")
    };

    adapter.put(&thumbs, put(), body(&["one"])).await.unwrap();
    let err = adapter.put(&thumbs, put(), body(&["two"])).await.unwrap_err();

    assert!(err.is_conflict());
    let found = adapter
        .find_by_metadata(&thumbs, "originalId", "507f1f77bcf86cd799439011")
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(adapter.sweep_staged(Duration::ZERO).await.unwrap(), 0);
}

async fn empty_blob_roundtrips(adapter: BlobAdapter) {
    let photos = Collection::photos();
    let file = adapter.put(&photos, BlobPut::new(), body(&[])).await.unwrap();
    assert_eq!(file.length, 0);
    assert_eq!(file.chunk_count, 0);
    assert!(read_all(&adapter, &photos, &file.id.to_string()).await.is_empty());
}

async fn delete_hides_blob(adapter: BlobAdapter) {
    let photos = Collection::photos();
    let file = adapter.put(&photos, BlobPut::new(), body(&["x"])).await.unwrap();
    assert!(adapter.delete(&photos, &file.id).await.unwrap());
    assert!(!adapter.delete(&photos, &file.id).await.unwrap());
    assert!(adapter.get(&photos, &file.id).await.unwrap().is_none());
    assert!(!adapter.delete(&photos, "not-an-id").await.unwrap());
}

async fn collections_are_isolated(adapter: BlobAdapter) {
    let file = adapter
        .put(&Collection::photos(), BlobPut::new(), body(&["x"]))
        .await
        .unwrap();
    assert!(adapter.get(&Collection::thumbnails(), &file.id).await.unwrap().is_none());
}

macro_rules! conformance {
    ($($name:ident),* $(,)?) => {
        mod memory {
            $(
                #[tokio::test]
                async fn $name() {
                    super::$name(super::memory_adapter(4)).await;
                }
            )*
        }

        mod filesystem {
            $(
                #[tokio::test]
                async fn $name() {
                    let (adapter, _dir) = super::fs_adapter(4).await;
                    super::$name(adapter).await;
                }
            )*
        }
    };
}

conformance!(
    roundtrip_across_chunk_boundaries,
    invisible_until_finish,
    failed_source_leaves_nothing,
    malformed_and_absent_ids_are_not_found,
    unique_field_admits_one_blob,
    empty_blob_roundtrips,
    delete_hides_blob,
    collections_are_isolated,
);

/// Eight writers race on each unique value; exactly one may commit.
async fn concurrent_unique_commits_admit_one(adapter: BlobAdapter) {
    let thumbs = Collection::thumbnails();
    for round in 0..25u32 {
        let value = format!("{round:024x}");
        let racers: Vec<_> = (0..8)
            .map(|_| {
                let adapter = adapter.clone();
                let thumbs = thumbs.clone();
                let put = BlobPut::new()
                    .with_metadata("originalId", value.clone())
                    .with_unique_field("originalId");
                tokio::spawn(async move { adapter.put(&thumbs, put, body(&["thumbnail"])).await })
            })
            .collect();

        let mut committed = 0;
        for racer in racers {
            match racer.await.unwrap() {
                Ok(_) => committed += 1,
                Err(e) => assert!(e.is_conflict(), "round {round}: {e}"),
            }
        }
        assert_eq!(committed, 1, "round {round}");

        let found = adapter.find_by_metadata(&thumbs, "originalId", value).await.unwrap();
        assert_eq!(found.len(), 1, "round {round}");
    }
    assert_eq!(adapter.sweep_staged(Duration::ZERO).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_unique_commits_admit_one() {
    concurrent_unique_commits_admit_one(memory_adapter(4)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filesystem_concurrent_unique_commits_admit_one() {
    let (adapter, _dir) = fs_adapter(4).await;
    concurrent_unique_commits_admit_one(adapter).await;
}

/// A marker whose blob vanished is reclaimed by exactly one racer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filesystem_stale_marker_is_reclaimed_once_under_contention() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path()).await.unwrap();
    let adapter = BlobAdapter::new(store, BlobConfig::default().with_chunk_size(4));
    let thumbs = Collection::thumbnails();
    let put = || {
        BlobPut::new()
            .with_metadata("originalId", "507f1f77bcf86cd799439011")
            .with_unique_field("originalId")
    };

    // commit, then lose the blob directory without releasing its marker
    let lost = adapter.put(&thumbs, put(), body(&["lost"])).await.unwrap();
    std::fs::remove_dir_all(dir.path().join("thumbnails").join("files").join(lost.id.to_string()))
        .unwrap();

    let racers: Vec<_> = (0..8)
        .map(|_| {
            let adapter = adapter.clone();
            let thumbs = thumbs.clone();
            let put = put();
            tokio::spawn(async move { adapter.put(&thumbs, put, body(&["fresh"])).await })
        })
        .collect();
    let mut committed = 0;
    for racer in racers {
        match racer.await.unwrap() {
            Ok(_) => committed += 1,
            Err(e) => assert!(e.is_conflict(), "{e}"),
        }
    }

    assert_eq!(committed, 1);
    let found = adapter
        .find_by_metadata(&thumbs, "originalId", "507f1f77bcf86cd799439011")
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn dropped_writer_discards_staged_chunks() {
    let store = MemoryBlobStore::new();
    let adapter = BlobAdapter::new(store.clone(), BlobConfig::default().with_chunk_size(2));
    {
        let mut writer = adapter.open_write(&Collection::photos(), BlobPut::new());
        writer.write(b"abcdef").await.unwrap();
        assert_eq!(store.staged_count(), 1);
    }
    // cleanup runs on a spawned task
    for _ in 0..50 {
        if store.staged_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.staged_count(), 0);
    assert_eq!(store.committed_count(&Collection::photos()), 0);
}

#[tokio::test]
async fn size_limit_aborts_the_write() {
    let store = MemoryBlobStore::new();
    let adapter = BlobAdapter::new(
        store.clone(),
        BlobConfig::default().with_chunk_size(2).with_max_blob_bytes(5),
    );
    let photos = Collection::photos();

    let err = adapter.put(&photos, BlobPut::new(), body(&["abc", "def"])).await.unwrap_err();
    assert!(matches!(err, BlobError::TooLarge { limit: 5 }));
    assert_eq!(store.staged_count(), 0);
    assert_eq!(store.committed_count(&photos), 0);
}

#[tokio::test]
async fn writer_rejects_use_after_failed_write() {
    let adapter = BlobAdapter::new(MemoryBlobStore::new(), BlobConfig::default().with_max_blob_bytes(4));
    let mut writer = adapter.open_write(&Collection::photos(), BlobPut::new());
    writer.write(b"abc").await.unwrap();
    assert!(matches!(writer.write(b"de").await, Err(BlobError::TooLarge { .. })));
    assert!(matches!(writer.write(b"f").await, Err(BlobError::Invalid { .. })));
}

#[tokio::test]
async fn into_bytes_enforces_limit() {
    let adapter = memory_adapter(4);
    let photos = Collection::photos();
    let file = adapter.put(&photos, BlobPut::new(), body(&["0123456789"])).await.unwrap();

    let bytes = adapter.open_read(&photos, &file.id).await.unwrap().into_bytes(10).await.unwrap();
    assert_eq!(&bytes[..], b"0123456789");

    let err = adapter.open_read(&photos, &file.id).await.unwrap().into_bytes(9).await.unwrap_err();
    assert!(matches!(err, BlobError::TooLarge { limit: 9 }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn read_returns_exactly_what_was_written(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..300,
        split in 1usize..64,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let adapter = memory_adapter(chunk_size);
            let photos = Collection::photos();

            let parts: Vec<io::Result<Bytes>> = data
                .chunks(split)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let file = adapter
                .put(&photos, BlobPut::new(), Box::pin(stream::iter(parts)))
                .await
                .unwrap();

            let expected_chunks = (data.len() + chunk_size - 1) / chunk_size;
            assert_eq!(file.chunk_count as usize, expected_chunks);
            assert_eq!(read_all(&adapter, &photos, &file.id.to_string()).await, data);
        });
    }
}
