//! Conformance suite shared by the storage backends.

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::bucket::{Bucket, StorageClient};
use crate::error::StorageError;
use crate::types::{BucketOptions, ListOptions, Page};

/// Run the full storage conformance test suite.
///
/// Call this from your backend's test module with a fresh client.
///
/// # Errors
///
/// Returns an error if any storage call fails unexpectedly.
pub async fn run_storage_conformance_tests(client: &dyn StorageClient) -> Result<(), StorageError> {
    test_empty_bucket_has_single_empty_page(client).await?;
    test_paging_visits_every_object(client).await?;
    test_resume_from_token(client).await?;
    test_paging_survives_deletion(client).await?;
    test_delete_objects_is_idempotent(client).await?;
    test_path_iterator(client).await?;
    test_delimited_listing(client).await?;
    test_file_and_dir_checks(client).await?;
    test_delete_dir_and_path(client).await?;
    test_prefix_isolation(client).await?;
    test_missing_bucket(client).await?;
    test_destroy_bucket(client).await?;
    Ok(())
}

async fn fresh_bucket(
    client: &dyn StorageClient,
    prefix: &str,
) -> Result<std::sync::Arc<dyn Bucket>, StorageError> {
    let name = client.create_bucket().await?;
    Ok(client.bucket(&BucketOptions::new(name, prefix)))
}

async fn seed(bucket: &dyn Bucket, paths: &[String]) -> Result<(), StorageError> {
    for path in paths {
        bucket
            .create_object(path, Bytes::from_static(b"content"))
            .await?;
    }
    Ok(())
}

fn numbered(dir: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{dir}/file-{i:03}.txt")).collect()
}

async fn first_page(bucket: &dyn Bucket, options: ListOptions) -> Result<Page, StorageError> {
    let mut pager = bucket.list_objects_with_pagination(options).await?;
    pager.next_page().await
}

async fn drain_pages(
    bucket: &dyn Bucket,
    options: ListOptions,
) -> Result<(Vec<String>, usize), StorageError> {
    let mut pager = bucket.list_objects_with_pagination(options).await?;
    let mut seen = Vec::new();
    let mut pages = 0;
    loop {
        let page = pager.next_page().await?;
        pages += 1;
        seen.extend(page.objects.into_iter().map(|o| o.path));
        if page.next_token.is_none() {
            return Ok((seen, pages));
        }
    }
}

async fn test_empty_bucket_has_single_empty_page(
    client: &dyn StorageClient,
) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    let page = first_page(bucket.as_ref(), ListOptions::new("artifacts/")).await?;
    assert!(page.objects.is_empty(), "empty bucket should yield no objects");
    assert!(page.next_token.is_none(), "empty bucket should end paging");
    Ok(())
}

async fn test_paging_visits_every_object(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    let paths = numbered("artifacts/jobs/j1", 25);
    seed(bucket.as_ref(), &paths).await?;

    let (seen, pages) = drain_pages(
        bucket.as_ref(),
        ListOptions::new("artifacts/").with_max_keys(10),
    )
    .await?;

    assert!(pages >= 3, "25 objects at most 10 per page need at least 3 pages");
    let unique: BTreeSet<_> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len(), "paging must not repeat objects");
    assert_eq!(unique, paths.into_iter().collect::<BTreeSet<_>>());
    Ok(())
}

async fn test_resume_from_token(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    let paths = numbered("artifacts/projects/p1", 5);
    seed(bucket.as_ref(), &paths).await?;

    let page = first_page(
        bucket.as_ref(),
        ListOptions::new("artifacts/").with_max_keys(2),
    )
    .await?;
    assert!(
        !page.objects.is_empty() && page.objects.len() <= 2,
        "page should honor max_keys"
    );
    let token = page.next_token.clone();
    assert!(token.is_some(), "a partial listing should carry a token");

    // A new pager opened from the token continues where the first stopped.
    let (rest, _) = drain_pages(
        bucket.as_ref(),
        ListOptions::new("artifacts/")
            .with_max_keys(2)
            .starting_at(token),
    )
    .await?;
    let mut all: Vec<String> = page.objects.into_iter().map(|o| o.path).collect();
    all.extend(rest);
    assert_eq!(all, paths, "resumed paging should continue in order");
    Ok(())
}

async fn test_paging_survives_deletion(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    let paths = numbered("artifacts/workflows/w1", 6);
    seed(bucket.as_ref(), &paths).await?;

    let page = first_page(
        bucket.as_ref(),
        ListOptions::new("artifacts/").with_max_keys(3),
    )
    .await?;
    let deleted: Vec<String> = page.objects.iter().map(|o| o.path.clone()).collect();
    bucket.delete_objects(&deleted).await?;

    let (rest, _) = drain_pages(
        bucket.as_ref(),
        ListOptions::new("artifacts/")
            .with_max_keys(3)
            .starting_at(page.next_token),
    )
    .await?;
    assert_eq!(
        rest,
        paths[deleted.len()..].to_vec(),
        "deleting a page must not skip objects"
    );
    Ok(())
}

async fn test_delete_objects_is_idempotent(
    client: &dyn StorageClient,
) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    let paths = numbered("artifacts/jobs/j2", 2);
    seed(bucket.as_ref(), &paths).await?;

    let mut targets = paths.clone();
    targets.push("artifacts/jobs/j2/never-existed.txt".to_owned());
    bucket.delete_objects(&targets).await?;
    bucket.delete_objects(&targets).await?;

    let page = first_page(bucket.as_ref(), ListOptions::new("artifacts/")).await?;
    assert!(page.objects.is_empty(), "deleted objects should be gone");
    Ok(())
}

async fn test_path_iterator(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    let paths = numbered("artifacts/jobs/j3", 3);
    seed(bucket.as_ref(), &paths).await?;

    let mut iter = bucket.list_path(ListOptions::new("artifacts/jobs/j3")).await?;
    for _ in 0..3 {
        iter.next().await?;
        assert!(!iter.done(), "done must wait for the sentinel");
    }
    assert!(matches!(iter.next().await, Err(StorageError::NoMoreObjects)));
    assert!(iter.done());

    let mut iter = bucket.list_path(ListOptions::new("artifacts/")).await?;
    assert_eq!(iter.count().await?, 3);
    Ok(())
}

async fn test_delimited_listing(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    seed(
        bucket.as_ref(),
        &[
            "artifacts/top.txt".to_owned(),
            "artifacts/a/one.txt".to_owned(),
            "artifacts/a/two.txt".to_owned(),
            "artifacts/b/deep/three.txt".to_owned(),
        ],
    )
    .await?;

    let mut iter = bucket
        .list_path(ListOptions::new("artifacts").with_delimiter())
        .await?;
    let mut entries = Vec::new();
    loop {
        match iter.next().await {
            Ok(item) => entries.push((item.path, item.is_directory)),
            Err(StorageError::NoMoreObjects) => break,
            Err(e) => return Err(e),
        }
    }
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("artifacts/a/".to_owned(), true),
            ("artifacts/b/".to_owned(), true),
            ("artifacts/top.txt".to_owned(), false),
        ]
    );
    Ok(())
}

async fn test_file_and_dir_checks(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    seed(bucket.as_ref(), &["artifacts/a/one.txt".to_owned()]).await?;

    assert!(!bucket.is_file("").await?, "empty path is never a file");
    assert!(bucket.is_dir("").await?, "empty path is always a directory");
    assert!(bucket.is_file("artifacts/a/one.txt").await?);
    assert!(!bucket.is_dir("artifacts/a/one.txt").await?);
    assert!(bucket.is_dir("artifacts/a").await?);
    assert!(bucket.is_dir("artifacts/a/").await?);
    assert!(!bucket.is_file("artifacts/a").await?);
    assert!(!bucket.is_dir("artifacts/missing").await?);
    Ok(())
}

async fn test_delete_dir_and_path(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = fresh_bucket(client, "").await?;
    seed(
        bucket.as_ref(),
        &[
            "artifacts/a/one.txt".to_owned(),
            "artifacts/a/sub/two.txt".to_owned(),
            "artifacts/b/three.txt".to_owned(),
            "artifacts/c.txt".to_owned(),
        ],
    )
    .await?;

    bucket.delete_dir("artifacts/a").await?;
    assert!(!bucket.is_dir("artifacts/a").await?);
    assert!(bucket.is_file("artifacts/b/three.txt").await?);

    bucket.delete_path("artifacts/c.txt").await?;
    assert!(!bucket.is_file("artifacts/c.txt").await?);

    bucket.delete_path("artifacts/b").await?;
    assert!(!bucket.is_dir("artifacts/b").await?);

    bucket.delete_file("artifacts/never-existed.txt").await?;
    Ok(())
}

async fn test_prefix_isolation(client: &dyn StorageClient) -> Result<(), StorageError> {
    let name = client.create_bucket().await?;
    let first = client.bucket(&BucketOptions::new(name.clone(), "token-a"));
    let second = client.bucket(&BucketOptions::new(name, "token-b"));
    seed(first.as_ref(), &["artifacts/a.txt".to_owned()]).await?;
    seed(second.as_ref(), &["artifacts/b.txt".to_owned()]).await?;

    let page = first_page(first.as_ref(), ListOptions::new("artifacts/")).await?;
    let paths: Vec<_> = page.objects.into_iter().map(|o| o.path).collect();
    assert_eq!(paths, vec!["artifacts/a.txt".to_owned()], "paths are prefix-relative");

    first.delete_dir("").await?;
    assert!(second.is_file("artifacts/b.txt").await?, "other prefixes survive");
    Ok(())
}

async fn test_missing_bucket(client: &dyn StorageClient) -> Result<(), StorageError> {
    let bucket = client.bucket(&BucketOptions::new("artifacthub-never-created", ""));
    let result = first_page(bucket.as_ref(), ListOptions::new("artifacts/")).await;
    assert!(
        matches!(result, Err(StorageError::MissingBucket(_))),
        "paging a missing bucket should fail with MissingBucket"
    );
    Ok(())
}

async fn test_destroy_bucket(client: &dyn StorageClient) -> Result<(), StorageError> {
    let name = client.create_bucket().await?;
    let options = BucketOptions::new(name, "");
    let bucket = client.bucket(&options);
    seed(bucket.as_ref(), &numbered("artifacts/jobs/j4", 3)).await?;

    client.destroy_bucket(&options).await?;
    let result = first_page(bucket.as_ref(), ListOptions::new("artifacts/")).await;
    assert!(
        matches!(result, Err(StorageError::MissingBucket(_))),
        "destroyed bucket should be missing"
    );

    // Destroying again is a no-op.
    client.destroy_bucket(&options).await?;
    Ok(())
}
