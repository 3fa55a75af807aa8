mod store;

pub use store::{DEFAULT_PAGE_SIZE, LocalBucket, LocalStorage};

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use artifacthub_storage::{BucketOptions, ListOptions, StorageClient, StorageError};
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn storage_conformance() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        artifacthub_storage::testing::run_storage_conformance_tests(&storage)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn age_comes_from_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let name = storage.create_bucket().await.unwrap();
        let options = BucketOptions::new(name.clone(), "");
        let bucket = storage.bucket(&options);
        bucket
            .create_object("artifacts/jobs/j1/old.log", Bytes::from_static(b"old"))
            .await
            .unwrap();

        let three_days = Duration::from_secs(3 * 86_400);
        let file = std::fs::File::options()
            .write(true)
            .open(dir.path().join(&name).join("artifacts/jobs/j1/old.log"))
            .unwrap();
        file.set_modified(SystemTime::now() - three_days).unwrap();

        let mut pager = bucket
            .list_objects_with_pagination(ListOptions::new("artifacts/"))
            .await
            .unwrap();
        let page = pager.next_page().await.unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].size, 3);
        assert!(page.objects[0].age.unwrap() >= three_days);
    }

    #[tokio::test]
    async fn deleting_last_file_prunes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let name = storage.create_bucket().await.unwrap();
        let bucket = storage.bucket(&BucketOptions::new(name.clone(), "token"));
        bucket
            .create_object("artifacts/a/b/c.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();

        bucket
            .delete_objects(&["artifacts/a/b/c.txt".to_owned()])
            .await
            .unwrap();
        assert!(!bucket.is_dir("artifacts/a").await.unwrap());
        assert!(!dir.path().join(&name).join("token").exists());
        assert!(dir.path().join(&name).exists());
    }

    #[tokio::test]
    async fn keys_escaping_the_bucket_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let name = storage.create_bucket().await.unwrap();
        let bucket = storage.bucket(&BucketOptions::new(name, ""));

        let result = bucket
            .create_object("../outside.txt", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_names_fail_listing() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let name = storage.create_bucket().await.unwrap();
        let bucket = storage.bucket(&BucketOptions::new(name.clone(), "token"));
        bucket
            .create_object("artifacts/jobs/j1/good.log", Bytes::from_static(b"ok"))
            .await
            .unwrap();
        let raw = dir
            .path()
            .join(&name)
            .join("token/artifacts/jobs/j1")
            .join(OsStr::from_bytes(b"bad\xffname.log"));
        std::fs::write(&raw, b"x").unwrap();

        let mut pager = bucket
            .list_objects_with_pagination(ListOptions::new("artifacts/"))
            .await
            .unwrap();
        assert!(matches!(
            pager.next_page().await,
            Err(StorageError::Backend(_))
        ));
        assert!(matches!(
            bucket.list_path(ListOptions::new("artifacts/jobs/j1/")).await,
            Err(StorageError::Backend(_))
        ));
        assert!(raw.exists(), "nothing is deleted under a lossy key");
    }
}
