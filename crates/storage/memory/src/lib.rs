mod store;

pub use store::{DEFAULT_PAGE_SIZE, MemoryBucket, MemoryStorage};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use artifacthub_storage::{BucketOptions, ListOptions, StorageClient};

    use super::*;

    #[tokio::test]
    async fn storage_conformance() {
        let storage = MemoryStorage::new();
        artifacthub_storage::testing::run_storage_conformance_tests(&storage)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn small_page_size_conformance() {
        // Pages smaller than requested must still chain correctly.
        let storage = MemoryStorage::new().with_page_size(1);
        artifacthub_storage::testing::run_storage_conformance_tests(&storage)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn pages_are_capped_at_page_size() {
        let storage = MemoryStorage::new().with_page_size(4);
        let options = BucketOptions::new("b", "");
        for i in 0..10 {
            storage.insert_with_age(&options, &format!("artifacts/{i:02}"), Duration::ZERO);
        }

        let bucket = storage.bucket(&options);
        let mut pager = bucket
            .list_objects_with_pagination(ListOptions::new("artifacts/").with_max_keys(1000))
            .await
            .unwrap();
        let page = pager.next_page().await.unwrap();
        assert_eq!(page.objects.len(), 4);
        assert!(page.next_token.is_some());
    }

    #[tokio::test]
    async fn inserted_age_is_reported() {
        let storage = MemoryStorage::new();
        let options = BucketOptions::new("b", "token");
        storage.insert_with_age(&options, "artifacts/old.txt", Duration::from_secs(3600));

        let bucket = storage.bucket(&options);
        let mut pager = bucket
            .list_objects_with_pagination(ListOptions::new("artifacts/"))
            .await
            .unwrap();
        let page = pager.next_page().await.unwrap();
        let age = page.objects[0].age.unwrap();
        assert!(age >= Duration::from_secs(3600));
        assert!(age < Duration::from_secs(3700));
        assert_eq!(storage.object_count(&options), 1);
    }

    #[tokio::test]
    async fn destroy_keeps_shared_bucket_with_other_prefixes() {
        let storage = MemoryStorage::new();
        let mine = BucketOptions::new("shared", "mine");
        let theirs = BucketOptions::new("shared", "theirs");
        storage.insert_with_age(&mine, "artifacts/a.txt", Duration::ZERO);
        storage.insert_with_age(&theirs, "artifacts/b.txt", Duration::ZERO);

        storage.destroy_bucket(&mine).await.unwrap();
        assert!(storage.bucket_exists("shared"));
        assert_eq!(storage.object_count(&mine), 0);
        assert_eq!(storage.object_count(&theirs), 1);

        storage.destroy_bucket(&theirs).await.unwrap();
        assert!(!storage.bucket_exists("shared"));
    }
}
