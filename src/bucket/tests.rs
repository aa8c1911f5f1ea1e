//! Bucket Module Tests

#[cfg(test)]
mod tests {
    use crate::bucket::directory::BucketDirectory;
    use crate::bucket::types::{Bucket, RateLimitProps};
    use crate::error::BatchError;

    #[test]
    fn test_lookup_defaults_to_ais_provider() {
        let directory = BucketDirectory::new(vec![Bucket::new("images")]);

        let bucket = directory.lookup("images", None).unwrap();
        assert_eq!(bucket.uname(), "ais/images");

        let same = directory.lookup("images", Some("")).unwrap();
        assert_eq!(same, bucket);
    }

    #[test]
    fn test_lookup_unknown_bucket() {
        let directory = BucketDirectory::new(vec![Bucket::new("images")]);

        assert!(matches!(
            directory.lookup("videos", None),
            Err(BatchError::BucketNotFound(_))
        ));
        assert!(matches!(
            directory.lookup("images", Some("s3")),
            Err(BatchError::BucketNotFound(_))
        ));
        assert!(matches!(
            directory.lookup("", None),
            Err(BatchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_hash_uname_differs_by_verb_and_bucket() {
        let a = Bucket::new("a");
        let b = Bucket::new("b");

        assert_eq!(a.hash_uname("GET"), a.hash_uname("GET"));
        assert_ne!(a.hash_uname("GET"), a.hash_uname("PUT"));
        assert_ne!(a.hash_uname("GET"), b.hash_uname("GET"));
    }

    #[test]
    fn test_object_uname() {
        let bucket = Bucket::new("shards");

        assert_eq!(bucket.object_uname("a/b.bin"), "ais/shards/a/b.bin");
    }

    #[test]
    fn test_rate_limit_props_from_toml() {
        let props: RateLimitProps = toml::from_str("enabled = true\nmax_tokens = 10").unwrap();

        assert!(props.enabled);
        assert_eq!(props.max_tokens, 10);
        assert_eq!(props.interval().as_millis(), 1000);
    }
}
