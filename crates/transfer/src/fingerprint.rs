use ingest_protocol::Blob;
use ingest_protocol::constants::FINGERPRINT_PREFIX;

/// Builds the resume fingerprint for `blob` uploaded into `container_id`.
///
/// Derived only from the blob's identity attributes, so the same file offered
/// again after a restart maps to the same stored session.
pub fn fingerprint(blob: &Blob, container_id: &str) -> String {
    format!(
        "{FINGERPRINT_PREFIX}-{}-{}-{}-{}-{container_id}",
        blob.name, blob.content_type, blob.size, blob.last_modified
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(name: &str, size: usize, mtime: i64) -> Blob {
        let mut b = Blob::from_bytes(name, vec![0u8; size]).with_content_type("text/plain");
        b.last_modified = mtime;
        b
    }

    #[test]
    fn fingerprint_layout() {
        let fp = fingerprint(&blob("a.txt", 3, 1700000000000), "hist1");
        assert_eq!(fp, "tus-br-a.txt-text/plain-3-1700000000000-hist1");
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let b = blob("a.txt", 10, 42);
        assert_eq!(fingerprint(&b, "h"), fingerprint(&b.clone(), "h"));
    }

    #[test]
    fn fingerprint_depends_on_every_attribute() {
        let base = fingerprint(&blob("a.txt", 10, 42), "h");
        assert_ne!(base, fingerprint(&blob("b.txt", 10, 42), "h"));
        assert_ne!(base, fingerprint(&blob("a.txt", 11, 42), "h"));
        assert_ne!(base, fingerprint(&blob("a.txt", 10, 43), "h"));
        assert_ne!(base, fingerprint(&blob("a.txt", 10, 42), "other"));
    }
}
