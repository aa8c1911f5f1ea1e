//! Archive Module Tests
//!
//! ## Test Scopes
//! - **Format registry**: normalisation of extensions and MIME types.
//! - **Writer**: incremental output that reads back as a valid TAR / TAR.GZ.

#[cfg(test)]
mod tests {
    use crate::archive::{
        ArchiveWriter, OutputFormat, check_name, entry_name, failed_entry_name, missing_entry_name,
    };
    use crate::error::BatchError;
    use crate::store::types::ObjAttrs;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn read_tar<R: Read>(reader: R) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(reader);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    // ============================================================
    // FORMAT REGISTRY
    // ============================================================

    #[test]
    fn test_normalize_defaults_to_tar() {
        assert_eq!(OutputFormat::normalize(None).unwrap(), OutputFormat::Tar);
        assert_eq!(OutputFormat::normalize(Some("")).unwrap(), OutputFormat::Tar);
    }

    #[test]
    fn test_normalize_accepts_extensions_and_mime_types() {
        for raw in ["tar", ".tar", "application/x-tar", "TAR"] {
            assert_eq!(OutputFormat::normalize(Some(raw)).unwrap(), OutputFormat::Tar, "{}", raw);
        }
        for raw in [".tgz", "tar.gz", ".tar.gz", "application/x-gzip", "application/tar+gzip"] {
            assert_eq!(OutputFormat::normalize(Some(raw)).unwrap(), OutputFormat::TarGz, "{}", raw);
        }
    }

    #[test]
    fn test_normalize_rejects_unknown_format() {
        let result = OutputFormat::normalize(Some(".zip"));

        assert!(matches!(result, Err(BatchError::UnsupportedFormat(f)) if f == ".zip"));
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(entry_name("b", "dir/o", false), "b/dir/o");
        assert_eq!(entry_name("b", "dir/o", true), "dir/o");
        assert_eq!(missing_entry_name("b", "o"), "__404__/b/o");
        assert_eq!(failed_entry_name("b", "o"), "__err__/b/o");
    }

    // ============================================================
    // WRITER
    // ============================================================

    #[test]
    fn test_check_name_matches_what_the_writer_accepts() {
        for bad in ["a/../b", "..", "/abs"] {
            assert!(check_name(bad).is_err(), "{:?}", bad);
            assert!(ArchiveWriter::new(OutputFormat::Tar).append(bad, None, b"").is_err(), "{:?}", bad);
        }
        assert!(check_name("x\0y").is_err());
        for good in ["a..b/c", "...", "dir/.hidden", "x"] {
            assert!(check_name(good).is_ok(), "{:?}", good);
            assert!(ArchiveWriter::new(OutputFormat::Tar).append(good, None, b"").is_ok(), "{:?}", good);
        }
    }

    #[test]
    fn test_tar_writer_streams_entries_in_order() {
        // ARRANGE
        let mut writer = ArchiveWriter::new(OutputFormat::Tar);
        let attrs = ObjAttrs {
            size: 5,
            mtime_ms: 1_700_000_000_000,
            checksum: 0,
            version: 1,
        };
        let mut out = Vec::new();

        // ACT
        out.extend_from_slice(&writer.append("b/first", Some(&attrs), b"hello").unwrap());
        out.extend_from_slice(&writer.append("__404__/b/second", None, b"").unwrap());
        assert_eq!(writer.entries(), 2);
        out.extend_from_slice(&writer.finish().unwrap());

        // ASSERT
        let entries = read_tar(out.as_slice());
        assert_eq!(
            entries,
            vec![
                ("b/first".to_string(), b"hello".to_vec()),
                ("__404__/b/second".to_string(), Vec::new()),
            ]
        );
    }

    #[test]
    fn test_tar_append_returns_bytes_immediately() {
        let mut writer = ArchiveWriter::new(OutputFormat::Tar);

        let chunk = writer.append("b/o", None, &[7u8; 1000]).unwrap();

        // header block plus data padded to the block size
        assert_eq!(chunk.len(), 512 + 1024);
    }

    #[test]
    fn test_tar_gz_round_trip() {
        let mut writer = ArchiveWriter::new(OutputFormat::TarGz);
        let mut out = Vec::new();

        for i in 0..3 {
            let data = format!("object-{}", i).repeat(100);
            out.extend_from_slice(&writer.append(&format!("b/o{}", i), None, data.as_bytes()).unwrap());
        }
        out.extend_from_slice(&writer.finish().unwrap());

        let entries = read_tar(GzDecoder::new(out.as_slice()));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].0, "b/o2");
        assert_eq!(entries[2].1, "object-2".repeat(100).into_bytes());
    }

    #[test]
    fn test_long_entry_names_survive() {
        let long = format!("b/{}", "x".repeat(300));
        let mut writer = ArchiveWriter::new(OutputFormat::Tar);
        let mut out = writer.append(&long, None, b"1").unwrap().to_vec();
        out.extend_from_slice(&writer.finish().unwrap());

        let entries = read_tar(out.as_slice());

        assert_eq!(entries[0].0, long);
    }
}
