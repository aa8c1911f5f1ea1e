//! Archive Module
//!
//! Output container of a get-batch request. The coordinator appends one entry per
//! requested object, in request order, and streams the bytes produced so far after
//! every entry.
//!
//! - **`OutputFormat`**: the MIME registry; normalises user-supplied format strings.
//! - **`ArchiveWriter`**: incremental TAR or TAR.GZ writer over an in-memory buffer.

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io;

use crate::error::BatchError;
use crate::store::types::ObjAttrs;

/// Entry-name prefix for requested objects that do not exist.
pub const MISSING_PREFIX: &str = "__404__";
/// Entry-name prefix for requested objects that could not be read.
pub const FAILED_PREFIX: &str = "__err__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Tar,
    TarGz,
}

impl OutputFormat {
    /// Maps a format string (extension or MIME type) to a known format; `None`
    /// and the empty string select the default.
    pub fn normalize(format: Option<&str>) -> Result<Self, BatchError> {
        let raw = match format.map(str::trim) {
            None | Some("") => return Ok(OutputFormat::Tar),
            Some(raw) => raw,
        };
        match raw.to_ascii_lowercase().as_str() {
            "tar" | ".tar" | "application/x-tar" => Ok(OutputFormat::Tar),
            "tgz" | ".tgz" | "tar.gz" | ".tar.gz" | "application/x-gzip" | "application/gzip"
            | "application/tar+gzip" => Ok(OutputFormat::TarGz),
            _ => Err(BatchError::UnsupportedFormat(raw.to_string())),
        }
    }

    /// Canonical extension, stored back into the request once normalised.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Tar => ".tar",
            OutputFormat::TarGz => ".tar.gz",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Tar => "application/x-tar",
            OutputFormat::TarGz => "application/tar+gzip",
        }
    }
}

enum Inner {
    Tar(tar::Builder<Vec<u8>>),
    TarGz(tar::Builder<GzEncoder<Vec<u8>>>),
}

/// Writes archive entries into a buffer that the caller drains after each append.
pub struct ArchiveWriter {
    inner: Inner,
    entries: usize,
}

impl ArchiveWriter {
    pub fn new(format: OutputFormat) -> Self {
        let inner = match format {
            OutputFormat::Tar => Inner::Tar(tar::Builder::new(Vec::new())),
            OutputFormat::TarGz => Inner::TarGz(tar::Builder::new(GzEncoder::new(
                Vec::new(),
                Compression::default(),
            ))),
        };
        Self { inner, entries: 0 }
    }

    /// Appends one entry and returns the archive bytes produced since the last call.
    pub fn append(&mut self, name: &str, attrs: Option<&ObjAttrs>, data: &[u8]) -> io::Result<Bytes> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(attrs.map(|a| a.mtime_ms / 1000).unwrap_or(0));
        header.set_entry_type(tar::EntryType::Regular);

        let drained = match &mut self.inner {
            Inner::Tar(builder) => {
                builder.append_data(&mut header, name, data)?;
                std::mem::take(builder.get_mut())
            }
            Inner::TarGz(builder) => {
                builder.append_data(&mut header, name, data)?;
                std::mem::take(builder.get_mut().get_mut())
            }
        };
        self.entries += 1;
        Ok(Bytes::from(drained))
    }

    /// Writes the archive trailer and returns the remaining bytes.
    pub fn finish(self) -> io::Result<Bytes> {
        let rest = match self.inner {
            Inner::Tar(builder) => builder.into_inner()?,
            Inner::TarGz(builder) => builder.into_inner()?.finish()?,
        };
        Ok(Bytes::from(rest))
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

/// Rejects names the archive cannot carry as a relative entry path.
pub fn check_name(name: &str) -> Result<(), String> {
    if name.starts_with('/') {
        return Err(format!("{:?}: absolute names are not allowed", name));
    }
    if name.contains('\0') {
        return Err(format!("{:?}: NUL in name", name));
    }
    if name.split('/').any(|segment| segment == "..") {
        return Err(format!("{:?}: `..` segments are not allowed", name));
    }
    Ok(())
}

/// Name of a regular entry: `bucket/object`, or just `object` when requested.
pub fn entry_name(bucket: &str, obj_name: &str, only_obj_name: bool) -> String {
    if only_obj_name {
        obj_name.to_string()
    } else {
        format!("{}/{}", bucket, obj_name)
    }
}

pub fn missing_entry_name(bucket: &str, obj_name: &str) -> String {
    format!("{}/{}/{}", MISSING_PREFIX, bucket, obj_name)
}

pub fn failed_entry_name(bucket: &str, obj_name: &str) -> String {
    format!("{}/{}/{}", FAILED_PREFIX, bucket, obj_name)
}

#[cfg(test)]
mod tests;
