//! Container Reader - Binary Kernel Archives
//!
//! Layout (little-endian, no padding, no terminators):
//!
//! ```text
//! u64            entry count N
//! N x {
//!     i32        key length K
//!     [u8; K]    key (UTF-8)
//!     i32        value length V
//!     [u8; V]    kernel binary
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Smallest possible encoded entry: two empty length fields.
const MIN_ENTRY_LEN: u64 = 8;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Malformed container {path}: {reason} (offset {offset})")]
    MalformedContainer {
        path: PathBuf,
        offset: usize,
        reason: String,
    },

    #[error("Missing platform descriptor: {0}")]
    MissingDescriptor(PathBuf),

    #[error("Entry '{key}' is too large to encode ({len} bytes)")]
    EntryTooLarge { key: String, len: usize },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ContainerError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Kernel identifier to kernel binary, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledKernelMap {
    entries: Vec<(String, Vec<u8>)>,
    index: HashMap<String, usize>,
}

impl CompiledKernelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.index.get(key).map(|&i| self.entries[i].1.as_slice())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or replaces. A replaced key keeps its original position.
    /// Returns the previous value, if any.
    pub fn insert(&mut self, key: String, value: Vec<u8>) -> Option<Vec<u8>> {
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl IntoIterator for CompiledKernelMap {
    type Item = (String, Vec<u8>);
    type IntoIter = std::vec::IntoIter<(String, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<u8>)> for CompiledKernelMap {
    fn from_iter<I: IntoIterator<Item = (K, Vec<u8>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k.into(), v);
        }
        map
    }
}

/// One decoded location: its kernels plus the platform descriptor text.
#[derive(Debug, Clone)]
pub struct ContainerContents {
    pub kernels: CompiledKernelMap,
    pub descriptor: String,
}

struct Cursor<'a> {
    path: &'a Path,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn malformed(&self, reason: impl Into<String>) -> ContainerError {
        ContainerError::MalformedContainer {
            path: self.path.to_path_buf(),
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], ContainerError> {
        if len > self.remaining() {
            return Err(self.malformed(format!(
                "{} needs {} bytes but only {} remain",
                what,
                len,
                self.remaining()
            )));
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u64(&mut self, what: &str) -> Result<u64, ContainerError> {
        let bytes = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_len(&mut self, what: &str) -> Result<usize, ContainerError> {
        let start = self.pos;
        let bytes = self.take(4, what)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        let len = i32::from_le_bytes(buf);
        if len < 0 {
            self.pos = start;
            return Err(self.malformed(format!("{} is negative ({})", what, len)));
        }
        Ok(len as usize)
    }
}

/// Decode a container held in memory. `path` is only used for diagnostics.
pub fn decode_container(path: &Path, data: &[u8]) -> Result<CompiledKernelMap, ContainerError> {
    let mut cur = Cursor { path, data, pos: 0 };

    let count = cur.read_u64("entry count")?;
    if count > cur.remaining() as u64 / MIN_ENTRY_LEN {
        return Err(cur.malformed(format!(
            "entry count {} cannot fit in {} remaining bytes",
            count,
            cur.remaining()
        )));
    }

    let mut kernels = CompiledKernelMap::new();
    for entry in 0..count {
        let key_len = cur.read_len(&format!("key length of entry {}", entry))?;
        let key_start = cur.pos;
        let key_bytes = cur.take(key_len, &format!("key of entry {}", entry))?;
        let key = std::str::from_utf8(key_bytes).map_err(|e| {
            cur.pos = key_start;
            cur.malformed(format!("key of entry {} is not UTF-8: {}", entry, e))
        })?;

        let value_len = cur.read_len(&format!("value length of '{}'", key))?;
        let value = cur.take(value_len, &format!("value of '{}'", key))?;

        if kernels.contains_key(key) {
            return Err(cur.malformed(format!("duplicate key '{}'", key)));
        }
        kernels.insert(key.to_string(), value.to_vec());
    }

    if cur.remaining() != 0 {
        return Err(cur.malformed(format!(
            "{} trailing bytes after {} entries",
            cur.remaining(),
            count
        )));
    }

    Ok(kernels)
}

/// Encode with the same layout `decode_container` reads.
pub fn encode_container(kernels: &CompiledKernelMap) -> Result<Vec<u8>, ContainerError> {
    let body: usize = kernels.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut out = Vec::with_capacity(8 + body);
    out.extend_from_slice(&(kernels.len() as u64).to_le_bytes());

    for (key, value) in kernels.iter() {
        for (field, len) in [(key.as_bytes(), key.len()), (value, value.len())] {
            let len = i32::try_from(len).map_err(|_| ContainerError::EntryTooLarge {
                key: key.to_string(),
                len,
            })?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(field);
        }
    }

    Ok(out)
}

/// Read one location.
///
/// `Ok(None)` when the container file does not exist; that location has no
/// kernels for this platform variant and is skipped by the assembler.
pub fn read_container(
    dir: &Path,
    container_name: &str,
    descriptor_name: &str,
) -> Result<Option<ContainerContents>, ContainerError> {
    let container_path = dir.join(container_name);
    let data = match fs::read(&container_path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ContainerError::io(&container_path, e)),
    };

    log::debug!("decoding {} ({} bytes)", container_path.display(), data.len());
    let kernels = decode_container(&container_path, &data)?;

    let descriptor_path = dir.join(descriptor_name);
    let descriptor = match fs::read_to_string(&descriptor_path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ContainerError::MissingDescriptor(descriptor_path));
        }
        Err(e) => return Err(ContainerError::io(&descriptor_path, e)),
    };

    Ok(Some(ContainerContents { kernels, descriptor }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("test.bin")
    }

    fn sample() -> CompiledKernelMap {
        [("add", vec![0xDE, 0xAD, 0xBE, 0xEF]), ("mul", vec![0xC0, 0xFF, 0xEE])]
            .into_iter()
            .collect()
    }

    fn reason_of(err: ContainerError) -> String {
        match err {
            ContainerError::MalformedContainer { reason, .. } => reason,
            other => panic!("expected MalformedContainer, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_known_layout() {
        let mut data = 1u64.to_le_bytes().to_vec();
        data.extend_from_slice(&3i32.to_le_bytes());
        data.extend_from_slice(b"add");
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&[0x01, 0x02]);

        let map = decode_container(path(), &data).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("add"), Some(&[0x01, 0x02][..]));
    }

    #[test]
    fn test_empty_container() {
        let map = decode_container(path(), &0u64.to_le_bytes()).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_roundtrip_is_byte_identical() {
        let encoded = encode_container(&sample()).unwrap();
        let decoded = decode_container(path(), &encoded).unwrap();
        assert_eq!(decoded, sample());
        assert_eq!(encode_container(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_roundtrip_shapes() {
        let cases: Vec<(&str, Vec<(&str, Vec<u8>)>)> = vec![
            ("empty container", vec![]),
            ("empty key", vec![("", vec![0x01, 0x02])]),
            ("zero-length value", vec![("noop", vec![])]),
            ("empty key and value", vec![("", vec![])]),
            ("non-ASCII key", vec![("卷积_3x3", vec![0xFF]), ("größe", vec![0x00; 3])]),
            ("large value", vec![("big", (0..=255u8).cycle().take(70_000).collect())]),
        ];

        for (name, entries) in cases {
            let map: CompiledKernelMap = entries.into_iter().collect();
            let bytes = encode_container(&map).unwrap();
            let decoded = decode_container(path(), &bytes)
                .unwrap_or_else(|e| panic!("{}: decode failed: {}", name, e));
            assert_eq!(decoded, map, "{}", name);
            assert_eq!(encode_container(&decoded).unwrap(), bytes, "{}", name);
        }
    }

    #[test]
    fn test_handwritten_bytes_roundtrip() {
        let mut data = 2u64.to_le_bytes().to_vec();
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&3i32.to_le_bytes());
        data.extend_from_slice("ü1".as_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.push(0x7F);

        let decoded = decode_container(path(), &data).unwrap();
        assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["", "ü1"]);
        assert_eq!(encode_container(&decoded).unwrap(), data);
    }

    #[test]
    fn test_preserves_insertion_order() {
        let map: CompiledKernelMap = [("z", vec![1]), ("a", vec![2]), ("m", vec![3])]
            .into_iter()
            .collect();
        let decoded = decode_container(path(), &encode_container(&map).unwrap()).unwrap();
        assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_truncated_header() {
        let err = decode_container(path(), &[0, 0, 0]).unwrap_err();
        assert!(reason_of(err).contains("entry count"));
    }

    #[test]
    fn test_count_overruns_buffer() {
        let mut data = u64::MAX.to_le_bytes().to_vec();
        data.extend_from_slice(&[0; 8]);
        let err = decode_container(path(), &data).unwrap_err();
        assert!(reason_of(err).contains("cannot fit"));
    }

    #[test]
    fn test_value_overruns_buffer() {
        let mut data = encode_container(&sample()).unwrap();
        data.truncate(data.len() - 1);
        let err = decode_container(path(), &data).unwrap_err();
        assert!(reason_of(err).contains("value of 'mul'"));
    }

    #[test]
    fn test_negative_key_length() {
        let mut data = 1u64.to_le_bytes().to_vec();
        data.extend_from_slice(&(-1i32).to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        match decode_container(path(), &data).unwrap_err() {
            ContainerError::MalformedContainer { offset, reason, .. } => {
                assert_eq!(offset, 8);
                assert!(reason.contains("negative"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_negative_value_length() {
        let mut data = 1u64.to_le_bytes().to_vec();
        data.extend_from_slice(&1i32.to_le_bytes());
        data.push(b'k');
        data.extend_from_slice(&i32::MIN.to_le_bytes());
        assert!(reason_of(decode_container(path(), &data).unwrap_err()).contains("negative"));
    }

    #[test]
    fn test_non_utf8_key() {
        let mut data = 1u64.to_le_bytes().to_vec();
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0xFE]);
        data.extend_from_slice(&0i32.to_le_bytes());
        assert!(reason_of(decode_container(path(), &data).unwrap_err()).contains("UTF-8"));
    }

    #[test]
    fn test_duplicate_key_within_container() {
        let mut data = 2u64.to_le_bytes().to_vec();
        for _ in 0..2 {
            data.extend_from_slice(&1i32.to_le_bytes());
            data.push(b'k');
            data.extend_from_slice(&0i32.to_le_bytes());
        }
        assert!(reason_of(decode_container(path(), &data).unwrap_err()).contains("duplicate"));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut data = encode_container(&sample()).unwrap();
        data.push(0);
        assert!(reason_of(decode_container(path(), &data).unwrap_err()).contains("trailing"));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut map = sample();
        let old = map.insert("add".to_string(), vec![1]);
        assert_eq!(old, Some(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["add", "mul"]);
        assert_eq!(map.get("add"), Some(&[1][..]));
    }
}
