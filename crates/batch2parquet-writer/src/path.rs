//! Partition directory and filename generation
//!
//! Hive-style layout: `<base>/<key1>=<value1>/<key2>=<value2>/...` with
//! form-urlencoded values and a random 16-byte hex token per file.

use batch2parquet_core::PartitionKey;
use uuid::Uuid;

/// Form-urlencode a partition value: space becomes '+', alphanumerics and
/// `.-*_` pass through, every other byte is percent-encoded UTF-8.
pub fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        match byte {
            b' ' => out.push('+'),
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'*' | b'_' => {
                out.push(*byte as char)
            }
            _ => {
                out.push('%');
                out.push(HEX[(byte >> 4) as usize] as char);
                out.push(HEX[(byte & 0x0f) as usize] as char);
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Directory for a partition key tuple under `base`.
pub fn partition_dir(base: &str, key: &PartitionKey, sep: &str) -> String {
    if key.is_empty() {
        return base.to_string();
    }
    let mut dir = base.to_string();
    for (name, value) in key.iter() {
        dir.push_str(sep);
        dir.push_str(name);
        dir.push('=');
        dir.push_str(&encode_value(value));
    }
    dir
}

/// Random filename: 16-byte hex token plus the format extension.
pub fn random_filename(extension: &str) -> String {
    format!("{}{}", Uuid::new_v4().simple(), extension)
}
