use crate::error::{AppError, CodecError, PktavError};
use anyhow::Result;

/// An ordered key/value pair list, as exchanged on the wire.
///
/// Lookup is linear and returns the first match, mirroring `get_value_from_kv_list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvList {
    pairs: Vec<(String, String)>,
}

impl KvList {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Result<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| PktavError::App(AppError::KeyNotFound).into())
    }

    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes as `k1<kvd>v1<pd>k2<kvd>v2` with no trailing pair-delimiter.
    ///
    /// Rejects any key or value containing either delimiter byte (see the framing weakness
    /// design note: the wire format has no escaping mechanism).
    pub fn serialize(&self, pair_delim: char, kv_delim: char) -> Result<String> {
        let mut out = String::new();
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if k.contains(pair_delim) || k.contains(kv_delim) || v.contains(pair_delim) || v.contains(kv_delim) {
                return Err(PktavError::Codec(CodecError::InvalidArg.into()).into());
            }
            if i > 0 {
                out.push(pair_delim);
            }
            out.push_str(k);
            out.push(kv_delim);
            out.push_str(v);
        }
        Ok(out)
    }

    /// Parses `k1<kvd>v1<pd>k2<kvd>v2...`. Each pair splits on the *first* kv-delimiter.
    /// An empty value after the delimiter is permitted. Empty input yields an empty list.
    pub fn parse(s: &str, pair_delim: char, kv_delim: char) -> Result<Self> {
        let mut list = Self::new();
        if s.is_empty() {
            return Ok(list);
        }
        for pair in s.split(pair_delim) {
            let mut parts = pair.splitn(2, kv_delim);
            let key = parts.next().ok_or(CodecError::InvalidArg)?;
            let value = parts.next().ok_or(CodecError::InvalidArg)?;
            list.push(key, value);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut l = KvList::new();
        l.push("input_file", "/tmp/video.mp4");
        l.push("status", "0");
        let wire = l.serialize(';', ':').unwrap();
        assert_eq!(wire, "input_file:/tmp/video.mp4;status:0");
        let parsed = KvList::parse(&wire, ';', ':').unwrap();
        assert_eq!(parsed, l);
    }

    #[test]
    fn empty_list_round_trips() {
        let l = KvList::new();
        let wire = l.serialize(';', ':').unwrap();
        assert_eq!(wire, "");
        assert_eq!(KvList::parse(&wire, ';', ':').unwrap(), l);
    }

    #[test]
    fn empty_value_is_permitted() {
        let parsed = KvList::parse("err_msg:", ';', ':').unwrap();
        assert_eq!(parsed.get("err_msg").unwrap(), "");
    }

    #[test]
    fn missing_key_is_key_not_found() {
        let l = KvList::new();
        assert!(l.get("nope").is_err());
    }

    #[test]
    fn lookup_returns_first_match() {
        let mut l = KvList::new();
        l.push("k", "first");
        l.push("k", "second");
        assert_eq!(l.get("k").unwrap(), "first");
    }

    #[test]
    fn serialize_rejects_delimiter_in_value() {
        let mut l = KvList::new();
        l.push("k", "a;b");
        assert!(l.serialize(';', ':').is_err());
    }

    #[test]
    fn kv_opts_style_delimiters() {
        let parsed = KvList::parse("movflags=faststart&preset=veryfast", '&', '=').unwrap();
        assert_eq!(parsed.get("movflags").unwrap(), "faststart");
        assert_eq!(parsed.get("preset").unwrap(), "veryfast");
    }
}
