use heron_common::error::{KvError, StructureError};
use heron_kv::{KvTxn, ScanOptions};

use crate::codec::{
    decode_i64, encode_i64, hash_field_key, hash_meta_key, hash_prefix, list_element_key,
    list_meta_key, SUFFIX_MEMBER,
};

type Result<T> = std::result::Result<T, StructureError>;

/// One field/value pair of a hash, in field-key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashPair {
    pub field: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct ListMeta {
    head: i64,
    tail: i64,
}

impl ListMeta {
    fn len(&self) -> i64 {
        self.tail - self.head
    }

    fn is_empty(&self) -> bool {
        self.head >= self.tail
    }

    fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&encode_i64(self.head));
        buf[8..].copy_from_slice(&encode_i64(self.tail));
        buf
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != 16 {
            return Err(StructureError::InvalidValue { what: "list meta" });
        }
        Ok(Self {
            head: decode_i64(&raw[..8], "list meta head")?,
            tail: decode_i64(&raw[8..], "list meta tail")?,
        })
    }
}

/// Structured view of one transaction under a namespace prefix.
pub struct TxStructure<'a> {
    txn: &'a mut dyn KvTxn,
    prefix: Vec<u8>,
}

impl<'a> TxStructure<'a> {
    pub fn new(txn: &'a mut dyn KvTxn, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            txn,
            prefix: prefix.into(),
        }
    }

    fn get_optional(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.txn.get(key) {
            Ok((v, _)) => Ok(Some(v)),
            Err(KvError::KeyNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_i64_at(&self, key: &[u8], what: &'static str) -> Result<i64> {
        match self.get_optional(key)? {
            Some(raw) => decode_i64(&raw, what),
            None => Ok(0),
        }
    }

    // ── Strings ──────────────────────────────────────────────────────────

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let k = crate::codec::string_key(&self.prefix, key);
        self.txn.set(&k, value, None).map_err(Into::into)
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let k = crate::codec::string_key(&self.prefix, key);
        Ok(self.txn.get(&k)?.0)
    }

    pub fn clear(&mut self, key: &[u8]) -> Result<()> {
        let k = crate::codec::string_key(&self.prefix, key);
        self.txn.delete(&k).map_err(Into::into)
    }

    /// Add `step` to the counter at `key` (0 when absent) and return the sum.
    pub fn inc(&mut self, key: &[u8], step: i64) -> Result<i64> {
        let k = crate::codec::string_key(&self.prefix, key);
        let new = self.get_i64_at(&k, "counter")? + step;
        self.txn.set(&k, &encode_i64(new), None)?;
        Ok(new)
    }

    /// Counter value at `key`, 0 when absent.
    pub fn get_i64(&self, key: &[u8]) -> Result<i64> {
        let k = crate::codec::string_key(&self.prefix, key);
        self.get_i64_at(&k, "counter")
    }

    // ── Hashes ───────────────────────────────────────────────────────────

    pub fn hset(&mut self, hash: &[u8], field: &[u8], value: &[u8]) -> Result<()> {
        let fk = hash_field_key(&self.prefix, hash, field);
        if self.get_optional(&fk)?.is_none() {
            self.hash_resize(hash, 1)?;
        }
        self.txn.set(&fk, value, None).map_err(Into::into)
    }

    pub fn hget(&self, hash: &[u8], field: &[u8]) -> Result<Vec<u8>> {
        let fk = hash_field_key(&self.prefix, hash, field);
        Ok(self.txn.get(&fk)?.0)
    }

    /// Add `step` to the counter in `field` (0 when absent) and return the
    /// sum. An absent field counts toward the hash size.
    pub fn hinc(&mut self, hash: &[u8], field: &[u8], step: i64) -> Result<i64> {
        let fk = hash_field_key(&self.prefix, hash, field);
        let new = match self.get_optional(&fk)? {
            Some(raw) => decode_i64(&raw, "hash counter")? + step,
            None => {
                self.hash_resize(hash, 1)?;
                step
            }
        };
        self.txn.set(&fk, &encode_i64(new), None)?;
        Ok(new)
    }

    pub fn hget_i64(&self, hash: &[u8], field: &[u8]) -> Result<i64> {
        let fk = hash_field_key(&self.prefix, hash, field);
        self.get_i64_at(&fk, "hash counter")
    }

    pub fn hdel(&mut self, hash: &[u8], field: &[u8]) -> Result<()> {
        let fk = hash_field_key(&self.prefix, hash, field);
        if self.get_optional(&fk)?.is_some() {
            self.txn.delete(&fk)?;
            self.hash_resize(hash, -1)?;
        }
        Ok(())
    }

    /// Delete every field of `hash` and its meta entry.
    pub fn hclear(&mut self, hash: &[u8]) -> Result<()> {
        for pair in self.hget_all(hash)? {
            let fk = hash_field_key(&self.prefix, hash, &pair.field);
            self.txn.delete(&fk)?;
        }
        let mk = hash_meta_key(&self.prefix, hash);
        self.txn.delete(&mk).map_err(Into::into)
    }

    /// All fields of `hash` in field-key order, meta entry excluded.
    pub fn hget_all(&self, hash: &[u8]) -> Result<Vec<HashPair>> {
        let hp = hash_prefix(&self.prefix, hash);
        let mut pairs = Vec::new();
        self.txn.scan(
            &ScanOptions {
                prefix: hp.clone(),
                ..Default::default()
            },
            &mut |key, value, _| {
                // Skip the meta entry and keys of hashes whose name merely
                // extends ours; fields carry the member suffix byte.
                if key.len() > hp.len() && key[hp.len()] == SUFFIX_MEMBER {
                    pairs.push(HashPair {
                        field: key[hp.len() + 1..].to_vec(),
                        value: value.to_vec(),
                    });
                }
                true
            },
        )?;
        Ok(pairs)
    }

    /// Number of fields in `hash`. O(1): read from the meta entry.
    pub fn hlen(&self, hash: &[u8]) -> Result<i64> {
        let mk = hash_meta_key(&self.prefix, hash);
        self.get_i64_at(&mk, "hash meta")
    }

    fn hash_resize(&mut self, hash: &[u8], delta: i64) -> Result<i64> {
        let mk = hash_meta_key(&self.prefix, hash);
        let size = self.get_i64_at(&mk, "hash meta")? + delta;
        if size <= 0 {
            self.txn.delete(&mk)?;
        } else {
            self.txn.set(&mk, &encode_i64(size), None)?;
        }
        Ok(size)
    }

    // ── Lists ────────────────────────────────────────────────────────────

    pub fn lpush(&mut self, list: &[u8], value: &[u8]) -> Result<()> {
        let mut meta = self.list_meta(list)?;
        meta.head -= 1;
        let ek = list_element_key(&self.prefix, list, meta.head);
        self.txn.set(&ek, value, None)?;
        self.write_list_meta(list, meta)
    }

    pub fn rpush(&mut self, list: &[u8], value: &[u8]) -> Result<()> {
        let mut meta = self.list_meta(list)?;
        let ek = list_element_key(&self.prefix, list, meta.tail);
        meta.tail += 1;
        self.txn.set(&ek, value, None)?;
        self.write_list_meta(list, meta)
    }

    pub fn lpop(&mut self, list: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut meta = self.list_meta(list)?;
        if meta.is_empty() {
            return Ok(None);
        }
        let ek = list_element_key(&self.prefix, list, meta.head);
        let value = self.get_optional(&ek)?;
        self.txn.delete(&ek)?;
        meta.head += 1;
        self.write_list_meta(list, meta)?;
        Ok(value)
    }

    pub fn rpop(&mut self, list: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut meta = self.list_meta(list)?;
        if meta.is_empty() {
            return Ok(None);
        }
        meta.tail -= 1;
        let ek = list_element_key(&self.prefix, list, meta.tail);
        let value = self.get_optional(&ek)?;
        self.txn.delete(&ek)?;
        self.write_list_meta(list, meta)?;
        Ok(value)
    }

    /// Element at `index`: non-negative counts from the head, negative from
    /// the tail. `None` when out of range.
    pub fn lindex(&self, list: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let meta = self.list_meta(list)?;
        match resolve_index(&meta, index) {
            Some(actual) => {
                let ek = list_element_key(&self.prefix, list, actual);
                self.get_optional(&ek)
            }
            None => Ok(None),
        }
    }

    /// Overwrite the element at `index`. Errors when out of range.
    pub fn lset(&mut self, list: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let meta = self.list_meta(list)?;
        let actual = resolve_index(&meta, index).ok_or(StructureError::ListIndexOutOfRange {
            index,
            head: meta.head,
            tail: meta.tail,
        })?;
        let ek = list_element_key(&self.prefix, list, actual);
        self.txn.set(&ek, value, None).map_err(Into::into)
    }

    pub fn llen(&self, list: &[u8]) -> Result<i64> {
        Ok(self.list_meta(list)?.len())
    }

    /// Elements from `start` through `stop` inclusive, both relative to the
    /// head and negative-from-the-tail like `lindex`.
    pub fn lrange(&self, list: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let meta = self.list_meta(list)?;
        let len = meta.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        let lo = clamp_range_bound(start, len);
        let hi = clamp_range_bound(stop, len);
        let mut out = Vec::new();
        let mut i = lo;
        while i <= hi && i < len {
            let ek = list_element_key(&self.prefix, list, meta.head + i);
            if let Some(v) = self.get_optional(&ek)? {
                out.push(v);
            }
            i += 1;
        }
        Ok(out)
    }

    fn list_meta(&self, list: &[u8]) -> Result<ListMeta> {
        let mk = list_meta_key(&self.prefix, list);
        match self.get_optional(&mk)? {
            Some(raw) => ListMeta::decode(&raw),
            None => Ok(ListMeta { head: 0, tail: 0 }),
        }
    }

    fn write_list_meta(&mut self, list: &[u8], meta: ListMeta) -> Result<()> {
        let mk = list_meta_key(&self.prefix, list);
        if meta.is_empty() {
            self.txn.delete(&mk).map_err(Into::into)
        } else {
            self.txn.set(&mk, &meta.encode(), None).map_err(Into::into)
        }
    }
}

fn resolve_index(meta: &ListMeta, index: i64) -> Option<i64> {
    let actual = if index >= 0 {
        meta.head + index
    } else {
        meta.tail + index
    };
    (actual >= meta.head && actual < meta.tail).then_some(actual)
}

fn clamp_range_bound(bound: i64, len: i64) -> i64 {
    let resolved = if bound < 0 { len + bound } else { bound };
    resolved.max(0)
}
