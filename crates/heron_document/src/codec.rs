//! Document serialization seam.
//!
//! A document is an ordered string→value map. Only this module knows the
//! byte format; swapping the serializer touches nothing else.

use heron_common::error::DocumentError;

/// One document: an insertion-ordered string→value map (serde_json with the
/// `preserve_order` feature).
pub type Document = serde_json::Map<String, serde_json::Value>;

pub fn encode(doc: &Document) -> Result<Vec<u8>, DocumentError> {
    serde_json::to_vec(doc).map_err(|e| DocumentError::Codec(e.to_string()))
}

pub fn decode(raw: &[u8]) -> Result<Document, DocumentError> {
    serde_json::from_slice(raw).map_err(|e| DocumentError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_roundtrip() {
        let mut doc = Document::new();
        doc.insert("key".into(), json!("value"));
        doc.insert("n".into(), json!(42));
        let raw = encode(&doc).unwrap();
        assert_eq!(decode(&raw).unwrap(), doc);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode(b"\x00not json"),
            Err(DocumentError::Codec(_))
        ));
    }
}
