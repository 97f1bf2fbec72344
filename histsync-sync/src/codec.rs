//! Encoding of record sets into remote objects and back.

use bytes::Bytes;
use histsync_core::{Error, HistoryRecord, Result};

use crate::cipher::Cipher;

/// How a remote object was turned back into records.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Decrypted with the configured key.
    Decrypted(Vec<HistoryRecord>),
    /// Stored as plain JSON (or the key did not apply and it parsed as JSON).
    PlainJson(Vec<HistoryRecord>),
    Failed(String),
}

impl Decoded {
    pub fn is_failed(&self) -> bool {
        matches!(self, Decoded::Failed(_))
    }

    /// Records, or `Error::Decode` naming `object`.
    pub fn into_records(self, object: &str) -> Result<Vec<HistoryRecord>> {
        match self {
            Decoded::Decrypted(records) | Decoded::PlainJson(records) => Ok(records),
            Decoded::Failed(reason) => Err(Error::Decode(format!("{}: {}", object, reason))),
        }
    }
}

/// Serializes `records`, encrypting when the cipher has a key.
pub fn encode_records(records: &[HistoryRecord], cipher: &dyn Cipher) -> Result<Bytes> {
    if cipher.has_key() {
        let json = serde_json::to_vec(records)?;
        Ok(Bytes::from(cipher.encrypt(&json)?))
    } else {
        Ok(Bytes::from(serde_json::to_vec_pretty(records)?))
    }
}

/// Decrypt first when a key is set, then fall back to plain JSON.
pub fn decode_records(data: &[u8], cipher: &dyn Cipher) -> Decoded {
    let mut decrypt_error = None;

    if cipher.has_key() {
        match std::str::from_utf8(data)
            .map_err(|e| Error::Decode(e.to_string()))
            .and_then(|text| cipher.decrypt(text))
        {
            Ok(plain) => match serde_json::from_slice::<Vec<HistoryRecord>>(&plain) {
                Ok(records) => return Decoded::Decrypted(records),
                Err(e) => decrypt_error = Some(format!("decrypted payload is not a record list: {}", e)),
            },
            Err(e) => decrypt_error = Some(e.to_string()),
        }
    }

    match serde_json::from_slice::<Vec<HistoryRecord>>(data) {
        Ok(records) => Decoded::PlainJson(records),
        Err(e) => Decoded::Failed(match decrypt_error {
            Some(de) => format!("{}; not plain JSON either: {}", de, e),
            None => format!("not a JSON record list: {}", e),
        }),
    }
}
