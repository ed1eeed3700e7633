//! Byte-level token vocabulary for the greedy decoder.

use std::collections::HashMap;
use std::path::Path;

use crate::{AsrError, Result};

/// First id of the special-token block; everything at or above it is
/// control vocabulary and never contributes text.
pub const SPECIAL_TOKEN_FLOOR: i64 = 50_257;

/// Marker byte-BPE uses for a leading space.
const SPACE_PREFIX: char = 'Ġ';

/// Id-to-string token table loaded from a `vocab.json` map.
pub struct Vocab {
    id_to_token: HashMap<i64, String>,
}

impl Vocab {
    /// Load from a JSON object of `token → id`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AsrError::Vocab(format!("{}: {e}", path.as_ref().display())))?;
        let token_to_id: HashMap<String, i64> =
            serde_json::from_str(&data).map_err(|e| AsrError::Vocab(e.to_string()))?;
        Ok(Self::from_map(token_to_id))
    }

    pub fn from_map(token_to_id: HashMap<String, i64>) -> Self {
        Self {
            id_to_token: token_to_id.into_iter().map(|(t, i)| (i, t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    /// Decode token ids into text. The byte-BPE space prefix maps to an
    /// ASCII space; special tokens and unknown ids are skipped. The result
    /// is trimmed.
    pub fn decode(&self, tokens: &[i64]) -> String {
        let mut out = String::new();
        for &id in tokens {
            if id >= SPECIAL_TOKEN_FLOOR {
                continue;
            }
            let Some(token) = self.id_to_token.get(&id) else {
                continue;
            };
            if token.contains(SPACE_PREFIX) {
                out.push_str(&token.replace(SPACE_PREFIX, " "));
            } else {
                out.push_str(token);
            }
        }
        out.trim().to_string()
    }
}
