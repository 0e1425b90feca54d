//!
//! Alphabets of observed/hidden states
//!
//! * `Alphabet`: ordered set of single-byte symbols
//! * `StatesDescription`: (observed, hidden, complete) triple, interned by content
//!
use crate::error::{Error, Result};
use fnv::FnvHashMap as HashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{Arc, Mutex};

///
/// Ordered set of symbols.
///
/// A symbol is stored in sequences by its index in the alphabet, so an
/// alphabet has at most 256 symbols.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Alphabet(String);

impl TryFrom<String> for Alphabet {
    type Error = Error;
    fn try_from(symbols: String) -> Result<Alphabet> {
        Alphabet::new(&symbols)
    }
}

impl Alphabet {
    pub fn new(symbols: &str) -> Result<Alphabet> {
        if symbols.is_empty() || !symbols.is_ascii() || symbols.len() > 256 {
            return Err(Error::InvalidAlphabet(symbols.to_string()));
        }
        for (i, c) in symbols.bytes().enumerate() {
            if symbols.bytes().skip(i + 1).any(|d| d == c) {
                return Err(Error::DuplicateSymbol {
                    symbol: c as char,
                    alphabet: symbols.to_string(),
                });
            }
        }
        Ok(Alphabet(symbols.to_string()))
    }
    /// number of symbols
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// index of the symbol, if it belongs to this alphabet
    pub fn index_of(&self, symbol: u8) -> Option<u8> {
        self.0.bytes().position(|c| c == symbol).map(|i| i as u8)
    }
    /// symbol of the index
    pub fn symbol(&self, index: u8) -> u8 {
        self.0.as_bytes()[index as usize]
    }
    ///
    /// Convert raw symbols into a sequence of indices.
    ///
    pub fn encode(&self, symbols: &[u8]) -> Result<Vec<u8>> {
        symbols
            .iter()
            .map(|&s| {
                self.index_of(s).ok_or_else(|| Error::UnknownSymbol {
                    symbol: s as char,
                    alphabet: self.0.clone(),
                })
            })
            .collect()
    }
    ///
    /// Convert a sequence of indices back into raw symbols.
    ///
    pub fn decode(&self, indices: &[u8]) -> Vec<u8> {
        indices.iter().map(|&i| self.symbol(i)).collect()
    }
    /// `decode` as String
    pub fn decode_to_string(&self, indices: &[u8]) -> String {
        String::from_utf8(self.decode(indices)).unwrap_or_default()
    }
}

impl std::fmt::Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// Description of observed, hidden and (optionally) complete states.
///
/// A complete state is a pair (observed, hidden); if the complete
/// alphabet is given, the pair `(o, h)` is printed as the symbol at
/// `o * |hidden| + h`.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StatesFields")]
pub struct StatesDescription {
    observed: Alphabet,
    hidden: Alphabet,
    complete: Option<Alphabet>,
}

/// serialized form of `StatesDescription`, checked on load
#[derive(Deserialize)]
struct StatesFields {
    observed: Alphabet,
    hidden: Alphabet,
    complete: Option<Alphabet>,
}

impl TryFrom<StatesFields> for StatesDescription {
    type Error = Error;
    fn try_from(s: StatesFields) -> Result<StatesDescription> {
        StatesDescription::new(
            s.observed.as_str(),
            s.hidden.as_str(),
            s.complete.as_ref().map(|c| c.as_str()),
        )
    }
}

///
/// Deserialize a description and return the shared `Arc` of its
/// alphabets, as `StatesDescription::get` does.
///
/// Used as `#[serde(deserialize_with = ...)]` on `Arc<StatesDescription>` fields.
///
pub fn deserialize_interned<'de, D>(deserializer: D) -> std::result::Result<Arc<StatesDescription>, D::Error>
where
    D: Deserializer<'de>,
{
    StatesDescription::deserialize(deserializer).map(StatesDescription::intern)
}

type CacheKey = (String, String, Option<String>);

static CACHE: Lazy<Mutex<HashMap<CacheKey, Arc<StatesDescription>>>> =
    Lazy::new(|| Mutex::new(HashMap::default()));

impl StatesDescription {
    ///
    /// Get the (shared) description of the alphabets.
    ///
    /// Two requests with the same alphabets return the same `Arc`.
    ///
    pub fn get(
        observed: &str,
        hidden: &str,
        complete: Option<&str>,
    ) -> Result<Arc<StatesDescription>> {
        let key = (
            observed.to_string(),
            hidden.to_string(),
            complete.map(|c| c.to_string()),
        );
        let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(states) = cache.get(&key) {
            return Ok(states.clone());
        }
        let states = Arc::new(StatesDescription::new(observed, hidden, complete)?);
        cache.insert(key, states.clone());
        Ok(states)
    }
    ///
    /// Re-intern a description, e.g. after it was deserialized.
    ///
    pub fn intern(self) -> Arc<StatesDescription> {
        let key = (
            self.observed.0.clone(),
            self.hidden.0.clone(),
            self.complete.as_ref().map(|c| c.0.clone()),
        );
        let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
        cache.entry(key).or_insert_with(|| Arc::new(self)).clone()
    }
    fn new(observed: &str, hidden: &str, complete: Option<&str>) -> Result<StatesDescription> {
        let observed = Alphabet::new(observed)?;
        let hidden = Alphabet::new(hidden)?;
        let complete = match complete {
            Some(c) => {
                let c = Alphabet::new(c)?;
                let expected = observed.len() * hidden.len();
                if c.len() != expected {
                    return Err(Error::AlphabetSize {
                        expected,
                        actual: c.len(),
                    });
                }
                Some(c)
            }
            None => None,
        };
        Ok(StatesDescription {
            observed,
            hidden,
            complete,
        })
    }
    pub fn observed(&self) -> &Alphabet {
        &self.observed
    }
    pub fn hidden(&self) -> &Alphabet {
        &self.hidden
    }
    pub fn complete(&self) -> Option<&Alphabet> {
        self.complete.as_ref()
    }
    pub fn n_observed(&self) -> usize {
        self.observed.len()
    }
    pub fn n_hidden(&self) -> usize {
        self.hidden.len()
    }
    ///
    /// Symbol printed for the complete state `(observed, hidden)`.
    ///
    /// Falls back to the observed symbol if no complete alphabet is given.
    ///
    pub fn complete_symbol(&self, observed: u8, hidden: u8) -> u8 {
        match &self.complete {
            Some(c) => c.symbol((observed as usize * self.n_hidden() + hidden as usize) as u8),
            None => self.observed.symbol(observed),
        }
    }
}

impl std::fmt::Display for StatesDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "observed={} hidden={}", self.observed, self.hidden)?;
        if let Some(c) = &self.complete {
            write!(f, " complete={}", c)?;
        }
        Ok(())
    }
}
