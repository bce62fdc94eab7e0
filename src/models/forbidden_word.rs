use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel end date for words that never expire.
pub fn never_expires() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).expect("valid sentinel date")
}

/// A persisted forbidden word. A NULL group at any level means the word
/// applies to every value at that level.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForbiddenWord {
    pub forbidden_word_id: i64,
    pub word: String,
    pub company_code: Option<String>,
    pub lgroup: Option<String>,
    pub mgroup: Option<String>,
    pub sgroup: Option<String>,
    pub dgroup: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An incoming word from a synchronization file, before persistence.
#[derive(Debug, Clone)]
pub struct WordRecord {
    pub word: String,
    pub lgroup: Option<String>,
    pub mgroup: Option<String>,
    pub sgroup: Option<String>,
    pub dgroup: Option<String>,
    pub reason: Option<String>,
}

/// One record of an uploaded forbidden-word list file.
#[derive(Debug, Deserialize)]
pub struct WordRow {
    #[serde(rename = "WORD", default)]
    pub word: String,

    #[serde(rename = "LGROUP", default)]
    pub lgroup: String,

    #[serde(rename = "MGROUP", default)]
    pub mgroup: String,

    #[serde(rename = "SGROUP", default)]
    pub sgroup: String,

    #[serde(rename = "DGROUP", default)]
    pub dgroup: String,
}

impl WordRow {
    pub fn into_record(self) -> WordRecord {
        use crate::models::goods::blank_to_none;
        WordRecord {
            word: self.word.trim().to_string(),
            lgroup: blank_to_none(self.lgroup),
            mgroup: blank_to_none(self.mgroup),
            sgroup: blank_to_none(self.sgroup),
            dgroup: blank_to_none(self.dgroup),
            reason: None,
        }
    }
}

/// Category scope of a lookup. `None` at a level skips that level's
/// predicate entirely (an unscoped request matches words of any code).
#[derive(Debug, Clone, Default)]
pub struct ForbiddenWordFilter {
    pub lgroup: Option<String>,
    pub mgroup: Option<String>,
    pub sgroup: Option<String>,
    pub dgroup: Option<String>,
}
