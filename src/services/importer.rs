use serde::de::DeserializeOwned;
use sqlx::PgPool;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::db::{batch_queries, forbidden_word_queries};
use crate::models::batch::NewBatchRequest;
use crate::models::forbidden_word::WordRow;
use crate::models::goods::{blank_to_none, GoodsRow};

/// Which pipeline a discovered archive feeds, decided by its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveRole {
    Goods,
    ForbiddenWords,
}

impl ArchiveRole {
    /// Recognize an archive by the role token in its object key.
    /// Keys matching neither token are skipped upstream without error.
    pub fn from_key(key: &str) -> Option<Self> {
        if key.contains("harmfulword_") {
            Some(Self::ForbiddenWords)
        } else if key.contains("goods_ai_inspection_") {
            Some(Self::Goods)
        } else {
            None
        }
    }
}

/// Scratch directory for one archive. Removed on every exit path; a failed
/// removal is logged and swallowed so cleanup can never fail an import.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(data_dir: &Path, job_id: &str) -> Result<Self, ImportError> {
        let path = data_dir.join("batch").join(job_id);
        fs::create_dir_all(&path).map_err(ImportError::Io)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

/// Import one downloaded archive: unpack, locate the record file, parse it,
/// and either queue inspection requests or synchronize the forbidden-word
/// list. Returns the number of data rows handled; an empty record file is a
/// legitimate daily state, not an error.
pub async fn import_archive(
    pool: &PgPool,
    data_dir: &Path,
    data: &[u8],
    object_key: &str,
) -> Result<usize, ImportError> {
    let role =
        ArchiveRole::from_key(object_key).ok_or_else(|| ImportError::UnrecognizedArchive {
            key: object_key.to_string(),
        })?;

    let batch_job_id = Uuid::new_v4().to_string();
    tracing::info!(key = %object_key, batch_job_id = %batch_job_id, "Importing archive");

    let scratch = ScratchDir::create(data_dir, &batch_job_id)?;
    unpack_zip(data, scratch.path())?;

    let record_file = find_record_file(scratch.path())?;
    let bytes = fs::read(&record_file).map_err(ImportError::Io)?;

    let imported = match role {
        ArchiveRole::Goods => {
            let rows: Vec<GoodsRow> = parse_tsv(&bytes)?;
            if rows.is_empty() {
                tracing::warn!(key = %object_key, "Record file contained no data rows");
                return Ok(0);
            }
            let requests: Vec<NewBatchRequest> =
                rows.into_iter().map(new_request_from_row).collect();
            batch_queries::insert_requests(pool, &batch_job_id, &requests).await?;
            requests.len()
        }
        ArchiveRole::ForbiddenWords => {
            let rows: Vec<WordRow> = parse_tsv(&bytes)?;
            if rows.is_empty() {
                tracing::warn!(key = %object_key, "Word list file contained no data rows");
                return Ok(0);
            }
            let records: Vec<_> = rows.into_iter().map(WordRow::into_record).collect();
            forbidden_word_queries::sync_all(pool, &records).await?;
            records.len()
        }
    };

    tracing::info!(key = %object_key, imported, "Archive import complete");
    Ok(imported)
}

/// Unpack a ZIP into `target`, refusing entries that would escape it.
fn unpack_zip(data: &[u8], target: &Path) -> Result<(), ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ImportError::UnsafePath {
                entry: entry.name().to_string(),
            })?;
        let destination = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&destination).map_err(ImportError::Io)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(ImportError::Io)?;
            }
            let mut out = fs::File::create(&destination).map_err(ImportError::Io)?;
            std::io::copy(&mut entry, &mut out).map_err(ImportError::Io)?;
        }
    }

    Ok(())
}

/// The one tab-separated record file inside the unpacked archive.
fn find_record_file(dir: &Path) -> Result<PathBuf, ImportError> {
    let entries = fs::read_dir(dir).map_err(ImportError::Io)?;
    for entry in entries {
        let path = entry.map_err(ImportError::Io)?.path();
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("tsv")) {
            return Ok(path);
        }
    }
    Err(ImportError::MissingRecordFile {
        dir: dir.display().to_string(),
    })
}

/// Parse a tab-separated record file with a header row. An optional UTF-8
/// byte-order-mark is stripped; unknown columns are ignored and missing
/// recognized columns fall back to serde defaults.
fn parse_tsv<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, ImportError> {
    let body = bytes
        .strip_prefix(&[0xEF, 0xBB, 0xBF][..])
        .unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(body);

    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(ImportError::Parse)
}

fn new_request_from_row(row: GoodsRow) -> NewBatchRequest {
    let sale_price = parse_price(&row.sale_price, "sale_price", &row.goods_name);
    let buy_price = parse_price(&row.buy_price, "buy_price", &row.goods_name);

    NewBatchRequest {
        goods_code: row.goods_code,
        goods_name: row.goods_name,
        mobile_goods_name: row.mobile_goods_name,
        sale_price,
        buy_price,
        goods_info: row.goods_info,
        image_html: row.image_html,
        representative_file: row.representative_file,
        lgroup: blank_to_none(row.lgroup),
        lgroup_name: blank_to_none(row.lgroup_name),
        mgroup: blank_to_none(row.mgroup),
        mgroup_name: blank_to_none(row.mgroup_name),
        sgroup: blank_to_none(row.sgroup),
        sgroup_name: blank_to_none(row.sgroup_name),
        dgroup: blank_to_none(row.dgroup),
        dgroup_name: blank_to_none(row.dgroup_name),
    }
}

/// Export prices arrive as text; anything unparseable becomes zero rather
/// than failing the whole file.
fn parse_price(raw: &str, field: &str, goods_name: &str) -> i64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0;
    }
    match trimmed.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(field, goods_name, raw, "Price failed to parse, defaulting to 0");
            0
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("archive key matches no recognized role: {key}")]
    UnrecognizedArchive { key: String },

    #[error("ZIP entry escapes the scratch directory: {entry}")]
    UnsafePath { entry: String },

    #[error("ZIP extraction failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("no record file found in {dir}")]
    MissingRecordFile { dir: String },

    #[error("record file parse failed: {0}")]
    Parse(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn role_is_decided_by_filename_token() {
        assert_eq!(
            ArchiveRole::from_key("batch/harmfulword_20250926.zip"),
            Some(ArchiveRole::ForbiddenWords)
        );
        assert_eq!(
            ArchiveRole::from_key("batch/goods_ai_inspection_20250926.zip"),
            Some(ArchiveRole::Goods)
        );
        assert_eq!(ArchiveRole::from_key("batch/readme_20250926.zip"), None);
    }

    #[test]
    fn unpack_rejects_path_traversal_entries() {
        let data = zip_with(&[("../evil.tsv", "GOODS_CODE\nX")]);
        let dir = std::env::temp_dir().join(format!("unzip-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let result = unpack_zip(&data, &dir);
        assert!(matches!(result, Err(ImportError::UnsafePath { .. })));
        assert!(!dir.parent().unwrap().join("evil.tsv").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unpack_extracts_nested_entries() {
        let data = zip_with(&[("inner/export.tsv", "GOODS_CODE\tGOODS_NAME\nG1\tname")]);
        let dir = std::env::temp_dir().join(format!("unzip-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        unpack_zip(&data, &dir).unwrap();
        assert!(dir.join("inner/export.tsv").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn tsv_rows_map_by_header_name() {
        let tsv = "GOODS_CODE\tGOODS_NAME\tSALE_PRICE\tUNKNOWN_COLUMN\n\
                   G001\t사과 3kg\t12000\tignored\n";
        let rows: Vec<GoodsRow> = parse_tsv(tsv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].goods_code, "G001");
        assert_eq!(rows[0].goods_name, "사과 3kg");
        assert_eq!(rows[0].sale_price, "12000");
        // missing recognized columns default to empty
        assert_eq!(rows[0].mobile_goods_name, "");
    }

    #[test]
    fn tsv_parser_strips_byte_order_mark() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"WORD\tLGROUP\n\xEB\x8B\xB4\xEB\xB0\xB0\t10\n");
        let rows: Vec<WordRow> = parse_tsv(&bytes).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].word, "담배");
        assert_eq!(rows[0].lgroup, "10");
    }

    #[test]
    fn empty_record_file_parses_to_no_rows() {
        let rows: Vec<GoodsRow> = parse_tsv(b"GOODS_CODE\tGOODS_NAME\n").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn bad_prices_default_to_zero() {
        assert_eq!(parse_price("12000", "sale_price", "g"), 12000);
        assert_eq!(parse_price("", "sale_price", "g"), 0);
        assert_eq!(parse_price("12,000원", "sale_price", "g"), 0);
    }

    #[test]
    fn goods_row_conversion_nulls_blank_groups() {
        let tsv = "GOODS_CODE\tLGROUP\tMGROUP\nG1\t10\t\n";
        let rows: Vec<GoodsRow> = parse_tsv(tsv.as_bytes()).unwrap();
        let request = new_request_from_row(rows.into_iter().next().unwrap());
        assert_eq!(request.lgroup.as_deref(), Some("10"));
        assert_eq!(request.mgroup, None);
    }
}
