//! Shared row-decoding helpers for collectors.
//!
//! Catalog views and user queries return a mix of `bigint`, `integer`,
//! `double precision`, `boolean` and text columns; the exposition side
//! only knows `f64` samples and string labels. These helpers try the
//! concrete decodings in descending order of likelihood instead of
//! forcing query authors to cast every column.

use sqlx::Row;
use sqlx::postgres::PgRow;

/// Decodes a column as a metric sample.
///
/// `None` means the column held SQL NULL or a type with no numeric
/// reading; callers skip the sample rather than exporting a guess.
#[must_use]
pub fn column_as_f64(row: &PgRow, column: &str) -> Option<f64> {
    if let Ok(value) = row.try_get::<Option<f64>, _>(column) {
        return value;
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(column) {
        #[allow(clippy::cast_precision_loss)]
        return value.map(|v| v as f64);
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(column) {
        return value.map(f64::from);
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(column) {
        return value.map(f64::from);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(column) {
        return value.map(|v| if v { 1.0 } else { 0.0 });
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(column) {
        return value.and_then(|v| v.trim().parse().ok());
    }
    None
}

/// Decodes a column as a label value. NULL and non-text types fall
/// back through numeric and boolean readings; undecodable columns
/// become the empty string, matching how absent labels are exported.
#[must_use]
pub fn column_as_label(row: &PgRow, column: &str) -> String {
    if let Ok(Some(value)) = row.try_get::<Option<String>, _>(column) {
        return value;
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(column) {
        return value.to_string();
    }
    if let Ok(Some(value)) = row.try_get::<Option<f64>, _>(column) {
        return value.to_string();
    }
    if let Ok(Some(value)) = row.try_get::<Option<bool>, _>(column) {
        return value.to_string();
    }
    String::new()
}
