//! PostgreSQL `COPY ... FROM STDIN` text-format encoding.
//!
//! Fields are tab separated, rows end with `\n`, and NULL is written as the
//! empty string (the statement declares `NULL ''`).

use chrono::NaiveDateTime;

use super::models::{encode_message_refs, DigestMessageRecord, OccupancySample, Table};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A value that can be written as one line of a table's COPY stream.
pub trait CopyRow {
    const TABLE: Table;

    /// Field values in `TABLE.columns()` order; `None` is NULL.
    fn fields(&self) -> Vec<Option<String>>;
}

impl CopyRow for OccupancySample {
    const TABLE: Table = Table::OccupancySample;

    fn fields(&self) -> Vec<Option<String>> {
        vec![
            Some(format_ts(self.ts)),
            self.online.map(|v| v.to_string()),
            Some(self.gym_name.clone()),
        ]
    }
}

impl CopyRow for DigestMessageRecord {
    const TABLE: Table = Table::DigestMessageRecord;

    fn fields(&self) -> Vec<Option<String>> {
        vec![
            Some(format_ts(self.datetime)),
            Some(encode_message_refs(&self.chat_message_id)),
            Some(self.message.clone()),
        ]
    }
}

/// The `COPY` statement matching [`encode_rows`] output for `table`.
pub fn copy_statement(table: Table) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text, NULL '')",
        table.name(),
        table.columns().join(", ")
    )
}

pub fn encode_rows<R: CopyRow>(rows: &[R]) -> String {
    let mut out = String::new();
    for row in rows {
        let line = row
            .fields()
            .into_iter()
            .map(|f| f.map(|v| escape(&v)).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}
