//! `COPY INTO` bulk loads from a named stage.
//!
//! Grammar understood by the warehouse:
//!
//! ```text
//! COPY INTO <table>
//! FROM @<stage>/<file>
//! [FILE_FORMAT = (FORMAT_NAME = '<name>')]
//! [ON_ERROR = 'CONTINUE' | 'ABORT_STATEMENT' | 'SKIP_FILE']
//! [FORCE = TRUE | FALSE]
//! ```
//!
//! Rows are positional: each staged record must have exactly as many fields as the target table
//! has columns. A record that cannot be decoded or inserted is a row-level error and is handled
//! by the `ON_ERROR` policy. Everything else (unknown stage, missing file, missing table) fails
//! the statement.
//!
//! Loaded files are remembered per table by content fingerprint in [`LOAD_HISTORY_TABLE`];
//! re-copying the same contents loads nothing unless `FORCE = TRUE`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};

use crate::config::{FileFormat, OnError, PipelineConfig};
use crate::error::ExecutionCause;
use crate::types::{Row, Value};

use super::Deadline;

/// Warehouse table recording every file loaded by `COPY INTO`.
pub const LOAD_HISTORY_TABLE: &str = "_copy_load_history";

pub(crate) fn load_history_ddl() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {LOAD_HISTORY_TABLE} (
    table_name TEXT NOT NULL,
    file_name TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    rows_loaded INTEGER NOT NULL,
    errors_seen INTEGER NOT NULL,
    loaded_at TEXT NOT NULL
)"
    )
}

/// A file format resolved for reading: the delimiter is a single ASCII byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CsvOptions {
    delimiter: u8,
    skip_header: usize,
    empty_field_as_null: bool,
}

impl CsvOptions {
    fn resolve(name: &str, format: &FileFormat) -> Result<Self, ExecutionCause> {
        let delimiter = u8::try_from(format.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| ExecutionCause::InvalidFileFormat {
                name: name.to_string(),
                message: format!(
                    "delimiter '{}' is not a single ASCII character",
                    format.delimiter
                ),
            })?;
        Ok(Self {
            delimiter,
            skip_header: format.skip_header,
            empty_field_as_null: format.empty_field_as_null,
        })
    }
}

/// Named stages and file formats a session can resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCatalog {
    stages: HashMap<String, PathBuf>,
    formats: BTreeMap<String, FileFormat>,
}

impl StageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every stage and file format declared in `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut catalog = Self::new();
        for stage in &config.stages {
            catalog = catalog.with_stage(&stage.name, &stage.location);
        }
        for (name, format) in &config.file_formats {
            catalog = catalog.with_format(name, format.clone());
        }
        catalog
    }

    pub fn with_stage(mut self, name: &str, location: impl AsRef<Path>) -> Self {
        self.stages
            .insert(name.to_ascii_lowercase(), location.as_ref().to_path_buf());
        self
    }

    pub fn with_format(mut self, name: &str, format: FileFormat) -> Self {
        self.formats.insert(name.to_ascii_lowercase(), format);
        self
    }

    fn stage(&self, name: &str) -> Result<&Path, ExecutionCause> {
        self.stages
            .get(&name.to_ascii_lowercase())
            .map(PathBuf::as_path)
            .ok_or_else(|| ExecutionCause::UnknownStage {
                name: name.to_string(),
            })
    }

    fn format(&self, name: Option<&str>) -> Result<CsvOptions, ExecutionCause> {
        match name {
            None => CsvOptions::resolve("default", &FileFormat::default()),
            Some(name) => {
                let format = self.formats.get(&name.to_ascii_lowercase()).ok_or_else(|| {
                    ExecutionCause::UnknownFileFormat {
                        name: name.to_string(),
                    }
                })?;
                CsvOptions::resolve(name, format)
            }
        }
    }
}

/// A parsed `COPY INTO` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStatement {
    pub table: String,
    pub stage: String,
    pub file: String,
    pub file_format: Option<String>,
    pub on_error: OnError,
    pub force: bool,
}

impl CopyStatement {
    /// Returns `Ok(None)` when `sql` is not a COPY statement at all.
    pub fn parse(sql: &str) -> Result<Option<Self>, ExecutionCause> {
        let is_copy = sql
            .split_whitespace()
            .next()
            .is_some_and(|w| w.eq_ignore_ascii_case("COPY"));
        if !is_copy {
            return Ok(None);
        }
        let mut p = Parser {
            tokens: tokenize(sql)?,
            pos: 0,
        };
        p.expect_keyword("COPY")?;
        p.expect_keyword("INTO")?;
        let table = p.expect_word("target table")?;
        p.expect_keyword("FROM")?;
        let (stage, file) = match p.next() {
            Some(Token::StageRef(r)) => split_stage_ref(&r)?,
            other => {
                return Err(syntax(format!(
                    "expected @stage/file after FROM, found {other:?}"
                )));
            }
        };

        let mut stmt = Self {
            table,
            stage,
            file,
            file_format: None,
            on_error: OnError::AbortStatement,
            force: false,
        };

        while let Some(token) = p.next() {
            let option = match token {
                Token::Word(w) => w,
                other => return Err(syntax(format!("unexpected {other:?}"))),
            };
            p.expect(Token::Eq)?;
            match option.to_ascii_uppercase().as_str() {
                "FILE_FORMAT" => {
                    p.expect(Token::LParen)?;
                    p.expect_keyword("FORMAT_NAME")?;
                    p.expect(Token::Eq)?;
                    stmt.file_format = Some(p.expect_value("format name")?);
                    p.expect(Token::RParen)?;
                }
                "ON_ERROR" => {
                    let raw = p.expect_value("ON_ERROR policy")?;
                    stmt.on_error = OnError::from_keyword(&raw)
                        .ok_or_else(|| syntax(format!("unknown ON_ERROR policy '{raw}'")))?;
                }
                "FORCE" => {
                    let raw = p.expect_value("FORCE flag")?;
                    stmt.force = match raw.to_ascii_uppercase().as_str() {
                        "TRUE" => true,
                        "FALSE" => false,
                        _ => {
                            return Err(syntax(format!(
                                "FORCE expects TRUE or FALSE, found '{raw}'"
                            )));
                        }
                    };
                }
                other => return Err(syntax(format!("unknown copy option '{other}'"))),
            }
        }
        Ok(Some(stmt))
    }
}

impl fmt::Display for CopyStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COPY INTO {}\nFROM @{}/{}", self.table, self.stage, self.file)?;
        if let Some(name) = &self.file_format {
            write!(f, "\nFILE_FORMAT = (FORMAT_NAME = '{name}')")?;
        }
        write!(f, "\nON_ERROR = '{}'", self.on_error.keyword())?;
        if self.force {
            f.write_str("\nFORCE = TRUE")?;
        }
        Ok(())
    }
}

/// Per-file load status, reported in the COPY result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    PartiallyLoaded,
    LoadFailed,
    /// The same file contents were already loaded into this table.
    LoadSkipped,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "LOADED",
            Self::PartiallyLoaded => "PARTIALLY_LOADED",
            Self::LoadFailed => "LOAD_FAILED",
            Self::LoadSkipped => "LOAD_SKIPPED",
        }
    }
}

/// Result of one COPY statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub file: String,
    pub status: LoadStatus,
    pub rows_parsed: u64,
    pub rows_loaded: u64,
    pub errors_seen: u64,
    pub first_error: Option<String>,
}

/// Column names of the COPY result set.
pub const COPY_RESULT_COLUMNS: [&str; 6] = [
    "file",
    "status",
    "rows_parsed",
    "rows_loaded",
    "errors_seen",
    "first_error",
];

impl CopyOutcome {
    /// Render as the single result row returned to the caller.
    pub fn into_row(self) -> Row {
        vec![
            Value::Utf8(self.file),
            Value::Utf8(self.status.as_str().to_string()),
            Value::Int64(to_i64(self.rows_parsed)),
            Value::Int64(to_i64(self.rows_loaded)),
            Value::Int64(to_i64(self.errors_seen)),
            self.first_error.map_or(Value::Null, Value::Utf8),
        ]
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Run a COPY statement inside a single transaction on `conn`.
pub(crate) fn execute_copy(
    conn: &mut Connection,
    stmt: &CopyStatement,
    catalog: &StageCatalog,
    deadline: Option<Deadline>,
) -> Result<CopyOutcome, ExecutionCause> {
    let path = catalog.stage(&stmt.stage)?.join(&stmt.file);
    let format = catalog.format(stmt.file_format.as_deref())?;
    let width = table_width(conn, &stmt.table)?;

    let bytes = std::fs::read(&path).map_err(|source| ExecutionCause::Io {
        path: path.clone(),
        source,
    })?;
    let fingerprint = format!("{:x}", Sha256::digest(&bytes));
    let file_label = format!("{}/{}", stmt.stage, stmt.file);

    if !stmt.force && already_loaded(conn, &stmt.table, &file_label, &fingerprint)? {
        return Ok(CopyOutcome {
            file: file_label,
            status: LoadStatus::LoadSkipped,
            rows_parsed: 0,
            rows_loaded: 0,
            errors_seen: 0,
            first_error: None,
        });
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(format.delimiter)
        .from_reader(bytes.as_slice());

    let tx = conn.transaction()?;
    let mut rows_parsed = 0u64;
    let mut rows_loaded = 0u64;
    let mut errors_seen = 0u64;
    let mut first_error: Option<String> = None;
    {
        let placeholders = (1..=width).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} VALUES ({placeholders})",
            stmt.table
        ))?;

        for (idx, result) in rdr.records().enumerate() {
            if idx < format.skip_header {
                continue;
            }
            if let Some(d) = deadline {
                d.check()?;
            }
            rows_parsed += 1;

            let outcome = match result {
                Err(e) => Err((e.position().map_or(0, |p| p.line()), e.to_string())),
                Ok(record) => {
                    let line = record.position().map_or(0, |p| p.line());
                    if record.len() != width {
                        Err((
                            line,
                            format!(
                                "number of columns in file ({}) does not match that of the corresponding table ({width})",
                                record.len()
                            ),
                        ))
                    } else {
                        let values = record.iter().map(|field| {
                            (!(format.empty_field_as_null && field.is_empty())).then_some(field)
                        });
                        insert
                            .execute(rusqlite::params_from_iter(values))
                            .map(|_| ())
                            .map_err(|e| (line, e.to_string()))
                    }
                }
            };

            match outcome {
                Ok(()) => rows_loaded += 1,
                Err((line, message)) => {
                    if stmt.on_error == OnError::AbortStatement {
                        return Err(ExecutionCause::MalformedRow {
                            file: file_label,
                            line,
                            message,
                        });
                    }
                    errors_seen += 1;
                    first_error.get_or_insert_with(|| format!("line {line}: {message}"));
                }
            }
        }
    }

    let status = match (stmt.on_error, errors_seen, rows_loaded) {
        (_, 0, _) => LoadStatus::Loaded,
        (OnError::SkipFile, _, _) | (_, _, 0) => LoadStatus::LoadFailed,
        _ => LoadStatus::PartiallyLoaded,
    };

    if status == LoadStatus::LoadFailed {
        tx.rollback()?;
        rows_loaded = 0;
    } else {
        tx.execute(
            &format!(
                "INSERT INTO {LOAD_HISTORY_TABLE}
                     (table_name, file_name, fingerprint, rows_loaded, errors_seen, loaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                stmt.table.to_ascii_lowercase(),
                file_label,
                fingerprint,
                to_i64(rows_loaded),
                to_i64(errors_seen),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
    }

    Ok(CopyOutcome {
        file: file_label,
        status,
        rows_parsed,
        rows_loaded,
        errors_seen,
        first_error,
    })
}

/// Column count of `table`; fails with the engine's own "no such table" error.
fn table_width(conn: &Connection, table: &str) -> Result<usize, ExecutionCause> {
    let probe = conn.prepare(&format!("SELECT * FROM {table} LIMIT 0"))?;
    Ok(probe.column_count())
}

fn already_loaded(
    conn: &Connection,
    table: &str,
    file: &str,
    fingerprint: &str,
) -> Result<bool, ExecutionCause> {
    let hit = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {LOAD_HISTORY_TABLE}
                 WHERE table_name = ?1 AND file_name = ?2 AND fingerprint = ?3
                 LIMIT 1"
            ),
            params![table.to_ascii_lowercase(), file, fingerprint],
            |_| Ok(()),
        )
        .optional()?;
    Ok(hit.is_some())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    StageRef(String),
    Eq,
    LParen,
    RParen,
}

fn tokenize(sql: &str) -> Result<Vec<Token>, ExecutionCause> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() || c == ';' => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            s.push('\'');
                        }
                        Some('\'') => break,
                        Some(ch) => s.push(ch),
                        None => return Err(syntax("unterminated string literal")),
                    }
                }
                tokens.push(Token::Quoted(s));
            }
            '@' => {
                chars.next();
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == ';' {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                tokens.push(Token::StageRef(s));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' || c == '"' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if !(ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '"') {
                        break;
                    }
                    s.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(s));
            }
            other => return Err(syntax(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ExecutionCause> {
        if self.peek_keyword(kw) {
            self.pos += 1;
            Ok(())
        } else {
            Err(syntax(format!(
                "expected {kw}, found {:?}",
                self.tokens.get(self.pos)
            )))
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), ExecutionCause> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(syntax(format!("expected {token:?}, found {other:?}"))),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String, ExecutionCause> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(syntax(format!("expected {what}, found {other:?}"))),
        }
    }

    /// A quoted literal or a bare word.
    fn expect_value(&mut self, what: &str) -> Result<String, ExecutionCause> {
        match self.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => Ok(w),
            other => Err(syntax(format!("expected {what}, found {other:?}"))),
        }
    }
}

/// Split `stage/path/to/file`; the file path must stay inside the stage.
fn split_stage_ref(r: &str) -> Result<(String, String), ExecutionCause> {
    match r.split_once('/') {
        Some((stage, file)) if !stage.is_empty() && !file.is_empty() => {
            let inside = Path::new(file)
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
            if !inside {
                return Err(syntax(format!(
                    "staged file '{file}' must be a relative path inside '@{stage}'"
                )));
            }
            Ok((stage.to_string(), file.to_string()))
        }
        _ => Err(syntax(format!("COPY source '@{r}' must name a staged file"))),
    }
}

fn syntax(message: impl Into<String>) -> ExecutionCause {
    ExecutionCause::CopySyntax {
        message: message.into(),
    }
}
