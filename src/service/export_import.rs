use crate::domain::transaction::{ExternalTransaction, TransactionType};
use crate::service::reconciliation::RowError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const UID_COLUMNS: &[&str] = &["transaction_uid", "uid"];
const TYPE_COLUMNS: &[&str] = &["type", "transaction_type"];
const AMOUNT_COLUMNS: &[&str] = &["amount"];
const CURRENCY_COLUMNS: &[&str] = &["currency"];
const CREATED_COLUMNS: &[&str] = &["created_at", "date"];
const UPDATED_COLUMNS: &[&str] = &["updated_at"];
const REFERENCE_COLUMNS: &[&str] = &["payment_id", "payment_reference", "more_info", "reference"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export is missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("malformed export: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Default)]
pub struct ParsedExport {
    pub transactions: Vec<ExternalTransaction>,
    pub row_errors: Vec<RowError>,
}

struct Columns {
    uid: usize,
    kind: usize,
    created_at: usize,
    amount: Option<usize>,
    currency: Option<usize>,
    updated_at: Option<usize>,
    reference: Option<usize>,
}

fn find(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let h = h.trim().trim_start_matches('\u{feff}');
        aliases.iter().any(|a| h.eq_ignore_ascii_case(a))
    })
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, ExportError> {
        Ok(Self {
            uid: find(headers, UID_COLUMNS).ok_or(ExportError::MissingColumn("transaction_uid"))?,
            kind: find(headers, TYPE_COLUMNS).ok_or(ExportError::MissingColumn("type"))?,
            created_at: find(headers, CREATED_COLUMNS).ok_or(ExportError::MissingColumn("created_at"))?,
            amount: find(headers, AMOUNT_COLUMNS),
            currency: find(headers, CURRENCY_COLUMNS),
            updated_at: find(headers, UPDATED_COLUMNS),
            reference: find(headers, REFERENCE_COLUMNS),
        })
    }
}

/// Parses a gateway transaction export. Header problems reject the whole file;
/// a bad row only rejects that row.
pub fn parse_transaction_export(input: &str) -> Result<ParsedExport, ExportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input.as_bytes());
    let columns = Columns::resolve(reader.headers()?)?;

    let mut out = ParsedExport::default();
    for (index, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                out.row_errors
                    .push(RowError::new(None, None, format!("line {line}: {e}")));
                continue;
            }
        };
        match parse_row(&record, &columns) {
            Ok(tx) => out.transactions.push(tx),
            Err(message) => {
                let cell = |i: Option<usize>| {
                    i.and_then(|i| record.get(i))
                        .filter(|s| !s.is_empty())
                };
                out.row_errors.push(RowError::new(
                    cell(columns.reference),
                    cell(Some(columns.uid)),
                    format!("line {line}: {message}"),
                ));
            }
        }
    }

    tracing::debug!(
        transactions = out.transactions.len(),
        row_errors = out.row_errors.len(),
        "transaction export parsed"
    );
    Ok(out)
}

fn parse_row(record: &csv::StringRecord, columns: &Columns) -> Result<ExternalTransaction, String> {
    let get = |i: usize| record.get(i).unwrap_or("");
    let opt = |i: Option<usize>| i.map(get).filter(|s| !s.is_empty());

    let uid = get(columns.uid);
    if uid.is_empty() {
        return Err("missing transaction uid".to_string());
    }
    let created_at = parse_timestamp(get(columns.created_at))
        .ok_or_else(|| format!("unreadable timestamp `{}`", get(columns.created_at)))?;
    let updated_at = match opt(columns.updated_at) {
        Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| format!("unreadable timestamp `{raw}`"))?),
        None => None,
    };
    let amount_minor = match opt(columns.amount) {
        Some(raw) => parse_amount_minor(raw).ok_or_else(|| format!("unreadable amount `{raw}`"))?,
        None => 0,
    };

    Ok(ExternalTransaction {
        transaction_uid: uid.to_string(),
        transaction_type: TransactionType::parse(get(columns.kind)),
        amount_minor,
        currency: opt(columns.currency).unwrap_or_default().to_ascii_uppercase(),
        created_at,
        updated_at,
        payment_reference: opt(columns.reference).map(str::to_string),
    })
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Major-unit decimal ("80", "80.5", "1,080.00") to minor units.
pub fn parse_amount_minor(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<2}").parse().ok()?
    };
    let minor = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -minor } else { minor })
}
