//! Input validation
//!
//! Surfaces malformed input (missing columns, unparseable dates and
//! amounts, duplicate primary keys) before analysis ever starts. Structural
//! problems that are well-formed but unusable (negative MRR, void invoices,
//! end-before-start subscriptions) are NOT errors here; they become
//! exclusions during the run.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ingest::{RawRow, RawTable};
use crate::models::{
    AccountRow, CreditNoteRow, CustomerRow, InvoiceRow, InvoiceStatus, PaymentRow, RampStep,
    SubscriptionRow, TableKind,
};

/// Validation stops collecting after this many errors
const MAX_ERRORS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub file: String,
    pub row: usize,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(file: &str, row: usize, field: &str, message: String) -> Self {
        Self {
            file: file.to_string(),
            row,
            field: field.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn field<'a>(row: &'a RawRow, name: &str) -> &'a str {
    row.get(name).map(|s| s.as_str()).unwrap_or("")
}

fn opt_field(row: &RawRow, name: &str) -> Option<String> {
    let v = field(row, name);
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

// ========== Typed row parsers ==========
//
// Shared between validation (issue collection) and ingestion (rows that
// already passed validation). Each returns None when the row cannot be
// typed and pushes the reasons onto `issues`.

pub(crate) fn parse_account(
    row: &RawRow,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<AccountRow> {
    let account_id = opt_field(row, "account_id");
    let account_name = opt_field(row, "account_name");
    if account_id.is_none() || account_name.is_none() {
        for (name, value) in [("account_id", &account_id), ("account_name", &account_name)] {
            if value.is_none() {
                issues.push(ValidationIssue::new(
                    "accounts",
                    rownum,
                    name,
                    format!("Missing required field: {}", name),
                ));
            }
        }
        return None;
    }
    Some(AccountRow {
        account_id: account_id.unwrap(),
        account_name: account_name.unwrap(),
        email_domain: opt_field(row, "email_domain").map(|d| d.to_lowercase()),
    })
}

pub(crate) fn parse_customer(
    row: &RawRow,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<CustomerRow> {
    let customer_id = opt_field(row, "customer_id");
    let customer_name = opt_field(row, "customer_name");
    if customer_id.is_none() || customer_name.is_none() {
        for (name, value) in [("customer_id", &customer_id), ("customer_name", &customer_name)] {
            if value.is_none() {
                issues.push(ValidationIssue::new(
                    "customers",
                    rownum,
                    name,
                    format!("Missing required field: {}", name),
                ));
            }
        }
        return None;
    }
    Some(CustomerRow {
        customer_id: customer_id.unwrap(),
        customer_name: customer_name.unwrap(),
        email_domain: opt_field(row, "email_domain").map(|d| d.to_lowercase()),
    })
}

fn parse_ramp_schedule(
    raw: &str,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Vec<RampStep>> {
    #[derive(Deserialize)]
    struct RawStep {
        effective_date: String,
        mrr: f64,
    }

    let steps: Vec<RawStep> = match serde_json::from_str(raw) {
        Ok(steps) => steps,
        Err(_) => {
            issues.push(ValidationIssue::new(
                "subscriptions",
                rownum,
                "ramp_schedule",
                "Invalid ramp_schedule. Expected a JSON array of {effective_date, mrr}".to_string(),
            ));
            return None;
        }
    };

    let mut parsed = Vec::with_capacity(steps.len());
    for step in steps {
        match parse_date(&step.effective_date) {
            Some(effective_date) => parsed.push(RampStep {
                effective_date,
                mrr: step.mrr,
            }),
            None => {
                issues.push(ValidationIssue::new(
                    "subscriptions",
                    rownum,
                    "ramp_schedule",
                    format!(
                        "Invalid ramp step date '{}'. Use YYYY-MM-DD",
                        step.effective_date
                    ),
                ));
                return None;
            }
        }
    }
    Some(parsed)
}

pub(crate) fn parse_subscription(
    row: &RawRow,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<SubscriptionRow> {
    let before = issues.len();

    let subscription_id = opt_field(row, "subscription_id");
    let account_id = opt_field(row, "account_id");
    for (name, value) in [
        ("subscription_id", &subscription_id),
        ("account_id", &account_id),
    ] {
        if value.is_none() {
            issues.push(ValidationIssue::new(
                "subscriptions",
                rownum,
                name,
                format!("Missing required field: {}", name),
            ));
        }
    }

    let start_raw = field(row, "start_date");
    let start_date = parse_date(start_raw);
    if start_raw.is_empty() {
        issues.push(ValidationIssue::new(
            "subscriptions",
            rownum,
            "start_date",
            "Missing required field: start_date".to_string(),
        ));
    } else if start_date.is_none() {
        issues.push(ValidationIssue::new(
            "subscriptions",
            rownum,
            "start_date",
            "Invalid date format. Use YYYY-MM-DD".to_string(),
        ));
    }

    let end_raw = field(row, "end_date");
    let end_date = if end_raw.is_empty() {
        None
    } else {
        match parse_date(end_raw) {
            Some(d) => Some(d),
            None => {
                issues.push(ValidationIssue::new(
                    "subscriptions",
                    rownum,
                    "end_date",
                    "Invalid date format. Use YYYY-MM-DD".to_string(),
                ));
                None
            }
        }
    };

    let mrr_raw = field(row, "mrr");
    let mrr = mrr_raw.parse::<f64>();
    if mrr_raw.is_empty() {
        issues.push(ValidationIssue::new(
            "subscriptions",
            rownum,
            "mrr",
            "Missing required field: mrr".to_string(),
        ));
    } else if mrr.is_err() {
        issues.push(ValidationIssue::new(
            "subscriptions",
            rownum,
            "mrr",
            "Invalid amount format".to_string(),
        ));
    }

    let ramp_raw = field(row, "ramp_schedule");
    let ramp_schedule = if ramp_raw.is_empty() {
        Vec::new()
    } else {
        parse_ramp_schedule(ramp_raw, rownum, issues).unwrap_or_default()
    };

    if issues.len() > before {
        return None;
    }
    Some(SubscriptionRow {
        subscription_id: subscription_id.unwrap(),
        account_id: account_id.unwrap(),
        start_date: start_date.unwrap(),
        end_date,
        mrr: mrr.unwrap(),
        ramp_schedule,
    })
}

pub(crate) fn parse_invoice(
    row: &RawRow,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<InvoiceRow> {
    let before = issues.len();

    let invoice_id = opt_field(row, "invoice_id");
    let customer_id = opt_field(row, "customer_id");
    for (name, value) in [("invoice_id", &invoice_id), ("customer_id", &customer_id)] {
        if value.is_none() {
            issues.push(ValidationIssue::new(
                "invoices",
                rownum,
                name,
                format!("Missing required field: {}", name),
            ));
        }
    }

    let mut dates = [None, None, None];
    for (i, name) in ["invoice_date", "period_start", "period_end"].iter().enumerate() {
        let raw = field(row, name);
        if raw.is_empty() {
            issues.push(ValidationIssue::new(
                "invoices",
                rownum,
                name,
                format!("Missing required field: {}", name),
            ));
        } else {
            match parse_date(raw) {
                Some(d) => dates[i] = Some(d),
                None => issues.push(ValidationIssue::new(
                    "invoices",
                    rownum,
                    name,
                    "Invalid date format. Use YYYY-MM-DD".to_string(),
                )),
            }
        }
    }
    if let (Some(ps), Some(pe)) = (dates[1], dates[2]) {
        if pe < ps {
            issues.push(ValidationIssue::new(
                "invoices",
                rownum,
                "period_end",
                "period_end must be on or after period_start".to_string(),
            ));
        }
    }

    let amount_raw = field(row, "amount");
    let amount = amount_raw.parse::<f64>();
    match &amount {
        _ if amount_raw.is_empty() => issues.push(ValidationIssue::new(
            "invoices",
            rownum,
            "amount",
            "Missing required field: amount".to_string(),
        )),
        Err(_) => issues.push(ValidationIssue::new(
            "invoices",
            rownum,
            "amount",
            "Invalid amount format".to_string(),
        )),
        Ok(a) if *a <= 0.0 => issues.push(ValidationIssue::new(
            "invoices",
            rownum,
            "amount",
            "Invoice amount must be a positive number".to_string(),
        )),
        Ok(_) => {}
    }

    let status_raw = field(row, "status");
    let status = status_raw.parse::<InvoiceStatus>();
    if status_raw.is_empty() {
        issues.push(ValidationIssue::new(
            "invoices",
            rownum,
            "status",
            "Missing required field: status".to_string(),
        ));
    } else if let Err(e) = &status {
        issues.push(ValidationIssue::new("invoices", rownum, "status", e.clone()));
    }

    if issues.len() > before {
        return None;
    }
    Some(InvoiceRow {
        invoice_id: invoice_id.unwrap(),
        customer_id: customer_id.unwrap(),
        subscription_id: opt_field(row, "subscription_id"),
        invoice_date: dates[0].unwrap(),
        period_start: dates[1].unwrap(),
        period_end: dates[2].unwrap(),
        amount: amount.unwrap(),
        status: status.unwrap(),
    })
}

pub(crate) fn parse_payment(
    row: &RawRow,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<PaymentRow> {
    let before = issues.len();

    let payment_id = opt_field(row, "payment_id");
    let invoice_id = opt_field(row, "invoice_id");
    for (name, value) in [("payment_id", &payment_id), ("invoice_id", &invoice_id)] {
        if value.is_none() {
            issues.push(ValidationIssue::new(
                "payments",
                rownum,
                name,
                format!("Missing required field: {}", name),
            ));
        }
    }

    let date_raw = field(row, "payment_date");
    let payment_date = parse_date(date_raw);
    if date_raw.is_empty() {
        issues.push(ValidationIssue::new(
            "payments",
            rownum,
            "payment_date",
            "Missing required field: payment_date".to_string(),
        ));
    } else if payment_date.is_none() {
        issues.push(ValidationIssue::new(
            "payments",
            rownum,
            "payment_date",
            "Invalid date format. Use YYYY-MM-DD".to_string(),
        ));
    }

    let amount_raw = field(row, "amount");
    let amount = amount_raw.parse::<f64>();
    match &amount {
        _ if amount_raw.is_empty() => issues.push(ValidationIssue::new(
            "payments",
            rownum,
            "amount",
            "Missing required field: amount".to_string(),
        )),
        Err(_) => issues.push(ValidationIssue::new(
            "payments",
            rownum,
            "amount",
            "Invalid amount format".to_string(),
        )),
        Ok(a) if *a < 0.0 => issues.push(ValidationIssue::new(
            "payments",
            rownum,
            "amount",
            "Payment amount must not be negative".to_string(),
        )),
        Ok(_) => {}
    }

    if issues.len() > before {
        return None;
    }
    Some(PaymentRow {
        payment_id: payment_id.unwrap(),
        invoice_id: invoice_id.unwrap(),
        payment_date: payment_date.unwrap(),
        amount: amount.unwrap(),
    })
}

pub(crate) fn parse_credit_note(
    row: &RawRow,
    rownum: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<CreditNoteRow> {
    let before = issues.len();

    let credit_note_id = opt_field(row, "credit_note_id");
    let customer_id = opt_field(row, "customer_id");
    for (name, value) in [
        ("credit_note_id", &credit_note_id),
        ("customer_id", &customer_id),
    ] {
        if value.is_none() {
            issues.push(ValidationIssue::new(
                "credit_notes",
                rownum,
                name,
                format!("Missing required field: {}", name),
            ));
        }
    }

    let date_raw = field(row, "credit_date");
    let credit_date = parse_date(date_raw);
    if date_raw.is_empty() {
        issues.push(ValidationIssue::new(
            "credit_notes",
            rownum,
            "credit_date",
            "Missing required field: credit_date".to_string(),
        ));
    } else if credit_date.is_none() {
        issues.push(ValidationIssue::new(
            "credit_notes",
            rownum,
            "credit_date",
            "Invalid date format. Use YYYY-MM-DD".to_string(),
        ));
    }

    let amount_raw = field(row, "amount");
    let amount = amount_raw.parse::<f64>();
    match &amount {
        _ if amount_raw.is_empty() => issues.push(ValidationIssue::new(
            "credit_notes",
            rownum,
            "amount",
            "Missing required field: amount".to_string(),
        )),
        Err(_) => issues.push(ValidationIssue::new(
            "credit_notes",
            rownum,
            "amount",
            "Invalid amount format".to_string(),
        )),
        Ok(a) if *a <= 0.0 => issues.push(ValidationIssue::new(
            "credit_notes",
            rownum,
            "amount",
            "Credit note amount must be a positive number".to_string(),
        )),
        Ok(_) => {}
    }

    if issues.len() > before {
        return None;
    }
    Some(CreditNoteRow {
        credit_note_id: credit_note_id.unwrap(),
        customer_id: customer_id.unwrap(),
        invoice_id: opt_field(row, "invoice_id"),
        credit_date: credit_date.unwrap(),
        amount: amount.unwrap(),
        reason: field(row, "reason").to_string(),
    })
}

// ========== Table-level validation ==========

/// Validate one table: headers, per-row typing, duplicate primary keys.
pub fn validate_table(kind: TableKind, table: &RawTable) -> ValidationReport {
    let mut errors = Vec::new();
    let warnings = Vec::new();
    let file = kind.as_str();

    if table.rows.is_empty() {
        errors.push(ValidationIssue::new(
            file,
            0,
            "",
            "No data rows found.".to_string(),
        ));
        return ValidationReport {
            valid: false,
            errors,
            warnings,
        };
    }

    for col in kind.required_columns() {
        if !table.headers.iter().any(|h| h == col) {
            errors.push(ValidationIssue::new(
                file,
                0,
                col,
                format!("Missing required column: {}", col),
            ));
        }
    }

    let pk = kind.primary_key();
    let mut seen_ids: BTreeSet<String> = BTreeSet::new();

    for (i, row) in table.rows.iter().enumerate() {
        let rownum = i + 2;

        if let Some(id) = row.get(pk).filter(|v| !v.is_empty()) {
            if !seen_ids.insert(id.clone()) {
                errors.push(ValidationIssue::new(
                    file,
                    rownum,
                    pk,
                    format!("Duplicate {}: {}", pk, id),
                ));
            }
        }

        match kind {
            TableKind::Accounts => {
                parse_account(row, rownum, &mut errors);
            }
            TableKind::Customers => {
                parse_customer(row, rownum, &mut errors);
            }
            TableKind::Subscriptions => {
                parse_subscription(row, rownum, &mut errors);
            }
            TableKind::Invoices => {
                parse_invoice(row, rownum, &mut errors);
            }
            TableKind::Payments => {
                parse_payment(row, rownum, &mut errors);
            }
            TableKind::CreditNotes => {
                parse_credit_note(row, rownum, &mut errors);
            }
        }

        if errors.len() >= MAX_ERRORS {
            errors.push(ValidationIssue::new(
                "",
                0,
                "",
                format!("Showing first {} errors. Fix these and re-validate.", MAX_ERRORS),
            ));
            break;
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Validate all uploaded tables together.
///
/// `tables` maps each kind to its raw rows where uploaded. Missing optional
/// tables produce warnings; missing required tables produce errors.
pub fn validate_all(
    tables: &std::collections::BTreeMap<TableKind, RawTable>,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for kind in TableKind::ALL {
        match tables.get(&kind) {
            None if kind.optional() => warnings.push(ValidationIssue::new(
                kind.as_str(),
                0,
                "",
                format!("{} not uploaded. Analysis will proceed without it.", kind),
            )),
            None => errors.push(ValidationIssue::new(
                kind.as_str(),
                0,
                "",
                format!("{} is required but not uploaded.", kind),
            )),
            Some(table) => {
                let report = validate_table(kind, table);
                errors.extend(report.errors);
                warnings.extend(report.warnings);
            }
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}
