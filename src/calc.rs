use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// 1-decimal rounding used for displayed percentages:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

/// Deadline for a billing period. A due day past the end of the month
/// (e.g. day 31 in February) falls on the month's last day.
pub fn due_date_for_period(year: i32, month: u32, due_day: u32) -> NaiveDate {
    let day = due_day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day within month")
}

/// Share of the snapshot fee paid so far, clamped to [0, 100].
/// A zero fee reports 0%, never a division by zero.
pub fn percentage_paid(total_paid: f64, fee: f64) -> f64 {
    if fee <= 0.0 {
        return 0.0;
    }
    round_off_1_decimal((100.0 * total_paid / fee).clamp(0.0, 100.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodStatus {
    Completed,
    Overdue,
    PartiallyPaid,
    Pending,
    NotDue,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Completed => "completed",
            PeriodStatus::Overdue => "overdue",
            PeriodStatus::PartiallyPaid => "partially_paid",
            PeriodStatus::Pending => "pending",
            PeriodStatus::NotDue => "not_due",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyProgress {
    pub total_paid: f64,
    pub monthly_tuition_fee: f64,
    pub percentage_paid: f64,
    pub is_fully_paid: bool,
    pub payment_count: usize,
    pub payment_id: Option<String>,
}

/// One label per period. Order matters: fully-paid wins over overdue,
/// overdue over partial, partial over pending. Pending and overdue are
/// mutually exclusive by construction.
pub fn classify_period(
    progress: Option<&MonthlyProgress>,
    due_date: NaiveDate,
    today: NaiveDate,
) -> PeriodStatus {
    let Some(p) = progress else {
        return PeriodStatus::NotDue;
    };
    if p.payment_count == 0 {
        return PeriodStatus::NotDue;
    }
    if p.is_fully_paid {
        return PeriodStatus::Completed;
    }
    if today > due_date {
        return PeriodStatus::Overdue;
    }
    if p.total_paid > 0.0 {
        return PeriodStatus::PartiallyPaid;
    }
    PeriodStatus::Pending
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Read-only progress for one (student, month, year). `None` when no billing
/// row exists for the period. The required amount comes from the rows'
/// `tuition_fee_at_payment` snapshot, never the student's live fee, so
/// historical percentages stay put after a fee change.
pub fn monthly_progress(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
    month: u32,
    year: i32,
) -> Result<Option<MonthlyProgress>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, paid_amount, tuition_fee_at_payment
             FROM payments
             WHERE tenant_id = ? AND student_id = ? AND payment_month = ? AND payment_year = ?
             ORDER BY rowid",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let rows: Vec<(String, f64, f64)> = stmt
        .query_map((tenant_id, student_id, month, year), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    if rows.is_empty() {
        return Ok(None);
    }

    // Normally one row per period; partial duplicates contribute their paid
    // amounts while the earliest row defines the required fee.
    let total_paid: f64 = rows.iter().map(|(_, paid, _)| paid).sum();
    let fee = rows[0].2;
    let payment_id = Some(rows[0].0.clone());

    Ok(Some(MonthlyProgress {
        total_paid,
        monthly_tuition_fee: fee,
        percentage_paid: percentage_paid(total_paid, fee),
        is_fully_paid: total_paid >= fee,
        payment_count: rows.len(),
        payment_id,
    }))
}

#[derive(Debug, Clone)]
pub struct StudentBilling {
    pub monthly_tuition_fee: f64,
    pub payment_due_day: u32,
}

pub fn load_student_billing(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
) -> Result<Option<StudentBilling>, CalcError> {
    conn.query_row(
        "SELECT monthly_tuition_fee, payment_due_day
         FROM students
         WHERE id = ? AND tenant_id = ?",
        (student_id, tenant_id),
        |r| {
            Ok(StudentBilling {
                monthly_tuition_fee: r.get(0)?,
                payment_due_day: r.get::<_, i64>(1)?.clamp(1, 31) as u32,
            })
        },
    )
    .optional()
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthOverview {
    pub month: u32,
    pub year: i32,
    pub month_name: String,
    pub total_paid: f64,
    pub required_amount: f64,
    pub percentage_paid: f64,
    pub is_fully_paid: bool,
    pub is_pending: bool,
    pub is_overdue: bool,
    pub has_payment: bool,
    pub payment_id: Option<String>,
    pub status: String,
}

/// Yearly payment grid for one student: months 1..12 in order, one progress
/// query per month. Months with no billing row show the student's live fee as
/// the required amount and classify as `not_due`.
pub fn monthly_overview(
    conn: &Connection,
    tenant_id: &str,
    student_id: &str,
    year: i32,
    today: NaiveDate,
) -> Result<Vec<MonthOverview>, CalcError> {
    let Some(billing) = load_student_billing(conn, tenant_id, student_id)? else {
        return Err(CalcError::new("not_found", "student not found"));
    };

    let mut months = Vec::with_capacity(12);
    for month in 1..=12u32 {
        let progress = monthly_progress(conn, tenant_id, student_id, month, year)?;
        let due_date = due_date_for_period(year, month, billing.payment_due_day);
        let status = classify_period(progress.as_ref(), due_date, today);

        let (total_paid, required_amount, pct, fully_paid, payment_id) = match &progress {
            Some(p) => (
                p.total_paid,
                p.monthly_tuition_fee,
                p.percentage_paid,
                p.is_fully_paid,
                p.payment_id.clone(),
            ),
            None => (0.0, billing.monthly_tuition_fee, 0.0, false, None),
        };

        months.push(MonthOverview {
            month,
            year,
            month_name: MONTH_NAMES[(month - 1) as usize].to_string(),
            total_paid,
            required_amount,
            percentage_paid: pct,
            is_fully_paid: fully_paid,
            is_pending: status == PeriodStatus::Pending,
            is_overdue: status == PeriodStatus::Overdue,
            has_payment: progress.is_some(),
            payment_id,
            status: status.as_str().to_string(),
        });
    }
    Ok(months)
}
