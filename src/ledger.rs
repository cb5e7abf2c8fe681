use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Fee purposes in the fixed order ledgers are emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePurpose {
    Tuition,
    Exam,
    Uniform,
    Pta,
    Other,
}

impl FeePurpose {
    pub const ALL: [FeePurpose; 5] = [
        Self::Tuition,
        Self::Exam,
        Self::Uniform,
        Self::Pta,
        Self::Other,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tuition" => Some(Self::Tuition),
            "exam" => Some(Self::Exam),
            "uniform" => Some(Self::Uniform),
            "pta" => Some(Self::Pta),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tuition => "tuition",
            Self::Exam => "exam",
            Self::Uniform => "uniform",
            Self::Pta => "pta",
            Self::Other => "other",
        }
    }
}

/// Settlement state of one purpose within a queried scope. `Overpaid` is the
/// only status whose balance may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Pending,
    Paid,
    Partial,
    Outstanding,
    Overpaid,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Outstanding => "outstanding",
            Self::Overpaid => "overpaid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeLine {
    pub purpose: FeePurpose,
    pub amount: Decimal,
    pub carried_over: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentLine {
    pub purpose: FeePurpose,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRow {
    pub purpose: FeePurpose,
    pub total_charged: Decimal,
    pub total_paid: Decimal,
    pub balance: Decimal,
    pub status: FeeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LedgerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Parses a stored or user-supplied amount. Charges and payments are never
/// negative; rejecting here keeps every entry point on one rule.
pub fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| LedgerError::new("invalid_amount", format!("invalid amount: {}", raw)))?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::new(
            "invalid_amount",
            "amount must not be negative",
        ));
    }
    Ok(amount)
}

pub fn classify_status(total_charged: Decimal, total_paid: Decimal) -> FeeStatus {
    if total_paid > total_charged {
        FeeStatus::Overpaid
    } else if total_charged.is_zero() {
        FeeStatus::Pending
    } else if total_paid == total_charged {
        FeeStatus::Paid
    } else if total_paid.is_zero() {
        FeeStatus::Outstanding
    } else {
        FeeStatus::Partial
    }
}

fn check_line(kind: &str, index: usize, purpose: FeePurpose, amount: Decimal) -> Result<(), LedgerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::new(
            "invalid_amount",
            format!("{} amount must not be negative", kind),
        )
        .with_details(serde_json::json!({
            "kind": kind,
            "index": index,
            "purpose": purpose.as_str(),
        })));
    }
    Ok(())
}

/// Reduces raw charges and payments to one row per purpose. Rows come out in
/// `FeePurpose` declaration order, so identical inputs always produce an
/// identical ledger.
pub fn reduce_ledger(
    charges: &[ChargeLine],
    payments: &[PaymentLine],
) -> Result<Vec<LedgerRow>, LedgerError> {
    let mut by_purpose: BTreeMap<FeePurpose, (Decimal, Decimal)> = BTreeMap::new();

    for (i, charge) in charges.iter().enumerate() {
        check_line("charge", i, charge.purpose, charge.amount)?;
        let entry = by_purpose
            .entry(charge.purpose)
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += charge.amount;
    }
    for (i, payment) in payments.iter().enumerate() {
        check_line("payment", i, payment.purpose, payment.amount)?;
        let entry = by_purpose
            .entry(payment.purpose)
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.1 += payment.amount;
    }

    Ok(by_purpose
        .into_iter()
        .map(|(purpose, (total_charged, total_paid))| LedgerRow {
            purpose,
            total_charged,
            total_paid,
            balance: total_charged - total_paid,
            status: classify_status(total_charged, total_paid),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtSplit {
    pub current_fee: Decimal,
    pub previous_debt: Decimal,
    pub total_paid: Decimal,
    pub current_outstanding: Decimal,
    pub previous_outstanding: Decimal,
}

/// Splits a scope's outstanding figure into the part owed for the current
/// term and the part carried over from earlier terms. Payments settle
/// current-term charges first; only the remainder reduces carried debt.
pub fn split_debt(rows: &[LedgerRow], carried: &[ChargeLine]) -> Result<DebtSplit, LedgerError> {
    let mut previous_debt = Decimal::ZERO;
    for (i, charge) in carried.iter().enumerate() {
        check_line("charge", i, charge.purpose, charge.amount)?;
        previous_debt += charge.amount;
    }

    let total_charged: Decimal = rows.iter().map(|r| r.total_charged).sum();
    let total_paid: Decimal = rows.iter().map(|r| r.total_paid).sum();

    if previous_debt > total_charged {
        return Err(LedgerError::new(
            "invalid_amount",
            "carried-over debt exceeds total charges in scope",
        )
        .with_details(serde_json::json!({
            "previousDebt": previous_debt.to_string(),
            "totalCharged": total_charged.to_string(),
        })));
    }

    let current_fee = total_charged - previous_debt;
    let paid_toward_current = total_paid.min(current_fee);
    let leftover = total_paid - paid_toward_current;
    let previous_outstanding = (previous_debt - leftover).max(Decimal::ZERO);

    Ok(DebtSplit {
        current_fee,
        previous_debt,
        total_paid,
        current_outstanding: current_fee - paid_toward_current,
        previous_outstanding,
    })
}
