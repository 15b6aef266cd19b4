use std::fmt;

use crate::records::{CollectionRecord, Expense, LeaseCharge};

pub const SETTLEMENT_CURRENCY: &str = "PYG";

/// Whether a table's rows may carry a USD amount with their own
/// `fx_rate_to_pyg`. Only expenses do; lease charges and collections are
/// expected to be stored in PYG already.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxSupport {
    UsdWithRecordRate,
    SettlementOnly,
}

/// Why a money record could not be expressed in PYG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FxWarning {
    MissingFxRate,
    UnsupportedCurrency(String),
}

impl FxWarning {
    pub fn is_missing_rate(&self) -> bool {
        matches!(self, Self::MissingFxRate)
    }
}

impl fmt::Display for FxWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFxRate => f.write_str("missing_fx_rate_to_pyg"),
            Self::UnsupportedCurrency(code) => write!(f, "unsupported_currency:{code}"),
        }
    }
}

/// A row carrying one amount in some currency.
pub trait MoneyRecord {
    fn record_id(&self) -> &str;
    fn amount(&self) -> f64;
    fn currency(&self) -> &str;
    fn fx_rate_to_pyg(&self) -> Option<f64> {
        None
    }
}

impl MoneyRecord for Expense {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn amount(&self) -> f64 {
        self.amount
    }
    fn currency(&self) -> &str {
        &self.currency
    }
    fn fx_rate_to_pyg(&self) -> Option<f64> {
        self.fx_rate_to_pyg
    }
}

impl MoneyRecord for LeaseCharge {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn amount(&self) -> f64 {
        self.amount
    }
    fn currency(&self) -> &str {
        &self.currency
    }
}

impl MoneyRecord for CollectionRecord {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn amount(&self) -> f64 {
        self.amount
    }
    fn currency(&self) -> &str {
        &self.currency
    }
}

/// Converts a record's amount to PYG.
pub fn amount_in_pyg<R: MoneyRecord>(record: &R, support: FxSupport) -> Result<f64, FxWarning> {
    let currency = record.currency().trim().to_ascii_uppercase();
    let amount = record.amount();

    if currency == SETTLEMENT_CURRENCY {
        return Ok(amount);
    }
    if currency == "USD" && support == FxSupport::UsdWithRecordRate {
        return match record.fx_rate_to_pyg() {
            Some(rate) if rate > 0.0 => Ok(amount * rate),
            _ => Err(FxWarning::MissingFxRate),
        };
    }
    Err(FxWarning::UnsupportedCurrency(currency))
}
