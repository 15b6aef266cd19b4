use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::services::round2;

const REQUIRED_FEE_TYPES: [&str; 3] = ["advance_rent", "monthly_rent", "service_fee_flat"];
const GUARANTEE_FEE_TYPES: [&str; 2] = ["security_deposit", "guarantee_option_fee"];
const GUARANTEE_REQUIREMENT: &str = "security_deposit_or_guarantee_option_fee";

/// One priced component of a move-in or a monthly bill.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeeLine {
    pub fee_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub is_refundable: bool,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingTotals {
    pub total_move_in: f64,
    pub monthly_recurring_total: f64,
    pub totals_by_type: BTreeMap<String, f64>,
}

/// Lease money columns derived from its fee lines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LeaseFinancials {
    pub monthly_rent: f64,
    pub service_fee_flat: f64,
    pub security_deposit: f64,
    pub guarantee_option_fee: f64,
    pub tax_iva: f64,
    pub total_move_in: f64,
    pub monthly_recurring_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LeaseTotals {
    pub total_move_in: f64,
    /// Amount billed each month by the lease schedule.
    pub monthly_recurring_total: f64,
}

/// Cleans fee lines for storage. Applying it to its own output changes nothing.
pub fn normalize_fee_lines(lines: impl IntoIterator<Item = FeeLine>) -> Vec<FeeLine> {
    let mut normalized = Vec::new();
    for (index, line) in lines.into_iter().enumerate() {
        let fee_type = line.fee_type.trim().to_string();
        if fee_type.is_empty() {
            continue;
        }
        let label = match line.label.trim() {
            "" => title_case(&fee_type),
            label => label.to_string(),
        };
        let is_recurring = line.is_recurring || fee_type == "monthly_rent";
        let position = i32::try_from(index + 1).unwrap_or(i32::MAX);

        normalized.push(FeeLine {
            label,
            amount: round2(non_negative(line.amount)),
            is_refundable: line.is_refundable,
            is_recurring,
            sort_order: if line.sort_order > 0 {
                line.sort_order
            } else {
                position
            },
            fee_type,
        });
    }

    normalized.sort_by(|left, right| {
        left.sort_order
            .cmp(&right.sort_order)
            .then_with(|| left.fee_type.cmp(&right.fee_type))
    });
    normalized
}

pub fn missing_required_fee_types(lines: &[FeeLine]) -> Vec<String> {
    let present = lines
        .iter()
        .map(|line| line.fee_type.trim())
        .collect::<Vec<_>>();

    let mut missing = REQUIRED_FEE_TYPES
        .iter()
        .filter(|fee_type| !present.contains(*fee_type))
        .map(|fee_type| (*fee_type).to_string())
        .collect::<Vec<_>>();
    if !GUARANTEE_FEE_TYPES
        .iter()
        .any(|fee_type| present.contains(fee_type))
    {
        missing.push(GUARANTEE_REQUIREMENT.to_string());
    }
    missing
}

pub fn compute_pricing_totals(lines: &[FeeLine]) -> PricingTotals {
    let mut totals_by_type: BTreeMap<String, f64> = BTreeMap::new();
    let mut total_move_in = 0.0;
    let mut monthly_recurring_total = 0.0;

    for line in lines {
        let fee_type = line.fee_type.trim();
        if fee_type.is_empty() {
            continue;
        }
        let amount = non_negative(line.amount);
        let entry = totals_by_type.entry(fee_type.to_string()).or_insert(0.0);
        *entry = round2(*entry + amount);
        total_move_in += amount;

        if line.is_recurring || fee_type == "monthly_rent" {
            monthly_recurring_total += amount;
        }
    }

    PricingTotals {
        total_move_in: round2(total_move_in),
        monthly_recurring_total: round2(monthly_recurring_total),
        totals_by_type,
    }
}

pub fn lease_financials_from_lines(lines: &[FeeLine]) -> LeaseFinancials {
    let totals = compute_pricing_totals(lines);
    let by_type = |fee_type: &str| round2(totals.totals_by_type.get(fee_type).copied().unwrap_or(0.0));

    LeaseFinancials {
        monthly_rent: by_type("monthly_rent"),
        service_fee_flat: by_type("service_fee_flat"),
        security_deposit: by_type("security_deposit"),
        guarantee_option_fee: by_type("guarantee_option_fee"),
        tax_iva: by_type("tax_iva"),
        total_move_in: totals.total_move_in,
        monthly_recurring_total: totals.monthly_recurring_total,
    }
}

pub fn compute_lease_totals(
    monthly_rent: f64,
    service_fee_flat: f64,
    security_deposit: f64,
    guarantee_option_fee: f64,
    tax_iva: f64,
) -> LeaseTotals {
    LeaseTotals {
        total_move_in: round2(
            monthly_rent + service_fee_flat + security_deposit + guarantee_option_fee + tax_iva,
        ),
        monthly_recurring_total: round2(monthly_rent + tax_iva),
    }
}

fn non_negative(amount: f64) -> f64 {
    if amount.is_finite() && amount > 0.0 {
        amount
    } else {
        0.0
    }
}

fn title_case(fee_type: &str) -> String {
    fee_type
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{
        compute_lease_totals, compute_pricing_totals, lease_financials_from_lines,
        missing_required_fee_types, normalize_fee_lines, FeeLine,
    };

    fn line(fee_type: &str, amount: f64, is_recurring: bool, sort_order: i32) -> FeeLine {
        FeeLine {
            fee_type: fee_type.to_string(),
            label: String::new(),
            amount,
            is_refundable: false,
            is_recurring,
            sort_order,
        }
    }

    fn sample_lines() -> Vec<FeeLine> {
        vec![
            line("security_deposit", 3_000_000.0, false, 0),
            line("monthly_rent", 3_000_000.0, false, 0),
            line("  ", 10.0, false, 0),
            line("service_fee_flat", 150_000.456, false, 2),
            line("tax_iva", 300_000.0, true, 0),
            line("cleaning", -25.0, false, 9),
        ]
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_fee_lines(sample_lines());
        let twice = normalize_fee_lines(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn normalization_fills_defaults_and_orders_lines() {
        let lines = normalize_fee_lines(sample_lines());
        let order = lines
            .iter()
            .map(|line| (line.fee_type.as_str(), line.sort_order))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                ("security_deposit", 1),
                ("monthly_rent", 2),
                ("service_fee_flat", 2),
                ("tax_iva", 5),
                ("cleaning", 9),
            ]
        );

        let rent = &lines[1];
        assert_eq!(rent.label, "Monthly Rent");
        assert!(rent.is_recurring);
        assert_eq!(lines[2].amount, 150_000.46);
        assert_eq!(lines[4].amount, 0.0);
    }

    #[test]
    fn totals_sum_every_line_and_recurring_ones_monthly() {
        let lines = normalize_fee_lines(sample_lines());
        let totals = compute_pricing_totals(&lines);
        let sum = lines.iter().map(|line| line.amount).sum::<f64>();
        assert_eq!(totals.total_move_in, (sum * 100.0).round() / 100.0);
        assert_eq!(totals.monthly_recurring_total, 3_300_000.0);
        assert_eq!(totals.totals_by_type.get("service_fee_flat"), Some(&150_000.46));

        let financials = lease_financials_from_lines(&lines);
        assert_eq!(financials.monthly_rent, 3_000_000.0);
        assert_eq!(financials.tax_iva, 300_000.0);
        assert_eq!(financials.guarantee_option_fee, 0.0);
        assert_eq!(financials.monthly_recurring_total, 3_300_000.0);
    }

    #[test]
    fn reports_missing_required_fee_types() {
        let lines = normalize_fee_lines(sample_lines());
        assert_eq!(missing_required_fee_types(&lines), vec!["advance_rent"]);
        assert_eq!(
            missing_required_fee_types(&[]),
            vec![
                "advance_rent",
                "monthly_rent",
                "service_fee_flat",
                "security_deposit_or_guarantee_option_fee",
            ]
        );
    }

    #[test]
    fn lease_totals_bill_rent_plus_iva_monthly() {
        let totals = compute_lease_totals(3_000_000.0, 150_000.0, 3_000_000.0, 0.0, 300_000.0);
        assert_eq!(totals.total_move_in, 6_450_000.0);
        assert_eq!(totals.monthly_recurring_total, 3_300_000.0);
    }
}
