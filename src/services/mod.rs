pub mod fx;
pub mod lease_schedule;
pub mod owner_statement;
pub mod owner_statements;
pub mod pricing;
pub mod reconciliation;
pub mod scheduler;
pub mod statement_scope;

/// Money is rounded half away from zero to two decimals wherever it is stored
/// or compared.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
