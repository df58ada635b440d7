//! Typed shapes for everything the LLM returns and everything we persist.
//!
//! The extraction structs double as JSON Schemas: `schemars` derives the
//! schema we send with each schema-constrained completion, and the same
//! schema is used to validate what comes back. `deny_unknown_fields` keeps
//! the model from smuggling extra keys past validation.
//!
//! Monetary values are [`Decimal`], never floats. They serialize as strings
//! and deserialize from either JSON numbers or strings.

use rust_decimal::Decimal;
use schemars::JsonSchema;

use crate::prelude::*;

/// The granularity of a reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PeriodType {
    /// Full fiscal year ("年度").
    #[serde(rename = "年度")]
    FiscalYear,
    /// Single month ("月次").
    #[serde(rename = "月次")]
    Monthly,
    /// Quarter ("四半期").
    #[serde(rename = "四半期")]
    Quarterly,
}

/// The reporting period a set of metrics belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Period {
    /// Four-digit calendar year.
    pub year: i32,
    /// Month, 1-12. Absent for fiscal-year figures.
    pub month: Option<u32>,
    /// Quarter, 1-4. Absent unless `period_type` is quarterly.
    pub quarter: Option<u32>,
    #[serde(rename = "type")]
    pub period_type: PeriodType,
}

impl Period {
    /// Check the bounds the persistence layer relies on. Extracted periods
    /// that fail this are dropped, never written.
    pub fn validate(&self) -> Result<()> {
        if !(1000..=9999).contains(&self.year) {
            return Err(anyhow!("year {} is not a four-digit year", self.year));
        }
        if let Some(month) = self.month
            && !(1..=12).contains(&month)
        {
            return Err(anyhow!("month {month} is out of range"));
        }
        if let Some(quarter) = self.quarter
            && !(1..=4).contains(&quarter)
        {
            return Err(anyhow!("quarter {quarter} is out of range"));
        }
        Ok(())
    }
}

/// What slice of the business a set of metrics describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Company,
    Department,
    Product,
}

/// The business unit a set of metrics applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BusinessScope {
    pub scope_type: ScopeType,
    pub company_name: Option<String>,
    pub department_name: Option<String>,
    pub product_name: Option<String>,
}

impl BusinessScope {
    fn is_empty(&self) -> bool {
        self.company_name.is_none()
            && self.department_name.is_none()
            && self.product_name.is_none()
    }
}

/// Profit-and-loss figures, in yen. Every field is optional; pages rarely
/// show the full statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProfitAndLoss {
    pub revenue: Option<Decimal>,
    pub cogs: Option<Decimal>,
    pub gross_profit_margin: Option<Decimal>,
    pub sg_and_a: Option<Decimal>,
    pub operating_income: Option<Decimal>,
    pub operating_income_margin: Option<Decimal>,
    pub non_operating_income: Option<Decimal>,
    pub non_operating_expenses: Option<Decimal>,
    pub ordinary_income: Option<Decimal>,
    pub extraordinary_income: Option<Decimal>,
    pub extraordinary_losses: Option<Decimal>,
    pub profit_before_tax: Option<Decimal>,
    pub corporate_taxes: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub ebitda: Option<Decimal>,
    pub psr: Option<Decimal>,
    pub ev_to_ebitda: Option<Decimal>,
}

impl ProfitAndLoss {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// SaaS revenue figures, in yen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SaasRevenueMetrics {
    pub revenue: Option<Decimal>,
    pub mrr: Option<Decimal>,
    pub arr: Option<Decimal>,
    pub arpu: Option<Decimal>,
    pub expansion_revenue: Option<Decimal>,
    pub new_customer_revenue: Option<Decimal>,
}

impl SaasRevenueMetrics {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// SaaS customer figures. Rates are fractions, not percentages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SaasCustomerMetrics {
    pub churn_rate: Option<Decimal>,
    pub retention_rate: Option<Decimal>,
    pub active_users: Option<i64>,
    pub trial_conversion_rate: Option<Decimal>,
    pub average_contract_value: Option<Decimal>,
    pub nrr: Option<Decimal>,
}

impl SaasCustomerMetrics {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One period's worth of extracted metrics for one business scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FinancialMetrics {
    pub period: Period,
    pub business_scope: Option<BusinessScope>,
    pub profit_and_loss: Option<ProfitAndLoss>,
    pub saas_revenue_metrics: Option<SaasRevenueMetrics>,
    pub saas_customer_metrics: Option<SaasCustomerMetrics>,
}

impl FinancialMetrics {
    /// Does any sub-record carry at least one value? Records where nothing
    /// was extracted are suppressed instead of persisted.
    pub fn has_data(&self) -> bool {
        self.business_scope.as_ref().is_some_and(|s| !s.is_empty())
            || self.profit_and_loss.as_ref().is_some_and(|p| !p.is_empty())
            || self
                .saas_revenue_metrics
                .as_ref()
                .is_some_and(|r| !r.is_empty())
            || self
                .saas_customer_metrics
                .as_ref()
                .is_some_and(|c| !c.is_empty())
    }
}

/// One step of the model's show-your-work reasoning trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub explanation: String,
    pub output: String,
}

/// The stepwise envelope the financial-metrics extraction returns: a
/// reasoning trace plus zero or more per-period summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MetricsExtraction {
    pub steps: Vec<Step>,
    pub business_summaries: Vec<FinancialMetrics>,
}

/// The analyst's structured read of a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AnalystReport {
    /// What the page objectively shows.
    pub facts: String,
    /// Problems or anomalies worth flagging.
    pub issues: String,
    /// Why those issues matter.
    pub rationale: String,
    /// What the page implies about the future.
    pub forecast: String,
    /// What a diligence team should dig into next.
    pub investigation: String,
}

/// A faithful text rendering of a page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TranscriptionReport {
    pub transcription: String,
}

/// Lightweight document-level classification extracted from heading text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DocumentInfo {
    /// Two-to-three sentence summary of the document.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// What distinguishes this document from others of its kind.
    pub feature: String,
    /// Kinds of data a reader could extract from it.
    pub extractable_info: Vec<String>,
    /// The years the document covers, as written.
    pub year_info: String,
    /// Reporting cadence of the document, if evident.
    pub period_type: String,
    /// Coarse document category.
    pub category: String,
    /// Investor-relations category, if applicable.
    pub category_ir: String,
}
