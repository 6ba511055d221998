//! Fixed chart of transaction categories used for financial statements
//!
//! The taxonomy is built once on first use and is immutable afterwards. A
//! [`CategoryCode`] can only be obtained by resolving a string against it,
//! so any code held by the rest of the crate is known to be valid.

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Top-level grouping of a category in the financial statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxonomyGroup {
    Income,
    CostOfGoodsSold,
    OperatingExpense,
    DirectExpense,
    FinancialExpense,
    Taxation,
    OtherExpense,
    /// Balance-sheet movements such as transfers between own accounts
    NonPnl,
    Uncategorized,
}

impl TaxonomyGroup {
    /// Whether the group shows up on the profit and loss statement
    pub fn is_pnl(&self) -> bool {
        !matches!(self, Self::NonPnl | Self::Uncategorized)
    }
}

/// A validated category code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryCode(&'static str);

impl CategoryCode {
    pub const UNCATEGORIZED: CategoryCode = CategoryCode("UNCATEGORIZED");
    pub const INTERNAL_TRANSFER: CategoryCode = CategoryCode("TRANSFER-INTERNAL");
    pub const PRODUCT_SALES_DOMESTIC: CategoryCode = CategoryCode("INC-PRD-DOM");
    pub const SERVICE_REVENUE: CategoryCode = CategoryCode("INC-SVC-TM");
    pub const RAW_MATERIALS: CategoryCode = CategoryCode("COGS-RAW");
    pub const CONTRACTOR_PAYMENTS: CategoryCode = CategoryCode("EXP-DIR-CONTR");

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Full taxonomy entry for this code
    pub fn entry(&self) -> &'static TaxonomyEntry {
        STANDARD_TAXONOMY.entry_for(*self)
    }

    pub fn name(&self) -> &'static str {
        self.entry().name
    }

    pub fn path(&self) -> &'static str {
        &self.entry().path
    }

    pub fn group(&self) -> TaxonomyGroup {
        self.entry().group
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for CategoryCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

impl<'de> Deserialize<'de> for CategoryCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        CategoryCode::try_from(code).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<String> for CategoryCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Taxonomy::standard()
            .resolve(&value)
            .ok_or_else(|| format!("unknown category code '{}'", value))
    }
}

impl TryFrom<&str> for CategoryCode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Taxonomy::standard()
            .resolve(value)
            .ok_or_else(|| format!("unknown category code '{}'", value))
    }
}

/// One category with its position in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxonomyEntry {
    pub code: CategoryCode,
    pub name: &'static str,
    /// Hierarchy path, levels separated by ` > `
    pub path: String,
    pub group: TaxonomyGroup,
}

/// The complete set of categories a transaction may be assigned
#[derive(Debug, Serialize)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
    #[serde(skip)]
    index: HashMap<&'static str, usize>,
}

impl Taxonomy {
    /// The process-wide taxonomy
    pub fn standard() -> &'static Taxonomy {
        &STANDARD_TAXONOMY
    }

    fn build(definitions: &[(&'static str, &'static str, TaxonomyGroup, &'static str)]) -> Self {
        let mut entries = Vec::with_capacity(definitions.len());
        let mut index = HashMap::with_capacity(definitions.len());

        for (code, name, group, parent) in definitions {
            index.insert(*code, entries.len());
            entries.push(TaxonomyEntry {
                code: CategoryCode(*code),
                name: *name,
                path: format!("{} > {}", parent, name),
                group: *group,
            });
        }

        Self { entries, index }
    }

    /// Validate a raw code. Surrounding whitespace and case are ignored.
    pub fn resolve(&self, code: &str) -> Option<CategoryCode> {
        let normalized = code.trim().to_ascii_uppercase();
        self.index
            .get(normalized.as_str())
            .map(|&idx| self.entries[idx].code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.resolve(code).is_some()
    }

    /// Look up the entry for a raw code
    pub fn entry(&self, code: &str) -> Option<&TaxonomyEntry> {
        self.resolve(code).map(|code| self.entry_for(code))
    }

    fn entry_for(&self, code: CategoryCode) -> &TaxonomyEntry {
        // Every CategoryCode originates from this index.
        &self.entries[self.index[code.0]]
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn codes_in_group(&self, group: TaxonomyGroup) -> Vec<CategoryCode> {
        self.entries
            .iter()
            .filter(|entry| entry.group == group)
            .map(|entry| entry.code)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static STANDARD_TAXONOMY: Lazy<Taxonomy> = Lazy::new(|| Taxonomy::build(DEFINITIONS));

const OPERATING_REVENUE: &str = "Income > Operating Revenue";
const OTHER_INCOME: &str = "Income > Other Income";
const COGS: &str = "Expense > Cost of Goods Sold";
const MARKETING: &str = "Expense > Operating Expenses > Marketing";
const GENERAL_ADMIN: &str = "Expense > Operating Expenses > G&A";
const IT_PRODUCT: &str = "Expense > Operating Expenses > IT/Product";
const DIRECT: &str = "Expense > Direct Expenses";
const FINANCIAL: &str = "Expense > Financial Expenses";
const TAXATION: &str = "Expense > Taxation";
const OTHER_EXPENSES: &str = "Expense > Other Expenses";

#[rustfmt::skip]
const DEFINITIONS: &[(&str, &str, TaxonomyGroup, &str)] = &[
    ("INC-PRD-DOM", "Product Sales - Domestic", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-PRD-EXP", "Product Sales - Export", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-SVC-TM", "Service Revenue - Time & Materials", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-SVC-FP", "Service Revenue - Fixed-price", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-SUB", "Subscription/Recurring Revenue", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-SAAS", "SaaS / Platform Fees", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-DISC-C", "Sales Discounts (contra)", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-RET-C", "Sales Returns & Allowances (contra)", TaxonomyGroup::Income, OPERATING_REVENUE),
    ("INC-COMM", "Commission Income", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-ROYALTY", "Royalty Income", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-RENT", "Rental Income (operating)", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-AFF", "Affiliate / Referral Fees", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-INT", "Interest Income", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-DIV", "Dividend Income", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-ASSET-GAIN", "Gain on Sale of Assets", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-FX-GAIN", "Foreign Exchange Gains", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-INVEST", "Investment Income", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-GRANT", "Grants / Subsidies", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-EXCEPT", "One-time / Exceptional", TaxonomyGroup::Income, OTHER_INCOME),
    ("INC-UNCAT", "Uncategorized Income", TaxonomyGroup::Income, "Income > Uncategorized"),

    ("COGS-RAW", "Raw Materials / Components", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-LABOR", "Direct Labor (manufacturing)", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-MOH", "Manufacturing Overhead", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-FREIGHT", "Freight-in / Import Duty", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-PACK", "Packaging & Shipping", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-INV-ADJ", "Inventory Adjustments", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-DISC-C", "Purchase Discounts (contra)", TaxonomyGroup::CostOfGoodsSold, COGS),
    ("COGS-UNCAT", "Uncategorized COGS", TaxonomyGroup::CostOfGoodsSold, COGS),

    ("EXP-MKT-ADS", "Advertising & Promotion", TaxonomyGroup::OperatingExpense, MARKETING),
    ("EXP-MKT-COMM", "Sales Commissions", TaxonomyGroup::OperatingExpense, MARKETING),
    ("EXP-MKT-EVENT", "Events / Sponsorships", TaxonomyGroup::OperatingExpense, MARKETING),
    ("EXP-MKT-SW", "Marketing Software", TaxonomyGroup::OperatingExpense, MARKETING),

    ("EXP-GA-SAL", "Salaries & Wages (Admin)", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-PAYROLL", "Payroll Taxes & Benefits", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-RENT", "Office Rent & Lease", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-UTIL", "Utilities", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-SUPPLY", "Office Supplies", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-INS", "Insurance (General)", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-PROF", "Professional Fees", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-TRAVEL", "Travel & Entertainment", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-HR", "Recruitment / Training", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-BANK", "Bank Charges & Merchant Fees", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-COMM", "Communications", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),
    ("EXP-GA-PENDING", "G&A Pending Classification", TaxonomyGroup::OperatingExpense, GENERAL_ADMIN),

    ("EXP-IT-SW", "Software Licenses", TaxonomyGroup::OperatingExpense, IT_PRODUCT),
    ("EXP-IT-CLOUD", "Cloud Hosting / CDN", TaxonomyGroup::OperatingExpense, IT_PRODUCT),
    ("EXP-IT-PG", "Payment Gateway Fees", TaxonomyGroup::OperatingExpense, IT_PRODUCT),
    ("EXP-IT-DEVOPS", "Platform / DevOps", TaxonomyGroup::OperatingExpense, IT_PRODUCT),
    ("EXP-IT-PENDING", "IT Pending Classification", TaxonomyGroup::OperatingExpense, IT_PRODUCT),

    ("EXP-DIR-CONTR", "Contractor Payments", TaxonomyGroup::DirectExpense, DIRECT),
    ("EXP-DIR-SUB", "Subcontractor Costs", TaxonomyGroup::DirectExpense, DIRECT),
    ("EXP-DIR-LIC", "License/Royalty Costs", TaxonomyGroup::DirectExpense, DIRECT),

    ("EXP-FIN-INT", "Interest Expense", TaxonomyGroup::FinancialExpense, FINANCIAL),
    ("EXP-FIN-BANK", "Bank Charges", TaxonomyGroup::FinancialExpense, FINANCIAL),
    ("EXP-FIN-FX", "Foreign Exchange Loss", TaxonomyGroup::FinancialExpense, FINANCIAL),

    ("EXP-TAX-INC", "Income Tax Expense", TaxonomyGroup::Taxation, TAXATION),
    ("EXP-TAX-GST", "GST/VAT Payment", TaxonomyGroup::Taxation, TAXATION),
    ("EXP-TAX-PT", "Professional Tax", TaxonomyGroup::Taxation, TAXATION),

    ("EXP-OTH-CSR", "Donations & CSR", TaxonomyGroup::OtherExpense, OTHER_EXPENSES),
    ("EXP-OTH-MEM", "Memberships & Subscriptions", TaxonomyGroup::OtherExpense, OTHER_EXPENSES),
    ("EXP-OTH-MISC", "Miscellaneous", TaxonomyGroup::OtherExpense, OTHER_EXPENSES),
    ("EXP-UNCAT", "Uncategorized Expense", TaxonomyGroup::OtherExpense, "Expense > Uncategorized"),

    ("TRANSFER-INTERNAL", "Internal Transfer", TaxonomyGroup::NonPnl, "Non-P&L"),
    ("TRANSFER-PENDING", "Potential Internal Transfer", TaxonomyGroup::NonPnl, "Non-P&L"),
    ("UNCATEGORIZED", "Pending Manual Review", TaxonomyGroup::Uncategorized, "Uncategorized"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes_resolve() {
        let taxonomy = Taxonomy::standard();
        for code in [
            CategoryCode::UNCATEGORIZED,
            CategoryCode::INTERNAL_TRANSFER,
            CategoryCode::PRODUCT_SALES_DOMESTIC,
            CategoryCode::SERVICE_REVENUE,
            CategoryCode::RAW_MATERIALS,
            CategoryCode::CONTRACTOR_PAYMENTS,
        ] {
            assert_eq!(taxonomy.resolve(code.as_str()), Some(code));
        }
    }

    #[test]
    fn test_resolve_normalizes_case_and_whitespace() {
        let taxonomy = Taxonomy::standard();
        assert_eq!(
            taxonomy.resolve("  exp-it-cloud "),
            taxonomy.resolve("EXP-IT-CLOUD")
        );
        assert!(taxonomy.resolve("EXP-NOT-A-CODE").is_none());
        assert!(taxonomy.resolve("").is_none());
    }

    #[test]
    fn test_codes_are_unique() {
        let taxonomy = Taxonomy::standard();
        assert_eq!(taxonomy.len(), DEFINITIONS.len());
    }

    #[test]
    fn test_paths_and_groups() {
        let transfer = CategoryCode::INTERNAL_TRANSFER;
        assert_eq!(transfer.path(), "Non-P&L > Internal Transfer");
        assert_eq!(transfer.group(), TaxonomyGroup::NonPnl);
        assert!(!transfer.group().is_pnl());

        let cloud = Taxonomy::standard().entry("EXP-IT-CLOUD").unwrap();
        assert_eq!(
            cloud.path,
            "Expense > Operating Expenses > IT/Product > Cloud Hosting / CDN"
        );
        assert!(cloud.group.is_pnl());
    }

    #[test]
    fn test_income_group_contains_uncategorized_income() {
        let income = Taxonomy::standard().codes_in_group(TaxonomyGroup::Income);
        assert!(income.iter().any(|code| code.as_str() == "INC-UNCAT"));
        assert!(income.iter().all(|code| code.as_str().starts_with("INC-")));
    }

    #[test]
    fn test_serde_rejects_unknown_codes() {
        let code: CategoryCode = serde_json::from_str("\"EXP-GA-RENT\"").unwrap();
        assert_eq!(code.name(), "Office Rent & Lease");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"EXP-GA-RENT\"");

        let unknown: Result<CategoryCode, _> = serde_json::from_str("\"EXP-BOGUS\"");
        assert!(unknown.is_err());
    }
}
