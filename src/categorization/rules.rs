//! Deterministic narration rules for common Indian payment patterns
//!
//! Rules are checked in order and the first hit wins, so more specific
//! phrases (internal transfers, cloud providers) sit above broader ones
//! (generic e-commerce).

use crate::categorization::taxonomy::{CategoryCode, Taxonomy};
use crate::types::TransactionDirection;
use crate::utils::text::{contains_phrase, tokens};

/// Single-word keywords at least this long also match inside a token
const GLUE_MIN_LEN: usize = 5;

/// A keyword rule with per-direction category codes
#[derive(Debug, Clone, Copy)]
pub struct NarrationRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    /// Code for money received; `None` means the rule does not apply
    pub credit: Option<&'static str>,
    /// Code for money paid out; `None` means the rule does not apply
    pub debit: Option<&'static str>,
}

impl NarrationRule {
    pub fn code_for(&self, direction: TransactionDirection) -> Option<&'static str> {
        match direction {
            TransactionDirection::Credit => self.credit,
            TransactionDirection::Debit => self.debit,
        }
    }
}

/// A rule that fired for a narration
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub code: CategoryCode,
    pub rule: &'static str,
    pub keyword: &'static str,
}

#[rustfmt::skip]
pub static NARRATION_RULES: &[NarrationRule] = &[
    NarrationRule {
        name: "internal_transfer",
        keywords: &["SELF TRANSFER", "OWN ACCOUNT", "INTERNAL TRANSFER", "TO SELF", "BY SELF"],
        credit: Some("TRANSFER-INTERNAL"),
        debit: Some("TRANSFER-INTERNAL"),
    },
    NarrationRule {
        name: "bank_charges",
        keywords: &["BANK CHARGES", "SMS CHARGES", "SERVICE CHARGE", "SERVICE CHARGES", "CHRGS", "ANNUAL FEE", "MIN BAL"],
        credit: None,
        debit: Some("EXP-FIN-BANK"),
    },
    NarrationRule {
        name: "interest",
        keywords: &["INTEREST", "INT PD", "INT CR", "INT COLL"],
        credit: Some("INC-INT"),
        debit: Some("EXP-FIN-INT"),
    },
    NarrationRule {
        name: "dividend",
        keywords: &["DIVIDEND"],
        credit: Some("INC-DIV"),
        debit: None,
    },
    NarrationRule {
        name: "gst",
        keywords: &["GST", "GSTN", "CBIC"],
        credit: None,
        debit: Some("EXP-TAX-GST"),
    },
    NarrationRule {
        name: "income_tax",
        keywords: &["TDS", "INCOMETAX", "INCOME TAX", "ADVANCE TAX"],
        credit: None,
        debit: Some("EXP-TAX-INC"),
    },
    NarrationRule {
        name: "professional_tax",
        keywords: &["PROFESSIONAL TAX", "PTAX"],
        credit: None,
        debit: Some("EXP-TAX-PT"),
    },
    NarrationRule {
        name: "payroll",
        keywords: &["SALARY", "PAYROLL", "SAL"],
        credit: None,
        debit: Some("EXP-GA-SAL"),
    },
    NarrationRule {
        name: "statutory_benefits",
        keywords: &["EPFO", "ESIC", "PROVIDENT FUND"],
        credit: None,
        debit: Some("EXP-GA-PAYROLL"),
    },
    NarrationRule {
        name: "rent",
        keywords: &["RENT"],
        credit: Some("INC-RENT"),
        debit: Some("EXP-GA-RENT"),
    },
    NarrationRule {
        name: "utilities",
        keywords: &["BESCOM", "TATA POWER", "TATAPOWER", "ADANI ELECTRICITY", "TORRENT POWER", "MSEDCL", "ELECTRICITY"],
        credit: None,
        debit: Some("EXP-GA-UTIL"),
    },
    NarrationRule {
        name: "telecom",
        keywords: &["AIRTEL", "JIO", "VODAFONE", "VI", "IDEA", "BSNL"],
        credit: None,
        debit: Some("EXP-GA-COMM"),
    },
    NarrationRule {
        name: "travel_and_meals",
        keywords: &["UBER", "OLA", "SWIGGY", "ZOMATO", "MAKEMYTRIP", "IRCTC", "INDIGO"],
        credit: None,
        debit: Some("EXP-GA-TRAVEL"),
    },
    NarrationRule {
        name: "fuel",
        keywords: &["DIESEL", "PETROL", "FUEL", "HPCL", "BPCL", "IOCL"],
        credit: None,
        debit: Some("EXP-GA-TRAVEL"),
    },
    NarrationRule {
        name: "cloud",
        keywords: &["AMAZON WEB SERVICES", "AWS", "GOOGLE CLOUD", "AZURE", "DIGITALOCEAN"],
        credit: None,
        debit: Some("EXP-IT-CLOUD"),
    },
    NarrationRule {
        name: "devops",
        keywords: &["GITHUB", "GITLAB", "ATLASSIAN", "JIRA"],
        credit: None,
        debit: Some("EXP-IT-DEVOPS"),
    },
    NarrationRule {
        name: "software",
        keywords: &["ZOHO", "FRESHWORKS", "MICROSOFT", "ADOBE"],
        credit: None,
        debit: Some("EXP-IT-SW"),
    },
    NarrationRule {
        name: "payment_gateway",
        keywords: &["RAZORPAY", "CASHFREE", "PAYU", "STRIPE"],
        credit: Some("INC-SAAS"),
        debit: Some("EXP-IT-PG"),
    },
    NarrationRule {
        name: "ecommerce",
        keywords: &["AMAZON", "FLIPKART"],
        credit: None,
        debit: Some("EXP-GA-SUPPLY"),
    },
    NarrationRule {
        name: "insurance",
        keywords: &["LIC", "HDFC ERGO", "ICICI LOMBARD", "BAJAJ ALLIANZ"],
        credit: None,
        debit: Some("EXP-GA-INS"),
    },
    NarrationRule {
        name: "donation",
        keywords: &["DONATION", "PM CARES"],
        credit: None,
        debit: Some("EXP-OTH-CSR"),
    },
];

/// Find the first rule whose keyword occurs in the narration and which has
/// a code for this direction.
pub fn match_narration(
    narration: &str,
    direction: TransactionDirection,
    taxonomy: &Taxonomy,
) -> Option<RuleMatch> {
    let haystack = tokens(narration);
    if haystack.is_empty() {
        return None;
    }

    NARRATION_RULES.iter().find_map(|rule| {
        let code = rule.code_for(direction)?;
        let keyword = rule
            .keywords
            .iter()
            .find(|keyword| contains_phrase(&haystack, keyword, GLUE_MIN_LEN))?;
        Some(RuleMatch {
            code: taxonomy.resolve(code)?,
            rule: rule.name,
            keyword,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categorize(narration: &str, direction: TransactionDirection) -> Option<&'static str> {
        match_narration(narration, direction, Taxonomy::standard()).map(|hit| hit.code.as_str())
    }

    #[test]
    fn test_every_rule_code_is_in_taxonomy() {
        let taxonomy = Taxonomy::standard();
        for rule in NARRATION_RULES {
            for code in [rule.credit, rule.debit].into_iter().flatten() {
                assert!(taxonomy.contains(code), "{} -> {}", rule.name, code);
            }
        }
    }

    #[test]
    fn test_merchant_patterns() {
        use TransactionDirection::*;
        assert_eq!(categorize("UPI/SWIGGY8812@ybl", Debit), Some("EXP-GA-TRAVEL"));
        assert_eq!(categorize("NACH DR AIRTEL POSTPAID", Debit), Some("EXP-GA-COMM"));
        assert_eq!(categorize("AMAZON WEB SERVICES INV 99", Debit), Some("EXP-IT-CLOUD"));
        assert_eq!(categorize("AMAZON PAY INDIA", Debit), Some("EXP-GA-SUPPLY"));
        assert_eq!(categorize("BESCOM BILL 4411", Debit), Some("EXP-GA-UTIL"));
    }

    #[test]
    fn test_direction_specific_codes() {
        use TransactionDirection::*;
        assert_eq!(categorize("RAZORPAY SETTLEMENT", Credit), Some("INC-SAAS"));
        assert_eq!(categorize("RAZORPAY FEES", Debit), Some("EXP-IT-PG"));
        assert_eq!(categorize("INTEREST CREDIT Q3", Credit), Some("INC-INT"));
        assert_eq!(categorize("SALARY MAR 2025", Credit), None);
    }

    #[test]
    fn test_internal_transfer_wins_over_merchants() {
        assert_eq!(
            categorize("IMPS SELF TRANSFER AMAZON", TransactionDirection::Debit),
            Some("TRANSFER-INTERNAL")
        );
    }

    #[test]
    fn test_generic_narration_has_no_rule() {
        assert_eq!(
            categorize("NEFT DR RAMESH KUMAR 88123", TransactionDirection::Debit),
            None
        );
        assert_eq!(categorize("", TransactionDirection::Debit), None);
    }

    #[test]
    fn test_hit_reports_rule_and_keyword() {
        let hit = match_narration(
            "ACH GST PMT CHALLAN",
            TransactionDirection::Debit,
            Taxonomy::standard(),
        )
        .unwrap();
        assert_eq!(hit.rule, "gst");
        assert_eq!(hit.keyword, "GST");
    }
}
