//! Keyword-based domain guessing for when classification is unavailable.

use modeldoc_shared::ModelData;

const GENERAL: &str = "General";

/// Domains and the name fragments that suggest them, in tie-break order.
const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Sales",
        &["sales", "revenue", "order", "customer", "invoice", "quota", "deal", "opportunit"],
    ),
    (
        "Finance",
        &["budget", "forecast", "ledger", "account", "expense", "profit", "margin", "cash", "ebitda", "gl"],
    ),
    (
        "Human Resources",
        &["employee", "headcount", "hire", "attrition", "salary", "payroll", "turnover", "hr"],
    ),
    (
        "Inventory",
        &["inventory", "stock", "warehouse", "supplier", "shipment", "sku"],
    ),
    (
        "Marketing",
        &["campaign", "lead", "click", "impression", "conversion", "marketing", "channel"],
    ),
    (
        "Operations",
        &["production", "downtime", "ticket", "incident", "throughput", "defect", "sla"],
    ),
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Short keywords must match a whole word; longer ones may prefix-match
/// inside one (`customer` in `customerid`).
fn keyword_hits(word: &str, keyword: &str) -> bool {
    if keyword.len() <= 3 {
        word == keyword
    } else {
        word.contains(keyword)
    }
}

/// Guess the business domain from table and measure names.
pub fn guess_domain(model: &ModelData) -> &'static str {
    let names = model
        .tables
        .iter()
        .map(|t| t.name.as_str())
        .chain(model.measures.iter().map(|m| m.name.as_str()));

    let mut scores = vec![0usize; DOMAIN_KEYWORDS.len()];
    for name in names {
        for word in words(name) {
            for (i, (_, keywords)) in DOMAIN_KEYWORDS.iter().enumerate() {
                if keywords.iter().any(|k| keyword_hits(&word, k)) {
                    scores[i] += 1;
                }
            }
        }
    }

    let best = scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > 0)
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)));
    best.map_or(GENERAL, |(i, _)| DOMAIN_KEYWORDS[i].0)
}

/// Default audience for a domain.
pub fn default_stakeholders(domain: &str) -> Vec<String> {
    let list: &[&str] = match domain.to_lowercase().as_str() {
        "sales" => &["Sales Leadership", "Account Managers", "Sales Operations"],
        "finance" => &["CFO", "Financial Analysts", "Controllers"],
        "human resources" | "hr" => &["HR Leadership", "People Analytics", "Hiring Managers"],
        "inventory" => &["Supply Chain Managers", "Warehouse Operations", "Procurement"],
        "marketing" => &["Marketing Leadership", "Campaign Managers", "Growth Analysts"],
        "operations" => &["Operations Managers", "Process Owners", "Service Delivery"],
        _ => &["Business Analysts", "Report Consumers", "Data Owners"],
    };
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldoc_shared::{Measure, Table, TableRole};

    fn model(tables: &[&str], measures: &[&str]) -> ModelData {
        ModelData {
            tables: tables
                .iter()
                .map(|n| Table {
                    name: n.to_string(),
                    row_count: None,
                    description: String::new(),
                    is_hidden: false,
                    role: TableRole::Dimension,
                })
                .collect(),
            measures: measures
                .iter()
                .map(|n| Measure {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn guesses_from_names() {
        assert_eq!(guess_domain(&model(&["Sales", "Customer"], &["Total Revenue"])), "Sales");
        assert_eq!(guess_domain(&model(&["Employees"], &["Attrition Rate", "Headcount"])), "Human Resources");
        assert_eq!(guess_domain(&model(&["GL Entries"], &["Budget Variance"])), "Finance");
        assert_eq!(guess_domain(&model(&["Things"], &["Stuff"])), "General");
        assert_eq!(guess_domain(&ModelData::default()), "General");
    }

    #[test]
    fn short_keywords_need_whole_words() {
        // "glass" must not count as the finance keyword "gl".
        assert_eq!(guess_domain(&model(&["Glassware"], &[])), "General");
    }

    #[test]
    fn stakeholders_have_a_default() {
        assert_eq!(default_stakeholders("Finance")[0], "CFO");
        assert_eq!(default_stakeholders("Astrology").len(), 3);
    }
}
