// mailsentry/src/detectors/sender.rs
//
// Sender authenticity detector (rule-based, never fails).
//
// Impersonation mail names a trusted brand in the subject, body or display
// name but is sent from a domain that brand does not own.  The allowlist maps
// each brand to the domains it legitimately sends from; anything else naming
// the brand is suspect, and a domain that *almost* spells the brand is worse.
//
// Score contributions (summed, capped at 100, positive when > 40):
//   brand_domain_mismatch:  +40   mentions "paypal", sent from example.net
//   lookalike_domain:       +35   paypa1.com, paypal-secure.com
//   display_name_spoof:     +25   "service@paypal.com" <x@evil.ru>
//   freemail_org_sender:    +20   "Security Team" <x@gmail.com>
//   unparseable_sender:     +15   no domain in the From field

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Detector, RiskScore};
use crate::item::{DetectorError, Item, Verdict};

const THRESHOLD: u32 = 40;

const W_BRAND_MISMATCH: u32 = 40;
const W_LOOKALIKE: u32 = 35;
const W_DISPLAY_SPOOF: u32 = 25;
const W_FREEMAIL_ORG: u32 = 20;
const W_UNPARSEABLE: u32 = 15;

const FREEMAIL: &[&str] = &[
    "gmail.com", "googlemail.com", "yahoo.com", "hotmail.com", "outlook.com",
    "live.com", "aol.com", "proton.me", "protonmail.com", "gmx.com", "gmx.net",
    "mail.ru", "yandex.ru", "icloud.com", "zoho.com",
];

const ORG_TERMS: &[&str] = &[
    "support", "security", "team", "billing", "service", "bank", "admin",
    "helpdesk", "it department", "payroll", "account",
];

/// A brand and the domains it legitimately sends mail from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedDomain {
    pub brand: String,
    pub domains: Vec<String>,
}

impl ExpectedDomain {
    pub fn new(brand: &str, domains: &[&str]) -> Self {
        Self {
            brand: brand.to_ascii_lowercase(),
            domains: domains.iter().map(|d| d.to_ascii_lowercase()).collect(),
        }
    }

    fn owns(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| {
            domain == d || (domain.ends_with(d.as_str()) && domain[..domain.len() - d.len()].ends_with('.'))
        })
    }

    /// Brand with spaces and punctuation removed, as it would appear in a hostname.
    fn compact(&self) -> String {
        self.brand.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }
}

pub fn default_expected_domains() -> Vec<ExpectedDomain> {
    vec![
        ExpectedDomain::new("paypal", &["paypal.com"]),
        ExpectedDomain::new("microsoft", &["microsoft.com", "office.com", "outlook.com", "live.com"]),
        ExpectedDomain::new("apple", &["apple.com", "icloud.com"]),
        ExpectedDomain::new("amazon", &["amazon.com", "amazon.co.uk", "amazon.de"]),
        ExpectedDomain::new("google", &["google.com", "accounts.google.com"]),
        ExpectedDomain::new("netflix", &["netflix.com"]),
        ExpectedDomain::new("dhl", &["dhl.com", "dhl.de"]),
        ExpectedDomain::new("fedex", &["fedex.com"]),
        ExpectedDomain::new("docusign", &["docusign.com", "docusign.net"]),
        ExpectedDomain::new("linkedin", &["linkedin.com"]),
        ExpectedDomain::new("chase", &["chase.com"]),
        ExpectedDomain::new("wells fargo", &["wellsfargo.com"]),
        ExpectedDomain::new("bank of america", &["bankofamerica.com"]),
    ]
}

/// True when `needle` occurs in `haystack` on word boundaries.
/// Both are expected to be lowercase already.
fn mentions(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, m)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + m.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
    })
}

/// Undo the usual digit-for-letter substitutions (`paypa1` → `paypal`).
fn deglyph(label: &str) -> String {
    label
        .replace("rn", "m")
        .replace("vv", "w")
        .chars()
        .map(|c| match c {
            '0' => 'o',
            '1' => 'l',
            '3' => 'e',
            '4' => 'a',
            '5' => 's',
            '7' => 't',
            c => c,
        })
        .collect()
}

// ── Detector ──────────────────────────────────────────────────────────────────

pub struct SenderDetector {
    name: String,
    expected: Vec<ExpectedDomain>,
}

impl SenderDetector {
    pub fn new(expected: Vec<ExpectedDomain>) -> Self {
        Self::named("sender", expected)
    }

    pub fn named(name: impl Into<String>, expected: Vec<ExpectedDomain>) -> Self {
        Self { name: name.into(), expected }
    }

    fn lookalike(&self, domain: &str) -> Option<&ExpectedDomain> {
        let labels: Vec<&str> = domain.split('.').collect();
        let host_labels = &labels[..labels.len().saturating_sub(1)];
        self.expected.iter().filter(|e| !e.owns(domain)).find(|e| {
            let brand = e.compact();
            host_labels.iter().any(|label| {
                let plain: String = label.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
                plain != brand
                    && (plain.contains(brand.as_str()) || deglyph(&plain).contains(brand.as_str()))
            })
        })
    }

    pub fn score(&self, item: &Item) -> Verdict {
        let mut risk = RiskScore::default();

        let Some(domain) = item.sender_domain() else {
            risk.add(W_UNPARSEABLE, "unparseable_sender");
            return risk.into_verdict(THRESHOLD);
        };
        let display = item.sender_display_name().map(str::to_lowercase).unwrap_or_default();
        let text = format!("{}\n{}\n{}", item.subject, item.body_text, display).to_lowercase();

        let mentioned: Vec<&ExpectedDomain> =
            self.expected.iter().filter(|e| mentions(&text, &e.brand)).collect();
        if !mentioned.is_empty() && !mentioned.iter().any(|e| e.owns(&domain)) {
            risk.add(
                W_BRAND_MISMATCH,
                format!("brand_domain_mismatch:{}!={}", mentioned[0].brand, domain),
            );
        }

        if let Some(e) = self.lookalike(&domain) {
            risk.add(W_LOOKALIKE, format!("lookalike_domain:{}~{}", domain, e.brand));
        }

        if let Some((_, shown)) = display.rsplit_once('@') {
            let shown = shown.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '-');
            if !shown.is_empty() && shown != domain {
                risk.add(W_DISPLAY_SPOOF, format!("display_name_spoof:{}", shown));
            }
        }

        let org_like = ORG_TERMS.iter().any(|t| mentions(&display, t))
            || self.expected.iter().any(|e| mentions(&display, &e.brand));
        let owned_freemail = self.expected.iter().any(|e| e.owns(&domain) && mentions(&display, &e.brand));
        if org_like && FREEMAIL.contains(&domain.as_str()) && !owned_freemail {
            risk.add(W_FREEMAIL_ORG, format!("freemail_org_sender:{}", domain));
        }

        risk.into_verdict(THRESHOLD)
    }
}

impl Default for SenderDetector {
    fn default() -> Self {
        Self::new(default_expected_domains())
    }
}

#[async_trait]
impl Detector for SenderDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, item: &Item, _deadline: Instant) -> Result<Verdict, DetectorError> {
        Ok(self.score(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(sender: &str, body: &str) -> Item {
        Item::new("Your account", sender, body, "")
    }

    #[test]
    fn word_boundary_mentions() {
        assert!(mentions("log in to paypal now", "paypal"));
        assert!(!mentions("fresh pineapple juice", "apple"));
        assert!(mentions("bank of america: alert", "bank of america"));
    }

    #[test]
    fn owned_domains_include_subdomains() {
        let e = ExpectedDomain::new("paypal", &["paypal.com"]);
        assert!(e.owns("paypal.com"));
        assert!(e.owns("mail.paypal.com"));
        assert!(!e.owns("notpaypal.com"));
    }

    #[test]
    fn legitimate_brand_mail_is_clean() {
        let v = SenderDetector::default().score(&mail("service@paypal.com", "Your PayPal receipt"));
        assert!(!v.is_positive);
        assert_eq!(v.confidence, 0);
    }

    #[test]
    fn lookalike_impersonation_is_positive() {
        let v = SenderDetector::default()
            .score(&mail("PayPal Service <service@paypa1-secure.com>", "Confirm your PayPal details"));
        // mismatch 40 + lookalike 35
        assert!(v.is_positive);
        assert_eq!(v.confidence, 75);
        assert_eq!(v.indicators[0], "brand_domain_mismatch:paypal!=paypa1-secure.com");
        assert!(v.indicators[1].starts_with("lookalike_domain:"));
    }

    #[test]
    fn digit_substitution_is_a_lookalike() {
        let d = SenderDetector::default();
        assert_eq!(d.lookalike("paypa1.com").map(|e| e.brand.as_str()), Some("paypal"));
        assert!(d.lookalike("paypal.com").is_none());
        assert!(d.lookalike("example.org").is_none());
    }

    #[test]
    fn freemail_security_team_and_spoofed_display() {
        let v = SenderDetector::default()
            .score(&mail("\"security@bank.example\" <alerts.team@gmail.com>", "Please respond"));
        assert!(v.indicators.iter().any(|i| i == "display_name_spoof:bank.example"));
        assert!(v.indicators.iter().any(|i| i == "freemail_org_sender:gmail.com"));
        assert!(v.is_positive); // 25 + 20
    }

    #[test]
    fn missing_sender_is_a_weak_signal_only() {
        let v = SenderDetector::default().score(&mail("", "hello"));
        assert!(!v.is_positive);
        assert_eq!(v.indicators, vec!["unparseable_sender"]);
    }
}
