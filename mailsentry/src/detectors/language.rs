// mailsentry/src/detectors/language.rs
//
// Social-engineering language detector (rule-based, never fails).
// Aho-Corasick automaton: O(n) per item regardless of phrase count.
//
// Phishing copy pressures the reader (urgency, threats), asks for secrets
// (credentials, card numbers) and rarely knows the recipient's name
// ("Dear Customer").  Each phrase belongs to one category; a category fires
// once no matter how many of its phrases match.
//
// Score contributions (summed, capped at 100, positive when > 45):
//   credential_request:   +30
//   urgency:              +15   (one phrase)  / +25 (two or more)
//   threat:               +20
//   generic_greeting:     +15   in the opening line
//   reward_lure:          +15
//   keyword_density:      +10   ≥ 3 hits per 100 words
//   shouting_subject:     +10   mostly upper-case subject or "!!"

use std::collections::BTreeSet;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use async_trait::async_trait;
use tokio::time::Instant;

use super::links::tag_re;
use super::{Detector, RiskScore};
use crate::item::{DetectorError, Item, Verdict};

const THRESHOLD: u32 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Category {
    Credential,
    Urgency,
    Threat,
    Reward,
}

static PHRASE_AC: OnceLock<(AhoCorasick, Vec<Category>)> = OnceLock::new();
static GREETING_AC: OnceLock<AhoCorasick> = OnceLock::new();

// Phrase → category pairs
const PHRASES: &[(&str, Category)] = &[
    ("verify your account", Category::Credential),
    ("verify your identity", Category::Credential),
    ("confirm your identity", Category::Credential),
    ("confirm your password", Category::Credential),
    ("enter your password", Category::Credential),
    ("reset your password", Category::Credential),
    ("update your payment", Category::Credential),
    ("update your billing", Category::Credential),
    ("login credentials", Category::Credential),
    ("sign in to verify", Category::Credential),
    ("social security number", Category::Credential),
    ("credit card number", Category::Credential),
    ("bank details", Category::Credential),
    ("validate your account", Category::Credential),
    ("one-time code", Category::Credential),
    ("urgent", Category::Urgency),
    ("immediately", Category::Urgency),
    ("within 24 hours", Category::Urgency),
    ("within 48 hours", Category::Urgency),
    ("act now", Category::Urgency),
    ("expires today", Category::Urgency),
    ("final notice", Category::Urgency),
    ("as soon as possible", Category::Urgency),
    ("right away", Category::Urgency),
    ("limited time", Category::Urgency),
    ("action required", Category::Urgency),
    ("suspended", Category::Threat),
    ("will be locked", Category::Threat),
    ("has been locked", Category::Threat),
    ("unauthorized access", Category::Threat),
    ("unusual activity", Category::Threat),
    ("legal action", Category::Threat),
    ("will be closed", Category::Threat),
    ("will be terminated", Category::Threat),
    ("security alert", Category::Threat),
    ("you have won", Category::Reward),
    ("claim your prize", Category::Reward),
    ("gift card", Category::Reward),
    ("lottery", Category::Reward),
    ("pending refund", Category::Reward),
    ("inheritance", Category::Reward),
];

const GREETINGS: &[&str] = &[
    "dear customer",
    "dear valued customer",
    "dear user",
    "dear account holder",
    "dear member",
    "dear client",
    "dear sir/madam",
    "dear sir or madam",
    "hello user",
    "dear email user",
];

fn phrase_automaton() -> &'static (AhoCorasick, Vec<Category>) {
    PHRASE_AC.get_or_init(|| {
        let patterns: Vec<&str> = PHRASES.iter().map(|(p, _)| *p).collect();
        let labels: Vec<Category> = PHRASES.iter().map(|(_, c)| *c).collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)
            .expect("phrase AC build failed");
        (ac, labels)
    })
}

fn greeting_automaton() -> &'static AhoCorasick {
    GREETING_AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(GREETINGS)
            .expect("greeting AC build failed")
    })
}

fn visible_body(item: &Item) -> String {
    if item.body_text.trim().is_empty() {
        tag_re().replace_all(&item.body_html, " ").into_owned()
    } else {
        item.body_text.clone()
    }
}

fn shouting(subject: &str) -> bool {
    if subject.contains("!!") {
        return true;
    }
    let letters: Vec<char> = subject.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 8 && letters.iter().filter(|c| c.is_uppercase()).count() * 10 >= letters.len() * 8
}

// ── Detector ──────────────────────────────────────────────────────────────────

pub struct LanguageDetector {
    name: String,
}

impl LanguageDetector {
    pub fn new() -> Self {
        Self::named("language")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn score(&self, item: &Item) -> Verdict {
        let (ac, labels) = phrase_automaton();
        let body = visible_body(item);
        let text = format!("{}\n{}", item.subject, body);

        let mut hits = 0usize;
        let mut urgency = 0usize;
        let mut fired: BTreeSet<Category> = BTreeSet::new();
        let mut first: Vec<(Category, &str)> = Vec::new();
        for m in ac.find_iter(&text) {
            let cat = labels[m.pattern().as_usize()];
            hits += 1;
            if cat == Category::Urgency {
                urgency += 1;
            }
            if fired.insert(cat) {
                first.push((cat, PHRASES[m.pattern().as_usize()].0));
            }
        }
        first.sort_by_key(|(c, _)| *c);

        let mut risk = RiskScore::default();
        for (cat, phrase) in first {
            match cat {
                Category::Credential => risk.add(30, format!("credential_request:{}", phrase)),
                Category::Urgency if urgency >= 2 => risk.add(25, format!("urgency:{}x", urgency)),
                Category::Urgency => risk.add(15, format!("urgency:{}", phrase)),
                Category::Threat => risk.add(20, format!("threat:{}", phrase)),
                Category::Reward => risk.add(15, format!("reward_lure:{}", phrase)),
            }
        }

        let opening: String = body.trim_start().chars().take(120).collect();
        if let Some(m) = greeting_automaton().find(opening.as_str()) {
            risk.add(15, format!("generic_greeting:{}", GREETINGS[m.pattern().as_usize()]));
        }

        let words = text.split_whitespace().count();
        if words > 0 {
            let density = hits as f32 * 100.0 / words as f32;
            if hits >= 2 && density >= 3.0 {
                risk.add(10, format!("keyword_density:{:.1}/100w", density));
            }
        }

        if shouting(&item.subject) {
            risk.add(10, "shouting_subject");
        }

        risk.into_verdict(THRESHOLD)
    }
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for LanguageDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, item: &Item, _deadline: Instant) -> Result<Verdict, DetectorError> {
        Ok(self.score(item))
    }
}
