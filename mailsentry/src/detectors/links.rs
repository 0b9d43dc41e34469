// mailsentry/src/detectors/links.rs
//
// Link heuristics detector (rule-based, never fails).
//
// Phishing mail nearly always carries the payload as a link.  The link is
// disguised so a human reader does not notice where it really goes:
// shortened, pointed at a bare IP, or rendered with anchor text that shows a
// different (trusted) domain than the href.
//
// Score contributions (summed, capped at 100, positive when > 40):
//   ip_literal_url:       +35   http://192.168.4.20/login
//   anchor_mismatch:      +35   <a href="evil.ru">www.paypal.com</a>
//   url_shortener:        +30   bit.ly, tinyurl.com, ...
//   userinfo_in_url:      +25   http://paypal.com@evil.ru/
//   suspicious_tld:       +15   .zip .top .xyz .tk ...
//   plain_http:           +10   non-TLS link
//   link_flood:           +10   ≥ 10 distinct links

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;

use super::{Detector, RiskScore};
use crate::item::{DetectorError, Item, Verdict};

const THRESHOLD: u32 = 40;

const W_IP_LITERAL: u32 = 35;
const W_ANCHOR_MISMATCH: u32 = 35;
const W_SHORTENER: u32 = 30;
const W_USERINFO: u32 = 25;
const W_SUSPICIOUS_TLD: u32 = 15;
const W_PLAIN_HTTP: u32 = 10;
const W_LINK_FLOOD: u32 = 10;

const LINK_FLOOD: usize = 10;

const SHORTENERS: &[&str] = &[
    "bit.ly", "tinyurl.com", "goo.gl", "t.co", "ow.ly", "is.gd", "buff.ly",
    "rebrand.ly", "cutt.ly", "shorturl.at", "tiny.cc", "rb.gy", "t.ly",
    "s.id", "bl.ink", "lnkd.in",
];

const SUSPICIOUS_TLDS: &[&str] = &[
    "zip", "mov", "top", "xyz", "tk", "ml", "ga", "cf", "gq", "click", "country",
    "work", "rest", "cam",
];

static URL_RE: OnceLock<Regex> = OnceLock::new();
static ANCHOR_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();

fn url_re() -> &'static Regex {
    URL_RE.get_or_init(|| Regex::new(r#"(?i)\bhttps?://[^\s"'<>()]+"#).expect("url regex"))
}

fn anchor_re() -> &'static Regex {
    ANCHOR_RE.get_or_init(|| {
        Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
            .expect("anchor regex")
    })
}

pub(crate) fn tag_re() -> &'static Regex {
    TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"))
}

// ── URL helpers ───────────────────────────────────────────────────────────────

/// Parsed pieces of a link that the heuristics care about.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct LinkParts {
    pub https: bool,
    pub has_userinfo: bool,
    pub host: String,
}

pub(crate) fn parse_link(url: &str) -> Option<LinkParts> {
    let lower = url.trim().to_ascii_lowercase();
    let (https, rest) = if let Some(r) = lower.strip_prefix("https://") {
        (true, r)
    } else if let Some(r) = lower.strip_prefix("http://") {
        (false, r)
    } else if lower.starts_with("www.") {
        (false, lower.as_str())
    } else {
        return None;
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let (has_userinfo, hostport) = match authority.rsplit_once('@') {
        Some((_, h)) => (true, h),
        None => (false, authority),
    };
    let host = if let Some(v6) = hostport.strip_prefix('[') {
        format!("[{}]", v6.split(']').next().unwrap_or(""))
    } else {
        hostport.split(':').next().unwrap_or("").trim_end_matches('.').to_string()
    };
    if host.is_empty() {
        return None;
    }
    Some(LinkParts { https, has_userinfo, host })
}

pub(crate) fn is_ip_literal(host: &str) -> bool {
    host.starts_with('[') || host.parse::<Ipv4Addr>().is_ok()
}

/// Last two labels of a host (`login.paypal.com` → `paypal.com`).
pub(crate) fn base_domain(host: &str) -> String {
    let labels: Vec<&str> = host.trim_end_matches('.').rsplit('.').take(2).collect();
    labels.into_iter().rev().collect::<Vec<_>>().join(".")
}

fn tld(host: &str) -> &str {
    host.rsplit('.').next().unwrap_or("")
}

/// Anchor text that itself looks like a link or a bare domain.
fn displayed_host(text: &str) -> Option<String> {
    let t = text.trim();
    if t.contains(char::is_whitespace) || !t.contains('.') {
        return None;
    }
    if let Some(p) = parse_link(t) {
        return Some(p.host);
    }
    let host = t.split('/').next()?.to_ascii_lowercase();
    let tld = tld(&host);
    (tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())).then_some(host)
}

// ── Detector ──────────────────────────────────────────────────────────────────

pub struct LinkDetector {
    name: String,
}

impl LinkDetector {
    pub fn new() -> Self {
        Self::named("links")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn score(&self, item: &Item) -> Verdict {
        let mut risk = RiskScore::default();

        let text = item.combined_text();
        // Distinct links in document order, so indicators are reproducible.
        let mut seen = HashSet::new();
        let links: Vec<LinkParts> = url_re()
            .find_iter(&text)
            .map(|m| m.as_str())
            .filter(|u| seen.insert(*u))
            .filter_map(parse_link)
            .collect();

        if let Some(l) = links.iter().find(|l| is_ip_literal(&l.host)) {
            risk.add(W_IP_LITERAL, format!("ip_literal_url:{}", l.host));
        }

        let mismatch = anchor_re().captures_iter(&item.body_html).find_map(|c| {
            let href = parse_link(c.get(1)?.as_str())?;
            let inner = tag_re().replace_all(c.get(2)?.as_str(), "");
            let shown = displayed_host(&inner)?;
            (base_domain(&shown) != base_domain(&href.host)).then(|| (shown, href.host))
        });
        if let Some((shown, actual)) = mismatch {
            risk.add(W_ANCHOR_MISMATCH, format!("anchor_mismatch:{}->{}", shown, actual));
        }

        if let Some(l) = links.iter().find(|l| SHORTENERS.contains(&l.host.trim_start_matches("www."))) {
            risk.add(W_SHORTENER, format!("url_shortener:{}", l.host));
        }

        if links.iter().any(|l| l.has_userinfo) {
            risk.add(W_USERINFO, "userinfo_in_url");
        }

        if let Some(l) = links
            .iter()
            .find(|l| !is_ip_literal(&l.host) && SUSPICIOUS_TLDS.contains(&tld(&l.host)))
        {
            risk.add(W_SUSPICIOUS_TLD, format!("suspicious_tld:.{}", tld(&l.host)));
        }

        if links.iter().any(|l| !l.https) {
            risk.add(W_PLAIN_HTTP, "plain_http_link");
        }

        if links.len() >= LINK_FLOOD {
            risk.add(W_LINK_FLOOD, format!("link_flood:{}", links.len()));
        }

        risk.into_verdict(THRESHOLD)
    }
}

impl Default for LinkDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for LinkDetector {
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

    fn body(text: &str, html: &str) -> Item {
        Item::new("Account notice", "support@example.com", text, html)
    }

    #[test]
    fn parses_hosts_userinfo_and_ports() {
        let p = parse_link("https://paypal.com@10.0.0.1:8080/login").unwrap();
        assert!(p.https && p.has_userinfo);
        assert_eq!(p.host, "10.0.0.1");
        assert!(is_ip_literal(&p.host));
        assert_eq!(parse_link("mailto:x@y.z"), None);
        assert_eq!(base_domain("login.secure.paypal.com"), "paypal.com");
    }

    #[test]
    fn clean_mail_scores_zero() {
        let v = LinkDetector::new().score(&body("See you at lunch tomorrow.", ""));
        assert!(!v.is_positive);
        assert_eq!(v.confidence, 0);
        assert!(v.indicators.is_empty());
    }

    #[test]
    fn ip_literal_over_http_is_positive() {
        let v = LinkDetector::new().score(&body("Verify now: http://192.168.4.20/login", ""));
        // 35 + 10 = 45 > 40
        assert!(v.is_positive);
        assert_eq!(v.confidence, 45);
        assert_eq!(v.indicators[0], "ip_literal_url:192.168.4.20");
    }

    #[test]
    fn anchor_text_showing_other_domain_is_flagged() {
        let html = r#"<p>Click <a href="https://secure-login.top/x">https://www.paypal.com/signin</a></p>"#;
        let v = LinkDetector::new().score(&body("", html));
        // mismatch 35 + suspicious tld 15
        assert!(v.is_positive);
        assert!(v.indicators.iter().any(|i| i.starts_with("anchor_mismatch:www.paypal.com")));
        assert!(v.indicators.iter().any(|i| i == "suspicious_tld:.top"));
    }

    #[test]
    fn matching_anchor_is_not_a_mismatch() {
        let html = r#"<a href="https://www.example.com/a">example.com</a>"#;
        let v = LinkDetector::new().score(&body("", html));
        assert!(!v.indicators.iter().any(|i| i.starts_with("anchor_mismatch")));
    }

    #[test]
    fn shortener_alone_stays_below_threshold() {
        let v = LinkDetector::new().score(&body("details: https://bit.ly/3xYz", ""));
        assert!(!v.is_positive);
        assert_eq!(v.confidence, 30);
    }
}
