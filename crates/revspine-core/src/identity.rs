//! Identity resolver: the CRM-account / billing-customer crosswalk
//!
//! Three deterministic passes build the identity spine:
//! 1. exact - normalized name equality
//! 2. fuzzy - token-set similarity with greedy assignment; high scores
//!    auto-confirm, mid scores queue for operator review
//! 3. email - unique one-to-one email-domain matches
//!
//! [`resolve`] is a pure function of (accounts, customers, decision log).
//! Arbitration never mutates the match set; it only appends decisions, so
//! undo and reset are trivial replays.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{AccountRow, CustomerRow, Decision, ReviewDecision};

/// Corporate suffixes dropped from the end of a name during normalization
const SUFFIXES: [&str; 10] = [
    "inc", "llc", "ltd", "gmbh", "plc", "pty", "co", "corp", "sa", "bv",
];

/// Fuzzy scores at or above this are kept as candidates
const FUZZY_REVIEW_MIN: f64 = 0.75;
/// Fuzzy scores at or above this auto-confirm without review
const FUZZY_AUTO_MIN: f64 = 0.95;
/// Confidence assigned to email-domain matches
const EMAIL_CONFIDENCE: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    FuzzyConfirmed,
    EmailSignal,
    Unmatched,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::FuzzyConfirmed => "fuzzy_confirmed",
            Self::EmailSignal => "email_signal",
            Self::Unmatched => "unmatched",
        }
    }

    /// Counts toward the entity match rate
    pub fn is_linked(&self) -> bool {
        !matches!(self, Self::Unmatched)
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "fuzzy_confirmed" => Ok(Self::FuzzyConfirmed),
            "email_signal" => Ok(Self::EmailSignal),
            "unmatched" => Ok(Self::Unmatched),
            _ => Err(format!(
                "Unknown match type '{}'. Allowed: exact, fuzzy_confirmed, email_signal, unmatched",
                s
            )),
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the identity spine. Every account appears exactly once;
/// unmatched accounts carry no customer side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityLink {
    pub rsx_id: String,
    pub account_id: String,
    pub account_name: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub evidence: String,
}

/// A fuzzy pair awaiting operator arbitration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub match_id: String,
    pub account_id: String,
    pub account_name: String,
    pub customer_id: String,
    pub customer_name: String,
    pub confidence: f64,
    pub evidence: String,
}

/// An entity left on the floor after all three passes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedEntity {
    pub id: String,
    pub name: String,
}

/// Full output of [`resolve`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityOutcome {
    /// All accounts, sorted by account_id, with deterministic rsx ids
    pub spine: Vec<IdentityLink>,
    /// Links produced without operator input (exact, high fuzzy, email)
    pub auto_matched: Vec<IdentityLink>,
    /// Every fuzzy candidate in the review band, descending confidence
    pub needs_review: Vec<MatchCandidate>,
    /// Candidates with no decision yet, descending confidence
    pub pending_review: Vec<MatchCandidate>,
    pub unmatched_accounts: Vec<UnmatchedEntity>,
    pub unmatched_customers: Vec<UnmatchedEntity>,
}

impl IdentityOutcome {
    pub fn all_reviewed(&self) -> bool {
        self.pending_review.is_empty()
    }

    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            auto_matched: self.auto_matched.len(),
            needs_review: self.needs_review.len(),
            pending_review: self.pending_review.len(),
            unmatched_accounts: self.unmatched_accounts.len(),
            unmatched_customers: self.unmatched_customers.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub auto_matched: usize,
    pub needs_review: usize,
    pub pending_review: usize,
    pub unmatched_accounts: usize,
    pub unmatched_customers: usize,
}

// ========== Name normalization & similarity ==========

fn fold_diacritic(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'ñ' => "n",
        'ç' => "c",
        'æ' => "ae",
        'œ' => "oe",
        'ß' => "ss",
        _ => return None,
    };
    Some(folded)
}

/// Normalize a company name for comparison: lowercase, fold diacritics,
/// strip punctuation, collapse whitespace, and drop one trailing corporate
/// suffix. Returns a space-joined token string.
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut folded = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match fold_diacritic(c) {
            Some(s) => folded.push_str(s),
            None => folded.push(c),
        }
    }

    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();

    // A single-token name keeps its "suffix" - it IS the name.
    if tokens.len() > 1 && SUFFIXES.contains(tokens.last().unwrap()) {
        tokens.pop();
    }

    tokens.join(" ")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn edit_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Similarity of two normalized names in [0, 1].
///
/// Token-set Dice coefficient; single-token pairs fall back to normalized
/// edit-distance similarity.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    if ta.len() == 1 && tb.len() == 1 {
        return edit_similarity(a, b);
    }
    let common = ta.intersection(&tb).count();
    2.0 * common as f64 / (ta.len() + tb.len()) as f64
}

// ========== Resolution ==========

struct PreLink<'a> {
    account: &'a AccountRow,
    customer: Option<&'a CustomerRow>,
    match_type: MatchType,
    confidence: f64,
    evidence: String,
    auto: bool,
}

/// Resolve the identity spine from the two entity rowsets and the
/// append-only decision log. Deterministic: identical inputs and decisions
/// always produce an identical spine, ids included.
pub fn resolve(
    accounts: &[AccountRow],
    customers: &[CustomerRow],
    decisions: &[Decision],
) -> IdentityOutcome {
    let mut accounts: Vec<&AccountRow> = accounts.iter().collect();
    accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
    let mut customers: Vec<&CustomerRow> = customers.iter().collect();
    customers.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

    let account_norm: BTreeMap<&str, String> = accounts
        .iter()
        .map(|a| (a.account_id.as_str(), normalize_name(&a.account_name)))
        .collect();
    let customer_norm: BTreeMap<&str, String> = customers
        .iter()
        .map(|c| (c.customer_id.as_str(), normalize_name(&c.customer_name)))
        .collect();

    let mut claimed_accounts: BTreeSet<&str> = BTreeSet::new();
    let mut claimed_customers: BTreeSet<&str> = BTreeSet::new();
    let mut links: BTreeMap<&str, PreLink<'_>> = BTreeMap::new();

    // Pass 1: exact normalized-name equality. When several customers share
    // a normalized name, the lowest customer_id wins.
    let mut customers_by_norm: BTreeMap<&str, Vec<&CustomerRow>> = BTreeMap::new();
    for c in customers.iter().copied() {
        let norm = customer_norm[c.customer_id.as_str()].as_str();
        if !norm.is_empty() {
            customers_by_norm.entry(norm).or_default().push(c);
        }
    }

    for a in accounts.iter().copied() {
        let norm = account_norm[a.account_id.as_str()].as_str();
        if norm.is_empty() {
            continue;
        }
        if let Some(cands) = customers_by_norm.get(norm) {
            if let Some(c) = cands
                .iter()
                .copied()
                .find(|c| !claimed_customers.contains(c.customer_id.as_str()))
            {
                claimed_accounts.insert(a.account_id.as_str());
                claimed_customers.insert(c.customer_id.as_str());
                links.insert(
                    a.account_id.as_str(),
                    PreLink {
                        account: a,
                        customer: Some(c),
                        match_type: MatchType::Exact,
                        confidence: 1.0,
                        evidence: "normalized name equality".to_string(),
                        auto: true,
                    },
                );
            }
        }
    }

    // Pass 2: fuzzy. Score every remaining pair, keep the review band,
    // greedily assign in descending score with lexicographic tie-breaks.
    let mut pairs: Vec<(f64, &AccountRow, &CustomerRow)> = Vec::new();
    for a in accounts.iter().copied() {
        if claimed_accounts.contains(a.account_id.as_str()) {
            continue;
        }
        let an = account_norm[a.account_id.as_str()].as_str();
        if an.is_empty() {
            continue;
        }
        for c in customers.iter().copied() {
            if claimed_customers.contains(c.customer_id.as_str()) {
                continue;
            }
            let cn = customer_norm[c.customer_id.as_str()].as_str();
            if cn.is_empty() {
                continue;
            }
            let score = similarity(an, cn);
            if score >= FUZZY_REVIEW_MIN {
                pairs.push((score, a, c));
            }
        }
    }
    pairs.sort_by(|x, y| {
        y.0.partial_cmp(&x.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| x.1.account_id.cmp(&y.1.account_id))
            .then_with(|| x.2.customer_id.cmp(&y.2.customer_id))
    });

    let mut candidates: Vec<MatchCandidate> = Vec::new();
    for (score, a, c) in pairs {
        if claimed_accounts.contains(a.account_id.as_str())
            || claimed_customers.contains(c.customer_id.as_str())
        {
            continue;
        }
        claimed_accounts.insert(a.account_id.as_str());
        claimed_customers.insert(c.customer_id.as_str());

        if score >= FUZZY_AUTO_MIN {
            links.insert(
                a.account_id.as_str(),
                PreLink {
                    account: a,
                    customer: Some(c),
                    match_type: MatchType::FuzzyConfirmed,
                    confidence: score,
                    evidence: format!("token-set similarity {:.2}", score),
                    auto: true,
                },
            );
        } else {
            candidates.push(MatchCandidate {
                match_id: format!("FM-{:04}", candidates.len() + 1),
                account_id: a.account_id.clone(),
                account_name: a.account_name.clone(),
                customer_id: c.customer_id.clone(),
                customer_name: c.customer_name.clone(),
                confidence: score,
                evidence: format!("token-set similarity {:.2}", score),
            });
        }
    }

    // Pass 3: email signal. Only a strictly one-to-one domain pairing
    // among the still-unclaimed entities counts.
    let mut account_domains: BTreeMap<String, Vec<&AccountRow>> = BTreeMap::new();
    for a in accounts.iter().copied() {
        if claimed_accounts.contains(a.account_id.as_str()) {
            continue;
        }
        if let Some(domain) = &a.email_domain {
            account_domains.entry(domain.clone()).or_default().push(a);
        }
    }
    let mut customer_domains: BTreeMap<String, Vec<&CustomerRow>> = BTreeMap::new();
    for c in customers.iter().copied() {
        if claimed_customers.contains(c.customer_id.as_str()) {
            continue;
        }
        if let Some(domain) = &c.email_domain {
            customer_domains.entry(domain.clone()).or_default().push(c);
        }
    }

    for (domain, accs) in &account_domains {
        if accs.len() != 1 {
            continue;
        }
        let Some(custs) = customer_domains.get(domain) else {
            continue;
        };
        if custs.len() != 1 {
            continue;
        }
        let (a, c) = (accs[0], custs[0]);
        claimed_accounts.insert(a.account_id.as_str());
        claimed_customers.insert(c.customer_id.as_str());
        links.insert(
            a.account_id.as_str(),
            PreLink {
                account: a,
                customer: Some(c),
                match_type: MatchType::EmailSignal,
                confidence: EMAIL_CONFIDENCE,
                evidence: format!("shared email domain {}", domain),
                auto: true,
            },
        );
    }

    // Replay the decision log. Later decisions on the same match win;
    // undo works by popping the log and replaying.
    let mut effective: BTreeMap<&str, ReviewDecision> = BTreeMap::new();
    for d in decisions {
        effective.insert(d.match_id.as_str(), d.decision);
    }

    let customers_by_id: BTreeMap<&str, &CustomerRow> = customers
        .iter()
        .map(|c| (c.customer_id.as_str(), *c))
        .collect();
    let accounts_by_id: BTreeMap<&str, &AccountRow> = accounts
        .iter()
        .map(|a| (a.account_id.as_str(), *a))
        .collect();

    let mut pending: Vec<MatchCandidate> = Vec::new();
    for cand in &candidates {
        match effective.get(cand.match_id.as_str()) {
            Some(ReviewDecision::Confirmed) => {
                links.insert(
                    accounts_by_id[cand.account_id.as_str()].account_id.as_str(),
                    PreLink {
                        account: accounts_by_id[cand.account_id.as_str()],
                        customer: Some(customers_by_id[cand.customer_id.as_str()]),
                        match_type: MatchType::FuzzyConfirmed,
                        confidence: cand.confidence,
                        evidence: format!("operator confirmed ({})", cand.evidence),
                        auto: false,
                    },
                );
            }
            // A rejection simply leaves both sides unlinked
            Some(ReviewDecision::Rejected) => {}
            None => pending.push(cand.clone()),
        }
    }

    // Spine assembly: one link per account in ascending account_id order,
    // rsx ids assigned by that order.
    let mut spine = Vec::with_capacity(accounts.len());
    let mut auto_ids: BTreeSet<String> = BTreeSet::new();
    for (i, a) in accounts.iter().enumerate() {
        let rsx_id = format!("RSX-{:04}", i + 1);
        match links.get(a.account_id.as_str()) {
            Some(link) => {
                if link.auto {
                    auto_ids.insert(rsx_id.clone());
                }
                spine.push(IdentityLink {
                    rsx_id,
                    account_id: link.account.account_id.clone(),
                    account_name: link.account.account_name.clone(),
                    customer_id: link.customer.map(|c| c.customer_id.clone()),
                    customer_name: link.customer.map(|c| c.customer_name.clone()),
                    match_type: link.match_type,
                    confidence: link.confidence,
                    evidence: link.evidence.clone(),
                });
            }
            None => spine.push(IdentityLink {
                rsx_id,
                account_id: a.account_id.clone(),
                account_name: a.account_name.clone(),
                customer_id: None,
                customer_name: None,
                match_type: MatchType::Unmatched,
                confidence: 0.0,
                evidence: "no billing counterpart".to_string(),
            }),
        }
    }

    let auto_matched: Vec<IdentityLink> = spine
        .iter()
        .filter(|l| auto_ids.contains(&l.rsx_id))
        .cloned()
        .collect();

    let pending_account_ids: BTreeSet<&str> =
        pending.iter().map(|c| c.account_id.as_str()).collect();
    let pending_customer_ids: BTreeSet<&str> =
        pending.iter().map(|c| c.customer_id.as_str()).collect();

    let unmatched_accounts: Vec<UnmatchedEntity> = spine
        .iter()
        .filter(|l| {
            l.match_type == MatchType::Unmatched
                && !pending_account_ids.contains(l.account_id.as_str())
        })
        .map(|l| UnmatchedEntity {
            id: l.account_id.clone(),
            name: l.account_name.clone(),
        })
        .collect();

    let linked_customer_ids: BTreeSet<&str> = spine
        .iter()
        .filter_map(|l| l.customer_id.as_deref())
        .collect();
    let unmatched_customers: Vec<UnmatchedEntity> = customers
        .iter()
        .filter(|c| {
            !linked_customer_ids.contains(c.customer_id.as_str())
                && !pending_customer_ids.contains(c.customer_id.as_str())
        })
        .map(|c| UnmatchedEntity {
            id: c.customer_id.clone(),
            name: c.customer_name.clone(),
        })
        .collect();

    // Candidates already sit in descending-confidence order from the
    // greedy pass; the review queue keeps that ordering.
    IdentityOutcome {
        spine,
        auto_matched,
        needs_review: candidates,
        pending_review: pending,
        unmatched_accounts,
        unmatched_customers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(id: &str, name: &str) -> AccountRow {
        AccountRow {
            account_id: id.to_string(),
            account_name: name.to_string(),
            email_domain: None,
        }
    }

    fn account_with_domain(id: &str, name: &str, domain: &str) -> AccountRow {
        AccountRow {
            account_id: id.to_string(),
            account_name: name.to_string(),
            email_domain: Some(domain.to_string()),
        }
    }

    fn customer(id: &str, name: &str) -> CustomerRow {
        CustomerRow {
            customer_id: id.to_string(),
            customer_name: name.to_string(),
            email_domain: None,
        }
    }

    fn customer_with_domain(id: &str, name: &str, domain: &str) -> CustomerRow {
        CustomerRow {
            customer_id: id.to_string(),
            customer_name: name.to_string(),
            email_domain: Some(domain.to_string()),
        }
    }

    fn decision(match_id: &str, d: ReviewDecision) -> Decision {
        Decision {
            match_id: match_id.to_string(),
            decision: d,
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn normalization_drops_trailing_suffix_and_punctuation() {
        assert_eq!(normalize_name("Acme, Inc."), "acme");
        assert_eq!(normalize_name("Tech-Start Ltd"), "tech start");
        assert_eq!(normalize_name("  Globex   CORP "), "globex");
        // Only a trailing suffix is dropped
        assert_eq!(normalize_name("Co Pilot Labs"), "co pilot labs");
        // A single-token name is never emptied
        assert_eq!(normalize_name("Co"), "co");
    }

    #[test]
    fn normalization_folds_diacritics() {
        assert_eq!(normalize_name("Müller GmbH"), "muller");
        assert_eq!(normalize_name("Café Sociedad SA"), "cafe sociedad");
    }

    #[test]
    fn token_set_similarity() {
        let a = normalize_name("Acme Data Systems");
        let b = normalize_name("Acme Systems");
        assert!((similarity(&a, &b) - 0.8).abs() < 1e-9);
        assert_eq!(similarity(&a, &a), 1.0);
        assert_eq!(similarity(&a, ""), 0.0);
    }

    #[test]
    fn single_token_falls_back_to_edit_distance() {
        // levenshtein("acme", "acmee") = 1, max_len 5
        assert!((similarity("acme", "acmee") - 0.8).abs() < 1e-9);
        assert_eq!(similarity("acme", "acme"), 1.0);
    }

    #[test]
    fn exact_pass_links_at_full_confidence() {
        let accounts = vec![account("ACC-001", "Acme, Inc.")];
        let customers = vec![customer("CUST-001", "ACME Inc")];

        let outcome = resolve(&accounts, &customers, &[]);
        assert_eq!(outcome.auto_matched.len(), 1);
        let link = &outcome.auto_matched[0];
        assert_eq!(link.match_type, MatchType::Exact);
        assert_eq!(link.confidence, 1.0);
        assert_eq!(link.customer_id.as_deref(), Some("CUST-001"));
        assert!(outcome.pending_review.is_empty());
        assert!(outcome.unmatched_accounts.is_empty());
    }

    #[test]
    fn exact_pass_prefers_lowest_customer_id() {
        let accounts = vec![account("ACC-001", "Acme")];
        let customers = vec![customer("CUST-902", "Acme"), customer("CUST-101", "Acme")];

        let outcome = resolve(&accounts, &customers, &[]);
        assert_eq!(
            outcome.spine[0].customer_id.as_deref(),
            Some("CUST-101")
        );
        assert_eq!(outcome.unmatched_customers.len(), 1);
        assert_eq!(outcome.unmatched_customers[0].id, "CUST-902");
    }

    #[test]
    fn high_fuzzy_auto_confirms() {
        // Single-token pair one edit apart at length 21: 1 - 1/21 ≈ 0.952
        let accounts = vec![account("ACC-001", "Internationalizations")];
        let customers = vec![customer("CUST-001", "Internationalization")];

        let outcome = resolve(&accounts, &customers, &[]);
        assert_eq!(outcome.auto_matched.len(), 1);
        assert_eq!(outcome.auto_matched[0].match_type, MatchType::FuzzyConfirmed);
        assert!(outcome.auto_matched[0].confidence >= 0.95);
    }

    #[test]
    fn mid_fuzzy_queues_for_review() {
        let accounts = vec![account("ACC-001", "Acme Data Systems")];
        let customers = vec![customer("CUST-001", "Acme Systems")];

        let outcome = resolve(&accounts, &customers, &[]);
        assert!(outcome.auto_matched.is_empty());
        assert_eq!(outcome.pending_review.len(), 1);
        let cand = &outcome.pending_review[0];
        assert_eq!(cand.match_id, "FM-0001");
        assert!((cand.confidence - 0.8).abs() < 1e-9);
        // Held by the queue, so not unmatched either
        assert!(outcome.unmatched_accounts.is_empty());
        assert!(outcome.unmatched_customers.is_empty());
        // Spine still carries the account, as unmatched, until confirmation
        assert_eq!(outcome.spine[0].match_type, MatchType::Unmatched);
    }

    #[test]
    fn confirm_and_reject_replay() {
        let accounts = vec![account("ACC-001", "Acme Data Systems")];
        let customers = vec![customer("CUST-001", "Acme Systems")];

        let confirmed = resolve(
            &accounts,
            &customers,
            &[decision("FM-0001", ReviewDecision::Confirmed)],
        );
        assert!(confirmed.all_reviewed());
        assert_eq!(confirmed.spine[0].match_type, MatchType::FuzzyConfirmed);
        assert_eq!(confirmed.spine[0].customer_id.as_deref(), Some("CUST-001"));

        let rejected = resolve(
            &accounts,
            &customers,
            &[decision("FM-0001", ReviewDecision::Rejected)],
        );
        assert!(rejected.all_reviewed());
        assert_eq!(rejected.spine[0].match_type, MatchType::Unmatched);
        assert_eq!(rejected.unmatched_accounts.len(), 1);
        assert_eq!(rejected.unmatched_customers.len(), 1);
    }

    #[test]
    fn later_decision_wins_so_undo_is_a_pop() {
        let accounts = vec![account("ACC-001", "Acme Data Systems")];
        let customers = vec![customer("CUST-001", "Acme Systems")];

        let log = vec![
            decision("FM-0001", ReviewDecision::Rejected),
            decision("FM-0001", ReviewDecision::Confirmed),
        ];
        let outcome = resolve(&accounts, &customers, &log);
        assert_eq!(outcome.spine[0].match_type, MatchType::FuzzyConfirmed);

        // Popping the last decision re-exposes the first
        let outcome = resolve(&accounts, &customers, &log[..1]);
        assert_eq!(outcome.spine[0].match_type, MatchType::Unmatched);
    }

    #[test]
    fn email_signal_requires_one_to_one() {
        let accounts = vec![
            account_with_domain("ACC-001", "Zebra Holdings", "zebra.io"),
            account_with_domain("ACC-002", "Completely Different", "dup.com"),
            account_with_domain("ACC-003", "Also Different", "dup.com"),
        ];
        let customers = vec![
            customer_with_domain("CUST-001", "ZH Billing Entity", "zebra.io"),
            customer_with_domain("CUST-002", "Dup One", "dup.com"),
        ];

        let outcome = resolve(&accounts, &customers, &[]);
        let zebra = outcome
            .spine
            .iter()
            .find(|l| l.account_id == "ACC-001")
            .unwrap();
        assert_eq!(zebra.match_type, MatchType::EmailSignal);
        assert_eq!(zebra.confidence, 0.70);

        // dup.com has two accounts on one customer: no link
        for id in ["ACC-002", "ACC-003"] {
            let link = outcome.spine.iter().find(|l| l.account_id == id).unwrap();
            assert_eq!(link.match_type, MatchType::Unmatched);
        }
    }

    #[test]
    fn greedy_assignment_breaks_ties_by_account_id() {
        // Both accounts score identically against the single customer;
        // the lexicographically smaller account id must win.
        let accounts = vec![
            account("ACC-002", "Acme Data Systems"),
            account("ACC-001", "Acme Data Systems"),
        ];
        let customers = vec![customer("CUST-001", "Acme Systems")];

        let outcome = resolve(&accounts, &customers, &[]);
        assert_eq!(outcome.pending_review.len(), 1);
        assert_eq!(outcome.pending_review[0].account_id, "ACC-001");
    }

    #[test]
    fn spine_ids_are_deterministic() {
        let accounts = vec![
            account("ACC-B", "Beta LLC"),
            account("ACC-A", "Alpha Inc"),
        ];
        let customers = vec![customer("CUST-001", "Alpha"), customer("CUST-002", "Beta")];

        let one = resolve(&accounts, &customers, &[]);
        let two = resolve(&accounts, &customers, &[]);
        assert_eq!(
            serde_json::to_string(&one.spine).unwrap(),
            serde_json::to_string(&two.spine).unwrap()
        );
        assert_eq!(one.spine[0].rsx_id, "RSX-0001");
        assert_eq!(one.spine[0].account_id, "ACC-A");
        assert_eq!(one.spine[1].rsx_id, "RSX-0002");
    }
}
