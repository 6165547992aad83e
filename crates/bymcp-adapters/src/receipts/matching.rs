//! Scores how well a mail matches a bank transaction.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::graph::MailMessage;
use crate::money::amount_variants;
use crate::qonto::Transaction;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").unwrap_or_else(|e| panic!("invalid word regex: {e}")));

const AMOUNT_SCORE: f64 = 0.5;
const SENDER_SCORE: f64 = 0.3;
const SUBJECT_SCORE: f64 = 0.2;

/// Score in `0.0..=1.0`.
///
/// The amount in the subject or preview counts most; a label word in the
/// sender address counts more than one in the subject.
pub fn score_match(tx: &Transaction, msg: &MailMessage) -> f64 {
    let subject = msg.subject.to_lowercase();
    let body = msg.body_preview.to_lowercase();
    let sender = msg.from_address.to_lowercase();
    let label = tx.label.to_lowercase();

    let mut score = 0.0;
    if amount_variants(tx.amount_cents)
        .iter()
        .any(|v| subject.contains(v.as_str()) || body.contains(v.as_str()))
    {
        score += AMOUNT_SCORE;
    }

    let words: Vec<&str> = NON_WORD
        .split(&label)
        .filter(|w| w.chars().count() > 3)
        .collect();
    if words.iter().any(|w| sender.contains(w)) {
        score += SENDER_SCORE;
    } else if words.iter().any(|w| subject.contains(w)) {
        score += SUBJECT_SCORE;
    }

    score.min(1.0)
}

/// A mail scored against one transaction.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub score: f64,
    pub message: &'a MailMessage,
}

/// Mails received within `window` of `tx_time` that score at least
/// `min_score`, best first.
pub fn rank_candidates<'a>(
    tx: &Transaction,
    tx_time: DateTime<Utc>,
    messages: &'a [MailMessage],
    window: Duration,
    min_score: f64,
) -> Vec<Candidate<'a>> {
    let start = tx_time
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = tx_time
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    let mut candidates: Vec<Candidate<'a>> = messages
        .iter()
        .filter(|msg| {
            msg.received()
                .is_some_and(|received| received >= start && received <= end)
        })
        .map(|message| Candidate {
            score: score_match(tx, message),
            message,
        })
        .filter(|c| c.score >= min_score)
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

/// Parse a Qonto `emitted_at` timestamp, falling back to midnight UTC of
/// its date part.
pub fn transaction_time(tx: &Transaction) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&tx.emitted_at)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            tx.emitted_on()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc())
        })
}
