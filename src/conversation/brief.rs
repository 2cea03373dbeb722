//! Heuristic intake brief synthesis.
//!
//! Scans participant messages sentence by sentence and sorts them into goals
//! and constraints with pattern rules, then picks out the first timeline and
//! budget mentions.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use crate::conversation::core::model::{Conversation, IntakeBrief, MessageRole};

/// Category a sentence can be sorted into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Cue {
    Goal,
    Constraint,
}

/// A pattern rule mapping a regex to a cue.
struct CueRule {
    pattern: Regex,
    cue: Cue,
}

/// Limits applied to generated briefs.
#[derive(Clone, Debug)]
pub struct BriefConfig {
    /// Maximum entries per list (goals, constraints).
    pub max_items: usize,
    /// Maximum characters kept from the opening request.
    pub max_quote_chars: usize,
}

impl Default for BriefConfig {
    fn default() -> Self {
        Self {
            max_items: 5,
            max_quote_chars: 200,
        }
    }
}

/// Builds an [`IntakeBrief`] from a conversation transcript.
pub struct BriefSummarizer {
    config: BriefConfig,
    rules: Vec<CueRule>,
    sentence_break: Regex,
    timeline: Regex,
    money: Regex,
    budget_word: Regex,
}

impl BriefSummarizer {
    /// Create a summarizer with the built-in rule set.
    ///
    /// # Errors
    /// Returns an error if any regex pattern is invalid.
    pub fn new(config: BriefConfig) -> Result<Self, regex::Error> {
        let rules = vec![
            CueRule {
                pattern: Regex::new(
                    r"(?i)\b(i|we)\s*('d|would|am|are|'m|'re)?\s*(want|need|like|looking|hope|hoping|plan|planning)\b",
                )?,
                cue: Cue::Goal,
            },
            CueRule {
                pattern: Regex::new(r"(?i)\b(goal|objective|looking to|aim to|trying to)\b")?,
                cue: Cue::Goal,
            },
            CueRule {
                pattern: Regex::new(
                    r"(?i)\b(must|can't|cannot|can not|don't|do not|without|only|no more than|at most|has to|have to|required)\b",
                )?,
                cue: Cue::Constraint,
            },
        ];

        Ok(Self {
            config,
            rules,
            sentence_break: Regex::new(r"[.!?\n]+(\s|$)")?,
            timeline: Regex::new(
                r"(?i)\b(asap|as soon as possible|(by|before) (the end of )?(next )?(week|month|quarter|year|monday|tuesday|wednesday|thursday|friday|january|february|march|april|may|june|july|august|september|october|november|december)( \d{1,2})?|(within|in) \d+ (days?|weeks?|months?)|next (week|month|quarter|year)|deadline [^.,;!?]+)",
            )?,
            money: Regex::new(
                r"(?i)([$€£]\s?\d[\d,]*(\.\d+)?\s?[km]?\b|\b\d[\d,]*(\.\d+)?\s?[km]?\s?(usd|eur|gbp|dollars|euros|pounds)\b)",
            )?,
            budget_word: Regex::new(r"(?i)\bbudget\b")?,
        })
    }

    /// Derive a brief from the conversation's messages and optional notes.
    #[must_use]
    pub fn summarize(&self, conversation: &Conversation, notes: Option<&str>) -> IntakeBrief {
        let user_texts: Vec<&str> = conversation
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .collect();

        let mut goals = Vec::new();
        let mut constraints = Vec::new();
        let mut seen = HashSet::new();
        let mut timeline = None;
        let mut budget = None;

        let sentences = user_texts
            .iter()
            .copied()
            .chain(notes)
            .flat_map(|text| self.split_sentences(text));

        for sentence in sentences {
            if timeline.is_none() {
                timeline = self.timeline.find(&sentence).map(|m| m.as_str().trim().to_string());
            }
            if budget.is_none() {
                budget = self
                    .money
                    .find(&sentence)
                    .map(|m| m.as_str().trim().to_string())
                    .or_else(|| self.budget_word.is_match(&sentence).then(|| sentence.clone()));
            }

            if !seen.insert(sentence.to_lowercase()) {
                continue;
            }
            for cue in self.cues(&sentence) {
                let list = match cue {
                    Cue::Goal => &mut goals,
                    Cue::Constraint => &mut constraints,
                };
                if list.len() < self.config.max_items {
                    list.push(sentence.clone());
                }
            }
        }

        let attachment_count: usize = conversation
            .messages
            .iter()
            .map(|m| m.attachments.len())
            .sum();

        let summary = self.build_summary(conversation, &user_texts, notes);
        let recommended_next_steps = next_steps(
            conversation,
            goals.is_empty(),
            timeline.is_none(),
            budget.is_none(),
            attachment_count,
        );

        debug!(
            conversation_id = %conversation.id,
            goals = goals.len(),
            constraints = constraints.len(),
            has_timeline = timeline.is_some(),
            has_budget = budget.is_some(),
            "Synthesized intake brief"
        );

        IntakeBrief {
            summary,
            goals,
            constraints,
            timeline,
            budget,
            recommended_next_steps,
        }
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        self.sentence_break
            .split(text)
            .map(str::trim)
            .filter(|s| s.chars().count() >= 3)
            .map(ToString::to_string)
            .collect()
    }

    fn cues(&self, sentence: &str) -> Vec<Cue> {
        let mut cues = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(sentence) && !cues.contains(&rule.cue) {
                cues.push(rule.cue);
            }
        }
        cues
    }

    fn build_summary(&self, conversation: &Conversation, user_texts: &[&str], notes: Option<&str>) -> String {
        let label = conversation.participant_label();
        let count = conversation.messages.len();
        let plural = if count == 1 { "" } else { "s" };
        let opening = user_texts
            .iter()
            .map(|text| text.trim())
            .find(|text| !text.is_empty());
        let mut summary = match opening {
            Some(opening) => format!(
                "{label} exchanged {count} message{plural}. Opening request: \"{}\".",
                truncate_chars(opening, self.config.max_quote_chars)
            ),
            None if !user_texts.is_empty() => {
                format!("{label} exchanged {count} message{plural}, sharing files without text.")
            }
            None => format!("{label} ended the conversation without sending a message."),
        };
        if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
            summary.push_str(" Notes: ");
            summary.push_str(notes);
        }
        summary
    }
}

fn next_steps(
    conversation: &Conversation,
    missing_goals: bool,
    missing_timeline: bool,
    missing_budget: bool,
    attachment_count: usize,
) -> Vec<String> {
    let mut steps = Vec::new();
    match (&conversation.participant_name, &conversation.participant_email) {
        (Some(name), Some(email)) => steps.push(format!("Follow up with {name} ({email})")),
        _ => steps.push(format!("Follow up with {}", conversation.participant_label())),
    }
    if missing_goals {
        steps.push("Clarify goals".to_string());
    }
    if missing_timeline {
        steps.push("Confirm timeline".to_string());
    }
    if missing_budget {
        steps.push("Confirm budget".to_string());
    }
    if attachment_count > 0 {
        let plural = if attachment_count == 1 { "" } else { "s" };
        steps.push(format!("Review {attachment_count} attached file{plural}"));
    }
    steps
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}…", truncated.trim_end())
}
