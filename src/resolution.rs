//! Resolution Classifier
//!
//! Stateless lexical heuristics deciding whether a turn closes the current
//! line of work (completion), abandons it (topic change), or leaves it open.
//! Also scores how much unresolved tension a query carries.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ResolutionConfig, TieBreakPolicy};

// ============ Vocabulary ============

const COMPLETION_MARKERS: &[&str] = &[
    "fixed",
    "solved",
    "resolved",
    "thanks",
    "thank you",
    "thx",
    "working now",
    "works now",
    "that works",
    "that did it",
    "got it",
    "perfect",
    "great",
    "awesome",
    "all good",
    "looks good",
    "nailed it",
    "done",
];

const STRONG_TOPIC_MARKERS: &[&str] = &[
    "by the way",
    "btw",
    "unrelated",
    "different topic",
    "new topic",
    "change of topic",
    "changing topics",
    "switching gears",
    "moving on",
    "on another note",
    "different question",
];

const WEAK_TOPIC_MARKERS: &[&str] = &[
    "another question",
    "one more thing",
    "quick question",
    "separate question",
    "side note",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "nothing", "cannot", "isn't", "wasn't", "aren't", "doesn't", "don't",
    "didn't", "hasn't", "haven't", "won't", "can't", "couldn't",
];

/// "no" in these phrases does not negate what follows
const NEGATION_IDIOMS: &[&str] = &["no problem", "no worries", "no prob"];

const QUESTION_OPENERS: &[&str] = &["why", "how", "what", "where", "when", "which", "who"];

/// Leading words that turn a clause into a yes/no question
const QUESTION_AUXILIARIES: &[&str] = &[
    "is", "are", "was", "does", "did", "do", "can", "could", "has", "have",
];

const CONFUSION_MARKERS: &[&str] = &[
    "confused",
    "confusing",
    "don't understand",
    "doesn't make sense",
    "not sure",
    "no idea",
    "unclear",
    "stuck",
    "lost",
    "weird",
    "strange",
    "unexpected",
];

const PROBLEM_MARKERS: &[&str] = &[
    "error", "bug", "broken", "fails", "failing", "failed", "crash", "crashes", "issue", "problem",
    "wrong",
];

const PERSISTENCE_MARKERS: &[&str] = &[
    "still",
    "again",
    "keeps",
    "same issue",
    "same problem",
    "same error",
];

const FOLLOWUP_MARKERS: &[&str] = &[
    "also",
    "what about",
    "how about",
    "follow up",
    "following up",
    "additionally",
    "as well",
    "that file",
    "same file",
    "going back",
    "back to",
    "continuing",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "these", "those", "are", "was", "were", "been",
    "can", "could", "would", "should", "will", "does", "did", "about", "from", "into", "have",
    "has", "had", "having", "there", "here", "then", "than", "them", "they", "you", "your",
    "i'm", "it's", "its", "but", "just", "some", "any", "all", "get", "got", "let", "make", "like",
    "need", "want", "please", "show", "tell", "help", "now", "our", "out", "too", "very",
];

// Signal weights for the raw tension score
const QUESTION_MARK_WEIGHT: f64 = 0.35;
const MAX_QUESTION_MARKS: usize = 3;
const OPENER_WEIGHT: f64 = 0.3;
const CONFUSION_WEIGHT: f64 = 0.5;
const NEGATION_WEIGHT: f64 = 0.25;
const PROBLEM_WEIGHT: f64 = 0.25;
const PERSISTENCE_WEIGHT: f64 = 0.3;

// ============ Types ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    None,
    Completion,
    TopicChange,
}

impl Default for ResolutionType {
    fn default() -> Self {
        ResolutionType::None
    }
}

impl ResolutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionType::None => "none",
            ResolutionType::Completion => "completion",
            ResolutionType::TopicChange => "topic_change",
        }
    }
}

/// Verdict for a single turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub resolved: bool,
    pub resolution_type: ResolutionType,
    /// Change in unresolved tension caused by this turn
    #[serde(default)]
    pub tension_delta: f64,
    /// Marker or tool call that produced the verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl ResolutionResult {
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn completion(signal: impl Into<String>) -> Self {
        Self {
            resolved: true,
            resolution_type: ResolutionType::Completion,
            tension_delta: 0.0,
            signal: Some(signal.into()),
        }
    }

    pub fn topic_change(signal: impl Into<String>) -> Self {
        Self {
            resolved: true,
            resolution_type: ResolutionType::TopicChange,
            tension_delta: 0.0,
            signal: Some(signal.into()),
        }
    }

    pub fn is_completion(&self) -> bool {
        self.resolved && self.resolution_type == ResolutionType::Completion
    }
}

/// A tool invocation observed during the turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub command: String,
}

/// Aggregate analysis of one incoming query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Prior tension raised by this query's own tension
    pub tension_score: f64,
    pub query_tension: f64,
    pub resolution: ResolutionResult,
    pub is_followup: bool,
    pub tension_sources: Vec<String>,
}

// ============ Tokenizing ============

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start indices where `phrase` occurs as whole words
fn phrase_positions(tokens: &[String], phrase: &str) -> Vec<usize> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() || words.len() > tokens.len() {
        return Vec::new();
    }
    (0..=tokens.len() - words.len())
        .filter(|&i| words.iter().enumerate().all(|(j, w)| tokens[i + j] == *w))
        .collect()
}

fn count_markers(tokens: &[String], markers: &[&str]) -> usize {
    markers.iter().map(|m| phrase_positions(tokens, m).len()).sum()
}

fn first_marker<'a>(tokens: &[String], markers: &[&'a str]) -> Option<&'a str> {
    markers
        .iter()
        .copied()
        .find(|m| !phrase_positions(tokens, m).is_empty())
}

/// A run of words up to a sentence or clause break
struct Clause {
    tokens: Vec<String>,
    is_question: bool,
}

fn split_clauses(text: &str) -> Vec<Clause> {
    let mut clauses = Vec::new();
    let mut push = |raw: &str, terminator: Option<char>| {
        let tokens = tokenize(raw);
        if tokens.is_empty() {
            return;
        }
        let first = tokens[0].as_str();
        let is_question = terminator == Some('?')
            || QUESTION_OPENERS.contains(&first)
            || QUESTION_AUXILIARIES.contains(&first);
        clauses.push(Clause { tokens, is_question });
    };

    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | ',' | ';' | ':' | '!' | '?') {
            push(&text[start..i], Some(c));
            start = i + c.len_utf8();
        }
    }
    push(&text[start..], None);
    clauses
}

fn is_negated(tokens: &[String], position: usize) -> bool {
    (position.saturating_sub(2)..position).any(|i| {
        NEGATIONS.contains(&tokens[i].as_str())
            && !NEGATION_IDIOMS
                .iter()
                .any(|idiom| phrase_positions(tokens, idiom).contains(&i))
    })
}

/// True when a persistence marker follows `position` in `clause` or any later clause
fn persists_after(clauses: &[Clause], clause: usize, position: usize) -> bool {
    let later_in_clause = PERSISTENCE_MARKERS.iter().any(|m| {
        phrase_positions(&clauses[clause].tokens, m)
            .into_iter()
            .any(|p| p > position)
    });
    later_in_clause
        || clauses[clause + 1..]
            .iter()
            .any(|c| count_markers(&c.tokens, PERSISTENCE_MARKERS) > 0)
}

/// First completion marker that the message actually asserts.
///
/// Markers inside a question are skipped. A negation counts only within the
/// two preceding words of the same clause, and a later "still"/"again" undoes
/// the completion.
fn completion_marker(query: &str) -> Option<&'static str> {
    let clauses = split_clauses(query);
    clauses.iter().enumerate().find_map(|(index, clause)| {
        if clause.is_question {
            return None;
        }
        COMPLETION_MARKERS.iter().copied().find(|marker| {
            phrase_positions(&clause.tokens, marker).into_iter().any(|pos| {
                !is_negated(&clause.tokens, pos) && !persists_after(&clauses, index, pos)
            })
        })
    })
}

// ============ Detection ============

/// Classify a query with the default tie-break policy
pub fn detect_resolution(query: &str) -> ResolutionResult {
    detect_resolution_with(query, TieBreakPolicy::default())
}

pub fn detect_resolution_with(query: &str, policy: TieBreakPolicy) -> ResolutionResult {
    let tokens = tokenize(query);
    let completion = completion_marker(query);
    let strong = first_marker(&tokens, STRONG_TOPIC_MARKERS);
    let weak = first_marker(&tokens, WEAK_TOPIC_MARKERS);

    match (completion, strong, weak) {
        (None, None, None) => ResolutionResult::unresolved(),
        (Some(c), None, None) => ResolutionResult::completion(c),
        (None, Some(t), _) | (None, None, Some(t)) => ResolutionResult::topic_change(t),
        (Some(c), strong, weak) => match policy {
            TieBreakPolicy::PreferCompletion => ResolutionResult::completion(c),
            TieBreakPolicy::PreferTopicChange => {
                ResolutionResult::topic_change(strong.or(weak).unwrap_or(c))
            }
            TieBreakPolicy::ByStrength => match strong {
                Some(t) => ResolutionResult::topic_change(t),
                None => ResolutionResult::completion(c),
            },
        },
    }
}

/// Tension carried by a single query, in [0, 1).
///
/// Every lexical signal adds to a raw score that saturates through
/// `1 - exp(-raw)`, so more signals never lower the result.
pub fn compute_query_tension(query: &str) -> f64 {
    let tokens = tokenize(query);
    let question_marks = query.matches('?').count().min(MAX_QUESTION_MARKS);

    let raw = question_marks as f64 * QUESTION_MARK_WEIGHT
        + count_markers(&tokens, QUESTION_OPENERS) as f64 * OPENER_WEIGHT
        + count_markers(&tokens, CONFUSION_MARKERS) as f64 * CONFUSION_WEIGHT
        + count_markers(&tokens, NEGATIONS) as f64 * NEGATION_WEIGHT
        + count_markers(&tokens, PROBLEM_MARKERS) as f64 * PROBLEM_WEIGHT
        + count_markers(&tokens, PERSISTENCE_MARKERS) as f64 * PERSISTENCE_WEIGHT;

    1.0 - (-raw).exp()
}

/// Content words of a query that name what the tension is about
pub fn extract_tension_sources(query: &str) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for token in tokenize(query) {
        let word = token.as_str();
        if word.chars().count() < 3
            || word.chars().all(|c| c.is_ascii_digit())
            || STOPWORDS.contains(&word)
            || QUESTION_OPENERS.contains(&word)
            || NEGATIONS.contains(&word)
            || CONFUSION_MARKERS.contains(&word)
            || PERSISTENCE_MARKERS.contains(&word)
        {
            continue;
        }
        if !sources.contains(&token) {
            sources.push(token);
        }
    }
    sources
}

fn finalize_call<'a>(tool_calls: &'a [ToolCall], config: &ResolutionConfig) -> Option<&'a ToolCall> {
    tool_calls.iter().find(|call| {
        let tool = call.tool.to_lowercase();
        let command = call.command.to_lowercase();
        config
            .finalize_markers
            .iter()
            .map(|m| m.to_lowercase())
            .any(|m| tool.contains(&m) || command.contains(&m))
    })
}

/// Resolution using the turn's response and tool activity as well as the query.
///
/// A lexical verdict on the query wins. Otherwise the turn counts as a
/// completion if it ran a finalizing tool call, or if the response mentions
/// enough of the previously open tension sources.
pub fn detect_contextual_resolution(
    query: &str,
    response: &str,
    tool_calls: &[ToolCall],
    prev_tension_sources: &[String],
    config: &ResolutionConfig,
) -> ResolutionResult {
    resolve_in_context(
        detect_resolution_with(query, config.tie_break),
        response,
        tool_calls,
        prev_tension_sources,
        config,
    )
}

/// Upgrade an already computed lexical verdict with the turn's response and
/// tool activity. A resolved verdict is returned unchanged.
pub fn resolve_in_context(
    lexical: ResolutionResult,
    response: &str,
    tool_calls: &[ToolCall],
    prev_tension_sources: &[String],
    config: &ResolutionConfig,
) -> ResolutionResult {
    if lexical.resolved {
        return lexical;
    }

    if let Some(call) = finalize_call(tool_calls, config) {
        let signal = if call.command.is_empty() {
            call.tool.clone()
        } else {
            call.command.clone()
        };
        return ResolutionResult::completion(signal);
    }

    if !prev_tension_sources.is_empty() && !response.trim().is_empty() {
        let tokens = tokenize(response);
        let addressed = prev_tension_sources
            .iter()
            .filter(|source| !phrase_positions(&tokens, &source.to_lowercase()).is_empty())
            .count();
        let ratio = addressed as f64 / prev_tension_sources.len() as f64;
        if ratio >= config.addressed_ratio {
            return ResolutionResult::completion(format!(
                "addressed {}/{} tension sources",
                addressed,
                prev_tension_sources.len()
            ));
        }
    }

    lexical
}

fn mentions_prior_file(tokens: &[String], prev_activated: &[String]) -> bool {
    prev_activated.iter().any(|path| {
        Path::new(path)
            .file_stem()
            .map(|stem| tokenize(&stem.to_string_lossy()).join(" "))
            .map_or(false, |stem| !stem.is_empty() && !phrase_positions(tokens, &stem).is_empty())
    })
}

/// Tension, resolution and follow-up analysis for an incoming query
pub fn analyze_query(
    query: &str,
    prev_tension: f64,
    prev_activated: &[String],
    config: &ResolutionConfig,
) -> QueryAnalysis {
    let tokens = tokenize(query);
    let query_tension = compute_query_tension(query);
    let prev = prev_tension.clamp(0.0, 1.0);

    let is_followup = !prev_activated.is_empty()
        && (first_marker(&tokens, FOLLOWUP_MARKERS).is_some()
            || mentions_prior_file(&tokens, prev_activated));

    QueryAnalysis {
        tension_score: prev + query_tension * (1.0 - prev),
        query_tension,
        resolution: detect_resolution_with(query, config.tie_break),
        is_followup,
        tension_sources: extract_tension_sources(query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(query: &str) -> (bool, ResolutionType) {
        let r = detect_resolution(query);
        (r.resolved, r.resolution_type)
    }

    #[test]
    fn test_completion_signals() {
        assert_eq!(verdict("fixed it, working now!"), (true, ResolutionType::Completion));
        assert_eq!(verdict("thanks, that solved it"), (true, ResolutionType::Completion));
    }

    #[test]
    fn test_topic_change_signals() {
        assert_eq!(
            verdict("unrelated question - what about X?"),
            (true, ResolutionType::TopicChange)
        );
        assert_eq!(
            verdict("by the way, different topic"),
            (true, ResolutionType::TopicChange)
        );
    }

    #[test]
    fn test_unresolved() {
        assert_eq!(verdict("why isn't this working?"), (false, ResolutionType::None));
        assert_eq!(verdict("still having the same issue"), (false, ResolutionType::None));
        assert_eq!(verdict(""), (false, ResolutionType::None));
    }

    #[test]
    fn test_negated_completion_is_ignored() {
        assert_eq!(verdict("it is not fixed"), (false, ResolutionType::None));
        assert_eq!(verdict("that isn't working now"), (false, ResolutionType::None));
    }

    #[test]
    fn test_no_problem_is_not_a_negation() {
        assert_eq!(verdict("no problem, thanks!"), (true, ResolutionType::Completion));
        assert_eq!(verdict("no worries thanks"), (true, ResolutionType::Completion));
        assert_eq!(verdict("no, not fixed"), (false, ResolutionType::None));
    }

    #[test]
    fn test_negation_stops_at_clause_break() {
        assert_eq!(verdict("it was not easy. fixed now"), (true, ResolutionType::Completion));
    }

    #[test]
    fn test_completion_inside_question_is_ignored() {
        assert_eq!(verdict("is it fixed?"), (false, ResolutionType::None));
        assert_eq!(verdict("what still needs to be done?"), (false, ResolutionType::None));
        assert_eq!(verdict("is it done"), (false, ResolutionType::None));
        assert_eq!(verdict("was it broken? fixed now"), (true, ResolutionType::Completion));
    }

    #[test]
    fn test_persistence_after_completion_reopens() {
        assert_eq!(
            verdict("great, but it still crashes again"),
            (false, ResolutionType::None)
        );
        assert_eq!(verdict("thanks but the same error again"), (false, ResolutionType::None));
        assert_eq!(verdict("still broken earlier, fixed now"), (true, ResolutionType::Completion));
    }

    #[test]
    fn test_markers_need_word_boundaries() {
        // "prefixed" and "donete" must not read as completion markers
        assert_eq!(verdict("the prefixed keys in donete"), (false, ResolutionType::None));
    }

    #[test]
    fn test_tie_break_policies() {
        let mixed_weak = "great, though I have another question";
        assert_eq!(
            detect_resolution_with(mixed_weak, TieBreakPolicy::ByStrength).resolution_type,
            ResolutionType::Completion
        );
        assert_eq!(
            detect_resolution_with(mixed_weak, TieBreakPolicy::PreferTopicChange).resolution_type,
            ResolutionType::TopicChange
        );

        let mixed_strong = "thanks! by the way, how do I deploy?";
        assert_eq!(
            detect_resolution_with(mixed_strong, TieBreakPolicy::ByStrength).resolution_type,
            ResolutionType::TopicChange
        );
        assert_eq!(
            detect_resolution_with(mixed_strong, TieBreakPolicy::PreferCompletion).resolution_type,
            ResolutionType::Completion
        );
    }

    #[test]
    fn test_query_tension_levels() {
        assert!(compute_query_tension("show me the file") < 0.2);
        assert!(compute_query_tension("why isn't this working?") > 0.2);
        assert!(
            compute_query_tension("I'm confused, why doesn't this make sense? still not working")
                > 0.3
        );
    }

    #[test]
    fn test_query_tension_is_monotonic_and_bounded() {
        let base = compute_query_tension("why is this failing?");
        let more = compute_query_tension("why is this failing? still confused, still broken??");
        assert!(more > base);
        assert!(more < 1.0);
        assert_eq!(compute_query_tension(""), 0.0);
    }

    #[test]
    fn test_extract_tension_sources() {
        assert_eq!(extract_tension_sources("what is this file?"), vec!["file"]);
        assert_eq!(extract_tension_sources("still confused about the error"), vec!["error"]);
        assert_eq!(
            extract_tension_sources("parser bug in the parser"),
            vec!["parser", "bug"]
        );
    }

    #[test]
    fn test_contextual_resolution_from_tool_call() {
        let calls = vec![ToolCall {
            tool: "Bash".to_string(),
            command: "git commit -m \"fix\"".to_string(),
        }];
        let result = detect_contextual_resolution(
            "commit the changes",
            "I've committed the changes.",
            &calls,
            &[],
            &ResolutionConfig::default(),
        );
        assert!(result.is_completion());
    }

    #[test]
    fn test_resolve_in_context_keeps_lexical_verdict() {
        let calls = vec![ToolCall {
            tool: "Bash".to_string(),
            command: "git push".to_string(),
        }];
        let config = ResolutionConfig::default();

        let topic = resolve_in_context(
            ResolutionResult::topic_change("btw"),
            "",
            &calls,
            &[],
            &config,
        );
        assert_eq!(topic.resolution_type, ResolutionType::TopicChange);

        let pushed = resolve_in_context(ResolutionResult::unresolved(), "", &calls, &[], &config);
        assert!(pushed.is_completion());
        assert_eq!(pushed.signal.as_deref(), Some("git push"));
    }

    #[test]
    fn test_contextual_resolution_from_addressed_sources() {
        let sources: Vec<String> = ["bug", "file", "parser"].iter().map(|s| s.to_string()).collect();
        let result = detect_contextual_resolution(
            "help with the bug",
            "I found the bug was in the file parser. Here's the fix...",
            &[],
            &sources,
            &ResolutionConfig::default(),
        );
        assert!(result.is_completion());

        let result = detect_contextual_resolution(
            "help with the bug",
            "Looking into it.",
            &[],
            &sources,
            &ResolutionConfig::default(),
        );
        assert!(!result.resolved);
    }

    #[test]
    fn test_analyze_query() {
        let config = ResolutionConfig::default();

        let result = analyze_query("why isn't the test passing?", 0.2, &[], &config);
        assert!(result.tension_score > 0.2);
        assert!(result.tension_score <= 1.0);
        assert_eq!(result.resolution.resolution_type, ResolutionType::None);
        assert!(!result.is_followup);

        let prev = vec!["other.md".to_string()];
        let result = analyze_query("also what about the other file", 0.0, &prev, &config);
        assert!(result.is_followup);
    }

    #[test]
    fn test_followup_by_file_mention() {
        let prev = vec!["notes/auth_flow.md".to_string()];
        let result = analyze_query("does auth flow handle refresh", 0.0, &prev, &ResolutionConfig::default());
        assert!(result.is_followup);

        let result = analyze_query("does auth flow handle refresh", 0.0, &[], &ResolutionConfig::default());
        assert!(!result.is_followup);
    }
}
