//! Identifier parser
//!
//! Extracts typed identifiers and relation annotations from text, one line at
//! a time. On each line:
//!
//! - tokens after a relation keyword (up to the next keyword) are targets of
//!   that relation,
//! - every other token is a declaration,
//! - the first declaration is the line's subject; when a line has none, the
//!   last subject seen in the same file is used (a heading, front matter `id:`).
//!
//! A keyword with no targets on its own line picks them up from the bullet
//! list that follows it.
//!
//! A file opening with a `---` YAML block is read as front matter: its `id:`
//! is the document subject, and the configured traceability lists become
//! relations from it (or from the first identifier declared below the block).

use log::debug;
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};

use crate::config::{ConfigError, FrontMatterConfig, TraceConfig};
use crate::corpus::SourceFile;
use crate::models::{
    Identifier, IdentifierKind, ParseWarning, RawRelation, Relation, SourceLocation,
};

/// Everything extracted from a corpus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    /// Deduplicated by id, first declaration wins
    pub identifiers: Vec<Identifier>,
    /// In file order, then line order
    pub relations: Vec<RawRelation>,
    pub warnings: Vec<ParseWarning>,
}

/// Result of parsing a single file, before cross-file merging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileParse {
    pub declarations: Vec<Identifier>,
    pub relations: Vec<RawRelation>,
    pub warnings: Vec<ParseWarning>,
}

#[derive(Debug)]
struct KindMatcher {
    kind: IdentifierKind,
    pattern: Regex,
    declare: Option<Regex>,
}

/// Compiled identifier and relation matchers
#[derive(Debug)]
pub struct Matchers {
    kinds: Vec<KindMatcher>,
    candidate: Option<Regex>,
    relations: Vec<(Relation, Regex)>,
    placeholders: Vec<Regex>,
    front_matter: FrontMatterConfig,
}

/// What a leading YAML block contributes to its file
#[derive(Debug, Default)]
struct FrontMatter {
    /// Lines taken by the block, fences included
    len: usize,
    id: Option<(String, IdentifierKind, usize)>,
    /// (relation, target, line)
    targets: Vec<(Relation, String, usize)>,
}

#[derive(Debug, Clone)]
struct Token<'a> {
    start: usize,
    end: usize,
    text: &'a str,
    kind: IdentifierKind,
    rule: usize,
}

#[derive(Debug, Clone, Copy)]
struct KeywordHit {
    start: usize,
    end: usize,
    relation: Relation,
}

/// A relation keyword still waiting for targets from a bullet list
#[derive(Debug, Clone)]
struct PendingRelation {
    relation: Relation,
    subject: Option<String>,
    location: SourceLocation,
}

impl Matchers {
    /// Compiles the matcher rules of a configuration
    pub fn new(config: &TraceConfig) -> Result<Self, ConfigError> {
        let mut kinds = Vec::new();
        let mut prefixes = Vec::new();

        for rule in &config.identifiers {
            let pattern = compile(
                &format!("{} identifier", rule.kind),
                &rule.pattern,
                &format!(r"\b(?:{})\b", rule.pattern),
                false,
            )?;
            let declare = if rule.declare.is_empty() {
                None
            } else {
                let joined = alternation(&rule.declare);
                Some(compile(
                    &format!("{} declare", rule.kind),
                    &joined,
                    &format!(r"(?:{})[\s:]*$", joined),
                    true,
                )?)
            };
            if !rule.prefix.is_empty() {
                prefixes.push(regex::escape(&rule.prefix));
            }
            kinds.push(KindMatcher {
                kind: rule.kind,
                pattern,
                declare,
            });
        }

        for kind in IdentifierKind::all() {
            let used_in_chain = config
                .chain
                .iter()
                .any(|stage| stage.kind == *kind || stage.also.contains(kind));
            if used_in_chain && !kinds.iter().any(|k| k.kind == *kind) {
                return Err(ConfigError::MissingKindRule(*kind));
            }
        }

        let candidate = if prefixes.is_empty() {
            None
        } else {
            let source = format!(r"\b(?:{})[A-Z0-9][A-Za-z0-9_-]*", prefixes.join("|"));
            Some(compile("identifier prefix", &source, &source, false)?)
        };

        let mut relations = Vec::new();
        for rule in &config.relations {
            if rule.keywords.is_empty() {
                continue;
            }
            let joined = alternation(&rule.keywords);
            let regex = compile(&format!("{} keyword", rule.relation), &joined, &joined, true)?;
            relations.push((rule.relation, regex));
        }

        let placeholders = config
            .placeholders
            .iter()
            .map(|p| compile("placeholder", p, p, false))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            kinds,
            candidate,
            relations,
            placeholders,
            front_matter: config.front_matter.clone(),
        })
    }

    fn is_placeholder(&self, token: &str) -> bool {
        self.placeholders.iter().any(|p| p.is_match(token))
    }

    /// Finds non-overlapping identifier tokens, earliest then longest then first rule
    fn find_tokens<'a>(&self, line: &'a str) -> Vec<Token<'a>> {
        let mut found = Vec::new();
        for (rule, matcher) in self.kinds.iter().enumerate() {
            for m in matcher.pattern.find_iter(line) {
                found.push(Token {
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str(),
                    kind: matcher.kind,
                    rule,
                });
            }
        }
        found.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then(a.rule.cmp(&b.rule))
        });

        let mut tokens: Vec<Token<'a>> = Vec::new();
        for token in found {
            if tokens.last().is_some_and(|last| token.start < last.end) {
                continue;
            }
            tokens.push(token);
        }
        tokens
    }

    fn find_keywords(&self, line: &str) -> Vec<KeywordHit> {
        let mut found = Vec::new();
        for (relation, regex) in &self.relations {
            for m in regex.find_iter(line) {
                found.push(KeywordHit {
                    start: m.start(),
                    end: m.end(),
                    relation: *relation,
                });
            }
        }
        found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut hits: Vec<KeywordHit> = Vec::new();
        for hit in found {
            if hits.last().is_some_and(|last| hit.start < last.end) {
                continue;
            }
            hits.push(hit);
        }
        hits
    }

    /// Kind forced by a declare keyword right before the token, else the matched kind
    fn effective_kind(&self, line: &str, token: &Token<'_>) -> IdentifierKind {
        let before = &line[..token.start];
        for matcher in &self.kinds {
            if let Some(declare) = &matcher.declare {
                if declare.is_match(before) {
                    return matcher.kind;
                }
            }
        }
        token.kind
    }

    fn malformed_tokens<'a>(&self, line: &'a str, tokens: &[Token<'_>]) -> Vec<&'a str> {
        let Some(candidate) = &self.candidate else {
            return Vec::new();
        };
        candidate
            .find_iter(line)
            .filter(|m| {
                !tokens
                    .iter()
                    .any(|t| m.start() < t.end && t.start < m.end())
            })
            .map(|m| m.as_str())
            .filter(|text| !self.is_placeholder(text))
            .collect()
    }

    /// Reads a leading `---` block; `None` when absent or not YAML
    fn read_front_matter(&self, path: &str, lines: &[&str]) -> Option<FrontMatter> {
        if lines.first().map(|l| l.trim()) != Some("---") {
            return None;
        }
        let close = lines
            .iter()
            .skip(1)
            .position(|l| matches!(l.trim(), "---" | "..."))?
            + 1;
        let block = &lines[1..close];

        let value: serde_yaml::Value = match serde_yaml::from_str(&block.join("\n")) {
            Ok(value) => value,
            Err(e) => {
                debug!("{}: leading block is not YAML front matter: {}", path, e);
                return None;
            }
        };
        if !value.is_mapping() {
            return None;
        }

        // Block line i sits on file line i + 2
        let line_of = |from: usize, needle: &str| {
            block
                .iter()
                .enumerate()
                .skip(from)
                .find(|(_, l)| l.contains(needle))
                .map(|(i, _)| i + 2)
        };

        let mut front = FrontMatter {
            len: close + 1,
            ..FrontMatter::default()
        };

        if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
            if let Some(token) = self.identifier_tokens(id).first() {
                let line = line_of(0, "id:").unwrap_or(1);
                front.id = Some((token.text.to_string(), token.kind, line));
            }
        }

        let Some(section) = value.get(self.front_matter.section.as_str()) else {
            return Some(front);
        };
        for field in &self.front_matter.fields {
            let Some(items) = section.get(field.key.as_str()) else {
                continue;
            };
            let key_line = line_of(0, &format!("{}:", field.key)).unwrap_or(1);
            let texts: Vec<&str> = match items {
                serde_yaml::Value::Sequence(seq) => seq.iter().filter_map(|v| v.as_str()).collect(),
                serde_yaml::Value::String(text) => vec![text.as_str()],
                _ => Vec::new(),
            };
            for text in texts {
                for token in self.identifier_tokens(text) {
                    let line = line_of(key_line - 1, token.text).unwrap_or(key_line);
                    front
                        .targets
                        .push((field.relation, token.text.to_string(), line));
                }
            }
        }

        Some(front)
    }

    fn identifier_tokens<'a>(&self, text: &'a str) -> Vec<Token<'a>> {
        self.find_tokens(text)
            .into_iter()
            .filter(|t| !self.is_placeholder(t.text))
            .collect()
    }

    /// Parses one file
    pub fn parse_file(&self, path: &str, contents: &str) -> FileParse {
        let mut output = FileParse::default();
        let mut pending: Option<PendingRelation> = None;

        let lines: Vec<&str> = contents.lines().collect();
        let front = self.read_front_matter(path, &lines);
        let body_start = front.as_ref().map_or(0, |f| f.len);

        let mut current_subject: Option<String> = None;
        if let Some((id, kind, line)) = front.as_ref().and_then(|f| f.id.as_ref()) {
            output
                .declarations
                .push(Identifier::new(id.clone(), *kind, SourceLocation::new(path, *line)));
            current_subject = Some(id.clone());
        }

        for (index, &line) in lines.iter().enumerate().skip(body_start) {
            let location = SourceLocation::new(path, index + 1);
            let tokens: Vec<Token<'_>> = self
                .find_tokens(line)
                .into_iter()
                .filter(|t| !self.is_placeholder(t.text))
                .collect();
            let keywords = self.find_keywords(line);

            for token in self.malformed_tokens(line, &tokens) {
                output.warnings.push(ParseWarning::MalformedIdentifier {
                    token: token.to_string(),
                    location: location.clone(),
                });
            }

            // Bullet items continuing a "Traces to:" style list
            if keywords.is_empty() {
                if let Some(open) = &pending {
                    let trimmed = line.trim_start();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if is_bullet(trimmed) {
                        for token in &tokens {
                            push_relation(
                                &mut output,
                                open.subject.as_deref(),
                                open.relation,
                                token.text,
                                &location,
                            );
                        }
                        continue;
                    }
                }
            }
            pending = None;

            // Tokens after the first keyword belong to the nearest keyword before them
            let mut targets: Vec<Vec<&str>> = vec![Vec::new(); keywords.len()];
            let mut declared: Vec<&Token<'_>> = Vec::new();
            for token in &tokens {
                match keywords.iter().rposition(|k| k.end <= token.start) {
                    Some(k) => targets[k].push(token.text),
                    None => declared.push(token),
                }
            }

            for token in &declared {
                let kind = self.effective_kind(line, token);
                output
                    .declarations
                    .push(Identifier::new(token.text, kind, location.clone()));
            }

            let line_subject = declared.first().map(|t| t.text.to_string());
            let subject = line_subject.clone().or_else(|| current_subject.clone());

            for (k, hit) in keywords.iter().enumerate() {
                if targets[k].is_empty() {
                    if k + 1 == keywords.len() {
                        pending = Some(PendingRelation {
                            relation: hit.relation,
                            subject: subject.clone(),
                            location: location.clone(),
                        });
                    }
                    continue;
                }
                for target in &targets[k] {
                    push_relation(&mut output, subject.as_deref(), hit.relation, target, &location);
                }
            }

            if line_subject.is_some() {
                current_subject = line_subject;
            }
        }

        if let Some(front) = front {
            Self::attach_front_matter(&mut output, path, front);
        }

        if let Some(open) = pending {
            debug!(
                "Unterminated '{}' annotation at {} has no targets",
                open.relation, open.location
            );
        }

        output
    }

    /// Front matter lists come first in the file, so their relations go first
    fn attach_front_matter(output: &mut FileParse, path: &str, front: FrontMatter) {
        if front.targets.is_empty() {
            return;
        }
        let subject = output.declarations.first().map(|d| d.id.clone());

        let mut head = FileParse::default();
        for (relation, target, line) in &front.targets {
            push_relation(
                &mut head,
                subject.as_deref(),
                *relation,
                target,
                &SourceLocation::new(path, *line),
            );
        }

        head.relations.append(&mut output.relations);
        head.warnings.append(&mut output.warnings);
        output.relations = head.relations;
        output.warnings = head.warnings;
    }
}

/// Parses every file and merges the results in input order.
///
/// Files are parsed in parallel; the merge is sequential.
pub fn parse_corpus(files: &[SourceFile], matchers: &Matchers) -> ParseOutput {
    let parsed: Vec<FileParse> = files
        .par_iter()
        .map(|file| {
            let result = matchers.parse_file(&file.path, &file.contents);
            debug!(
                "Parsed {}: {} declarations, {} relations, {} warnings",
                file.path,
                result.declarations.len(),
                result.relations.len(),
                result.warnings.len()
            );
            result
        })
        .collect();

    merge(parsed)
}

/// Merges per-file results: first declaration wins, kind conflicts become warnings
pub fn merge(parsed: Vec<FileParse>) -> ParseOutput {
    let mut output = ParseOutput::default();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut reported: HashSet<(String, IdentifierKind)> = HashSet::new();

    for file in parsed {
        output.warnings.extend(file.warnings);

        for identifier in file.declarations {
            match first_seen.get(&identifier.id) {
                None => {
                    first_seen.insert(identifier.id.clone(), output.identifiers.len());
                    output.identifiers.push(identifier);
                }
                Some(&index) => {
                    let first = &output.identifiers[index];
                    if first.kind != identifier.kind
                        && reported.insert((identifier.id.clone(), identifier.kind))
                    {
                        output.warnings.push(ParseWarning::ConflictingIdentifierKind {
                            id: identifier.id.clone(),
                            first_kind: first.kind,
                            first_location: first.source_location.clone(),
                            conflicting_kind: identifier.kind,
                            location: identifier.source_location,
                        });
                    }
                }
            }
        }

        output.relations.extend(file.relations);
    }

    output
}

fn push_relation(
    output: &mut FileParse,
    subject: Option<&str>,
    relation: Relation,
    target: &str,
    location: &SourceLocation,
) {
    match subject {
        Some(from) => output.relations.push(RawRelation {
            from: from.to_string(),
            relation,
            to: target.to_string(),
            location: location.clone(),
        }),
        None => {
            let warning = ParseWarning::MissingRelationSubject {
                relation,
                location: location.clone(),
            };
            // One warning per annotation line
            if output.warnings.last() != Some(&warning) {
                output.warnings.push(warning);
            }
        }
    }
}

fn is_bullet(trimmed: &str) -> bool {
    let mut chars = trimmed.chars();
    matches!(chars.next(), Some('-' | '*' | '+')) && matches!(chars.next(), Some(' ' | '\t'))
}

fn alternation(patterns: &[String]) -> String {
    patterns
        .iter()
        .map(|p| format!("(?:{})", p))
        .collect::<Vec<_>>()
        .join("|")
}

fn compile(
    what: &str,
    pattern: &str,
    source: &str,
    case_insensitive: bool,
) -> Result<Regex, ConfigError> {
    RegexBuilder::new(source)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| ConfigError::InvalidPattern {
            what: what.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}
