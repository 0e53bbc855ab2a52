// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query planner: compact query text -> scored retrieval plan.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::escape;
use serde::Serialize;
use std::cmp::Ordering;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, PhraseQuery, Query, RegexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{TantivyDocument, Term};

use crate::store::IndexStore;

// Relative clause weights: name-prefix over name-term over content-term.
const PREFIX_BOOST: f32 = 20.0;
const NAME_BOOST: f32 = 5.0;
const CONTENT_BOOST: f32 = 0.5;

const GLOB_OVERFETCH: usize = 8;
const MAX_FETCH: usize = 5_000;

/// Which fields a free term searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Name,
    Content,
    #[default]
    Both,
}

impl SearchScope {
    fn includes_name(self) -> bool {
        matches!(self, SearchScope::Name | SearchScope::Both)
    }

    fn includes_content(self) -> bool {
        matches!(self, SearchScope::Content | SearchScope::Both)
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub q: String,
    pub scope: SearchScope,
    pub glob: Option<String>,
    pub limit: usize,
    /// Stable re-sort by mtime descending, applied after ranking.
    pub sort_by_mtime: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            q: String::new(),
            scope: SearchScope::Both,
            glob: None,
            limit: 50,
            sort_by_mtime: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub name: String,
    pub mtime: i64,
    pub size: u64,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryToken {
    Ext(String),
    Or,
    Phrase(String),
    Term(String),
}

/// Run a search request against the store's current reader snapshot.
pub fn search(store: &IndexStore, request: &SearchRequest) -> Result<Vec<SearchHit>> {
    let tokens = lex(&request.q);
    let (groups, exts) = group_clauses(tokens);
    if groups.is_empty() && exts.is_empty() {
        return Ok(Vec::new());
    }

    let Some(query) = build_query(store, &groups, &exts, request.scope)? else {
        return Ok(Vec::new());
    };

    let limit = request.limit.max(1);
    let fetch = if request.glob.is_some() {
        limit.saturating_mul(GLOB_OVERFETCH).min(MAX_FETCH)
    } else {
        limit
    };

    let searcher = store.reader().searcher();
    let top_docs = searcher
        .search(&query, &TopDocs::with_limit(fetch))
        .context("search execution failed")?;

    let glob_matcher = build_glob_matcher(request.glob.as_deref())?;
    let fields = store.fields();

    let mut hits = Vec::with_capacity(top_docs.len());
    for (score, address) in top_docs {
        let doc: TantivyDocument = searcher
            .doc(address)
            .context("failed to fetch stored document")?;

        let path = field_text(&doc, fields.path).unwrap_or_default().to_string();
        if let Some(matcher) = &glob_matcher {
            if !matcher.is_match(&path) {
                continue;
            }
        }

        hits.push(SearchHit {
            path,
            name: field_text(&doc, fields.name_tok)
                .unwrap_or_default()
                .to_string(),
            mtime: field_i64(&doc, fields.mtime).unwrap_or_default(),
            size: field_u64(&doc, fields.size).unwrap_or_default(),
            score,
        });
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.mtime.cmp(&a.mtime))
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(limit);

    if request.sort_by_mtime {
        hits.sort_by(|a, b| b.mtime.cmp(&a.mtime));
    }

    Ok(hits)
}

/// Split query text into tokens: quoted phrases, `ext:` filters, the `OR`
/// combinator, and bare terms.
fn lex(input: &str) -> Vec<QueryToken> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                phrase.push(c);
            }
            if !phrase.trim().is_empty() {
                tokens.push(QueryToken::Phrase(phrase));
            }
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            word.push(c);
            chars.next();
        }
        if word == "OR" {
            tokens.push(QueryToken::Or);
        } else if let Some(ext) = word.strip_prefix("ext:") {
            if !ext.is_empty() {
                tokens.push(QueryToken::Ext(ext.to_lowercase()));
            }
        } else {
            tokens.push(QueryToken::Term(word));
        }
    }

    tokens
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Term(String),
    Phrase(String),
}

/// Group clauses for combination: consecutive OR-joined clauses form one
/// disjunction group; groups combine conjunctively. Dangling `OR` tokens
/// are ignored.
fn group_clauses(tokens: Vec<QueryToken>) -> (Vec<Vec<Clause>>, Vec<String>) {
    let mut groups: Vec<Vec<Clause>> = Vec::new();
    let mut exts = Vec::new();
    let mut join_previous = false;

    for token in tokens {
        let clause = match token {
            QueryToken::Ext(ext) => {
                exts.push(ext);
                continue;
            }
            QueryToken::Or => {
                join_previous = true;
                continue;
            }
            QueryToken::Term(word) => Clause::Term(word),
            QueryToken::Phrase(text) => Clause::Phrase(text),
        };

        match groups.last_mut() {
            Some(group) if join_previous => group.push(clause),
            _ => groups.push(vec![clause]),
        }
        join_previous = false;
    }

    (groups, exts)
}

fn build_query(
    store: &IndexStore,
    groups: &[Vec<Clause>],
    exts: &[String],
    scope: SearchScope,
) -> Result<Option<Box<dyn Query>>> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    for group in groups {
        let mut members: Vec<Box<dyn Query>> = Vec::new();
        for clause in group {
            if let Some(query) = clause_query(store, clause, scope)? {
                members.push(query);
            }
        }
        match members.len() {
            0 => {}
            1 => clauses.push((Occur::Must, members.remove(0))),
            _ => clauses.push((
                Occur::Must,
                Box::new(BooleanQuery::new(
                    members.into_iter().map(|query| (Occur::Should, query)).collect(),
                )),
            )),
        }
    }

    for ext in exts {
        let term_query = TermQuery::new(
            Term::from_field_text(store.fields().ext, ext),
            IndexRecordOption::Basic,
        );
        // Filter clause: matches must carry the extension, scores must not.
        clauses.push((
            Occur::Must,
            Box::new(BoostQuery::new(Box::new(term_query), 0.0)),
        ));
    }

    if clauses.is_empty() {
        return Ok(None);
    }
    Ok(Some(Box::new(BooleanQuery::new(clauses))))
}

/// Expand one clause into the field disjunction selected by `scope`.
fn clause_query(
    store: &IndexStore,
    clause: &Clause,
    scope: SearchScope,
) -> Result<Option<Box<dyn Query>>> {
    let fields = store.fields();
    let mut expansions: Vec<Box<dyn Query>> = Vec::new();

    match clause {
        Clause::Term(word) => {
            if scope.includes_name() {
                let lower = word.to_lowercase();
                let pattern = format!("^{}.*", escape(&lower));
                if let Ok(prefix) = RegexQuery::from_pattern(&pattern, fields.name_raw) {
                    expansions.push(Box::new(BoostQuery::new(Box::new(prefix), PREFIX_BOOST)));
                }
                if let Some(query) = tokenized_query(store, fields.name_tok, word)? {
                    expansions.push(Box::new(BoostQuery::new(query, NAME_BOOST)));
                }
            }
            if scope.includes_content() {
                if let Some(query) = tokenized_query(store, fields.content, word)? {
                    expansions.push(Box::new(BoostQuery::new(query, CONTENT_BOOST)));
                }
            }
        }
        Clause::Phrase(text) => {
            if scope.includes_name() {
                if let Some(query) = tokenized_query(store, fields.name_tok, text)? {
                    expansions.push(Box::new(BoostQuery::new(query, NAME_BOOST)));
                }
            }
            if scope.includes_content() {
                if let Some(query) = tokenized_query(store, fields.content, text)? {
                    expansions.push(Box::new(BoostQuery::new(query, CONTENT_BOOST)));
                }
            }
        }
    }

    Ok(match expansions.len() {
        0 => None,
        1 => Some(expansions.remove(0)),
        _ => Some(Box::new(BooleanQuery::new(
            expansions
                .into_iter()
                .map(|query| (Occur::Should, query))
                .collect(),
        ))),
    })
}

/// Tokenize `text` with the field's analyzer; a single term becomes a
/// TermQuery, several become an ordered zero-slop PhraseQuery.
fn tokenized_query(
    store: &IndexStore,
    field: Field,
    text: &str,
) -> Result<Option<Box<dyn Query>>> {
    let mut analyzer = store
        .index()
        .tokenizer_for_field(field)
        .context("field has no tokenizer")?;
    let mut stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    while stream.advance() {
        terms.push(Term::from_field_text(field, &stream.token().text));
    }

    Ok(match terms.len() {
        0 => None,
        1 => Some(Box::new(TermQuery::new(
            terms.remove(0),
            IndexRecordOption::WithFreqsAndPositions,
        ))),
        _ => Some(Box::new(PhraseQuery::new(terms))),
    })
}

fn build_glob_matcher(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    let Some(raw) = pattern.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let glob = GlobBuilder::new(raw)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {}", raw))?;

    Ok(Some(glob.compile_matcher()))
}

fn field_text(doc: &TantivyDocument, field: Field) -> Option<&str> {
    doc.get_first(field).and_then(|value| value.as_str())
}

fn field_i64(doc: &TantivyDocument, field: Field) -> Option<i64> {
    doc.get_first(field).and_then(|value| value.as_i64())
}

fn field_u64(doc: &TantivyDocument, field: Field) -> Option<u64> {
    doc.get_first(field).and_then(|value| value.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(tokens: &[QueryToken]) -> Vec<String> {
        tokens
            .iter()
            .filter_map(|token| match token {
                QueryToken::Term(word) => Some(word.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn lexes_bare_terms_and_phrases() {
        let tokens = lex(r#"draft "quarterly report" notes"#);
        assert_eq!(terms(&tokens), vec!["draft", "notes"]);
        assert!(tokens.contains(&QueryToken::Phrase("quarterly report".into())));
    }

    #[test]
    fn lexes_ext_filters_case_insensitively() {
        let tokens = lex("ext:PDF budget");
        assert!(tokens.contains(&QueryToken::Ext("pdf".into())));
        assert_eq!(terms(&tokens), vec!["budget"]);
    }

    #[test]
    fn unterminated_phrase_runs_to_end_of_input() {
        let tokens = lex(r#""open ended"#);
        assert_eq!(tokens, vec![QueryToken::Phrase("open ended".into())]);
    }

    #[test]
    fn or_joins_adjacent_clauses_into_one_group() {
        let (groups, _) = group_clauses(lex("alpha beta OR gamma"));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![Clause::Term("alpha".into())]);
        assert_eq!(
            groups[1],
            vec![Clause::Term("beta".into()), Clause::Term("gamma".into())]
        );
    }

    #[test]
    fn dangling_or_is_ignored() {
        let (groups, _) = group_clauses(lex("OR alpha OR"));
        assert_eq!(groups, vec![vec![Clause::Term("alpha".into())]]);
    }

    #[test]
    fn empty_query_produces_no_clauses() {
        let (groups, exts) = group_clauses(lex("   "));
        assert!(groups.is_empty());
        assert!(exts.is_empty());
    }

    #[test]
    fn glob_matcher_is_case_insensitive_and_separator_aware() {
        let matcher = build_glob_matcher(Some("**/drafts/*.md"))
            .unwrap()
            .unwrap();
        assert!(matcher.is_match("/home/u/notes/drafts/Plan.MD"));
        assert!(!matcher.is_match("/home/u/notes/drafts/deeper/plan.md"));
        assert!(!matcher.is_match("/home/u/notes/plan.md"));
    }

    #[test]
    fn blank_glob_is_no_filter() {
        assert!(build_glob_matcher(Some("  ")).unwrap().is_none());
        assert!(build_glob_matcher(None).unwrap().is_none());
    }
}
