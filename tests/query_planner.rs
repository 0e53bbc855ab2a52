// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query grammar, ranking and filter behavior against a fixture index.

use tempfile::TempDir;

use scour::planner::{SearchRequest, SearchScope};
use scour::scanner::FileMeta;
use scour::store::StoreSettings;
use scour::Engine;

struct Doc {
    path: String,
    mtime: i64,
    content: Option<String>,
}

fn doc(path: &str, mtime: i64, content: Option<&str>) -> Doc {
    Doc {
        path: path.to_string(),
        mtime,
        content: content.map(str::to_string),
    }
}

fn fixture(docs: &[Doc]) -> (TempDir, Engine) {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(&tmp.path().join("index"), StoreSettings::default()).unwrap();
    for doc in docs {
        let name = doc.path.rsplit('/').next().unwrap_or(&doc.path).to_string();
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty());
        let meta = FileMeta {
            path: doc.path.clone(),
            name,
            ext,
            mtime: doc.mtime,
            size: doc.content.as_ref().map(|c| c.len() as u64).unwrap_or(1),
            inode: 0,
            dev: 0,
            is_placeholder: false,
        };
        engine.add_or_update(&meta, doc.content.as_deref()).unwrap();
    }
    engine.commit_and_refresh().unwrap();
    (tmp, engine)
}

fn request(q: &str, scope: SearchScope) -> SearchRequest {
    SearchRequest {
        q: q.into(),
        scope,
        limit: 10,
        ..SearchRequest::default()
    }
}

fn paths(engine: &Engine, request: &SearchRequest) -> Vec<String> {
    engine
        .search(request)
        .unwrap()
        .into_iter()
        .map(|hit| hit.path)
        .collect()
}

#[test]
fn prefix_name_beats_name_token_beats_content() {
    let (_tmp, engine) = fixture(&[
        doc(
            "/docs/README.md",
            100,
            Some("introduction to the project"),
        ),
        doc("/docs/readme-archive.txt", 100, Some("old introductions")),
        doc("/docs/notes.txt", 100, Some("see readme here")),
    ]);

    let ranked = paths(&engine, &request("readme", SearchScope::Both));
    assert_eq!(
        ranked,
        vec![
            "/docs/README.md",
            "/docs/readme-archive.txt",
            "/docs/notes.txt"
        ]
    );
}

#[test]
fn glob_post_filter_constrains_every_hit() {
    let (_tmp, engine) = fixture(&[
        doc("/w/drafts/plan.md", 100, Some("draft plan")),
        doc("/w/drafts/notes.md", 100, Some("draft notes")),
        doc("/w/final/plan.md", 100, Some("final draft plan")),
    ]);

    let mut filtered = request("draft", SearchScope::Both);
    filtered.glob = Some("**/drafts/**".into());
    let hits = engine.search(&filtered).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit.path.contains("/drafts/")));
}

#[test]
fn ext_filter_restricts_matches_without_scoring() {
    let (_tmp, engine) = fixture(&[
        doc("/files/q3-budget.pdf", 100, None),
        doc("/files/budget.docx", 100, None),
    ]);

    let ranked = paths(&engine, &request("ext:pdf budget", SearchScope::Both));
    assert_eq!(ranked, vec!["/files/q3-budget.pdf"]);

    // A bare extension filter is a valid query on its own.
    let only_ext = paths(&engine, &request("ext:pdf", SearchScope::Both));
    assert_eq!(only_ext, vec!["/files/q3-budget.pdf"]);
}

#[test]
fn or_widens_and_adjacency_narrows() {
    let (_tmp, engine) = fixture(&[
        doc("/n/alpha.txt", 100, Some("first greek letter")),
        doc("/n/beta.txt", 100, Some("second greek letter")),
        doc("/n/gamma.txt", 100, Some("third greek letter")),
    ]);

    let mut either = paths(&engine, &request("alpha OR beta", SearchScope::Name));
    either.sort();
    assert_eq!(either, vec!["/n/alpha.txt", "/n/beta.txt"]);

    let both = paths(&engine, &request("alpha beta", SearchScope::Name));
    assert!(both.is_empty());
}

#[test]
fn quoted_phrases_require_adjacent_order() {
    let (_tmp, engine) = fixture(&[
        doc(
            "/p/ordered.txt",
            100,
            Some("the hello brave world example"),
        ),
        doc(
            "/p/scrambled.txt",
            100,
            Some("brave example hello of world"),
        ),
    ]);

    let hits = paths(&engine, &request("\"hello brave\"", SearchScope::Content));
    assert_eq!(hits, vec!["/p/ordered.txt"]);
}

#[test]
fn scope_limits_which_fields_match() {
    let (_tmp, engine) = fixture(&[
        doc("/s/needle.txt", 100, Some("plain body")),
        doc("/s/haystack.txt", 100, Some("a needle hides here")),
    ]);

    let by_name = paths(&engine, &request("needle", SearchScope::Name));
    assert_eq!(by_name, vec!["/s/needle.txt"]);

    let by_content = paths(&engine, &request("needle", SearchScope::Content));
    assert_eq!(by_content, vec!["/s/haystack.txt"]);

    let mut both = paths(&engine, &request("needle", SearchScope::Both));
    both.sort();
    assert_eq!(both, vec!["/s/haystack.txt", "/s/needle.txt"]);
}

#[test]
fn ties_break_by_mtime_then_path() {
    let (_tmp, engine) = fixture(&[
        doc("/a/dup.txt", 100, None),
        doc("/b/dup.txt", 200, None),
        doc("/c/dup.txt", 200, None),
    ]);

    let ranked = paths(&engine, &request("dup", SearchScope::Name));
    assert_eq!(ranked, vec!["/b/dup.txt", "/c/dup.txt", "/a/dup.txt"]);
}

#[test]
fn sort_modified_reorders_after_ranking() {
    let (_tmp, engine) = fixture(&[
        doc("/m/rank-first.txt", 100, Some("target")),
        doc("/m/newer.txt", 900, Some("mentions target twice: target")),
    ]);

    let mut by_time = request("target", SearchScope::Content);
    by_time.sort_by_mtime = true;
    let hits = engine.search(&by_time).unwrap();
    assert_eq!(hits[0].path, "/m/newer.txt");
}

#[test]
fn limit_caps_result_count() {
    let docs: Vec<Doc> = (0..6)
        .map(|i| doc(&format!("/l/item{i}.txt"), 100 + i as i64, None))
        .collect();
    let (_tmp, engine) = fixture(&docs);

    let mut limited = request("item", SearchScope::Name);
    limited.limit = 3;
    let hits = engine.search(&limited).unwrap();
    assert_eq!(hits.len(), 3);
    // Highest mtimes win the tie-break inside the cap.
    assert!(hits.iter().all(|hit| hit.mtime >= 103));
}

#[test]
fn blank_queries_return_nothing() {
    let (_tmp, engine) = fixture(&[doc("/q/any.txt", 100, Some("body"))]);

    assert!(paths(&engine, &request("", SearchScope::Both)).is_empty());
    assert!(paths(&engine, &request("   ", SearchScope::Both)).is_empty());
    assert!(paths(&engine, &request("OR", SearchScope::Both)).is_empty());
}

#[test]
fn case_insensitive_matching_across_fields() {
    let (_tmp, engine) = fixture(&[doc("/c/Quarterly-Report.PDF", 100, None)]);

    assert_eq!(
        paths(&engine, &request("quarterly", SearchScope::Name)).len(),
        1
    );
    assert_eq!(
        paths(&engine, &request("ext:PDF", SearchScope::Both)).len(),
        1
    );
    assert_eq!(
        paths(&engine, &request("QUARTERLY", SearchScope::Name)).len(),
        1
    );
}
