//! Failure translation: raw test output to a [`CorrectionReport`]
//!
//! Understands pytest's `-v --tb=short` output:
//!
//! - summary markers `FAILED <file>::<test> - <message>` and `ERROR <file>[::<test>]`
//! - verbose progress lines `<file>::<test> FAILED`
//! - `____ <test> ____` blocks in the FAILURES / ERRORS sections
//!
//! Each failing test becomes one issue on the production artifact its test
//! file exercises (`test_calc.py` and `calc_test.py` both map to `calc.py`).
//! Translation is pure: the same outcome always yields the same report.

use refix_core::{CorrectionReport, TestOutcome};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// `FAILED calc_test.py::test_add - assert -1 == 5` / `ERROR calc_test.py`
///
/// Parametrize brackets may contain spaces: `test_x[a b]`.
static SUMMARY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:FAILED|ERROR)\s+([^\s:]+\.\w+)(?:::(\S+?(?:\[[^\]]*\])?))?(?:\s+-\s+(.*?))?\s*$",
    )
    .expect("summary marker regex")
});

/// `calc_test.py::test_add FAILED [ 50%]`
static PROGRESS_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\s:]+\.\w+)::(\S+?(?:\[[^\]]*\])?)\s+(?:FAILED|ERROR)\b")
        .expect("progress marker regex")
});

/// `test_calc.py:5: in test_add` inside a traceback block
static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\s:]+\.\w+):\d+:").expect("location regex"));

/// `=====` and `_____` rules
static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:={3,}|_{3,})").expect("separator regex"));

/// `_____ test_add _____`
static BLOCK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_{3,}\s+(.+?)\s+_{3,}\s*$").expect("block header regex"));

static ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bassert\s+(.+?)\s+(==|!=|<=|>=|<|>|not in|in|is not|is)\s+(.+?)\s*$")
        .expect("assertion regex")
});

/// `E   ZeroDivisionError: division by zero`
static EXCEPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:E\s+)?\s*([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt))(?::\s*(.*?))?\s*$")
        .expect("exception regex")
});

/// Test id used for collection errors (no test function involved)
const COLLECTION_ID: &str = "collection";

/// Map a test artifact to the production artifact it exercises
///
/// Strips a leading `test_` or a trailing `_test` from the file stem and
/// keeps directory components. Other names are returned unchanged.
pub fn production_artifact_for(test_artifact: &str) -> String {
    let normalized = normalize_path(test_artifact);
    let (dir, base) = match normalized.rsplit_once('/') {
        Some((dir, base)) => (Some(dir), base),
        None => (None, normalized.as_str()),
    };
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (base, None),
    };

    let stem = if let Some(rest) = stem.strip_prefix("test_").filter(|r| !r.is_empty()) {
        rest
    } else if let Some(rest) = stem.strip_suffix("_test").filter(|r| !r.is_empty()) {
        rest
    } else {
        stem
    };

    let base = match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    };
    match dir {
        Some(dir) => format!("{}/{}", dir, base),
        None => base,
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Translate with name mapping only (no artifact set to check against)
pub fn translate(outcome: &TestOutcome) -> CorrectionReport {
    FailureTranslator::new().translate(outcome)
}

/// Translates failing test output into per-artifact issues
#[derive(Debug, Clone, Default)]
pub struct FailureTranslator {
    known: Option<BTreeSet<String>>,
}

/// One `____ name ____` traceback block
#[derive(Debug)]
struct Block {
    key: String,
    /// File of the first `file.py:N:` line
    location: Option<String>,
    lines: Vec<String>,
}

#[derive(Debug)]
struct Marker {
    test_artifact: String,
    test_id: String,
    /// Text after ` - ` on summary lines
    messages: Vec<String>,
    /// Lines following the marker up to the next marker or rule
    window: Vec<String>,
}

impl FailureTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only report issues against these artifact names
    pub fn with_known_artifacts<I, S>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(artifacts.into_iter().map(Into::into).collect()),
        }
    }

    pub fn translate(&self, outcome: &TestOutcome) -> CorrectionReport {
        let mut report = CorrectionReport::new();
        if !outcome.has_failures() {
            return report;
        }

        let blocks = index_blocks(&outcome.lines);
        let (markers, orphans) = scan_markers(&outcome.lines);

        let mut claimed = vec![false; blocks.len()];
        let mut resolved: Vec<Option<String>> = Vec::with_capacity(markers.len());
        for marker in &markers {
            // Claim in marker order so same-named tests keep their own block
            let block = claim_block(&blocks, &mut claimed, marker);
            let artifact = self.resolve(&marker.test_artifact);
            resolved.push(artifact.clone());
            let Some(artifact) = artifact else {
                continue;
            };

            let context = find_context(&marker.messages, &marker.window)
                .or_else(|| block.and_then(|block| find_context(&[], &block.lines)));
            let issue = match context {
                Some(context) => format!("{} failed - {}", marker.test_id, context),
                None => {
                    debug!(
                        "No assertion or exception found for {}::{}",
                        marker.test_artifact, marker.test_id
                    );
                    format!("{} failed - check logic", marker.test_id)
                }
            };
            report.push(artifact, issue);
        }

        for (idx, text) in orphans {
            if let Some(Some(artifact)) = resolved.get(idx) {
                report.push(artifact.clone(), text);
            }
        }

        if report.is_empty() {
            warn!(
                "{} failed / {} errored tests produced no actionable issues",
                outcome.failed, outcome.errors
            );
        }
        report
    }

    fn resolve(&self, test_artifact: &str) -> Option<String> {
        let test_artifact = normalize_path(test_artifact);
        let mapped = production_artifact_for(&test_artifact);

        let Some(known) = &self.known else {
            return Some(mapped);
        };

        if known.contains(&mapped) {
            return Some(mapped);
        }

        let wanted = base_name(&mapped);
        let mut same_name = known.iter().filter(|name| base_name(name) == wanted);
        if let (Some(only), None) = (same_name.next(), same_name.next()) {
            return Some(only.clone());
        }

        if known.contains(&test_artifact) {
            return Some(test_artifact);
        }

        warn!(
            "Dropping failures from {}: no artifact named {}",
            test_artifact, mapped
        );
        None
    }
}

/// Walk the output, collecting markers with their context windows and
/// exception lines that sit outside every window and block
fn scan_markers(lines: &[String]) -> (Vec<Marker>, Vec<(usize, String)>) {
    let mut markers: Vec<Marker> = Vec::new();
    let mut by_key: HashMap<(String, String), usize> = HashMap::new();
    let mut orphans = Vec::new();

    let mut current: Option<usize> = None;
    let mut last: Option<usize> = None;
    let mut in_block = false;

    for line in lines {
        let line = line.trim_end();

        if let Some((test_artifact, test_id, tail)) = parse_marker(line) {
            let key = (test_artifact.clone(), test_id.clone());
            let idx = *by_key.entry(key).or_insert_with(|| {
                markers.push(Marker {
                    test_artifact,
                    test_id,
                    messages: Vec::new(),
                    window: Vec::new(),
                });
                markers.len() - 1
            });
            if let Some(tail) = tail {
                markers[idx].messages.push(tail);
            }
            current = Some(idx);
            last = Some(idx);
            in_block = false;
            continue;
        }

        if SEPARATOR.is_match(line) {
            current = None;
            in_block = BLOCK_HEADER.is_match(line);
            continue;
        }

        if let Some(idx) = current {
            markers[idx].window.push(line.to_string());
        } else if !in_block {
            if let (Some(idx), Some(text)) = (last, exception_text(line)) {
                orphans.push((idx, text));
            }
        }
    }

    (markers, orphans)
}

fn parse_marker(line: &str) -> Option<(String, String, Option<String>)> {
    if let Some(caps) = SUMMARY_MARKER.captures(line) {
        let test_artifact = normalize_path(&caps[1]);
        let test_id = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| COLLECTION_ID.to_string());
        let tail = caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty());
        return Some((test_artifact, test_id, tail));
    }

    PROGRESS_MARKER
        .captures(line)
        .map(|caps| (normalize_path(&caps[1]), caps[2].to_string(), None))
}

/// Collect `____ name ____` blocks in output order
///
/// Headers carry no file name, so blocks of same-named tests in different
/// files stay separate.
fn index_blocks(lines: &[String]) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut open = false;

    for line in lines {
        let line = line.trim_end();
        if let Some(caps) = BLOCK_HEADER.captures(line) {
            blocks.push(Block {
                key: header_key(&caps[1]),
                location: None,
                lines: Vec::new(),
            });
            open = true;
            continue;
        }
        if SEPARATOR.is_match(line) || parse_marker(line).is_some() {
            open = false;
            continue;
        }
        if !open {
            continue;
        }
        if let Some(block) = blocks.last_mut() {
            if block.location.is_none() {
                block.location = LOCATION
                    .captures(line)
                    .map(|caps| normalize_path(&caps[1]));
            }
            block.lines.push(line.to_string());
        }
    }

    blocks
}

/// First unclaimed block for a marker, preferring one located in its file
fn claim_block<'a>(
    blocks: &'a [Block],
    claimed: &mut [bool],
    marker: &Marker,
) -> Option<&'a Block> {
    let key = block_key(&marker.test_artifact, &marker.test_id);
    let candidates: Vec<usize> = (0..blocks.len())
        .filter(|&i| !claimed[i] && blocks[i].key == key)
        .collect();

    let idx = candidates
        .iter()
        .copied()
        .find(|&i| {
            blocks[i]
                .location
                .as_deref()
                .is_some_and(|file| same_file(file, &marker.test_artifact))
        })
        .or_else(|| candidates.first().copied())?;

    claimed[idx] = true;
    Some(&blocks[idx])
}

fn same_file(a: &str, b: &str) -> bool {
    a == b || base_name(a) == base_name(b)
}

fn header_key(header: &str) -> String {
    let header = header.trim();
    if let Some(file) = header.strip_prefix("ERROR collecting ") {
        return format!("{}::{}", normalize_path(file), COLLECTION_ID);
    }
    let name = header
        .strip_prefix("ERROR at setup of ")
        .or_else(|| header.strip_prefix("ERROR at teardown of "))
        .unwrap_or(header);
    name.replace("::", ".")
}

fn block_key(test_artifact: &str, test_id: &str) -> String {
    if test_id == COLLECTION_ID {
        format!("{}::{}", test_artifact, COLLECTION_ID)
    } else {
        test_id.replace("::", ".")
    }
}

/// Best description of a failure
///
/// Marker messages and evaluated `E ` lines win over source lines; within
/// each group an assertion wins over an exception.
fn find_context(messages: &[String], window: &[String]) -> Option<String> {
    let evaluated = || {
        messages
            .iter()
            .chain(window.iter().filter(|line| line.starts_with("E ")))
    };

    evaluated()
        .find_map(|line| assertion_text(line))
        .or_else(|| evaluated().find_map(|line| exception_text(line)))
        .or_else(|| window.iter().find_map(|line| assertion_text(line)))
        .or_else(|| window.iter().find_map(|line| exception_text(line)))
}

fn assertion_text(line: &str) -> Option<String> {
    let caps = ASSERTION.captures(line)?;
    let left = caps[1].trim();
    let right = caps[3].trim();
    if left == right {
        return None;
    }
    Some(format!("assert {} {} {}", left, &caps[2], right))
}

fn exception_text(line: &str) -> Option<String> {
    let caps = EXCEPTION.captures(line.trim())?;
    let kind = &caps[1];
    match caps.get(2).map(|m| m.as_str().trim()).filter(|m| !m.is_empty()) {
        Some(message) => Some(format!("{}: {}", kind, message)),
        None => Some(kind.to_string()),
    }
}
