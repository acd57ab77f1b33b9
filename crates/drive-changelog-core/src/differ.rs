//! Change classification and revision-pair diffing.
//!
//! Classification is pure; only [`evaluate`] and [`diff_revisions`] touch the
//! remote store, and they never fail: any remote error degrades to "no diff".

use similar::{ChangeTag, TextDiff};
use tracing::{debug, warn};

use crate::event::EventType;
use crate::remote::{ChangeRecord, RemoteStore, Revision};

/// Lines of unchanged context around each hunk.
const CONTEXT_RADIUS: usize = 3;

/// Result of decoding revision bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Text(String),
    Binary,
}

/// Decode revision content as UTF-8 text. A byte order mark is kept.
pub fn decode(bytes: Vec<u8>) -> Decoded {
    match String::from_utf8(bytes) {
        Ok(text) => Decoded::Text(text),
        Err(_) => Decoded::Binary,
    }
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r'
            | '\x0b'
            | '\x0c'
            | '\x1c'
            | '\x1d'
            | '\x1e'
            | '\u{85}'
            | '\u{2028}'
            | '\u{2029}'
    )
}

/// Split on every Unicode line boundary; `\r\n` counts as one break and a
/// trailing break does not open an empty line.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..i]);
        let mut end = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(_, '\n')) = chars.peek() {
                chars.next();
                end += 1;
            }
        }
        start = end;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Classify a change given the item's revision history.
pub fn classify(change: &ChangeRecord, revisions: &[Revision]) -> EventType {
    if change.removed {
        EventType::Delete
    } else if revisions.len() <= 1 {
        EventType::Create
    } else {
        EventType::Update
    }
}

/// Line-based unified diff from `old` to `new`.
///
/// Returns an empty string when the texts have the same lines.
pub fn unified_diff(old_label: &str, new_label: &str, old: &str, new: &str) -> String {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let diff = TextDiff::from_slices(&old_lines, &new_lines);

    let mut unified = diff.unified_diff();
    unified.context_radius(CONTEXT_RADIUS);

    let mut out: Vec<String> = Vec::new();
    for hunk in unified.iter_hunks() {
        if out.is_empty() {
            out.push(format!("--- {}", old_label));
            out.push(format!("+++ {}", new_label));
        }
        out.push(hunk.header().to_string());
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Equal => ' ',
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
            };
            out.push(format!("{}{}", sign, change.value()));
        }
    }

    out.join("\n")
}

/// Diff the two most recent revisions of an item.
///
/// `None` when there are fewer than two revisions, either side is binary,
/// the content is unchanged, or the content could not be fetched.
pub async fn diff_revisions(
    remote: &dyn RemoteStore,
    item_id: &str,
    revisions: &[Revision],
) -> Option<String> {
    let [.., previous, latest] = revisions else {
        return None;
    };

    let old = match remote.download_revision(item_id, previous).await {
        Ok(bytes) => decode(bytes),
        Err(e) => {
            warn!("Failed to diff revisions for {}: {}", item_id, e);
            return None;
        }
    };
    let new = match remote.download_revision(item_id, latest).await {
        Ok(bytes) => decode(bytes),
        Err(e) => {
            warn!("Failed to diff revisions for {}: {}", item_id, e);
            return None;
        }
    };

    match (old, new) {
        (Decoded::Text(old), Decoded::Text(new)) => {
            let diff = unified_diff(&previous.id, &latest.id, &old, &new);
            if diff.is_empty() {
                debug!(
                    "Revisions {} and {} of {} have identical text",
                    previous.id, latest.id, item_id
                );
                None
            } else {
                Some(diff)
            }
        }
        _ => {
            debug!("Binary content change for {}, no diff", item_id);
            None
        }
    }
}

/// Classify one change and compute its diff when it is an update.
pub async fn evaluate(
    remote: &dyn RemoteStore,
    change: &ChangeRecord,
) -> (EventType, Option<String>) {
    if change.removed {
        return (EventType::Delete, None);
    }
    if change.is_folder() {
        return (EventType::Create, None);
    }

    let revisions = match remote.list_revisions(&change.item_id).await {
        Ok(revisions) => revisions,
        Err(e) => {
            warn!(
                "Failed to list revisions for {}, recording update without diff: {}",
                change.item_id, e
            );
            return (EventType::Update, None);
        }
    };

    match classify(change, &revisions) {
        EventType::Update => {
            let diff = diff_revisions(remote, &change.item_id, &revisions).await;
            (EventType::Update, diff)
        }
        other => (other, None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::cursor::Cursor;
    use crate::error::SyncError;
    use crate::remote::ChangePage;

    struct FakeRemote {
        revisions: Vec<Revision>,
        content: HashMap<String, Vec<u8>>,
        fail_listing: bool,
    }

    impl FakeRemote {
        fn with_texts(texts: &[(&str, &[u8])]) -> Self {
            Self {
                revisions: texts
                    .iter()
                    .map(|(id, _)| Revision {
                        id: id.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                content: texts
                    .iter()
                    .map(|(id, bytes)| (id.to_string(), bytes.to_vec()))
                    .collect(),
                fail_listing: false,
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn start_cursor(&self) -> Result<Cursor, SyncError> {
            Ok(Cursor::parse("1").unwrap())
        }

        async fn list_changes(&self, _cursor: &Cursor) -> Result<ChangePage, SyncError> {
            Ok(ChangePage::default())
        }

        async fn list_revisions(&self, _item_id: &str) -> Result<Vec<Revision>, SyncError> {
            if self.fail_listing {
                return Err(SyncError::Remote("boom".into()));
            }
            Ok(self.revisions.clone())
        }

        async fn download_revision(
            &self,
            _item_id: &str,
            revision: &Revision,
        ) -> Result<Vec<u8>, SyncError> {
            self.content
                .get(&revision.id)
                .cloned()
                .ok_or_else(|| SyncError::Remote(format!("missing {}", revision.id)))
        }
    }

    fn change(removed: bool) -> ChangeRecord {
        ChangeRecord {
            item_id: "file-1".into(),
            item_name: Some("notes.txt".into()),
            removed,
            mime_type: Some("text/plain".into()),
        }
    }

    fn revs(n: usize) -> Vec<Revision> {
        (0..n)
            .map(|i| Revision {
                id: format!("r{}", i),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&change(false), &revs(0)), EventType::Create);
        assert_eq!(classify(&change(false), &revs(1)), EventType::Create);
        assert_eq!(classify(&change(false), &revs(2)), EventType::Update);
        assert_eq!(classify(&change(false), &revs(7)), EventType::Update);
        assert_eq!(classify(&change(true), &revs(0)), EventType::Delete);
        assert_eq!(classify(&change(true), &revs(5)), EventType::Delete);
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode(b"hello".to_vec()), Decoded::Text("hello".into()));
        assert_eq!(
            decode(b"\xef\xbb\xbfhello".to_vec()),
            Decoded::Text("\u{feff}hello".into())
        );
        assert_eq!(decode(vec![0xff, 0xfe, 0x00, 0x81]), Decoded::Binary);
    }

    #[test]
    fn test_unified_diff_changed_line() {
        let diff = unified_diff("r1", "r2", "line1\nline2\n", "line1\nline2 changed\n");
        assert!(diff.starts_with("--- r1\n+++ r2\n@@"));
        assert!(diff.lines().any(|l| l == "-line2"));
        assert!(diff.lines().any(|l| l == "+line2 changed"));
        assert!(diff.lines().any(|l| l == " line1"));
        assert!(!diff.ends_with('\n'));
    }

    #[test]
    fn test_split_lines_boundaries() {
        assert_eq!(split_lines("a\nb\r\nc\rd"), vec!["a", "b", "c", "d"]);
        assert_eq!(
            split_lines("a\x0bb\x0cc\x1cd\x1de\x1ef\u{85}g\u{2028}h\u{2029}i"),
            vec!["a", "b", "c", "d", "e", "f", "g", "h", "i"]
        );
        assert_eq!(split_lines("a\n\nb\n"), vec!["a", "", "b"]);
        assert_eq!(split_lines("a\r\r\n"), vec!["a", ""]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_unified_diff_carriage_return_lines() {
        let diff = unified_diff("a", "b", "l1\rl2\rl3", "l1\rl2 changed\rl3");
        assert!(diff.lines().any(|l| l == "-l2"));
        assert!(diff.lines().any(|l| l == "+l2 changed"));
        assert!(diff.lines().any(|l| l == " l1"));
        assert!(diff.lines().any(|l| l == " l3"));
        assert!(!diff.contains('\r'));
    }

    #[test]
    fn test_unified_diff_byte_order_mark_is_a_change() {
        let old = match decode(b"\xef\xbb\xbfhello\n".to_vec()) {
            Decoded::Text(text) => text,
            Decoded::Binary => panic!("expected text"),
        };
        let diff = unified_diff("a", "b", &old, "hello\n");
        assert!(diff.lines().any(|l| l == "-\u{feff}hello"));
        assert!(diff.lines().any(|l| l == "+hello"));
    }

    #[test]
    fn test_unified_diff_identical_is_empty() {
        assert_eq!(unified_diff("a", "b", "same\ntext\n", "same\ntext\n"), "");
        // Trailing newline differences are not line differences.
        assert_eq!(unified_diff("a", "b", "same\ntext", "same\ntext\n"), "");
    }

    #[tokio::test]
    async fn test_evaluate_update_with_diff() {
        let remote = FakeRemote::with_texts(&[
            ("r0", b"ancient\n"),
            ("r1", b"line1\nline2\n"),
            ("r2", b"line1\nline2 changed\n"),
        ]);

        let (event_type, diff) = evaluate(&remote, &change(false)).await;
        assert_eq!(event_type, EventType::Update);
        let diff = diff.unwrap();
        assert!(diff.contains("--- r1"));
        assert!(diff.contains("+++ r2"));
        assert!(!diff.contains("ancient"));
    }

    #[tokio::test]
    async fn test_evaluate_binary_has_no_diff() {
        let remote = FakeRemote::with_texts(&[("r1", b"text\n"), ("r2", &[0xff, 0x00, 0xfe])]);
        let (event_type, diff) = evaluate(&remote, &change(false)).await;
        assert_eq!(event_type, EventType::Update);
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn test_evaluate_unchanged_content_has_no_diff() {
        let remote = FakeRemote::with_texts(&[("r1", b"same\n"), ("r2", b"same\n")]);
        let (event_type, diff) = evaluate(&remote, &change(false)).await;
        assert_eq!(event_type, EventType::Update);
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn test_evaluate_download_failure_has_no_diff() {
        let mut remote = FakeRemote::with_texts(&[("r1", b"a\n"), ("r2", b"b\n")]);
        remote.content.remove("r1");
        let (event_type, diff) = evaluate(&remote, &change(false)).await;
        assert_eq!(event_type, EventType::Update);
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn test_evaluate_listing_failure_is_contained() {
        let mut remote = FakeRemote::with_texts(&[]);
        remote.fail_listing = true;
        let (event_type, diff) = evaluate(&remote, &change(false)).await;
        assert_eq!(event_type, EventType::Update);
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn test_evaluate_removed_skips_remote() {
        let mut remote = FakeRemote::with_texts(&[("r1", b"a\n"), ("r2", b"b\n")]);
        remote.fail_listing = true;
        let (event_type, diff) = evaluate(&remote, &change(true)).await;
        assert_eq!(event_type, EventType::Delete);
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn test_evaluate_single_revision_is_create() {
        let remote = FakeRemote::with_texts(&[("r1", b"a\n")]);
        let (event_type, diff) = evaluate(&remote, &change(false)).await;
        assert_eq!(event_type, EventType::Create);
        assert!(diff.is_none());
    }
}
