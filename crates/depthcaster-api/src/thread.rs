//! Rebuilds a nested reply/quote tree from the flat rows stored under a
//! curated cast.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use depthcaster_db::models::ReplyRow;
use depthcaster_types::api::ThreadNode;
use depthcaster_types::cast::{CastPayload, normalize_hash};
use depthcaster_types::sort::ThreadSort;
use tracing::warn;

/// What to do with a row whose parent is referenced but not loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Show it as a top-level reply to the root.
    #[default]
    Promote,
    /// Leave it (and anything under it) out of the tree.
    Drop,
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrphanPolicy::Promote => "promote",
            OrphanPolicy::Drop => "drop",
        })
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "promote" => Ok(OrphanPolicy::Promote),
            "drop" => Ok(OrphanPolicy::Drop),
            other => Err(format!("unknown orphan policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Root,
    Child(usize),
    Orphan,
}

/// A quote that also replies to something needs that reply target for display.
fn display_parent(row: &ReplyRow) -> Option<String> {
    if row.is_quote && row.cast.replies_elsewhere() {
        row.cast.parent_hash.as_deref().map(normalize_hash)
    } else {
        None
    }
}

/// Reply targets of quote rows that are not among `rows` themselves and
/// must be looked up elsewhere before building.
pub fn quote_parents_to_resolve(rows: &[ReplyRow]) -> Vec<String> {
    let loaded: HashSet<String> = rows
        .iter()
        .map(|r| normalize_hash(&r.reply_cast_hash))
        .collect();

    rows.iter()
        .filter(|r| !r.is_metadata())
        .filter_map(display_parent)
        .filter(|p| !loaded.contains(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn classify(root: &str, row: &ReplyRow, own: usize, index: &HashMap<String, usize>) -> Placement {
    let Some(parent) = row.parent_cast_hash.as_deref().map(normalize_hash) else {
        return Placement::Root;
    };
    if parent == root {
        return Placement::Root;
    }

    match index.get(&parent) {
        Some(&p) if p != own => Placement::Child(p),
        _ => {
            let quotes_root = row
                .quoted_cast_hash
                .as_deref()
                .is_some_and(|q| normalize_hash(q) == root);
            if row.is_quote && quotes_root {
                Placement::Root
            } else {
                Placement::Orphan
            }
        }
    }
}

struct Tree<'a> {
    members: Vec<ReplyRow>,
    attached: Vec<Vec<usize>>,
    lookup: HashMap<String, &'a CastPayload>,
}

impl Tree<'_> {
    fn materialize(&self, i: usize, depth: u32) -> ThreadNode {
        let row = &self.members[i];
        let mut children: Vec<ThreadNode> = self.attached[i]
            .iter()
            .map(|&c| self.materialize(c, depth + 1))
            .collect();
        children.sort_by_cached_key(|n| (n.cast.timestamp, n.hash.clone()));

        let parent_cast = display_parent(row).and_then(|p| {
            self.lookup
                .get(&p)
                .map(|c| (*c).clone())
                .or_else(|| {
                    self.members
                        .iter()
                        .find(|m| normalize_hash(&m.reply_cast_hash) == p)
                        .map(|m| m.cast.clone())
                })
        });

        ThreadNode {
            hash: row.reply_cast_hash.clone(),
            depth,
            is_quote: row.is_quote,
            quoted_cast_hash: row.quoted_cast_hash.clone(),
            cast: row.cast.clone(),
            parent_cast,
            children,
        }
    }
}

/// Mark everything reachable from `start` as placed, recording the parent
/// each node hangs under. A node is only ever attached once.
fn attach_from(start: usize, children: &[Vec<usize>], placed: &mut [bool], attached: &mut [Vec<usize>]) {
    placed[start] = true;
    let mut stack = vec![start];
    while let Some(u) = stack.pop() {
        for &c in &children[u] {
            if !placed[c] {
                placed[c] = true;
                attached[u].push(c);
                stack.push(c);
            }
        }
    }
}

fn subtree_latest(node: &ThreadNode) -> DateTime<Utc> {
    node.children
        .iter()
        .map(subtree_latest)
        .fold(node.cast.timestamp, |a, b| a.max(b))
}

fn sort_top_level(nodes: &mut [ThreadNode], sort: ThreadSort) {
    match sort {
        ThreadSort::Newest => {
            nodes.sort_by_cached_key(|n| (Reverse(subtree_latest(n)), n.hash.clone()));
        }
        ThreadSort::Engagement => {
            nodes.sort_by_cached_key(|n| (Reverse(n.cast.engagement_score()), n.hash.clone()));
        }
        ThreadSort::Quality => {
            nodes.sort_by(|a, b| {
                b.cast
                    .quality_score()
                    .total_cmp(&a.cast.quality_score())
                    .then_with(|| a.hash.cmp(&b.hash))
            });
        }
        ThreadSort::Chronological => {
            nodes.sort_by_cached_key(|n| (n.cast.timestamp, n.hash.clone()));
        }
    }
}

/// Build the tree under `root`.
///
/// `rows` come straight from storage; metadata rows are used only as a
/// lookup table for quote parents, together with `stored_parents`. Depth is
/// recomputed from tree position, so top-level nodes are depth 1.
pub fn build_thread(
    root: &str,
    rows: Vec<ReplyRow>,
    sort: ThreadSort,
    policy: OrphanPolicy,
    stored_parents: &HashMap<String, CastPayload>,
) -> Vec<ThreadNode> {
    let root = normalize_hash(root);
    let (metadata, candidates): (Vec<ReplyRow>, Vec<ReplyRow>) =
        rows.into_iter().partition(ReplyRow::is_metadata);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut members = Vec::with_capacity(candidates.len());
    for row in candidates {
        let hash = normalize_hash(&row.reply_cast_hash);
        if hash == root || index.contains_key(&hash) {
            continue;
        }
        index.insert(hash, members.len());
        members.push(row);
    }

    let n = members.len();
    let mut parent_of: Vec<Option<usize>> = vec![None; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut dropped = vec![false; n];
    let mut top = Vec::new();

    for (i, row) in members.iter().enumerate() {
        match classify(&root, row, i, &index) {
            Placement::Root => top.push(i),
            Placement::Child(p) => {
                parent_of[i] = Some(p);
                children[p].push(i);
            }
            Placement::Orphan => {
                let parent = row.parent_cast_hash.as_deref().unwrap_or_default();
                match policy {
                    OrphanPolicy::Promote => {
                        warn!(
                            "Reply {} under {} has unknown parent {}; promoting to top level",
                            row.reply_cast_hash, root, parent
                        );
                        top.push(i);
                    }
                    OrphanPolicy::Drop => {
                        warn!(
                            "Reply {} under {} has unknown parent {}; dropping",
                            row.reply_cast_hash, root, parent
                        );
                        dropped[i] = true;
                    }
                }
            }
        }
    }

    let mut placed = vec![false; n];
    let mut attached: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &t in &top {
        attach_from(t, &children, &mut placed, &mut attached);
    }

    // Anything still unplaced either sits below a dropped row or is part of
    // a parent cycle. Cycles get the orphan treatment at their first row.
    for i in 0..n {
        if placed[i] || dropped[i] {
            continue;
        }
        let mut seen = HashSet::new();
        let mut cursor = parent_of[i];
        let mut under_dropped = false;
        while let Some(p) = cursor {
            if dropped[p] {
                under_dropped = true;
                break;
            }
            if !seen.insert(p) {
                break;
            }
            cursor = parent_of[p];
        }
        if under_dropped {
            continue;
        }

        match policy {
            OrphanPolicy::Promote => {
                warn!("Reply {} under {} is in a parent cycle; promoting", members[i].reply_cast_hash, root);
                top.push(i);
                attach_from(i, &children, &mut placed, &mut attached);
            }
            OrphanPolicy::Drop => {
                warn!("Reply {} under {} is in a parent cycle; dropping", members[i].reply_cast_hash, root);
                dropped[i] = true;
            }
        }
    }

    let mut lookup: HashMap<String, &CastPayload> = stored_parents.iter().map(|(k, v)| (normalize_hash(k), v)).collect();
    let metadata_casts: Vec<(String, CastPayload)> = metadata
        .into_iter()
        .map(|m| (normalize_hash(&m.reply_cast_hash), m.cast))
        .collect();
    for (hash, cast) in &metadata_casts {
        lookup.insert(hash.clone(), cast);
    }

    let tree = Tree {
        members,
        attached,
        lookup,
    };
    let mut nodes: Vec<ThreadNode> = top.iter().map(|&t| tree.materialize(t, 1)).collect();
    sort_top_level(&mut nodes, sort);
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use depthcaster_types::cast::{CastEmbed, CastId};

    const ROOT: &str = "0xaaa";

    fn cast(hash: &str, parent: Option<&str>, minute: u32) -> CastPayload {
        let mut c: CastPayload = serde_json::from_value(serde_json::json!({
            "hash": hash,
            "author": { "fid": 7, "username": "bob" },
            "text": format!("reply {hash}"),
            "timestamp": Utc.with_ymd_and_hms(2025, 2, 1, 9, minute, 0).unwrap(),
        }))
        .unwrap();
        c.parent_hash = parent.map(str::to_string);
        c
    }

    fn reply(hash: &str, parent: &str, minute: u32) -> ReplyRow {
        ReplyRow::from_cast(cast(hash, Some(parent), minute), ROOT, 1)
    }

    fn quote_of(hash: &str, quoted: &str, parent: Option<&str>, minute: u32) -> ReplyRow {
        let mut c = cast(hash, parent, minute);
        c.embeds.push(CastEmbed::Cast {
            cast_id: CastId {
                fid: None,
                hash: quoted.to_string(),
            },
            cast: None,
        });
        ReplyRow::from_cast(c, ROOT, 1)
    }

    fn build(rows: Vec<ReplyRow>, sort: ThreadSort, policy: OrphanPolicy) -> Vec<ThreadNode> {
        build_thread(ROOT, rows, sort, policy, &HashMap::new())
    }

    fn hashes(nodes: &[ThreadNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.hash.as_str()).collect()
    }

    #[test]
    fn nested_reply_chain() {
        let rows = vec![reply("0xbbb", "0xaaa", 1), reply("0xccc", "0xbbb", 2)];
        let tree = build(rows, ThreadSort::Chronological, OrphanPolicy::Promote);

        assert_eq!(hashes(&tree), vec!["0xbbb"]);
        assert_eq!(tree[0].depth, 1);
        assert_eq!(hashes(&tree[0].children), vec!["0xccc"]);
        assert_eq!(tree[0].children[0].depth, 2);
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let rows = vec![
            reply("0xb1", "0xaaa", 3),
            reply("0xb2", "0xaaa", 1),
            reply("0xc1", "0xb1", 5),
            reply("0xc2", "0xb1", 4),
            reply("0xd1", "0xc1", 6),
            reply("0xorphan", "0xmissing", 2),
        ];
        for sort in [
            ThreadSort::Newest,
            ThreadSort::Engagement,
            ThreadSort::Quality,
            ThreadSort::Chronological,
        ] {
            let a = serde_json::to_value(build(rows.clone(), sort, OrphanPolicy::Promote)).unwrap();
            let b = serde_json::to_value(build(rows.clone(), sort, OrphanPolicy::Promote)).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn parent_match_ignores_case() {
        let rows = vec![reply("0xbbb", "0xAAA", 1), reply("0xccc", "0xBBB", 2)];
        let tree = build(rows, ThreadSort::Chronological, OrphanPolicy::Promote);
        assert_eq!(hashes(&tree[0].children), vec!["0xccc"]);
    }

    #[test]
    fn orphans_follow_policy() {
        let rows = vec![
            reply("0xbbb", "0xaaa", 1),
            reply("0xlost", "0xelsewhere", 2),
            reply("0xunder", "0xlost", 3),
        ];

        let promoted = build(rows.clone(), ThreadSort::Chronological, OrphanPolicy::Promote);
        assert_eq!(hashes(&promoted), vec!["0xbbb", "0xlost"]);
        assert_eq!(hashes(&promoted[1].children), vec!["0xunder"]);

        let dropped = build(rows, ThreadSort::Chronological, OrphanPolicy::Drop);
        assert_eq!(hashes(&dropped), vec!["0xbbb"]);
        assert!(dropped[0].children.is_empty());
    }

    #[test]
    fn parent_cycles_terminate() {
        let rows = vec![reply("0xx", "0xy", 1), reply("0xy", "0xx", 2)];

        let promoted = build(rows.clone(), ThreadSort::Chronological, OrphanPolicy::Promote);
        assert_eq!(hashes(&promoted), vec!["0xx"]);
        assert_eq!(hashes(&promoted[0].children), vec!["0xy"]);

        assert!(build(rows, ThreadSort::Chronological, OrphanPolicy::Drop).is_empty());
    }

    #[test]
    fn children_stay_chronological_under_any_sort() {
        let mut popular = reply("0xb2", "0xaaa", 2);
        popular.cast.reactions.likes_count = 50;
        let rows = vec![
            reply("0xb1", "0xaaa", 1),
            popular,
            reply("0xc2", "0xb1", 9),
            reply("0xc1", "0xb1", 8),
        ];

        let tree = build(rows, ThreadSort::Engagement, OrphanPolicy::Promote);
        assert_eq!(hashes(&tree), vec!["0xb2", "0xb1"]);
        assert_eq!(hashes(&tree[1].children), vec!["0xc1", "0xc2"]);
    }

    #[test]
    fn newest_looks_at_whole_subtree() {
        let rows = vec![
            reply("0xold", "0xaaa", 1),
            reply("0xnew", "0xaaa", 5),
            reply("0xlate", "0xold", 30),
        ];
        let tree = build(rows, ThreadSort::Newest, OrphanPolicy::Promote);
        assert_eq!(hashes(&tree), vec!["0xold", "0xnew"]);
    }

    #[test]
    fn quality_prefers_high_score_authors() {
        let mut strong = reply("0xs", "0xaaa", 1);
        strong.cast.author.score = Some(0.9);
        let rows = vec![reply("0xw", "0xaaa", 0), strong];
        let tree = build(rows, ThreadSort::Quality, OrphanPolicy::Promote);
        assert_eq!(hashes(&tree), vec!["0xs", "0xw"]);
    }

    #[test]
    fn quote_of_root_with_unloaded_parent_is_top_level() {
        let rows = vec![quote_of("0xq", ROOT, Some("0xsomewhere"), 1)];
        let tree = build(rows, ThreadSort::Chronological, OrphanPolicy::Drop);
        assert_eq!(hashes(&tree), vec!["0xq"]);
        assert!(tree[0].is_quote);
    }

    #[test]
    fn metadata_rows_supply_quote_parents_only() {
        let q = quote_of("0xq", ROOT, Some("0xtarget"), 2);
        let target = ReplyRow::metadata(cast("0xtarget", None, 0), ROOT);
        assert_eq!(quote_parents_to_resolve(&[q.clone(), target.clone()]), Vec::<String>::new());

        let tree = build(vec![q, target], ThreadSort::Chronological, OrphanPolicy::Promote);
        assert_eq!(hashes(&tree), vec!["0xq"]);
        assert_eq!(tree[0].parent_cast.as_ref().map(|c| c.hash.as_str()), Some("0xtarget"));
    }

    #[test]
    fn stored_parents_fill_the_gap() {
        let q = quote_of("0xq", ROOT, Some("0xtarget"), 2);
        assert_eq!(quote_parents_to_resolve(std::slice::from_ref(&q)), vec!["0xtarget".to_string()]);

        let mut stored = HashMap::new();
        stored.insert("0xtarget".to_string(), cast("0xtarget", None, 0));
        let tree = build_thread(ROOT, vec![q], ThreadSort::Chronological, OrphanPolicy::Promote, &stored);
        assert!(tree[0].parent_cast.is_some());
    }

    #[test]
    fn orphan_policy_parses() {
        assert_eq!("Drop".parse::<OrphanPolicy>().unwrap(), OrphanPolicy::Drop);
        assert!("keep".parse::<OrphanPolicy>().is_err());
    }
}
