use depthcaster_types::cast::CastPayload;
use serde::Deserialize;

/// A cast together with its nested `direct_replies`, as returned by the
/// upstream conversation endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationCast {
    #[serde(flatten)]
    pub cast: CastPayload,
    #[serde(default)]
    pub direct_replies: Vec<ConversationCast>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    #[serde(rename = "cast")]
    pub root: ConversationCast,
}

impl Conversation {
    /// Every reply below the root in depth-first order, paired with its depth
    /// (1 for direct replies to the root).
    pub fn flatten(&self) -> Vec<(CastPayload, u32)> {
        let mut out = Vec::new();
        let mut stack: Vec<(&ConversationCast, u32)> =
            self.root.direct_replies.iter().rev().map(|c| (c, 1)).collect();

        while let Some((node, depth)) = stack.pop() {
            out.push((node.cast.clone(), depth));
            stack.extend(node.direct_replies.iter().rev().map(|c| (c, depth + 1)));
        }
        out
    }
}
