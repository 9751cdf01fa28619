use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollType {
    Ranking,
    Choice,
    Allocation,
}

impl PollType {
    pub fn as_str(self) -> &'static str {
        match self {
            PollType::Ranking => "ranking",
            PollType::Choice => "choice",
            PollType::Allocation => "allocation",
        }
    }
}

impl fmt::Display for PollType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ranking" => Ok(PollType::Ranking),
            "choice" => Ok(PollType::Choice),
            "allocation" => Ok(PollType::Allocation),
            other => Err(format!("unknown poll type: {other}")),
        }
    }
}

/// A single user's answer. The variant must match the poll's type.
///
/// Keys of the maps are option ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PollAnswer {
    /// Option ids, most preferred first.
    Ranking(Vec<i64>),
    Choices(BTreeMap<i64, String>),
    Allocations(BTreeMap<i64, u32>),
}

impl PollAnswer {
    pub fn poll_type(&self) -> PollType {
        match self {
            PollAnswer::Ranking(_) => PollType::Ranking,
            PollAnswer::Choices(_) => PollType::Choice,
            PollAnswer::Allocations(_) => PollType::Allocation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionView {
    pub id: i64,
    pub text: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: i64,
    pub cast_hash: String,
    pub question: String,
    pub poll_type: PollType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub choices: Vec<String>,
    pub allocation_budget: u32,
    pub created_by: u64,
    pub options: Vec<PollOptionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_answer: Option<PollAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub option_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rank: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub choice_counts: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_allocation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_allocation: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: i64,
    pub poll_type: PollType,
    pub total_responses: u64,
    pub options: Vec<OptionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_shapes_from_json() {
        let ranking: PollAnswer = serde_json::from_str(r#"{"ranking":[3,1,2]}"#).unwrap();
        assert_eq!(ranking.poll_type(), PollType::Ranking);

        let choices: PollAnswer = serde_json::from_str(r#"{"choices":{"1":"love","2":"meh"}}"#).unwrap();
        match choices {
            PollAnswer::Choices(map) => assert_eq!(map.get(&2).map(String::as_str), Some("meh")),
            other => panic!("unexpected {other:?}"),
        }

        let alloc: PollAnswer = serde_json::from_str(r#"{"allocations":{"5":60,"6":40}}"#).unwrap();
        assert_eq!(alloc.poll_type(), PollType::Allocation);
    }
}
