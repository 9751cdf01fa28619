use std::collections::{BTreeMap, HashMap, HashSet};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use depthcaster_db::models::{NewPoll, PollResponseRow, PollRow};
use depthcaster_types::api::{Claims, CreatePollRequest};
use depthcaster_types::poll::{OptionResult, PollAnswer, PollOptionView, PollResults, PollType, PollView};
use depthcaster_types::roles::Capability;
use tracing::{info, warn};

use crate::curation::parse_hash;
use crate::error::{ApiError, ApiResult};
use crate::roles::require_capability;
use crate::state::{AppState, run_db};

pub const DEFAULT_ALLOCATION_BUDGET: u32 = 100;
const MAX_OPTIONS: usize = 10;
const MAX_SLUG_LEN: usize = 64;

fn view(poll: PollRow, viewer_answer: Option<PollAnswer>) -> PollView {
    PollView {
        id: poll.id,
        cast_hash: poll.cast_hash,
        question: poll.question,
        poll_type: poll.poll_type,
        slug: poll.slug,
        choices: poll.choices,
        allocation_budget: poll.allocation_budget,
        created_by: poll.created_by,
        options: poll
            .options
            .into_iter()
            .map(|o| PollOptionView {
                id: o.id,
                text: o.text,
                order_index: o.order_index,
            })
            .collect(),
        viewer_answer,
    }
}

fn non_empty_trimmed(items: &[String]) -> Option<Vec<String>> {
    let trimmed: Vec<String> = items.iter().map(|s| s.trim().to_string()).collect();
    trimmed.iter().all(|s| !s.is_empty()).then_some(trimmed)
}

/// Check a create request and turn it into a storable poll.
fn new_poll(req: CreatePollRequest, cast_hash: String, created_by: u64) -> Result<NewPoll, String> {
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err("question is required".into());
    }

    let options = non_empty_trimmed(&req.options).ok_or("options must not be blank")?;
    if options.len() < 2 || options.len() > MAX_OPTIONS {
        return Err(format!("a poll needs 2 to {MAX_OPTIONS} options"));
    }
    if options.iter().collect::<HashSet<_>>().len() != options.len() {
        return Err("options must be distinct".into());
    }

    let choices = match req.poll_type {
        PollType::Choice => {
            let choices = non_empty_trimmed(req.choices.as_deref().unwrap_or_default())
                .ok_or("choices must not be blank")?;
            if choices.len() < 2 {
                return Err("choice polls need at least 2 choices".into());
            }
            choices
        }
        _ => Vec::new(),
    };

    let allocation_budget = req.allocation_budget.unwrap_or(DEFAULT_ALLOCATION_BUDGET);
    if req.poll_type == PollType::Allocation && allocation_budget == 0 {
        return Err("allocationBudget must be positive".into());
    }

    let slug = match req.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(s) => {
            let valid = s.len() <= MAX_SLUG_LEN
                && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !valid {
                return Err("slug may only contain lowercase letters, digits and '-'".into());
            }
            // Hash-shaped keys always resolve by cast hash.
            if parse_hash(s).is_ok() {
                return Err("slug must not look like a cast hash".into());
            }
            Some(s.to_string())
        }
    };

    Ok(NewPoll {
        cast_hash,
        slug,
        question,
        poll_type: req.poll_type,
        choices,
        allocation_budget,
        created_by,
        options,
    })
}

/// An answer must have the poll's shape and refer only to its options.
pub fn validate_answer(poll: &PollRow, answer: &PollAnswer) -> Result<(), String> {
    if answer.poll_type() != poll.poll_type {
        return Err(format!(
            "expected a {} answer, got {}",
            poll.poll_type,
            answer.poll_type()
        ));
    }
    let option_ids: HashSet<i64> = poll.options.iter().map(|o| o.id).collect();

    match answer {
        PollAnswer::Ranking(ranking) => {
            let ranked: HashSet<i64> = ranking.iter().copied().collect();
            if ranked.len() != ranking.len() || ranked != option_ids {
                return Err("ranking must list every option exactly once".into());
            }
        }
        PollAnswer::Choices(choices) => {
            if choices.is_empty() {
                return Err("pick a choice for at least one option".into());
            }
            for (option, choice) in choices {
                if !option_ids.contains(option) {
                    return Err(format!("unknown option {option}"));
                }
                if !poll.choices.contains(choice) {
                    return Err(format!("unknown choice '{choice}'"));
                }
            }
        }
        PollAnswer::Allocations(allocations) => {
            if let Some(option) = allocations.keys().find(|o| !option_ids.contains(o)) {
                return Err(format!("unknown option {option}"));
            }
            let total: u64 = allocations.values().map(|v| u64::from(*v)).sum();
            if total > u64::from(poll.allocation_budget) {
                return Err(format!(
                    "allocations total {total}, budget is {}",
                    poll.allocation_budget
                ));
            }
        }
    }
    Ok(())
}

/// Aggregate responses per option.
pub fn tally(poll: &PollRow, responses: &[PollResponseRow]) -> PollResults {
    let mut rank_sums: HashMap<i64, (u64, u64)> = HashMap::new();
    let mut choice_counts: HashMap<i64, BTreeMap<String, u64>> = HashMap::new();
    let mut allocations: HashMap<i64, u64> = HashMap::new();
    let mut counted = 0u64;

    for response in responses {
        if response.answer.poll_type() != poll.poll_type {
            warn!(
                "Ignoring {} response of fid {} on {} poll {}",
                response.answer.poll_type(),
                response.user_fid,
                poll.poll_type,
                poll.id
            );
            continue;
        }
        counted += 1;

        match &response.answer {
            PollAnswer::Ranking(ranking) => {
                for (position, option) in ranking.iter().enumerate() {
                    let entry = rank_sums.entry(*option).or_default();
                    entry.0 += position as u64 + 1;
                    entry.1 += 1;
                }
            }
            PollAnswer::Choices(choices) => {
                for (option, choice) in choices {
                    *choice_counts
                        .entry(*option)
                        .or_default()
                        .entry(choice.clone())
                        .or_default() += 1;
                }
            }
            PollAnswer::Allocations(points) => {
                for (option, value) in points {
                    *allocations.entry(*option).or_default() += u64::from(*value);
                }
            }
        }
    }

    let options = poll
        .options
        .iter()
        .map(|o| {
            let mut result = OptionResult {
                option_id: o.id,
                text: o.text.clone(),
                average_rank: None,
                choice_counts: BTreeMap::new(),
                total_allocation: None,
                average_allocation: None,
            };
            match poll.poll_type {
                PollType::Ranking => {
                    result.average_rank = rank_sums
                        .get(&o.id)
                        .filter(|(_, n)| *n > 0)
                        .map(|(sum, n)| *sum as f64 / *n as f64);
                }
                PollType::Choice => {
                    result.choice_counts = choice_counts.remove(&o.id).unwrap_or_default();
                }
                PollType::Allocation => {
                    let total = allocations.get(&o.id).copied().unwrap_or(0);
                    result.total_allocation = Some(total);
                    result.average_allocation = (counted > 0).then(|| total as f64 / counted as f64);
                }
            }
            result
        })
        .collect();

    PollResults {
        poll_id: poll.id,
        poll_type: poll.poll_type,
        total_responses: counted,
        options,
    }
}

/// Polls are addressed by cast hash or by slug.
async fn find_poll(state: &AppState, key: &str) -> ApiResult<PollRow> {
    let key = key.to_string();
    let poll = run_db(state, move |db| match parse_hash(&key) {
        Ok(hash) => db.get_poll_by_cast(&hash),
        Err(_) => db.get_poll_by_slug(&key),
    })
    .await?;
    poll.ok_or_else(|| ApiError::not_found("poll not found"))
}

pub async fn create_poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<(StatusCode, Json<PollView>)> {
    require_capability(&state, claims.fid, Capability::Curate).await?;
    let hash = parse_hash(&req.cast_hash)?;
    let poll = new_poll(req, hash.clone(), claims.fid).map_err(ApiError::BadRequest)?;

    let created = run_db(&state, move |db| {
        if !db.is_curated(&hash)? {
            return Ok(None);
        }
        db.create_poll(&poll).map(Some)
    })
    .await?
    .ok_or_else(|| ApiError::not_found("polls can only be attached to curated casts"))?;

    info!("fid {} created {} poll {} on {}", claims.fid, created.poll_type, created.id, created.cast_hash);
    Ok((StatusCode::CREATED, Json(view(created, None))))
}

pub async fn get_poll(
    State(state): State<AppState>,
    Path(key): Path<String>,
    claims: Option<Extension<Claims>>,
) -> ApiResult<Json<PollView>> {
    let poll = find_poll(&state, &key).await?;
    let viewer_answer = match claims {
        Some(Extension(claims)) => {
            let (poll_id, fid) = (poll.id, claims.fid);
            run_db(&state, move |db| db.poll_response_for(poll_id, fid)).await?
        }
        None => None,
    };
    Ok(Json(view(poll, viewer_answer)))
}

pub async fn respond(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(answer): Json<PollAnswer>,
) -> ApiResult<Json<PollView>> {
    let poll = find_poll(&state, &key).await?;
    validate_answer(&poll, &answer).map_err(ApiError::BadRequest)?;

    let (poll_id, fid) = (poll.id, claims.fid);
    let stored = answer.clone();
    run_db(&state, move |db| db.upsert_poll_response(poll_id, fid, &stored)).await?;
    Ok(Json(view(poll, Some(answer))))
}

pub async fn results(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Json<PollResults>> {
    let poll = find_poll(&state, &key).await?;
    let poll_id = poll.id;
    let responses = run_db(&state, move |db| db.poll_responses(poll_id)).await?;
    Ok(Json(tally(&poll, &responses)))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    require_capability(&state, claims.fid, Capability::Moderate).await?;
    let poll = find_poll(&state, &key).await?;

    let hash = poll.cast_hash.clone();
    run_db(&state, move |db| db.delete_poll(&hash)).await?;
    info!("fid {} deleted poll {} on {}", claims.fid, poll.id, poll.cast_hash);
    Ok(StatusCode::NO_CONTENT)
}
