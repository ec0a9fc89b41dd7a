use axum::{
    Json,
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{error, warn};

use anonbox_types::api::{SuggestFormat, SuggestQuery, SuggestRequest, SuggestionsResponse};

use crate::completion::TextStream;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::state::AppState;

/// Separator between the candidate prompts in generated text.
pub const DELIMITER: &str = "||";

/// Only the most recent prompts are sent back as "don't repeat these".
pub const HISTORY_LIMIT: usize = 30;

const UPSTREAM_FAILURE: &str = "Error getting message suggestions.";

pub fn build_prompt(history: &[String]) -> String {
    let recent = &history[history.len().saturating_sub(HISTORY_LIMIT)..];
    let avoid = recent.join(DELIMITER);

    let mut prompt = String::from(
        "Create a list of 3 open-ended and engaging questions formatted as a single string. \
         Each question should be separated by '||'. These questions are for an anonymous social \
         messaging platform and should be suitable for a diverse audience. Avoid personal or \
         sensitive topics, focusing instead on universal themes that encourage friendly \
         interaction. \
         For example, your output should be structured like this: \
         'What's a hobby you've recently started?||If you could have dinner with any historical \
         figure, who would it be?||What's a simple thing that makes you happy?'. \
         The response should only contain the questions and nothing else.",
    );
    if !avoid.is_empty() {
        prompt.push_str(" Don't include these questions in the response: ");
        prompt.push_str(&avoid);
    }
    prompt
}

/// Split generated text into candidate prompts. Tolerates any number of
/// candidates, surrounding quotes and whitespace, and empty segments.
pub fn split_suggestions(text: &str) -> Vec<String> {
    text.split(DELIMITER)
        .map(|s| s.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ask the completion collaborator for suggestions, bounded to the recent
/// history.
pub async fn suggest(state: &AppState, history: &[String]) -> Result<TextStream, ApiError> {
    let prompt = build_prompt(history);
    state.completion.stream_completion(prompt).await.map_err(|e| {
        error!("Completion request failed: {:#}", e);
        ApiError::Upstream(UPSTREAM_FAILURE.to_string())
    })
}

/// POST /suggest-messages
///
/// Streams `||`-delimited text by default; `?format=json` collects it and
/// returns the split list instead.
pub async fn suggest_messages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SuggestQuery>,
    ApiJson(req): ApiJson<SuggestRequest>,
) -> Result<Response, ApiError> {
    let mut stream = suggest(&state, &req.previous_messages).await?;

    match query.format {
        SuggestFormat::Json => {
            let mut text = String::new();
            while let Some(piece) = stream.next().await {
                let piece = piece.map_err(|e| {
                    error!("Completion stream failed: {:#}", e);
                    ApiError::Upstream(UPSTREAM_FAILURE.to_string())
                })?;
                text.push_str(&piece);
            }
            Ok(Json(SuggestionsResponse {
                success: true,
                suggestions: split_suggestions(&text),
            })
            .into_response())
        }
        SuggestFormat::Text => {
            // Headers are already sent once streaming starts, so a failure
            // midway can only end the body early.
            let body = async_stream::stream! {
                while let Some(piece) = stream.next().await {
                    match piece {
                        Ok(text) => {
                            yield Ok::<_, std::io::Error>(Bytes::from(text));
                        }
                        Err(e) => {
                            warn!("Completion stream ended early: {:#}", e);
                            break;
                        }
                    }
                }
            };
            Ok((
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Body::from_stream(body),
            )
                .into_response())
        }
    }
}
