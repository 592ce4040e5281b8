//! Keypad events posted by the vote collector. They are answered with `200 OK`
//! and a short text the device shows on the keypad; only a storage failure
//! gets `500`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Form,
};
use server_api::callbacks::{self, CallbackReport};
use shared::{
    domain::{AgendaItemId, ElectionPollId, KeypadId},
    error::VotingError,
    protocol::{CallbackOutcome, KeypadCallbackForm, ServerEvent},
};
use tracing::{debug, error};

use crate::app_state::AppState;

type CallbackReply = (StatusCode, &'static str);

fn reply(state: &AppState, outcome: Result<CallbackReport, VotingError>) -> CallbackReply {
    match outcome {
        Ok(report) => {
            if let Some(vote) = &report.vote {
                if let Some(keypad_id) = vote.keypad_id.clone() {
                    state.publish(ServerEvent::VoteReceived {
                        poll: vote.poll,
                        keypad_id,
                        votes_received: report.progress.map(|p| p.votes_received).unwrap_or_default(),
                    });
                }
            }
            if let Some(keypad) = report.keypad {
                state.publish(ServerEvent::KeypadUpdated { keypad });
            }
            (StatusCode::OK, report.outcome.message())
        }
        Err(err) => {
            error!(error = %err, "keypad callback failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

fn form_or_default(form: Option<Form<KeypadCallbackForm>>) -> KeypadCallbackForm {
    form.map(|Form(form)| form).unwrap_or_default()
}

/// Ids in callback paths come from the device; one that is not a number gets
/// the keypad text for a missing target instead of a rejection status.
fn parse_id(raw: &str, missing: CallbackOutcome) -> Result<i64, CallbackReply> {
    raw.trim().parse::<i64>().map_err(|_| {
        debug!(id = raw, "callback path id is not a number");
        (StatusCode::OK, missing.message())
    })
}

pub(crate) async fn vote(
    State(state): State<Arc<AppState>>,
    Path((poll_id, keypad_id)): Path<(String, String)>,
    form: Option<Form<KeypadCallbackForm>>,
) -> CallbackReply {
    let poll_id = match parse_id(&poll_id, CallbackOutcome::VoteRejected) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let form = form_or_default(form);
    let keypad_id = KeypadId::new(keypad_id);
    let outcome = callbacks::vote(&state.api, poll_id, &keypad_id, &form).await;
    reply(&state, outcome)
}

pub(crate) async fn candidate(
    State(state): State<Arc<AppState>>,
    Path((poll_id, keypad_id)): Path<(String, String)>,
    form: Option<Form<KeypadCallbackForm>>,
) -> CallbackReply {
    let poll_id = match parse_id(&poll_id, CallbackOutcome::VoteRejected) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let form = form_or_default(form);
    let keypad_id = KeypadId::new(keypad_id);
    let outcome =
        callbacks::candidate(&state.api, ElectionPollId(poll_id), &keypad_id, &form).await;
    reply(&state, outcome)
}

pub(crate) async fn speaker(
    State(state): State<Arc<AppState>>,
    Path((item_id, keypad_id)): Path<(String, String)>,
    form: Option<Form<KeypadCallbackForm>>,
) -> CallbackReply {
    let item_id = match parse_id(&item_id, CallbackOutcome::NoAgendaItem) {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let form = form_or_default(form);
    let keypad_id = KeypadId::new(keypad_id);
    let outcome = callbacks::speaker(&state.api, AgendaItemId(item_id), &keypad_id, &form).await;
    reply(&state, outcome)
}

pub(crate) async fn keepalive(
    State(state): State<Arc<AppState>>,
    Path((_poll_id, keypad_id)): Path<(String, String)>,
    form: Option<Form<KeypadCallbackForm>>,
) -> CallbackReply {
    let form = form_or_default(form);
    let keypad_id = KeypadId::new(keypad_id);
    let outcome = callbacks::keepalive(&state.api, Some(&keypad_id), &form).await;
    reply(&state, outcome)
}

pub(crate) async fn keepalive_keypad(
    State(state): State<Arc<AppState>>,
    Path(keypad_id): Path<String>,
    form: Option<Form<KeypadCallbackForm>>,
) -> CallbackReply {
    let form = form_or_default(form);
    let keypad_id = KeypadId::new(keypad_id);
    let outcome = callbacks::keepalive(&state.api, Some(&keypad_id), &form).await;
    reply(&state, outcome)
}

pub(crate) async fn keepalive_server(
    State(state): State<Arc<AppState>>,
    form: Option<Form<KeypadCallbackForm>>,
) -> CallbackReply {
    let form = form_or_default(form);
    let outcome = callbacks::keepalive(&state.api, None, &form).await;
    reply(&state, outcome)
}
