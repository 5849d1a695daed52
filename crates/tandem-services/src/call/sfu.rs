//! SFU HTTP endpoints: join and peek.

use std::time::Duration;

use tandem_core::call_keys::GroupCallBaseState;
use tandem_core::signaling::{CallStateSnapshot, JoinRequest, JoinResponse, PeekRequest, PeekResponse};
use tandem_core::wire::{decode, encode};

use super::http::{HttpClient, HttpResponse};
use super::GroupCallError;

const STATUS_NOT_FOUND: u16 = 404;

pub fn join_url(sfu_base_url: &str) -> String {
    format!("{}/v1/join", sfu_base_url.trim_end_matches('/'))
}

pub fn peek_url(sfu_base_url: &str) -> String {
    format!("{}/v1/peek", sfu_base_url.trim_end_matches('/'))
}

/// What a peek found out about a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeekResult {
    Running {
        started_at: u64,
        max_participants: u32,
        /// From the sealed call state, when a participant stored one.
        participants: Option<usize>,
    },
    /// The SFU does not know the call.
    NotRunning,
}

async fn post_with_timeout(
    http: &dyn HttpClient,
    url: &str,
    body: bytes::Bytes,
    timeout: Duration,
) -> Result<HttpResponse, GroupCallError> {
    match tokio::time::timeout(timeout, http.post(url, body)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(GroupCallError::Timeout),
    }
}

/// Join the call. `None` when the SFU answers 404.
pub async fn join_call(
    http: &dyn HttpClient,
    base: &GroupCallBaseState,
    timeout: Duration,
) -> Result<Option<JoinResponse>, GroupCallError> {
    let request = JoinRequest {
        call_id: base.call_id.0.to_vec(),
        protocol_version: base.protocol_version,
    };
    let resp = post_with_timeout(http, &join_url(&base.sfu_base_url), encode(&request), timeout).await?;
    match resp.status {
        STATUS_NOT_FOUND => {
            tracing::info!(call_id = %base.call_id, "call no longer exists");
            Ok(None)
        }
        _ if resp.is_success() => Ok(Some(decode(&resp.body)?)),
        status => Err(GroupCallError::UnexpectedStatus(status)),
    }
}

/// Ask the SFU whether the call is running and who is in it.
pub async fn peek_call(
    http: &dyn HttpClient,
    base: &GroupCallBaseState,
    timeout: Duration,
) -> Result<PeekResult, GroupCallError> {
    let request = PeekRequest {
        call_id: base.call_id.0.to_vec(),
    };
    let resp = post_with_timeout(http, &peek_url(&base.sfu_base_url), encode(&request), timeout).await?;
    if resp.status == STATUS_NOT_FOUND {
        return Ok(PeekResult::NotRunning);
    }
    if !resp.is_success() {
        return Err(GroupCallError::UnexpectedStatus(resp.status));
    }

    let peek: PeekResponse = decode(&resp.body)?;
    let participants = match peek.encrypted_call_state.as_deref() {
        None => None,
        Some(sealed) => match open_call_state(base, sealed) {
            Ok(snapshot) => Some(snapshot.participants.len()),
            Err(e) => {
                tracing::warn!(call_id = %base.call_id, error = %e, "unreadable call state");
                None
            }
        },
    };
    Ok(PeekResult::Running {
        started_at: peek.started_at,
        max_participants: peek.max_participants,
        participants,
    })
}

fn open_call_state(base: &GroupCallBaseState, sealed: &[u8]) -> Result<CallStateSnapshot, GroupCallError> {
    let plaintext = base.keys.open_call_state(sealed)?;
    Ok(decode(&plaintext)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
