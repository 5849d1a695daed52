//! `peek`: ask the SFU about a group call.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use tandem_core::call_keys::{GroupCallBaseState, GroupIdentity, CALL_PROTOCOL_VERSION};
use tandem_core::TandemConfig;
use tandem_services::call::http::ReqwestClient;
use tandem_services::call::sfu::{peek_call, PeekResult};

pub struct PeekArgs<'a> {
    pub creator: &'a str,
    pub group_id_hex: &'a str,
    pub gck_hex: &'a str,
    pub sfu: Option<&'a str>,
}

fn parse_hex<const N: usize>(name: &str, text: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(text).with_context(|| format!("{name} is not hex"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("{name} must be {N} bytes, got {}", b.len()))
}

pub async fn cmd_peek(config: &TandemConfig, args: PeekArgs<'_>) -> Result<()> {
    let sfu = args.sfu.unwrap_or(config.calls.sfu_base_url.as_str());
    if sfu.is_empty() {
        bail!("no SFU base URL: pass --sfu or set calls.sfu_base_url");
    }
    let group = GroupIdentity {
        creator: args.creator.to_string(),
        group_id: parse_hex("group id", args.group_id_hex)?,
    };
    let gck = parse_hex("group call key", args.gck_hex)?;
    let base = Arc::new(GroupCallBaseState::new(group, gck, sfu, CALL_PROTOCOL_VERSION));
    tracing::info!(call_id = %base.call_id, sfu, "peeking call");

    let http = ReqwestClient::new();
    match peek_call(&http, &base, config.calls.peek_timeout())
        .await
        .context("peek failed")?
    {
        PeekResult::NotRunning => println!("call {} is not running", base.call_id),
        PeekResult::Running {
            started_at,
            max_participants,
            participants,
        } => {
            println!("call {} is running", base.call_id);
            println!("  started at:       {started_at}");
            println!("  max participants: {max_participants}");
            match participants {
                Some(n) => println!("  participants:     {n}"),
                None => println!("  participants:     unknown"),
            }
        }
    }
    Ok(())
}
