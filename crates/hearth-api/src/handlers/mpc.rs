//! Music player passthrough.

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::common::{ok, HandlerResult};
use super::ServerState;
use crate::models::ErrorResponse;

#[derive(Debug, Default, Deserialize)]
pub struct MpcQuery {
    /// Comma-separated command arguments.
    #[serde(default)]
    pub args: String,
}

/// Split `args=a,"b c"` into arguments, dropping one level of quotes.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| {
            for quote in ['"', '\''] {
                if a.len() >= 2 && a.starts_with(quote) && a.ends_with(quote) {
                    return a[1..a.len() - 1].to_string();
                }
            }
            a.to_string()
        })
        .collect()
}

/// GET /api/mpc/:action?args=...
pub async fn mpc_command_handler(
    State(state): State<ServerState>,
    Path(action): Path<String>,
    Query(query): Query<MpcQuery>,
) -> HandlerResult<Value> {
    let mpd = state
        .controller
        .mpd()
        .ok_or_else(|| ErrorResponse::service_unavailable("MPD is not configured"))?;

    let args = split_args(&query.args);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let response = mpd.command(&action, &args).await.map_err(|e| {
        warn!(command = %action, error = %e, "MPD command failed");
        ErrorResponse::from(e)
    })?;
    ok(response.to_json())
}
