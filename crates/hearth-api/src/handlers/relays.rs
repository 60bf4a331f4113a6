//! Relay handlers.

use std::collections::BTreeMap;
use std::str::FromStr;

use axum::extract::{Path, State};
use serde::Serialize;
use tracing::warn;

use hearth_devices::{RelayAck, RelayInfo, RelayState};

use super::common::{extract_path, ok, HandlerResult, UNAVAILABLE};
use super::ServerState;

/// Action segment of `/api/relay/:name/:action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    On,
    Off,
    Toggle,
    State,
}

impl FromStr for RelayAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "toggle" => Ok(Self::Toggle),
            "state" => Ok(Self::State),
            other => Err(format!("unknown relay action '{}'", other)),
        }
    }
}

/// One entry of the relay listing.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RelayEntry {
    Info(RelayInfo),
    Unavailable(&'static str),
}

/// List all relays with their state.
///
/// GET /api/relay
pub async fn list_relays_handler(
    State(state): State<ServerState>,
) -> HandlerResult<BTreeMap<String, RelayEntry>> {
    let mut relays = BTreeMap::new();
    for (name, info) in state.controller.relay_infos().await {
        let entry = match info {
            Ok(info) => RelayEntry::Info(info),
            Err(e) => {
                warn!(relay = %name, error = %e, "Relay is not available");
                RelayEntry::Unavailable(UNAVAILABLE)
            }
        };
        relays.insert(name, entry);
    }
    ok(relays)
}

/// GET /api/relay/:name
pub async fn get_relay_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> HandlerResult<RelayInfo> {
    ok(state.controller.relay_info(&name).await?)
}

/// Switch, toggle or query one relay.
///
/// GET|POST /api/relay/:name/:action
pub async fn relay_action_handler(
    State(state): State<ServerState>,
    Path((name, action)): Path<(String, String)>,
) -> HandlerResult<RelayAck> {
    let action: RelayAction = extract_path(&action, "relay action")?;
    let controller = &state.controller;

    let ack = match action {
        RelayAction::On => controller.set_relay(&name, RelayState::On).await?,
        RelayAction::Off => controller.set_relay(&name, RelayState::Off).await?,
        RelayAction::Toggle => controller.toggle_relay(&name).await?,
        RelayAction::State => RelayAck {
            state: controller.relay_state(&name).await?,
            relay: name,
        },
    };
    ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!("on".parse::<RelayAction>().unwrap(), RelayAction::On);
        assert_eq!("toggle".parse::<RelayAction>().unwrap(), RelayAction::Toggle);
        assert!("ON".parse::<RelayAction>().is_err());
        assert!("blink".parse::<RelayAction>().is_err());
    }
}
