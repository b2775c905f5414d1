//! JSON-lines scenarios replayed against the simulated backends
//!
//! Each non-blank line not starting with `#` is one step:
//!
//! ```text
//! {"at_ms": 0, "event": {"type": "track_subscribed", "track": {"id": "v1", "kind": "video"}}}
//! {"at_ms": 1500, "command": {"type": "unlock_audio"}}
//! ```

use crate::playback::PlayerCommand;
use crate::room::{TransportEvent, TransportInjector};
use log::{debug, warn};
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    Event(TransportEvent),
    Command(PlayerCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioStep {
    /// Offset from the start of the replay
    pub at: Duration,
    pub action: ScenarioAction,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    at_ms: u64,
    #[serde(default)]
    event: Option<TransportEvent>,
    #[serde(default)]
    command: Option<PlayerCommand>,
}

/// Scenario parse failure
#[derive(Debug)]
pub struct ScenarioError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scenario line {}: {}", self.line, self.message)
    }
}

impl Error for ScenarioError {}

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content)?)
    }

    /// Parse JSON lines. Steps are ordered by time; ties keep file order.
    pub fn parse(content: &str) -> Result<Self, ScenarioError> {
        let mut steps = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let raw: RawStep = serde_json::from_str(line).map_err(|e| ScenarioError {
                line: index + 1,
                message: e.to_string(),
            })?;
            let action = match (raw.event, raw.command) {
                (Some(event), None) => ScenarioAction::Event(event),
                (None, Some(command)) => ScenarioAction::Command(command),
                _ => {
                    return Err(ScenarioError {
                        line: index + 1,
                        message: "expected exactly one of `event` or `command`".to_string(),
                    })
                }
            };
            steps.push(ScenarioStep {
                at: Duration::from_millis(raw.at_ms),
                action,
            });
        }
        steps.sort_by_key(|step| step.at);
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[ScenarioStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total scripted time
    pub fn duration(&self) -> Duration {
        self.steps.last().map(|step| step.at).unwrap_or_default()
    }

    /// Replay every step at its offset from `start`, then wait `settle` and
    /// close the command channel.
    pub async fn feed(
        &self,
        start: Instant,
        injector: &TransportInjector,
        commands: mpsc::UnboundedSender<PlayerCommand>,
        settle: Duration,
    ) {
        for step in &self.steps {
            time::sleep_until(start + step.at).await;
            match &step.action {
                ScenarioAction::Event(event) => {
                    debug!("[{:?}] event {:?}", step.at, event);
                    if !injector.send(event.clone()) {
                        warn!("No connected session for scripted event at {:?}", step.at);
                    }
                }
                ScenarioAction::Command(command) => {
                    debug!("[{:?}] command {:?}", step.at, command);
                    if commands.send(command.clone()).is_err() {
                        warn!("Player stopped before scripted command at {:?}", step.at);
                        return;
                    }
                }
            }
        }
        time::sleep(settle).await;
    }
}
