//! Operator intents queued from the preview API to the command worker.

use anyhow::Result;
use rawcat_core::{
    Console, Coordinate, EditError, SteeringMode,
    ais::{BoundingBox, DEFAULT_HALF_SPAN},
    edit::{EditTarget, LegStart},
};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ConsoleCommand {
    SetMode(SteeringMode),
    BeginEdit(EditTarget),
    UpdateEdit(Coordinate),
    CommitEdit,
    CancelEdit,
    SelectGoal(usize),
    ExtendRoute {
        destination: Option<Coordinate>,
        from: LegStart,
    },
    GoTo(Option<Coordinate>),
    DarkMode(bool),
    /// Search for traffic in the box, or around the vessel when `None`.
    RefreshAis(Option<BoundingBox>),
}

pub(crate) type CommandSender = mpsc::UnboundedSender<ConsoleCommand>;
pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<ConsoleCommand>;

pub(crate) fn channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

/// Apply one intent and wait for everything it sends to settle.
pub(crate) async fn apply(console: &Console, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::SetMode(SteeringMode::Compass) => console.steering.enable_compass().await?,
        ConsoleCommand::SetMode(SteeringMode::Route) => console.steering.enable_route().await?,
        ConsoleCommand::SetMode(SteeringMode::HoldLine) => {
            console.steering.enable_hold_line().await?
        }
        ConsoleCommand::BeginEdit(target) => console.editor.begin(target)?,
        ConsoleCommand::UpdateEdit(coordinate) => console.editor.update(coordinate)?,
        ConsoleCommand::CommitEdit => {
            if let Some(route) = console.editor.commit().await? {
                info!(points = route.coordinates().len(), "route edit committed");
            }
        }
        ConsoleCommand::CancelEdit => console.editor.cancel()?,
        ConsoleCommand::SelectGoal(index) => console.editor.select_goal(index).await?,
        ConsoleCommand::ExtendRoute { destination, from } => {
            console.editor.extend_route(destination, from).await?;
        }
        ConsoleCommand::GoTo(destination) => {
            console.editor.go_to(destination).await?;
        }
        ConsoleCommand::DarkMode(enabled) => console.device.push_dark_mode(enabled).await?,
        ConsoleCommand::RefreshAis(bbox) => {
            let bbox = match bbox {
                Some(bbox) => bbox,
                None => console
                    .vessel
                    .position()
                    .map(|position| BoundingBox::around(position, DEFAULT_HALF_SPAN))
                    .ok_or(EditError::NoVesselPosition)?,
            };
            let ships = console.ais.fetch(bbox).await?;
            info!(count = ships.len(), "AIS traffic refreshed");
        }
    }
    Ok(())
}
