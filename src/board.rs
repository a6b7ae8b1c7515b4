//! Column drag-and-drop mapped onto pipeline commands.

use chrono::{DateTime, Utc};

use crate::core::status::DerivedStatus;
use crate::sync::mutation::{MutationError, MutationOutcome, MutationPipeline};

/// A card released by the user. `to` is `None` when it was dropped outside
/// every column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDrop {
    pub item_id: String,
    pub from: String,
    pub to: Option<String>,
}

impl CardDrop {
    pub fn new(item_id: &str, from: &str, to: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            from: from.to_string(),
            to: Some(to.to_string()),
        }
    }
}

/// What a drop asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveCommand {
    SetCompletion(bool),
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveResult {
    Ignored,
    Applied(MutationOutcome),
}

/// Decides the command for a move between two columns.
///
/// The deleted column is read-only: deletion only ever comes from the
/// task's own fields or its history.
pub fn plan_move(from: &str, to: Option<&str>) -> Result<MoveCommand, MutationError> {
    let Some(to) = to else {
        return Ok(MoveCommand::Nothing);
    };
    if from == to {
        return Ok(MoveCommand::Nothing);
    }
    match DerivedStatus::from_column_id(to) {
        Some(DerivedStatus::Completed) => Ok(MoveCommand::SetCompletion(true)),
        Some(DerivedStatus::Pending | DerivedStatus::Overdue) => {
            Ok(MoveCommand::SetCompletion(false))
        }
        Some(DerivedStatus::Deleted) => Err(MutationError::RejectedMove(DerivedStatus::Deleted)),
        None => {
            log::warn!("Unsupported column: {}", to);
            Ok(MoveCommand::Nothing)
        }
    }
}

pub struct BoardController {
    pipeline: MutationPipeline,
}

impl BoardController {
    pub fn new(pipeline: MutationPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &MutationPipeline {
        &self.pipeline
    }

    pub async fn handle_drop(
        &self,
        card: &CardDrop,
        now: DateTime<Utc>,
    ) -> Result<MoveResult, MutationError> {
        log::debug!(
            "Moving task {} from {} to {:?}",
            card.item_id,
            card.from,
            card.to
        );
        match plan_move(&card.from, card.to.as_deref())? {
            MoveCommand::Nothing => Ok(MoveResult::Ignored),
            MoveCommand::SetCompletion(completed) => self
                .pipeline
                .set_completion(&card.item_id, completed, None, now)
                .await
                .map(MoveResult::Applied),
        }
    }
}
