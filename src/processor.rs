//! Unit-of-work processing.
//!
//! One queue item is one workbook. [`Processor::process`] loads it, expands it
//! into [`SubTask`]s (one per chat column), runs them concurrently against the
//! [`Completer`], writes every reply or error into the shared workbook under
//! its lock, and finally commits the workbook to its destination.
//!
//! SubTask failures are data: they are written into the workbook and reported
//! in the [`ItemReport`]. Only failures of the item as a whole (unreadable
//! workbook, failed save, panicking SubTask) surface as [`ProcessError`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::command::{Command, CommandError, CommandKind};
use crate::conversation::{Conversation, ConversationDefaults};
use crate::remote::{Completer, RemoteError};
use crate::retry::{BackoffPolicy, RetryError, RetryExecutor};
use crate::shared::SharedArtifact;
use crate::workbook::{Cell, CellRef, CellStatus, Workbook, WorkbookError, sanitize};

/// Why a SubTask stopped early.
#[derive(Debug, Error)]
pub enum SubTaskError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Remote(#[from] RetryError<RemoteError>),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),
}

/// A SubTask error together with where it happened.
#[derive(Debug, Error)]
#[error("{subtask} at {cell}: {error}")]
pub struct SubTaskFailure {
    pub subtask: String,
    pub cell: CellRef,
    #[source]
    pub error: SubTaskError,
}

/// Failure of a whole item.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Workbook(#[from] WorkbookError),

    #[error("{subtask} panicked: {source}")]
    SubTaskPanicked {
        subtask: String,
        #[source]
        source: JoinError,
    },
}

/// Outcome of one processed item.
#[derive(Debug, Default)]
pub struct ItemReport {
    pub subtask_count: usize,
    /// SubTask errors in completion order.
    pub errors: Vec<SubTaskFailure>,
}

impl ItemReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// The error list, or `None` when every SubTask succeeded.
    pub fn into_errors(self) -> Option<Vec<SubTaskFailure>> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors)
        }
    }
}

/// One command row of a SubTask.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandStep {
    pub row: usize,
    /// Command name as written in the command column, trimmed and lowercased.
    pub name: String,
    /// Text of the SubTask's cell on that row.
    pub argument: Option<String>,
}

/// One independent chat column of a workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct SubTask {
    pub parent_item: String,
    pub index: usize,
    pub name: String,
    pub call_id: String,
    pub sheet: usize,
    pub column: usize,
    pub command_sequence: Vec<CommandStep>,
}

impl SubTask {
    fn cell(&self, row: usize) -> CellRef {
        CellRef {
            sheet: self.sheet,
            column: self.column,
            row,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub defaults: ConversationDefaults,
    pub backoff: BackoffPolicy,
    /// `None` runs every SubTask at once.
    pub max_sub_concurrency: Option<usize>,
    /// Only process sheets with these titles (case-insensitive).
    pub sheet_names: Option<Vec<String>>,
}

pub struct Processor<C> {
    completer: Arc<C>,
    settings: Arc<ProcessorSettings>,
}

impl<C> Clone for Processor<C> {
    fn clone(&self) -> Self {
        Self {
            completer: Arc::clone(&self.completer),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Split a workbook into its SubTasks.
///
/// Sheets whose title starts with `#`, or that are not in `sheet_names`, are
/// skipped. In each sheet the first column whose header is not a comment holds
/// the command names; every later non-comment column is one SubTask. Blank and
/// commented command rows are left out of the sequences.
pub fn expand(workbook: &Workbook, item: &str, sheet_names: Option<&[String]>) -> Vec<SubTask> {
    let mut subtasks = Vec::new();

    for (s, sheet) in workbook.sheets.iter().enumerate() {
        let filtered_out =
            sheet_names.is_some_and(|names| !names.iter().any(|n| n.eq_ignore_ascii_case(&sheet.title)));
        if sheet.is_comment() || filtered_out {
            continue;
        }

        let is_comment_column = |col: &Vec<Cell>| col.first().is_some_and(Cell::is_comment);
        let Some(command_column) = sheet.columns.iter().position(|c| !is_comment_column(c)) else {
            info!(item, sheet = %sheet.title, "no command column, skipping sheet");
            continue;
        };

        let commands: Vec<(usize, String)> = sheet.columns[command_column]
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(row, cell)| {
                let name = cell.text()?.trim().to_lowercase();
                (!name.is_empty() && !cell.is_comment()).then_some((row, name))
            })
            .collect();
        debug!(
            item,
            sheet = %sheet.title,
            commands = ?commands.iter().map(|(_, n)| n.as_str()).collect::<Vec<_>>(),
            "command sequence"
        );

        for (c, column) in sheet.columns.iter().enumerate().skip(command_column + 1) {
            if is_comment_column(column) {
                continue;
            }
            let index = subtasks.len();
            let header = column
                .first()
                .and_then(Cell::text)
                .unwrap_or_else(|| c.to_string());
            let command_sequence = commands
                .iter()
                .map(|(row, name)| CommandStep {
                    row: *row,
                    name: name.clone(),
                    argument: column.get(*row).and_then(Cell::text),
                })
                .collect();

            subtasks.push(SubTask {
                parent_item: item.to_string(),
                index,
                name: format!("column '{header}'"),
                call_id: format!("{item}:{s}:{index}"),
                sheet: s,
                column: c,
                command_sequence,
            });
        }
    }
    subtasks
}

/// Write `value` under the lock, retrying once with illegal characters
/// stripped. The lock is released between the two attempts.
fn write_cell(
    artifact: &SharedArtifact<Workbook>,
    at: CellRef,
    value: &str,
    status: CellStatus,
) -> Result<(), WorkbookError> {
    match artifact.with_lock(|wb| wb.write(at, value, status)) {
        Err(WorkbookError::IllegalCharacter(_)) => {
            warn!(cell = %at, "value holds illegal characters, writing it sanitized");
            artifact.with_lock(|wb| wb.write(at, &sanitize(value), status))
        }
        other => other,
    }
}

impl<C: Completer> Processor<C> {
    pub fn new(completer: Arc<C>, settings: ProcessorSettings) -> Self {
        Self {
            completer,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Complete the workbook at `source` and commit it to `destination`
    /// (which may be the same path).
    pub async fn process(
        &self,
        item: &str,
        source: &Path,
        destination: &Path,
    ) -> Result<ItemReport, ProcessError> {
        let start = Instant::now();
        info!(item, path = %source.display(), "starting workbook completion");

        let workbook = Workbook::load(source).await?;
        let subtasks = expand(&workbook, item, self.settings.sheet_names.as_deref());
        let subtask_count = subtasks.len();
        if subtasks.is_empty() {
            info!(item, "no chat found in workbook");
        }

        let artifact = SharedArtifact::new(workbook);
        let semaphore = self.settings.max_sub_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut join_set = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();

        for subtask in subtasks {
            let span = info_span!("subtask", call_id = %subtask.call_id);
            let name = subtask.name.clone();
            let processor = self.clone();
            let artifact = artifact.clone();
            let semaphore = semaphore.clone();
            let handle = join_set.spawn(
                async move {
                    // The semaphore is never closed, so acquiring only fails
                    // if it were; run unbounded in that case.
                    let _permit = match semaphore {
                        Some(s) => s.acquire_owned().await.ok(),
                        None => None,
                    };
                    processor.run_subtask(&artifact, &subtask).await
                }
                .instrument(span),
            );
            names.insert(handle.id(), name);
        }

        let mut errors = Vec::new();
        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((_, Err(failure))) => errors.push(failure),
                Err(source) => {
                    let subtask = names.remove(&source.id()).unwrap_or_default();
                    return Err(ProcessError::SubTaskPanicked { subtask, source });
                }
            }
        }

        let workbook = match artifact.into_inner() {
            Ok(workbook) => workbook,
            Err(shared) => shared.with_lock(|wb| wb.clone()),
        };
        info!(item, path = %destination.display(), "saving workbook");
        workbook.save_atomic(destination).await?;

        let elapsed = start.elapsed();
        if !errors.is_empty() {
            warn!(item, errors = errors.len(), chats = subtask_count, ?elapsed, "completed workbook with errors");
        } else {
            info!(item, chats = subtask_count, ?elapsed, "completed workbook");
        }
        Ok(ItemReport {
            subtask_count,
            errors,
        })
    }

    /// Run the commands of one SubTask in order. The first failing command
    /// is written into its cell as an error and ends the SubTask.
    async fn run_subtask(
        &self,
        artifact: &SharedArtifact<Workbook>,
        subtask: &SubTask,
    ) -> Result<(), SubTaskFailure> {
        let start = Instant::now();
        info!(name = %subtask.name, "starting chat completion");
        let mut conversation = Conversation::new(self.settings.defaults.clone());
        let mut completions = 0usize;

        for step in &subtask.command_sequence {
            let at = subtask.cell(step.row);
            let call_id = format!("{} idx {completions}", subtask.call_id);
            let result = self
                .run_step(artifact, &mut conversation, step, at, &call_id)
                .await;
            match result {
                Ok(true) => completions += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(name = %subtask.name, cell = %at, %error, "chat failed");
                    if let Err(e) = write_cell(artifact, at, &error.to_string(), CellStatus::Error) {
                        warn!(cell = %at, error = %e, "could not record error in workbook");
                    }
                    return Err(SubTaskFailure {
                        subtask: subtask.name.clone(),
                        cell: at,
                        error,
                    });
                }
            }
        }

        info!(name = %subtask.name, completions, elapsed = ?start.elapsed(), "completed chat");
        Ok(())
    }

    /// Returns whether the step was a completion.
    async fn run_step(
        &self,
        artifact: &SharedArtifact<Workbook>,
        conversation: &mut Conversation,
        step: &CommandStep,
        at: CellRef,
        call_id: &str,
    ) -> Result<bool, SubTaskError> {
        let kind = CommandKind::lookup(&step.name).ok_or_else(|| CommandError::Unknown(step.name.clone()))?;
        // Cells of argument-less rows hold earlier results, not arguments.
        let argument = step.argument.as_deref().filter(|_| kind.takes_argument());
        let command = Command::with_argument(kind, argument)?;

        if !kind.triggers_remote_call() {
            conversation.apply(&command);
            return Ok(false);
        }

        let request = conversation.request();
        let executor = RetryExecutor::new(conversation.retries(), self.settings.backoff.clone());
        let completion = executor
            .execute(call_id, || self.completer.complete(&request), RemoteError::class)
            .await?;

        write_cell(artifact, at, &completion.text, CellStatus::Complete)?;
        conversation.push_reply(completion.text);
        Ok(true)
    }
}
