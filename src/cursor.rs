use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SqlRuntimeError;
use crate::guard::ResourceGuard;
use crate::lifecycle::{LifecycleState, StateCell};
use crate::marshal::RowBuffer;
use crate::statement::{Statement, StatementInner};
use crate::types::Value;

const NOT_OPEN: &str = "Need to open cursor";

/// A row fetched from a cursor or returned by a statement.
///
/// Column names are shared by every row of the same statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(
        column_names: Arc<Vec<String>>,
        column_index: Arc<HashMap<String, usize>>,
        values: Vec<Value>,
    ) -> Self {
        Self {
            column_names,
            column_index,
            values,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Index of a column by name. Falls back to a case-insensitive match, since
    /// unquoted identifiers come back upper-cased.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index.get(column_name) {
            return Some(idx);
        }
        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct CursorInner {
    statement: Arc<StatementInner>,
    dispose_statement_on_close: bool,
    guard: ResourceGuard,
    state: StateCell,
}

/// Forward-only cursor over a statement's result set.
#[derive(Clone)]
pub struct Cursor {
    inner: Arc<CursorInner>,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("statement", &self.inner.statement.handle)
            .field("state", &self.inner.state.get())
            .field(
                "dispose_statement_on_close",
                &self.inner.dispose_statement_on_close,
            )
            .finish()
    }
}

impl Cursor {
    pub(crate) fn new(statement: Arc<StatementInner>, dispose_statement_on_close: bool) -> Self {
        Self {
            inner: Arc::new(CursorInner {
                statement,
                dispose_statement_on_close,
                guard: ResourceGuard::new(),
                state: StateCell::new(LifecycleState::Active),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.inner.statement.column_names
    }

    /// Fetch the next row, or `None` once the result set is exhausted. The cursor
    /// stays open until [`Cursor::close`].
    ///
    /// # Errors
    /// `AlreadyFinished` after close, decoding failures, or the native client's
    /// failure.
    pub async fn fetch(&self) -> Result<Option<Row>, SqlRuntimeError> {
        let _shared = self.inner.guard.share().await;
        self.inner.state.ensure_active("cursor", NOT_OPEN)?;
        let statement = &self.inner.statement;
        let mut buffer = RowBuffer::new(statement.output_length);
        let more = statement
            .transaction
            .connection
            .client
            .native()
            .fetch(statement.handle, buffer.as_bytes_mut())
            .await?;
        if more {
            statement.row(&buffer).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fetch every remaining row.
    ///
    /// # Errors
    /// Same as [`Cursor::fetch`].
    pub async fn fetch_all(&self) -> Result<Vec<Row>, SqlRuntimeError> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Close the cursor. A cursor opened by an ad-hoc query also disposes the
    /// statement that was prepared for it; if that dispose fails, calling `close`
    /// again retries it.
    ///
    /// # Errors
    /// `AlreadyFinished` when already closed, or the native client's failure.
    pub async fn close(&self) -> Result<(), SqlRuntimeError> {
        let statement = Statement {
            inner: Arc::clone(&self.inner.statement),
        };
        {
            let _permit = self.inner.guard.acquire().await;
            let dispose_pending = self.inner.dispose_statement_on_close
                && self.inner.state.get() == LifecycleState::Finished
                && statement.state() == LifecycleState::Active;
            if !dispose_pending {
                self.inner.state.ensure_active("cursor", NOT_OPEN)?;
                let inner = &self.inner.statement;
                inner
                    .transaction
                    .connection
                    .client
                    .native()
                    .close_cursor(inner.handle)
                    .await?;
                self.inner.state.set(LifecycleState::Finished);
                inner.cursors.release();
                debug!(statement = inner.handle.0, "cursor closed");
            }
        }
        if self.inner.dispose_statement_on_close {
            if let Err(err) = statement.dispose().await {
                warn!(
                    statement = self.inner.statement.handle.0,
                    error = %err,
                    "cursor closed but its statement was not freed; close again to retry"
                );
                return Err(err);
            }
        }
        Ok(())
    }
}
