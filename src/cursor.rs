//! A lazily-paginated cursor over a command's result documents.

use std::collections::VecDeque;

use bson::Document;

use crate::{
    client::Client,
    error::Result,
    operation::get_more::{GetMore, KillCursors},
    options::Namespace,
    read_preference::SelectionCriteria,
};

/// An iterator over the documents a `find`/`aggregate`/`listCollections` command produced,
/// fetching subsequent batches via `getMore` as the current one is exhausted. Sends
/// `killCursors` on drop if the cursor was never fully exhausted, so the server can release its
/// resources promptly rather than waiting out the server-side idle cursor timeout.
pub struct Cursor<'a> {
    client: &'a Client,
    ns: Namespace,
    id: i64,
    address: crate::options::ServerAddress,
    buffer: VecDeque<Document>,
    batch_size: Option<u32>,
    exhausted: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(
        client: &'a Client,
        ns: Namespace,
        id: i64,
        address: crate::options::ServerAddress,
        first_batch: Vec<Document>,
        batch_size: Option<u32>,
    ) -> Self {
        Self {
            client,
            ns,
            id,
            address,
            buffer: first_batch.into(),
            batch_size,
            exhausted: id == 0,
        }
    }

    /// The server-assigned cursor id. `0` once exhausted.
    pub fn id(&self) -> i64 {
        self.id
    }

    fn fetch_more(&mut self) -> Result<()> {
        if self.exhausted {
            return Ok(());
        }
        let op = GetMore {
            ns: self.ns.clone(),
            cursor_id: self.id,
            batch_size: self.batch_size,
            selection_criteria: SelectionCriteria::PinnedAddress(self.address.clone()),
        };
        let outcome = self.client.execute_read(&op)?;
        self.id = outcome.cursor_id;
        self.buffer.extend(outcome.batch);
        if self.id == 0 {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Some(Ok(doc));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_more() {
                return Some(Err(e));
            }
            if self.buffer.is_empty() && self.exhausted {
                return None;
            }
        }
    }
}

impl<'a> Drop for Cursor<'a> {
    fn drop(&mut self) {
        if self.id == 0 {
            return;
        }
        let op = KillCursors {
            ns: self.ns.clone(),
            cursor_ids: vec![self.id],
            selection_criteria: SelectionCriteria::PinnedAddress(self.address.clone()),
        };
        let _ = self.client.execute_read(&op);
    }
}
