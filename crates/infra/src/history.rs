//! Restartable, newest-first view over a component's ledger.

use futures::stream::{self, Stream, StreamExt, TryStreamExt};

use labstock_core::ComponentId;
use labstock_inventory::LedgerEntry;

use crate::ledger_engine::LedgerError;
use crate::store::{HistoryCursor, LedgerStore};

/// History of one component.
///
/// Each call to [`History::stream`] starts again from the newest entry and
/// pages through the store with a keyset cursor, so two consumers never share
/// position and an entry committed mid-iteration cannot shift later pages.
#[derive(Debug)]
pub struct History<'a, S> {
    store: &'a S,
    component_id: ComponentId,
    page_size: usize,
}

impl<'a, S> History<'a, S>
where
    S: LedgerStore,
{
    pub(crate) fn new(store: &'a S, component_id: ComponentId, page_size: usize) -> Self {
        Self {
            store,
            component_id,
            page_size: page_size.max(1),
        }
    }

    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    /// Pages of entries, newest first.
    pub fn pages(&self) -> impl Stream<Item = Result<Vec<LedgerEntry>, LedgerError>> + Send + use<'a, S> {
        let store = self.store;
        let component_id = self.component_id;
        let limit = self.page_size;

        // `None` state means the previous page was the last one.
        stream::try_unfold(Some(None::<HistoryCursor>), move |state| async move {
            let Some(after) = state else {
                return Ok::<_, LedgerError>(None);
            };
            let page = store.history_page(component_id, after, limit).await?;
            if page.entries.is_empty() {
                return Ok(None);
            }
            Ok(Some((page.entries, page.next.map(Some))))
        })
    }

    /// Entries one at a time, newest first.
    pub fn stream(&self) -> impl Stream<Item = Result<LedgerEntry, LedgerError>> + Send + use<'a, S> {
        self.pages()
            .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
            .try_flatten()
    }

    /// The newest `limit` entries.
    pub async fn latest(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.stream().take(limit).try_collect().await
    }

    /// Every entry, newest first.
    pub async fn collect(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.stream().try_collect().await
    }
}
