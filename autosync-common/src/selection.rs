/// A catalog entry the user can mark for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableItem {
    pub id: String,
    pub title: String,
    pub is_selected: bool,
}

impl SelectableItem {
    /// New items always start unselected.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            is_selected: false,
        }
    }
}

/// Filter `items` by a case-insensitive substring match on the title.
///
/// A blank query (empty or whitespace-only) returns every item. Order is
/// always the order of `items`.
pub fn filter<'a>(items: &'a [SelectableItem], query: &str) -> Vec<&'a SelectableItem> {
    if query.trim().is_empty() {
        return items.iter().collect();
    }
    let needle = query.to_lowercase();
    items
        .iter()
        .filter(|item| item.title.to_lowercase().contains(&needle))
        .collect()
}

/// Pure data structure holding the fetched catalog, the per-item selection
/// flags and the live text filter.
///
/// The filtered view is never stored. Every call to [`SelectionStore::filtered`]
/// derives it from the current catalog and query, so there is nothing to go
/// stale between mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionStore {
    catalog: Vec<SelectableItem>,
    query: String,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionStore {
    pub fn new() -> Self {
        Self {
            catalog: Vec::new(),
            query: String::new(),
        }
    }

    /// Replace the catalog after a successful fetch. All items start
    /// unselected; the current query is kept.
    pub fn replace_catalog<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = SelectableItem>,
    {
        self.catalog = items
            .into_iter()
            .map(|item| SelectableItem {
                is_selected: false,
                ..item
            })
            .collect();
    }

    /// Flip the selection flag of the item with `id`.
    /// Returns false (and changes nothing) if no such item exists.
    pub fn toggle(&mut self, id: &str) -> bool {
        match self.catalog.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.is_selected = !item.is_selected;
                true
            }
            None => false,
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn catalog(&self) -> &[SelectableItem] {
        &self.catalog
    }

    /// The catalog as seen through the current query.
    pub fn filtered(&self) -> Vec<&SelectableItem> {
        filter(&self.catalog, &self.query)
    }

    /// Selected items in catalog order. Ignores the query: filtering hides
    /// items, it never drops their selection.
    pub fn selected(&self) -> Vec<&SelectableItem> {
        self.catalog.iter().filter(|item| item.is_selected).collect()
    }

    pub fn selected_count(&self) -> usize {
        self.catalog.iter().filter(|item| item.is_selected).count()
    }

    pub fn is_selected(&self, id: &str) -> Option<bool> {
        self.catalog
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.is_selected)
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}
