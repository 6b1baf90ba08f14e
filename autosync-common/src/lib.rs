mod selection;

pub use selection::{filter, SelectableItem, SelectionStore};
