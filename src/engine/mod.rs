pub mod cache;
pub mod entry;
pub mod persistence;
pub mod store;
pub mod table;

pub use cache::ReadCache;
pub use entry::{Entry, ExpiryPolicy};
pub use persistence::Persistence;
pub use store::{Store, StoreTableScope};
pub use table::{StoreImage, Table};
