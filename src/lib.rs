//! Collection manager storage: user-defined albums of typed items with
//! pictures, queries, saved searches and whole-collection backups.

pub mod backup;
pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod home;
pub mod import;
pub mod logging;
pub mod query;
pub mod saved_search;
pub mod tasks;
pub mod types;

pub use collection::Collection;
pub use db::{Album, AlbumItem, AlbumItemPicture, Database, FieldEdit, ItemField, MetaItemField, ResultSet};
pub use error::{ErrorState, Result, StoreError};
pub use query::{QueryComponent, QueryOperator};
pub use saved_search::{SavedSearch, SavedSearchManager};
pub use types::{FieldType, FieldValue, OptionType, StarRating};
