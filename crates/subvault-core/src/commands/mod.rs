pub mod backup;
pub mod list;
pub mod reconcile;
pub mod restore;
