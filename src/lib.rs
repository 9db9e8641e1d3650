pub mod amount;
pub mod authorizer;
pub mod config;
pub mod csv;
pub mod model;
pub mod seed;
pub mod store;

pub use amount::Amount;
pub use authorizer::{AuthorizeError, Authorizer};
pub use model::{AccountId, AccountLimit, NewTransaction, Tenor, Transaction, TxId};
