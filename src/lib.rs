pub mod config;
pub mod connection;
pub mod consumer;
pub mod controls;
pub mod cookie;
pub mod der;
pub mod error;
pub mod extop;
pub mod filter;
pub mod paged;
pub mod protocol;
pub mod psearch;
pub mod referral;
pub mod sync;
pub mod tls;
pub mod url;
pub mod vlv;

pub use config::Config;
pub use connection::{Connection, ConnectionFactory, ConnectionOptions, LdapConnection, LdapConnectionFactory, OperationHandle};
pub use cookie::{CookieManager, FileCookieManager, InMemoryCookieManager};
pub use error::{Error, Result};
pub use paged::PagedResultsClient;
pub use psearch::PersistentSearchClient;
pub use referral::ReferralFollower;
pub use sync::{SyncCookie, SyncReplClient, SyncReplRunner};
pub use url::LdapUrl;
pub use vlv::VlvClient;
