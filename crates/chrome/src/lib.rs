//! Chrome DevTools Protocol session driver.
//!
//! Two core pieces: a session lifecycle manager ([`Chrome`]) that lazily
//! brings up, reuses, and tears down one browser connection per configured
//! target, and an event correlation layer ([`listen`], [`download`]) that
//! reconstructs completed network exchanges and downloads out of the raw,
//! out-of-order CDP notification stream.
//!
//! ```no_run
//! use chrome::{Chrome, UrlFilter};
//!
//! # async fn demo() -> chrome::Result<()> {
//! let browser = Chrome::headless();
//! let scope = browser.new_scope(None).await?;
//! let mut records = chrome::listen_network(
//!     &scope,
//!     UrlFilter::Contains("/api/".into()),
//!     None,
//!     true,
//! );
//! scope.navigate("https://example.com").await?;
//! if let Some(record) = records.recv().await {
//!     println!("{} {} -> {:?} bytes", record.method, record.url,
//!         record.body.as_ref().map(Vec::len));
//! }
//! browser.close().await;
//! # Ok(())
//! # }
//! ```

pub mod cdp;
pub mod chrome;
pub mod cookie;
pub mod download;
mod error;
pub mod launch;
pub mod listen;
pub mod scope;
pub mod storage;
#[cfg(test)]
pub(crate) mod testutil;
pub mod url;

pub use chrome::Chrome;
pub use cookie::{cookies, set_cookies, Cookie, SameSite};
pub use download::{download, listen_download, set_download_dir, DownloadItem, DownloadState};
pub use error::{Error, Result};
pub use launch::{default_flags, Flag};
pub use listen::{listen_network, NetworkExchange, ResponseInfo, DEFAULT_CHANNEL_CAPACITY};
pub use scope::{Action, Scope};
pub use storage::{set_storage_item, storage_items};
pub use url::UrlFilter;
