use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{AppId, PoolId};

const APP_PREFIX: &str = "app/";
const POOL_PREFIX: &str = "pool/";

/// Address of one document in a [`DocumentStore`](crate::DocumentStore).
///
/// App and pool documents live under distinct prefixes so an app and a pool
/// may share an identifier without sharing a document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

/// What a [`DocumentKey`] addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyTarget {
    App(AppId),
    Pool(PoolId),
    /// A key written by something other than this crate.
    Other,
}

impl DocumentKey {
    pub fn app(app_id: &AppId) -> Self {
        Self(format!("{APP_PREFIX}{app_id}"))
    }

    pub fn pool(pool_id: &PoolId) -> Self {
        Self(format!("{POOL_PREFIX}{pool_id}"))
    }

    /// Wraps a raw key, e.g. one returned by a listing.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Classifies the key by prefix.
    pub fn target(&self) -> KeyTarget {
        if let Some(id) = self.0.strip_prefix(APP_PREFIX) {
            AppId::new(id).map_or(KeyTarget::Other, KeyTarget::App)
        } else if let Some(id) = self.0.strip_prefix(POOL_PREFIX) {
            PoolId::new(id).map_or(KeyTarget::Other, KeyTarget::Pool)
        } else {
            KeyTarget::Other
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
