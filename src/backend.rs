//! The storage, change feed and avatar store of one running instance.

use std::path::{Path, PathBuf};

use crate::auth::Accounts;
use crate::avatar::AvatarStore;
use crate::error::CotaskResult;
use crate::feed::ChangeFeed;
use crate::ledger::RelationshipLedger;
use crate::sharing::Sharing;
use crate::storage::{db_path, Storage};

pub struct Backend {
    storage: Storage,
    feed: ChangeFeed,
    avatars: AvatarStore,
}

impl Backend {
    /// Open `{data_dir}/cotask.db`, keeping avatars in `{data_dir}/avatars`.
    pub fn open(data_dir: &Path, feed: ChangeFeed) -> CotaskResult<Self> {
        let storage = Storage::open(&db_path(data_dir))?;
        Ok(Self {
            storage,
            feed,
            avatars: AvatarStore::new(data_dir.join("avatars")),
        })
    }

    pub fn open_in_memory(avatar_dir: impl Into<PathBuf>, feed: ChangeFeed) -> CotaskResult<Self> {
        Ok(Self {
            storage: Storage::open_in_memory()?,
            feed,
            avatars: AvatarStore::new(avatar_dir),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn avatars(&self) -> &AvatarStore {
        &self.avatars
    }

    pub fn ledger(&self) -> RelationshipLedger<'_> {
        RelationshipLedger::new(&self.storage, &self.feed)
    }

    pub fn sharing(&self) -> Sharing<'_> {
        Sharing::new(&self.storage, &self.feed)
    }

    pub fn accounts(&self) -> Accounts<'_> {
        Accounts::new(&self.storage, &self.feed)
    }
}
