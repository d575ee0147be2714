//! # Property Index Facade
//!
//! Three index flavors over one [`PersistentTree`] keyed by strings with
//! RID-list values:
//!
//! | flavor | put policy | lookup |
//! |---|---|---|
//! | unique | error when the key exists under a different RID | single RID |
//! | non-unique | append if absent, replace by equality | posting list |
//! | full-text | append if absent (tokens come pre-split from the caller) | posting list |
//!
//! An index moves through `Unconfigured → Configured → Open → Closed`; only
//! `Open` accepts operations, and `configure` is idempotent for equal
//! arguments. A unique violation is the one *recoverable* error here — it is
//! typed ([`DuplicateKey`]) so callers can downcast and react instead of
//! treating it as corruption.

use eyre::{bail, ensure, Result, WrapErr};
use smallvec::smallvec;
use std::fmt;
use std::sync::Arc;

use crate::codec::{CodecRegistry, RidListCodec, StringCodec};
use crate::config::TreeConfig;
use crate::rid::{RecordId, RidList};
use crate::store::RecordStore;
use crate::tree::descriptor::TreeDescriptor;
use crate::tree::PersistentTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Unique,
    NotUnique,
    FullText,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Unique => "unique",
            IndexKind::NotUnique => "not-unique",
            IndexKind::FullText => "full-text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Unconfigured,
    Configured,
    Open,
    Closed,
}

/// Recoverable uniqueness violation: the key is already bound to another
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    pub key: String,
    pub existing: RecordId,
    pub attempted: RecordId,
}

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key '{}' is already bound to {} (attempted {})",
            self.key, self.existing, self.attempted
        )
    }
}

impl std::error::Error for DuplicateKey {}

/// Whether an error report is a [`DuplicateKey`] violation.
pub fn is_duplicate_key(report: &eyre::Report) -> bool {
    report.downcast_ref::<DuplicateKey>().is_some()
}

pub struct PropertyIndex {
    kind: IndexKind,
    name: String,
    state: IndexState,
    registry: CodecRegistry,
    store: Option<Arc<dyn RecordStore>>,
    config: Option<TreeConfig>,
    tree: Option<Arc<PersistentTree<String, RidList>>>,
}

impl PropertyIndex {
    pub fn new(kind: IndexKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            state: IndexState::Unconfigured,
            registry: CodecRegistry::builtin(),
            store: None,
            config: None,
            tree: None,
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Bind the record store and configuration. Idempotent for equal
    /// arguments; anything else on a configured index is an error.
    pub fn configure(&mut self, store: Arc<dyn RecordStore>, config: TreeConfig) -> Result<()> {
        config
            .validate()
            .wrap_err_with(|| format!("configuring index '{}'", self.name))?;

        match self.state {
            IndexState::Unconfigured => {
                self.store = Some(store);
                self.config = Some(config);
                self.state = IndexState::Configured;
                Ok(())
            }
            IndexState::Configured => {
                let same_store = self
                    .store
                    .as_ref()
                    .map(|existing| Arc::ptr_eq(existing, &store))
                    .unwrap_or(false);
                let same_config = self.config.as_ref() == Some(&config);
                ensure!(
                    same_store && same_config,
                    "index '{}' is already configured with different arguments",
                    self.name
                );
                Ok(())
            }
            state => bail!(
                "index '{}' cannot be configured in state {:?}",
                self.name,
                state
            ),
        }
    }

    /// Open the backing tree: fresh when `descriptor_rid` is `None`, loaded
    /// from the descriptor otherwise.
    pub fn open(&mut self, descriptor_rid: Option<RecordId>) -> Result<()> {
        ensure!(
            self.state == IndexState::Configured,
            "index '{}' must be configured before open (state {:?})",
            self.name,
            self.state
        );
        let store = self.store.clone().expect("configured state has a store"); // INVARIANT: set on configure
        let config = self.config.clone().expect("configured state has a config"); // INVARIANT: set on configure

        let tree = match descriptor_rid {
            None => PersistentTree::create(
                store,
                config,
                Arc::new(StringCodec),
                Arc::new(RidListCodec),
            )?,
            Some(rid) => {
                // Surface an unknown codec by name before binding anything.
                let bytes = store
                    .read(rid)
                    .wrap_err_with(|| format!("loading descriptor for index '{}'", self.name))?;
                let descriptor = TreeDescriptor::decode(&bytes)?;
                self.registry.ensure_known(&descriptor.key_codec_name)?;
                self.registry.ensure_known(&descriptor.value_codec_name)?;

                PersistentTree::open(
                    store,
                    config,
                    rid,
                    Arc::new(StringCodec),
                    Arc::new(RidListCodec),
                )?
            }
        };
        self.tree = Some(Arc::new(tree));
        self.state = IndexState::Open;
        Ok(())
    }

    /// Flush and stop accepting operations.
    pub fn close(&mut self) -> Result<()> {
        if let Some(tree) = &self.tree {
            tree.flush()?;
        }
        self.tree = None;
        self.state = IndexState::Closed;
        Ok(())
    }

    fn tree(&self) -> Result<&Arc<PersistentTree<String, RidList>>> {
        ensure!(
            self.state == IndexState::Open,
            "index '{}' is not open (state {:?})",
            self.name,
            self.state
        );
        self.tree
            .as_ref()
            .ok_or_else(|| eyre::eyre!("index '{}' has no backing tree", self.name))
    }

    /// Shared handle to the backing tree, e.g. for registering it with a
    /// transaction context.
    pub fn tree_handle(&self) -> Result<Arc<PersistentTree<String, RidList>>> {
        Ok(Arc::clone(self.tree()?))
    }

    pub fn put(&self, key: &str, rid: RecordId) -> Result<()> {
        let tree = self.tree()?;
        let existing = tree.get(&key.to_string())?;

        match self.kind {
            IndexKind::Unique => {
                if let Some(list) = existing {
                    if let Some(bound) = list.first() {
                        if *bound != rid {
                            return Err(eyre::Report::new(DuplicateKey {
                                key: key.to_string(),
                                existing: *bound,
                                attempted: rid,
                            }));
                        }
                        return Ok(());
                    }
                }
                tree.put(key.to_string(), smallvec![rid])?;
            }
            IndexKind::NotUnique => {
                let mut list = existing.unwrap_or_default();
                match list.iter().position(|entry| *entry == rid) {
                    Some(position) => list[position] = rid,
                    None => list.push(rid),
                }
                tree.put(key.to_string(), list)?;
            }
            IndexKind::FullText => {
                let mut list = existing.unwrap_or_default();
                if !list.contains(&rid) {
                    list.push(rid);
                    tree.put(key.to_string(), list)?;
                }
            }
        }
        Ok(())
    }

    /// Posting list for `key`, empty when absent.
    pub fn get(&self, key: &str) -> Result<RidList> {
        Ok(self.tree()?.get(&key.to_string())?.unwrap_or_default())
    }

    /// Single-RID lookup for the unique flavor.
    pub fn get_unique(&self, key: &str) -> Result<Option<RecordId>> {
        ensure!(
            self.kind == IndexKind::Unique,
            "index '{}' is {} but a unique lookup was requested",
            self.name,
            self.kind
        );
        Ok(self.get(key)?.first().copied())
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.tree()?.contains_key(&key.to_string())
    }

    /// Remove one posting (`Some(rid)`) or the whole slot (`None`). Returns
    /// whether anything was removed.
    pub fn remove(&self, key: &str, rid: Option<RecordId>) -> Result<bool> {
        let tree = self.tree()?;
        match rid {
            None => Ok(tree.remove(&key.to_string())?.is_some()),
            Some(rid) => {
                let mut list = match tree.get(&key.to_string())? {
                    Some(list) => list,
                    None => return Ok(false),
                };
                let position = match list.iter().position(|entry| *entry == rid) {
                    Some(position) => position,
                    None => return Ok(false),
                };
                list.remove(position);
                if list.is_empty() {
                    tree.remove(&key.to_string())?;
                } else {
                    tree.put(key.to_string(), list)?;
                }
                Ok(true)
            }
        }
    }

    pub fn size(&self) -> Result<i64> {
        Ok(self.tree()?.size())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.tree()?.keys()
    }

    pub fn clear(&self) -> Result<()> {
        self.tree()?.clear()
    }

    pub fn flush(&self) -> Result<()> {
        self.tree()?.flush()?;
        Ok(())
    }

    /// Descriptor identity once the index has been flushed, needed to reopen
    /// it later.
    pub fn descriptor_rid(&self) -> Result<Option<RecordId>> {
        Ok(self.tree()?.descriptor_rid())
    }
}
