// search-core/src/name_index.rs
//! 文件名索引
//!
//! Keeps every path below the configured roots keyed by its file name and
//! answers queries by case-insensitive name match. Rescans and filesystem
//! events are diffed against the current contents and reported to the
//! driver as change notifications, so running queries pick them up.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use async_trait::async_trait;
use ignore::WalkBuilder;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rpc::search::FILE_SCHEME;
use rpc::{Hit, NameEntry, QueryRequest};

use crate::backend::{ChangeData, ChangeNotifier, Queryable};
use crate::error::BackendError;
use crate::result_stream::ResultStream;

pub const NAME_INDEX_SOURCE: &str = "NameIndex";

/// Hits handed to the stream per batch while answering a full query
const EVALUATION_BATCH: usize = 256;

#[derive(Default)]
struct IndexState {
    roots: BTreeSet<PathBuf>,
    /// path -> is_dir
    entries: BTreeMap<PathBuf, bool>,
}

#[derive(Default)]
pub struct NameIndex {
    state: RwLock<IndexState>,
    notifier: OnceLock<ChangeNotifier>,
}

pub fn path_to_uri(path: &Path) -> String {
    format!("{}{}", FILE_SCHEME, path.display())
}

fn uri_to_path(uri: &str) -> Option<PathBuf> {
    uri.strip_prefix(FILE_SCHEME).map(PathBuf::from)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Score of `name` against the query, or `None` if some clause is missing.
fn match_score(name: &str, query: &QueryRequest) -> Option<f32> {
    let name = name.to_lowercase();
    let mut matched = 0usize;
    for clause in query.clauses.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        if !name.contains(&clause.to_lowercase()) {
            return None;
        }
        matched += clause.chars().count();
    }
    let len = name.chars().count().max(1);
    Some((matched as f32 / len as f32).clamp(0.0, 1.0))
}

fn walk(root: &Path) -> BTreeMap<PathBuf, bool> {
    let mut found = BTreeMap::new();
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false);

    for result in builder.build() {
        match result {
            Ok(entry) => {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                found.insert(entry.into_path(), is_dir);
            }
            Err(e) => tracing::warn!("walk error under {:?}: {}", root, e),
        }
    }
    found
}

impl NameIndex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.read().roots.iter().cloned().collect()
    }

    fn notify(&self, change: ChangeData) {
        if change.is_empty() {
            return;
        }
        tracing::debug!(
            "name index changed: +{} -{}",
            change.added.len(),
            change.removed.len()
        );
        if let Some(notifier) = self.notifier.get() {
            notifier.notify(change);
        }
    }

    /// Adds `root` to the indexed roots and walks it.
    /// Returns the number of entries now indexed under `root`.
    pub fn scan(&self, root: &Path) -> usize {
        self.write().roots.insert(root.to_path_buf());
        self.refresh(root)
    }

    /// Walks `path` and replaces everything previously indexed below it.
    fn refresh(&self, path: &Path) -> usize {
        let found = walk(path);
        let count = found.len();

        let mut change = ChangeData::default();
        {
            let mut state = self.write();
            let stale: Vec<PathBuf> = state
                .entries
                .keys()
                .filter(|p| p.starts_with(path) && !found.contains_key(*p))
                .cloned()
                .collect();
            for stale in stale {
                state.entries.remove(&stale);
                change.removed.push(path_to_uri(&stale));
            }

            for (entry, is_dir) in found {
                if state.entries.insert(entry.clone(), is_dir).is_none() {
                    change.added.push(path_to_uri(&entry));
                }
            }
        }

        tracing::info!("Indexed {} entries under {:?}", count, path);
        self.notify(change);
        count
    }

    /// Rescans the given paths, or every root when `paths` is empty. Paths
    /// outside the indexed roots are skipped; they would not be watched.
    pub fn rescan(&self, paths: &[PathBuf]) -> usize {
        let roots = self.roots();
        if paths.is_empty() {
            return roots.iter().map(|root| self.refresh(root)).sum();
        }

        paths
            .iter()
            .filter(|path| {
                let covered = roots.iter().any(|root| path.starts_with(root));
                if !covered {
                    tracing::warn!("{:?} is not under an indexed root, skipping", path);
                }
                covered
            })
            .map(|path| self.refresh(path))
            .sum()
    }

    pub fn dump(&self) -> Vec<NameEntry> {
        self.read()
            .entries
            .iter()
            .map(|(path, &is_dir)| NameEntry {
                name: file_name(path),
                uri: path_to_uri(path),
                is_dir,
            })
            .collect()
    }

    fn insert(&self, path: &Path, change: &mut ChangeData) {
        let Ok(metadata) = std::fs::symlink_metadata(path) else {
            // Gone again before we got to it.
            self.remove(path, change);
            return;
        };
        let subtree = if metadata.is_dir() {
            walk(path)
        } else {
            BTreeMap::from([(path.to_path_buf(), false)])
        };

        let mut state = self.write();
        if !state.roots.iter().any(|root| path.starts_with(root)) {
            return;
        }
        for (path, is_dir) in subtree {
            if state.entries.insert(path.clone(), is_dir).is_none() {
                change.added.push(path_to_uri(&path));
            }
        }
    }

    fn remove(&self, path: &Path, change: &mut ChangeData) {
        let mut state = self.write();
        let gone: Vec<PathBuf> = state
            .entries
            .range(path.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect();
        for p in gone {
            state.entries.remove(&p);
            change.removed.push(path_to_uri(&p));
        }
    }

    /// Applies one filesystem event and reports what it changed.
    pub fn apply_event(&self, event: &notify::Event) {
        let mut change = ChangeData::default();
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.insert(path, &mut change);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.remove(path, &mut change);
                }
            }
            EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if path.exists() {
                        self.insert(path, &mut change);
                    } else {
                        self.remove(path, &mut change);
                    }
                }
            }
            _ => {}
        }
        self.notify(change);
    }

    /// Starts watching every root. Events stop being applied once the
    /// returned watcher is dropped.
    pub fn watch(self: &Arc<Self>) -> notify::Result<RecommendedWatcher> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        for root in self.roots() {
            watcher.watch(&root, RecursiveMode::Recursive)?;
            tracing::info!("文件监控已启动: {:?}", root);
        }

        let index = Arc::clone(self);
        thread::Builder::new()
            .name("name-index-watcher".to_string())
            .spawn(move || {
                for res in rx {
                    match res {
                        Ok(event) => {
                            tracing::trace!("file event: {:?}", event);
                            index.apply_event(&event);
                        }
                        Err(e) => tracing::warn!("watch error: {:?}", e),
                    }
                }
                tracing::debug!("name index watcher stopped");
            })
            .map_err(notify::Error::io)?;

        Ok(watcher)
    }

    fn matches(&self, query: &QueryRequest, only: Option<&[String]>) -> Vec<Hit> {
        let state = self.read();
        let hit = |path: &Path, is_dir: bool| {
            match_score(&file_name(path), query).map(|score| {
                Hit::new(path_to_uri(path), score, NAME_INDEX_SOURCE)
                    .with_type(if is_dir { "Directory" } else { "File" })
            })
        };

        match only {
            Some(uris) => uris
                .iter()
                .filter_map(|uri| uri_to_path(uri))
                .filter_map(|path| {
                    let is_dir = *state.entries.get(&path)?;
                    hit(&path, is_dir)
                })
                .collect(),
            None => state
                .entries
                .iter()
                .filter_map(|(path, &is_dir)| hit(path, is_dir))
                .collect(),
        }
    }
}

#[async_trait]
impl Queryable for NameIndex {
    fn name(&self) -> &str {
        NAME_INDEX_SOURCE
    }

    fn accepts(&self, query: &QueryRequest) -> bool {
        !query.is_empty()
    }

    fn attach(&self, notifier: ChangeNotifier) {
        if self.notifier.set(notifier).is_err() {
            tracing::warn!("name index attached twice; keeping the first registration");
        }
    }

    async fn evaluate(
        &self,
        query: &QueryRequest,
        stream: &ResultStream,
        change: Option<&ChangeData>,
    ) -> Result<(), BackendError> {
        if let Some(change) = change {
            stream.subtract(change.removed.iter().cloned());
            stream.add(self.matches(query, Some(&change.added)));
            return Ok(());
        }

        let hits = self.matches(query, None);
        for batch in hits.chunks(EVALUATION_BATCH) {
            if stream.is_cancelled() {
                break;
            }
            stream.add(batch.iter().cloned());
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
