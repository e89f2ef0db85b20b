#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Manifest resolution
//!
//! Resolves the manifest hierarchy into install/remove/featured lists:
//! primary-manifest discovery with identifier fallback, recursive
//! inclusion processing, condition predicates, catalog lookup through
//! the per-item processors, and end-of-run garbage collection of the
//! manifest cache.

mod catalogs;
mod conditions;
mod context;
mod items;
mod manifest;

pub use catalogs::{split_name_version, CatalogDb};
pub use conditions::evaluate as evaluate_predicate;
pub use context::{condition_context, merge_admin_conditions, MachineFacts};
pub use manifest::{ManifestView, Selector};

use plist::{Dictionary, Value};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use steward_config::Preferences;
use steward_errors::{Error, ManifestError, Result};
use steward_events::{Event, EventSender, EventSenderExt};
use steward_net::{FetchOptions, Fetcher};
use steward_registry::{ActiveManifests, StopFlag};
use steward_types::{InstallInfo, ResourceKind};

/// Manifest names never garbage-collected from the cache directory.
const MANIFEST_KEEP_LIST: &[&str] = &["SelfServeManifest"];

/// Resolves manifests into an [`InstallInfo`] accumulator.
///
/// One resolver instance serves one run: fetched manifests and
/// catalogs are memoized for the run's duration and reclaimed by
/// [`clean_manifest_cache`](Self::clean_manifest_cache) at the end.
pub struct Resolver {
    fetcher: Fetcher,
    prefs: Preferences,
    events: EventSender,
    stop: StopFlag,
    fetch_options: FetchOptions,
    base_context: Dictionary,
    manifests: ActiveManifests,
    catalogs: CatalogDb,
}

impl Resolver {
    #[must_use]
    pub fn new(
        fetcher: Fetcher,
        prefs: Preferences,
        events: EventSender,
        stop: StopFlag,
        base_context: Dictionary,
    ) -> Self {
        Self {
            fetcher,
            prefs,
            events,
            stop,
            fetch_options: FetchOptions {
                only_if_changed: true,
                ..FetchOptions::default()
            },
            base_context,
            manifests: ActiveManifests::new(),
            catalogs: CatalogDb::new(),
        }
    }

    /// The manifests touched so far this run.
    #[must_use]
    pub fn active_manifests(&self) -> &ActiveManifests {
        &self.manifests
    }

    /// Find the primary manifest for this machine.
    ///
    /// Tries the identifier chain in order; "manifest not retrieved"
    /// failures fall through to the next candidate. The winning name
    /// should be recorded in the run report as `ManifestName`.
    ///
    /// # Errors
    ///
    /// A transport or parse error on any candidate is fatal, as is
    /// exhausting the chain.
    pub async fn discover_primary(&mut self, facts: &MachineFacts) -> Result<String> {
        let candidates = facts.manifest_candidates(self.prefs.client_identifier());
        let last = candidates.len().saturating_sub(1);
        for (index, name) in candidates.iter().enumerate() {
            match self.fetch_manifest(name).await {
                Ok(_) => return Ok(name.clone()),
                Err(e) if e.is_not_retrieved() => {
                    self.events.emit(Event::debug(format!(
                        "manifest {name} not available: {e}"
                    )));
                    if index == last {
                        return Err(ManifestError::NoPrimaryManifest {
                            tried: candidates.join(", "),
                        }
                        .into());
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(ManifestError::NoPrimaryManifest {
            tried: candidates.join(", "),
        }
        .into())
    }

    /// Run one selector pass over the manifest hierarchy rooted at
    /// `primary`, appending into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest cannot be retrieved or parsed.
    /// A requested stop returns `Ok` with the accumulator as-is.
    pub async fn resolve(
        &mut self,
        primary: &str,
        selector: Selector,
        info: &mut InstallInfo,
    ) -> Result<()> {
        self.events.emit(Event::ManifestProcessing {
            name: primary.to_string(),
            selector: selector.key().to_string(),
        });
        let document = self.fetch_manifest(primary).await?;
        self.process_manifest(primary, &document, selector, &[], info)
            .await
    }

    /// Delete cached manifest files not touched this run.
    ///
    /// Keeps every active manifest, the whitelist, and the sidecar
    /// files belonging to kept manifests.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be traversed.
    pub async fn clean_manifest_cache(&self) -> Result<Vec<PathBuf>> {
        let dir = self.prefs.manifests_dir();
        let mut keep: HashSet<String> = self.manifests.list().into_iter().collect();
        for name in MANIFEST_KEEP_LIST {
            keep.insert((*name).to_string());
        }

        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(removed),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = name.strip_suffix(".download").unwrap_or(&name);
            if keep.contains(stem) {
                continue;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                removed.push(path);
            }
        }
        if !removed.is_empty() {
            self.events.emit(Event::ManifestCacheCleaned {
                removed: removed.clone(),
            });
        }
        Ok(removed)
    }

    /// Fetch a manifest, memoizing through the active-manifest table.
    async fn fetch_manifest(&mut self, name: &str) -> Result<Dictionary> {
        if let Some(document) = self.manifests.get(name) {
            return Ok(document.clone());
        }
        let destination = self.prefs.manifests_dir().join(name);
        match self
            .fetcher
            .fetch(ResourceKind::Manifest, name, &destination, &self.fetch_options)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_retrieved() => {
                return Err(ManifestError::NotRetrieved {
                    name: name.to_string(),
                    detail: e.to_string(),
                }
                .into());
            }
            Err(e) => return Err(e),
        }
        let document = steward_store::read_dict(&destination)
            .await
            .map_err(|e| -> Error {
                ManifestError::Invalid {
                    name: name.to_string(),
                    detail: e.to_string(),
                }
                .into()
            })?;
        self.manifests.insert(name, destination, document.clone());
        self.events.emit(Event::ManifestFetched {
            name: name.to_string(),
        });
        Ok(document)
    }

    /// Make every catalog in the list available for lookup. Retrieval
    /// failures downgrade to warnings; the catalog reads as empty for
    /// the rest of the run.
    async fn ensure_catalogs(&mut self, catalog_list: &[String]) {
        for name in catalog_list {
            if self.catalogs.contains(name) {
                continue;
            }
            let destination = self.prefs.catalogs_dir().join(name);
            let fetched = self
                .fetcher
                .fetch(ResourceKind::Catalog, name, &destination, &self.fetch_options)
                .await;
            match fetched {
                Ok(_) => match steward_store::read(&destination).await {
                    Ok(value) => self.catalogs.insert(name, &value),
                    Err(e) => {
                        self.events.emit(Event::warning(format!(
                            "catalog {name} is unreadable: {e}"
                        )));
                        self.catalogs.insert(name, &Value::Array(Vec::new()));
                    }
                },
                Err(e) => {
                    self.events.emit(Event::warning(format!(
                        "could not retrieve catalog {name}: {e}"
                    )));
                    self.catalogs.insert(name, &Value::Array(Vec::new()));
                }
            }
        }
    }

    /// Recursive manifest processing: included manifests first, then
    /// conditional items, then the selector list, appending in
    /// manifest order.
    fn process_manifest<'a>(
        &'a mut self,
        name: &'a str,
        manifest: &'a Dictionary,
        selector: Selector,
        parent_catalogs: &'a [String],
        info: &'a mut InstallInfo,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>> {
        Box::pin(async move {
            if self.stop.stop_requested() {
                return Ok(());
            }
            let view = ManifestView(manifest);

            let own_catalogs = view.catalogs();
            let catalog_list: Vec<String> = if own_catalogs.is_empty() {
                parent_catalogs.to_vec()
            } else {
                own_catalogs
            };
            if catalog_list.is_empty() {
                self.events.emit(Event::ManifestSkipped {
                    name: name.to_string(),
                    reason: "no catalogs and no parent catalogs".into(),
                });
                return Ok(());
            }
            self.ensure_catalogs(&catalog_list).await;

            for included in view.included_manifests() {
                if self.stop.stop_requested() {
                    return Ok(());
                }
                let document = self.fetch_manifest(&included).await?;
                self.process_manifest(&included, &document, selector, &catalog_list, info)
                    .await?;
            }

            for conditional in view.conditional_items() {
                if self.stop.stop_requested() {
                    return Ok(());
                }
                let Some(predicate) = conditional
                    .get("condition")
                    .and_then(Value::as_string)
                else {
                    self.events.emit(Event::warning(format!(
                        "conditional item in {name} has no condition; ignored"
                    )));
                    continue;
                };
                let context = self.predicate_context(&catalog_list);
                match conditions::evaluate(predicate, &context) {
                    Ok(matched) => {
                        self.events.emit(Event::ConditionEvaluated {
                            predicate: predicate.to_string(),
                            result: matched,
                        });
                        if matched {
                            self.process_manifest(
                                name,
                                conditional,
                                selector,
                                &catalog_list,
                                info,
                            )
                            .await?;
                        }
                    }
                    Err(e) => {
                        self.events.emit(Event::warning(format!(
                            "condition in {name} did not evaluate: {e}"
                        )));
                    }
                }
            }

            match selector {
                Selector::FeaturedItems => {
                    for item in view.selector_items(selector) {
                        info.add_featured_item(&item);
                    }
                }
                Selector::DefaultInstalls => {
                    for item in view.selector_items(selector) {
                        info.add_default_install(&item);
                    }
                }
                _ => {
                    for item in view.selector_items(selector) {
                        if self.stop.stop_requested() {
                            return Ok(());
                        }
                        self.process_item(selector, &item, &catalog_list, info);
                    }
                }
            }
            Ok(())
        })
    }

    fn process_item(
        &self,
        selector: Selector,
        item_ref: &str,
        catalog_list: &[String],
        info: &mut InstallInfo,
    ) {
        match selector {
            Selector::ManagedInstalls => {
                items::process_install(item_ref, catalog_list, &self.catalogs, info, &self.events);
            }
            Selector::ManagedUninstalls => {
                items::process_removal(item_ref, catalog_list, &self.catalogs, info, &self.events);
            }
            Selector::ManagedUpdates => {
                items::process_update(item_ref, catalog_list, &self.catalogs, info, &self.events);
            }
            Selector::OptionalInstalls => {
                items::process_optional(item_ref, catalog_list, &self.catalogs, info, &self.events);
            }
            Selector::DefaultInstalls | Selector::FeaturedItems => {}
        }
    }

    /// Ambient context for condition evaluation, augmented with the
    /// effective catalog set.
    fn predicate_context(&self, catalog_list: &[String]) -> Dictionary {
        let mut context = self.base_context.clone();
        context.insert(
            "catalogs".into(),
            Value::Array(
                catalog_list
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        context
    }
}
