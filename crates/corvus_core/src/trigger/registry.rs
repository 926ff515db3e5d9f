//! Trigger registration.

use super::{
    DatabaseInitializer, DeleteCommitNotifier, DeleteMutator, DeleteNotifier, DeleteVeto,
    PutCommitNotifier, PutMutator, PutNotifier, PutVeto, ReadTrigger,
};
use crate::types::EntityKind;
use corvus_storage::JsonObject;
use std::fmt;
use std::sync::Arc;

/// Ordered trigger lists for one entity kind.
///
/// Triggers run in registration order within each capability.
pub struct EntityTriggers<B> {
    pub(crate) put_vetoes: Vec<Arc<dyn PutVeto<B>>>,
    pub(crate) put_mutators: Vec<Arc<dyn PutMutator<B>>>,
    pub(crate) put_notifiers: Vec<Arc<dyn PutNotifier<B>>>,
    pub(crate) put_commit_notifiers: Vec<Arc<dyn PutCommitNotifier<B>>>,
    pub(crate) delete_vetoes: Vec<Arc<dyn DeleteVeto>>,
    pub(crate) delete_mutators: Vec<Arc<dyn DeleteMutator>>,
    pub(crate) delete_notifiers: Vec<Arc<dyn DeleteNotifier>>,
    pub(crate) delete_commit_notifiers: Vec<Arc<dyn DeleteCommitNotifier>>,
    pub(crate) readers: Vec<Arc<dyn ReadTrigger<B>>>,
}

impl<B> Default for EntityTriggers<B> {
    fn default() -> Self {
        Self {
            put_vetoes: Vec::new(),
            put_mutators: Vec::new(),
            put_notifiers: Vec::new(),
            put_commit_notifiers: Vec::new(),
            delete_vetoes: Vec::new(),
            delete_mutators: Vec::new(),
            delete_notifiers: Vec::new(),
            delete_commit_notifiers: Vec::new(),
            readers: Vec::new(),
        }
    }
}

impl<B: 'static> EntityTriggers<B> {
    /// Registers a put veto.
    pub fn put_veto(&mut self, trigger: Arc<dyn PutVeto<B>>) -> &mut Self {
        self.put_vetoes.push(trigger);
        self
    }

    /// Registers a put mutator.
    pub fn put_mutator(&mut self, trigger: Arc<dyn PutMutator<B>>) -> &mut Self {
        self.put_mutators.push(trigger);
        self
    }

    /// Registers a put notifier.
    pub fn put_notifier(&mut self, trigger: Arc<dyn PutNotifier<B>>) -> &mut Self {
        self.put_notifiers.push(trigger);
        self
    }

    /// Registers an after-commit put notifier.
    pub fn put_commit_notifier(&mut self, trigger: Arc<dyn PutCommitNotifier<B>>) -> &mut Self {
        self.put_commit_notifiers.push(trigger);
        self
    }

    /// Registers a delete veto.
    pub fn delete_veto(&mut self, trigger: Arc<dyn DeleteVeto>) -> &mut Self {
        self.delete_vetoes.push(trigger);
        self
    }

    /// Registers a delete mutator.
    pub fn delete_mutator(&mut self, trigger: Arc<dyn DeleteMutator>) -> &mut Self {
        self.delete_mutators.push(trigger);
        self
    }

    /// Registers a delete notifier.
    pub fn delete_notifier(&mut self, trigger: Arc<dyn DeleteNotifier>) -> &mut Self {
        self.delete_notifiers.push(trigger);
        self
    }

    /// Registers an after-commit delete notifier.
    pub fn delete_commit_notifier(&mut self, trigger: Arc<dyn DeleteCommitNotifier>) -> &mut Self {
        self.delete_commit_notifiers.push(trigger);
        self
    }

    /// Registers a read trigger.
    pub fn read(&mut self, trigger: Arc<dyn ReadTrigger<B>>) -> &mut Self {
        self.readers.push(trigger);
        self
    }

    fn describe(&self, entity: EntityKind, out: &mut Vec<TriggerDescription>) {
        let mut push = |capability: &'static str, name: &str| {
            out.push(TriggerDescription {
                entity,
                capability,
                name: name.to_string(),
            });
        };
        self.put_vetoes.iter().for_each(|t| push("put_veto", t.name()));
        self.put_mutators.iter().for_each(|t| push("put_mutator", t.name()));
        self.put_notifiers.iter().for_each(|t| push("put_notifier", t.name()));
        self.put_commit_notifiers
            .iter()
            .for_each(|t| push("put_commit_notifier", t.name()));
        self.delete_vetoes.iter().for_each(|t| push("delete_veto", t.name()));
        self.delete_mutators
            .iter()
            .for_each(|t| push("delete_mutator", t.name()));
        self.delete_notifiers
            .iter()
            .for_each(|t| push("delete_notifier", t.name()));
        self.delete_commit_notifiers
            .iter()
            .for_each(|t| push("delete_commit_notifier", t.name()));
        self.readers.iter().for_each(|t| push("read", t.name()));
    }

    fn len(&self) -> usize {
        self.put_vetoes.len()
            + self.put_mutators.len()
            + self.put_notifiers.len()
            + self.put_commit_notifiers.len()
            + self.delete_vetoes.len()
            + self.delete_mutators.len()
            + self.delete_notifiers.len()
            + self.delete_commit_notifiers.len()
            + self.readers.len()
    }
}

/// A registered trigger, as reported by statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDescription {
    /// Entity kind the trigger applies to.
    pub entity: EntityKind,
    /// Capability it was registered under.
    pub capability: &'static str,
    /// Trigger identity.
    pub name: String,
}

/// The complete, immutable trigger set of a database.
#[derive(Default)]
pub struct Triggers {
    pub(crate) documents: EntityTriggers<JsonObject>,
    pub(crate) attachments: EntityTriggers<Vec<u8>>,
    pub(crate) initializers: Vec<Arc<dyn DatabaseInitializer>>,
}

impl Triggers {
    /// Starts building a trigger set.
    #[must_use]
    pub fn builder() -> TriggersBuilder {
        TriggersBuilder::default()
    }

    /// Returns a trigger set with no triggers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Lists every registered trigger.
    #[must_use]
    pub fn describe(&self) -> Vec<TriggerDescription> {
        let mut out = Vec::new();
        self.documents.describe(EntityKind::Document, &mut out);
        self.attachments.describe(EntityKind::Attachment, &mut out);
        out
    }

    /// Returns the total number of registered triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len() + self.attachments.len()
    }

    /// Returns true if no trigger is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Triggers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Triggers")
            .field("documents", &self.documents.len())
            .field("attachments", &self.attachments.len())
            .field("initializers", &self.initializers.len())
            .finish()
    }
}

/// Collects triggers before the database opens.
///
/// # Example
///
/// ```rust,ignore
/// let mut builder = Triggers::builder();
/// builder
///     .attachments()
///     .put_veto(Arc::new(RefuseBigAttachmentPutTrigger::new(5)));
/// let db = Database::open_with(storage, Config::default(), builder.build())?;
/// ```
#[derive(Default)]
pub struct TriggersBuilder {
    triggers: Triggers,
}

impl TriggersBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Document trigger lists.
    pub fn documents(&mut self) -> &mut EntityTriggers<JsonObject> {
        &mut self.triggers.documents
    }

    /// Attachment trigger lists.
    pub fn attachments(&mut self) -> &mut EntityTriggers<Vec<u8>> {
        &mut self.triggers.attachments
    }

    /// Registers startup work.
    pub fn initializer(&mut self, initializer: Arc<dyn DatabaseInitializer>) -> &mut Self {
        self.triggers.initializers.push(initializer);
        self
    }

    /// Freezes the registrations.
    #[must_use]
    pub fn build(self) -> Triggers {
        self.triggers
    }
}
