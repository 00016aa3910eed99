//! Core types for the live-collection driver.

use crate::error::{DriverError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Field name stores use for document identity.
pub const ID_FIELD: &str = "_id";

/// Identifies a collection: store (database) name plus collection name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub store: String,
    pub collection: String,
}

impl CollectionKey {
    pub fn new(store: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Debug for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionKey({}.{})", self.store, self.collection)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.store, self.collection)
    }
}

/// Store-assigned document identity.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Fresh random identity.
    pub fn generate() -> Self {
        DocumentId(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured record plus its (optional until inserted) identity.
///
/// Serializes as a flat JSON object with the identity under `_id`.
#[derive(Clone, Debug, PartialEq, Default, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default)]
    id: Option<DocumentId>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Document {
    /// Create a document from a field map.
    ///
    /// Same rules as [`Document::from_value`]: an `_id` entry must be a string.
    pub fn new(fields: Map<String, Value>) -> Result<Self> {
        Self::from_value(Value::Object(fields))
    }

    /// Create a document from a JSON value, which must be an object.
    ///
    /// A string `_id` field becomes the document identity.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => {
                let mut doc = Self { id: None, fields };
                if let Some(id) = doc.fields.remove(ID_FIELD) {
                    match id {
                        Value::String(s) => doc.id = Some(DocumentId(s)),
                        other => {
                            return Err(DriverError::InvalidDocument(format!(
                                "{} must be a string, got {}",
                                ID_FIELD, other
                            )))
                        }
                    }
                }
                Ok(doc)
            }
            other => Err(DriverError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Convert into a JSON object, including `_id` when present.
    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        if let Some(id) = &self.id {
            fields.insert(ID_FIELD.to_string(), Value::String(id.0.clone()));
        }
        Value::Object(fields)
    }

    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: DocumentId) {
        self.id = Some(id);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// True if both documents carry the same fields, ignoring identity.
    pub fn same_fields(&self, other: &Document) -> bool {
        self.fields == other.fields
    }

    /// Set every field of `patch` onto this document. Identity is never patched.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> bool {
        let mut changed = false;
        for (k, v) in patch {
            if k == ID_FIELD {
                continue;
            }
            if self.fields.get(k) != Some(v) {
                self.fields.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        changed
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(id) = &self.id {
            map.serialize_entry(ID_FIELD, id)?;
        }
        // `_id` is written once, from the identity only
        for (k, v) in self.fields.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Selects documents for update and delete.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Every document in the collection.
    All,
    /// The document with this identity.
    Id(DocumentId),
    /// Documents whose fields equal every given field.
    Fields(Map<String, Value>),
}

impl Filter {
    /// Filter identifying `doc`: by id when it has one, else by all its fields.
    pub fn identifying(doc: &Document) -> Self {
        match doc.id() {
            Some(id) => Filter::Id(id.clone()),
            None => Filter::Fields(doc.fields().clone()),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(id) => doc.id() == Some(id),
            Filter::Fields(fields) => fields.iter().all(|(k, v)| doc.get(k) == Some(v)),
        }
    }
}

/// Full ordered contents of a collection as of the last operation against it.
///
/// Immutable once built. Clones share the same backing list; use
/// [`Snapshot::to_vec`] to obtain documents that can be modified freely.
#[derive(Clone, PartialEq)]
pub struct Snapshot {
    documents: Arc<[Document]>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    /// Owned copy of the documents.
    pub fn to_vec(&self) -> Vec<Document> {
        self.documents.to_vec()
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| d.id() == Some(id))
    }

    /// Number of documents whose fields equal `doc`'s fields.
    pub fn count_matching(&self, doc: &Document) -> usize {
        self.documents.iter().filter(|d| d.same_fields(doc)).count()
    }

    /// True if both snapshots hold the same document list.
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.documents, &other.documents)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.documents.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// Kind of mutation an [`OperationResult`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// What a mutation did, returned to its caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: OperationType,
    pub affected_count: usize,
    pub affected_ids: Vec<DocumentId>,
}

/// Store acknowledgement of an insert.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted_count: usize,
    pub inserted_ids: Vec<DocumentId>,
}

/// Store acknowledgement of an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched_count: usize,
    pub modified_count: usize,
    /// Identity of the matched document, if any.
    pub matched_id: Option<DocumentId>,
}

/// Store acknowledgement of a delete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: usize,
    pub deleted_ids: Vec<DocumentId>,
}
