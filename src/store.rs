//! Content store: the relational primitives the pipeline needs, plus an
//! in-memory implementation used by the server and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{Collection, NewCollection, NewQuestion, Question};
use crate::error::StoreError;

#[async_trait]
pub trait ContentStore: Send + Sync {
  async fn find_collection(&self, id: Uuid) -> Result<Option<Collection>, StoreError>;

  /// Creates an unpublished collection with a zero counter.
  async fn create_collection(&self, meta: NewCollection) -> Result<Collection, StoreError>;

  /// Highest `order_index` in the collection, `None` when it has no questions.
  async fn max_order_index(&self, collection_id: Uuid) -> Result<Option<u32>, StoreError>;

  /// Inserts the whole batch or nothing.
  async fn insert_many(&self, records: Vec<NewQuestion>) -> Result<Vec<Question>, StoreError>;

  async fn write_total_questions(&self, collection_id: Uuid, total: u32) -> Result<(), StoreError>;

  async fn count_questions(&self, collection_id: Uuid) -> Result<u32, StoreError>;

  /// Questions ordered by `order_index`.
  async fn list_questions(&self, collection_id: Uuid) -> Result<Vec<Question>, StoreError>;
}

#[derive(Default)]
struct Tables {
  collections: HashMap<Uuid, Collection>,
  questions: HashMap<Uuid, Vec<Question>>,
}

/// Process-local store with a unique `(collection_id, order_index)` constraint.
#[derive(Clone, Default)]
pub struct MemoryStore {
  tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub async fn collection_count(&self) -> usize {
    self.tables.read().await.collections.len()
  }
}

#[async_trait]
impl ContentStore for MemoryStore {
  async fn find_collection(&self, id: Uuid) -> Result<Option<Collection>, StoreError> {
    Ok(self.tables.read().await.collections.get(&id).cloned())
  }

  #[instrument(level = "debug", target = "pipeline", skip(self, meta), fields(title = %meta.title))]
  async fn create_collection(&self, meta: NewCollection) -> Result<Collection, StoreError> {
    let c = Collection {
      id: Uuid::new_v4(),
      kind: meta.kind,
      title: meta.title,
      description: meta.description,
      content: meta.content,
      parent_id: meta.parent_id,
      duration_minutes: meta.duration_minutes,
      passing_score: meta.passing_score,
      is_published: false,
      total_questions: 0,
      created_at: Utc::now(),
    };
    let mut t = self.tables.write().await;
    t.collections.insert(c.id, c.clone());
    debug!(target: "pipeline", id = %c.id, kind = ?c.kind, "Collection created");
    Ok(c)
  }

  async fn max_order_index(&self, collection_id: Uuid) -> Result<Option<u32>, StoreError> {
    let t = self.tables.read().await;
    Ok(t.questions.get(&collection_id).and_then(|qs| qs.iter().map(|q| q.order_index).max()))
  }

  #[instrument(level = "debug", target = "pipeline", skip(self, records), fields(batch = records.len()))]
  async fn insert_many(&self, records: Vec<NewQuestion>) -> Result<Vec<Question>, StoreError> {
    let mut t = self.tables.write().await;

    // Check the whole batch before touching anything.
    let mut taken: HashMap<Uuid, Vec<u32>> = HashMap::new();
    for r in &records {
      if !t.collections.contains_key(&r.collection_id) {
        return Err(StoreError::Write(format!("collection {} does not exist", r.collection_id)));
      }
      let used = taken.entry(r.collection_id).or_insert_with(|| {
        t.questions.get(&r.collection_id).map(|qs| qs.iter().map(|q| q.order_index).collect()).unwrap_or_default()
      });
      if used.contains(&r.order_index) {
        return Err(StoreError::Conflict { collection_id: r.collection_id, order_index: r.order_index });
      }
      used.push(r.order_index);
    }

    let now = Utc::now();
    let inserted: Vec<Question> = records
      .into_iter()
      .map(|r| Question { id: Uuid::new_v4(), collection_id: r.collection_id, order_index: r.order_index, body: r.body, created_at: now })
      .collect();
    for q in &inserted {
      t.questions.entry(q.collection_id).or_default().push(q.clone());
    }
    Ok(inserted)
  }

  async fn write_total_questions(&self, collection_id: Uuid, total: u32) -> Result<(), StoreError> {
    let mut t = self.tables.write().await;
    let c = t
      .collections
      .get_mut(&collection_id)
      .ok_or_else(|| StoreError::Write(format!("collection {} does not exist", collection_id)))?;
    c.total_questions = total;
    Ok(())
  }

  async fn count_questions(&self, collection_id: Uuid) -> Result<u32, StoreError> {
    let t = self.tables.read().await;
    Ok(t.questions.get(&collection_id).map_or(0, |qs| qs.len() as u32))
  }

  async fn list_questions(&self, collection_id: Uuid) -> Result<Vec<Question>, StoreError> {
    let t = self.tables.read().await;
    let mut qs = t.questions.get(&collection_id).cloned().unwrap_or_default();
    qs.sort_by_key(|q| q.order_index);
    Ok(qs)
  }
}
