//! Domain vocabulary over the store primitives.
//!
//! Every wrapper validates that a record carries a primary key and skips it
//! with a warning otherwise, so a single bad record never fails a batch.
//! Collections the server owns outright (folders, tags, workspaces,
//! templates, prompts, assistants, models) are cached by full replacement.

use crate::error::StorageResult;
use crate::records::record_key;
use crate::schema::Collection;
use crate::store::LocalStore;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

/// Key of the application settings record in `settings`.
pub const APP_SETTINGS_KEY: &str = "app";

/// Key of the AI settings record in `settings`.
pub const AI_SETTINGS_KEY: &str = "ai";

impl LocalStore {
    /// Upserts one record under its own key. Returns `false` if skipped.
    async fn upsert_keyed(&self, collection: Collection, record: &Value) -> StorageResult<bool> {
        match record_key(record) {
            Some(key) => {
                self.put(collection, &key, record).await?;
                Ok(true)
            }
            None => {
                warn!("not caching {collection} record without an id");
                Ok(false)
            }
        }
    }

    async fn upsert_many(&self, collection: Collection, records: &[Value]) -> StorageResult<usize> {
        let mut written = 0;
        for record in records {
            if self.upsert_keyed(collection, record).await? {
                written += 1;
            }
        }
        Ok(written)
    }

    // ── Notes ──

    pub async fn cache_note(&self, note: &Value) -> StorageResult<bool> {
        self.upsert_keyed(Collection::Notes, note).await
    }

    pub async fn cache_notes(&self, notes: &[Value]) -> StorageResult<usize> {
        self.upsert_many(Collection::Notes, notes).await
    }

    pub async fn cached_note(&self, id: &str) -> StorageResult<Option<Value>> {
        self.get(Collection::Notes, id).await
    }

    pub async fn cached_notes(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::Notes).await
    }

    pub async fn notes_in_folder(&self, folder_id: &str) -> StorageResult<Vec<Value>> {
        self.get_all_by_index(Collection::Notes, "folderId", &json!(folder_id))
            .await
    }

    pub async fn notes_in_workspace(&self, workspace_id: &str) -> StorageResult<Vec<Value>> {
        self.get_all_by_index(Collection::Notes, "workspaceId", &json!(workspace_id))
            .await
    }

    pub async fn remove_cached_note(&self, id: &str) -> StorageResult<()> {
        self.delete(Collection::Notes, id).await
    }

    // ── Folders ──

    pub async fn cache_folders(&self, folders: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::Folders, folders).await
    }

    pub async fn cache_folder(&self, folder: &Value) -> StorageResult<bool> {
        self.upsert_keyed(Collection::Folders, folder).await
    }

    pub async fn cached_folders(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::Folders).await
    }

    pub async fn child_folders(&self, parent_id: &str) -> StorageResult<Vec<Value>> {
        self.get_all_by_index(Collection::Folders, "parentId", &json!(parent_id))
            .await
    }

    pub async fn remove_cached_folder(&self, id: &str) -> StorageResult<()> {
        self.delete(Collection::Folders, id).await
    }

    // ── Tags / workspaces / templates ──

    pub async fn cache_tags(&self, tags: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::Tags, tags).await
    }

    pub async fn cached_tags(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::Tags).await
    }

    pub async fn cache_workspaces(&self, workspaces: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::Workspaces, workspaces).await
    }

    pub async fn cached_workspaces(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::Workspaces).await
    }

    pub async fn cache_templates(&self, templates: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::Templates, templates).await
    }

    pub async fn cached_templates(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::Templates).await
    }

    pub async fn templates_in_workspace(&self, workspace_id: &str) -> StorageResult<Vec<Value>> {
        self.get_all_by_index(Collection::Templates, "workspaceId", &json!(workspace_id))
            .await
    }

    // ── AI conversations ──

    pub async fn cache_conversation(&self, conversation: &Value) -> StorageResult<bool> {
        self.upsert_keyed(Collection::AiConversations, conversation).await
    }

    pub async fn cache_conversations(&self, conversations: &[Value]) -> StorageResult<usize> {
        self.upsert_many(Collection::AiConversations, conversations).await
    }

    pub async fn cached_conversation(&self, id: &str) -> StorageResult<Option<Value>> {
        self.get(Collection::AiConversations, id).await
    }

    pub async fn cached_conversations(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::AiConversations).await
    }

    pub async fn remove_cached_conversation(&self, id: &str) -> StorageResult<()> {
        self.delete(Collection::AiConversations, id).await
    }

    // ── Favorites / prompts / assistants / models ──

    pub async fn add_favorite(&self, favorite: &Value) -> StorageResult<bool> {
        self.upsert_keyed(Collection::AiFavorites, favorite).await
    }

    pub async fn remove_favorite(&self, id: &str) -> StorageResult<()> {
        self.delete(Collection::AiFavorites, id).await
    }

    pub async fn favorites(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::AiFavorites).await
    }

    pub async fn favorites_for_conversation(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Vec<Value>> {
        self.get_all_by_index(
            Collection::AiFavorites,
            "conversationId",
            &json!(conversation_id),
        )
        .await
    }

    pub async fn cache_prompts(&self, prompts: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::AiPrompts, prompts).await
    }

    pub async fn save_prompt(&self, prompt: &Value) -> StorageResult<bool> {
        self.upsert_keyed(Collection::AiPrompts, prompt).await
    }

    pub async fn remove_prompt(&self, id: &str) -> StorageResult<()> {
        self.delete(Collection::AiPrompts, id).await
    }

    pub async fn prompts(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::AiPrompts).await
    }

    pub async fn cache_assistants(&self, assistants: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::AiAssistants, assistants).await
    }

    pub async fn cached_assistants(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::AiAssistants).await
    }

    pub async fn cache_models(&self, models: &[Value]) -> StorageResult<usize> {
        self.clear_and_replace(Collection::AiModels, models).await
    }

    pub async fn cached_models(&self) -> StorageResult<Vec<Value>> {
        self.get_all(Collection::AiModels).await
    }

    // ── Drafts ──

    /// Stores the unsent composer text of a conversation, keyed by its id.
    pub async fn save_draft(&self, conversation_id: &str, content: &str) -> StorageResult<bool> {
        if conversation_id.trim().is_empty() {
            warn!("not saving draft without a conversation id");
            return Ok(false);
        }
        let draft = json!({
            "id": conversation_id,
            "conversationId": conversation_id,
            "content": content,
            "updatedAt": Utc::now().to_rfc3339(),
        });
        self.put(Collection::AiDrafts, conversation_id, &draft).await?;
        Ok(true)
    }

    pub async fn draft(&self, conversation_id: &str) -> StorageResult<Option<Value>> {
        self.get(Collection::AiDrafts, conversation_id).await
    }

    pub async fn remove_draft(&self, conversation_id: &str) -> StorageResult<()> {
        self.delete(Collection::AiDrafts, conversation_id).await
    }

    // ── Attachments ──

    pub async fn cache_attachment(&self, attachment: &Value) -> StorageResult<bool> {
        self.upsert_keyed(Collection::Attachments, attachment).await
    }

    pub async fn attachments_for_note(&self, note_id: &str) -> StorageResult<Vec<Value>> {
        self.get_all_by_index(Collection::Attachments, "noteId", &json!(note_id))
            .await
    }

    pub async fn remove_attachment(&self, id: &str) -> StorageResult<()> {
        self.delete(Collection::Attachments, id).await
    }

    // ── Settings ──

    pub async fn cached_settings(&self) -> StorageResult<Option<Value>> {
        self.get(Collection::Settings, APP_SETTINGS_KEY).await
    }

    pub async fn save_settings(&self, settings: &Value) -> StorageResult<()> {
        self.put(Collection::Settings, APP_SETTINGS_KEY, &with_id(settings, APP_SETTINGS_KEY))
            .await
    }

    pub async fn cached_ai_settings(&self) -> StorageResult<Option<Value>> {
        self.get(Collection::Settings, AI_SETTINGS_KEY).await
    }

    pub async fn save_ai_settings(&self, settings: &Value) -> StorageResult<()> {
        self.put(Collection::Settings, AI_SETTINGS_KEY, &with_id(settings, AI_SETTINGS_KEY))
            .await
    }
}

/// Stamps a singleton record with its well-known key.
pub(crate) fn with_id(record: &Value, key: &str) -> Value {
    let mut record = match record {
        Value::Object(_) => record.clone(),
        other => json!({ "value": other }),
    };
    if let Some(obj) = record.as_object_mut() {
        obj.insert("id".to_string(), Value::String(key.to_string()));
    }
    record
}
